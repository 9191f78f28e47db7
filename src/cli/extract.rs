use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;

use crate::Pipeline;
use crate::cli::SubCommandExtend;
use crate::config::*;
use crate::extractor::OnnxBackbone;

#[derive(Parser, Debug, Clone)]
pub struct ExtractCommand {
    #[command(flatten)]
    pub transform: TransformOptions,
    #[command(flatten)]
    pub loader: LoaderOptions,
    #[command(flatten)]
    pub model: ModelOptions,
    /// 图片所在目录，标识符为文件名中第一个 `.` 之前的部分
    #[arg(default_value = DEFAULT_IMAGES)]
    pub images: PathBuf,
    /// 特征文件输出路径
    #[arg(short, long, default_value = DEFAULT_FEATURES)]
    pub output: PathBuf,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = "jpg")]
    pub suffix: String,
    /// 写入前检查特征中是否存在 NaN 或 Inf
    #[arg(long)]
    pub check_finite: bool,
}

impl ExtractCommand {
    pub fn config(&self, opts: &Opts) -> ExtractConfig {
        ExtractConfig {
            images: self.images.clone(),
            output: self.output.clone(),
            suffixes: self.suffix.split(',').map(|s| s.trim().to_owned()).collect(),
            image_size: self.transform.image_size,
            central_fraction: self.transform.central_fraction,
            batch_size: self.loader.batch_size,
            workers: self.loader.workers,
            prefetch: self.loader.prefetch,
            visual_features: self.model.visual_features,
            output_size: self
                .model
                .output_size
                .unwrap_or(self.transform.image_size / DOWNSAMPLE_FACTOR),
            check_finite: self.check_finite,
            progress: !opts.quiet,
        }
    }
}

impl SubCommandExtend for ExtractCommand {
    fn run(&self, opts: &Opts) -> Result<()> {
        // 先扫描图片并分配存储，确认可以完成后再加载模型
        let pipeline = Pipeline::prepare(self.config(opts))?;
        info!("已找到 {} 张图片，开始加载模型", pipeline.corpus().len());
        let backbone = OnnxBackbone::open(
            &self.model.model,
            &self.model.layer,
            self.model.device,
            self.model.intra_threads,
        )?;
        let device = backbone.device();
        let summary = pipeline.run(backbone)?;
        println!("{}\t{:?}\t{}", summary.images, device, self.output.display());
        Ok(())
    }
}
