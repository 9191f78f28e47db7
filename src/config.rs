use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::cli::*;
use crate::error::{Error, Result};

/// 默认的图片目录
pub const DEFAULT_IMAGES: &str = "data/images";
/// 默认的特征文件路径
pub const DEFAULT_FEATURES: &str = "data/features.npz";

/// 输入网络的图片边长
pub const IMAGE_SIZE: usize = 448;
/// 中心裁剪比例，缩放时短边为 `IMAGE_SIZE / CENTRAL_FRACTION`
pub const CENTRAL_FRACTION: f32 = 0.875;
/// 中间层特征的通道数
pub const VISUAL_FEATURES: usize = 2048;
/// 网络的总下采样倍数 (2^5)
pub const DOWNSAMPLE_FACTOR: usize = 32;
/// 缩放后短边的上限
pub const MAX_IMAGE_SIZE: usize = 1 << 14;
pub const BATCH_SIZE: usize = 64;
pub const WORKERS: usize = 2;

#[derive(Parser, Debug, Clone)]
pub struct TransformOptions {
    /// 输入网络的图片边长
    #[arg(long, value_name = "SIZE", default_value_t = IMAGE_SIZE)]
    pub image_size: usize,
    /// 中心裁剪比例，取值范围 (0, 1]
    #[arg(long, value_name = "FRACTION", default_value_t = CENTRAL_FRACTION)]
    pub central_fraction: f32,
}

#[derive(Parser, Debug, Clone)]
pub struct LoaderOptions {
    /// 每个批次的图片数量
    #[arg(short, long, value_name = "SIZE", default_value_t = BATCH_SIZE)]
    pub batch_size: usize,
    /// 解码图片的线程数量，0 表示使用全部 CPU
    #[arg(short = 'j', long, value_name = "N", default_value_t = WORKERS)]
    pub workers: usize,
    /// 预取的批次数量
    #[arg(long, value_name = "N", default_value_t = 2)]
    pub prefetch: usize,
}

#[derive(Parser, Debug, Clone)]
pub struct ModelOptions {
    /// ONNX 模型文件路径
    #[arg(short, long, value_name = "ONNX")]
    pub model: PathBuf,
    /// 作为特征的中间层输出名称
    #[arg(long, value_name = "NAME", default_value = "layer4")]
    pub layer: String,
    /// 推理设备
    #[arg(long, value_enum, default_value_t = Device::Auto)]
    pub device: Device,
    /// ONNX Runtime 单个算子内部的线程数量
    #[arg(long, value_name = "N", default_value_t = 4)]
    pub intra_threads: usize,
    /// 中间层特征的通道数
    #[arg(long, value_name = "N", default_value_t = VISUAL_FEATURES)]
    pub visual_features: usize,
    /// 中间层特征的空间尺寸，默认为图片边长 / 32
    #[arg(long, value_name = "SIZE")]
    pub output_size: Option<usize>,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "viqa-features", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// 不显示进度条
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 提取目录中所有图片的特征并保存为 npz 文件
    Extract(ExtractCommand),
    /// 查看特征文件的内容
    Inspect(InspectCommand),
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
    /// 优先使用 CUDA，不可用时回退到 CPU
    #[default]
    Auto,
    Cpu,
    Cuda,
}

/// 一次特征提取所需的全部参数
#[derive(Debug, Clone)]
pub struct ExtractConfig {
    pub images: PathBuf,
    pub output: PathBuf,
    /// 扫描的文件后缀名，不区分大小写
    pub suffixes: Vec<String>,
    pub image_size: usize,
    pub central_fraction: f32,
    pub batch_size: usize,
    pub workers: usize,
    pub prefetch: usize,
    pub visual_features: usize,
    pub output_size: usize,
    /// 写入前检查特征是否全部为有限值
    pub check_finite: bool,
    pub progress: bool,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            images: PathBuf::from(DEFAULT_IMAGES),
            output: PathBuf::from(DEFAULT_FEATURES),
            suffixes: vec!["jpg".to_string()],
            image_size: IMAGE_SIZE,
            central_fraction: CENTRAL_FRACTION,
            batch_size: BATCH_SIZE,
            workers: WORKERS,
            prefetch: 2,
            visual_features: VISUAL_FEATURES,
            output_size: IMAGE_SIZE / DOWNSAMPLE_FACTOR,
            check_finite: false,
            progress: true,
        }
    }
}

impl ExtractConfig {
    /// 单张图片的特征形状 (C, H, W)
    pub fn feature_shape(&self) -> (usize, usize, usize) {
        (self.visual_features, self.output_size, self.output_size)
    }

    /// 实际使用的解码线程数量
    pub fn worker_threads(&self) -> usize {
        if self.workers == 0 { num_cpus::get() } else { self.workers }
    }

    pub fn validate(&self) -> Result<()> {
        if self.image_size == 0 {
            return Err(Error::InvalidConfig("图片边长必须大于 0".into()));
        }
        if !(self.central_fraction > 0. && self.central_fraction <= 1.) {
            return Err(Error::InvalidConfig(format!(
                "中心裁剪比例必须位于 (0, 1]: {}",
                self.central_fraction
            )));
        }
        let resize_size = self.image_size as f64 / self.central_fraction as f64;
        if resize_size > MAX_IMAGE_SIZE as f64 {
            return Err(Error::InvalidConfig(format!(
                "缩放后的图片边长 {} 超过上限 {}",
                resize_size, MAX_IMAGE_SIZE
            )));
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("批次大小必须大于 0".into()));
        }
        if self.visual_features == 0 || self.output_size == 0 {
            return Err(Error::InvalidConfig("特征形状的每一维都必须大于 0".into()));
        }
        if self.suffixes.is_empty() {
            return Err(Error::InvalidConfig("至少需要一个文件后缀名".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_reference_constants() {
        let config = ExtractConfig::default();
        assert_eq!(config.feature_shape(), (2048, 14, 14));
        assert_eq!(config.batch_size, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_bad_central_fraction() {
        for fraction in [0., -0.5, 1.5, f32::NAN] {
            let config = ExtractConfig { central_fraction: fraction, ..Default::default() };
            assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
        }
    }

    #[test]
    fn rejects_oversized_images() {
        let cases = [
            (u32::MAX as usize + 1, 1.),
            (MAX_IMAGE_SIZE + 1, 1.),
            (MAX_IMAGE_SIZE, 0.5),
            (448, 1e-30),
        ];
        for (image_size, central_fraction) in cases {
            let config = ExtractConfig { image_size, central_fraction, ..Default::default() };
            assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))), "{image_size}");
        }
        let config =
            ExtractConfig { image_size: MAX_IMAGE_SIZE, central_fraction: 1., ..Default::default() };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_workers_means_all_cpus() {
        let config = ExtractConfig { workers: 0, ..Default::default() };
        assert_eq!(config.worker_threads(), num_cpus::get());
    }

    #[test]
    fn parse_extract_defaults() {
        let opts = Opts::try_parse_from(["viqa-features", "extract", "-m", "resnet152.onnx"]).unwrap();
        let SubCommand::Extract(cmd) = opts.subcmd else { panic!("expected extract") };
        assert_eq!(cmd.images, PathBuf::from(DEFAULT_IMAGES));
        assert_eq!(cmd.output, PathBuf::from(DEFAULT_FEATURES));
        assert_eq!(cmd.loader.batch_size, BATCH_SIZE);
        assert_eq!(cmd.model.layer, "layer4");
        assert_eq!(cmd.model.device, Device::Auto);
    }
}
