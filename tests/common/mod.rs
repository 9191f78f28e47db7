#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};
use ndarray::{Array4, s};
use viqa_features::extractor::Backbone;
use viqa_features::{ExtractConfig, FeatureArchive, Pipeline, Result, Summary};

pub const IMAGE_SIZE: usize = 64;
pub const CHANNELS: usize = 6;
pub const OUTPUT_SIZE: usize = 2;

/// 代替预训练网络的确定性网络
///
/// 对每个区块做平均池化，第 k 个输出通道取输入通道 `k % 3` 并乘以 `1 + k / 3`。
#[derive(Default)]
pub struct PoolingBackbone {
    pub calls: usize,
}

impl Backbone for PoolingBackbone {
    fn forward(&mut self, images: Array4<f32>) -> Result<Array4<f32>> {
        self.calls += 1;
        let (n, _, h, w) = images.dim();
        let (bh, bw) = (h / OUTPUT_SIZE, w / OUTPUT_SIZE);
        Ok(Array4::from_shape_fn((n, CHANNELS, OUTPUT_SIZE, OUTPUT_SIZE), |(i, k, y, x)| {
            let block = images.slice(s![i, k % 3, y * bh..(y + 1) * bh, x * bw..(x + 1) * bw]);
            block.mean().unwrap() * (1 + k / 3) as f32
        }))
    }
}

/// 每张图片的内容和尺寸都由标识符决定
pub fn write_image(dir: &Path, id: u32) -> PathBuf {
    let width = 80 + id % 7 * 5;
    let height = 70 + id % 5 * 9;
    let image = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * (id + 1)) as u8, (y * 3 + id) as u8, ((x + y) * (id % 11 + 1) / 2) as u8])
    });
    let path = dir.join(format!("{}.jpg", id));
    image.save(&path).unwrap();
    path
}

pub fn write_images(dir: &Path, ids: impl IntoIterator<Item = u32>) {
    for id in ids {
        write_image(dir, id);
    }
}

pub fn config(images: &Path, output: &Path, batch_size: usize) -> ExtractConfig {
    ExtractConfig {
        images: images.to_path_buf(),
        output: output.to_path_buf(),
        image_size: IMAGE_SIZE,
        batch_size,
        visual_features: CHANNELS,
        output_size: OUTPUT_SIZE,
        progress: false,
        ..Default::default()
    }
}

pub fn extract(config: ExtractConfig) -> Result<(Summary, FeatureArchive)> {
    let output = config.output.clone();
    let summary = Pipeline::prepare(config)?.run(PoolingBackbone::default())?;
    Ok((summary, FeatureArchive::open(output)?))
}

pub fn copy_image(from: &Path, to_dir: &Path) {
    fs::copy(from, to_dir.join(from.file_name().unwrap())).unwrap();
}
