use std::path::Path;

use image::error::{LimitError, LimitErrorKind};
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageError, RgbImage};
use ndarray::Array3;

use crate::error::{Error, Result};

/// ImageNet 训练集的通道均值
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet 训练集的通道标准差
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// 图片到网络输入张量的确定性变换
///
/// 1. 等比缩放，使短边等于 `target_size / central_fraction`
/// 2. 中心裁剪为 `target_size x target_size`
/// 3. 像素值缩放到 [0, 1]
/// 4. 按通道减均值除以标准差
///
/// 归一化参数必须与预训练网络一致，否则特征质量会下降且不会有任何报错。
#[derive(Debug, Clone, Copy)]
pub struct Transform {
    target_size: u32,
    central_fraction: f32,
    mean: [f32; 3],
    std: [f32; 3],
}

impl Transform {
    /// `target_size` 不能超过 [`MAX_IMAGE_SIZE`](crate::config::MAX_IMAGE_SIZE)
    pub fn new(target_size: usize, central_fraction: f32) -> Self {
        Self {
            target_size: target_size as u32,
            central_fraction,
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
        }
    }

    pub fn target_size(&self) -> usize {
        self.target_size as usize
    }

    /// 缩放后短边的长度
    pub fn resize_size(&self) -> u32 {
        (self.target_size as f64 / self.central_fraction as f64) as u32
    }

    /// 读取并解码图片，然后应用变换
    pub fn load(&self, path: &Path) -> Result<Array3<f32>> {
        let decode_error = |source| Error::ImageDecode { path: path.to_path_buf(), source };
        let image = image::open(path).map_err(decode_error)?;
        if image.width() == 0 || image.height() == 0 {
            let limit = LimitError::from_kind(LimitErrorKind::DimensionError);
            return Err(decode_error(ImageError::Limits(limit)));
        }
        Ok(self.apply(&image))
    }

    /// 返回形状为 (3, target_size, target_size) 的张量，图片的宽高必须大于 0
    pub fn apply(&self, image: &DynamicImage) -> Array3<f32> {
        let rgb = image.to_rgb8();
        let (width, height) = resized_dims(rgb.width(), rgb.height(), self.resize_size());
        let resized = imageops::resize(&rgb, width, height, FilterType::Triangle);
        let cropped = center_crop(&resized, self.target_size);

        let size = self.target_size as usize;
        Array3::from_shape_fn((3, size, size), |(c, y, x)| {
            let value = cropped.get_pixel(x as u32, y as u32).0[c] as f32 / 255.;
            (value - self.mean[c]) / self.std[c]
        })
    }
}

/// 按短边等比缩放后的宽高，长边向下取整
fn resized_dims(width: u32, height: u32, short: u32) -> (u32, u32) {
    if width <= height {
        let long = (short as u64 * height as u64 / width as u64) as u32;
        (short, long)
    } else {
        let long = (short as u64 * width as u64 / height as u64) as u32;
        (long, short)
    }
}

/// 裁剪偏移量四舍六入五成双，与 torchvision 的 CenterCrop 保持一致
fn crop_offset(length: u32, size: u32) -> u32 {
    (length.saturating_sub(size) as f64 / 2.).round_ties_even() as u32
}

fn center_crop(image: &RgbImage, size: u32) -> RgbImage {
    let left = crop_offset(image.width(), size);
    let top = crop_offset(image.height(), size);
    imageops::crop_imm(image, left, top, size, size).to_image()
}
