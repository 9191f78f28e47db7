use std::path::Path;

use log::{info, warn};
use ndarray::{Array4, ArrayView4, Axis, Ix4};
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;

use crate::config::Device;
use crate::error::{Error, Result};

/// 预训练网络
///
/// `forward` 完整地运行一次网络，但返回的是被截获的中间层激活而不是分类输出。
/// 截获的张量直接作为返回值，实现中不应保留任何跨调用的缓冲区。
pub trait Backbone {
    /// 输入 (N, 3, S, S)，输出 (N, C, H, W)
    fn forward(&mut self, images: Array4<f32>) -> Result<Array4<f32>>;
}

impl<B: Backbone + ?Sized> Backbone for Box<B> {
    fn forward(&mut self, images: Array4<f32>) -> Result<Array4<f32>> {
        (**self).forward(images)
    }
}

/// 基于 ONNX Runtime 的网络
///
/// 模型导出时需要把目标中间层 (如 ResNet-152 的 `layer4`) 作为图的一个输出，
/// 推理时按名称取出该输出。ONNX Runtime 只做推理，不记录梯度也不会更新参数。
pub struct OnnxBackbone {
    session: Session,
    layer: String,
    device: Device,
}

impl OnnxBackbone {
    pub fn open(model: &Path, layer: &str, device: Device, intra_threads: usize) -> Result<Self> {
        let device = match select_device(device) {
            Ok(device) => device,
            Err(e) => {
                warn!("{}，回退到 CPU 推理，速度会明显下降", e);
                Device::Cpu
            }
        };

        let builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(intra_threads.max(1))?;
        #[cfg(feature = "cuda")]
        let builder = if device == Device::Cuda {
            use ort::execution_providers::CUDAExecutionProvider;
            builder.with_execution_providers([CUDAExecutionProvider::default().build()])?
        } else {
            builder
        };
        let session = builder.commit_from_file(model)?;

        if !session.outputs.iter().any(|output| output.name == layer) {
            return Err(Error::MissingOutput(layer.to_owned()));
        }
        info!("已加载模型 {}，截获输出 `{}`，设备 {:?}", model.display(), layer, device);

        Ok(Self { session, layer: layer.to_owned(), device })
    }

    /// 实际使用的推理设备
    pub fn device(&self) -> Device {
        self.device
    }
}

impl Backbone for OnnxBackbone {
    fn forward(&mut self, images: Array4<f32>) -> Result<Array4<f32>> {
        let outputs = self.session.run(ort::inputs![images]?)?;
        let output = outputs[self.layer.as_str()].try_extract_tensor::<f32>()?;
        Ok(output.into_dimensionality::<Ix4>()?.to_owned())
    }
}

fn select_device(device: Device) -> Result<Device> {
    match device {
        Device::Cpu => Ok(Device::Cpu),
        Device::Auto | Device::Cuda => cuda_available().map(|_| Device::Cuda),
    }
}

#[cfg(feature = "cuda")]
fn cuda_available() -> Result<()> {
    use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider};

    match CUDAExecutionProvider::default().is_available() {
        Ok(true) => Ok(()),
        Ok(false) => Err(Error::AcceleratorUnavailable("未检测到可用的 CUDA 设备".into())),
        Err(e) => Err(Error::AcceleratorUnavailable(e.to_string())),
    }
}

#[cfg(not(feature = "cuda"))]
fn cuda_available() -> Result<()> {
    Err(Error::AcceleratorUnavailable("编译时未启用 cuda 特性".into()))
}

/// 包装网络并检查输出形状
pub struct FeatureExtractor<B> {
    backbone: B,
    shape: (usize, usize, usize),
}

impl<B: Backbone> FeatureExtractor<B> {
    /// `shape` 为单张图片的特征形状 (C, H, W)
    pub fn new(backbone: B, shape: (usize, usize, usize)) -> Self {
        Self { backbone, shape }
    }

    pub fn backbone(&self) -> &B {
        &self.backbone
    }

    /// 返回 (N, C, H, W)，其中 N 与输入的批次大小相同
    pub fn extract(&mut self, images: Array4<f32>) -> Result<Array4<f32>> {
        let n = images.len_of(Axis(0));
        let features = self.backbone.forward(images)?;
        let (c, h, w) = self.shape;
        if features.dim() != (n, c, h, w) {
            return Err(Error::ShapeMismatch {
                expected: vec![n, c, h, w],
                actual: features.shape().to_vec(),
            });
        }
        Ok(features)
    }
}

/// 返回第一个包含 NaN 或 Inf 的行
pub fn first_non_finite(features: ArrayView4<f32>) -> Option<usize> {
    features.outer_iter().position(|row| row.iter().any(|v| !v.is_finite()))
}
