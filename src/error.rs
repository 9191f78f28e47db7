use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// 特征提取流程中可能出现的错误
///
/// 除 [`Error::AcceleratorUnavailable`] 只会被记录为警告外，其余错误都会终止整个流程，
/// 并且不会写出任何输出文件。
#[derive(Debug, Error)]
pub enum Error {
    #[error("目录中没有找到图片: {}", .0.display())]
    CorpusEmpty(PathBuf),
    #[error("无法从文件名得到整数标识符 `{id}`: {}", .path.display())]
    InvalidIdentifier { id: String, path: PathBuf },
    #[error("无法解码图片 {}: {source}", .path.display())]
    ImageDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("无法为 {rows} 张图片分配特征存储 (每张 {row_len} 个元素)")]
    StorageAllocation { rows: usize, row_len: usize },
    #[error("加速器不可用: {0}")]
    AcceleratorUnavailable(String),
    #[error("模型没有名为 `{0}` 的输出")]
    MissingOutput(String),
    #[error("特征形状不匹配: 期望 {expected:?}, 实际 {actual:?}")]
    ShapeMismatch { expected: Vec<usize>, actual: Vec<usize> },
    #[error("第 {row} 行 (图片 {id}) 的特征包含 NaN 或 Inf")]
    NonFiniteFeatures { row: usize, id: String },
    #[error("写入越界: [{offset}, {offset} + {len}) 超出容量 {capacity}")]
    OutOfBounds { offset: usize, len: usize, capacity: usize },
    #[error("写入区间 [{offset}, {offset} + {len}) 与已写入的行重叠")]
    Overlap { offset: usize, len: usize },
    #[error("特征存储未写满: {written}/{capacity}")]
    IncompleteStore { written: usize, capacity: usize },
    #[error("特征文件格式错误: {0}")]
    InvalidArchive(String),
    #[error("无效的配置: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Walk(#[from] walkdir::Error),
    #[error(transparent)]
    Onnx(#[from] ort::Error),
    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
    #[error(transparent)]
    WriteNpz(#[from] ndarray_npy::WriteNpzError),
    #[error(transparent)]
    ReadNpz(#[from] ndarray_npy::ReadNpzError),
    #[error(transparent)]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}
