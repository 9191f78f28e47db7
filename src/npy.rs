//! 特征文件 (npz) 的读写
//!
//! 文件是一个不压缩的 npz 归档，包含 `features` (`<f2`, N x C x H x W) 和 `ids` (`<i4`, N)
//! 两个数组，可以直接用 `numpy.load` 读取。

use std::io::{Read, Seek, Write};

use half::f16;
use ndarray::{Array1, Array4, ArrayView1, ArrayView4};
use ndarray_npy::{
    NpzReader, NpzWriter, ReadDataError, ReadableElement, WritableElement, WriteDataError,
};
use py_literal::Value as PyValue;
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

use crate::error::Result;

pub const FEATURES: &str = "features";
pub const IDS: &str = "ids";

const LITTLE_DESCR: &str = "<f2";
const BIG_DESCR: &str = ">f2";
const WRITE_CHUNK: usize = 1 << 20;

/// 半精度浮点数，作为 npy 文件中的 `<f2` 元素
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct F16(pub f16);

impl F16 {
    pub const ZERO: Self = Self(f16::ZERO);

    pub fn from_f32(value: f32) -> Self {
        Self(f16::from_f32(value))
    }

    pub fn to_f32(self) -> f32 {
        self.0.to_f32()
    }
}

impl From<F16> for f32 {
    fn from(value: F16) -> Self {
        value.to_f32()
    }
}

impl WritableElement for F16 {
    fn type_descriptor() -> PyValue {
        PyValue::String(LITTLE_DESCR.into())
    }

    fn write<W: Write>(&self, mut writer: W) -> Result<(), WriteDataError> {
        writer.write_all(&self.0.to_le_bytes())?;
        Ok(())
    }

    fn write_slice<W: Write>(slice: &[Self], mut writer: W) -> Result<(), WriteDataError> {
        // 分块转换为小端字节，避免复制整个数组
        let mut buf = Vec::with_capacity(slice.len().min(WRITE_CHUNK) * size_of::<f16>());
        for chunk in slice.chunks(WRITE_CHUNK) {
            buf.clear();
            buf.extend(chunk.iter().flat_map(|v| v.0.to_le_bytes()));
            writer.write_all(&buf)?;
        }
        Ok(())
    }
}

impl ReadableElement for F16 {
    fn read_to_end_exact_vec<R: Read>(
        mut reader: R,
        type_desc: &PyValue,
        len: usize,
    ) -> Result<Vec<Self>, ReadDataError> {
        let from_bytes: fn([u8; 2]) -> f16 = match type_desc {
            PyValue::String(s) if s == LITTLE_DESCR => f16::from_le_bytes,
            PyValue::String(s) if s == BIG_DESCR => f16::from_be_bytes,
            other => return Err(ReadDataError::WrongDescriptor(other.clone())),
        };

        // 头部声明的长度不可信，缓冲区只随实际读到的数据增长
        let expected = len.saturating_mul(size_of::<f16>());
        let mut bytes = Vec::new();
        reader.by_ref().take(expected as u64).read_to_end(&mut bytes)?;
        if bytes.len() < expected {
            return Err(ReadDataError::MissingData);
        }
        let extra = reader.read_to_end(&mut Vec::new())?;
        if extra > 0 {
            return Err(ReadDataError::ExtraBytes(extra));
        }

        Ok(bytes.chunks_exact(2).map(|b| F16(from_bytes([b[0], b[1]]))).collect())
    }
}

/// 写出完整的特征归档，返回底层的 writer
pub fn write_archive<W: Write + Seek>(
    writer: W,
    features: ArrayView4<F16>,
    ids: ArrayView1<i32>,
) -> Result<W> {
    // 特征文件可能超过 4GiB，需要 zip64
    let options =
        SimpleFileOptions::default().compression_method(CompressionMethod::Stored).large_file(true);
    let mut npz = NpzWriter::new_with_options(writer, options);
    npz.add_array(FEATURES, &features)?;
    npz.add_array(IDS, &ids)?;
    Ok(npz.finish()?)
}

/// 读取特征归档中的两个数组
pub fn read_archive<R: Read + Seek>(reader: R) -> Result<(Array4<F16>, Array1<i32>)> {
    let mut npz = NpzReader::new(reader)?;
    let features = npz.by_name(FEATURES)?;
    let ids = npz.by_name(IDS)?;
    Ok((features, ids))
}
