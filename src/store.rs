use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use log::{debug, info};
use ndarray::{Array1, Array4, ArrayView1, ArrayView3, ArrayView4, Axis, s};

use crate::error::{Error, Result};
use crate::npy::{self, F16};

/// 预先分配的特征存储
///
/// 第 i 行特征对应第 i 个标识符。每个批次按其在图片集中的绝对偏移写入，
/// 已写入的行不允许再次写入，全部写满后才能保存。
pub struct FeatureStore {
    features: Array4<F16>,
    ids: Array1<i32>,
    filled: Vec<bool>,
    written: usize,
}

impl FeatureStore {
    /// 为 `rows` 张图片分配存储，`shape` 为单张图片的特征形状 (C, H, W)
    pub fn allocate(rows: usize, shape: (usize, usize, usize)) -> Result<Self> {
        let (c, h, w) = shape;
        let row_len = c.saturating_mul(h).saturating_mul(w);
        let alloc_error = || Error::StorageAllocation { rows, row_len };

        let total = c
            .checked_mul(h)
            .and_then(|v| v.checked_mul(w))
            .and_then(|v| v.checked_mul(rows))
            .ok_or_else(alloc_error)?;
        let bytes = total
            .checked_mul(size_of::<F16>())
            .filter(|&b| b <= isize::MAX as usize)
            .ok_or_else(alloc_error)?;

        let mut data: Vec<F16> = Vec::new();
        data.try_reserve_exact(total).map_err(|_| alloc_error())?;
        data.resize(total, F16::ZERO);

        let features = Array4::from_shape_vec((rows, c, h, w), data)?;
        info!(
            "已分配特征存储: {} 张图片 x {:?}, 共 {:.2} MiB",
            rows,
            shape,
            bytes as f64 / (1 << 20) as f64
        );

        Ok(Self { features, ids: Array1::zeros(rows), filled: vec![false; rows], written: 0 })
    }

    pub fn capacity(&self) -> usize {
        self.ids.len()
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn is_full(&self) -> bool {
        self.written == self.capacity()
    }

    /// 单张图片的特征形状 (C, H, W)
    pub fn feature_shape(&self) -> (usize, usize, usize) {
        let (_, c, h, w) = self.features.dim();
        (c, h, w)
    }

    /// 将一个批次写入 `[offset, offset + ids.len())`，特征转换为半精度
    pub fn write_batch(
        &mut self,
        offset: usize,
        ids: &[i32],
        features: ArrayView4<f32>,
    ) -> Result<Range<usize>> {
        let len = ids.len();
        let (c, h, w) = self.feature_shape();
        if features.dim() != (len, c, h, w) {
            return Err(Error::ShapeMismatch {
                expected: vec![len, c, h, w],
                actual: features.shape().to_vec(),
            });
        }

        let capacity = self.capacity();
        let range = offset
            .checked_add(len)
            .filter(|&end| end <= capacity)
            .map(|end| offset..end)
            .ok_or(Error::OutOfBounds { offset, len, capacity })?;
        if self.filled[range.clone()].iter().any(|&filled| filled) {
            return Err(Error::Overlap { offset, len });
        }

        self.features
            .slice_mut(s![range.clone(), .., .., ..])
            .zip_mut_with(&features, |dst, &src| *dst = F16::from_f32(src));
        self.ids.slice_mut(s![range.clone()]).assign(&ArrayView1::from(ids));
        self.filled[range.clone()].fill(true);
        self.written += len;

        debug!("写入特征 [{}, {})，已完成 {}/{}", range.start, range.end, self.written, capacity);
        Ok(range)
    }

    pub fn features(&self) -> ArrayView4<F16> {
        self.features.view()
    }

    pub fn ids(&self) -> ArrayView1<i32> {
        self.ids.view()
    }

    /// 保存为 npz 文件
    ///
    /// 先写入同目录下的临时文件，成功后再重命名为目标文件。失败时删除临时文件，
    /// 已存在的旧文件不会被修改。
    pub fn persist(&self, path: impl AsRef<Path>) -> Result<()> {
        if !self.is_full() {
            return Err(Error::IncompleteStore { written: self.written, capacity: self.capacity() });
        }

        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = tmp_path(path);

        let result = (|| -> Result<()> {
            let file = File::create(&tmp)?;
            let mut writer = npy::write_archive(BufWriter::new(file), self.features(), self.ids())?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
            Ok(())
        })();

        match result {
            Ok(()) => {
                fs::rename(&tmp, path)?;
                info!("特征已保存到 {}", path.display());
                Ok(())
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                Err(e)
            }
        }
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// 已保存的特征文件，供下游按标识符查找特征
pub struct FeatureArchive {
    features: Array4<F16>,
    ids: Array1<i32>,
    rows: HashMap<i32, usize>,
}

impl FeatureArchive {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let (features, ids) = npy::read_archive(BufReader::new(file))?;
        if features.len_of(Axis(0)) != ids.len() {
            return Err(Error::InvalidArchive(format!(
                "features 有 {} 行，但 ids 有 {} 个",
                features.len_of(Axis(0)),
                ids.len()
            )));
        }
        // 标识符重复时保留第一次出现的位置
        let mut rows = HashMap::with_capacity(ids.len());
        for (row, &id) in ids.iter().enumerate() {
            rows.entry(id).or_insert(row);
        }
        Ok(Self { features, ids, rows })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn feature_shape(&self) -> (usize, usize, usize) {
        let (_, c, h, w) = self.features.dim();
        (c, h, w)
    }

    pub fn ids(&self) -> ArrayView1<i32> {
        self.ids.view()
    }

    pub fn features(&self) -> ArrayView4<F16> {
        self.features.view()
    }

    /// 标识符所在的行
    pub fn position(&self, id: i32) -> Option<usize> {
        self.rows.get(&id).copied()
    }

    /// 按标识符查找特征
    pub fn get(&self, id: i32) -> Option<ArrayView3<F16>> {
        self.position(id).map(|row| self.features.index_axis(Axis(0), row))
    }
}
