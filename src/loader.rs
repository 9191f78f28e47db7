use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, bounded};
use log::debug;
use ndarray::{Array4, Axis};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::corpus::{ImageCorpus, ImageRecord};
use crate::error::{Error, Result};
use crate::transform::Transform;

/// 一个批次的图片
#[derive(Debug)]
pub struct Batch {
    /// 第几个批次
    pub index: usize,
    /// 批次第一张图片在整个图片集中的位置
    pub offset: usize,
    pub ids: Vec<String>,
    /// (N, 3, S, S)
    pub images: Array4<f32>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// 按图片集顺序产出批次的加载器
///
/// 后台线程在独立的线程池中并行解码每个批次的图片，通过有界队列交给调用方。
/// 批次内和批次间的顺序都与图片集一致，除最后一个批次外每个批次都是 `batch_size` 张。
/// 出错后后台线程会停止，错误作为最后一项返回。
pub struct BatchLoader {
    rx: Option<Receiver<Result<Batch>>>,
    handle: Option<JoinHandle<()>>,
    num_batches: usize,
}

impl BatchLoader {
    pub fn spawn(
        corpus: &ImageCorpus,
        transform: Transform,
        batch_size: usize,
        workers: usize,
        prefetch: usize,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::InvalidConfig("批次大小必须大于 0".into()));
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("decode-{i}"))
            .build()?;

        let records = corpus.records().to_vec();
        let num_batches = records.len().div_ceil(batch_size);

        // NOTE: 队列长度限制了已解码但未推理的批次数量，从而限制内存占用
        let (tx, rx) = bounded(prefetch.max(1));
        let handle = thread::Builder::new().name("batch-loader".into()).spawn(move || {
            let mut offset = 0;
            for (index, chunk) in records.chunks(batch_size).enumerate() {
                let batch = load_batch(&pool, index, offset, chunk, &transform);
                offset += chunk.len();
                let failed = batch.is_err();
                // 接收端已经关闭，或者出错后都不再继续
                if tx.send(batch).is_err() || failed {
                    break;
                }
            }
        })?;

        Ok(Self { rx: Some(rx), handle: Some(handle), num_batches })
    }

    pub fn num_batches(&self) -> usize {
        self.num_batches
    }
}

fn load_batch(
    pool: &ThreadPool,
    index: usize,
    offset: usize,
    records: &[ImageRecord],
    transform: &Transform,
) -> Result<Batch> {
    // 有序的并行迭代器，collect 后顺序与 records 一致
    let tensors = pool.install(|| {
        records.par_iter().map(|r| transform.load(&r.path)).collect::<Result<Vec<_>>>()
    })?;
    let views = tensors.iter().map(|t| t.view()).collect::<Vec<_>>();
    let images = ndarray::stack(Axis(0), &views)?;
    let ids = records.iter().map(|r| r.id.clone()).collect();
    debug!("批次 {} 解码完成: [{}, {})", index, offset, offset + records.len());
    Ok(Batch { index, offset, ids, images })
}

impl Iterator for BatchLoader {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rx.as_ref()?.recv().ok()
    }
}

impl Drop for BatchLoader {
    fn drop(&mut self) {
        // 先关闭接收端，阻塞在 send 上的后台线程才能退出
        drop(self.rx.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use image::{Rgb, RgbImage};
    use rstest::*;
    use tempfile::TempDir;

    use super::*;

    fn write_images(dir: &Path, n: usize) {
        for i in 0..n {
            let image = RgbImage::from_pixel(8, 8, Rgb([i as u8, 0, 0]));
            image.save(dir.join(format!("{i:03}.png"))).unwrap();
        }
    }

    fn corpus(dir: &Path) -> ImageCorpus {
        ImageCorpus::scan(dir, &["png".to_string()]).unwrap()
    }

    #[rstest]
    #[case::exact(8, 4, vec![4, 4])]
    #[case::remainder(65, 64, vec![64, 1])]
    #[case::single_batch(2, 64, vec![2])]
    #[case::one_per_batch(3, 1, vec![1, 1, 1])]
    fn batch_sizes(#[case] n: usize, #[case] batch_size: usize, #[case] expected: Vec<usize>) {
        let dir = TempDir::new().unwrap();
        write_images(dir.path(), n);

        let loader = BatchLoader::spawn(&corpus(dir.path()), Transform::new(8, 1.), batch_size, 3, 2)
            .unwrap();
        assert_eq!(loader.num_batches(), expected.len());

        let batches = loader.collect::<Result<Vec<_>>>().unwrap();
        let sizes = batches.iter().map(Batch::len).collect::<Vec<_>>();
        assert_eq!(sizes, expected);

        let mut offset = 0;
        for (index, batch) in batches.iter().enumerate() {
            assert_eq!(batch.index, index);
            assert_eq!(batch.offset, offset);
            assert_eq!(batch.images.dim(), (batch.len(), 3, 8, 8));
            offset += batch.len();
        }
    }

    #[test]
    fn preserves_corpus_order() {
        let dir = TempDir::new().unwrap();
        write_images(dir.path(), 20);
        let corpus = corpus(dir.path());

        let loader = BatchLoader::spawn(&corpus, Transform::new(8, 1.), 3, 4, 1).unwrap();
        let ids = loader.flat_map(|batch| batch.unwrap().ids).collect::<Vec<_>>();
        assert_eq!(ids, corpus.ids().collect::<Vec<_>>());
    }

    #[test]
    fn error_stops_loading() {
        let dir = TempDir::new().unwrap();
        write_images(dir.path(), 6);
        fs::write(dir.path().join("002.png"), b"broken").unwrap();

        let loader = BatchLoader::spawn(&corpus(dir.path()), Transform::new(8, 1.), 2, 2, 4).unwrap();
        let results = loader.collect::<Vec<_>>();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(Error::ImageDecode { .. })));
    }

    #[test]
    fn early_drop_does_not_hang() {
        let dir = TempDir::new().unwrap();
        write_images(dir.path(), 10);

        let mut loader = BatchLoader::spawn(&corpus(dir.path()), Transform::new(8, 1.), 1, 1, 1).unwrap();
        assert!(loader.next().unwrap().is_ok());
        drop(loader);
    }
}
