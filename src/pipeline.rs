use std::time::{Duration, Instant};

use indicatif::ProgressBar;
use log::{debug, info};

use crate::config::ExtractConfig;
use crate::corpus::ImageCorpus;
use crate::error::{Error, Result};
use crate::extractor::{Backbone, FeatureExtractor, first_non_finite};
use crate::loader::{Batch, BatchLoader};
use crate::store::FeatureStore;
use crate::transform::Transform;
use crate::utils::pb_style;

/// 一次特征提取的统计
#[derive(Debug, Clone)]
pub struct Summary {
    pub images: usize,
    pub batches: usize,
    pub elapsed: Duration,
}

/// 特征提取流程
///
/// [`Pipeline::prepare`] 扫描图片、检查标识符并分配存储，这些检查都在加载模型之前完成；
/// [`Pipeline::run`] 按顺序处理每个批次，最后一次性写出特征文件。任何一步出错都不会产生输出。
pub struct Pipeline {
    config: ExtractConfig,
    corpus: ImageCorpus,
    /// 与 `corpus` 一一对应的整数标识符
    ids: Vec<i32>,
    store: FeatureStore,
}

impl Pipeline {
    pub fn prepare(config: ExtractConfig) -> Result<Self> {
        config.validate()?;
        let corpus = ImageCorpus::scan(&config.images, &config.suffixes)?;
        let ids = corpus.numeric_ids()?;
        let store = FeatureStore::allocate(corpus.len(), config.feature_shape())?;
        Ok(Self { config, corpus, ids, store })
    }

    pub fn corpus(&self) -> &ImageCorpus {
        &self.corpus
    }

    pub fn run<B: Backbone>(self, backbone: B) -> Result<Summary> {
        let start = Instant::now();
        let Self { config, corpus, ids: numeric_ids, mut store } = self;

        let transform = Transform::new(config.image_size, config.central_fraction);
        let loader = BatchLoader::spawn(
            &corpus,
            transform,
            config.batch_size,
            config.worker_threads(),
            config.prefetch,
        )?;
        info!(
            "开始提取 {} 中的 {} 张图片，共 {} 个批次",
            corpus.root().display(),
            corpus.len(),
            loader.num_batches()
        );

        let mut extractor = FeatureExtractor::new(backbone, config.feature_shape());
        let pb = if config.progress {
            ProgressBar::new(corpus.len() as u64).with_style(pb_style())
        } else {
            ProgressBar::hidden()
        };

        let mut batches = 0;
        for batch in loader {
            let Batch { index, offset, ids, images } = batch?;
            let t = Instant::now();
            let features = extractor.extract(images)?;
            if config.check_finite {
                if let Some(row) = first_non_finite(features.view()) {
                    return Err(Error::NonFiniteFeatures { row: offset + row, id: ids[row].clone() });
                }
            }

            let numeric = numeric_ids.get(offset..offset + ids.len()).ok_or(Error::OutOfBounds {
                offset,
                len: ids.len(),
                capacity: numeric_ids.len(),
            })?;
            store.write_batch(offset, numeric, features.view())?;

            debug!("批次 {} 推理耗时 {:.2?}", index, t.elapsed());
            pb.inc(ids.len() as u64);
            batches += 1;
        }
        pb.finish_with_message("特征提取完成");

        store.persist(&config.output)?;

        let summary = Summary { images: corpus.len(), batches, elapsed: start.elapsed() };
        info!("共处理 {} 张图片，{} 个批次，耗时 {:.2?}", summary.images, summary.batches, summary.elapsed);
        Ok(summary)
    }
}
