//! Epoch iteration over the training split.
//!
//! Sample order is drawn from a seeded ChaCha8 stream so a run is
//! reproducible. Audio for one batch is decoded on the rayon pool; each
//! worker writes only its own sample.

use candle_core::Device;
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use super::collate::{BatchCollator, CollatedSample, TrainBatch};
use super::index::TrainIndex;
use crate::audio::AudioFrameAdapter;
use crate::{Error, Result};

/// Batching options for [`TrainLoader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderOptions {
    pub batch_size: usize,
    pub shuffle: bool,
    pub drop_last: bool,
    pub seed: u64,
    /// Dedicated loader threads; `None` uses the global rayon pool.
    pub workers: Option<usize>,
}

/// Yields collated training batches, one epoch at a time.
pub struct TrainLoader {
    index: TrainIndex,
    adapter: AudioFrameAdapter,
    collator: BatchCollator,
    options: LoaderOptions,
    rng: ChaCha8Rng,
    pool: Option<rayon::ThreadPool>,
}

impl TrainLoader {
    pub fn new(
        index: TrainIndex,
        adapter: AudioFrameAdapter,
        prefix_length: usize,
        options: LoaderOptions,
    ) -> Result<Self> {
        if options.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".into()));
        }
        let pool = match options.workers {
            Some(n) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .map_err(|e| Error::Config(format!("loader thread pool: {e}")))?,
            ),
            None => None,
        };
        let collator = BatchCollator::new(index.max_seq_len(), prefix_length);
        Ok(Self {
            index,
            adapter,
            collator,
            options,
            rng: ChaCha8Rng::seed_from_u64(options.seed),
            pool,
        })
    }

    pub fn index(&self) -> &TrainIndex {
        &self.index
    }

    pub fn collator(&self) -> &BatchCollator {
        &self.collator
    }

    /// Optimizer steps per epoch.
    pub fn num_batches(&self) -> usize {
        let n = self.index.len();
        let b = self.options.batch_size;
        if self.options.drop_last { n / b } else { n.div_ceil(b) }
    }

    /// Sample indices of every batch in the next epoch.
    pub fn epoch_batches(&mut self) -> Vec<Vec<usize>> {
        let mut order: Vec<usize> = (0..self.index.len()).collect();
        if self.options.shuffle {
            order.shuffle(&mut self.rng);
        }
        let mut batches: Vec<Vec<usize>> = order
            .chunks(self.options.batch_size)
            .map(<[usize]>::to_vec)
            .collect();
        if self.options.drop_last
            && batches
                .last()
                .is_some_and(|b| b.len() < self.options.batch_size)
        {
            batches.pop();
        }
        batches
    }

    /// Load audio for `indices` in parallel and stack the batch.
    pub fn load_batch(&self, indices: &[usize], device: &Device) -> Result<TrainBatch> {
        let load = || {
            indices
                .par_iter()
                .map(|&i| self.load_sample(i))
                .collect::<Result<Vec<_>>>()
        };
        let samples = match &self.pool {
            Some(pool) => pool.install(load)?,
            None => load()?,
        };
        self.collator.collate(samples, device)
    }

    fn load_sample(&self, i: usize) -> Result<CollatedSample> {
        let sample = self
            .index
            .samples()
            .get(i)
            .ok_or_else(|| Error::Dataset(format!("sample index {i} out of range")))?;
        let audio = self.adapter.load(&sample.audio_path).map_err(|e| {
            Error::Dataset(format!("{}: {e}", sample.audio_path.display()))
        })?;
        Ok(CollatedSample {
            file_name: sample.file_name.clone(),
            audio,
            captions: self.collator.pad_tokens(&sample.tokens),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::write_wav;
    use crate::dataset::index::TrainSample;

    fn index_with(dir: &std::path::Path, n: usize) -> TrainIndex {
        let samples = (0..n)
            .map(|i| {
                let audio_path = dir.join(format!("{i}.wav"));
                write_wav(&audio_path, &vec![i as f32 / 10.0; 400], 8_000, 1).unwrap();
                TrainSample {
                    file_name: format!("{i}.wav"),
                    audio_path,
                    tokens: std::array::from_fn(|j| vec![1 + j as u32, 13]),
                }
            })
            .collect();
        TrainIndex::from_samples(samples)
    }

    fn options(batch_size: usize, shuffle: bool, drop_last: bool) -> LoaderOptions {
        LoaderOptions {
            batch_size,
            shuffle,
            drop_last,
            seed: 2766,
            workers: Some(2),
        }
    }

    #[test]
    fn drop_last_discards_partial_batch() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = AudioFrameAdapter::new(8_000, 0.1);
        let mut loader =
            TrainLoader::new(index_with(dir.path(), 7), adapter, 2, options(3, false, true))
                .unwrap();
        assert_eq!(loader.num_batches(), 2);
        assert_eq!(loader.epoch_batches(), vec![vec![0, 1, 2], vec![3, 4, 5]]);

        let mut keep =
            TrainLoader::new(index_with(dir.path(), 7), adapter, 2, options(3, false, false))
                .unwrap();
        assert_eq!(keep.num_batches(), 3);
        assert_eq!(keep.epoch_batches().last().unwrap(), &vec![6]);
    }

    #[test]
    fn shuffle_is_seeded_and_covers_every_sample() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = AudioFrameAdapter::new(8_000, 0.1);
        let make = || {
            TrainLoader::new(index_with(dir.path(), 10), adapter, 2, options(5, true, true))
                .unwrap()
        };
        let (mut a, mut b) = (make(), make());
        let first = a.epoch_batches();
        assert_eq!(first, b.epoch_batches());
        let mut seen: Vec<usize> = first.concat();
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn load_batch_produces_fixed_shapes() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = AudioFrameAdapter::new(8_000, 0.1);
        let loader =
            TrainLoader::new(index_with(dir.path(), 4), adapter, 3, options(2, false, true))
                .unwrap();
        let batch = loader.load_batch(&[2, 3], &Device::Cpu).unwrap();
        assert_eq!(batch.file_names, vec!["2.wav", "3.wav"]);
        assert_eq!(batch.audio.dims(), &[2, 800]);
        assert_eq!(batch.tokens.dims(), &[10, 2]);
        assert_eq!(batch.attention_mask.dims(), &[10, 5]);
        let rows: Vec<Vec<u32>> = batch.tokens.to_vec2().unwrap();
        assert_eq!(rows[0], vec![1, 13]);
        assert_eq!(rows[9], vec![5, 13]);
    }

    #[test]
    fn missing_audio_fails_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let index = index_with(dir.path(), 2);
        std::fs::remove_file(dir.path().join("1.wav")).unwrap();
        let loader = TrainLoader::new(
            index,
            AudioFrameAdapter::new(8_000, 0.1),
            1,
            options(2, false, true),
        )
        .unwrap();
        assert!(loader.load_batch(&[0, 1], &Device::Cpu).is_err());
    }
}
