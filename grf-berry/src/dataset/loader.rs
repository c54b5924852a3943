//! 批数据加载器.
//!
//! 提供迭代器风格的按批获取模式. 每个样本的随机数生成器由 `(seed, epoch, index)`
//! 唯一决定, 因此结果与线程调度无关.

use super::train_set::stack_samples;
use super::{DatasetError, Sample, TrainDataset};
use ndarray::Array4;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::path::PathBuf;

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
    }
}

/// 一批样本.
#[derive(Clone, Debug)]
pub struct Batch {
    /// `(B, 4, S, S)`.
    pub images: Array4<f32>,
    /// `(B, 1, S, S)`.
    pub masks: Array4<f32>,
    /// 各样本的标签文件路径.
    pub names: Vec<PathBuf>,
}

impl Batch {
    /// 批大小.
    #[inline]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// 是否为空批? 加载器从不产生空批.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// SplitMix64 的一步混合.
#[inline]
fn mix(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// 由 `(seed, epoch, index)` 派生单个样本的随机种子.
pub fn sample_seed(seed: u64, epoch: usize, index: usize) -> u64 {
    mix(mix(mix(seed) ^ epoch as u64) ^ index as u64)
}

/// 第 `epoch` 轮的样本顺序. `shuffle` 为假时按索引序.
pub fn epoch_order(len: usize, seed: u64, epoch: usize, shuffle: bool) -> Vec<usize> {
    let mut order: Vec<usize> = (0..len).collect();
    if shuffle {
        let mut rng = ChaCha8Rng::seed_from_u64(mix(seed) ^ epoch as u64);
        order.shuffle(&mut rng);
    }
    order
}

/// 读取 `indices` 对应的样本. 打开 `rayon` feature 时并行读取, 输出顺序与 `indices` 一致.
pub fn load_samples(
    dataset: &TrainDataset,
    indices: &[usize],
    seed: u64,
    epoch: usize,
) -> Result<Vec<Sample>, DatasetError> {
    let load = |&i: &usize| {
        let mut rng = ChaCha8Rng::seed_from_u64(sample_seed(seed, epoch, i));
        dataset.get(i, &mut rng)
    };
    cfg_if::cfg_if! {
        if #[cfg(feature = "rayon")] {
            indices.par_iter().map(load).collect()
        } else {
            indices.iter().map(load).collect()
        }
    }
}

/// 从数据集创建第 `epoch` 轮的批加载器.
///
/// # 注意
///
/// `batch_size` 必须为正数, 否则程序 panic. 最后一批可能不满.
pub fn batch_loader(
    dataset: &TrainDataset,
    batch_size: usize,
    shuffle: bool,
    seed: u64,
    epoch: usize,
) -> BatchLoader<'_> {
    assert!(batch_size > 0, "batch_size 必须为正数");
    let order = epoch_order(dataset.len(), seed, epoch, shuffle);
    let mut batches_rev: Vec<Vec<usize>> = order.chunks(batch_size).map(<[usize]>::to_vec).collect();
    batches_rev.reverse();
    BatchLoader {
        dataset,
        seed,
        epoch,
        batches_rev,
    }
}

/// 批数据加载器.
#[derive(Debug)]
pub struct BatchLoader<'a> {
    dataset: &'a TrainDataset,
    seed: u64,
    epoch: usize,
    batches_rev: Vec<Vec<usize>>,
}

impl Iterator for BatchLoader<'_> {
    type Item = Result<Batch, DatasetError>;

    fn next(&mut self) -> Option<Self::Item> {
        let indices = self.batches_rev.pop()?;
        let batch = load_samples(self.dataset, &indices, self.seed, self.epoch).map(|samples| {
            let (images, masks) = stack_samples(&samples);
            Batch {
                images,
                masks,
                names: samples.into_iter().map(|s| s.name).collect(),
            }
        });
        Some(batch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.len(), Some(self.len()))
    }
}

impl ExactSizeIterator for BatchLoader<'_> {
    #[inline]
    fn len(&self) -> usize {
        self.batches_rev.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_order() {
        assert_eq!(epoch_order(5, 1, 0, false), vec![0, 1, 2, 3, 4]);
        let a = epoch_order(50, 1, 3, true);
        assert_eq!(a, epoch_order(50, 1, 3, true));
        assert_ne!(a, epoch_order(50, 1, 4, true));
        let mut sorted = a.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_sample_seed_distinct() {
        let s = sample_seed(7, 0, 0);
        assert_eq!(s, sample_seed(7, 0, 0));
        assert_ne!(s, sample_seed(7, 0, 1));
        assert_ne!(s, sample_seed(7, 1, 0));
        assert_ne!(s, sample_seed(8, 0, 0));
    }
}
