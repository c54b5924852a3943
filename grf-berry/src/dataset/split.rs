//! 训练集/验证集划分.
//!
//! 划分的唯一随机来源是 `seed`: 相同的 `(n, seed, Partition)` 永远得到相同结果.
//! 随机排列由 `ChaCha8Rng` 生成, 其输出跨平台、跨版本稳定.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// 划分方式.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Partition {
    /// 简单留出法. `ratio` 为训练集比例, 验证集取随机排列的前 `round(n * (1 - ratio))` 个.
    HoldOut {
        /// 训练集比例, 必须位于 `[0, 1]`.
        ratio: f64,
    },

    /// k 折交叉验证. 验证集取随机排列中第 `k` 个长度为 `n / k_fold` 的连续块.
    KFold {
        /// 当前折序号, `0 <= k < k_fold`.
        k: usize,
        /// 总折数, `k_fold >= 2`.
        k_fold: usize,
    },
}

impl Partition {
    /// 按照命令行的习惯构造: `k_fold == 1` 时为留出法, 否则为 k 折.
    pub fn new(ratio: f64, k: usize, k_fold: usize) -> Result<Self, SplitError> {
        if k_fold == 0 {
            return Err(SplitError::ZeroFolds);
        }
        if k_fold == 1 {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(SplitError::RatioOutOfRange(ratio));
            }
            Ok(Self::HoldOut { ratio })
        } else if k >= k_fold {
            Err(SplitError::FoldOutOfRange { k, k_fold })
        } else {
            Ok(Self::KFold { k, k_fold })
        }
    }
}

/// 划分参数错误.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SplitError {
    /// 训练集比例不在 `[0, 1]` 中.
    #[error("train ratio {0} is out of [0, 1]")]
    RatioOutOfRange(f64),

    /// 折数为 0.
    #[error("k_fold must be at least 1")]
    ZeroFolds,

    /// 折序号越界.
    #[error("fold {k} is out of range for {k_fold}-fold cross validation")]
    FoldOutOfRange {
        /// 折序号.
        k: usize,
        /// 总折数.
        k_fold: usize,
    },
}

/// 由 `seed` 生成 `0..n` 的随机排列.
pub fn permutation(n: usize, seed: u64) -> Vec<usize> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut perm: Vec<usize> = (0..n).collect();
    perm.shuffle(&mut rng);
    perm
}

/// 将 `0..n` 划分为 `(训练集索引, 验证集索引)`.
///
/// 训练集索引按升序排列; 验证集索引保持随机排列中的顺序.
/// 二者不相交, 且并集恰为 `0..n` (k 折时未被任何一折选中的尾部索引全部归入训练集).
pub fn split(n: usize, seed: u64, partition: Partition) -> (Vec<usize>, Vec<usize>) {
    let perm = permutation(n, seed);
    let val: Vec<usize> = match partition {
        Partition::HoldOut { ratio } => {
            let len = ((n as f64) * (1.0 - ratio)).round() as usize;
            perm[..len.min(n)].to_vec()
        }
        Partition::KFold { k, k_fold } => {
            let block = n / k_fold;
            let from = (block * k).min(n);
            let to = (block * (k + 1)).min(n);
            perm[from..to].to_vec()
        }
    };

    let mut is_val = vec![false; n];
    val.iter().for_each(|&i| is_val[i] = true);
    let train = (0..n).filter(|&i| !is_val[i]).collect();
    (train, val)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn assert_partition(n: usize, train: &[usize], val: &[usize]) {
        let t: HashSet<_> = train.iter().copied().collect();
        let v: HashSet<_> = val.iter().copied().collect();
        assert_eq!(t.len(), train.len());
        assert_eq!(v.len(), val.len());
        assert!(t.is_disjoint(&v));
        assert_eq!(t.len() + v.len(), n);
        assert!(t.union(&v).all(|&i| i < n));
    }

    #[test]
    fn test_hold_out_is_reproducible() {
        let p = Partition::new(0.8, 0, 1).unwrap();
        let a = split(103, 7414, p);
        let b = split(103, 7414, p);
        assert_eq!(a, b);
        // round(103 * 0.2) = 21
        assert_eq!(a.1.len(), 21);
        assert_partition(103, &a.0, &a.1);
        assert!(a.0.windows(2).all(|w| w[0] < w[1]));

        let c = split(103, 7415, p);
        assert_ne!(a.1, c.1);
    }

    #[test]
    fn test_hold_out_extremes() {
        let (train, val) = split(10, 1, Partition::HoldOut { ratio: 1.0 });
        assert_eq!(train.len(), 10);
        assert!(val.is_empty());

        let (train, val) = split(10, 1, Partition::HoldOut { ratio: 0.0 });
        assert!(train.is_empty());
        assert_eq!(val.len(), 10);

        let (train, val) = split(0, 1, Partition::HoldOut { ratio: 0.5 });
        assert!(train.is_empty() && val.is_empty());
    }

    #[test]
    fn test_k_fold_blocks() {
        let (n, k_fold) = (23, 5);
        let mut seen = HashSet::new();
        for k in 0..k_fold {
            let (train, val) = split(n, 42, Partition::new(0.8, k, k_fold).unwrap());
            assert_partition(n, &train, &val);
            assert_eq!(val.len(), n / k_fold);
            for i in val {
                // 任意两折的验证集不相交.
                assert!(seen.insert(i));
            }
        }
        // 仅剩 n mod k_fold 个索引从未作为验证集.
        assert_eq!(seen.len(), n - n % k_fold);
    }

    #[test]
    fn test_partition_validation() {
        assert_eq!(Partition::new(1.5, 0, 1), Err(SplitError::RatioOutOfRange(1.5)));
        assert_eq!(Partition::new(0.8, 0, 0), Err(SplitError::ZeroFolds));
        assert_eq!(
            Partition::new(0.8, 5, 5),
            Err(SplitError::FoldOutOfRange { k: 5, k_fold: 5 })
        );
        assert_eq!(
            Partition::new(0.3, 2, 5),
            Ok(Partition::KFold { k: 2, k_fold: 5 })
        );
    }

    #[test]
    fn test_permutation_is_permutation() {
        let mut p = permutation(50, 9);
        p.sort_unstable();
        assert_eq!(p, (0..50).collect::<Vec<_>>());
    }
}
