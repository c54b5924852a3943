//! 灰度中位切分量化.

use crate::imgproc::GrayArray;

/// 一个灰度区间 `[lo, hi]`.
#[derive(Copy, Clone, Debug)]
struct Bucket {
    lo: u8,
    hi: u8,
}

impl Bucket {
    fn count(&self, hist: &[u64; 256]) -> u64 {
        hist[self.lo as usize..=self.hi as usize].iter().sum()
    }

    /// 在像素数的中位数处切分. 区间内只有一个灰度级有像素时返回 `None`.
    fn split(&self, hist: &[u64; 256]) -> Option<(Bucket, Bucket)> {
        let occupied: Vec<u8> = (self.lo..=self.hi).filter(|&v| hist[v as usize] > 0).collect();
        if occupied.len() < 2 {
            return None;
        }
        let total = self.count(hist);
        let (mut acc, mut cut) = (0, occupied[0]);
        // 切分点不能是最后一个有像素的灰度级, 保证两侧都非空.
        for &v in &occupied[..occupied.len() - 1] {
            cut = v;
            acc += hist[v as usize];
            if acc * 2 >= total {
                break;
            }
        }
        Some((
            Bucket { lo: self.lo, hi: cut },
            Bucket { lo: cut + 1, hi: self.hi },
        ))
    }

    /// 以像素数加权的平均灰度.
    fn representative(&self, hist: &[u64; 256]) -> u8 {
        let total = self.count(hist);
        if total == 0 {
            return self.lo;
        }
        let sum: u64 = (self.lo..=self.hi).map(|v| u64::from(v) * hist[v as usize]).sum();
        (sum as f64 / total as f64).round() as u8
    }
}

/// 将灰度图量化到至多 `colors` 个灰度级.
///
/// 反复切分像素最多的区间, 直到区间数达到 `colors` 或无法继续切分.
/// 灰度级数不超过 `colors` 的图像保持不变. `colors == 0` 时程序 panic.
pub fn median_cut(img: &GrayArray, colors: usize) -> GrayArray {
    assert!(colors > 0, "colors 必须为正数");
    let mut hist = [0u64; 256];
    img.iter().for_each(|&p| hist[p as usize] += 1);
    if hist.iter().filter(|&&c| c > 0).count() <= colors {
        return img.clone();
    }

    let mut buckets = vec![Bucket { lo: 0, hi: u8::MAX }];
    let mut frozen = Vec::new();
    while buckets.len() + frozen.len() < colors {
        let Some((i, _)) = buckets
            .iter()
            .enumerate()
            .max_by_key(|(_, b)| b.count(&hist))
        else {
            break;
        };
        let b = buckets.swap_remove(i);
        match b.split(&hist) {
            Some((l, r)) => buckets.extend([l, r]),
            None => frozen.push(b),
        }
    }
    buckets.extend(frozen);

    let mut lut = [0u8; 256];
    for b in buckets.iter() {
        let rep = b.representative(&hist);
        lut[b.lo as usize..=b.hi as usize].fill(rep);
    }
    img.mapv(|p| lut[p as usize])
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;
    use std::collections::HashSet;

    #[test]
    fn test_few_levels_unchanged() {
        let img = Array::from_shape_fn((4, 4), |(h, _)| [0u8, 10, 200, 255][h]);
        assert_eq!(median_cut(&img, 8), img);
    }

    #[test]
    fn test_reduces_levels() {
        let img = Array::from_shape_fn((16, 16), |(h, w)| (h * 16 + w) as u8);
        let q = median_cut(&img, 8);
        let levels: HashSet<u8> = q.iter().copied().collect();
        assert_eq!(levels.len(), 8);

        // 原图按行优先递增, 量化结果也应单调不减.
        let flat: Vec<u8> = q.iter().copied().collect();
        assert!(flat.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_dominant_level_is_split_off() {
        let mut img = Array::from_elem((10, 10), 200u8);
        img[(0, 0)] = 1;
        img[(0, 1)] = 2;
        img[(0, 2)] = 3;
        let q = median_cut(&img, 2);
        assert_eq!(q[(5, 5)], 200);
        assert_eq!(q[(0, 0)], 2);
        assert_eq!(q[(0, 2)], 2);
    }
}
