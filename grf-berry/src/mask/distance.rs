//! L1 (城市街区) 距离变换.

use crate::imgproc::GrayArray;
use crate::Predicate;
use ndarray::Array2;

/// 计算每个前景像素到最近背景像素的 L1 距离; 背景像素的距离为 0.
///
/// 使用 4-邻域两遍扫描, 结果为精确 L1 距离. 若图像中没有背景像素,
/// 则所有像素的距离都是 `h + w`.
pub fn distance_l1(mask: &GrayArray, is_foreground: Predicate) -> Array2<f32> {
    let (h, w) = mask.dim();
    let far = (h + w) as f32;
    let mut d = mask.mapv(|p| if is_foreground(p) { far } else { 0.0 });

    for y in 0..h {
        for x in 0..w {
            let mut v = d[(y, x)];
            if y > 0 {
                v = v.min(d[(y - 1, x)] + 1.0);
            }
            if x > 0 {
                v = v.min(d[(y, x - 1)] + 1.0);
            }
            d[(y, x)] = v;
        }
    }
    for y in (0..h).rev() {
        for x in (0..w).rev() {
            let mut v = d[(y, x)];
            if y + 1 < h {
                v = v.min(d[(y + 1, x)] + 1.0);
            }
            if x + 1 < w {
                v = v.min(d[(y, x + 1)] + 1.0);
            }
            d[(y, x)] = v;
        }
    }
    d.mapv_inplace(|v| v.min(far));
    d
}

/// 带符号距离: 非零像素到零像素的距离, 减去非 255 像素到 255 像素的距离.
///
/// 对二值标签而言, 前景内部为正, 背景为负, 边界附近接近 0.
pub fn signed_distance(mask: &GrayArray) -> Array2<f32> {
    let inside = distance_l1(mask, |p| p != 0);
    let outside = distance_l1(mask, |p| p != u8::MAX);
    inside - outside
}
