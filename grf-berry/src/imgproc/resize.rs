//! 图像缩放.
//!
//! 8-bit 图像直接交给 [`image::imageops::resize`]: 连续取值的图像使用
//! [`FilterType::Triangle`], 标签使用 [`FilterType::Nearest`].
//!
//! `f32` 张量 (多尺度训练) 另行实现双线性插值, 采用像素中心对齐 (`align_corners = false`) 的
//! 坐标映射 `src = (dst + 0.5) * scale - 0.5`, 越界坐标截断到边缘.

use super::{from_gray_image, from_rgb_image, to_gray_image, to_rgb_image, GrayArray, RgbArray};
use image::imageops::{self, FilterType};
use ndarray::{Array2, Array4, ArrayView2, ArrayView4};

/// 一维双线性插值的采样表: 对每个目标坐标给出 `(低位索引, 高位索引, 高位权重)`.
fn linear_taps(src_len: usize, dst_len: usize) -> Vec<(usize, usize, f32)> {
    let scale = src_len as f32 / dst_len as f32;
    let last = src_len.saturating_sub(1);
    (0..dst_len)
        .map(|d| {
            let s = ((d as f32 + 0.5) * scale - 0.5).max(0.0);
            let lo = (s.floor() as usize).min(last);
            let hi = (lo + 1).min(last);
            (lo, hi, s - lo as f32)
        })
        .collect()
}

/// 将 `f32` 平面双线性缩放到 `(h, w)`.
///
/// `src` 为空或 `h`/`w` 为 0 时 panic.
pub fn bilinear_plane(src: ArrayView2<f32>, (h, w): (usize, usize)) -> Array2<f32> {
    let (sh, sw) = src.dim();
    assert!(sh > 0 && sw > 0 && h > 0 && w > 0, "缩放尺寸不能为 0");
    let ys = linear_taps(sh, h);
    let xs = linear_taps(sw, w);
    Array2::from_shape_fn((h, w), |(y, x)| {
        let (y0, y1, fy) = ys[y];
        let (x0, x1, fx) = xs[x];
        let top = src[(y0, x0)] * (1.0 - fx) + src[(y0, x1)] * fx;
        let bottom = src[(y1, x0)] * (1.0 - fx) + src[(y1, x1)] * fx;
        top * (1.0 - fy) + bottom * fy
    })
}

/// 将 RGB 图像双线性缩放到 `(h, w)`.
pub fn resize_rgb(src: &RgbArray, (h, w): (usize, usize)) -> RgbArray {
    let img = to_rgb_image(src.view());
    from_rgb_image(imageops::resize(&img, w as u32, h as u32, FilterType::Triangle))
}

/// 将灰度图像双线性缩放到 `(h, w)`. 用于 GRF 等连续取值的图像.
pub fn resize_gray_linear(src: &GrayArray, (h, w): (usize, usize)) -> GrayArray {
    let img = to_gray_image(src.view());
    from_gray_image(imageops::resize(&img, w as u32, h as u32, FilterType::Triangle))
}

/// 将灰度图像最近邻缩放到 `(h, w)`. 用于标签, 保证不会产生新的像素值.
pub fn resize_gray_nearest(src: &GrayArray, (h, w): (usize, usize)) -> GrayArray {
    let img = to_gray_image(src.view());
    from_gray_image(imageops::resize(&img, w as u32, h as u32, FilterType::Nearest))
}

/// 将 `(N, C, H, W)` 批量张量的每个平面双线性缩放到 `(h, w)`.
pub fn bilinear_batch(src: ArrayView4<f32>, (h, w): (usize, usize)) -> Array4<f32> {
    let (n, c, sh, sw) = src.dim();
    if (sh, sw) == (h, w) {
        return src.to_owned();
    }
    let mut out = Array4::zeros((n, c, h, w));
    for (src_n, mut out_n) in src.outer_iter().zip(out.outer_iter_mut()) {
        for (plane, mut dst) in src_n.outer_iter().zip(out_n.outer_iter_mut()) {
            dst.assign(&bilinear_plane(plane, (h, w)));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, s, Array};

    #[test]
    fn test_identity_resize() {
        let a = Array::from_shape_fn((6, 9), |(h, w)| (h * 9 + w) as f32);
        let b = bilinear_plane(a.view(), (6, 9));
        assert_eq!(a, b);

        let g = a.mapv(|v| v as u8);
        assert_eq!(resize_gray_nearest(&g, (6, 9)), g);
    }

    #[test]
    fn test_upsample_constant_and_ramp() {
        let a = Array2::from_elem((3, 3), 7.0f32);
        assert!(bilinear_plane(a.view(), (10, 4)).iter().all(|&v| (v - 7.0).abs() < 1e-6));

        // 2 -> 4: 中心对齐映射为 [-0.25, 0.25, 0.75, 1.25], 两端截断.
        let ramp = array![[0.0f32, 4.0]];
        let up = bilinear_plane(ramp.view(), (1, 4));
        assert_eq!(up, array![[0.0, 1.0, 3.0, 4.0]]);
    }

    #[test]
    fn test_nearest_keeps_labels() {
        let m = array![[0u8, 255], [255, 0]];
        let up = resize_gray_nearest(&m, (4, 4));
        assert!(up.iter().all(|&v| v == 0 || v == 255));
        assert_eq!(up[(0, 0)], 0);
        assert_eq!(up[(0, 3)], 255);
        assert_eq!(up[(3, 0)], 255);

        let labels = Array::from_shape_fn((9, 7), |(h, w)| [0u8, 1, 2][(h + 2 * w) % 3]);
        let down = resize_gray_nearest(&labels, (4, 5));
        assert_eq!(down.dim(), (4, 5));
        assert!(down.iter().all(|&v| v <= 2));
    }

    #[test]
    fn test_u8_resize() {
        let rgb = Array::from_shape_fn((1, 2, 3), |(_, w, _)| (w * 40) as u8);
        let up = resize_rgb(&rgb, (1, 4));
        assert_eq!(up.dim(), (1, 4, 3));
        for c in 0..3 {
            assert_eq!(up.slice(s![0, .., c]).to_vec(), vec![0, 10, 30, 40]);
        }
        assert_eq!(resize_rgb(&rgb, (1, 2)), rgb);

        let g = Array2::from_elem((6, 10), 77u8);
        let small = resize_gray_linear(&g, (3, 4));
        assert_eq!(small.dim(), (3, 4));
        assert!(small.iter().all(|&v| v == 77));
    }

    #[test]
    fn test_batch_shape() {
        let x = Array4::<f32>::ones((2, 4, 8, 8));
        let y = bilinear_batch(x.view(), (5, 3));
        assert_eq!(y.dim(), (2, 4, 5, 3));
        assert!(y.iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }
}
