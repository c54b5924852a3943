//! 几何变换: 填充、裁剪、翻转与仿射.
//!
//! 所有函数同时提供 RGB 与灰度两个版本, 以便对图像与标签施加完全相同的变换.

use super::{from_gray_image, from_rgb_image, saturate_u8, to_gray_image, to_rgb_image, GrayArray, RgbArray};
use crate::Idx2d;
use image::imageops;
use image::{GrayImage, RgbImage};
use ndarray::{s, Array2, Array3, Axis};

/// 正方形边长与左上角偏移 `(side, top, left)`.
fn square_layout((h, w): Idx2d) -> (usize, usize, usize) {
    let side = h.max(w);
    (side, (side - h) / 2, (side - w) / 2)
}

/// 将图像以常数 0 居中填充为正方形, 边长为 `max(h, w)`.
///
/// 上 (左) 侧填充 `(side - h) / 2`, 其余填充在下 (右) 侧.
pub fn pad_square_rgb(img: &RgbArray) -> RgbArray {
    let (h, w, _) = img.dim();
    let (side, top, left) = square_layout((h, w));
    let mut canvas = RgbImage::new(side as u32, side as u32);
    imageops::replace(&mut canvas, &to_rgb_image(img.view()), left as i64, top as i64);
    from_rgb_image(canvas)
}

/// 同 [`pad_square_rgb`], 灰度版本.
pub fn pad_square_gray(img: &GrayArray) -> GrayArray {
    let (side, top, left) = square_layout(img.dim());
    let mut canvas = GrayImage::new(side as u32, side as u32);
    imageops::replace(&mut canvas, &to_gray_image(img.view()), left as i64, top as i64);
    from_gray_image(canvas)
}

/// 裁剪窗口: 左上角 `(top, left)`, 大小 `(h, w)`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CropWindow {
    /// 上边界.
    pub top: usize,
    /// 左边界.
    pub left: usize,
    /// 高.
    pub h: usize,
    /// 宽.
    pub w: usize,
}

impl CropWindow {
    /// 在 `(img_h, img_w)` 的图像中心构造 `(h, w)` 的窗口. 窗口大于图像时返回 `None`.
    pub fn center((img_h, img_w): (usize, usize), (h, w): (usize, usize)) -> Option<Self> {
        (h <= img_h && w <= img_w).then(|| Self {
            top: (img_h - h) / 2,
            left: (img_w - w) / 2,
            h,
            w,
        })
    }

    /// 由随机数 `u, v ∈ [0, 1)` 确定窗口位置. 窗口大于图像时返回 `None`.
    pub fn at_fraction(
        (img_h, img_w): (usize, usize),
        (h, w): (usize, usize),
        (u, v): (f64, f64),
    ) -> Option<Self> {
        if h > img_h || w > img_w {
            return None;
        }
        let top = ((img_h - h + 1) as f64 * u).floor() as usize;
        let left = ((img_w - w + 1) as f64 * v).floor() as usize;
        Some(Self {
            top: top.min(img_h - h),
            left: left.min(img_w - w),
            h,
            w,
        })
    }
}

/// 裁剪 RGB 图像.
pub fn crop_rgb(img: &RgbArray, win: CropWindow) -> RgbArray {
    img.slice(s![win.top..win.top + win.h, win.left..win.left + win.w, ..])
        .to_owned()
}

/// 裁剪灰度图像.
pub fn crop_gray(img: &GrayArray, win: CropWindow) -> GrayArray {
    img.slice(s![win.top..win.top + win.h, win.left..win.left + win.w])
        .to_owned()
}

/// 水平翻转 (沿宽方向镜像).
pub fn hflip_rgb(img: &mut RgbArray) {
    img.invert_axis(Axis(1));
    *img = img.as_standard_layout().into_owned();
}

/// 垂直翻转 (沿高方向镜像).
pub fn vflip_rgb(img: &mut RgbArray) {
    img.invert_axis(Axis(0));
    *img = img.as_standard_layout().into_owned();
}

/// 水平翻转, 灰度版本.
pub fn hflip_gray(img: &mut GrayArray) {
    img.invert_axis(Axis(1));
    *img = img.as_standard_layout().into_owned();
}

/// 垂直翻转, 灰度版本.
pub fn vflip_gray(img: &mut GrayArray) {
    img.invert_axis(Axis(0));
    *img = img.as_standard_layout().into_owned();
}

/// 2×3 仿射矩阵, 将 **源** 坐标 `(x, y)` 映射到 **目标** 坐标.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Affine([[f64; 3]; 2]);

impl Affine {
    /// 以 `(w / 2, h / 2)` 为中心旋转 `angle_deg` 度 (逆时针) 并缩放 `scale`,
    /// 再平移 `(dx * w, dy * h)`.
    pub fn shift_scale_rotate(
        (h, w): (usize, usize),
        angle_deg: f64,
        scale: f64,
        (dx, dy): (f64, f64),
    ) -> Self {
        let (cx, cy) = (w as f64 / 2.0, h as f64 / 2.0);
        let (sin, cos) = angle_deg.to_radians().sin_cos();
        let (a, b) = (scale * cos, scale * sin);
        Self([
            [a, b, (1.0 - a) * cx - b * cy + dx * w as f64],
            [-b, a, b * cx + (1.0 - a) * cy + dy * h as f64],
        ])
    }

    /// 求逆映射. 矩阵奇异时返回 `None`.
    pub fn inverse(&self) -> Option<Self> {
        let [[a, b, c], [d, e, f]] = self.0;
        let det = a * e - b * d;
        if det.abs() < 1e-12 {
            return None;
        }
        let (ia, ib, id, ie) = (e / det, -b / det, -d / det, a / det);
        Some(Self([
            [ia, ib, -(ia * c + ib * f)],
            [id, ie, -(id * c + ie * f)],
        ]))
    }

    /// 应用于点 `(x, y)`.
    #[inline]
    pub fn apply(&self, (x, y): (f64, f64)) -> (f64, f64) {
        let [[a, b, c], [d, e, f]] = self.0;
        (a * x + b * y + c, d * x + e * y + f)
    }
}

/// `reflect-101` 边界: `dcb|abcd|cba`.
#[inline]
fn reflect101(mut i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let n = n as isize;
    loop {
        if i < 0 {
            i = -i;
        } else if i >= n {
            i = 2 * n - 2 - i;
        } else {
            return i as usize;
        }
    }
}

/// 对 RGB 图像施加仿射变换 (`m` 为正向映射), 双线性采样, `reflect-101` 边界.
/// 输出尺寸与输入相同. `m` 不可逆时图像保持不变.
pub fn warp_rgb(img: &RgbArray, m: &Affine) -> RgbArray {
    let Some(inv) = m.inverse() else {
        return img.clone();
    };
    let (h, w, c) = img.dim();
    let mut out = Array3::zeros((h, w, c));
    for y in 0..h {
        for x in 0..w {
            let (sx, sy) = inv.apply((x as f64, y as f64));
            let (x0, y0) = (sx.floor(), sy.floor());
            let (fx, fy) = ((sx - x0) as f32, (sy - y0) as f32);
            let xs = [reflect101(x0 as isize, w), reflect101(x0 as isize + 1, w)];
            let ys = [reflect101(y0 as isize, h), reflect101(y0 as isize + 1, h)];
            for ch in 0..c {
                let p = |yy: usize, xx: usize| f32::from(img[(ys[yy], xs[xx], ch)]);
                let top = p(0, 0) * (1.0 - fx) + p(0, 1) * fx;
                let bottom = p(1, 0) * (1.0 - fx) + p(1, 1) * fx;
                out[(y, x, ch)] = saturate_u8(top * (1.0 - fy) + bottom * fy);
            }
        }
    }
    out
}

/// 对灰度标签施加仿射变换, 最近邻采样, `reflect-101` 边界.
pub fn warp_gray_nearest(img: &GrayArray, m: &Affine) -> GrayArray {
    let Some(inv) = m.inverse() else {
        return img.clone();
    };
    let (h, w) = img.dim();
    Array2::from_shape_fn((h, w), |(y, x)| {
        let (sx, sy) = inv.apply((x as f64, y as f64));
        let xx = reflect101(sx.round() as isize, w);
        let yy = reflect101(sy.round() as isize, h);
        img[(yy, xx)]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array};

    #[test]
    fn test_pad_square() {
        let img = Array3::<u8>::from_elem((2, 6, 3), 9);
        let p = pad_square_rgb(&img);
        assert_eq!(p.dim(), (6, 6, 3));
        // 上侧填充 2 行.
        assert_eq!(p[(0, 0, 0)], 0);
        assert_eq!(p[(1, 5, 2)], 0);
        assert_eq!(p[(2, 0, 0)], 9);
        assert_eq!(p[(3, 5, 1)], 9);
        assert_eq!(p[(4, 0, 0)], 0);

        let g = Array2::<u8>::from_elem((5, 2), 1);
        let pg = pad_square_gray(&g);
        assert_eq!(pg.dim(), (5, 5));
        assert_eq!(pg.sum(), 10);
        assert_eq!(pg.column(1).sum(), 5);
        assert_eq!(pg.column(0).sum(), 0);
    }

    #[test]
    fn test_crop_window() {
        assert_eq!(CropWindow::center((10, 10), (11, 4)), None);
        let c = CropWindow::center((10, 8), (4, 4)).unwrap();
        assert_eq!((c.top, c.left), (3, 2));
        let r = CropWindow::at_fraction((10, 8), (4, 4), (0.999_999, 0.0)).unwrap();
        assert_eq!((r.top, r.left), (6, 0));
    }

    #[test]
    fn test_flips() {
        let mut g = array![[1u8, 2, 3], [4, 5, 6]];
        hflip_gray(&mut g);
        assert_eq!(g, array![[3, 2, 1], [6, 5, 4]]);
        vflip_gray(&mut g);
        assert_eq!(g, array![[6, 5, 4], [3, 2, 1]]);
        assert!(g.is_standard_layout());
    }

    #[test]
    fn test_identity_warp() {
        let img = Array::from_shape_fn((7, 5, 3), |(h, w, c)| (h * 30 + w * 5 + c) as u8);
        let id = Affine::shift_scale_rotate((7, 5), 0.0, 1.0, (0.0, 0.0));
        assert_eq!(warp_rgb(&img, &id), img);

        let g = img.index_axis(Axis(2), 0).to_owned();
        assert_eq!(warp_gray_nearest(&g, &id), g);
    }

    #[test]
    fn test_affine_inverse() {
        let m = Affine::shift_scale_rotate((20, 30), 33.0, 1.07, (0.05, -0.1));
        let inv = m.inverse().unwrap();
        let (x, y) = inv.apply(m.apply((3.5, -2.0)));
        assert!((x - 3.5).abs() < 1e-9 && (y + 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_reflect101() {
        assert_eq!(reflect101(-1, 4), 1);
        assert_eq!(reflect101(4, 4), 2);
        assert_eq!(reflect101(-5, 4), 1);
        assert_eq!(reflect101(3, 1), 0);
    }
}
