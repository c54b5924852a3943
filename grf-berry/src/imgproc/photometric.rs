//! 光度变换. 这些变换只作用于图像, 不作用于标签.

use super::{saturate_u8, RgbArray};
use ndarray::{Array2, Axis, Zip};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// 逐像素、逐通道地叠加零均值高斯噪声, 方差为 `var` (以 0..=255 像素值计).
pub fn gauss_noise<R: Rng + ?Sized>(img: &mut RgbArray, var: f64, rng: &mut R) {
    let sigma = var.max(0.0).sqrt();
    // `sigma` 非负且有限, 该操作不会生成 `Err`, 可直接 unwrap.
    let normal = Normal::new(0.0, sigma).unwrap();
    img.mapv_inplace(|p| saturate_u8((f64::from(p) + normal.sample(rng)) as f32));
}

/// 线性亮度/对比度: `p' = alpha * p + beta`.
pub fn brightness_contrast(img: &mut RgbArray, alpha: f32, beta: f32) {
    img.mapv_inplace(|p| saturate_u8(f32::from(p) * alpha + beta));
}

/// 颜色抖动中的亮度部分: `p' = p * factor`.
pub fn adjust_brightness(img: &mut RgbArray, factor: f32) {
    img.mapv_inplace(|p| saturate_u8(f32::from(p) * factor));
}

/// 颜色抖动中的对比度部分: 以整幅图像的平均灰度为中心拉伸.
pub fn adjust_contrast(img: &mut RgbArray, factor: f32) {
    let mean = luma(img).mean().unwrap_or(0.0);
    img.mapv_inplace(|p| saturate_u8(f32::from(p) * factor + mean * (1.0 - factor)));
}

/// 计算 RGB 图像的 luma (ITU-R 601-2) 平面.
pub fn luma(img: &RgbArray) -> Array2<f32> {
    let (h, w, _) = img.dim();
    let mut out = Array2::zeros((h, w));
    Zip::from(&mut out)
        .and(img.lanes(Axis(2)))
        .for_each(|y, px| {
            *y = 0.299 * f32::from(px[0]) + 0.587 * f32::from(px[1]) + 0.114 * f32::from(px[2]);
        });
    out
}

/// CLAHE 参数.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClaheParams {
    /// 直方图裁剪上限 (相对于均匀分布的倍数).
    pub clip_limit: f32,
    /// 网格大小 `(行, 列)`.
    pub grid: (usize, usize),
}

impl Default for ClaheParams {
    fn default() -> Self {
        Self {
            clip_limit: 4.0,
            grid: (8, 8),
        }
    }
}

/// 对灰度平面实施限制对比度自适应直方图均衡 (CLAHE).
///
/// 每个网格块计算裁剪后的直方图映射表, 像素值由相邻四个块的映射表双线性插值得到.
pub fn clahe_plane(plane: &Array2<u8>, params: ClaheParams) -> Array2<u8> {
    let (h, w) = plane.dim();
    if h == 0 || w == 0 {
        return plane.clone();
    }
    let (gh, gw) = (params.grid.0.clamp(1, h), params.grid.1.clamp(1, w));
    let (th, tw) = (h.div_ceil(gh), w.div_ceil(gw));

    // luts[ty][tx][v]
    let mut luts = vec![vec![[0u8; 256]; gw]; gh];
    for (ty, row) in luts.iter_mut().enumerate() {
        for (tx, lut) in row.iter_mut().enumerate() {
            let (y0, x0) = (ty * th, tx * tw);
            let (y1, x1) = ((y0 + th).min(h), (x0 + tw).min(w));
            if y0 >= y1 || x0 >= x1 {
                *lut = std::array::from_fn(|v| v as u8);
                continue;
            }
            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[plane[(y, x)] as usize] += 1;
                }
            }
            let area = ((y1 - y0) * (x1 - x0)) as u32;
            let limit = ((params.clip_limit * area as f32 / 256.0) as u32).max(1);
            let mut excess = 0u32;
            for bin in hist.iter_mut() {
                if *bin > limit {
                    excess += *bin - limit;
                    *bin = limit;
                }
            }
            let (bonus, rest) = (excess / 256, (excess % 256) as usize);
            for (i, bin) in hist.iter_mut().enumerate() {
                *bin += bonus + u32::from(i < rest);
            }
            let mut cdf = 0u32;
            for (v, bin) in hist.iter().enumerate() {
                cdf += bin;
                lut[v] = saturate_u8(cdf as f32 * 255.0 / area as f32);
            }
        }
    }

    // 块中心坐标系下的插值.
    let coord = |p: usize, tile: usize, n: usize| -> (usize, usize, f32) {
        let t = (p as f32 + 0.5) / tile as f32 - 0.5;
        if t <= 0.0 {
            return (0, 0, 0.0);
        }
        let t0 = (t.floor() as usize).min(n - 1);
        let t1 = (t0 + 1).min(n - 1);
        (t0, t1, t - t0 as f32)
    };

    Array2::from_shape_fn((h, w), |(y, x)| {
        let v = plane[(y, x)] as usize;
        let (y0, y1, fy) = coord(y, th, gh);
        let (x0, x1, fx) = coord(x, tw, gw);
        let p = |ty: usize, tx: usize| f32::from(luts[ty][tx][v]);
        let top = p(y0, x0) * (1.0 - fx) + p(y0, x1) * fx;
        let bottom = p(y1, x0) * (1.0 - fx) + p(y1, x1) * fx;
        saturate_u8(top * (1.0 - fy) + bottom * fy)
    })
}

/// 在 YCbCr 空间对 RGB 图像的亮度通道实施 CLAHE, 色度保持不变.
pub fn clahe_rgb(img: &mut RgbArray, params: ClaheParams) {
    let eq = clahe_plane(&luma(img).mapv(saturate_u8), params);
    Zip::from(img.lanes_mut(Axis(2)))
        .and(&eq)
        .for_each(|mut px, &new_y| {
            let (r, g, b) = (f32::from(px[0]), f32::from(px[1]), f32::from(px[2]));
            let cb = -0.168_736 * r - 0.331_264 * g + 0.5 * b;
            let cr = 0.5 * r - 0.418_688 * g - 0.081_312 * b;
            let yy = f32::from(new_y);
            px[0] = saturate_u8(yy + 1.402 * cr);
            px[1] = saturate_u8(yy - 0.344_136 * cb - 0.714_136 * cr);
            px[2] = saturate_u8(yy + 1.772 * cb);
        });
}
