//! 训练时的随机数据增强.
//!
//! 几何变换与标签同步: 每一步只从 `rng` 抽取一次随机数, 并将同一个变换同时作用于
//! 图像和标签. 光度变换只作用于图像.

use crate::imgproc::geometry::{self, Affine, CropWindow};
use crate::imgproc::photometric::{self, ClaheParams};
use crate::imgproc::{GrayArray, RgbArray};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// 不可变的增强配置. 每个字段都对应一个可独立关闭的效果 (概率设为 0 即关闭).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AugmentConfig {
    /// 以该概率裁剪 (中心裁剪与随机裁剪各占一半). 图像小于裁剪尺寸时跳过.
    pub crop_prob: f64,
    /// 裁剪尺寸 (高, 宽).
    pub crop_size: (usize, usize),

    /// 水平翻转概率.
    pub hflip_prob: f64,
    /// 垂直翻转概率.
    pub vflip_prob: f64,

    /// 平移-缩放-旋转 的概率.
    pub ssr_prob: f64,
    /// 平移量上限 (相对于边长).
    pub shift_limit: f64,
    /// 缩放量上限: 缩放系数取自 `[1 - limit, 1 + limit]`.
    pub scale_limit: f64,
    /// 旋转角度上限 (度).
    pub rotate_limit: f64,

    /// 以该概率从 {高斯噪声, 亮度/对比度, CLAHE} 中等概率选一个施加到图像上.
    pub photometric_prob: f64,
    /// 高斯噪声方差范围.
    pub noise_var: (f64, f64),
    /// 亮度变化上限 (相对于 255).
    pub brightness_limit: f32,
    /// 对比度变化上限.
    pub contrast_limit: f32,
    /// CLAHE 参数.
    pub clahe: ClaheParams,

    /// 颜色抖动概率. 在其它所有增强之后施加.
    pub jitter_prob: f64,
    /// 颜色抖动的亮度系数取自 `[1 - b, 1 + b]`.
    pub jitter_brightness: f32,
    /// 颜色抖动的对比度系数取自 `[1 - c, 1 + c]`.
    pub jitter_contrast: f32,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            crop_prob: 0.3,
            crop_size: (480, 480),
            hflip_prob: 0.8,
            vflip_prob: 0.8,
            ssr_prob: 0.5,
            shift_limit: 0.1,
            scale_limit: 0.1,
            rotate_limit: 45.0,
            photometric_prob: 0.5,
            noise_var: (10.0, 50.0),
            brightness_limit: 0.2,
            contrast_limit: 0.2,
            clahe: ClaheParams::default(),
            jitter_prob: 0.3,
            jitter_brightness: 0.5,
            jitter_contrast: 0.5,
        }
    }
}

/// 以概率 `p` 返回 `true`. `p` 越界时按 `[0, 1]` 截断处理, 不会 panic.
#[inline]
fn chance<R: Rng + ?Sized>(rng: &mut R, p: f64) -> bool {
    rng.gen::<f64>() < p
}

/// 在 `[lo, hi]` 内均匀取值; `lo >= hi` 时返回 `lo`.
#[inline]
fn uniform<R: Rng + ?Sized>(rng: &mut R, lo: f64, hi: f64) -> f64 {
    if lo < hi {
        rng.gen_range(lo..=hi)
    } else {
        lo
    }
}

impl AugmentConfig {
    /// 关闭所有增强.
    pub fn disabled() -> Self {
        Self {
            crop_prob: 0.0,
            hflip_prob: 0.0,
            vflip_prob: 0.0,
            ssr_prob: 0.0,
            photometric_prob: 0.0,
            jitter_prob: 0.0,
            ..Self::default()
        }
    }

    /// 是否至少有一个效果可能被施加.
    pub fn is_enabled(&self) -> bool {
        [
            self.crop_prob,
            self.hflip_prob,
            self.vflip_prob,
            self.ssr_prob,
            self.photometric_prob,
            self.jitter_prob,
        ]
        .into_iter()
        .any(|p| p > 0.0)
    }

    /// 对一对 (图像, 标签) 施加随机增强.
    ///
    /// 输出图像与标签的空间尺寸始终一致. 如果输入尺寸不一致则程序 panic.
    pub fn apply<R: Rng + ?Sized>(
        &self,
        mut image: RgbArray,
        mut mask: GrayArray,
        rng: &mut R,
    ) -> (RgbArray, GrayArray) {
        let (h, w, _) = image.dim();
        assert_eq!((h, w), mask.dim(), "图像与标签尺寸不符");

        if chance(rng, self.crop_prob) {
            let win = if rng.gen_bool(0.5) {
                CropWindow::center((h, w), self.crop_size)
            } else {
                CropWindow::at_fraction((h, w), self.crop_size, (rng.gen(), rng.gen()))
            };
            if let Some(win) = win {
                image = geometry::crop_rgb(&image, win);
                mask = geometry::crop_gray(&mask, win);
            }
        }

        if chance(rng, self.hflip_prob) {
            geometry::hflip_rgb(&mut image);
            geometry::hflip_gray(&mut mask);
        }
        if chance(rng, self.vflip_prob) {
            geometry::vflip_rgb(&mut image);
            geometry::vflip_gray(&mut mask);
        }

        if chance(rng, self.ssr_prob) {
            let angle = uniform(rng, -self.rotate_limit, self.rotate_limit);
            let scale = uniform(rng, 1.0 - self.scale_limit, 1.0 + self.scale_limit);
            let dx = uniform(rng, -self.shift_limit, self.shift_limit);
            let dy = uniform(rng, -self.shift_limit, self.shift_limit);
            let m = Affine::shift_scale_rotate(mask.dim(), angle, scale, (dx, dy));
            image = geometry::warp_rgb(&image, &m);
            mask = geometry::warp_gray_nearest(&mask, &m);
        }

        if chance(rng, self.photometric_prob) {
            match rng.gen_range(0..3) {
                0 => {
                    let var = uniform(rng, self.noise_var.0, self.noise_var.1);
                    photometric::gauss_noise(&mut image, var, rng);
                }
                1 => {
                    let (b, c) = (
                        f64::from(self.brightness_limit),
                        f64::from(self.contrast_limit),
                    );
                    let alpha = 1.0 + uniform(rng, -c, c) as f32;
                    let beta = uniform(rng, -b, b) as f32 * 255.0;
                    photometric::brightness_contrast(&mut image, alpha, beta);
                }
                _ => photometric::clahe_rgb(&mut image, self.clahe),
            }
        }

        if chance(rng, self.jitter_prob) {
            let (b, c) = (
                f64::from(self.jitter_brightness),
                f64::from(self.jitter_contrast),
            );
            let fb = uniform(rng, (1.0 - b).max(0.0), 1.0 + b) as f32;
            let fc = uniform(rng, (1.0 - c).max(0.0), 1.0 + c) as f32;
            photometric::adjust_brightness(&mut image, fb);
            photometric::adjust_contrast(&mut image, fc);
        }

        (image, mask)
    }
}
