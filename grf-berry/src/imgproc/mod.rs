//! 二维图像的基础数据结构与读写.
//!
//! 所有图像在内存中都以 `ndarray` 按 `(高, 宽[, 通道])` 的行优先格式保存,
//! 与 [`crate::Idx2d`] 的 `(h, w)` 约定保持一致.

use image::{GrayImage, ImageResult, RgbImage};
use ndarray::{Array2, Array3, ArrayView2, ArrayView3};
use std::path::Path;

pub mod geometry;
pub mod photometric;
pub mod resize;

/// RGB 图像, 形状为 `(H, W, 3)`.
pub type RgbArray = Array3<u8>;

/// 单通道灰度图像, 形状为 `(H, W)`.
pub type GrayArray = Array2<u8>;

/// `RgbImage` 转为 `(H, W, 3)` 数组.
pub fn from_rgb_image(img: RgbImage) -> RgbArray {
    let (w, h) = img.dimensions();
    // `RgbImage` 的缓冲区长度恒为 `h * w * 3`, 该操作不会生成 `Err`, 可直接 unwrap.
    Array3::from_shape_vec((h as usize, w as usize, 3), img.into_raw()).unwrap()
}

/// `GrayImage` 转为 `(H, W)` 数组.
pub fn from_gray_image(img: GrayImage) -> GrayArray {
    let (w, h) = img.dimensions();
    // 同上, 缓冲区长度恒为 `h * w`.
    Array2::from_shape_vec((h as usize, w as usize), img.into_raw()).unwrap()
}

/// `(H, W, 3)` 数组转为 `RgbImage`. 通道数不为 3 时 panic.
pub fn to_rgb_image(a: ArrayView3<u8>) -> RgbImage {
    let (h, w, c) = a.dim();
    assert_eq!(c, 3, "只允许 3 通道图像, 但发现了 {c} 通道");
    // 按逻辑顺序迭代即为 RGB 交错布局, 长度恒为 `h * w * 3`, 可直接 unwrap.
    RgbImage::from_raw(w as u32, h as u32, a.iter().copied().collect()).unwrap()
}

/// `(H, W)` 数组转为 `GrayImage`.
pub fn to_gray_image(a: ArrayView2<u8>) -> GrayImage {
    let (h, w) = a.dim();
    // 长度恒为 `h * w`, 可直接 unwrap.
    GrayImage::from_raw(w as u32, h as u32, a.iter().copied().collect()).unwrap()
}

/// 读取图像文件并转为 RGB 数组.
pub fn load_rgb<P: AsRef<Path>>(path: P) -> ImageResult<RgbArray> {
    Ok(from_rgb_image(image::open(path.as_ref())?.into_rgb8()))
}

/// 读取图像文件并转为单通道灰度数组 (ITU-R 601-2 luma).
pub fn load_gray<P: AsRef<Path>>(path: P) -> ImageResult<GrayArray> {
    Ok(from_gray_image(image::open(path.as_ref())?.into_luma8()))
}

/// 表明一个可以 **按原样** 持久化存储的图像对象.
pub trait ImgWriteRaw {
    /// 按原样将图片保存到 `path` 路径. 图片格式由扩展名决定.
    fn save_raw<P: AsRef<Path>>(&self, path: P) -> ImageResult<()>;
}

impl ImgWriteRaw for ArrayView2<'_, u8> {
    fn save_raw<P: AsRef<Path>>(&self, path: P) -> ImageResult<()> {
        to_gray_image(self.view()).save(path)
    }
}

impl ImgWriteRaw for GrayArray {
    #[inline]
    fn save_raw<P: AsRef<Path>>(&self, path: P) -> ImageResult<()> {
        self.view().save_raw(path)
    }
}

impl ImgWriteRaw for ArrayView3<'_, u8> {
    /// 仅支持 3 通道. 其它通道数会 panic.
    fn save_raw<P: AsRef<Path>>(&self, path: P) -> ImageResult<()> {
        to_rgb_image(self.view()).save(path)
    }
}

impl ImgWriteRaw for RgbArray {
    #[inline]
    fn save_raw<P: AsRef<Path>>(&self, path: P) -> ImageResult<()> {
        self.view().save_raw(path)
    }
}

/// `f32` 像素值截断到 `[0, 255]` 并四舍五入为 `u8`.
#[inline]
pub(crate) fn saturate_u8(v: f32) -> u8 {
    if v.is_nan() {
        0
    } else {
        v.round().clamp(0.0, 255.0) as u8
    }
}
