//! 数据集 RGB 通道统计量.

use super::DatasetError;
use crate::imgproc::{geometry, load_rgb, resize};
use ndarray::Axis;
use std::path::PathBuf;

/// 计算图像的逐通道均值和 (无偏) 标准差, 像素值先缩放到 `[0, 1]`.
///
/// 每幅图像先 (可选地) 零填充为正方形, 再缩放到 `size * size`;
/// 返回值是各图像统计量的算术平均. `images` 为空时返回 `None`.
pub fn channel_stats(
    images: &[PathBuf],
    size: usize,
    rect: bool,
) -> Result<Option<([f32; 3], [f32; 3])>, DatasetError> {
    if images.is_empty() {
        return Ok(None);
    }
    let (mut mean, mut std) = ([0f64; 3], [0f64; 3]);
    for path in images {
        let mut img = load_rgb(path).map_err(|e| DatasetError::read(path, e))?;
        if rect {
            img = geometry::pad_square_rgb(&img);
        }
        let img = resize::resize_rgb(&img, (size, size)).mapv(|p| f64::from(p) / 255.0);
        for (c, plane) in img.axis_iter(Axis(2)).enumerate() {
            let m = plane.mean().unwrap_or(0.0);
            mean[c] += m;
            std[c] += plane.std(1.0).max(0.0);
        }
    }
    let n = images.len() as f64;
    Ok(Some((
        mean.map(|v| (v / n) as f32),
        std.map(|v| (v / n) as f32),
    )))
}
