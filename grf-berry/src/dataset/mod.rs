//! 数据集操作.
//!
//! 目录约定: 每个数据路径下 (递归地) 存在 `images/` 和 `masks/` 两类文件,
//! 以去掉扩展名后的文件名一一对应; 可选的 `grf/` 目录存放同名的辅助通道图像.

use crate::consts::{CHANNELS, NORM_MEAN, NORM_STD};
use crate::imgproc::{GrayArray, RgbArray};
use ndarray::{Array3, Axis, Zip};
use std::path::{Path, PathBuf};

pub mod augment;
pub mod loader;
pub mod split;
mod stats;
mod test_set;
mod train_set;

pub use augment::AugmentConfig;
pub use split::{split, Partition, SplitError};
pub use stats::channel_stats;
pub use test_set::{TestDataset, TestSample};
pub use train_set::{DatasetConfig, Role, Sample, TrainDataset};

/// 数据集运行时错误.
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    /// 构造数据集时 (文件发现、划分等) 的任何错误, 附带出错的数据路径.
    #[error("error loading data from {path}: {source}")]
    Load {
        /// 数据路径 (多个路径以空格分隔).
        path: String,
        /// 底层错误.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// 读取单个样本文件失败.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        /// 文件路径.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: image::ImageError,
    },
}

impl DatasetError {
    pub(crate) fn load<E>(paths: &[PathBuf], e: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Load {
            path: describe_paths(paths),
            source: e.into(),
        }
    }

    pub(crate) fn read(path: &Path, source: image::ImageError) -> Self {
        Self::Read {
            path: path.to_owned(),
            source,
        }
    }
}

/// 获取 `{用户主目录}/dataset` 目录.
pub fn home_dataset_dir() -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    Some(ans)
}

/// 获取 `{用户主目录}/dataset` 目录下给定继续项组成的全路径.
pub fn home_dataset_dir_with<P: AsRef<Path>, I: IntoIterator<Item = P>>(it: I) -> Option<PathBuf> {
    let mut ans = home_dataset_dir()?;
    ans.extend(it);
    Some(ans)
}

fn describe_paths(paths: &[PathBuf]) -> String {
    itertools::Itertools::join(&mut paths.iter().map(|p| p.display()), " ")
}

/// 递归列出 `paths` 下的所有文件, 按路径字符串排序.
pub(crate) fn discover(paths: &[PathBuf]) -> Result<Vec<PathBuf>, walkdir::Error> {
    let mut files = Vec::new();
    for root in paths {
        for entry in walkdir::WalkDir::new(root).follow_links(true) {
            let entry = entry?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }
    }
    sort_paths(&mut files);
    Ok(files)
}

/// 按路径字符串 (而非路径分量) 排序.
pub(crate) fn sort_paths(paths: &mut [PathBuf]) {
    paths.sort_by(|a, b| a.to_string_lossy().cmp(&b.to_string_lossy()));
}

/// 路径字符串中是否含有 `needle`.
#[inline]
pub(crate) fn path_contains(p: &Path, needle: &str) -> bool {
    p.to_string_lossy().contains(needle)
}

/// 是否为 `.jpg` 或 `.png` 文件 (区分大小写).
#[inline]
pub(crate) fn is_jpg_or_png(p: &Path) -> bool {
    matches!(p.extension().and_then(|e| e.to_str()), Some("jpg" | "png"))
}

/// 样本标识: 文件名中第一个 `.` 之前的部分.
pub fn stem_of(p: &Path) -> &str {
    let name = p.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    name.split('.').next().unwrap_or_default()
}

/// 由标签路径推出 GRF 辅助图像路径: 去掉 `/train` 和 `/val`, 再将 `/masks/` 换为 `/grf/`.
pub fn grf_path_for(mask: &Path) -> PathBuf {
    let s = mask
        .to_string_lossy()
        .replace("/train", "")
        .replace("/val", "")
        .replace("/masks/", "/grf/");
    PathBuf::from(s)
}

/// 将 RGB 图像与可选的辅助通道拼接为 `(H, W, 4)` 的 `u8` 数组. `aux` 为 `None` 时第 4 通道全零.
///
/// `aux` 的尺寸与图像不符时程序 panic.
pub fn compose(rgb: &RgbArray, aux: Option<&GrayArray>) -> Array3<u8> {
    let (h, w, _) = rgb.dim();
    let mut out = Array3::zeros((h, w, CHANNELS));
    out.slice_mut(ndarray::s![.., .., ..3]).assign(rgb);
    if let Some(aux) = aux {
        assert_eq!(aux.dim(), (h, w), "辅助通道尺寸与图像不符");
        out.index_axis_mut(Axis(2), 3).assign(aux);
    }
    out
}

/// 将 `(H, W, 4)` 的 `u8` 数组转为 `(4, H, W)` 的 `f32` 张量:
/// 先缩放到 `[0, 1]`, 再以 [`NORM_MEAN`] 和 [`NORM_STD`] 逐通道归一化.
pub fn normalize(raw: &Array3<u8>) -> Array3<f32> {
    let (h, w, c) = raw.dim();
    assert_eq!(c, CHANNELS, "只接受 {CHANNELS} 通道输入");
    let mut out = Array3::zeros((c, h, w));
    for (ch, mut plane) in out.outer_iter_mut().enumerate() {
        let (mean, std) = (NORM_MEAN[ch], NORM_STD[ch]);
        Zip::from(&mut plane)
            .and(raw.index_axis(Axis(2), ch))
            .for_each(|o, &p| *o = (f32::from(p) / 255.0 - mean) / std);
    }
    out
}

/// 二值化标签并转为 `(1, H, W)` 的 `f32` 张量, 取值为 `{0, 1}`.
pub fn mask_tensor(mask: &GrayArray) -> Array3<f32> {
    mask.mapv(|p| if crate::consts::gray::is_foreground(p) { 1.0 } else { 0.0 })
        .insert_axis(Axis(0))
}
