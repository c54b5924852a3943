//! 预测标签的离线后处理: 二值化转换与多模型融合.

use crate::consts::gray::{BACKGROUND, CONVERT_THRESHOLD, FOREGROUND};
use crate::imgproc::{load_gray, GrayArray, ImgWriteRaw};
use crate::Idx2d;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

mod distance;
mod quantize;

pub use distance::{distance_l1, signed_distance};
pub use quantize::median_cut;

/// 融合结果默认的灰度级数.
pub const MERGE_COLORS: usize = 8;

/// 后处理错误.
#[derive(Debug, thiserror::Error)]
pub enum MaskError {
    /// 列目录失败.
    #[error("failed to list {}: {source}", path.display())]
    Io {
        /// 目录路径.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: std::io::Error,
    },

    /// 读取标签失败.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        /// 文件路径.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: image::ImageError,
    },

    /// 保存标签失败.
    #[error("failed to save {}: {source}", path.display())]
    Save {
        /// 文件路径.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: image::ImageError,
    },

    /// 没有给出任何融合来源.
    #[error("at least one source is required")]
    NoSources,

    /// 同一样本在不同来源中的尺寸不同.
    #[error("{name}: expected size {expected:?}, found {found:?}")]
    SizeMismatch {
        /// 样本名.
        name: String,
        /// 第一个来源的尺寸.
        expected: Idx2d,
        /// 不一致的尺寸.
        found: Idx2d,
    },
}

fn read(path: &Path) -> Result<GrayArray, MaskError> {
    load_gray(path).map_err(|source| MaskError::Read {
        path: path.to_owned(),
        source,
    })
}

fn save(img: &GrayArray, path: &Path) -> Result<(), MaskError> {
    img.save_raw(path).map_err(|source| MaskError::Save {
        path: path.to_owned(),
        source,
    })
}

/// 列出 `dir` (不递归) 下所有 `.png` 文件, 按文件名排序.
pub fn list_png<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>, MaskError> {
    let dir = dir.as_ref();
    let mut ans = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| MaskError::Io {
            path: dir.to_owned(),
            source: e.into(),
        })?;
        let path = entry.into_path();
        if path.is_file() && path.extension().is_some_and(|e| e == "png") {
            ans.push(path);
        }
    }
    Ok(ans)
}

/// 二值化: 严格大于 `threshold` 的像素变为前景 (255), 其余为背景 (0).
pub fn binarize(img: &GrayArray, threshold: u8) -> GrayArray {
    img.mapv(|p| if p > threshold { FOREGROUND } else { BACKGROUND })
}

/// 就地转换 `dir` 下所有 `.png` 预测结果为 8-bit 黑白灰度图. 返回处理的文件数.
pub fn convert_dir<P: AsRef<Path>>(dir: P, threshold: u8) -> Result<usize, MaskError> {
    let files = list_png(dir)?;
    log::info!("converting {} masks to 8-bit black & white...", files.len());
    for path in files.iter() {
        save(&binarize(&read(path)?, threshold), path)?;
    }
    log::info!("complete");
    Ok(files.len())
}

/// 默认门限下的 [`convert_dir`].
#[inline]
pub fn convert_dir_default<P: AsRef<Path>>(dir: P) -> Result<usize, MaskError> {
    convert_dir(dir, CONVERT_THRESHOLD)
}

/// 融合任务配置.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MergeConfig {
    /// 各模型的预测目录. 以第一个目录中的 `.png` 文件名为准.
    pub sources: Vec<PathBuf>,
    /// 输出目录. 不存在时自动创建.
    pub out_dir: PathBuf,
    /// 输出灰度级数上限.
    pub colors: usize,
}

impl MergeConfig {
    /// 以默认灰度级数构造.
    pub fn new<I: IntoIterator<Item = PathBuf>>(sources: I, out_dir: PathBuf) -> Self {
        Self {
            sources: sources.into_iter().collect(),
            out_dir,
            colors: MERGE_COLORS,
        }
    }
}

/// 融合同一样本的多个预测: 带符号距离求和, 乘以 255 后截断到 `[0, 255]`,
/// 再量化到至多 `colors` 个灰度级.
pub fn merge_masks(masks: &[GrayArray], colors: usize) -> Result<GrayArray, MaskError> {
    let first = masks.first().ok_or(MaskError::NoSources)?;
    let expected = first.dim();
    let mut acc = ndarray::Array2::<f32>::zeros(expected);
    for (i, m) in masks.iter().enumerate() {
        if m.dim() != expected {
            return Err(MaskError::SizeMismatch {
                name: format!("source #{i}"),
                expected,
                found: m.dim(),
            });
        }
        acc += &signed_distance(m);
    }
    let merged = acc.mapv(|d| (d * 255.0).clamp(0.0, 255.0) as u8);
    Ok(median_cut(&merged, colors))
}

/// 按 `cfg` 融合所有样本并保存. 返回融合的样本数.
pub fn merge_dirs(cfg: &MergeConfig) -> Result<usize, MaskError> {
    let first = cfg.sources.first().ok_or(MaskError::NoSources)?;
    std::fs::create_dir_all(&cfg.out_dir).map_err(|source| MaskError::Io {
        path: cfg.out_dir.clone(),
        source,
    })?;

    let files = list_png(first)?;
    for path in files.iter() {
        // `list_png` 只返回文件, 文件名必然存在.
        let name = path.file_name().unwrap();
        let masks = cfg
            .sources
            .iter()
            .map(|src| read(&src.join(name)))
            .collect::<Result<Vec<_>, _>>()?;
        let merged = merge_masks(&masks, cfg.colors).map_err(|e| match e {
            MaskError::SizeMismatch {
                expected, found, ..
            } => MaskError::SizeMismatch {
                name: name.to_string_lossy().into_owned(),
                expected,
                found,
            },
            e => e,
        })?;
        save(&merged, &cfg.out_dir.join(name))?;
    }
    log::info!("merged {} masks from {} sources", files.len(), cfg.sources.len());
    Ok(files.len())
}
