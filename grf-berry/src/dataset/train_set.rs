//! 训练集与验证集.

use super::{
    compose, discover, is_jpg_or_png, mask_tensor, normalize, path_contains, sort_paths, stem_of,
    AugmentConfig, DatasetError, Partition,
};
use crate::consts::{DEFAULT_TRAIN_SIZE, ZEROED_GRF_ONE_IN};
use crate::imgproc::{geometry, load_gray, load_rgb, resize};
use ndarray::{Array3, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 数据集角色.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// 训练集. 按配置施加数据增强.
    Train,
    /// 验证集. 从不施加数据增强.
    Val,
}

impl Role {
    fn describe(self) -> &'static str {
        match self {
            Self::Train => "training",
            Self::Val => "validation",
        }
    }
}

/// 构造训练集/验证集所需的全部参数.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// 数据路径. 每个路径都会被递归搜索.
    pub data_paths: Vec<PathBuf>,
    /// 输出张量边长.
    pub train_size: usize,
    /// 训练集使用的增强配置. 验证集忽略该字段.
    pub augment: AugmentConfig,
    /// 是否在缩放前将图像零填充为正方形.
    pub rect: bool,
    /// 训练集比例 (留出法时有效).
    pub ratio: f64,
    /// 当前折序号.
    pub k: usize,
    /// 总折数. 为 1 时使用留出法.
    pub k_fold: usize,
    /// 划分种子.
    pub seed: u64,
}

impl DatasetConfig {
    /// 以默认参数 (不增强, 8:2 留出法) 构造.
    pub fn new<I, P>(data_paths: I, seed: u64) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            data_paths: data_paths.into_iter().map(Into::into).collect(),
            train_size: DEFAULT_TRAIN_SIZE,
            augment: AugmentConfig::disabled(),
            rect: false,
            ratio: 0.8,
            k: 0,
            k_fold: 1,
            seed,
        }
    }
}

/// 一个已处理好的样本.
#[derive(Clone, Debug)]
pub struct Sample {
    /// `(4, S, S)` 的归一化复合张量.
    pub image: Array3<f32>,
    /// `(1, S, S)` 的标签张量, 取值为 `{0, 1}`.
    pub mask: Array3<f32>,
    /// 标签文件路径.
    pub name: PathBuf,
    /// 辅助通道是否被置零.
    pub grf_zeroed: bool,
}

/// 训练集或验证集. 构造后只读, 可在多个线程间共享.
#[derive(Debug)]
pub struct TrainDataset {
    images: Vec<PathBuf>,
    masks: Vec<PathBuf>,
    train_size: usize,
    augment: Option<AugmentConfig>,
    rect: bool,
    role: Role,
}

impl TrainDataset {
    /// 发现文件, 划分并只保留 `role` 对应的部分.
    ///
    /// # 注意
    ///
    /// 排序后图像与标签的文件名 (去掉扩展名) 必须两两相同, 否则程序 panic.
    pub fn new(cfg: &DatasetConfig, role: Role) -> Result<Self, DatasetError> {
        let wrap = |e: Box<dyn std::error::Error + Send + Sync>| DatasetError::load(&cfg.data_paths, e);

        let files = discover(&cfg.data_paths).map_err(|e| wrap(e.into()))?;
        let pick = |needle: &str| -> Vec<PathBuf> {
            files
                .iter()
                .filter(|p| path_contains(p, needle) && is_jpg_or_png(p))
                .cloned()
                .collect()
        };
        let mut images = pick("images");
        let mut masks = pick("masks");
        let total = images.len();
        if masks.len() != total {
            return Err(wrap(
                format!("found {total} images but {} masks", masks.len()).into(),
            ));
        }

        let partition = Partition::new(cfg.ratio, cfg.k, cfg.k_fold).map_err(|e| wrap(e.into()))?;
        let (train_idx, val_idx) = super::split(total, cfg.seed, partition);
        let subset = match role {
            Role::Train if cfg.ratio != 1.0 => Some(train_idx),
            Role::Val if cfg.ratio != 0.0 => Some(val_idx),
            _ => None,
        };
        if let Some(idx) = subset {
            images = idx.iter().map(|&i| images[i].clone()).collect();
            masks = idx.iter().map(|&i| masks[i].clone()).collect();
            sort_paths(&mut images);
            sort_paths(&mut masks);
        }

        for (img, gt) in images.iter().zip(masks.iter()) {
            assert_eq!(
                stem_of(img),
                stem_of(gt),
                "图像与标签不匹配: {} / {}",
                img.display(),
                gt.display()
            );
        }

        log::info!(
            "load {} {} data from {} images in {}",
            images.len(),
            role.describe(),
            total,
            super::describe_paths(&cfg.data_paths)
        );

        let augment = match role {
            Role::Train if cfg.augment.is_enabled() => Some(cfg.augment.clone()),
            _ => None,
        };
        Ok(Self {
            images,
            masks,
            train_size: cfg.train_size,
            augment,
            rect: cfg.rect,
            role,
        })
    }

    /// 样本个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// 是否没有样本?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// 数据集角色.
    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    /// 输出张量边长.
    #[inline]
    pub fn train_size(&self) -> usize {
        self.train_size
    }

    /// 所有标签文件路径 (即样本名).
    pub fn names(&self) -> &[PathBuf] {
        &self.masks
    }

    /// 所有图像文件路径.
    pub fn image_paths(&self) -> &[PathBuf] {
        &self.images
    }

    /// 读取并处理第 `index` 个样本. 全部随机性都来自 `rng`.
    ///
    /// `index` 越界时程序 panic.
    pub fn get<R: Rng + ?Sized>(&self, index: usize, rng: &mut R) -> Result<Sample, DatasetError> {
        let (img_path, mask_path) = (&self.images[index], &self.masks[index]);
        let mut image = load_rgb(img_path).map_err(|e| DatasetError::read(img_path, e))?;
        let mut mask = load_gray(mask_path).map_err(|e| DatasetError::read(mask_path, e))?;

        if self.rect {
            image = geometry::pad_square_rgb(&image);
            mask = geometry::pad_square_gray(&mask);
            let (h, w, _) = image.dim();
            assert_eq!(h, w, "{}: 填充后不是正方形 ({h}/{w})", img_path.display());
        }

        if let Some(aug) = &self.augment {
            (image, mask) = aug.apply(image, mask, rng);
        }

        let side = (self.train_size, self.train_size);
        let image = resize::resize_rgb(&image, side);
        let mask = resize::resize_gray_nearest(&mask, side);

        let grf_zeroed = rng.gen_range(1..=ZEROED_GRF_ONE_IN) == 2;
        let raw = if grf_zeroed {
            compose(&image, None)
        } else {
            let grf = load_grf(mask_path, side)?;
            compose(&image, Some(&grf))
        };

        Ok(Sample {
            image: normalize(&raw),
            mask: mask_tensor(&mask),
            name: mask_path.clone(),
            grf_zeroed,
        })
    }
}

fn load_grf(mask_path: &Path, side: (usize, usize)) -> Result<crate::imgproc::GrayArray, DatasetError> {
    let path = super::grf_path_for(mask_path);
    let grf = load_gray(&path).map_err(|e| DatasetError::read(&path, e))?;
    Ok(resize::resize_gray_linear(&grf, side))
}

/// 将若干样本在第 0 维拼接为批.
///
/// 所有样本的形状必须相同, 否则程序 panic.
pub(crate) fn stack_samples(samples: &[Sample]) -> (ndarray::Array4<f32>, ndarray::Array4<f32>) {
    let images: Vec<_> = samples.iter().map(|s| s.image.view()).collect();
    let masks: Vec<_> = samples.iter().map(|s| s.mask.view()).collect();
    // 形状一致时该操作不会生成 `Err`, 可直接 unwrap.
    (
        ndarray::stack(Axis(0), &images).unwrap(),
        ndarray::stack(Axis(0), &masks).unwrap(),
    )
}
