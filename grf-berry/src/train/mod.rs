//! 训练循环.
//!
//! 每一折都独立地构造数据集、模型、优化器、损失缩放器与参数滑动平均; 每轮训练后在验证集上评估,
//! 并写出 CSV 记录、检查点与运行日志.

pub mod checkpoint;
pub mod loss;
pub mod model;
pub mod optim;
pub mod record;

pub use checkpoint::{checkpoint_name, Checkpoint, CheckpointError};
pub use model::{ConvHeads, Decoder, Heads, ModelSpec, Segmenter};
pub use optim::{lr_lambda, GradScaler, ModelEma, Optimizer, OptimizerKind};
pub use record::{AvgMeter, CsvLog, EpochRecord, RunLog};

use crate::consts::DEFAULT_TRAIN_SIZE;
use crate::dataset::loader::batch_loader;
use crate::dataset::{AugmentConfig, DatasetConfig, DatasetError, Partition, Role, SplitError, TrainDataset};
use crate::imgproc::resize::bilinear_batch;
use loss::{boundary_loss, dice_coefficient, iou_score, seg_loss, structure_loss};
use ndarray::Array4;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 多尺度训练的相对抖动幅度.
const MULTISCALE: f64 = 0.25;

/// 多尺度训练的尺寸粒度.
const MULTISCALE_STRIDE: usize = 64;

/// 训练参数错误.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// 未知的优化器名称.
    #[error("unknown optimizer `{0}`, expected one of SGD, Adam, AdamW")]
    UnknownOptimizer(String),

    /// 未知的解码器名称.
    #[error("unknown decoder `{0}`")]
    UnknownDecoder(String),

    /// 卷积核边长不是正奇数.
    #[error("kernel size must be a positive odd number, got {0}")]
    BadKernel(usize),

    /// 训练轮数为 0.
    #[error("epoch count must be positive")]
    ZeroEpochs,

    /// 批大小为 0.
    #[error("batch size must be positive")]
    ZeroBatch,

    /// 训练尺寸为 0.
    #[error("train size must be positive")]
    ZeroTrainSize,

    /// 数据集划分参数错误.
    #[error(transparent)]
    Split(#[from] SplitError),
}

/// 训练过程中的错误.
#[derive(Debug, thiserror::Error)]
pub enum TrainError {
    /// 参数错误.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// 数据集错误.
    #[error(transparent)]
    Dataset(#[from] DatasetError),

    /// 检查点错误.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// 写日志或建目录失败.
    #[error("io error on {}: {source}", path.display())]
    Io {
        /// 相关路径.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: std::io::Error,
    },

    /// 写 CSV 记录失败.
    #[error("failed to write {}: {source}", path.display())]
    Csv {
        /// 相关路径.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: csv::Error,
    },
}

impl TrainError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_owned(),
            source,
        }
    }
}

/// 按名称解析优化器.
pub fn parse_optimizer(name: &str) -> Result<OptimizerKind, ConfigError> {
    name.parse().map_err(ConfigError::UnknownOptimizer)
}

/// 按解码器名称与卷积核边长解析模型结构.
pub fn parse_model(decoder: &str, kernel: usize) -> Result<ModelSpec, ConfigError> {
    let decoder = decoder.parse().map_err(ConfigError::UnknownDecoder)?;
    if kernel % 2 == 0 {
        return Err(ConfigError::BadKernel(kernel));
    }
    Ok(ModelSpec { decoder, kernel })
}

/// 一次训练的全部参数.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    /// 数据路径.
    pub data_paths: Vec<PathBuf>,
    /// 每折训练轮数.
    pub epochs: usize,
    /// 训练批大小.
    pub batch_size: usize,
    /// 总折数. 为 1 时使用留出法.
    pub k_fold: usize,
    /// 只训练指定的一折. 仅当 `k_fold > 1` 时有效.
    pub k: Option<usize>,
    /// 随机种子.
    pub seed: u64,
    /// 基础学习率.
    pub lr: f64,
    /// 实验名, 用于日志与检查点命名.
    pub name: String,
    /// 优化器.
    pub optimizer: OptimizerKind,
    /// 留出法的训练集比例.
    pub ratio: f64,
    /// 训练集是否启用数据增强.
    pub augment: bool,
    /// 基础训练尺寸.
    pub train_size: usize,
    /// 缩放前是否零填充为正方形.
    pub rect: bool,
    /// 初始权重检查点.
    pub weight: Option<PathBuf>,
    /// 模型结构.
    pub model: ModelSpec,
    /// 输出目录: CSV 日志、运行日志与 `weights/{name}/` 都放在这里.
    pub out_dir: PathBuf,
}

impl TrainConfig {
    /// 以默认参数构造.
    pub fn new<I, P>(data_paths: I, seed: u64) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            data_paths: data_paths.into_iter().map(Into::into).collect(),
            epochs: 60,
            batch_size: 5,
            k_fold: 5,
            k: None,
            seed,
            lr: 1e-5,
            name: "exp".to_owned(),
            optimizer: OptimizerKind::AdamW,
            ratio: 0.8,
            augment: false,
            train_size: DEFAULT_TRAIN_SIZE,
            rect: false,
            weight: None,
            model: ModelSpec::default(),
            out_dir: PathBuf::from("."),
        }
    }

    /// 检查参数.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.epochs == 0 {
            return Err(ConfigError::ZeroEpochs);
        }
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatch);
        }
        if self.train_size == 0 {
            return Err(ConfigError::ZeroTrainSize);
        }
        if self.model.kernel % 2 == 0 {
            return Err(ConfigError::BadKernel(self.model.kernel));
        }
        for k in self.folds() {
            Partition::new(self.ratio, k, self.k_fold)?;
        }
        Ok(())
    }

    /// 需要训练的折序号.
    pub fn folds(&self) -> Vec<usize> {
        match self.k {
            Some(k) if self.k_fold > 1 => vec![k],
            _ => (0..self.k_fold.max(1)).collect(),
        }
    }

    /// 第 `k` 折的数据集参数.
    pub fn dataset_config(&self, k: usize) -> DatasetConfig {
        DatasetConfig {
            data_paths: self.data_paths.clone(),
            train_size: self.train_size,
            augment: if self.augment {
                AugmentConfig::default()
            } else {
                AugmentConfig::disabled()
            },
            rect: self.rect,
            ratio: self.ratio,
            k,
            k_fold: self.k_fold,
            seed: self.seed,
        }
    }

    /// 检查点目录 `out_dir/weights/{name}`.
    pub fn weights_dir(&self) -> PathBuf {
        self.out_dir.join("weights").join(&self.name)
    }
}

/// 多尺度训练尺寸: 在 `[⌊0.75 S⌋, ⌊1.25 S⌋)` 中均匀抽取, 向下取整到 64 的倍数, 至少为 64.
pub fn multiscale_size<R: Rng + ?Sized>(train_size: usize, rng: &mut R) -> usize {
    let lo = (train_size as f64 * (1.0 - MULTISCALE)) as usize;
    let hi = (train_size as f64 * (1.0 + MULTISCALE)) as usize;
    let size = if hi > lo { rng.gen_range(lo..hi) } else { lo };
    (size / MULTISCALE_STRIDE * MULTISCALE_STRIDE).max(MULTISCALE_STRIDE)
}

/// 单折训练结果.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FoldSummary {
    /// 折序号.
    pub k: usize,
    /// 最佳验证 IoU.
    pub best_val_iou: f32,
    /// 取得最佳验证 IoU 的轮次. 验证 IoU 从未大于 0 时为 `None`.
    pub best_epoch: Option<usize>,
    /// 每轮记录.
    pub records: Vec<EpochRecord>,
}

/// 一折训练中的可变状态.
struct FoldState {
    model: Box<dyn Segmenter>,
    optimizer: Optimizer,
    scaler: GradScaler,
    ema: ModelEma,
    rng: ChaCha8Rng,
}

#[derive(Default)]
struct TrainStats {
    loss: AvgMeter,
    deep1: AvgMeter,
    deep2: AvgMeter,
    boundary: AvgMeter,
    iou: AvgMeter,
    dice: AvgMeter,
}

#[derive(Default)]
struct ValStats {
    dice: AvgMeter,
    wbce: AvgMeter,
    wiou: AvgMeter,
    iou: AvgMeter,
}

/// 训练器.
#[derive(Clone, Debug)]
pub struct Trainer {
    cfg: TrainConfig,
}

impl Trainer {
    /// 检查参数并构造.
    pub fn new(cfg: TrainConfig) -> Result<Self, ConfigError> {
        cfg.validate()?;
        Ok(Self { cfg })
    }

    /// 训练参数.
    #[inline]
    pub fn config(&self) -> &TrainConfig {
        &self.cfg
    }

    /// 依次训练所有需要的折.
    pub fn run(&self) -> Result<Vec<FoldSummary>, TrainError> {
        let cfg = &self.cfg;
        let weights = cfg.weights_dir();
        std::fs::create_dir_all(&weights).map_err(|e| TrainError::io(&weights, e))?;

        let mut run_log = RunLog::create(&cfg.out_dir, &cfg.name).map_err(|e| TrainError::io(&cfg.out_dir, e))?;
        log::info!("logging at {}", run_log.path().display());
        // 配置只含可序列化的基本类型, 该操作不会生成 `Err`, 可直接 unwrap.
        let line = serde_json::to_string(cfg).unwrap();
        run_log.line(&line).map_err(|e| TrainError::io(run_log.path(), e))?;

        let mut summaries = Vec::new();
        for k in cfg.folds() {
            if cfg.k_fold > 1 {
                log::info!("{}/{}-fold", k + 1, cfg.k_fold);
            }
            summaries.push(self.run_fold(k, &mut run_log)?);
        }
        Ok(summaries)
    }

    /// 训练第 `k` 折.
    pub fn run_fold(&self, k: usize, run_log: &mut RunLog) -> Result<FoldSummary, TrainError> {
        let cfg = &self.cfg;
        let dcfg = cfg.dataset_config(k);
        let train_set = TrainDataset::new(&dcfg, Role::Train)?;
        let val_set = TrainDataset::new(&dcfg, Role::Val)?;

        let mut model = cfg.model.build(cfg.seed ^ k as u64);
        if let Some(weight) = cfg.weight.as_ref() {
            Checkpoint::load(weight)?.restore_into(model.as_mut())?;
            log::info!("loaded initial weights from {}", weight.display());
        }
        let n_params = model.params().len();
        let mut state = FoldState {
            optimizer: Optimizer::new(cfg.optimizer, n_params),
            scaler: GradScaler::default(),
            ema: ModelEma::new(model.params()),
            rng: ChaCha8Rng::seed_from_u64(cfg.seed.wrapping_add(k as u64)),
            model,
        };
        let line = format!("model {:?} with {n_params} parameters, optimizer {}", cfg.model, cfg.optimizer);
        run_log.line(&line).map_err(|e| TrainError::io(run_log.path(), e))?;

        let mut csv = CsvLog::new(&cfg.out_dir, &cfg.name, k);
        let mut best = 0f32;
        let mut best_epoch = None;
        for epoch in 0..cfg.epochs {
            let lr = cfg.lr * lr_lambda(epoch, cfg.epochs);
            let train = self.train_epoch(&mut state, &train_set, epoch, lr as f32)?;
            let last_lr = cfg.lr * lr_lambda(epoch + 1, cfg.epochs);
            let val = self.validate(state.model.as_ref(), &val_set, epoch)?;

            let val_iou = val.iou.avg();
            if val_iou > best {
                best = val_iou;
                best_epoch = Some(epoch);
            }
            let record = EpochRecord {
                epoch,
                lr: last_lr,
                loss: train.loss.avg(),
                deep1: train.deep1.avg(),
                deep2: train.deep2.avg(),
                dice: train.dice.avg(),
                iou: train.iou.avg(),
                val_loss: val.wbce.avg() + val.wiou.avg(),
                val_dice: val.dice.avg(),
                val_iou,
            };
            let line = format!(
                "Epoch: {epoch},mDice: {},Best mDice: {best},loss: {},loss2: {},loss3: {},lr: {last_lr}",
                record.val_dice, record.loss, record.deep1, record.deep2
            );
            log::info!("{line}");
            log::info!("boundary loss {}, best val_iou: {best}", train.boundary.avg());
            run_log.line(&line).map_err(|e| TrainError::io(run_log.path(), e))?;
            csv.push(record).map_err(|source| TrainError::Csv {
                path: csv.path().to_owned(),
                source,
            })?;

            let path = cfg
                .weights_dir()
                .join(checkpoint_name(&cfg.name, k, cfg.k_fold, val_iou, epoch));
            Checkpoint::of(state.model.as_ref(), Some(state.ema.params()), epoch, val_iou).save(path)?;
        }

        Ok(FoldSummary {
            k,
            best_val_iou: best,
            best_epoch,
            records: csv.into_rows(),
        })
    }

    fn train_epoch(
        &self,
        state: &mut FoldState,
        dataset: &TrainDataset,
        epoch: usize,
        lr: f32,
    ) -> Result<TrainStats, TrainError> {
        let cfg = &self.cfg;
        let mut stats = TrainStats::default();
        let mut param_grads = vec![0f32; state.model.params().len()];

        for batch in batch_loader(dataset, cfg.batch_size, true, cfg.seed, epoch) {
            let batch = batch?;
            let size = multiscale_size(cfg.train_size, &mut state.rng);
            let (images, masks) = if size == dataset.train_size() {
                (batch.images, batch.masks)
            } else {
                (
                    bilinear_batch(batch.images.view(), (size, size)),
                    bilinear_batch(batch.masks.view(), (size, size)),
                )
            };

            let out = state.model.forward(images.view());
            let (l0, g0) = seg_loss(out.main.view(), masks.view());
            let (l1, g1) = seg_loss(out.deep1.view(), masks.view());
            let (l2, g2) = seg_loss(out.deep2.view(), masks.view());
            let (lb, gb) = boundary_loss(out.boundary.view(), masks.view());

            let scale = state.scaler.scale();
            let scaled = |g: Array4<f32>| g * scale;
            let grads = Heads {
                main: scaled(g0),
                deep1: scaled(g1),
                deep2: scaled(g2),
                boundary: scaled(gb),
            };
            param_grads.iter_mut().for_each(|g| *g = 0.0);
            state.model.backward(images.view(), &grads, &mut param_grads);
            let stepped = state
                .scaler
                .step(&mut state.optimizer, state.model.params_mut(), &mut param_grads, lr);
            if !stepped {
                log::warn!("non-finite gradients at epoch {epoch}, scale reduced to {}", state.scaler.scale());
            }
            state.ema.update(state.model.params());

            let n = cfg.batch_size;
            stats.loss.update(l0, n);
            stats.deep1.update(l1, n);
            stats.deep2.update(l2, n);
            stats.boundary.update(lb, n);
            stats.iou.update(iou_score(out.main.view(), masks.view()), n);
            stats.dice.update(dice_coefficient(out.main.view(), masks.view()), n);
        }
        Ok(stats)
    }

    fn validate(&self, model: &dyn Segmenter, dataset: &TrainDataset, epoch: usize) -> Result<ValStats, TrainError> {
        let mut stats = ValStats::default();
        for batch in batch_loader(dataset, 1, false, self.cfg.seed, epoch) {
            let batch = batch?;
            let out = model.forward(batch.images.view());
            let (wbce, wiou) = structure_loss(out.main.view(), batch.masks.view());
            stats.dice.update(dice_coefficient(out.main.view(), batch.masks.view()), 1);
            stats.wbce.update(wbce, 1);
            stats.wiou.update(wiou, 1);
            stats.iou.update(iou_score(out.main.view(), batch.masks.view()), 1);
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiscale_size() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        for _ in 0..200 {
            let s = multiscale_size(512, &mut rng);
            assert!((384..640).contains(&s), "{s}");
            assert_eq!(s % 64, 0);
        }
        assert_eq!(multiscale_size(8, &mut rng), 64);
    }

    #[test]
    fn test_folds() {
        let mut cfg = TrainConfig::new(["data"], 0);
        assert_eq!(cfg.folds(), vec![0, 1, 2, 3, 4]);
        cfg.k = Some(3);
        assert_eq!(cfg.folds(), vec![3]);
        cfg.k_fold = 1;
        assert_eq!(cfg.folds(), vec![0]);
    }

    #[test]
    fn test_validate() {
        let mut cfg = TrainConfig::new(["data"], 0);
        assert_eq!(cfg.validate(), Ok(()));
        cfg.k = Some(5);
        assert!(matches!(cfg.validate(), Err(ConfigError::Split(_))));
        cfg.k = None;
        cfg.batch_size = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroBatch));
        cfg.batch_size = 1;
        cfg.epochs = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroEpochs));
    }

    #[test]
    fn test_parse() {
        assert_eq!(parse_optimizer("SGD"), Ok(OptimizerKind::Sgd));
        assert_eq!(
            parse_optimizer("Lion"),
            Err(ConfigError::UnknownOptimizer("Lion".to_owned()))
        );
        assert_eq!(parse_model("heads", 5).unwrap().kernel, 5);
        assert_eq!(parse_model("heads", 4), Err(ConfigError::BadKernel(4)));
        assert!(matches!(parse_model("lawin", 3), Err(ConfigError::UnknownDecoder(_))));
    }

    #[test]
    fn test_dataset_config() {
        let mut cfg = TrainConfig::new(["data"], 9);
        cfg.augment = true;
        let d = cfg.dataset_config(2);
        assert_eq!((d.k, d.k_fold, d.seed), (2, 5, 9));
        assert!(d.augment.is_enabled());
        assert_eq!(cfg.weights_dir(), Path::new("./weights/exp"));
    }
}
