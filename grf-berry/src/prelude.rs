//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::Idx2d;

pub use crate::consts::gray::{BACKGROUND, FOREGROUND};
pub use crate::consts::{CHANNELS, DEFAULT_TRAIN_SIZE};

pub use crate::imgproc::{load_gray, load_rgb, GrayArray, ImgWriteRaw, RgbArray};

pub use crate::dataset::{self, home_dataset_dir_with};
pub use crate::dataset::{AugmentConfig, DatasetConfig, Role, TestDataset, TrainDataset};

pub use crate::grf::{GrfSpec, Intensity, MetadataKind};
pub use crate::mask::{convert_dir, merge_dirs, MergeConfig};
pub use crate::metrics::{evaluate_dirs, LabelMode, MetricsReport};
pub use crate::train::{FoldSummary, TrainConfig, Trainer};
