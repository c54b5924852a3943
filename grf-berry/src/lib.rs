#![warn(missing_docs)] // <= 合适时移除它.
// #![warn(clippy::missing_docs_in_private_items)]  // <= too strict.

//! 核心库. 为 "RGB + 高斯随机场 (GRF) 辅助通道" 的医学图像二值分割提供数据集划分、数据增强、
//! 训练循环, 以及离线的 GRF 生成、标签转换、多模型融合与指标评估.
//!
//! 该 crate 目前仅提供 `safe` 接口.
//!
//! # 注意
//!
//! 1. 数据目录需按 `images/`、`masks/` 组织, GRF 图像放在 `masks/` 的同级目录 `grf/` 下,
//!   文件名与标签相同.
//! 2. 在非期望情况下 (例如排序后图像与标签文件名不对应), 程序会直接 panic.
//!
//! # 开发计划
//!
//! ### 数据集发现与划分 ✅
//!
//! 留出法与 k 折交叉验证, 同一种子下划分结果确定.
//!
//! 实现位于 `grf-berry/src/dataset`.
//!
//! ### 数据增强 ✅
//!
//! 1. 几何变换 (裁剪、翻转、平移缩放旋转) 对图像与标签同步施加. ✅
//! 2. 光度变换 (高斯噪声、亮度对比度、CLAHE) 只作用于图像. ✅
//!
//! 实现位于 `grf-berry/src/dataset/augment.rs` 与 `grf-berry/src/imgproc`.
//!
//! ### 训练循环 ✅
//!
//! 多尺度训练、深监督与边界损失、损失缩放、余弦学习率、参数滑动平均、检查点.
//! 模型通过 `Segmenter` trait 接入; 内置一个卷积输出头的参考模型.
//!
//! 实现位于 `grf-berry/src/train`.
//!
//! ### GRF 生成 ✅
//!
//! 由元数据值决定功率谱指数, 以固定种子生成随机场.
//!
//! 实现位于 `grf-berry/src/grf.rs`.
//!
//! ### 后处理与评估 ✅
//!
//! 1. 预测结果二值化. ✅
//! 2. 带符号距离融合多个模型的预测. ✅
//! 3. FNE/FPE/MO/UO/VS/JC/DC 指标与 JSON/CSV 报告. ✅
//!
//! 实现位于 `grf-berry/src/mask` 与 `grf-berry/src/metrics.rs`.

/// 二维索引 `(高, 宽)`.
pub type Idx2d = (usize, usize);

type Predicate = fn(u8) -> bool;

pub mod consts;
pub mod dataset;
pub mod grf;
pub mod imgproc;
pub mod mask;
pub mod metrics;
pub mod prelude;
pub mod train;
