//! 训练入口.

use clap::Parser;
use log::LevelFilter;
use std::path::PathBuf;

mod result;
mod runner;

/// 带 GRF 辅助通道的分割模型训练.
#[derive(Parser, Debug)]
#[command(name = "trainer", version)]
pub struct Args {
    /// 每折训练轮数.
    #[arg(long, default_value_t = 60)]
    pub epoch: usize,

    /// 训练批大小.
    #[arg(long, default_value_t = 5)]
    pub batchsize: usize,

    /// 总折数. 为 1 时使用留出法.
    #[arg(long, default_value_t = 5)]
    pub kfold: usize,

    /// 只训练第 k 折. -1 表示训练所有折.
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub k: i64,

    /// 随机种子. 不指定时随机选取.
    #[arg(long)]
    pub seed: Option<u64>,

    /// 基础学习率.
    #[arg(long, default_value_t = 1e-5)]
    pub lr: f64,

    /// 实验名.
    #[arg(long, default_value = "exp")]
    pub name: String,

    /// 优化器: SGD, Adam 或 AdamW.
    #[arg(long, default_value = "AdamW")]
    pub optimizer: String,

    /// 留出法的训练集比例.
    #[arg(long, default_value_t = 0.8)]
    pub dataratio: f64,

    /// 数据路径. 默认为 `$GRF_TRAIN_DIR` 或 `$HOME/dataset/train`.
    #[arg(long = "data-path", num_args = 1..)]
    pub data_path: Vec<PathBuf>,

    /// 训练集启用数据增强.
    #[arg(long)]
    pub augmentation: bool,

    /// 基础训练尺寸.
    #[arg(long, default_value_t = 512)]
    pub trainsize: usize,

    /// 初始权重检查点.
    #[arg(long)]
    pub weight: Option<PathBuf>,

    /// 卷积核边长.
    #[arg(long, default_value_t = 3)]
    pub arch: usize,

    /// 解码器.
    #[arg(long, default_value = "heads")]
    pub decoder: String,

    /// 缩放前零填充为正方形.
    #[arg(long)]
    pub rect: bool,

    /// 并行加载样本的线程数. 默认为可用核心数.
    #[arg(long)]
    pub workers: Option<usize>,

    /// 输出目录.
    #[arg(long, default_value = ".")]
    pub out_dir: PathBuf,

    /// 日志级别.
    #[arg(long, default_value = "info")]
    pub log_level: LevelFilter,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    utils::init_logger(args.log_level)?;
    let result = runner::run(args)?;
    result.analyze();
    Ok(())
}
