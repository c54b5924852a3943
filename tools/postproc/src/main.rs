//! 离线工具: GRF 生成、预测二值化、指标评估、多模型融合、数据集统计与测试集预览.

use clap::{Parser, Subcommand, ValueEnum};
use grf_berry::dataset::{self, DatasetConfig, Role, TestDataset, TrainDataset};
use grf_berry::grf::{self, GrfSpec, Intensity, MetadataKind};
use grf_berry::imgproc::ImgWriteRaw;
use grf_berry::mask::{self, MergeConfig};
use grf_berry::metrics::{self, LabelMode};
use log::LevelFilter;
use ndarray::s;
use std::error::Error;
use std::path::PathBuf;
use utils::loader;

#[derive(Parser, Debug)]
#[command(name = "postproc", version)]
struct Cli {
    /// 日志级别.
    #[arg(long, default_value = "info", global = true)]
    log_level: LevelFilter,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Kind {
    Dob,
    Gender,
    Hdd,
}

impl From<Kind> for MetadataKind {
    fn from(k: Kind) -> Self {
        match k {
            Kind::Dob => Self::Dob,
            Kind::Gender => Self::Gender,
            Kind::Hdd => Self::Hdd,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Strength {
    #[value(name = "2")]
    Two,
    #[value(name = "5")]
    Five,
}

impl From<Strength> for Intensity {
    fn from(s: Strength) -> Self {
        match s {
            Strength::Two => Self::Two,
            Strength::Five => Self::Five,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 由元数据表生成 GRF 图像.
    Grf {
        /// 元数据表, 需含 `image` 列.
        #[arg(long)]
        csv: PathBuf,
        /// 输出目录.
        #[arg(long)]
        out: PathBuf,
        /// 元数据类型.
        #[arg(long, value_enum, default_value_t = Kind::Dob)]
        kind: Kind,
        /// 强度.
        #[arg(long, value_enum, default_value_t = Strength::Two)]
        intensity: Strength,
        /// 取值列名. 默认由元数据类型决定.
        #[arg(long)]
        column: Option<String>,
        /// 输出高度.
        #[arg(long, default_value_t = 480)]
        height: usize,
        /// 输出宽度.
        #[arg(long, default_value_t = 640)]
        width: usize,
    },

    /// 就地将预测结果转换为 8-bit 黑白图.
    Convert {
        /// 预测目录.
        dir: PathBuf,
        /// 严格大于该值的像素视为前景.
        #[arg(long, default_value_t = 120)]
        threshold: u8,
    },

    /// 评估预测结果.
    Metrics {
        /// 真值目录.
        #[arg(long)]
        gt: PathBuf,
        /// 预测目录.
        #[arg(long)]
        pred: PathBuf,
        /// 报告目录.
        #[arg(long, default_value = "metrics")]
        out: PathBuf,
        /// 先以 `0.5 * 255` 为门限二值化.
        #[arg(long)]
        binary: bool,
    },

    /// 融合多个模型的预测.
    Merge {
        /// 输出目录.
        #[arg(long)]
        out: PathBuf,
        /// 输出灰度级数上限.
        #[arg(long, default_value_t = mask::MERGE_COLORS)]
        colors: usize,
        /// 各模型的预测目录.
        #[arg(required = true, num_args = 1..)]
        sources: Vec<PathBuf>,
    },

    /// 统计训练图像的逐通道均值与标准差.
    Stats {
        /// 数据路径. 默认为 `$GRF_TRAIN_DIR` 或 `$HOME/dataset/train`.
        #[arg(long = "data-path", num_args = 1..)]
        data_path: Vec<PathBuf>,
        /// 缩放尺寸.
        #[arg(long, default_value_t = 512)]
        size: usize,
        /// 缩放前零填充为正方形.
        #[arg(long)]
        rect: bool,
    },

    /// 导出测试集的网络输入 (RGB 部分) 以便目视检查.
    Preview {
        /// 数据路径. 默认为 `$GRF_TEST_DIR` 或 `$HOME/dataset/test`.
        #[arg(long = "data-path", num_args = 1..)]
        data_path: Vec<PathBuf>,
        /// 输出目录.
        #[arg(long)]
        out: PathBuf,
        /// 缩放尺寸.
        #[arg(long, default_value_t = 512)]
        size: usize,
        /// 缩放前零填充为正方形.
        #[arg(long)]
        rect: bool,
    },
}

fn or_default(paths: Vec<PathBuf>, default: fn() -> PathBuf) -> Vec<PathBuf> {
    if paths.is_empty() {
        vec![default()]
    } else {
        paths
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    utils::init_logger(cli.log_level)?;

    match cli.command {
        Command::Grf {
            csv,
            out,
            kind,
            intensity,
            column,
            height,
            width,
        } => {
            let mut spec = GrfSpec::new(kind.into(), intensity.into());
            if let Some(column) = column {
                spec.column = column;
            }
            spec.size = (height, width);
            std::fs::create_dir_all(&out)?;
            let n = grf::generate_from_csv(&csv, &out, &spec)?;
            log::info!("generated {n} GRF images into {}", out.display());
        }
        Command::Convert { dir, threshold } => {
            mask::convert_dir(&dir, threshold)?;
        }
        Command::Metrics {
            gt,
            pred,
            out,
            binary,
        } => {
            let mode = if binary {
                LabelMode::Binary
            } else {
                LabelMode::MultiLabel
            };
            let report = metrics::evaluate_dirs(&gt, &pred, mode)?;
            report.save(&out)?;
            utils::sep();
            report.describe_into(&mut std::io::stdout())?;
            utils::sep();
            println!("{}", report.to_json()?);
        }
        Command::Merge {
            out,
            colors,
            sources,
        } => {
            let mut cfg = MergeConfig::new(sources, out);
            cfg.colors = colors;
            mask::merge_dirs(&cfg)?;
        }
        Command::Stats {
            data_path,
            size,
            rect,
        } => {
            let mut cfg = DatasetConfig::new(or_default(data_path, loader::train_dir_from_env_or_home), 0);
            cfg.train_size = size;
            cfg.rect = rect;
            cfg.ratio = 1.0;
            let all = TrainDataset::new(&cfg, Role::Train)?;
            match dataset::channel_stats(all.image_paths(), size, rect)? {
                Some((mean, std)) => {
                    println!("mean: {mean:?}");
                    println!("std: {std:?}");
                }
                None => println!("no images found"),
            }
        }
        Command::Preview {
            data_path,
            out,
            size,
            rect,
        } => {
            let paths = or_default(data_path, loader::test_dir_from_env_or_home);
            let test = TestDataset::new(&paths, size, rect)?;
            std::fs::create_dir_all(&out)?;
            for sample in test.iter() {
                let sample = sample?;
                let (h, w) = sample.original_size;
                let stem = dataset::stem_of(&sample.name);
                let path = out.join(format!("{stem}.png"));
                sample.raw.slice(s![.., .., 0..3]).save_raw(&path)?;
                log::info!("{} ({h} x {w}) -> {}", sample.name.display(), path.display());
            }
        }
    }
    Ok(())
}
