//! 程序运行函数.

use crate::result::TrainResult;
use crate::Args;
use grf_berry::train::{self, TrainConfig, Trainer};
use rand::Rng;
use std::error::Error;
use utils::loader;

/// 由命令行参数构造训练配置. 未指定种子时随机选取一个.
pub fn config_from_args(args: Args) -> Result<TrainConfig, train::ConfigError> {
    let seed = args.seed.unwrap_or_else(|| {
        let seed = rand::thread_rng().gen_range(0..2147483647u64);
        println!("You chose seed {seed} in this training.");
        seed
    });
    let data_paths = if args.data_path.is_empty() {
        vec![loader::train_dir_from_env_or_home()]
    } else {
        args.data_path
    };

    let mut cfg = TrainConfig::new(data_paths, seed);
    cfg.epochs = args.epoch;
    cfg.batch_size = args.batchsize;
    cfg.k_fold = args.kfold;
    cfg.k = usize::try_from(args.k).ok();
    cfg.lr = args.lr;
    cfg.name = args.name;
    cfg.optimizer = train::parse_optimizer(&args.optimizer)?;
    cfg.ratio = args.dataratio;
    cfg.augment = args.augmentation;
    cfg.train_size = args.trainsize;
    cfg.rect = args.rect;
    cfg.weight = args.weight;
    cfg.model = train::parse_model(&args.decoder, args.arch)?;
    cfg.out_dir = args.out_dir;
    Ok(cfg)
}

/// 实际运行.
pub fn run(args: Args) -> Result<TrainResult, Box<dyn Error>> {
    let workers = utils::cpus(args.workers);
    rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build_global()?;

    let cfg = config_from_args(args)?;
    log::info!(
        "training `{}` on {} with {workers} loader threads",
        cfg.name,
        cfg.data_paths
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(" ")
    );
    let trainer = Trainer::new(cfg)?;
    let folds = trainer.run()?;
    Ok(TrainResult::new(trainer.config().name.clone(), folds))
}
