//! 对 `grf-berry::dataset` 的更一层封装. 提供默认数据路径.

use std::env;
use std::path::PathBuf;

/// 获取训练集基本路径.
///
/// 1. 若环境变量 `$GRF_TRAIN_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/train`.
pub fn train_dir_from_env_or_home() -> PathBuf {
    match env::var("GRF_TRAIN_DIR") {
        Ok(d) if !d.is_empty() => PathBuf::from(d),
        _ => grf_berry::dataset::home_dataset_dir_with(["train"]).unwrap_or_else(|| PathBuf::from("dataset/train")),
    }
}

/// 获取测试集基本路径.
///
/// 1. 若环境变量 `$GRF_TEST_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/test`.
pub fn test_dir_from_env_or_home() -> PathBuf {
    match env::var("GRF_TEST_DIR") {
        Ok(d) if !d.is_empty() => PathBuf::from(d),
        _ => grf_berry::dataset::home_dataset_dir_with(["test"]).unwrap_or_else(|| PathBuf::from("dataset/test")),
    }
}
