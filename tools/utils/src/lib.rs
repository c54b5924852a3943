//! 命令行工具依赖的通用组件.

use log::LevelFilter;

pub mod loader;

const SEP: &str = "--------------------------------------------------------";

/// 简单分隔线.
#[inline]
pub fn sep() {
    println!("{SEP}");
}

/// 并行线程数: `requested` 为正数时直接采用 (对应 `--workers`), 否则取可用核心数.
pub fn cpus(requested: Option<usize>) -> usize {
    match requested {
        Some(n) if n > 0 => n,
        _ => std::thread::available_parallelism().map_or_else(|_| num_cpus::get(), usize::from),
    }
}

/// 安装全局日志器. `RUST_LOG` 环境变量优先于 `level`.
pub fn init_logger(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    simple_logger::SimpleLogger::new()
        .with_level(level)
        .env()
        .init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpus() {
        assert_eq!(cpus(Some(3)), 3);
        let auto = cpus(None);
        assert!(auto >= 1);
        assert_eq!(cpus(Some(0)), auto);
    }
}
