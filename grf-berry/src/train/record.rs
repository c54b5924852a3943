//! 训练过程记录: 滑动均值、每轮记录、CSV 日志与文本运行日志.

use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// 加权平均计数器.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AvgMeter {
    sum: f64,
    count: usize,
}

impl AvgMeter {
    /// 以权重 `n` 记录一个值.
    #[inline]
    pub fn update(&mut self, val: f32, n: usize) {
        self.sum += val as f64 * n as f64;
        self.count += n;
    }

    /// 当前均值. 尚无记录时为 0.
    #[inline]
    pub fn avg(&self) -> f32 {
        if self.count == 0 {
            0.0
        } else {
            (self.sum / self.count as f64) as f32
        }
    }

    /// 累计权重.
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }
}

/// 一轮训练的记录.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    /// 轮次, 从 0 开始.
    pub epoch: usize,
    /// 本轮结束、调度器步进后的学习率.
    pub lr: f64,
    /// 主输出损失.
    pub loss: f32,
    /// 第一个深监督输出损失.
    pub deep1: f32,
    /// 第二个深监督输出损失.
    pub deep2: f32,
    /// 训练集 Dice.
    pub dice: f32,
    /// 训练集 IoU.
    pub iou: f32,
    /// 验证集结构损失.
    pub val_loss: f32,
    /// 验证集 Dice.
    pub val_dice: f32,
    /// 验证集 IoU.
    pub val_iou: f32,
}

/// CSV 表头, 与 [`EpochRecord`] 的字段顺序一致.
pub const CSV_HEADER: &str = "epoch,lr,loss,deep1,deep2,dice,iou,val_loss,val_dice,val_iou";

/// 单折的 CSV 日志. 每次追加记录后整体重写文件.
#[derive(Clone, Debug)]
pub struct CsvLog {
    path: PathBuf,
    rows: Vec<EpochRecord>,
}

impl CsvLog {
    /// 日志文件名: `{name}_fold-{k}_log.csv`.
    pub fn file_name(name: &str, k: usize) -> String {
        format!("{name}_fold-{k}_log.csv")
    }

    /// 在 `dir` 下为第 `k` 折创建日志. 此时不写文件.
    pub fn new<P: AsRef<Path>>(dir: P, name: &str, k: usize) -> Self {
        Self {
            path: dir.as_ref().join(Self::file_name(name, k)),
            rows: Vec::new(),
        }
    }

    /// 文件路径.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 已有记录.
    #[inline]
    pub fn rows(&self) -> &[EpochRecord] {
        &self.rows
    }

    /// 追加一轮记录并重写文件.
    pub fn push(&mut self, record: EpochRecord) -> Result<(), csv::Error> {
        self.rows.push(record);
        let mut w = csv::Writer::from_path(&self.path)?;
        for row in self.rows.iter() {
            w.serialize(row)?;
        }
        w.flush()?;
        Ok(())
    }

    /// 取出所有记录.
    #[inline]
    pub fn into_rows(self) -> Vec<EpochRecord> {
        self.rows
    }
}

#[inline]
fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// 纯文本运行日志, 每行带 unix 时间戳.
#[derive(Debug)]
pub struct RunLog {
    path: PathBuf,
    w: BufWriter<File>,
}

impl RunLog {
    /// 在 `dir` 下创建 `{name}_{unix 秒}.log`.
    pub fn create<P: AsRef<Path>>(dir: P, name: &str) -> io::Result<Self> {
        let path = dir.as_ref().join(format!("{name}_{}.log", unix_secs()));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            w: BufWriter::new(file),
        })
    }

    /// 文件路径.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 写入一行并立即刷新.
    pub fn line(&mut self, msg: &str) -> io::Result<()> {
        writeln!(self.w, "[{}] {msg}", unix_secs())?;
        self.w.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_avg_meter() {
        let mut m = AvgMeter::default();
        assert_eq!(m.avg(), 0.0);
        m.update(1.0, 1);
        m.update(4.0, 3);
        assert_eq!(m.count(), 4);
        assert!((m.avg() - 3.25).abs() < 1e-6);
    }

    #[test]
    fn test_csv_log_rewrites() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = CsvLog::new(dir.path(), "exp", 2);
        assert!(log.path().ends_with("exp_fold-2_log.csv"));

        log.push(EpochRecord::default()).unwrap();
        log.push(EpochRecord {
            epoch: 1,
            lr: 0.5,
            val_iou: 0.25,
            ..Default::default()
        })
        .unwrap();

        let text = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert_eq!(text.lines().next(), Some(CSV_HEADER));

        let mut reader = csv::Reader::from_path(log.path()).unwrap();
        let back: Vec<EpochRecord> = reader.deserialize().map(Result::unwrap).collect();
        assert_eq!(back, log.rows());
        assert_eq!(back[1].lr, 0.5);
        assert_eq!(back[1].val_iou, 0.25);
    }

    #[test]
    fn test_run_log() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = RunLog::create(dir.path(), "exp").unwrap();
        log.line("hello").unwrap();
        log.line("world").unwrap();
        let text = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.lines().last().unwrap().ends_with("] world"));
    }
}
