//! 训练结果.

use grf_berry::train::FoldSummary;
use std::io::{self, Write};

/// 将单折结果写进 `w` 中.
fn describe_into<W: Write>(f: &FoldSummary, w: &mut W) -> io::Result<()> {
    const S4: &str = "    ";

    writeln!(w, "Fold {}:", f.k)?;
    writeln!(w, "{S4}Epochs: {}", f.records.len())?;
    match f.best_epoch {
        Some(e) => writeln!(w, "{S4}Best val IoU: {:.6} (epoch {e})", f.best_val_iou)?,
        None => writeln!(w, "{S4}Best val IoU: /")?,
    }
    if let Some(last) = f.records.last() {
        writeln!(w, "{S4}Last val Dice: {:.6}", last.val_dice)?;
        writeln!(w, "{S4}Last val loss: {:.6}", last.val_loss)?;
        write!(w, "{S4}Last train loss: {:.6}", last.loss)?;
    } else {
        write!(w, "{S4}No epoch recorded")?;
    }
    Ok(())
}

/// 训练最终结果.
pub struct TrainResult {
    name: String,
    folds: Vec<FoldSummary>,
}

impl TrainResult {
    pub fn new(name: String, folds: Vec<FoldSummary>) -> Self {
        Self { name, folds }
    }

    /// 各折最佳验证 IoU 的均值.
    fn mean_best(&self) -> Option<f32> {
        if self.folds.is_empty() {
            return None;
        }
        Some(self.folds.iter().map(|f| f.best_val_iou).sum::<f32>() / self.folds.len() as f32)
    }

    /// 打印运行结果.
    pub fn analyze(&self) {
        utils::sep();
        let mut buf = Vec::with_capacity(512);

        for fold in self.folds.iter() {
            // 写入 `Vec<u8>`, 该操作不会生成 `Err`, 可直接 unwrap.
            describe_into(fold, &mut buf).unwrap();
            println!("{}", String::from_utf8_lossy(&buf));
            buf.clear();

            utils::sep();
        }
        if let Some(m) = self.mean_best() {
            println!("`{}`: mean best val IoU over {} folds: {m:.6}", self.name, self.folds.len());
        }
    }
}
