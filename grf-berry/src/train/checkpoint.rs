//! 模型检查点: bincode 序列化后以 zlib 压缩存储.

use super::model::{ModelSpec, Segmenter};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// 检查点读写错误.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// 文件读写失败.
    #[error("checkpoint io error on {}: {source}", path.display())]
    Io {
        /// 文件路径.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: std::io::Error,
    },

    /// 编解码失败.
    #[error("checkpoint codec error: {0}")]
    Codec(#[from] bincode::Error),

    /// 参数与模型结构不一致.
    #[error("checkpoint holds {found} parameters, model {spec:?} expects {expected}")]
    Mismatch {
        /// 模型结构.
        spec: ModelSpec,
        /// 模型需要的参数个数.
        expected: usize,
        /// 检查点中的参数个数.
        found: usize,
    },
}

/// 一个训练检查点.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// 模型结构.
    pub spec: ModelSpec,
    /// 模型参数.
    pub params: Vec<f32>,
    /// 参数滑动平均, 若有.
    pub ema: Option<Vec<f32>>,
    /// 保存时所在的轮次 (从 0 开始).
    pub epoch: usize,
    /// 保存时的验证 IoU.
    pub val_iou: f32,
}

impl Checkpoint {
    /// 从模型当前状态构造.
    pub fn of(model: &dyn Segmenter, ema: Option<&[f32]>, epoch: usize, val_iou: f32) -> Self {
        Self {
            spec: model.spec(),
            params: model.params().to_vec(),
            ema: ema.map(<[f32]>::to_vec),
            epoch,
            val_iou,
        }
    }

    fn check(&self) -> Result<(), CheckpointError> {
        let expected = self.spec.n_params();
        let lens = std::iter::once(self.params.len()).chain(self.ema.as_ref().map(Vec::len));
        for found in lens {
            if found != expected {
                return Err(CheckpointError::Mismatch {
                    spec: self.spec,
                    expected,
                    found,
                });
            }
        }
        Ok(())
    }

    /// 保存到 `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), CheckpointError> {
        let path = path.as_ref();
        let io_err = |source| CheckpointError::Io {
            path: path.to_owned(),
            source,
        };
        let file = File::create(path).map_err(io_err)?;
        let mut e = ZlibEncoder::new(BufWriter::new(file), Compression::best());
        bincode::serialize_into(&mut e, self)?;
        e.finish().map_err(io_err)?.flush().map_err(io_err)?;
        Ok(())
    }

    /// 从 `path` 读取, 并检查参数个数.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CheckpointError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| CheckpointError::Io {
            path: path.to_owned(),
            source,
        })?;
        let ckpt: Self = bincode::deserialize_from(ZlibDecoder::new(BufReader::new(file)))?;
        ckpt.check()?;
        Ok(ckpt)
    }

    /// 以检查点参数 (而非滑动平均) 覆盖 `model`. 结构不一致时返回错误.
    pub fn restore_into(&self, model: &mut dyn Segmenter) -> Result<(), CheckpointError> {
        let found = self.params.len();
        let expected = model.params().len();
        if self.spec != model.spec() || found != expected {
            return Err(CheckpointError::Mismatch {
                spec: model.spec(),
                expected,
                found,
            });
        }
        model.params_mut().copy_from_slice(&self.params);
        Ok(())
    }
}

/// 检查点文件名: `fold-{k}_{name}_{k+1},{k_fold}_val_iou_0.{⌊iou * 10000⌋}_epoch_{epoch}.ckpt`.
pub fn checkpoint_name(name: &str, k: usize, k_fold: usize, val_iou: f32, epoch: usize) -> String {
    let iou = (val_iou.clamp(0.0, 1.0) * 10000.0) as u32;
    format!("fold-{k}_{name}_{},{k_fold}_val_iou_0.{iou}_epoch_{epoch}.ckpt", k + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_name() {
        assert_eq!(
            checkpoint_name("grf", 0, 5, 0.81234, 7),
            "fold-0_grf_1,5_val_iou_0.8123_epoch_7.ckpt"
        );
        assert_eq!(
            checkpoint_name("x", 2, 3, 0.05, 0),
            "fold-2_x_3,3_val_iou_0.500_epoch_0.ckpt"
        );
    }

    #[test]
    fn test_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.ckpt");
        let model = ModelSpec::default().build(11);
        let ckpt = Checkpoint::of(model.as_ref(), Some(model.params()), 3, 0.5);
        ckpt.save(&path).unwrap();
        let back = Checkpoint::load(&path).unwrap();
        assert_eq!(back, ckpt);

        let mut other = ModelSpec::default().build(12);
        back.restore_into(other.as_mut()).unwrap();
        assert_eq!(other.params(), model.params());
    }

    #[test]
    fn test_mismatch() {
        let model = ModelSpec::default().build(1);
        let mut ckpt = Checkpoint::of(model.as_ref(), None, 0, 0.0);
        ckpt.params.pop();
        let mut m = ModelSpec::default().build(2);
        assert!(matches!(
            ckpt.restore_into(m.as_mut()),
            Err(CheckpointError::Mismatch { .. })
        ));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.ckpt");
        ckpt.save(&path).unwrap();
        assert!(matches!(Checkpoint::load(&path), Err(CheckpointError::Mismatch { .. })));
        assert!(matches!(
            Checkpoint::load(dir.path().join("missing.ckpt")),
            Err(CheckpointError::Io { .. })
        ));
    }
}
