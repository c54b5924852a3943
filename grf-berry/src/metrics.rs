//! 分割结果评估.
//!
//! 对每个样本比较真值 (source) 与预测 (target) 标签, 计算 7 项重叠度量,
//! 并在整个测试集上取平均.
//!
//! 两张标签都非空时, 每个非零像素值都被视为一个独立标签, 度量取所有标签的汇总值:
//!
//! | 度量 | 公式 |
//! |------|------|
//! | UO / JC | `Σ|S∩T| / Σ|S∪T|` |
//! | MO / DC | `2Σ|S∩T| / Σ(|S|+|T|)` |
//! | VS | `2Σ(|S|-|T|) / Σ(|S|+|T|)` |
//! | FNE | `Σ|T\S| / Σ|T|` |
//! | FPE | `Σ|S\T| / Σ|S|` |

use crate::imgproc::{load_gray, GrayArray};
use crate::Idx2d;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// 评估错误.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// 文件系统错误.
    #[error("{}: {source}", path.display())]
    Io {
        /// 出错的路径.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: std::io::Error,
    },

    /// 读取标签失败.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        /// 文件路径.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: image::ImageError,
    },

    /// 真值与预测尺寸不同, 无法计算重叠度量.
    #[error("segmentations failed to overlap: size {gt:?} vs {pred:?}")]
    ShapeMismatch {
        /// 真值尺寸.
        gt: Idx2d,
        /// 预测尺寸.
        pred: Idx2d,
    },

    /// 没有任何样本.
    #[error("no ground truth masks found")]
    EmptyCorpus,

    /// 序列化报告失败.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// 写 CSV 报告失败.
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

/// 7 项重叠度量.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OverlapMeasures {
    /// 假阴性误差.
    #[serde(rename = "FalseNegativeError")]
    pub fne: f64,
    /// 假阳性误差.
    #[serde(rename = "FalsePositiveError")]
    pub fpe: f64,
    /// 平均重叠度.
    #[serde(rename = "MeanOverlap")]
    pub mo: f64,
    /// 并集重叠度.
    #[serde(rename = "UnionOverlap")]
    pub uo: f64,
    /// 体积相似度.
    #[serde(rename = "VolumeSimilarity")]
    pub vs: f64,
    /// Jaccard 系数.
    #[serde(rename = "JaccardCoefficient")]
    pub jc: f64,
    /// Dice 系数.
    #[serde(rename = "DiceCoefficient")]
    pub dc: f64,
}

impl OverlapMeasures {
    /// 真值与预测都为空时的取值.
    pub const BOTH_EMPTY: Self = Self {
        fne: 0.0,
        fpe: 0.0,
        mo: 1.0,
        uo: 1.0,
        vs: 0.0,
        jc: 1.0,
        dc: 1.0,
    };

    /// 恰有一方为空 (或无法计算) 时的取值.
    pub const ONE_EMPTY: Self = Self {
        fne: 1.0,
        fpe: 1.0,
        mo: 0.0,
        uo: 0.0,
        vs: 1.0,
        jc: 0.0,
        dc: 0.0,
    };

    fn as_array(&self) -> [f64; 7] {
        [self.fne, self.fpe, self.mo, self.uo, self.vs, self.jc, self.dc]
    }

    fn from_array([fne, fpe, mo, uo, vs, jc, dc]: [f64; 7]) -> Self {
        Self {
            fne,
            fpe,
            mo,
            uo,
            vs,
            jc,
            dc,
        }
    }

    /// 逐项算术平均. `items` 为空时返回 `None`.
    pub fn mean<'a, I: IntoIterator<Item = &'a Self>>(items: I) -> Option<Self> {
        let mut sum = [0f64; 7];
        let mut n = 0usize;
        for m in items {
            sum.iter_mut().zip(m.as_array()).for_each(|(s, v)| *s += v);
            n += 1;
        }
        (n > 0).then(|| Self::from_array(sum.map(|s| s / n as f64)))
    }
}

/// 标签解释方式.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabelMode {
    /// 每个非零像素值都是一个标签.
    #[default]
    MultiLabel,
    /// 以 `0.5 * 255` 为门限二值化后再计算.
    Binary,
}

impl LabelMode {
    fn prepare(self, img: GrayArray) -> GrayArray {
        match self {
            Self::MultiLabel => img,
            Self::Binary => img.mapv(|p| u8::from(f32::from(p) / 255.0 > 0.5)),
        }
    }
}

/// 在两张都非空的标签上计算多标签汇总重叠度量.
pub fn overlap(source: &GrayArray, target: &GrayArray) -> Result<OverlapMeasures, MetricsError> {
    if source.dim() != target.dim() {
        return Err(MetricsError::ShapeMismatch {
            gt: source.dim(),
            pred: target.dim(),
        });
    }
    let (mut s, mut t, mut inter) = ([0u64; 256], [0u64; 256], [0u64; 256]);
    for (&a, &b) in source.iter().zip(target.iter()) {
        s[a as usize] += 1;
        t[b as usize] += 1;
        if a == b {
            inter[a as usize] += 1;
        }
    }
    // 背景 (标签 0) 不参与汇总.
    let total = |h: &[u64; 256]| h[1..].iter().sum::<u64>() as f64;
    let (ss, tt, ii) = (total(&s), total(&t), total(&inter));
    let union = ss + tt - ii;

    Ok(OverlapMeasures {
        fne: (tt - ii) / tt,
        fpe: (ss - ii) / ss,
        mo: 2.0 * ii / (ss + tt),
        uo: ii / union,
        vs: 2.0 * (ss - tt) / (ss + tt),
        jc: ii / union,
        dc: 2.0 * ii / (ss + tt),
    })
}

/// 评估一个样本. 无法计算重叠度量时记录警告并返回 [`OverlapMeasures::ONE_EMPTY`].
pub fn score_case(name: &str, gt: &GrayArray, pred: &GrayArray) -> OverlapMeasures {
    let gt_empty = gt.iter().all(|&p| p == 0);
    let pred_empty = pred.iter().all(|&p| p == 0);
    match (gt_empty, pred_empty) {
        (true, true) => OverlapMeasures::BOTH_EMPTY,
        (true, false) | (false, true) => OverlapMeasures::ONE_EMPTY,
        (false, false) => overlap(gt, pred).unwrap_or_else(|e| {
            log::warn!("{name}: {e}");
            OverlapMeasures::ONE_EMPTY
        }),
    }
}

/// 单个样本的评估结果.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CaseScore {
    /// 文件名.
    pub name: String,
    /// 度量.
    pub measures: OverlapMeasures,
}

/// 整个测试集的评估结果.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricsReport {
    /// 各样本结果, 按文件名排序.
    pub cases: Vec<CaseScore>,
    /// 平均值.
    pub aggregates: OverlapMeasures,
}

/// `metrics.csv` 中的一行.
#[derive(Serialize)]
#[serde(rename_all = "UPPERCASE")]
struct CsvRow<'a> {
    #[serde(rename = "name")]
    name: &'a str,
    fne: f64,
    fpe: f64,
    mo: f64,
    uo: f64,
    vs: f64,
    jc: f64,
    dc: f64,
}

impl<'a> From<&'a CaseScore> for CsvRow<'a> {
    fn from(c: &'a CaseScore) -> Self {
        let m = &c.measures;
        Self {
            name: &c.name,
            fne: m.fne,
            fpe: m.fpe,
            mo: m.mo,
            uo: m.uo,
            vs: m.vs,
            jc: m.jc,
            dc: m.dc,
        }
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    case: serde_json::Map<String, serde_json::Value>,
    aggregates: &'a OverlapMeasures,
}

impl MetricsReport {
    /// 由各样本结果汇总. 没有样本时返回 [`MetricsError::EmptyCorpus`].
    pub fn from_cases(cases: Vec<CaseScore>) -> Result<Self, MetricsError> {
        let aggregates =
            OverlapMeasures::mean(cases.iter().map(|c| &c.measures)).ok_or(MetricsError::EmptyCorpus)?;
        Ok(Self { cases, aggregates })
    }

    /// `{"case": {}, "aggregates": {...}}` 格式的 JSON 文本.
    pub fn to_json(&self) -> Result<String, MetricsError> {
        let report = JsonReport {
            case: serde_json::Map::new(),
            aggregates: &self.aggregates,
        };
        Ok(serde_json::to_string(&report)?)
    }

    /// 将各样本结果以 CSV 格式 (表头 `name,FNE,FPE,MO,UO,VS,JC,DC`) 写入 `w`.
    pub fn describe_into<W: Write>(&self, w: W) -> Result<(), csv::Error> {
        let mut w = csv::Writer::from_writer(w);
        for c in self.cases.iter() {
            w.serialize(CsvRow::from(c))?;
        }
        w.flush()?;
        Ok(())
    }

    /// 在 `dir` 下写出 `metrics.json` 和 `metrics.csv`. `dir` 不存在时自动创建.
    pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<(), MetricsError> {
        let dir = dir.as_ref();
        let io = |path: &Path| {
            let path = path.to_owned();
            move |source| MetricsError::Io { path, source }
        };
        std::fs::create_dir_all(dir).map_err(io(dir))?;

        let json = dir.join("metrics.json");
        std::fs::write(&json, self.to_json()?).map_err(io(&json))?;

        let csv = dir.join("metrics.csv");
        self.describe_into(std::fs::File::create(&csv).map_err(io(&csv))?)?;
        Ok(())
    }
}

/// 评估 `gt_dir` 中的每个文件与 `pred_dir` 中的同名文件.
pub fn evaluate_dirs<P: AsRef<Path>, Q: AsRef<Path>>(
    gt_dir: P,
    pred_dir: Q,
    mode: LabelMode,
) -> Result<MetricsReport, MetricsError> {
    let (gt_dir, pred_dir) = (gt_dir.as_ref(), pred_dir.as_ref());
    let mut names = Vec::new();
    for entry in WalkDir::new(gt_dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| MetricsError::Io {
            path: gt_dir.to_owned(),
            source: e.into(),
        })?;
        if entry.file_type().is_file() {
            names.push(entry.file_name().to_owned());
        }
    }

    let read = |path: PathBuf| {
        load_gray(&path)
            .map(|img| mode.prepare(img))
            .map_err(|source| MetricsError::Read { path, source })
    };
    let mut cases = Vec::with_capacity(names.len());
    for name in names {
        let gt = read(gt_dir.join(&name))?;
        let pred = read(pred_dir.join(&name))?;
        let name = name.to_string_lossy().into_owned();
        let measures = score_case(&name, &gt, &pred);
        cases.push(CaseScore { name, measures });
    }
    let report = MetricsReport::from_cases(cases)?;
    log::info!(
        "evaluated {} cases: dice {:.4}, jaccard {:.4}",
        report.cases.len(),
        report.aggregates.dc,
        report.aggregates.jc
    );
    Ok(report)
}
