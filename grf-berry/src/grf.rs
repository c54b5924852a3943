//! 高斯随机场 (GRF) 辅助图像生成.
//!
//! 每位患者的一个元数据取值决定功率谱指数 `alpha`, 再以该元数据类型固定的种子生成白噪声,
//! 在频域乘以幅度谱 `sqrt(k^alpha)` 后逆变换回空间域, 取实部并线性拉伸到 8-bit 灰度.
//! 同一类型、同一取值的 GRF 图像总是完全相同.

use crate::consts::GRF_SIZE;
use crate::imgproc::{GrayArray, ImgWriteRaw};
use itertools::{Itertools, MinMaxResult};
use ndarray::{Array2, Axis};
use ordered_float::OrderedFloat;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};
use rustfft::num_complex::Complex64;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// GRF 生成错误.
#[derive(Debug, thiserror::Error)]
pub enum GrfError {
    /// 读取或解析元数据表失败.
    #[error("failed to read metadata {}: {source}", path.display())]
    Csv {
        /// 文件路径.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: csv::Error,
    },

    /// 元数据表缺少指定的列.
    #[error("metadata has no column `{0}`")]
    MissingColumn(String),

    /// 元数据取值无法解析为浮点数.
    #[error("line {line}: `{value}` is not a number")]
    BadValue {
        /// 该记录起始的行号 (从 1 开始, 含表头).
        line: usize,
        /// 原始文本.
        value: String,
    },

    /// 保存图像失败.
    #[error("failed to save {}: {source}", path.display())]
    Save {
        /// 文件路径.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: image::ImageError,
    },
}

/// 元数据类型. 每种类型有固定的随机种子.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetadataKind {
    /// 出生日期 (归一化后为多值变量).
    Dob,
    /// 性别 (二值变量).
    Gender,
    /// 髋关节发育不良 (二值变量).
    Hdd,
}

impl MetadataKind {
    /// 该类型固定的随机种子.
    pub const fn seed(self) -> u64 {
        match self {
            Self::Dob => 76539635,
            Self::Gender => 88118546,
            Self::Hdd => 41094303,
        }
    }

    /// 元数据表中默认的取值列名.
    pub const fn default_column(self) -> &'static str {
        match self {
            Self::Dob => "dob_norm",
            Self::Gender => "gender_norm",
            Self::Hdd => "hdd_norm",
        }
    }

    /// 是否为二值变量. 二值变量直接使用取值, 多值变量只使用取值的小数部分.
    pub const fn is_binary(self) -> bool {
        !matches!(self, Self::Dob)
    }
}

/// GRF 强度 `π`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Intensity {
    /// `π = 2`.
    Two,
    /// `π = 5`.
    Five,
}

impl Intensity {
    /// 数值.
    pub const fn value(self) -> f64 {
        match self {
            Self::Two => 2.0,
            Self::Five => 5.0,
        }
    }
}

/// 一次 GRF 生成任务的全部参数.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GrfSpec {
    /// 元数据类型, 决定种子.
    pub kind: MetadataKind,
    /// 强度.
    pub intensity: Intensity,
    /// 是否按二值变量计算指数. 默认由 `kind` 决定.
    pub binary: bool,
    /// 元数据表中的取值列名.
    pub column: String,
    /// 输出图像尺寸 `(高, 宽)`.
    pub size: (usize, usize),
}

impl GrfSpec {
    /// 以 `kind` 的默认列名和默认尺寸构造.
    pub fn new(kind: MetadataKind, intensity: Intensity) -> Self {
        Self {
            kind,
            intensity,
            binary: kind.is_binary(),
            column: kind.default_column().to_owned(),
            size: GRF_SIZE,
        }
    }

    /// 由元数据取值计算功率谱指数.
    ///
    /// 二值变量: `-|π + v|`; 多值变量: `-|π + frac(v)|`.
    pub fn exponent(&self, value: f64) -> f64 {
        let v = if self.binary { value } else { value.fract() };
        -(self.intensity.value() + v).abs()
    }

    /// 生成取值为 `value` 的 8-bit GRF 图像.
    pub fn render(&self, value: f64) -> GrayArray {
        let mut rng = ChaCha8Rng::seed_from_u64(self.kind.seed());
        let field = gaussian_random_field(self.exponent(value), self.size, &mut rng);
        to_gray(&field)
    }
}

/// 频率索引: `[0, 1, ..., n/2, -(n/2 - 1), ..., -1]`.
///
/// `n` 为奇数时返回值长度为 `n - 1`.
pub fn fft_ind_gen(n: usize) -> Vec<i64> {
    let half = (n / 2) as i64;
    (0..=half).chain((1..half).rev().map(|i| -i)).collect()
}

/// 幅度谱 `sqrt(k^alpha)`, 其中 `k = sqrt(kx^2 + ky^2)`; 原点处为 0.
pub fn amplitude(alpha: f64, (h, w): (usize, usize)) -> Array2<f64> {
    let mut amp = Array2::zeros((h, w));
    for (i, kx) in fft_ind_gen(h).into_iter().enumerate() {
        for (j, ky) in fft_ind_gen(w).into_iter().enumerate() {
            if kx == 0 && ky == 0 {
                continue;
            }
            let k = ((kx * kx + ky * ky) as f64).sqrt();
            amp[(i, j)] = k.powf(alpha).sqrt();
        }
    }
    amp
}

/// 原地二维 FFT. 逆变换按 `1 / (h * w)` 归一化.
pub(crate) fn fft2(data: &mut Array2<Complex64>, inverse: bool) {
    let (h, w) = data.dim();
    if h == 0 || w == 0 {
        return;
    }
    let mut planner = FftPlanner::<f64>::new();
    let plan = |n: usize, planner: &mut FftPlanner<f64>| {
        if inverse {
            planner.plan_fft_inverse(n)
        } else {
            planner.plan_fft_forward(n)
        }
    };

    let row_fft = plan(w, &mut planner);
    let mut buf = vec![Complex64::default(); w.max(h)];
    for mut row in data.axis_iter_mut(Axis(0)) {
        buf[..w].iter_mut().zip(row.iter()).for_each(|(b, &v)| *b = v);
        row_fft.process(&mut buf[..w]);
        row.iter_mut().zip(buf[..w].iter()).for_each(|(v, &b)| *v = b);
    }

    let col_fft = plan(h, &mut planner);
    for mut col in data.axis_iter_mut(Axis(1)) {
        buf[..h].iter_mut().zip(col.iter()).for_each(|(b, &v)| *b = v);
        col_fft.process(&mut buf[..h]);
        col.iter_mut().zip(buf[..h].iter()).for_each(|(v, &b)| *v = b);
    }

    if inverse {
        let norm = 1.0 / (h * w) as f64;
        data.mapv_inplace(|v| v * norm);
    }
}

/// 生成功率谱为 `k^alpha` 的高斯随机场 (实部).
pub fn gaussian_random_field<R: rand::Rng + ?Sized>(
    alpha: f64,
    size: (usize, usize),
    rng: &mut R,
) -> Array2<f64> {
    let mut spectrum =
        Array2::from_shape_simple_fn(size, || Complex64::new(StandardNormal.sample(rng), 0.0));
    fft2(&mut spectrum, false);
    spectrum.zip_mut_with(&amplitude(alpha, size), |s, &a| *s *= a);
    fft2(&mut spectrum, true);
    spectrum.mapv(|c| c.re)
}

/// 线性拉伸到 `[0, 255]`. 常数场输出全零.
pub fn to_gray(field: &Array2<f64>) -> GrayArray {
    let (lo, hi) = match field.iter().map(|&v| OrderedFloat(v)).minmax() {
        MinMaxResult::MinMax(lo, hi) => (lo.0, hi.0),
        _ => return GrayArray::zeros(field.dim()),
    };
    let span = hi - lo;
    if !(span.is_finite() && span > 0.0) {
        return GrayArray::zeros(field.dim());
    }
    field.mapv(|v| ((v - lo) / span * 255.0).round().clamp(0.0, 255.0) as u8)
}

/// 读取元数据表, 返回 `(image 列, column 列的数值)` 列表.
///
/// 字段可用双引号包裹 (可含逗号与换行); 空行被忽略; 字段两端空白被去除.
pub fn read_metadata<P: AsRef<Path>>(path: P, column: &str) -> Result<Vec<(String, f64)>, GrfError> {
    let path = path.as_ref();
    let csv_err = |source: csv::Error| GrfError::Csv {
        path: path.to_owned(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(csv_err)?;
    let header = reader.headers().map_err(csv_err)?.clone();
    let find = |name: &str| {
        header
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| GrfError::MissingColumn(name.to_owned()))
    };
    let (image_col, value_col) = (find("image")?, find(column)?);

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_err)?;
        let raw = record.get(value_col).unwrap_or_default();
        let value = raw.parse::<f64>().map_err(|_| GrfError::BadValue {
            line: record.position().map_or(0, |p| p.line() as usize),
            value: raw.to_owned(),
        })?;
        rows.push((record.get(image_col).unwrap_or_default().to_owned(), value));
    }
    Ok(rows)
}

/// 输出文件名: 将 `.jpg` 替换为 `.png`.
pub fn output_name(image: &str) -> String {
    image.replace(".jpg", ".png")
}

/// 为元数据表的每一行生成 GRF 图像并保存到 `out_dir`. 返回生成的图像数.
pub fn generate_from_csv<P: AsRef<Path>, Q: AsRef<Path>>(
    csv: P,
    out_dir: Q,
    spec: &GrfSpec,
) -> Result<usize, GrfError> {
    let rows = read_metadata(csv, &spec.column)?;
    let out_dir = out_dir.as_ref();
    for (image, value) in rows.iter() {
        let path = out_dir.join(output_name(image));
        log::info!("processing: {} (alpha = {})", path.display(), spec.exponent(*value));
        spec.render(*value)
            .save_raw(&path)
            .map_err(|source| GrfError::Save { path, source })?;
    }
    Ok(rows.len())
}
