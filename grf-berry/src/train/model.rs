//! 分割模型接口与内置的参考模型.
//!
//! 训练循环只通过 [`Segmenter`] 与模型交互: 前向得到 4 个输出头的 logits,
//! 反向时由调用方给出各输出头的梯度, 模型把参数梯度累加到扁平缓冲区中.

use crate::consts::CHANNELS;
use ndarray::{s, Array4, ArrayView4};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

/// 输出头的个数: 主输出, 两个深监督输出, 边界输出.
pub const N_HEADS: usize = 4;

/// 4 个输出头, 每个都是 `(B, 1, H, W)` 的 logits.
#[derive(Clone, Debug)]
pub struct Heads {
    /// 主输出.
    pub main: Array4<f32>,
    /// 第一个深监督输出.
    pub deep1: Array4<f32>,
    /// 第二个深监督输出.
    pub deep2: Array4<f32>,
    /// 边界输出.
    pub boundary: Array4<f32>,
}

impl Heads {
    /// 按 `main, deep1, deep2, boundary` 的顺序借用.
    pub fn as_array(&self) -> [&Array4<f32>; N_HEADS] {
        [&self.main, &self.deep1, &self.deep2, &self.boundary]
    }

    fn from_array([main, deep1, deep2, boundary]: [Array4<f32>; N_HEADS]) -> Self {
        Self {
            main,
            deep1,
            deep2,
            boundary,
        }
    }
}

/// 解码器种类.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decoder {
    /// 每个输出头是一个独立的 `k x k` 卷积.
    ConvHeads,
}

impl FromStr for Decoder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "heads" | "conv" => Ok(Self::ConvHeads),
            _ => Err(s.to_owned()),
        }
    }
}

impl fmt::Display for Decoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConvHeads => f.write_str("heads"),
        }
    }
}

/// 模型结构描述. 与参数一起保存在检查点中.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// 解码器.
    pub decoder: Decoder,
    /// 卷积核边长, 必须为正奇数.
    pub kernel: usize,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self {
            decoder: Decoder::ConvHeads,
            kernel: 3,
        }
    }
}

impl ModelSpec {
    /// 参数个数.
    pub fn n_params(&self) -> usize {
        match self.decoder {
            Decoder::ConvHeads => N_HEADS * (CHANNELS * self.kernel * self.kernel + 1),
        }
    }

    /// 以 `seed` 初始化一个模型.
    pub fn build(&self, seed: u64) -> Box<dyn Segmenter> {
        match self.decoder {
            Decoder::ConvHeads => Box::new(ConvHeads::new(self.kernel, seed)),
        }
    }
}

/// 可训练的分割模型.
pub trait Segmenter: Send + Sync {
    /// 结构描述.
    fn spec(&self) -> ModelSpec;

    /// 前向. `input` 形状为 `(B, 4, H, W)`.
    fn forward(&self, input: ArrayView4<f32>) -> Heads;

    /// 反向. 将参数梯度 **累加** 到 `param_grads` 中.
    ///
    /// `param_grads` 的长度必须等于参数个数.
    fn backward(&self, input: ArrayView4<f32>, grads: &Heads, param_grads: &mut [f32]);

    /// 扁平参数.
    fn params(&self) -> &[f32];

    /// 可变扁平参数.
    fn params_mut(&mut self) -> &mut [f32];
}

/// 参考模型: 4 个独立的单层卷积输出头, 零填充, 保持空间尺寸.
///
/// 每个输出头的参数布局为 `[weight (C * k * k, 行优先 c, ky, kx), bias]`.
#[derive(Clone, Debug)]
pub struct ConvHeads {
    kernel: usize,
    params: Vec<f32>,
}

/// 偏移为 `d` 时, 长度为 `n` 的输出区间与对应的输入区间.
#[inline]
fn shifted(n: usize, d: isize) -> (Range<usize>, Range<usize>) {
    let lo = (-d).max(0) as usize;
    let hi = (n as isize - d).clamp(0, n as isize) as usize;
    let lo = lo.min(hi);
    let (in_lo, in_hi) = ((lo as isize + d) as usize, (hi as isize + d) as usize);
    (lo..hi, in_lo..in_hi)
}

impl ConvHeads {
    /// 以 He 正态分布初始化权重, 偏置为 0.
    ///
    /// `kernel` 必须为正奇数, 否则程序 panic.
    pub fn new(kernel: usize, seed: u64) -> Self {
        assert!(kernel % 2 == 1, "卷积核边长必须为正奇数");
        let spec = ModelSpec {
            decoder: Decoder::ConvHeads,
            kernel,
        };
        let per_head = CHANNELS * kernel * kernel;
        let std = (2.0 / per_head as f32).sqrt();
        // `std` 为正且有限, 该操作不会生成 `Err`, 可直接 unwrap.
        let normal = Normal::new(0.0, std).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let mut params = Vec::with_capacity(spec.n_params());
        for _ in 0..N_HEADS {
            params.extend((0..per_head).map(|_| normal.sample(&mut rng)));
            params.push(0.0);
        }
        Self { kernel, params }
    }

    #[inline]
    fn per_head(&self) -> usize {
        CHANNELS * self.kernel * self.kernel + 1
    }

    /// 枚举 `(参数下标偏移, c, dy, dx)`.
    fn taps(&self) -> impl Iterator<Item = (usize, usize, isize, isize)> + '_ {
        let k = self.kernel;
        let r = (k / 2) as isize;
        (0..CHANNELS).flat_map(move |c| {
            (0..k).flat_map(move |ky| {
                (0..k).map(move |kx| ((c * k + ky) * k + kx, c, ky as isize - r, kx as isize - r))
            })
        })
    }

    fn forward_head(&self, head: usize, input: &ArrayView4<f32>) -> Array4<f32> {
        let (b, c, h, w) = input.dim();
        assert_eq!(c, CHANNELS, "输入必须是 {CHANNELS} 通道");
        let p = &self.params[head * self.per_head()..(head + 1) * self.per_head()];
        let bias = p[p.len() - 1];
        let mut out = Array4::from_elem((b, 1, h, w), bias);
        for (i, ch, dy, dx) in self.taps() {
            let ((oy, iy), (ox, ix)) = (shifted(h, dy), shifted(w, dx));
            for n in 0..b {
                out.slice_mut(s![n, 0, oy.clone(), ox.clone()])
                    .scaled_add(p[i], &input.slice(s![n, ch, iy.clone(), ix.clone()]));
            }
        }
        out
    }

    fn backward_head(&self, head: usize, input: &ArrayView4<f32>, grad: &Array4<f32>, out: &mut [f32]) {
        let (b, _, h, w) = input.dim();
        assert_eq!(grad.dim(), (b, 1, h, w), "梯度形状不符");
        let per_head = self.per_head();
        let g = &mut out[head * per_head..(head + 1) * per_head];
        g[per_head - 1] += grad.sum();
        for (i, ch, dy, dx) in self.taps() {
            let ((oy, iy), (ox, ix)) = (shifted(h, dy), shifted(w, dx));
            let mut acc = 0f32;
            for n in 0..b {
                let go = grad.slice(s![n, 0, oy.clone(), ox.clone()]);
                let xi = input.slice(s![n, ch, iy.clone(), ix.clone()]);
                acc += ndarray::Zip::from(&go).and(&xi).fold(0.0, |a, &g, &x| a + g * x);
            }
            g[i] += acc;
        }
    }
}

impl Segmenter for ConvHeads {
    fn spec(&self) -> ModelSpec {
        ModelSpec {
            decoder: Decoder::ConvHeads,
            kernel: self.kernel,
        }
    }

    fn forward(&self, input: ArrayView4<f32>) -> Heads {
        Heads::from_array(std::array::from_fn(|head| self.forward_head(head, &input)))
    }

    fn backward(&self, input: ArrayView4<f32>, grads: &Heads, param_grads: &mut [f32]) {
        assert_eq!(param_grads.len(), self.params.len(), "参数梯度个数不符");
        for (head, g) in grads.as_array().into_iter().enumerate() {
            self.backward_head(head, &input, g, param_grads);
        }
    }

    fn params(&self) -> &[f32] {
        &self.params
    }

    fn params_mut(&mut self) -> &mut [f32] {
        &mut self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    #[test]
    fn test_shifted() {
        assert_eq!(shifted(5, 0), (0..5, 0..5));
        assert_eq!(shifted(5, 1), (0..4, 1..5));
        assert_eq!(shifted(5, -1), (1..5, 0..4));
        assert_eq!(shifted(2, 3), (0..0, 3..3));
    }

    #[test]
    fn test_identity_kernel() {
        let mut m = ConvHeads::new(3, 1);
        m.params_mut().iter_mut().for_each(|p| *p = 0.0);
        // 主输出头: 通道 1 的中心抽头为 1, 偏置为 0.5.
        let per_head = m.per_head();
        m.params_mut()[(3 + 1) * 3 + 1] = 1.0;
        m.params_mut()[per_head - 1] = 0.5;

        let input = Array::from_shape_fn((2, 4, 3, 5), |(b, c, y, x)| (b * 100 + c * 10 + y * 5 + x) as f32);
        let heads = m.forward(input.view());
        assert_eq!(heads.main.dim(), (2, 1, 3, 5));
        for ((b, _, y, x), &v) in heads.main.indexed_iter() {
            assert_eq!(v, input[(b, 1, y, x)] + 0.5);
        }
        assert!(heads.deep1.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_backward_matches_finite_difference() {
        let m = ConvHeads::new(3, 7);
        let input = Array::from_shape_fn((1, 4, 4, 4), |(_, c, y, x)| ((c + 2 * y + 3 * x) % 5) as f32 * 0.1);
        // L = Σ over all heads of Σ w_h * out_h, 其中 w_h 为固定权重图.
        let weights = Array::from_shape_fn((1, 1, 4, 4), |(_, _, y, x)| (y as f32 - x as f32) * 0.1);
        let loss = |m: &ConvHeads| -> f32 {
            m.forward(input.view())
                .as_array()
                .iter()
                .map(|o| (*o * &weights).sum())
                .sum()
        };
        let grads = Heads::from_array(std::array::from_fn(|_| weights.clone()));
        let mut analytic = vec![0.0; m.params().len()];
        m.backward(input.view(), &grads, &mut analytic);

        let eps = 1e-2;
        for i in [0, 4, 13, 36, 37, 60, m.params().len() - 1] {
            let mut plus = m.clone();
            plus.params_mut()[i] += eps;
            let mut minus = m.clone();
            minus.params_mut()[i] -= eps;
            let numeric = (loss(&plus) - loss(&minus)) / (2.0 * eps);
            assert!((numeric - analytic[i]).abs() < 1e-3, "{i}: {numeric} vs {}", analytic[i]);
        }
    }

    #[test]
    fn test_spec_and_build() {
        let spec = ModelSpec::default();
        let m = spec.build(3);
        assert_eq!(m.spec(), spec);
        assert_eq!(m.params().len(), spec.n_params());
        assert_eq!(spec.build(3).params(), m.params());
        assert_eq!("heads".parse::<Decoder>(), Ok(Decoder::ConvHeads));
        assert!("lawin".parse::<Decoder>().is_err());
    }
}
