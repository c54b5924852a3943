//! 优化器、学习率调度、损失缩放与参数滑动平均.
//!
//! 所有结构都直接作用于扁平的参数切片 `&mut [f32]`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 优化器种类.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizerKind {
    /// 带动量 (0.9) 的 SGD.
    Sgd,
    /// Adam.
    Adam,
    /// 解耦权重衰减 (1e-2) 的 Adam.
    AdamW,
}

impl FromStr for OptimizerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SGD" | "sgd" => Ok(Self::Sgd),
            "Adam" | "adam" => Ok(Self::Adam),
            "AdamW" | "adamw" => Ok(Self::AdamW),
            _ => Err(s.to_owned()),
        }
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sgd => "SGD",
            Self::Adam => "Adam",
            Self::AdamW => "AdamW",
        })
    }
}

const SGD_MOMENTUM: f32 = 0.9;
const ADAM_BETAS: (f32, f32) = (0.9, 0.999);
const ADAM_EPS: f32 = 1e-8;
const ADAMW_WEIGHT_DECAY: f32 = 1e-2;

/// 有状态的优化器.
#[derive(Clone, Debug)]
pub struct Optimizer {
    kind: OptimizerKind,
    /// SGD 的动量缓冲, 或 Adam 的一阶矩.
    m: Vec<f32>,
    /// Adam 的二阶矩. SGD 不使用.
    v: Vec<f32>,
    step: u32,
}

impl Optimizer {
    /// 为 `n_params` 个参数创建优化器.
    pub fn new(kind: OptimizerKind, n_params: usize) -> Self {
        let v = match kind {
            OptimizerKind::Sgd => Vec::new(),
            _ => vec![0.0; n_params],
        };
        Self {
            kind,
            m: vec![0.0; n_params],
            v,
            step: 0,
        }
    }

    /// 优化器种类.
    #[inline]
    pub fn kind(&self) -> OptimizerKind {
        self.kind
    }

    /// 以学习率 `lr` 更新一步.
    ///
    /// `params` 与 `grads` 的长度必须与创建时的参数个数相同, 否则程序 panic.
    pub fn step(&mut self, params: &mut [f32], grads: &[f32], lr: f32) {
        assert_eq!(params.len(), self.m.len(), "参数个数不符");
        assert_eq!(grads.len(), self.m.len(), "梯度个数不符");
        self.step += 1;

        match self.kind {
            OptimizerKind::Sgd => {
                for ((p, &g), buf) in params.iter_mut().zip(grads).zip(self.m.iter_mut()) {
                    *buf = SGD_MOMENTUM * *buf + g;
                    *p -= lr * *buf;
                }
            }
            OptimizerKind::Adam | OptimizerKind::AdamW => {
                let (b1, b2) = ADAM_BETAS;
                let t = self.step as i32;
                let (c1, c2) = (1.0 - b1.powi(t), 1.0 - b2.powi(t));
                let decay = if self.kind == OptimizerKind::AdamW {
                    ADAMW_WEIGHT_DECAY
                } else {
                    0.0
                };
                for (((p, &g), m), v) in params
                    .iter_mut()
                    .zip(grads)
                    .zip(self.m.iter_mut())
                    .zip(self.v.iter_mut())
                {
                    *p -= lr * decay * *p;
                    *m = b1 * *m + (1.0 - b1) * g;
                    *v = b2 * *v + (1.0 - b2) * g * g;
                    let m_hat = *m / c1;
                    let v_hat = *v / c2;
                    *p -= lr * m_hat / (v_hat.sqrt() + ADAM_EPS);
                }
            }
        }
    }
}

/// 余弦学习率系数: `1.001 + cos(epoch * π / epochs)`.
#[inline]
pub fn lr_lambda(epoch: usize, epochs: usize) -> f64 {
    1.001 + (epoch as f64 * std::f64::consts::PI / epochs.max(1) as f64).cos()
}

/// 损失缩放器.
///
/// 梯度按当前缩放系数放大; 更新前缩回原值. 出现非有限梯度时跳过本次更新并将系数减半,
/// 连续 `growth_interval` 次正常更新后系数翻倍.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GradScaler {
    scale: f32,
    growth_interval: u32,
    clean_steps: u32,
}

impl Default for GradScaler {
    fn default() -> Self {
        Self::new(65536.0, 2000)
    }
}

impl GradScaler {
    /// 以初始系数和增长间隔构造.
    pub fn new(scale: f32, growth_interval: u32) -> Self {
        Self {
            scale,
            growth_interval: growth_interval.max(1),
            clean_steps: 0,
        }
    }

    /// 当前缩放系数.
    #[inline]
    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// 将 (已缩放的) 梯度缩回原值, 若全部有限则调用 `optimizer` 更新.
    /// 返回是否实际执行了更新.
    pub fn step(
        &mut self,
        optimizer: &mut Optimizer,
        params: &mut [f32],
        scaled_grads: &mut [f32],
        lr: f32,
    ) -> bool {
        let inv = 1.0 / self.scale;
        scaled_grads.iter_mut().for_each(|g| *g *= inv);
        let finite = scaled_grads.iter().all(|g| g.is_finite());
        if finite {
            optimizer.step(params, scaled_grads, lr);
        }
        self.update(finite);
        finite
    }

    /// 根据本次梯度是否有限调整系数.
    pub fn update(&mut self, finite: bool) {
        if finite {
            self.clean_steps += 1;
            if self.clean_steps >= self.growth_interval {
                self.scale *= 2.0;
                self.clean_steps = 0;
            }
        } else {
            self.scale *= 0.5;
            self.clean_steps = 0;
        }
    }
}

/// 参数的指数滑动平均.
///
/// 衰减率随更新次数增长: `decay = 0.9999 * (1 - exp(-updates / 2000))`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelEma {
    params: Vec<f32>,
    updates: u64,
}

impl ModelEma {
    /// 以当前参数初始化.
    pub fn new(params: &[f32]) -> Self {
        Self {
            params: params.to_vec(),
            updates: 0,
        }
    }

    /// 第 `updates` 次更新使用的衰减率.
    #[inline]
    pub fn decay(updates: u64) -> f64 {
        0.9999 * (1.0 - (-(updates as f64) / 2000.0).exp())
    }

    /// 用模型当前参数更新平均值. 长度不符时程序 panic.
    pub fn update(&mut self, model: &[f32]) {
        assert_eq!(model.len(), self.params.len(), "参数个数不符");
        self.updates += 1;
        let d = Self::decay(self.updates) as f32;
        for (e, &m) in self.params.iter_mut().zip(model) {
            *e = d * *e + (1.0 - d) * m;
        }
    }

    /// 平均后的参数.
    #[inline]
    pub fn params(&self) -> &[f32] {
        &self.params
    }

    /// 更新次数.
    #[inline]
    pub fn updates(&self) -> u64 {
        self.updates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_optimizer() {
        assert_eq!("AdamW".parse::<OptimizerKind>(), Ok(OptimizerKind::AdamW));
        assert_eq!("sgd".parse::<OptimizerKind>(), Ok(OptimizerKind::Sgd));
        assert_eq!("Adam".parse::<OptimizerKind>(), Ok(OptimizerKind::Adam));
        assert_eq!("RMSprop".parse::<OptimizerKind>(), Err("RMSprop".to_owned()));
        assert_eq!(OptimizerKind::AdamW.to_string(), "AdamW");
    }

    #[test]
    fn test_lr_lambda() {
        assert!((lr_lambda(0, 60) - 2.001).abs() < 1e-12);
        assert!((lr_lambda(30, 60) - 1.001).abs() < 1e-12);
        assert!((lr_lambda(60, 60) - 0.001).abs() < 1e-12);
    }

    #[test]
    fn test_optimizers_descend() {
        // 最小化 (p - 3)^2.
        for kind in [OptimizerKind::Sgd, OptimizerKind::Adam, OptimizerKind::AdamW] {
            let mut opt = Optimizer::new(kind, 1);
            let mut p = [0.0f32];
            for _ in 0..500 {
                let g = [2.0 * (p[0] - 3.0)];
                opt.step(&mut p, &g, 0.05);
            }
            assert!((p[0] - 3.0).abs() < 0.1, "{kind}: {}", p[0]);
        }
    }

    #[test]
    fn test_adam_first_step() {
        // 偏差修正后第一步的步长恰为 lr.
        let mut opt = Optimizer::new(OptimizerKind::Adam, 2);
        let mut p = [1.0f32, 1.0];
        opt.step(&mut p, &[0.5, -2.0], 0.1);
        assert!((p[0] - 0.9).abs() < 1e-5);
        assert!((p[1] - 1.1).abs() < 1e-5);
    }

    #[test]
    fn test_grad_scaler() {
        let mut scaler = GradScaler::new(8.0, 2);
        let mut opt = Optimizer::new(OptimizerKind::Sgd, 1);
        let mut p = [0.0f32];

        let mut g = [8.0f32];
        assert!(scaler.step(&mut opt, &mut p, &mut g, 0.5));
        assert_eq!(g, [1.0]);
        assert_eq!(p, [-0.5]);
        assert_eq!(scaler.scale(), 8.0);

        let mut g = [f32::INFINITY];
        assert!(!scaler.step(&mut opt, &mut p, &mut g, 0.5));
        assert_eq!(p, [-0.5]);
        assert_eq!(scaler.scale(), 4.0);

        for _ in 0..2 {
            let mut g = [0.0f32];
            scaler.step(&mut opt, &mut p, &mut g, 0.0);
        }
        assert_eq!(scaler.scale(), 8.0);
    }

    #[test]
    fn test_ema() {
        assert_eq!(ModelEma::decay(0), 0.0);
        assert!((ModelEma::decay(2000) - 0.9999 * (1.0 - (-1f64).exp())).abs() < 1e-12);

        let mut ema = ModelEma::new(&[0.0, 10.0]);
        ema.update(&[1.0, 0.0]);
        let d = ModelEma::decay(1) as f32;
        assert!((ema.params()[0] - (1.0 - d)).abs() < 1e-6);
        assert!((ema.params()[1] - 10.0 * d).abs() < 1e-5);
        assert_eq!(ema.updates(), 1);
    }
}
