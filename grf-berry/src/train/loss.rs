//! 损失函数与评价指标.
//!
//! 所有输入都是 `(B, 1, H, W)` 的 logits 与同形状的标签 (取值于 `[0, 1]`).
//! 带梯度的损失同时返回损失值和对 logits 的梯度.

use ndarray::{Array2, Array4, ArrayView2, ArrayView4, Axis, Zip};

/// Dice/IoU 的平滑项.
const SMOOTH: f32 = 1e-5;

/// 软 Dice 损失的平滑项.
const DICE_LOSS_SMOOTH: f32 = 1.0;

/// 结构损失的权重窗口边长.
const STRUCTURE_WINDOW: usize = 31;

#[inline]
pub(crate) fn sigmoid(x: f32) -> f32 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// 数值稳定的逐元素 BCE-with-logits.
#[inline]
fn bce_elem(x: f32, y: f32) -> f32 {
    x.max(0.0) - x * y + (-x.abs()).exp().ln_1p()
}

fn assert_same_shape(logits: &ArrayView4<f32>, target: &ArrayView4<f32>) {
    assert_eq!(logits.dim(), target.dim(), "logits 与标签形状不符");
}

/// 平均 BCE-with-logits 及其梯度.
pub fn bce_with_logits(logits: ArrayView4<f32>, target: ArrayView4<f32>) -> (f32, Array4<f32>) {
    assert_same_shape(&logits, &target);
    let n = logits.len().max(1) as f32;
    let mut grad = Array4::zeros(logits.dim());
    let mut total = 0f64;
    Zip::from(&mut grad)
        .and(&logits)
        .and(&target)
        .for_each(|g, &x, &y| {
            total += f64::from(bce_elem(x, y));
            *g = (sigmoid(x) - y) / n;
        });
    ((total / f64::from(n)) as f32, grad)
}

/// 软 Dice 损失 `1 - mean_b dice_b` 及其梯度.
pub fn soft_dice(logits: ArrayView4<f32>, target: ArrayView4<f32>) -> (f32, Array4<f32>) {
    assert_same_shape(&logits, &target);
    let batch = logits.len_of(Axis(0)).max(1) as f32;
    let prob = logits.mapv(sigmoid);
    let mut grad = Array4::zeros(logits.dim());
    let mut loss = 0f32;
    for ((p, y), mut g) in prob
        .outer_iter()
        .zip(target.outer_iter())
        .zip(grad.outer_iter_mut())
    {
        let inter: f32 = Zip::from(&p).and(&y).fold(0.0, |acc, &p, &y| acc + p * y);
        let denom = p.sum() + y.sum() + DICE_LOSS_SMOOTH;
        let numer = 2.0 * inter + DICE_LOSS_SMOOTH;
        loss += 1.0 - numer / denom;
        Zip::from(&mut g)
            .and(&p)
            .and(&y)
            .for_each(|g, &p, &y| {
                let d_dice = (2.0 * y * denom - numer) / (denom * denom);
                *g = -d_dice * p * (1.0 - p) / batch;
            });
    }
    (loss / batch, grad)
}

/// 分割损失: BCE-with-logits 与软 Dice 之和.
pub fn seg_loss(logits: ArrayView4<f32>, target: ArrayView4<f32>) -> (f32, Array4<f32>) {
    let (l1, mut g1) = bce_with_logits(logits, target);
    let (l2, g2) = soft_dice(logits, target);
    g1 += &g2;
    (l1 + l2, g1)
}

/// 标签的形态学边界: 3x3 邻域内同时含有前景 (> 0.5) 与背景的像素为 1, 其余为 0.
pub fn boundary_map(target: ArrayView4<f32>) -> Array4<f32> {
    let mut out = Array4::zeros(target.dim());
    for (src, mut dst) in target.outer_iter().zip(out.outer_iter_mut()) {
        for (plane, mut out_plane) in src.outer_iter().zip(dst.outer_iter_mut()) {
            let (h, w) = plane.dim();
            for ((y, x), o) in out_plane.indexed_iter_mut() {
                let (mut fg, mut bg) = (false, false);
                for ny in y.saturating_sub(1)..(y + 2).min(h) {
                    for nx in x.saturating_sub(1)..(x + 2).min(w) {
                        if plane[(ny, nx)] > 0.5 {
                            fg = true;
                        } else {
                            bg = true;
                        }
                    }
                }
                *o = if fg && bg { 1.0 } else { 0.0 };
            }
        }
    }
    out
}

/// 边界损失: 对标签形态学边界的 BCE-with-logits.
pub fn boundary_loss(logits: ArrayView4<f32>, target: ArrayView4<f32>) -> (f32, Array4<f32>) {
    let edge = boundary_map(target);
    bce_with_logits(logits, edge.view())
}

/// 逐样本二值化后的 `(交集, 预测面积, 标签面积)`.
fn hard_counts(logits: ArrayView4<f32>, target: ArrayView4<f32>) -> Vec<(f32, f32, f32)> {
    assert_same_shape(&logits, &target);
    logits
        .outer_iter()
        .zip(target.outer_iter())
        .map(|(x, y)| {
            Zip::from(&x).and(&y).fold((0.0, 0.0, 0.0), |(i, p, t), &x, &y| {
                let (px, ty) = (sigmoid(x) > 0.5, y > 0.5);
                (
                    i + f32::from(u8::from(px && ty)),
                    p + f32::from(u8::from(px)),
                    t + f32::from(u8::from(ty)),
                )
            })
        })
        .collect()
}

/// 二值化 Dice 系数 (批内平均).
pub fn dice_coefficient(logits: ArrayView4<f32>, target: ArrayView4<f32>) -> f32 {
    let counts = hard_counts(logits, target);
    let n = counts.len().max(1) as f32;
    counts
        .into_iter()
        .map(|(i, p, t)| (2.0 * i + SMOOTH) / (p + t + SMOOTH))
        .sum::<f32>()
        / n
}

/// 二值化 IoU (批内平均).
pub fn iou_score(logits: ArrayView4<f32>, target: ArrayView4<f32>) -> f32 {
    let counts = hard_counts(logits, target);
    let n = counts.len().max(1) as f32;
    counts
        .into_iter()
        .map(|(i, p, t)| (i + SMOOTH) / (p + t - i + SMOOTH))
        .sum::<f32>()
        / n
}

/// `k * k` 均值滤波, 零填充, 除数恒为 `k * k`.
fn box_mean(plane: ArrayView2<f32>, k: usize) -> Array2<f32> {
    let (h, w) = plane.dim();
    // 积分图, 多一行一列.
    let mut integral = Array2::<f64>::zeros((h + 1, w + 1));
    for y in 0..h {
        let mut row = 0f64;
        for x in 0..w {
            row += f64::from(plane[(y, x)]);
            integral[(y + 1, x + 1)] = integral[(y, x + 1)] + row;
        }
    }
    let r = k / 2;
    let area = (k * k) as f64;
    Array2::from_shape_fn((h, w), |(y, x)| {
        let (y0, x0) = (y.saturating_sub(r), x.saturating_sub(r));
        let (y1, x1) = ((y + r + 1).min(h), (x + r + 1).min(w));
        let s = integral[(y1, x1)] - integral[(y0, x1)] - integral[(y1, x0)] + integral[(y0, x0)];
        (s / area) as f32
    })
}

/// 结构损失 `(加权 BCE, 加权 IoU 损失)`, 均为批内平均.
///
/// 权重 `1 + 5 * |box_mean_31(mask) - mask|` 强调边界附近的像素.
pub fn structure_loss(logits: ArrayView4<f32>, target: ArrayView4<f32>) -> (f32, f32) {
    assert_same_shape(&logits, &target);
    let batch = logits.len_of(Axis(0)).max(1) as f32;
    let (mut wbce, mut wiou) = (0f32, 0f32);
    for (x, y) in logits.outer_iter().zip(target.outer_iter()) {
        for (xp, yp) in x.outer_iter().zip(y.outer_iter()) {
            let mean = box_mean(yp, STRUCTURE_WINDOW);
            let (mut wsum, mut bce, mut inter, mut union) = (0f32, 0f32, 0f32, 0f32);
            Zip::from(&xp)
                .and(&yp)
                .and(&mean)
                .for_each(|&x, &y, &m| {
                    let weit = 1.0 + 5.0 * (m - y).abs();
                    let p = sigmoid(x);
                    wsum += weit;
                    bce += weit * bce_elem(x, y);
                    inter += p * y * weit;
                    union += (p + y) * weit;
                });
            wbce += bce / wsum.max(f32::MIN_POSITIVE);
            wiou += 1.0 - (inter + 1.0) / (union - inter + 1.0);
        }
    }
    (wbce / batch, wiou / batch)
}
