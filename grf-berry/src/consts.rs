//! 通用常量.

/// 单通道颜色.
pub mod gray {
    /// 标签背景像素值.
    pub const BACKGROUND: u8 = 0;

    /// 标签前景像素值.
    pub const FOREGROUND: u8 = 255;

    /// 二值化标签时, 严格大于该值的像素被视为前景.
    pub const MASK_THRESHOLD: u8 = 127;

    /// 预测结果转换 (`convert`) 时的默认二值化门限.
    pub const CONVERT_THRESHOLD: u8 = 120;

    /// 像素是否是前景?
    #[inline]
    pub const fn is_foreground(p: u8) -> bool {
        p > MASK_THRESHOLD
    }
}

/// 复合张量的通道数: RGB + 1 个辅助 (GRF) 通道.
pub const CHANNELS: usize = 4;

/// 各通道归一化均值. 前三个为 ImageNet RGB 统计值, 最后一个为数据集 GRF 通道统计值.
pub const NORM_MEAN: [f32; CHANNELS] = [0.485, 0.456, 0.406, 0.1055];

/// 各通道归一化标准差. 与 [`NORM_MEAN`] 一一对应.
pub const NORM_STD: [f32; CHANNELS] = [0.229, 0.224, 0.225, 0.1647];

/// 默认训练分辨率.
pub const DEFAULT_TRAIN_SIZE: usize = 512;

/// 训练时辅助通道被置零的概率的倒数: 每个样本每个 epoch 有 1/5 的概率使用全零通道.
pub const ZEROED_GRF_ONE_IN: u32 = 5;

/// 默认 GRF 图像尺寸 (高, 宽).
pub const GRF_SIZE: (usize, usize) = (480, 640);
