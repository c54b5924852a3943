//! 测试集. 测试时没有 GRF 输入, 辅助通道恒为零.

use super::{compose, discover, is_jpg_or_png, normalize, path_contains, DatasetError};
use crate::imgproc::{geometry, load_rgb, resize};
use crate::Idx2d;
use ndarray::{Array3, Array4, Axis};
use std::path::PathBuf;

/// 测试集中的一个样本.
#[derive(Clone, Debug)]
pub struct TestSample {
    /// `(1, 4, S, S)` 的归一化输入.
    pub image: Array4<f32>,
    /// 图像路径.
    pub name: PathBuf,
    /// 原始尺寸 `(h, w)`.
    pub original_size: Idx2d,
    /// `(S, S, 4)` 的归一化之前的数组, 仅用于可视化.
    pub raw: Array3<u8>,
}

/// 测试集.
#[derive(Debug)]
pub struct TestDataset {
    images: Vec<PathBuf>,
    size: usize,
    rect: bool,
}

impl TestDataset {
    /// 收集 `data_paths` 下所有路径中含有 `image` 的 `.jpg`/`.png` 文件.
    pub fn new(data_paths: &[PathBuf], size: usize, rect: bool) -> Result<Self, DatasetError> {
        let images: Vec<PathBuf> = discover(data_paths)
            .map_err(|e| DatasetError::load(data_paths, e))?
            .into_iter()
            .filter(|p| path_contains(p, "image") && is_jpg_or_png(p))
            .collect();
        log::info!(
            "load {} all images from {}",
            images.len(),
            super::describe_paths(data_paths)
        );
        Ok(Self { images, size, rect })
    }

    /// 样本个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// 是否没有样本?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// 读取第 `index` 个样本. `index` 越界时程序 panic.
    pub fn get(&self, index: usize) -> Result<TestSample, DatasetError> {
        let name = &self.images[index];
        let mut image = load_rgb(name).map_err(|e| DatasetError::read(name, e))?;
        let (h, w, _) = image.dim();
        if self.rect {
            image = geometry::pad_square_rgb(&image);
        }
        let image = resize::resize_rgb(&image, (self.size, self.size));
        let raw = compose(&image, None);
        Ok(TestSample {
            image: normalize(&raw).insert_axis(Axis(0)),
            name: name.clone(),
            original_size: (h, w),
            raw,
        })
    }

    /// 按顺序迭代所有样本.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = Result<TestSample, DatasetError>> + '_ {
        (0..self.len()).map(move |i| self.get(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imgproc::{ImgWriteRaw, RgbArray};
    use std::path::Path;

    fn write_rgb(path: &Path, img: &RgbArray) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        img.save_raw(path).unwrap();
    }

    #[test]
    fn test_only_image_files_are_collected() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let img = RgbArray::from_elem((4, 6, 3), 50);
        write_rgb(&root.join("images").join("b.png"), &img);
        write_rgb(&root.join("images").join("a.png"), &img);
        write_rgb(&root.join("masks").join("a.png"), &img);
        write_rgb(&root.join("other").join("c.png"), &img);
        std::fs::write(root.join("images").join("notes.txt"), "not an image").unwrap();

        let ds = TestDataset::new(&[root.to_owned()], 8, false).unwrap();
        assert_eq!(ds.len(), 2);
        let names: Vec<_> = ds.iter().map(|s| s.unwrap().name).collect();
        assert!(names[0].ends_with("images/a.png"));
        assert!(names[1].ends_with("images/b.png"));

        let empty = tempfile::tempdir().unwrap();
        let ds = TestDataset::new(&[empty.path().to_owned()], 8, false).unwrap();
        assert!(ds.is_empty());

        assert!(matches!(
            TestDataset::new(&[root.join("nowhere")], 8, false),
            Err(DatasetError::Load { .. })
        ));
    }

    #[test]
    fn test_rect_padding() {
        let dir = tempfile::tempdir().unwrap();
        let img = RgbArray::from_elem((24, 32, 3), 100);
        write_rgb(&dir.path().join("images").join("x.png"), &img);
        let paths = [dir.path().to_owned()];

        // 直接缩放: 常数图像保持常数.
        let s = TestDataset::new(&paths, 32, false).unwrap().get(0).unwrap();
        assert_eq!(s.original_size, (24, 32));
        assert_eq!(s.image.dim(), (1, 4, 32, 32));
        assert_eq!(s.raw.dim(), (32, 32, 4));
        assert!(s.raw.slice(ndarray::s![.., .., 0..3]).iter().all(|&v| v == 100));
        assert!(s.raw.index_axis(Axis(2), 3).iter().all(|&v| v == 0));

        // 先填充为 32 x 32: 上下各 4 行为零.
        let s = TestDataset::new(&paths, 32, true).unwrap().get(0).unwrap();
        assert_eq!(s.original_size, (24, 32));
        assert!(s.raw.slice(ndarray::s![0..4, .., 0..3]).iter().all(|&v| v == 0));
        assert!(s.raw.slice(ndarray::s![4..28, .., 0..3]).iter().all(|&v| v == 100));
        assert!(s.raw.slice(ndarray::s![28.., .., 0..3]).iter().all(|&v| v == 0));
    }

    #[test]
    fn test_unreadable_image() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("images").join("bad.png");
        std::fs::create_dir_all(bad.parent().unwrap()).unwrap();
        std::fs::write(&bad, b"garbage").unwrap();

        let ds = TestDataset::new(&[dir.path().to_owned()], 8, false).unwrap();
        assert_eq!(ds.len(), 1);
        assert!(matches!(ds.get(0), Err(DatasetError::Read { .. })));
    }
}
