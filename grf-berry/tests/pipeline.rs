//! 在临时目录中生成小型 PNG 数据集, 端到端检查数据集、训练循环与评估.

use grf_berry::consts::{CHANNELS, NORM_MEAN, NORM_STD};
use grf_berry::dataset::loader::{batch_loader, sample_seed};
use grf_berry::dataset::{DatasetConfig, DatasetError, Role, TestDataset, TrainDataset};
use grf_berry::imgproc::{GrayArray, ImgWriteRaw, RgbArray};
use grf_berry::metrics::{evaluate_dirs, LabelMode, OverlapMeasures};
use grf_berry::train::{Checkpoint, OptimizerKind, TrainConfig, Trainer};
use ndarray::{Array2, Array3};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const N: usize = 10;
const GRF_VALUE: u8 = 200;

/// `root/train/{images, masks}` 与 `root/grf`.
fn make_corpus(root: &Path) -> PathBuf {
    let train = root.join("train");
    let (images, masks, grf) = (train.join("images"), train.join("masks"), root.join("grf"));
    for d in [&images, &masks, &grf] {
        std::fs::create_dir_all(d).unwrap();
    }
    for i in 0..N {
        let name = format!("case{i:02}.png");
        let img: RgbArray = Array3::from_shape_fn((24, 32, 3), |(y, x, c)| ((y * 7 + x * 3 + c * 50 + i) % 256) as u8);
        let mask: GrayArray = Array2::from_shape_fn((24, 32), |(y, x)| {
            if (6..18).contains(&y) && (4 + i..20 + i).contains(&x) {
                255
            } else {
                0
            }
        });
        img.save_raw(images.join(&name)).unwrap();
        mask.save_raw(masks.join(&name)).unwrap();
        Array2::from_elem((24, 32), GRF_VALUE).save_raw(grf.join(&name)).unwrap();
    }
    train
}

fn names(ds: &TrainDataset) -> HashSet<PathBuf> {
    ds.names().iter().cloned().collect()
}

#[test]
fn test_k_fold_datasets_partition_corpus() {
    let dir = tempfile::tempdir().unwrap();
    let train = make_corpus(dir.path());

    let mut cfg = DatasetConfig::new([&train], 42);
    cfg.k_fold = 5;
    let mut seen = HashSet::new();
    for k in 0..5 {
        cfg.k = k;
        let tr = TrainDataset::new(&cfg, Role::Train).unwrap();
        let va = TrainDataset::new(&cfg, Role::Val).unwrap();
        assert_eq!(va.len(), N / 5);
        assert_eq!(tr.len() + va.len(), N);

        let (tr, va) = (names(&tr), names(&va));
        assert!(tr.is_disjoint(&va));
        for v in va {
            assert!(seen.insert(v), "fold {k} repeats a validation sample");
        }
    }
    assert_eq!(seen.len(), N);

    // 同一种子下划分可复现.
    cfg.k = 2;
    let a = TrainDataset::new(&cfg, Role::Val).unwrap();
    let b = TrainDataset::new(&cfg, Role::Val).unwrap();
    assert_eq!(a.names(), b.names());
}

#[test]
fn test_sample_shapes_and_aux_channel() {
    let dir = tempfile::tempdir().unwrap();
    let train = make_corpus(dir.path());

    let mut cfg = DatasetConfig::new([&train], 0);
    cfg.train_size = 16;
    cfg.ratio = 1.0;
    let ds = TrainDataset::new(&cfg, Role::Train).unwrap();
    assert_eq!(ds.len(), N);

    let grf_norm = (f32::from(GRF_VALUE) / 255.0 - NORM_MEAN[3]) / NORM_STD[3];
    let (mut zeroed, mut real) = (0, 0);
    for draw in 0..200 {
        let mut rng = ChaCha8Rng::seed_from_u64(sample_seed(0, draw, 3));
        let s = ds.get(3, &mut rng).unwrap();
        assert_eq!(s.image.dim(), (CHANNELS, 16, 16));
        assert_eq!(s.mask.dim(), (1, 16, 16));
        assert!(s.mask.iter().all(|&v| v == 0.0 || v == 1.0));
        assert!(s.name.ends_with("case03.png"));

        let aux = s.image.index_axis(ndarray::Axis(0), 3);
        if s.grf_zeroed {
            zeroed += 1;
            // 归一化之前恰为 0.
            assert!(aux.iter().all(|&v| (v * NORM_STD[3] + NORM_MEAN[3]).abs() < 1e-6));
        } else {
            real += 1;
            assert!(aux.iter().all(|&v| (v - grf_norm).abs() < 1e-5));
        }
    }
    assert!(zeroed > 0 && real > zeroed);
}

#[test]
fn test_missing_grf_is_a_read_error() {
    let dir = tempfile::tempdir().unwrap();
    let train = make_corpus(dir.path());
    std::fs::remove_file(dir.path().join("grf").join("case00.png")).unwrap();

    let mut cfg = DatasetConfig::new([&train], 0);
    cfg.train_size = 16;
    cfg.ratio = 1.0;
    let ds = TrainDataset::new(&cfg, Role::Train).unwrap();
    let mut failed = false;
    for draw in 0..50 {
        let mut rng = ChaCha8Rng::seed_from_u64(sample_seed(1, draw, 0));
        match ds.get(0, &mut rng) {
            Ok(s) => assert!(s.grf_zeroed),
            Err(e) => {
                assert!(matches!(e, DatasetError::Read { .. }));
                failed = true;
            }
        }
    }
    assert!(failed);
}

#[test]
fn test_missing_data_dir_is_wrapped() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = DatasetConfig::new([dir.path().join("nowhere")], 0);
    let err = TrainDataset::new(&cfg, Role::Train).unwrap_err();
    assert!(matches!(err, DatasetError::Load { .. }));
    assert!(err.to_string().contains("nowhere"));
}

#[test]
fn test_batch_loader_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let train = make_corpus(dir.path());
    let mut cfg = DatasetConfig::new([&train], 5);
    cfg.train_size = 16;
    cfg.ratio = 1.0;
    let ds = TrainDataset::new(&cfg, Role::Train).unwrap();

    let loader = batch_loader(&ds, 4, true, 5, 3);
    assert_eq!(loader.len(), 3);
    let a: Vec<_> = loader.map(Result::unwrap).collect();
    let b: Vec<_> = batch_loader(&ds, 4, true, 5, 3).map(Result::unwrap).collect();
    assert_eq!(a.iter().map(|b| b.len()).collect::<Vec<_>>(), vec![4, 4, 2]);
    for (x, y) in a.iter().zip(b.iter()) {
        assert_eq!(x.names, y.names);
        assert_eq!(x.images, y.images);
        assert_eq!(x.masks.dim(), (x.len(), 1, 16, 16));
    }
    let all: HashSet<_> = a.iter().flat_map(|b| b.names.iter().cloned()).collect();
    assert_eq!(all.len(), N);
}

#[test]
fn test_test_dataset() {
    let dir = tempfile::tempdir().unwrap();
    let train = make_corpus(dir.path());
    let ds = TestDataset::new(&[train], 20, true).unwrap();
    assert_eq!(ds.len(), N);
    for s in ds.iter() {
        let s = s.unwrap();
        assert_eq!(s.image.dim(), (1, CHANNELS, 20, 20));
        assert_eq!(s.original_size, (24, 32));
        assert_eq!(s.raw.dim(), (20, 20, CHANNELS));
        assert!(s.raw.index_axis(ndarray::Axis(2), 3).iter().all(|&v| v == 0));
    }
}

#[test]
fn test_tiny_training_run() {
    let _ = simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Warn)
        .init();
    let dir = tempfile::tempdir().unwrap();
    let train = make_corpus(dir.path());
    let out = dir.path().join("out");
    std::fs::create_dir_all(&out).unwrap();

    let mut cfg = TrainConfig::new([&train], 7);
    cfg.epochs = 2;
    cfg.batch_size = 4;
    cfg.k_fold = 2;
    cfg.k = Some(1);
    cfg.train_size = 64;
    cfg.lr = 1e-3;
    cfg.optimizer = OptimizerKind::Adam;
    cfg.name = "tiny".to_owned();
    cfg.out_dir = out.clone();

    let trainer = Trainer::new(cfg).unwrap();
    let folds = trainer.run().unwrap();
    assert_eq!(folds.len(), 1);
    let fold = &folds[0];
    assert_eq!(fold.k, 1);
    assert_eq!(fold.records.len(), 2);
    for r in fold.records.iter() {
        assert!(r.loss.is_finite() && r.val_loss.is_finite());
        assert!((0.0..=1.0).contains(&r.val_iou));
    }
    assert!(fold.best_val_iou >= fold.records[0].val_iou);

    let csv = std::fs::read_to_string(out.join("tiny_fold-1_log.csv")).unwrap();
    assert_eq!(csv.lines().count(), 3);
    assert!(csv.starts_with("epoch,lr,loss,deep1,deep2,dice,iou,val_loss,val_dice,val_iou"));

    let weights = out.join("weights").join("tiny");
    let ckpts: Vec<_> = std::fs::read_dir(&weights)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(ckpts.len(), 2);
    let last = ckpts
        .iter()
        .find(|p| p.to_string_lossy().ends_with("_epoch_1.ckpt"))
        .unwrap();
    let name = last.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("fold-1_tiny_2,2_val_iou_0."), "{name}");

    let ckpt = Checkpoint::load(last).unwrap();
    assert_eq!(ckpt.epoch, 1);
    assert!(ckpt.ema.is_some());

    let logs = std::fs::read_dir(&out)
        .unwrap()
        .filter(|e| e.as_ref().unwrap().path().extension().is_some_and(|x| x == "log"))
        .count();
    assert_eq!(logs, 1);
}

#[test]
fn test_metrics_dirs() {
    let dir = tempfile::tempdir().unwrap();
    let (gt, pred) = (dir.path().join("gt"), dir.path().join("pred"));
    std::fs::create_dir_all(&gt).unwrap();
    std::fs::create_dir_all(&pred).unwrap();

    let empty = Array2::<u8>::zeros((8, 8));
    let full = Array2::<u8>::from_elem((8, 8), 1);
    empty.save_raw(gt.join("a.png")).unwrap();
    empty.save_raw(pred.join("a.png")).unwrap();
    full.save_raw(gt.join("b.png")).unwrap();
    empty.save_raw(pred.join("b.png")).unwrap();
    full.save_raw(gt.join("c.png")).unwrap();
    full.save_raw(pred.join("c.png")).unwrap();

    let report = evaluate_dirs(&gt, &pred, LabelMode::MultiLabel).unwrap();
    assert_eq!(report.cases.len(), 3);
    assert_eq!(report.cases[0].measures, OverlapMeasures::BOTH_EMPTY);
    assert_eq!(report.cases[1].measures, OverlapMeasures::ONE_EMPTY);
    assert!((report.cases[2].measures.dc - 1.0).abs() < 1e-12);
    assert!((report.aggregates.dc - 2.0 / 3.0).abs() < 1e-9);

    let out = dir.path().join("metrics");
    report.save(&out).unwrap();
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(out.join("metrics.json")).unwrap()).unwrap();
    assert!(json["case"].as_object().unwrap().is_empty());
    assert!(json["aggregates"]["DiceCoefficient"].is_number());
    let csv = std::fs::read_to_string(out.join("metrics.csv")).unwrap();
    assert_eq!(csv.lines().count(), 4);
}
