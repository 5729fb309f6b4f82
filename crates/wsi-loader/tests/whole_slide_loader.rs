mod common;

use std::fs;
use std::time::Duration;

use image::{Rgb, RgbImage};
use tempfile::TempDir;
use wsi_core::{Error, PipelineConfig, Result};
use wsi_dataset::preprocess::normalize_value;
use wsi_dataset::{Augment, SlideDataset, SnapshotWriter};
use wsi_loader::{BatchSequence, RetryPolicy, SampleLoader, WholeSlideLoader};

use common::{RecordingSleeper, StubDataset};

fn quiet_loader(sleeper: &RecordingSleeper, retry: RetryPolicy) -> SampleLoader {
    SampleLoader::new()
        .with_retry(retry)
        .with_sleeper(Box::new(sleeper.clone()))
}

fn loader(dataset: StubDataset, batch_size: usize, shuffle: bool) -> WholeSlideLoader<StubDataset> {
    let sleeper = RecordingSleeper::default();
    WholeSlideLoader::new(
        dataset,
        batch_size,
        3,
        shuffle,
        Some(11),
        quiet_loader(&sleeper, RetryPolicy::fixed(Duration::from_secs(5))),
    )
    .unwrap()
}

#[test]
fn test_num_batches_drops_partial_batch() {
    let loader = loader(StubDataset::uniform(10, 4, 3), 3, false);
    assert_eq!(loader.num_batches(), 3);
    assert_eq!(BatchSequence::len(&loader), 3);

    let small = self::loader(StubDataset::uniform(2, 4, 3), 3, false);
    assert!(BatchSequence::is_empty(&small));
}

#[test]
fn test_batch_contents_follow_order() {
    let mut loader = loader(StubDataset::uniform(10, 4, 3), 3, false);
    let batch = loader.get_batch(1).unwrap();

    assert_eq!(batch.len(), 3);
    assert_eq!(batch.dataset_indices, vec![3, 4, 5]);
    assert_eq!(batch.image_shape(), Some([3, 4, 4]));

    // Red channel carries the dataset index, blue is saturated.
    assert_eq!(batch.images[0].get(0, 0, 0), normalize_value(3.0));
    assert_eq!(batch.images[0].get(2, 3, 3), 1.0);
    assert!(batch.images.iter().all(|t| t.data.iter().all(|v| (-1.0..=1.0).contains(v))));

    assert_eq!(batch.labels[0], vec![1.0, 0.0, 0.0]);
    assert_eq!(batch.labels[1], vec![0.0, 1.0, 0.0]);
    assert_eq!(batch.labels[2], vec![0.0, 0.0, 1.0]);
}

#[test]
fn test_transient_failures_are_retried() {
    let sleeper = RecordingSleeper::default();
    let dataset = StubDataset::uniform(4, 4, 3).fail(1, 2);
    let mut loader = WholeSlideLoader::new(
        dataset,
        2,
        3,
        false,
        None,
        quiet_loader(&sleeper, RetryPolicy::fixed(Duration::from_secs(5))),
    )
    .unwrap();

    let batch = loader.get_batch(0).unwrap();

    assert_eq!(batch.dataset_indices, vec![0, 1]);
    assert_eq!(batch.images[1].get(0, 0, 0), normalize_value(1.0));
    assert_eq!(sleeper.recorded(), vec![Duration::from_secs(5); 2]);
    assert_eq!(loader.dataset().reads(), 4);
}

#[test]
fn test_retry_exhaustion_is_recoverable() {
    let sleeper = RecordingSleeper::default();
    let policy = RetryPolicy {
        max_attempts: Some(3),
        initial_backoff: Duration::from_secs(5),
        multiplier: 2.0,
        max_backoff: Duration::from_secs(300),
    };
    let dataset = StubDataset::uniform(4, 4, 3).fail(2, 100);
    let mut loader =
        WholeSlideLoader::new(dataset, 2, 3, false, None, quiet_loader(&sleeper, policy)).unwrap();

    let err = loader.get_batch(1).unwrap_err();
    assert!(err.is_recoverable());
    match err {
        Error::RetriesExhausted { index, path, attempts, .. } => {
            assert_eq!(index, 2);
            assert_eq!(path.to_string_lossy(), "stub/slide_002.tiff");
            assert_eq!(attempts, 3);
        }
        other => panic!("expected RetriesExhausted, got {:?}", other),
    }
    assert_eq!(sleeper.recorded(), vec![Duration::from_secs(5), Duration::from_secs(10)]);

    // The next batch is unaffected.
    assert_eq!(loader.get_batch(0).unwrap().len(), 2);
}

#[test]
fn test_batch_index_out_of_range() {
    let mut loader = loader(StubDataset::uniform(10, 4, 3), 3, true);

    let err = loader.get_batch(3).unwrap_err();
    assert!(matches!(err, Error::IndexOutOfRange { index: 3, len: 3 }));
    assert!(!err.is_recoverable());
    assert_eq!(loader.dataset().reads(), 0);
}

#[test]
fn test_label_out_of_range() {
    let slides = vec![
        (RgbImage::from_pixel(4, 4, Rgb([0, 0, 0])), 0),
        (RgbImage::from_pixel(4, 4, Rgb([0, 0, 0])), 3),
    ];
    let mut loader = loader(StubDataset::from_slides(slides), 2, false);

    assert!(matches!(
        loader.get_batch(0),
        Err(Error::LabelOutOfRange { label: 3, num_classes: 3 })
    ));
}

#[test]
fn test_epoch_end_reshuffles() {
    let mut loader = loader(StubDataset::uniform(200, 2, 3), 4, true);

    let before: Vec<usize> = (0..200).map(|p| loader.dataset_index_for(p).unwrap()).collect();
    let first = loader.get_batch(0).unwrap();
    assert_eq!(first.dataset_indices, before[..4].to_vec());

    loader.on_epoch_end();

    let after: Vec<usize> = (0..200).map(|p| loader.dataset_index_for(p).unwrap()).collect();
    assert_ne!(before, after);

    let mut sorted = after.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, (0..200).collect::<Vec<_>>());

    let second = loader.get_batch(0).unwrap();
    assert_eq!(second.dataset_indices, after[..4].to_vec());
}

#[test]
fn test_accessors_resolve_through_shuffle() {
    let loader = loader(StubDataset::uniform(9, 2, 3), 3, true);

    for position in 0..9 {
        let index = loader.dataset_index_for(position).unwrap();
        assert_eq!(loader.ground_truth_for(position).unwrap(), index % 3);
        assert_eq!(
            loader.slide_path_for(position).unwrap().to_string_lossy(),
            format!("stub/slide_{:03}.tiff", index)
        );
    }
    assert!(loader.dataset_index_for(9).is_err());
}

#[test]
fn test_snapshot_written_per_sample() {
    let temp = TempDir::new().unwrap();
    let sleeper = RecordingSleeper::default();
    let samples = quiet_loader(&sleeper, RetryPolicy::default())
        .with_snapshot(SnapshotWriter::new(temp.path().join("debug")));
    let mut loader =
        WholeSlideLoader::new(StubDataset::uniform(3, 4, 3), 3, 3, false, None, samples).unwrap();

    loader.get_batch(0).unwrap();

    let snapshot = image::open(temp.path().join("debug").join("dataloader_snapshot.tiff"))
        .unwrap()
        .to_rgb8();
    // Last sample of the batch wins.
    assert_eq!(*snapshot.get_pixel(0, 0), Rgb([2, 0, 255]));
}

/// Inverts every channel so augmented pixels are easy to tell apart
struct Invert;

impl Augment for Invert {
    fn augment(&mut self, mut image: RgbImage) -> Result<RgbImage> {
        image::imageops::invert(&mut image);
        Ok(image)
    }
}

#[test]
fn test_augmented_image_reaches_batch_and_snapshot() {
    let temp = TempDir::new().unwrap();
    let sleeper = RecordingSleeper::default();
    let samples = quiet_loader(&sleeper, RetryPolicy::default())
        .with_augmentor(Box::new(Invert))
        .with_snapshot(SnapshotWriter::new(temp.path().join("debug")));
    let mut loader =
        WholeSlideLoader::new(StubDataset::uniform(3, 4, 3), 3, 3, false, None, samples).unwrap();

    let batch = loader.get_batch(0).unwrap();

    // Raw slide k is [k, 0, 255]; inverted it is [255 - k, 255, 0].
    for (k, image) in batch.images.iter().enumerate() {
        assert_eq!(image.get(0, 1, 1), normalize_value(255.0 - k as f32));
        assert_eq!(image.get(1, 1, 1), 1.0);
        assert_eq!(image.get(2, 1, 1), -1.0);
    }

    // The snapshot holds the augmented pixels, before normalization.
    let snapshot = image::open(temp.path().join("debug").join("dataloader_snapshot.tiff"))
        .unwrap()
        .to_rgb8();
    assert_eq!(*snapshot.get_pixel(1, 1), Rgb([253, 255, 0]));
}

#[test]
fn test_from_config_reads_slides_from_disk() {
    let temp = TempDir::new().unwrap();
    let slides = temp.path().join("slides");
    fs::create_dir_all(&slides).unwrap();
    for (name, shade) in [("s1", 10u8), ("s2", 20), ("s3", 30), ("s4", 40)] {
        RgbImage::from_pixel(16, 16, Rgb([shade, shade, shade]))
            .save(slides.join(format!("{}.png", name)))
            .unwrap();
    }
    fs::write(
        temp.path().join("train.csv"),
        "slide_name,label\ns1,0\ns2,1\ns3,0\ns4,1\n",
    )
    .unwrap();

    let config_path = temp.path().join("config.toml");
    fs::write(
        &config_path,
        format!(
            r#"
            [data_load]
            TRAIN_CSV_PATH = "{csv}"
            SLIDE_DIR = "{slides}"
            SLIDE_FILE_EXTENSION = ".png"
            INPUT_SIZE = [8, 8, 3]
            RESIZE_RATIO = 0.5
            SLIDE_READER = "image"
            NUM_CLASSES = 2
            BATCH_SIZE = 2
            LOADER = "whole_slide"
            SHUFFLE = false
            AUGMENT = false
            "#,
            csv = temp.path().join("train.csv").display(),
            slides = slides.display(),
        ),
    )
    .unwrap();

    let config = PipelineConfig::from_file(&config_path).unwrap().data_load;
    let dataset = SlideDataset::from_config(&config).unwrap();
    let mut loader = WholeSlideLoader::from_config(dataset, &config).unwrap();

    assert_eq!(loader.num_batches(), 2);
    let batch = loader.get_batch(1).unwrap();
    assert_eq!(batch.image_shape(), Some([3, 8, 8]));
    assert_eq!(batch.images[0].get(1, 4, 4), normalize_value(30.0));
    assert_eq!(batch.labels, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
}
