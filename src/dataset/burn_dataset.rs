//! Burn Dataset Integration for crop images
//!
//! This module implements Burn's Dataset trait and Batcher for loading and
//! batching images during training. Images use the same crop and
//! normalization as the serving path, with Triangle resampling.

use std::path::{Path, PathBuf};

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use image::imageops::FilterType;
use tracing::warn;

use crate::inference::preprocess::{load_image, PreprocessedImage};
use crate::utils::error::Result;
use crate::{IMAGE_CHANNELS, IMAGE_SIZE};

/// A single crop image ready for Burn
#[derive(Clone, Debug)]
pub struct CropItem {
    /// Image data as flattened CHW float array [3 * H * W], in [-1, 1]
    pub image: Vec<f32>,
    /// Class label index
    pub label: usize,
    /// Image path (for logging)
    pub path: PathBuf,
}

impl CropItem {
    /// Create a new item by loading and preprocessing an image
    pub fn from_path(path: &Path, label: usize, image_size: usize) -> Result<Self> {
        let img = load_image(path)?;
        let image = PreprocessedImage::with_filter(&img, image_size, FilterType::Triangle).to_chw();

        Ok(Self {
            image,
            label,
            path: path.to_path_buf(),
        })
    }
}

/// Dataset of `(path, label)` samples, loaded lazily or cached up front
#[derive(Debug, Clone)]
pub struct CropImageDataset {
    samples: Vec<(PathBuf, usize)>,
    image_size: usize,
    cached_items: Option<Vec<CropItem>>,
}

impl CropImageDataset {
    /// Create a new dataset that loads images on demand
    pub fn new(samples: Vec<(PathBuf, usize)>, image_size: usize) -> Self {
        Self {
            samples,
            image_size,
            cached_items: None,
        }
    }

    /// Create a dataset with every image decoded into memory
    ///
    /// Unreadable images are skipped with a warning.
    pub fn new_cached(samples: Vec<(PathBuf, usize)>, image_size: usize) -> Self {
        let cached: Vec<CropItem> = samples
            .iter()
            .filter_map(|(path, label)| match CropItem::from_path(path, *label, image_size) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!("Skipping {:?}: {}", path, e);
                    None
                }
            })
            .collect();

        let samples = cached.iter().map(|i| (i.path.clone(), i.label)).collect();
        Self {
            samples,
            image_size,
            cached_items: Some(cached),
        }
    }

    /// Get samples per class count
    pub fn class_distribution(&self, num_classes: usize) -> Vec<usize> {
        let mut counts = vec![0usize; num_classes];
        for (_, label) in &self.samples {
            if *label < num_classes {
                counts[*label] += 1;
            }
        }
        counts
    }
}

impl Dataset<CropItem> for CropImageDataset {
    fn get(&self, index: usize) -> Option<CropItem> {
        if let Some(ref cached) = self.cached_items {
            return cached.get(index).cloned();
        }

        let (path, label) = self.samples.get(index)?;
        match CropItem::from_path(path, *label, self.image_size) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!("Failed to load {:?}: {}", path, e);
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// A batch of crop images for training
#[derive(Clone, Debug)]
pub struct CropBatch<B: Backend> {
    /// Batch of images with shape [batch_size, 3, height, width]
    pub images: Tensor<B, 4>,
    /// One-hot labels with shape [batch_size, num_classes]
    pub one_hot: Tensor<B, 2>,
    /// Integer labels with shape [batch_size]
    pub targets: Tensor<B, 1, Int>,
}

/// Batcher for creating crop training batches
#[derive(Clone, Debug)]
pub struct CropBatcher {
    num_classes: usize,
    image_size: usize,
}

impl CropBatcher {
    /// Create a batcher for the model input resolution
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            image_size: IMAGE_SIZE,
        }
    }

    /// Create a batcher with custom image size
    pub fn with_image_size(num_classes: usize, image_size: usize) -> Self {
        Self {
            num_classes,
            image_size,
        }
    }
}

impl<B: Backend> Batcher<B, CropItem, CropBatch<B>> for CropBatcher {
    fn batch(&self, items: Vec<CropItem>, device: &B::Device) -> CropBatch<B> {
        let batch_size = items.len();
        let size = self.image_size;

        let images_data: Vec<f32> = items.iter().flat_map(|item| item.image.iter().copied()).collect();
        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, IMAGE_CHANNELS, size, size]),
            device,
        );

        let mut one_hot_data = vec![0.0f32; batch_size * self.num_classes];
        for (row, item) in items.iter().enumerate() {
            if item.label < self.num_classes {
                one_hot_data[row * self.num_classes + item.label] = 1.0;
            }
        }
        let one_hot = Tensor::<B, 2>::from_floats(
            TensorData::new(one_hot_data, [batch_size, self.num_classes]),
            device,
        );

        let targets_data: Vec<i64> = items.iter().map(|item| item.label as i64).collect();
        let targets = Tensor::<B, 1, Int>::from_data(
            TensorData::new(targets_data, [batch_size]),
            device,
        );

        CropBatch {
            images,
            one_hot,
            targets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use image::{Rgb, RgbImage};
    use tempfile::tempdir;

    type TestBackend = NdArray;

    #[test]
    fn test_item_from_path_is_normalized_chw() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("leaf.png");
        RgbImage::from_pixel(30, 20, Rgb([255, 0, 0])).save(&path).unwrap();

        let item = CropItem::from_path(&path, 3, 8).unwrap();
        assert_eq!(item.image.len(), 3 * 8 * 8);
        assert_eq!(item.label, 3);
        assert!(item.image[..64].iter().all(|&v| (v - 1.0).abs() < 1e-6));
        assert!(item.image[64..].iter().all(|&v| (v + 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_cached_dataset_skips_unreadable_images() {
        let dir = tempdir().unwrap();
        let good = dir.path().join("good.png");
        let bad = dir.path().join("bad.png");
        RgbImage::new(10, 10).save(&good).unwrap();
        std::fs::write(&bad, b"garbage").unwrap();

        let dataset = CropImageDataset::new_cached(vec![(good, 0), (bad, 1)], 8);
        assert_eq!(dataset.len(), 1);
        assert_eq!(dataset.class_distribution(2), vec![1, 0]);
    }

    #[test]
    fn test_batch_shapes_and_one_hot() {
        let device = Default::default();
        let items = vec![
            CropItem { image: vec![0.0; 3 * 4 * 4], label: 1, path: PathBuf::from("a") },
            CropItem { image: vec![0.5; 3 * 4 * 4], label: 0, path: PathBuf::from("b") },
        ];

        let batcher = CropBatcher::with_image_size(3, 4);
        let batch: CropBatch<TestBackend> = batcher.batch(items, &device);

        assert_eq!(batch.images.dims(), [2, 3, 4, 4]);
        assert_eq!(batch.one_hot.dims(), [2, 3]);
        assert_eq!(batch.targets.dims(), [2]);

        let one_hot = batch.one_hot.into_data().to_vec::<f32>().unwrap();
        assert_eq!(one_hot, vec![0.0, 1.0, 0.0, 1.0, 0.0, 0.0]);
    }
}
