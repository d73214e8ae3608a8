//! Dataset module for crop disease images
//!
//! This module provides functionality for:
//! - Enumerating a class-per-directory image tree into a labeled table
//! - The deterministic 80/20 train/validation split
//! - Burn `Dataset`/`Batcher` integration for the training loop
//! - The ordered class catalog that decodes model output

pub mod burn_dataset;
pub mod loader;
pub mod split;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::utils::error::{AgronomicareError, Result};

// Re-export main types for convenience
pub use burn_dataset::{CropBatch, CropBatcher, CropImageDataset, CropItem};
pub use loader::{rename_class_dir, CropDataset, DatasetStats, LabeledImageRecord};
pub use split::TrainValSplit;

/// Class name that gets the congratulation message instead of remedies
pub const HEALTHY_CLASS: &str = "healthy";

/// Classes of the deployed model, in head index order
pub const DEFAULT_CLASS_NAMES: [&str; 25] = [
    "alternaria_leaf_spot",
    "bacterial_blight",
    "bacterial_spot",
    "bacterial_wilt",
    "black_measles",
    "black_rot",
    "blast",
    "brown_spot",
    "brown_streak_disease",
    "citrus_greening",
    "common_rust",
    "early_blight",
    "gray_leaf_spot",
    "healthy",
    "isariopsis_leaf_spot",
    "late_blight",
    "leaf_curl",
    "leaf_mold",
    "mosaic_disease",
    "northern_leaf_blight",
    "powdery_mildew",
    "red_rot",
    "spider_mites",
    "target_spot",
    "tungro",
];

/// Ordered list of class names; position `i` is output `i` of the head
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassCatalog {
    names: Vec<String>,
}

impl Default for ClassCatalog {
    fn default() -> Self {
        Self {
            names: DEFAULT_CLASS_NAMES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ClassCatalog {
    /// Build a catalog from names; empty or duplicated names are rejected
    pub fn new(names: Vec<String>) -> Result<Self> {
        if names.is_empty() {
            return Err(AgronomicareError::Config(
                "class catalog must contain at least one class".to_string(),
            ));
        }
        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return Err(AgronomicareError::Config(format!(
                    "duplicate class name in catalog: {}",
                    name
                )));
            }
        }
        Ok(Self { names })
    }

    /// Number of classes
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Get the class name for a given index
    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// Get the index for a given class name
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Load a catalog from a JSON array of names
    pub fn load_json(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(AgronomicareError::PathNotFound(path.to_path_buf()));
        }
        let names: Vec<String> = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        Self::new(names)
    }

    /// Save the catalog as a JSON array of names
    pub fn save_json(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(&self.names)?)?;
        Ok(())
    }
}

/// Check if a class represents a healthy plant (not diseased)
pub fn is_healthy_class(name: &str) -> bool {
    name == HEALTHY_CLASS
}
