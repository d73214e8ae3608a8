//! Model artifacts on disk
//!
//! An artifact directory holds:
//! - `model.json`: the [`ModelConfig`]
//! - `classes.json`: the ordered class catalog
//! - `model.mpk`: the weights record

use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::record::CompactRecorder;
use burn::tensor::backend::Backend;
use tracing::info;

use super::classifier::CropClassifier;
use super::config::ModelConfig;
use crate::dataset::ClassCatalog;
use crate::utils::error::{AgronomicareError, Result};

pub const CONFIG_FILE: &str = "model.json";
pub const CLASSES_FILE: &str = "classes.json";
/// Record stem; the recorder appends `.mpk`
pub const WEIGHTS_STEM: &str = "model";

/// A trained classifier together with its configuration and catalog
#[derive(Debug)]
pub struct ModelArtifact<B: Backend> {
    pub model: CropClassifier<B>,
    pub config: ModelConfig,
    pub catalog: ClassCatalog,
}

impl<B: Backend> ModelArtifact<B> {
    /// Bundle a model with its catalog; the head width must match the catalog
    pub fn new(model: CropClassifier<B>, config: ModelConfig, catalog: ClassCatalog) -> Result<Self> {
        check_head_width(&model, &catalog)?;
        Ok(Self {
            model,
            config,
            catalog,
        })
    }

    /// Write the three artifact files into `dir`
    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;

        self.config.save(&dir.join(CONFIG_FILE))?;
        self.catalog.save_json(&dir.join(CLASSES_FILE))?;

        self.model
            .clone()
            .save_file(dir.join(WEIGHTS_STEM), &CompactRecorder::new())
            .map_err(|e| AgronomicareError::Model(format!("failed to save weights: {}", e)))?;

        info!("Saved model artifact to {:?}", dir);
        Ok(())
    }

    /// Read an artifact directory
    pub fn load(dir: &Path, device: &B::Device) -> Result<Self> {
        if !dir.is_dir() {
            return Err(AgronomicareError::PathNotFound(dir.to_path_buf()));
        }

        let config = ModelConfig::load(&dir.join(CONFIG_FILE))?;
        let catalog = ClassCatalog::load_json(&dir.join(CLASSES_FILE))?;

        let weights = weights_path(dir);
        if !weights.exists() {
            return Err(AgronomicareError::PathNotFound(weights));
        }

        let model = CropClassifier::<B>::new(&config, device)
            .load_file(dir.join(WEIGHTS_STEM), &CompactRecorder::new(), device)
            .map_err(|e| AgronomicareError::Model(format!("failed to load weights from {:?}: {}", dir, e)))?;

        info!(
            "Loaded {} model with {} classes from {:?}",
            config.backbone,
            catalog.len(),
            dir
        );

        Self::new(model, config, catalog)
    }
}

/// Path of the weights record inside an artifact directory
pub fn weights_path(dir: &Path) -> PathBuf {
    dir.join(format!("{}.mpk", WEIGHTS_STEM))
}

fn check_head_width<B: Backend>(model: &CropClassifier<B>, catalog: &ClassCatalog) -> Result<()> {
    if model.num_classes() != catalog.len() {
        return Err(AgronomicareError::Model(format!(
            "model head has {} outputs but the class catalog has {} classes",
            model.num_classes(),
            catalog.len()
        )));
    }
    Ok(())
}
