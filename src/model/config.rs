//! Classifier and training settings
//!
//! Both structs are written as JSON next to the checkpoints they produced
//! (`model.json`, `training.json`).

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::utils::error::{AgronomicareError, Result};
use crate::{BATCH_SIZE, IMAGE_SIZE, RSEED};

/// Learning rate of the head-only phase
pub const HEAD_LEARNING_RATE: f64 = 1e-2;

/// Learning rate after unfreezing
pub const FINE_TUNE_LEARNING_RATE: f64 = 1e-5;

/// Number of trailing layers considered for unfreezing
pub const UNFREEZE_LAST_LAYERS: usize = 10;

/// Checkpoint directory of the final model under the training output
pub const MODEL_DIR: &str = "model";

/// Checkpoint directory of the head phase when fine-tuning follows
pub const HEAD_DIR: &str = "head";

/// Feature extractor architecture
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackboneVariant {
    /// EfficientNet-B0 (16 MBConv blocks, 1280 output channels)
    #[default]
    B0,
    /// Three-block miniature with the same layer layout, for tests and demos
    Tiny,
}

impl std::fmt::Display for BackboneVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackboneVariant::B0 => write!(f, "efficientnet-b0"),
            BackboneVariant::Tiny => write!(f, "efficientnet-tiny"),
        }
    }
}

/// Configuration for the classifier architecture and its two learning phases
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub num_classes: usize,

    /// Side of the square network input, a multiple of 32
    pub input_size: usize,

    /// Dropout rate before the dense head
    pub dropout_rate: f64,

    /// Feature extractor architecture
    pub backbone: BackboneVariant,

    /// Adam learning rate while only the head trains
    pub learning_rate: f64,

    /// Adam learning rate after unfreezing
    pub fine_tune_learning_rate: f64,

    /// Trailing layers considered when unfreezing
    pub unfreeze_last: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            num_classes: crate::dataset::DEFAULT_CLASS_NAMES.len(),
            input_size: IMAGE_SIZE,
            dropout_rate: 0.2,
            backbone: BackboneVariant::B0,
            learning_rate: HEAD_LEARNING_RATE,
            fine_tune_learning_rate: FINE_TUNE_LEARNING_RATE,
            unfreeze_last: UNFREEZE_LAST_LAYERS,
        }
    }
}

impl ModelConfig {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            ..Default::default()
        }
    }

    /// Select a different backbone
    pub fn with_backbone(mut self, backbone: BackboneVariant) -> Self {
        self.backbone = backbone;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let problem = if self.num_classes == 0 {
            "a classifier needs at least one class"
        } else if self.input_size == 0 || self.input_size % 32 != 0 {
            "input_size must be a positive multiple of 32"
        } else if !(0.0..1.0).contains(&self.dropout_rate) {
            "dropout_rate must lie in [0, 1)"
        } else if self.learning_rate <= 0.0 || self.fine_tune_learning_rate <= 0.0 {
            "learning rates must be positive"
        } else {
            return Ok(());
        };
        Err(AgronomicareError::Config(problem.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json(self, path)
    }

    /// Read and validate `model.json`
    pub fn load(path: &Path) -> Result<Self> {
        let config: Self = read_json(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// Hyperparameters of a two-phase run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Epochs of the head-only phase
    pub epochs: usize,

    /// Epochs after unfreezing
    pub fine_tune_epochs: usize,

    pub batch_size: usize,

    /// Seed for the split and the per-epoch shuffle
    pub seed: u64,

    /// Fraction of the images held out for validation
    pub validation_fraction: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            fine_tune_epochs: 10,
            batch_size: BATCH_SIZE,
            seed: RSEED,
            validation_fraction: crate::dataset::split::VALIDATION_FRACTION,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(AgronomicareError::Config("batch_size must be at least 1".to_string()));
        }
        if !(0.0..1.0).contains(&self.validation_fraction) {
            return Err(AgronomicareError::Config(
                "validation_fraction must lie in [0, 1)".to_string(),
            ));
        }
        Ok(())
    }

    /// Where the head phase saves its best checkpoint
    ///
    /// Without fine-tuning the head is the final model and goes to `model/`.
    pub fn head_checkpoint_dir(&self, output_dir: &Path) -> PathBuf {
        if self.fine_tune_epochs == 0 {
            output_dir.join(MODEL_DIR)
        } else {
            output_dir.join(HEAD_DIR)
        }
    }

    pub fn fine_tune_checkpoint_dir(&self, output_dir: &Path) -> PathBuf {
        output_dir.join(MODEL_DIR)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json(self, path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let config: Self = read_json(path)?;
        config.validate()?;
        Ok(config)
    }
}

fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    std::fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Err(AgronomicareError::PathNotFound(path.to_path_buf()));
    }
    Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_final_model_dir_without_fine_tuning() {
        let out = Path::new("output");
        let two_phase = TrainingConfig::default();
        assert_eq!(two_phase.head_checkpoint_dir(out), out.join("head"));
        assert_eq!(two_phase.fine_tune_checkpoint_dir(out), out.join("model"));

        let head_only = TrainingConfig {
            fine_tune_epochs: 0,
            ..TrainingConfig::default()
        };
        assert_eq!(head_only.head_checkpoint_dir(out), out.join("model"));
    }

    #[test]
    fn test_default_config() {
        let config = ModelConfig::default();
        assert_eq!(config.num_classes, crate::dataset::DEFAULT_CLASS_NAMES.len());
        assert_eq!(config.input_size, 224);
        assert_eq!(config.dropout_rate, 0.2);
        assert_eq!(config.learning_rate, 1e-2);
        assert_eq!(config.fine_tune_learning_rate, 1e-5);
        assert_eq!(config.unfreeze_last, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_configs() {
        assert!(ModelConfig::new(0).validate().is_err());

        for broken in [
            ModelConfig { input_size: 100, ..Default::default() },
            ModelConfig { dropout_rate: 1.0, ..Default::default() },
            ModelConfig { fine_tune_learning_rate: 0.0, ..Default::default() },
        ] {
            assert!(broken.validate().is_err(), "{:?}", broken);
        }

        let training = TrainingConfig { batch_size: 0, ..Default::default() };
        assert!(training.validate().is_err());
        assert!(matches!(
            TrainingConfig::load(Path::new("/nonexistent/training.json")),
            Err(AgronomicareError::PathNotFound(_))
        ));
    }

    #[test]
    fn test_config_json_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.json");
        let config = ModelConfig::new(4).with_backbone(BackboneVariant::Tiny);

        config.save(&path).unwrap();
        assert_eq!(ModelConfig::load(&path).unwrap(), config);

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"tiny\""));
    }

    #[test]
    fn test_training_config_defaults() {
        let training = TrainingConfig::default();
        assert_eq!((training.batch_size, training.seed), (32, 42));
        assert_eq!(training.validation_fraction, 0.2);
    }
}
