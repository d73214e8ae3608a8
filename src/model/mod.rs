//! Model module for the crop disease classifier using the Burn framework
//!
//! This module provides:
//! - The EfficientNet backbone and the classification head
//! - Model configuration and hyperparameters
//! - Building, freezing and unfreezing for the two training phases
//! - Saving and loading trained model artifacts

pub mod artifact;
pub mod classifier;
pub mod config;
pub mod efficientnet;
pub mod freeze;

// Re-export main types for convenience
pub use artifact::ModelArtifact;
pub use classifier::{CropClassifier, LayerInfo};
pub use config::{BackboneVariant, ModelConfig, TrainingConfig};
pub use efficientnet::{EfficientNet, LayerKind, NormPolicy};
pub use freeze::{build_model, unfreeze_and_clone, BackboneSource, CompiledModel, LossKind, TrainableLayers};
