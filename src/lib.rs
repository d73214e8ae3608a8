//! # Agronomicare
//!
//! Crop disease diagnosis built on the Burn framework: an EfficientNet-B0
//! backbone with a small classification head, plus a remedy recommender
//! backed by a static CSV table.
//!
//! ## Modules
//!
//! - `dataset`: directory enumeration, labeled tables, seeded train/validation splits
//! - `model`: EfficientNet backbone, classification head, freezing and fine-tuning
//! - `training`: fit loop and training history
//! - `inference`: preprocessing and single-image classification
//! - `recommend`: remedy lookup keyed by class name
//! - `utils`: logging, error types, metrics and SVG charts
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use agronomicare::inference::{classify, Predictor};
//! use agronomicare::recommend::{RemedyField, RemedyTable};
//!
//! let predictor = Predictor::<DefaultBackend>::load("output/model", &device)?;
//! let remedies = RemedyTable::from_path("data/pesticides_dataset.csv")?;
//!
//! let image = image::open("leaf.jpg")?;
//! let prediction = classify(&image, &predictor, predictor.catalog())?;
//! let remedy = remedies.lookup(&prediction.class_name, RemedyField::NaturalRemedies);
//! ```

pub mod backend;
pub mod dataset;
pub mod inference;
pub mod model;
pub mod recommend;
pub mod training;
pub mod utils;

pub use dataset::{ClassCatalog, CropDataset, LabeledImageRecord, TrainValSplit};
pub use inference::{classify, PredictionResult, Predictor, PreprocessedImage, ProbabilityModel};
pub use model::{build_model, unfreeze_and_clone, BackboneSource, CompiledModel, CropClassifier};
pub use recommend::{RemedyField, RemedyRecord, RemedyTable};
pub use training::{fit, TrainingHistory};
pub use utils::error::{AgronomicareError, Result};
pub use utils::metrics::{ClassificationReport, ConfusionMatrix, Metrics};

/// Side length of the square model input (pixels)
pub const IMAGE_SIZE: usize = 224;

/// Number of colour channels of the model input
pub const IMAGE_CHANNELS: usize = 3;

/// Batch size used by the dataset loader and trainer
pub const BATCH_SIZE: usize = 32;

/// Seed shared by shuffling and splitting
pub const RSEED: u64 = 42;

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
