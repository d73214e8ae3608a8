//! Training module
//!
//! This module provides:
//! - The fit loop for a compiled classifier (head phase and fine-tuning)
//! - Dataset-wide evaluation in inference mode
//! - Per-epoch training history

pub mod history;
pub mod trainer;

pub use history::{TrainingHistory, HISTORY_FILE};
pub use trainer::{categorical_cross_entropy, evaluate, fit, Evaluation, FitOptions};
