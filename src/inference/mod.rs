//! Inference module for single-image diagnosis
//!
//! This module provides:
//! - Preprocessing shared by training and serving
//! - The `ProbabilityModel` seam and the `classify` routine
//! - A `Predictor` backed by a saved model artifact

pub mod predictor;
pub mod preprocess;

// Re-export main types for convenience
pub use predictor::{classify, PredictionResult, Predictor, ProbabilityModel};
pub use preprocess::{decode_image, decode_upload, load_image, PreprocessedImage};
