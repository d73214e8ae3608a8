//! Remedy recommendations
//!
//! A static CSV table keyed by class name, loaded once and queried by
//! exact match.

pub mod remedy;

pub use remedy::{RemedyField, RemedyRecord, RemedyTable, FALLBACK_KEY_COLUMN, KEY_COLUMN};
