//! Shared helpers: error type, logging, evaluation metrics and SVG charts

pub mod charts;
pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{AgronomicareError, Result};
pub use logging::init_logging;
pub use metrics::{ClassificationReport, ConfusionMatrix, Metrics};

/// Render seconds as `12.3s`, `4m 05s` or `2h 10m`
pub fn format_duration(seconds: f64) -> String {
    if seconds < 60.0 {
        return format!("{:.1}s", seconds.max(0.0));
    }
    let whole = seconds.round() as u64;
    let (hours, minutes, secs) = (whole / 3600, whole % 3600 / 60, whole % 60);
    if hours == 0 {
        format!("{}m {:02}s", minutes, secs)
    } else {
        format!("{}h {:02}m", hours, minutes)
    }
}

/// Confidence score as shown to users: a percentage truncated to one decimal
pub fn format_score(confidence: f32) -> String {
    // Multiply in f32: widening first keeps the representation error
    // (0.7f32 is 0.69999998...) and floors to 69.9.
    let permille = (confidence * 1000.0).floor();
    format!("{:.1}%", permille / 10.0)
}
