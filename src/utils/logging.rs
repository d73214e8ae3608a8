//! Logging Module
//!
//! Structured logging through the `tracing` crate, configured once per
//! process by the CLI or the server.

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Environment variable that overrides the configured level
pub const LOG_ENV: &str = "AGRONOMICARE_LOG";

/// How the process-wide subscriber is set up
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    /// Print the module path of each event
    pub show_target: bool,
    pub thread_ids: bool,
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::at(Level::INFO)
    }
}

impl LogConfig {
    fn at(level: Level) -> Self {
        Self {
            level,
            show_target: level >= Level::DEBUG,
            thread_ids: level >= Level::DEBUG,
            ansi: true,
        }
    }

    /// Debug output with module paths and thread ids, for `--verbose`
    pub fn verbose() -> Self {
        Self::at(Level::DEBUG)
    }

    /// Errors only
    pub fn quiet() -> Self {
        Self::at(Level::ERROR)
    }

    /// Replace the level with `AGRONOMICARE_LOG` when it names one
    ///
    /// Unknown values are ignored so a typo never silences the process.
    pub fn with_env_override(self) -> Self {
        match std::env::var(LOG_ENV) {
            Ok(value) => self.with_level_name(&value),
            Err(_) => self,
        }
    }

    fn with_level_name(self, name: &str) -> Self {
        let name = match name.trim() {
            n if n.eq_ignore_ascii_case("warning") => "warn",
            n => n,
        };
        match Level::from_str(name) {
            Ok(level) => Self { level, ..self },
            Err(_) => self,
        }
    }
}

/// Install the global subscriber
///
/// Fails if one was already installed.
pub fn init_logging(config: &LogConfig) -> Result<(), String> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.level)
        .with_target(config.show_target)
        .with_thread_ids(config.thread_ids)
        .with_ansi(config.ansi)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| format!("could not install log subscriber: {}", e))
}

/// Per-epoch progress logger for the fit loop
pub struct TrainingLogger {
    phase: String,
    epoch: usize,
    total_epochs: usize,
    epoch_start: std::time::Instant,
    training_start: std::time::Instant,
}

impl TrainingLogger {
    /// Create a new training logger for a named phase ("head", "fine-tune")
    pub fn new(phase: &str, total_epochs: usize) -> Self {
        Self {
            phase: phase.to_string(),
            epoch: 0,
            total_epochs,
            epoch_start: std::time::Instant::now(),
            training_start: std::time::Instant::now(),
        }
    }

    /// Log start of an epoch
    pub fn start_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
        self.epoch_start = std::time::Instant::now();

        tracing::info!("[{}] Epoch {}/{} started", self.phase, epoch + 1, self.total_epochs);
    }

    /// Log end of an epoch with its metrics
    pub fn end_epoch(&self, loss: f64, accuracy: f64, val_loss: f64, val_accuracy: f64) {
        let epoch_time = self.epoch_start.elapsed();
        let total_time = self.training_start.elapsed();

        let epochs_remaining = self.total_epochs.saturating_sub(self.epoch + 1);
        let avg_epoch_time = total_time.as_secs_f64() / (self.epoch + 1) as f64;
        let eta_secs = epochs_remaining as f64 * avg_epoch_time;

        tracing::info!(
            "[{}] Epoch {}/{} in {:.1}s | loss {:.4} | acc {:.2}% | val_loss {:.4} | val_acc {:.2}% | ETA {}",
            self.phase,
            self.epoch + 1,
            self.total_epochs,
            epoch_time.as_secs_f64(),
            loss,
            accuracy * 100.0,
            val_loss,
            val_accuracy * 100.0,
            super::format_duration(eta_secs)
        );
    }

    /// Log training completion
    pub fn log_complete(&self, best_val_accuracy: f64) {
        let total_time = self.training_start.elapsed();

        tracing::info!(
            "[{}] Training complete: {} epochs in {} | best val_acc {:.2}%",
            self.phase,
            self.total_epochs,
            super::format_duration(total_time.as_secs_f64()),
            best_val_accuracy * 100.0
        );
    }
}
