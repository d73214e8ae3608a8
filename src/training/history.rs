//! Per-epoch training history
//!
//! Serialized as JSON next to every checkpoint and read back by the
//! `plot-history` command.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::utils::error::{AgronomicareError, Result};

/// File name used next to checkpoints
pub const HISTORY_FILE: &str = "history.json";

/// Accuracy and loss series, one value per epoch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub accuracy: Vec<f64>,
    pub val_accuracy: Vec<f64>,
    pub loss: Vec<f64>,
    pub val_loss: Vec<f64>,
}

impl TrainingHistory {
    /// Record the metrics of one epoch
    pub fn push_epoch(&mut self, loss: f64, accuracy: f64, val_loss: f64, val_accuracy: f64) {
        self.loss.push(loss);
        self.accuracy.push(accuracy);
        self.val_loss.push(val_loss);
        self.val_accuracy.push(val_accuracy);
    }

    /// Append the epochs of a later phase (e.g. fine-tuning after the head phase)
    pub fn extend(&mut self, other: &TrainingHistory) {
        self.accuracy.extend_from_slice(&other.accuracy);
        self.val_accuracy.extend_from_slice(&other.val_accuracy);
        self.loss.extend_from_slice(&other.loss);
        self.val_loss.extend_from_slice(&other.val_loss);
    }

    /// Number of recorded epochs
    pub fn len(&self) -> usize {
        self.loss.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loss.is_empty()
    }

    /// Best validation accuracy so far
    pub fn best_val_accuracy(&self) -> Option<f64> {
        self.val_accuracy.iter().copied().fold(None, |best, v| match best {
            Some(b) if b >= v => Some(b),
            _ => Some(v),
        })
    }

    /// Save the history as JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Load a JSON history; all four series must have the same length
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(AgronomicareError::PathNotFound(path.to_path_buf()));
        }
        let history: Self = serde_json::from_str(&std::fs::read_to_string(path)?)?;

        let n = history.loss.len();
        if history.accuracy.len() != n || history.val_accuracy.len() != n || history.val_loss.len() != n {
            return Err(AgronomicareError::Serialization(format!(
                "history series in {:?} have different lengths",
                path
            )));
        }
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_push_and_best() {
        let mut history = TrainingHistory::default();
        assert_eq!(history.best_val_accuracy(), None);

        history.push_epoch(1.0, 0.5, 1.1, 0.4);
        history.push_epoch(0.8, 0.6, 0.9, 0.7);
        history.push_epoch(0.7, 0.7, 1.0, 0.65);

        assert_eq!(history.len(), 3);
        assert_eq!(history.best_val_accuracy(), Some(0.7));
    }

    #[test]
    fn test_extend_concatenates_phases() {
        let mut head = TrainingHistory::default();
        head.push_epoch(1.0, 0.5, 1.1, 0.4);
        let mut fine = TrainingHistory::default();
        fine.push_epoch(0.5, 0.8, 0.6, 0.75);

        head.extend(&fine);
        assert_eq!(head.accuracy, vec![0.5, 0.8]);
        assert_eq!(head.val_loss, vec![1.1, 0.6]);
    }

    #[test]
    fn test_json_round_trip_and_validation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(HISTORY_FILE);

        let mut history = TrainingHistory::default();
        history.push_epoch(0.9, 0.6, 1.0, 0.55);
        history.save(&path).unwrap();
        assert_eq!(TrainingHistory::load(&path).unwrap(), history);

        std::fs::write(&path, r#"{"accuracy":[0.1],"val_accuracy":[],"loss":[1.0],"val_loss":[1.0]}"#).unwrap();
        assert!(TrainingHistory::load(&path).is_err());
    }
}
