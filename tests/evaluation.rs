//! Metrics, report and plots over one set of predictions

use agronomicare::training::TrainingHistory;
use agronomicare::utils::charts::{plot_training_metrics, save_confusion_matrix};
use agronomicare::utils::metrics::roc_auc_score;
use agronomicare::{ClassificationReport, Metrics};
use approx::assert_abs_diff_eq;
use tempfile::tempdir;

fn names() -> Vec<String> {
    ["blast", "healthy", "tungro"].iter().map(|s| s.to_string()).collect()
}

fn probabilities() -> (Vec<Vec<f32>>, Vec<usize>) {
    let probs = vec![
        vec![0.8, 0.1, 0.1],
        vec![0.6, 0.3, 0.1],
        vec![0.2, 0.7, 0.1],
        vec![0.5, 0.4, 0.1],
        vec![0.1, 0.2, 0.7],
        vec![0.3, 0.3, 0.4],
    ];
    (probs, vec![0, 0, 1, 1, 2, 2])
}

#[test]
fn metrics_report_and_plots() {
    let (probs, labels) = probabilities();
    let metrics = Metrics::from_probabilities(&probs, &labels, 3).unwrap();

    assert_eq!(metrics.total_samples, 6);
    assert_eq!(metrics.correct_predictions, 5);
    assert_abs_diff_eq!(metrics.accuracy, 5.0 / 6.0, epsilon = 1e-9);
    assert!(metrics.roc_auc.is_some());

    for row in metrics.confusion_matrix.normalize_rows() {
        assert_abs_diff_eq!(row.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
    }

    let report = ClassificationReport::new(&metrics, &names()).render();
    for needle in ["precision", "recall", "f1-score", "support", "accuracy", "macro avg", "weighted avg", "tungro"] {
        assert!(report.contains(needle), "report lacks {}", needle);
    }

    let dir = tempdir().unwrap();
    let raw = dir.path().join("cm.svg");
    let normalized = dir.path().join("cm_normalized.svg");
    save_confusion_matrix(&metrics.confusion_matrix, &names(), false, "Confusion Matrix", &raw).unwrap();
    save_confusion_matrix(&metrics.confusion_matrix, &names(), true, "Normalized", &normalized).unwrap();
    assert!(std::fs::read_to_string(&raw).unwrap().starts_with("<svg"));
    assert!(std::fs::read_to_string(&normalized).unwrap().contains("Normalized"));
}

#[test]
fn binary_roc_auc_uses_positive_class() {
    let probs = vec![vec![0.9, 0.1], vec![0.6, 0.4], vec![0.35, 0.65], vec![0.2, 0.8]];
    let labels = vec![0, 0, 1, 1];
    assert_abs_diff_eq!(roc_auc_score(&labels, &probs, 2).unwrap(), 1.0, epsilon = 1e-12);

    let inverted = vec![1, 1, 0, 0];
    assert_abs_diff_eq!(roc_auc_score(&inverted, &probs, 2).unwrap(), 0.0, epsilon = 1e-12);
}

#[test]
fn history_round_trip_and_curves() {
    let dir = tempdir().unwrap();
    let mut history = TrainingHistory::default();
    history.push_epoch(1.2, 0.4, 1.3, 0.35);
    history.push_epoch(0.9, 0.6, 1.0, 0.55);

    let json = dir.path().join("history.json");
    history.save(&json).unwrap();
    let loaded = TrainingHistory::load(&json).unwrap();
    assert_eq!(loaded, history);

    let svg = dir.path().join("curves.svg");
    plot_training_metrics(&loaded, &svg).unwrap();
    let content = std::fs::read_to_string(&svg).unwrap();
    assert!(content.contains("Training and Validation Accuracy"));
    assert!(content.contains("Training and Validation Loss"));
}
