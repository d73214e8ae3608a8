//! Evaluation metrics
//!
//! Confusion matrix (raw counts and row-normalized), per-class
//! precision/recall/F1 with a text classification report, ROC-AUC from
//! class probabilities, and the small accumulators the fit loop uses.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::utils::error::{AgronomicareError, Result};

/// Counts of (actual, predicted) pairs; rows are actual classes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    pub fn new(num_classes: usize) -> Self {
        Self {
            counts: vec![vec![0; num_classes]; num_classes],
        }
    }

    /// Tally paired predictions and labels; out-of-range indices are dropped
    pub fn from_predictions(
        predictions: &[usize],
        ground_truth: &[usize],
        num_classes: usize,
    ) -> Self {
        let mut cm = Self::new(num_classes);
        for (&predicted, &actual) in predictions.iter().zip(ground_truth) {
            cm.record(actual, predicted);
        }
        cm
    }

    pub fn record(&mut self, actual: usize, predicted: usize) {
        if let Some(cell) = self
            .counts
            .get_mut(actual)
            .and_then(|row| row.get_mut(predicted))
        {
            *cell += 1;
        }
    }

    pub fn num_classes(&self) -> usize {
        self.counts.len()
    }

    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        self.counts
            .get(actual)
            .and_then(|row| row.get(predicted))
            .copied()
            .unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    /// Diagonal sum
    pub fn correct(&self) -> usize {
        (0..self.num_classes()).map(|c| self.counts[c][c]).sum()
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.correct(), self.total())
    }

    /// How many samples of `class` there were
    pub fn support(&self, class: usize) -> usize {
        self.counts.get(class).map_or(0, |row| row.iter().sum())
    }

    /// How many samples were predicted as `class`
    pub fn predicted(&self, class: usize) -> usize {
        self.counts.iter().filter_map(|row| row.get(class)).sum()
    }

    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        self.counts
            .iter()
            .map(|row| row.iter().map(|&n| n as f64).collect())
            .collect()
    }

    /// Each row divided by its sum; classes with no samples stay all zero
    pub fn normalize_rows(&self) -> Vec<Vec<f64>> {
        self.counts
            .iter()
            .map(|row| {
                let sum: usize = row.iter().sum();
                row.iter().map(|&n| ratio(n, sum)).collect()
            })
            .collect()
    }

    /// Text table, counts or fractions, with class names cut to fit
    pub fn display(&self, class_names: Option<&[String]>, normalize: bool) -> String {
        let label = |class: usize, width: usize| -> String {
            class_names
                .and_then(|names| names.get(class))
                .map(|name| name.chars().take(width).collect())
                .unwrap_or_else(|| class.to_string())
        };

        let mut out = if normalize {
            String::from("\nNormalized confusion matrix (rows=actual, cols=predicted):\n\n")
        } else {
            String::from("\nConfusion matrix, without normalization (rows=actual, cols=predicted):\n\n")
        };

        out.push_str(&" ".repeat(10));
        for class in 0..self.num_classes() {
            out.push_str(&format!("{:>7}", label(class, 6)));
        }
        out.push('\n');

        let cells: Vec<Vec<String>> = if normalize {
            self.normalize_rows()
                .iter()
                .map(|row| row.iter().map(|v| format!("{:>7.2}", v)).collect())
                .collect()
        } else {
            self.counts
                .iter()
                .map(|row| row.iter().map(|n| format!("{:>7}", n)).collect())
                .collect()
        };
        for (class, row) in cells.iter().enumerate() {
            out.push_str(&format!("{:>9} {}\n", label(class, 9), row.concat()));
        }

        out.push_str(&format!("\nAccuracy: {:.2}%\n", self.accuracy() * 100.0));
        out
    }

    /// Raw counts with class names as the header row and first column
    pub fn save_csv(&self, path: &Path, class_names: &[String]) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;

        let header = std::iter::once("actual\\predicted".to_string())
            .chain((0..self.num_classes()).map(|c| class_label(class_names, c)));
        writer.write_record(header)?;

        for (class, row) in self.counts.iter().enumerate() {
            let record = std::iter::once(class_label(class_names, class))
                .chain(row.iter().map(|n| n.to_string()));
            writer.write_record(record)?;
        }

        writer.flush()?;
        Ok(())
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display(None, false))
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

fn class_label(class_names: &[String], class: usize) -> String {
    class_names
        .get(class)
        .cloned()
        .unwrap_or_else(|| class.to_string())
}

/// One class's row of the confusion matrix, reduced to the report scores
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassScores {
    pub class_idx: usize,
    pub hits: usize,
    /// Samples predicted as this class
    pub predicted: usize,
    /// Samples that truly are this class
    pub support: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

impl ClassScores {
    pub fn of(cm: &ConfusionMatrix, class_idx: usize) -> Self {
        let hits = cm.get(class_idx, class_idx);
        let predicted = cm.predicted(class_idx);
        let support = cm.support(class_idx);

        let precision = ratio(hits, predicted);
        let recall = ratio(hits, support);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        Self {
            class_idx,
            hits,
            predicted,
            support,
            precision,
            recall,
            f1,
        }
    }

    pub fn false_positives(&self) -> usize {
        self.predicted - self.hits
    }

    pub fn false_negatives(&self) -> usize {
        self.support - self.hits
    }

    /// Seen among the labels or the predictions
    fn is_present(&self) -> bool {
        self.support > 0 || self.predicted > 0
    }
}

/// Everything `evaluate` reports for one split
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metrics {
    pub total_samples: usize,
    pub correct_predictions: usize,
    pub accuracy: f64,
    /// Unweighted means over classes seen in the labels or the predictions
    pub macro_precision: f64,
    pub macro_recall: f64,
    pub macro_f1: f64,
    pub weighted_f1: f64,
    /// Present only when probabilities were given and it is defined
    pub roc_auc: Option<f64>,
    pub per_class: Vec<ClassScores>,
    pub confusion_matrix: ConfusionMatrix,
}

impl Metrics {
    pub fn from_predictions(
        predictions: &[usize],
        ground_truth: &[usize],
        num_classes: usize,
    ) -> Result<Self> {
        if predictions.len() != ground_truth.len() {
            return Err(AgronomicareError::InvalidInput(format!(
                "{} predictions for {} ground truth labels",
                predictions.len(),
                ground_truth.len()
            )));
        }
        if predictions.is_empty() {
            return Ok(Self::default());
        }

        let confusion_matrix =
            ConfusionMatrix::from_predictions(predictions, ground_truth, num_classes);
        let per_class: Vec<ClassScores> = (0..num_classes)
            .map(|class| ClassScores::of(&confusion_matrix, class))
            .collect();

        // Same class set as the report rows: seen in labels or predictions.
        let present: Vec<&ClassScores> = per_class.iter().filter(|s| s.is_present()).collect();
        let mean = |score: fn(&ClassScores) -> f64| {
            if present.is_empty() {
                0.0
            } else {
                present.iter().map(|s| score(s)).sum::<f64>() / present.len() as f64
            }
        };
        let support: usize = per_class.iter().map(|s| s.support).sum();
        let weighted_f1 = if support == 0 {
            0.0
        } else {
            per_class.iter().map(|s| s.f1 * s.support as f64).sum::<f64>() / support as f64
        };

        Ok(Self {
            total_samples: predictions.len(),
            correct_predictions: confusion_matrix.correct(),
            accuracy: ratio(confusion_matrix.correct(), predictions.len()),
            macro_precision: mean(|s| s.precision),
            macro_recall: mean(|s| s.recall),
            macro_f1: mean(|s| s.f1),
            weighted_f1,
            roc_auc: None,
            per_class,
            confusion_matrix,
        })
    }

    /// Predictions are the arg-max of each probability row
    pub fn from_probabilities(
        probabilities: &[Vec<f32>],
        ground_truth: &[usize],
        num_classes: usize,
    ) -> Result<Self> {
        let predictions: Vec<usize> = probabilities.iter().map(|row| argmax(row)).collect();
        let mut metrics = Self::from_predictions(&predictions, ground_truth, num_classes)?;
        metrics.roc_auc = roc_auc_score(ground_truth, probabilities, num_classes).ok();
        Ok(metrics)
    }

    pub fn display(&self) -> String {
        let percent = |v: f64| format!("{:6.2}%", v * 100.0);
        let auc = self
            .roc_auc
            .map_or_else(|| "    n/a".to_string(), |v| format!("{:7.4}", v));

        let rows = [
            ("Samples", format!("{:7}", self.total_samples)),
            ("Accuracy", percent(self.accuracy)),
            ("Macro precision", percent(self.macro_precision)),
            ("Macro recall", percent(self.macro_recall)),
            ("Macro F1", percent(self.macro_f1)),
            ("Weighted F1", percent(self.weighted_f1)),
            ("ROC AUC", auc),
        ];

        let mut out = String::from("\n📊 Evaluation\n");
        for (name, value) in rows {
            out.push_str(&format!("  {:<16} {}\n", name, value));
        }
        out
    }
}

impl fmt::Display for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

/// Per-class precision/recall/F1 table in the familiar text layout
#[derive(Debug, Clone)]
pub struct ClassificationReport {
    rows: Vec<(String, ClassScores)>,
    accuracy: f64,
    total: usize,
}

impl ClassificationReport {
    /// Only classes seen in the labels or predictions get a row
    pub fn new(metrics: &Metrics, class_names: &[String]) -> Self {
        let rows = metrics
            .per_class
            .iter()
            .filter(|s| s.is_present())
            .map(|s| (class_label(class_names, s.class_idx), *s))
            .collect();

        Self {
            rows,
            accuracy: metrics.accuracy,
            total: metrics.total_samples,
        }
    }

    fn average(&self, weighted: bool, score: impl Fn(&ClassScores) -> f64) -> f64 {
        let weight = |s: &ClassScores| if weighted { s.support as f64 } else { 1.0 };
        let total: f64 = self.rows.iter().map(|(_, s)| weight(s)).sum();
        if total == 0.0 {
            return 0.0;
        }
        self.rows.iter().map(|(_, s)| score(s) * weight(s)).sum::<f64>() / total
    }

    pub fn render(&self) -> String {
        let width = self
            .rows
            .iter()
            .map(|(name, _)| name.chars().count())
            .chain(std::iter::once("weighted avg".len()))
            .max()
            .unwrap_or(0);
        let line = |name: &str, p: String, r: String, f1: String, support: usize| {
            format!("{:>w$}  {:>9} {:>9} {:>9} {:>9}\n", name, p, r, f1, support, w = width)
        };
        let fixed = |v: f64| format!("{:.2}", v);

        let mut out = format!(
            "{:>w$}  {:>9} {:>9} {:>9} {:>9}\n\n",
            "", "precision", "recall", "f1-score", "support",
            w = width
        );
        for (name, s) in &self.rows {
            out.push_str(&line(name, fixed(s.precision), fixed(s.recall), fixed(s.f1), s.support));
        }
        out.push('\n');

        out.push_str(&line("accuracy", String::new(), String::new(), fixed(self.accuracy), self.total));
        for (name, weighted) in [("macro avg", false), ("weighted avg", true)] {
            out.push_str(&line(
                name,
                fixed(self.average(weighted, |s| s.precision)),
                fixed(self.average(weighted, |s| s.recall)),
                fixed(self.average(weighted, |s| s.f1)),
                self.total,
            ));
        }
        out
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Index of the largest value; ties resolve to the lowest index
pub fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (idx, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = idx;
        }
    }
    best
}

/// Area under the ROC curve from per-sample class probabilities
///
/// Two classes give the binary AUC of the positive class (index 1). More
/// classes give the macro one-vs-rest average; classes without positives or
/// without negatives are skipped.
pub fn roc_auc_score(
    ground_truth: &[usize],
    probabilities: &[Vec<f32>],
    num_classes: usize,
) -> Result<f64> {
    if ground_truth.len() != probabilities.len() {
        return Err(AgronomicareError::InvalidInput(format!(
            "{} labels for {} probability rows",
            ground_truth.len(),
            probabilities.len()
        )));
    }
    if let Some(row) = probabilities.iter().find(|p| p.len() != num_classes) {
        return Err(AgronomicareError::InvalidInput(format!(
            "probability row of length {} for {} classes",
            row.len(),
            num_classes
        )));
    }

    let positive_classes = if num_classes == 2 { 1..2 } else { 0..num_classes };
    let areas: Vec<f64> = positive_classes
        .filter_map(|class| {
            let scored: Vec<(f64, bool)> = probabilities
                .iter()
                .zip(ground_truth)
                .map(|(p, &gt)| (p[class] as f64, gt == class))
                .collect();
            one_vs_rest_auc(scored)
        })
        .collect();

    if areas.is_empty() {
        return Err(AgronomicareError::InvalidInput(
            "ROC AUC is undefined when only one class is present".to_string(),
        ));
    }
    Ok(areas.iter().sum::<f64>() / areas.len() as f64)
}

/// Mann-Whitney U over (score, is_positive) pairs, ties sharing their mean rank
fn one_vs_rest_auc(mut scored: Vec<(f64, bool)>) -> Option<f64> {
    let positives = scored.iter().filter(|(_, p)| *p).count();
    let negatives = scored.len() - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }

    scored.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut positive_rank_sum = 0.0;
    let mut group_start = 0;
    for group in scored.chunk_by(|a, b| a.0 == b.0) {
        // 1-based ranks group_start+1 ..= group_start+len
        let mean_rank = group_start as f64 + (group.len() as f64 + 1.0) / 2.0;
        let hits = group.iter().filter(|(_, p)| *p).count();
        positive_rank_sum += mean_rank * hits as f64;
        group_start += group.len();
    }

    let positives = positives as f64;
    Some((positive_rank_sum - positives * (positives + 1.0) / 2.0) / (positives * negatives as f64))
}

/// Sample-weighted mean of per-batch values
#[derive(Debug, Clone, Default)]
pub struct RunningAverage {
    weighted_sum: f64,
    samples: usize,
}

impl RunningAverage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: f64, samples: usize) {
        self.weighted_sum += value * samples as f64;
        self.samples += samples;
    }

    pub fn average(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.weighted_sum / self.samples as f64
        }
    }
}

/// Fraction of correct predictions over the batches seen so far
#[derive(Debug, Clone, Default)]
pub struct AccuracyTracker {
    hits: usize,
    seen: usize,
}

impl AccuracyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_batch(&mut self, predictions: &[usize], ground_truth: &[usize]) {
        let pairs = predictions.iter().zip(ground_truth);
        self.seen += pairs.len();
        self.hits += pairs.filter(|(p, g)| p == g).count();
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.hits, self.seen)
    }
}
