//! SVG Chart Generator
//!
//! Generates the analysis plots as standalone SVG files: a labeled
//! confusion-matrix heat-map, side-by-side accuracy/loss training curves and
//! a colour histogram with one panel per channel.

use std::fs;
use std::path::Path;

use image::RgbImage;

use crate::training::TrainingHistory;
use crate::utils::error::Result;
use crate::utils::metrics::ConfusionMatrix;

/// Chart styling constants
const PANEL_WIDTH: f64 = 600.0;
const PANEL_HEIGHT: f64 = 450.0;
const MARGIN_TOP: f64 = 60.0;
const MARGIN_RIGHT: f64 = 30.0;
const MARGIN_BOTTOM: f64 = 70.0;
const MARGIN_LEFT: f64 = 80.0;

const COLOR_TRAIN: &str = "#3498db";
const COLOR_VALIDATION: &str = "#e67e22";
const COLOR_GRID: &str = "#ecf0f1";
const COLOR_AXIS: &str = "#2c3e50";
const COLOR_TEXT: &str = "#2c3e50";

const CHANNEL_COLORS: [(&str, &str); 3] = [("Red", "#e74c3c"), ("Green", "#27ae60"), ("Blue", "#2980b9")];

/// A named line in a chart panel
#[derive(Debug, Clone)]
pub struct DataSeries {
    pub name: String,
    pub values: Vec<f64>,
    pub color: String,
}

impl DataSeries {
    fn new(name: &str, values: &[f64], color: &str) -> Self {
        Self {
            name: name.to_string(),
            values: values.to_vec(),
            color: color.to_string(),
        }
    }
}

/// Write the confusion matrix heat-map, raw counts or row-normalized
pub fn save_confusion_matrix(
    cm: &ConfusionMatrix,
    class_names: &[String],
    normalize: bool,
    title: &str,
    output_path: &Path,
) -> Result<()> {
    let values = if normalize { cm.normalize_rows() } else { cm.to_rows() };
    fs::write(output_path, confusion_matrix_svg(&values, class_names, normalize, title))?;
    Ok(())
}

/// Render a labeled heat-map with a numeric annotation in every cell
///
/// Annotations are white on cells above half the maximum value and black
/// elsewhere.
pub fn confusion_matrix_svg(
    values: &[Vec<f64>],
    class_names: &[String],
    normalize: bool,
    title: &str,
) -> String {
    let n = values.len();
    let cell = if n > 12 { 32.0 } else { 56.0 };
    let label_space = 160.0;
    let width = label_space + n as f64 * cell + MARGIN_RIGHT;
    let height = MARGIN_TOP + n as f64 * cell + label_space;

    let max = values
        .iter()
        .flat_map(|row| row.iter().copied())
        .fold(0.0f64, f64::max);
    let thresh = max / 2.0;

    let label = |idx: usize| {
        class_names
            .get(idx)
            .cloned()
            .unwrap_or_else(|| idx.to_string())
    };

    let mut svg = svg_header(width, height);
    svg.push_str(&title_text(width / 2.0, title));

    for (row, row_values) in values.iter().enumerate() {
        let y = MARGIN_TOP + row as f64 * cell;

        svg.push_str(&format!(
            r#"<text x="{}" y="{}" text-anchor="end" font-family="Arial, sans-serif" font-size="11" fill="{}">{}</text>"#,
            label_space - 8.0, y + cell / 2.0 + 4.0, COLOR_TEXT, escape_xml(&label(row))
        ));

        for (col, &value) in row_values.iter().enumerate() {
            let x = label_space + col as f64 * cell;
            let intensity = if max > 0.0 { value / max } else { 0.0 };
            let text_color = if value > thresh { "white" } else { "black" };
            let annotation = if normalize {
                format!("{:.2}", value)
            } else {
                format!("{}", value as u64)
            };

            svg.push_str(&format!(
                r#"<rect x="{}" y="{}" width="{}" height="{}" fill="{}" stroke="white" stroke-width="1"/>"#,
                x, y, cell, cell, blues(intensity)
            ));
            svg.push_str(&format!(
                r#"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="10" fill="{}">{}</text>"#,
                x + cell / 2.0, y + cell / 2.0 + 4.0, text_color, annotation
            ));
        }
    }

    // Column labels, rotated like matplotlib's xticks(rotation=45)
    let base_y = MARGIN_TOP + n as f64 * cell + 12.0;
    for col in 0..n {
        let x = label_space + col as f64 * cell + cell / 2.0;
        svg.push_str(&format!(
            r#"<text x="{x}" y="{base_y}" text-anchor="end" font-family="Arial, sans-serif" font-size="11" fill="{}" transform="rotate(-45 {x} {base_y})">{}</text>"#,
            COLOR_TEXT, escape_xml(&label(col))
        ));
    }

    svg.push_str(&format!(
        r#"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="14" fill="{}">Predicted label</text>"#,
        label_space + n as f64 * cell / 2.0, height - 12.0, COLOR_TEXT
    ));
    svg.push_str(&format!(
        r#"<text x="18" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="14" fill="{}" transform="rotate(-90 18 {})">True label</text>"#,
        MARGIN_TOP + n as f64 * cell / 2.0, COLOR_TEXT, MARGIN_TOP + n as f64 * cell / 2.0
    ));

    svg.push_str("</svg>");
    svg
}

/// Write the accuracy and loss curves as two side-by-side panels
pub fn plot_training_metrics(history: &TrainingHistory, output_path: &Path) -> Result<()> {
    fs::write(output_path, training_curves_svg(history))?;
    Ok(())
}

/// Render train/validation accuracy (left) and loss (right) across epochs
pub fn training_curves_svg(history: &TrainingHistory) -> String {
    let width = PANEL_WIDTH * 2.0;
    let mut svg = svg_header(width, PANEL_HEIGHT);

    let accuracy = [
        DataSeries::new("Training Accuracy", &history.accuracy, COLOR_TRAIN),
        DataSeries::new("Validation Accuracy", &history.val_accuracy, COLOR_VALIDATION),
    ];
    let loss = [
        DataSeries::new("Training Loss", &history.loss, COLOR_TRAIN),
        DataSeries::new("Validation Loss", &history.val_loss, COLOR_VALIDATION),
    ];

    svg.push_str(&line_panel(0.0, "Training and Validation Accuracy", "Epoch", "Accuracy", &accuracy));
    svg.push_str(&line_panel(PANEL_WIDTH, "Training and Validation Loss", "Epoch", "Loss", &loss));

    svg.push_str("</svg>");
    svg
}

/// Write a 256-bin histogram per RGB channel of one image
pub fn generate_color_histogram(image: &RgbImage, title: &str, output_path: &Path) -> Result<()> {
    fs::write(output_path, color_histogram_svg(image, title))?;
    Ok(())
}

/// Count the pixels of each intensity per channel
pub fn color_histogram(image: &RgbImage) -> [[u64; 256]; 3] {
    let mut bins = [[0u64; 256]; 3];
    for pixel in image.pixels() {
        for (channel, &value) in pixel.0.iter().enumerate() {
            bins[channel][value as usize] += 1;
        }
    }
    bins
}

/// Render the colour histogram as three side-by-side panels, one per channel
pub fn color_histogram_svg(image: &RgbImage, title: &str) -> String {
    let bins = color_histogram(image);

    let mut svg = svg_header(PANEL_WIDTH * 3.0, PANEL_HEIGHT);
    svg.push_str(&format!("<title>{}</title>", escape_xml(title)));
    for (panel, ((name, color), counts)) in CHANNEL_COLORS.iter().zip(bins.iter()).enumerate() {
        let values: Vec<f64> = counts.iter().map(|&c| c as f64).collect();
        let series = [DataSeries::new(name, &values, color)];
        svg.push_str(&line_panel(
            panel as f64 * PANEL_WIDTH,
            &format!("{} Channel", name),
            "Pixel Value",
            "Frequency",
            &series,
        ));
    }
    svg.push_str("</svg>");
    svg
}

/// One plot panel with grid, axes, lines and a legend, offset horizontally
fn line_panel(offset_x: f64, title: &str, x_label: &str, y_label: &str, series: &[DataSeries]) -> String {
    let plot_width = PANEL_WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_height = PANEL_HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;
    let left = offset_x + MARGIN_LEFT;

    let (y_min, y_max) = value_range(series);
    let points = series.iter().map(|s| s.values.len()).max().unwrap_or(0);
    let x_span = points.saturating_sub(1).max(1) as f64;

    let to_x = |i: usize| left + (i as f64 / x_span) * plot_width;
    let to_y = |v: f64| MARGIN_TOP + plot_height - ((v - y_min) / (y_max - y_min)) * plot_height;

    let mut svg = String::new();
    svg.push_str(&title_text(offset_x + PANEL_WIDTH / 2.0, title));

    for i in 0..=5 {
        let value = y_min + (i as f64 / 5.0) * (y_max - y_min);
        let y = to_y(value);

        svg.push_str(&format!(
            r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="1"/>"#,
            left, y, left + plot_width, y, COLOR_GRID
        ));
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" text-anchor="end" font-family="Arial, sans-serif" font-size="12" fill="{}">{}</text>"#,
            left - 10.0, y + 4.0, COLOR_TEXT, tick_label(value)
        ));
    }

    // Axes
    svg.push_str(&format!(
        r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="2"/>"#,
        left, MARGIN_TOP + plot_height, left + plot_width, MARGIN_TOP + plot_height, COLOR_AXIS
    ));
    svg.push_str(&format!(
        r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="2"/>"#,
        left, MARGIN_TOP, left, MARGIN_TOP + plot_height, COLOR_AXIS
    ));

    // Axis labels
    svg.push_str(&format!(
        r#"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="14" fill="{}">{}</text>"#,
        left + plot_width / 2.0, PANEL_HEIGHT - 20.0, COLOR_TEXT, escape_xml(x_label)
    ));
    let label_x = offset_x + 20.0;
    svg.push_str(&format!(
        r#"<text x="{label_x}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="14" fill="{}" transform="rotate(-90 {label_x} {})">{}</text>"#,
        PANEL_HEIGHT / 2.0, COLOR_TEXT, PANEL_HEIGHT / 2.0, escape_xml(y_label)
    ));

    // X ticks, at most ten
    let step = (points / 10).max(1);
    for i in (0..points).step_by(step) {
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="11" fill="{}">{}</text>"#,
            to_x(i), MARGIN_TOP + plot_height + 20.0, COLOR_TEXT, i
        ));
    }

    for series_data in series {
        if series_data.values.is_empty() {
            continue;
        }

        let path: Vec<String> = series_data
            .values
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                let cmd = if i == 0 { "M" } else { "L" };
                format!("{} {:.2} {:.2}", cmd, to_x(i), to_y(v))
            })
            .collect();

        svg.push_str(&format!(
            r#"<path d="{}" fill="none" stroke="{}" stroke-width="2"/>"#,
            path.join(" "),
            series_data.color
        ));
    }

    // Legend
    let mut legend_y = MARGIN_TOP + 10.0;
    for series_data in series {
        let legend_x = offset_x + PANEL_WIDTH - MARGIN_RIGHT - 170.0;
        svg.push_str(&format!(
            r#"<rect x="{}" y="{}" width="15" height="15" fill="{}"/>"#,
            legend_x, legend_y, series_data.color
        ));
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" font-family="Arial, sans-serif" font-size="12" fill="{}">{}</text>"#,
            legend_x + 20.0, legend_y + 12.0, COLOR_TEXT, escape_xml(&series_data.name)
        ));
        legend_y += 22.0;
    }

    svg
}

fn svg_header(width: f64, height: f64) -> String {
    format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {w} {h}" width="{w}" height="{h}"><rect width="{w}" height="{h}" fill="white"/>"#,
        w = width,
        h = height
    )
}

fn title_text(center_x: f64, title: &str) -> String {
    format!(
        r#"<text x="{}" y="35" text-anchor="middle" font-family="Arial, sans-serif" font-size="18" font-weight="bold" fill="{}">{}</text>"#,
        center_x, COLOR_TEXT, escape_xml(title)
    )
}

/// Y range over all series; a flat or empty range is widened to stay drawable
fn value_range(series: &[DataSeries]) -> (f64, f64) {
    let (min, max) = series
        .iter()
        .flat_map(|s| s.values.iter().copied())
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));

    if !min.is_finite() {
        return (0.0, 1.0);
    }
    let min = min.min(0.0);
    if max - min < f64::EPSILON {
        (min, min + 1.0)
    } else {
        (min, max)
    }
}

fn tick_label(value: f64) -> String {
    if value.abs() >= 100.0 {
        format!("{:.0}", value)
    } else {
        format!("{:.2}", value)
    }
}

/// White-to-navy ramp for heat-map cells, `t` in [0, 1]
fn blues(t: f64) -> String {
    let t = t.clamp(0.0, 1.0);
    let lerp = |a: f64, b: f64| (a + (b - a) * t).round() as u8;
    format!("#{:02x}{:02x}{:02x}", lerp(247.0, 8.0), lerp(251.0, 48.0), lerp(255.0, 107.0))
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
