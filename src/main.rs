//! Agronomicare CLI
//!
//! Dataset preparation, the two-phase training run, evaluation with plots,
//! and single-image diagnosis from the command line.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::{info, warn};

use agronomicare::backend::{backend_name, default_device, DefaultBackend, TrainingBackend};
use agronomicare::dataset::loader::is_image_file;
use agronomicare::dataset::split::VALIDATION_FRACTION;
use agronomicare::dataset::{is_healthy_class, rename_class_dir, CropBatcher, CropDataset, CropImageDataset, TrainValSplit};
use agronomicare::inference::{load_image, Predictor};
use agronomicare::model::{
    build_model, unfreeze_and_clone, BackboneSource, BackboneVariant, ModelArtifact, ModelConfig, TrainingConfig,
};
use agronomicare::recommend::{RemedyField, RemedyTable};
use agronomicare::training::{evaluate, fit, FitOptions, TrainingHistory};
use agronomicare::utils::charts::{generate_color_histogram, plot_training_metrics, save_confusion_matrix};
use agronomicare::utils::logging::{init_logging, LogConfig};
use agronomicare::utils::{format_duration, format_score, ClassificationReport, Metrics};

/// Agronomicare crop disease diagnosis
///
/// Train an EfficientNet classifier on a class-per-directory image tree,
/// evaluate it and diagnose single leaf photos.
#[derive(Parser, Debug)]
#[command(name = "agronomicare")]
#[command(version)]
#[command(about = "Crop disease diagnosis and remedy recommendation with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show dataset statistics
    Stats {
        /// Path to the dataset directory
        #[arg(short, long, default_value = "data/crops")]
        data_dir: PathBuf,
    },

    /// Write the labeled image table as CSV (image_path,class)
    Table {
        /// Path to the dataset directory
        #[arg(short, long, default_value = "data/crops")]
        data_dir: PathBuf,

        /// Output CSV file
        #[arg(short, long, default_value = "output/dataset.csv")]
        output: PathBuf,
    },

    /// Rename a class subdirectory of the dataset
    RenameClass {
        /// Path to the dataset directory
        #[arg(short, long, default_value = "data/crops")]
        data_dir: PathBuf,

        /// Current class directory name
        old: String,

        /// New class directory name
        new: String,
    },

    /// Train the head over a frozen backbone, then fine-tune the last layers
    Train {
        /// Path to the dataset directory
        #[arg(short, long, default_value = "data/crops")]
        data_dir: PathBuf,

        /// Output directory for checkpoints, history and plots
        #[arg(short, long, default_value = "output")]
        output_dir: PathBuf,

        /// Burn record with pretrained backbone weights (random init when absent)
        #[arg(long)]
        backbone_weights: Option<PathBuf>,

        /// Use the small test backbone instead of EfficientNet-B0
        #[arg(long, default_value = "false")]
        tiny: bool,

        /// Training configuration JSON; flags below are ignored when given
        #[arg(long)]
        config: Option<PathBuf>,

        /// Epochs of the head-only phase
        #[arg(short, long, default_value = "10")]
        epochs: usize,

        /// Epochs of the fine-tuning phase
        #[arg(long, default_value = "10")]
        fine_tune_epochs: usize,

        /// Batch size for training
        #[arg(short, long, default_value = "32")]
        batch_size: usize,

        /// Random seed for the split and shuffling
        #[arg(long, default_value = "42")]
        seed: u64,
    },

    /// Evaluate a trained model: metrics, classification report, ROC-AUC and plots
    Evaluate {
        /// Path to the dataset directory
        #[arg(short, long, default_value = "data/crops")]
        data_dir: PathBuf,

        /// Model artifact directory
        #[arg(short, long, default_value = "output/model")]
        model_dir: PathBuf,

        /// Output directory for the confusion matrices
        #[arg(short, long, default_value = "output/evaluation")]
        output_dir: PathBuf,

        /// Evaluate every image instead of the validation split
        #[arg(long, default_value = "false")]
        all: bool,

        /// Seed of the split to take the validation part from
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Batch size for inference
        #[arg(short, long, default_value = "32")]
        batch_size: usize,
    },

    /// Diagnose a single image or every image in a directory
    Infer {
        /// Path to input image or directory
        #[arg(short, long)]
        input: PathBuf,

        /// Model artifact directory
        #[arg(short, long, default_value = "output/model")]
        model_dir: PathBuf,

        /// Remedy table to print recommendations from
        #[arg(short, long)]
        remedies: Option<PathBuf>,
    },

    /// Plot accuracy and loss curves from a saved history
    PlotHistory {
        /// History JSON written during training
        #[arg(long, default_value = "output/history.json")]
        history: PathBuf,

        /// Output SVG file
        #[arg(short, long, default_value = "output/training_curves.svg")]
        output: PathBuf,
    },

    /// Plot the RGB colour histogram of an image
    ColorHistogram {
        /// Input image
        #[arg(short, long)]
        input: PathBuf,

        /// Output SVG file
        #[arg(short, long, default_value = "output/color_histogram.svg")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default().with_env_override()
    };

    let _ = init_logging(&log_config);

    print_banner();

    match cli.command {
        Commands::Stats { data_dir } => cmd_stats(&data_dir)?,

        Commands::Table { data_dir, output } => cmd_table(&data_dir, &output)?,

        Commands::RenameClass { data_dir, old, new } => {
            if rename_class_dir(&data_dir, &old, &new)? {
                println!("{} Renamed {} to {}", "✓".green(), old, new);
            } else {
                println!("{} No class directory named {}", "Note:".yellow(), old);
            }
        }

        Commands::Train {
            data_dir,
            output_dir,
            backbone_weights,
            tiny,
            config,
            epochs,
            fine_tune_epochs,
            batch_size,
            seed,
        } => {
            let training = match config {
                Some(path) => TrainingConfig::load(&path)?,
                None => TrainingConfig {
                    epochs,
                    fine_tune_epochs,
                    batch_size,
                    seed,
                    ..TrainingConfig::default()
                },
            };
            training.validate()?;

            let variant = if tiny { BackboneVariant::Tiny } else { BackboneVariant::B0 };
            let source = match backbone_weights {
                Some(path) => BackboneSource::Pretrained(path),
                None => BackboneSource::RandomInit,
            };
            cmd_train(&data_dir, &output_dir, variant, &source, &training)?;
        }

        Commands::Evaluate {
            data_dir,
            model_dir,
            output_dir,
            all,
            seed,
            batch_size,
        } => cmd_evaluate(&data_dir, &model_dir, &output_dir, all, seed, batch_size)?,

        Commands::Infer {
            input,
            model_dir,
            remedies,
        } => cmd_infer(&input, &model_dir, remedies.as_deref())?,

        Commands::PlotHistory { history, output } => {
            let history = TrainingHistory::load(&history)?;
            ensure_parent(&output)?;
            plot_training_metrics(&history, &output)?;
            println!("{} Wrote {:?} ({} epochs)", "✓".green(), output, history.len());
        }

        Commands::ColorHistogram { input, output } => {
            let image = load_image(&input)?.to_rgb8();
            let title = input
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            ensure_parent(&output)?;
            generate_color_histogram(&image, &format!("Colour histogram of {}", title), &output)?;
            println!("{} Wrote {:?}", "✓".green(), output);
        }
    }

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 ╔══════════════════════════════════════════════════════╗
 ║   🍃 Agronomicare                                    ║
 ║   Crop diagnosis and remedy recommendation           ║
 ╚══════════════════════════════════════════════════════╝
  "#
        .green()
    );
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {:?}", parent))?;
    }
    Ok(())
}

fn load_dataset(data_dir: &Path) -> Result<CropDataset> {
    let dataset = CropDataset::from_directory(data_dir);
    if dataset.is_empty() {
        bail!("no images found under {:?}", data_dir);
    }
    Ok(dataset)
}

fn cmd_stats(data_dir: &Path) -> Result<()> {
    info!("Computing dataset statistics for: {:?}", data_dir);

    let dataset = CropDataset::from_directory(data_dir);
    if dataset.is_empty() {
        println!("{} No images found under {:?}", "Error:".red(), data_dir);
        return Ok(());
    }

    let stats = dataset.get_stats();
    stats.print();

    let split = TrainValSplit::standard(&dataset.records)?;
    println!();
    println!("{}", "Standard split:".cyan().bold());
    println!("  Train:      {}", split.train.len());
    println!("  Validation: {}", split.validation.len());
    Ok(())
}

fn cmd_table(data_dir: &Path, output: &Path) -> Result<()> {
    let dataset = load_dataset(data_dir)?;
    ensure_parent(output)?;
    dataset.write_csv(output)?;
    println!(
        "{} Wrote {} rows over {} classes to {:?}",
        "✓".green(),
        dataset.len(),
        dataset.num_classes(),
        output
    );
    Ok(())
}

fn cmd_train(
    data_dir: &Path,
    output_dir: &Path,
    variant: BackboneVariant,
    source: &BackboneSource,
    training: &TrainingConfig,
) -> Result<()> {
    let dataset = load_dataset(data_dir)?;
    let catalog = dataset.catalog()?;
    let split = TrainValSplit::new(&dataset.records, training.validation_fraction, training.seed)?;

    let config = ModelConfig::new(catalog.len()).with_backbone(variant);
    let train_set = CropImageDataset::new(dataset.samples(&split.train), config.input_size);
    let val_set = CropImageDataset::new(dataset.samples(&split.validation), config.input_size);

    println!("{}", "Training Configuration:".cyan().bold());
    println!("  📂 Dataset:   {:?} ({} classes)", data_dir, catalog.len());
    println!("  🧠 Backbone:  {}", config.backbone);
    println!("  🖥️  Backend:   {}", backend_name());
    println!("  🔁 Epochs:    {} + {} fine-tune", training.epochs, training.fine_tune_epochs);
    let started = Local::now();
    println!("  🕒 Started:   {}", started.format("%Y-%m-%d %H:%M:%S"));
    println!();

    std::fs::create_dir_all(output_dir)?;
    training.save(&output_dir.join("training.json"))?;

    let device = default_device();
    let compiled = build_model::<TrainingBackend>(&config, source, &device)?;

    let head_options = FitOptions::new("head", training.epochs, training.batch_size, training.seed)
        .with_checkpoint_dir(training.head_checkpoint_dir(output_dir));
    let (compiled, mut history) = fit(compiled, &catalog, &train_set, &val_set, &head_options, &device)?;

    if training.fine_tune_epochs > 0 {
        let fine = unfreeze_and_clone(&compiled);
        let fine_options = FitOptions::new("fine-tune", training.fine_tune_epochs, training.batch_size, training.seed)
            .with_checkpoint_dir(training.fine_tune_checkpoint_dir(output_dir));
        let (_, fine_history) = fit(fine, &catalog, &train_set, &val_set, &fine_options, &device)?;
        history.extend(&fine_history);
    } else {
        warn!(
            "Fine-tuning skipped; head checkpoint saved as the final model in {:?}",
            training.head_checkpoint_dir(output_dir)
        );
    }

    history.save(&output_dir.join("history.json"))?;
    let curves = output_dir.join("training_curves.svg");
    plot_training_metrics(&history, &curves)?;

    println!();
    println!("{}", "Training Complete!".green().bold());
    if let Some(best) = history.best_val_accuracy() {
        println!("  🎉 Best validation accuracy: {:.2}%", best * 100.0);
    }
    println!("  📈 Curves: {:?}", curves);
    let elapsed = (Local::now() - started).num_milliseconds() as f64 / 1000.0;
    println!("  ⏱️  Took {}", format_duration(elapsed));
    Ok(())
}

fn cmd_evaluate(
    data_dir: &Path,
    model_dir: &Path,
    output_dir: &Path,
    all: bool,
    seed: u64,
    batch_size: usize,
) -> Result<()> {
    let device = default_device();
    let artifact = ModelArtifact::<DefaultBackend>::load(model_dir, &device)?;
    let class_names = artifact.catalog.names().to_vec();

    let dataset = load_dataset(data_dir)?;
    let records = if all {
        dataset.records.clone()
    } else {
        TrainValSplit::new(&dataset.records, VALIDATION_FRACTION, seed)?.validation
    };

    // Labels follow the model's catalog, not the directory order.
    let mut samples = Vec::with_capacity(records.len());
    for record in &records {
        match class_names.iter().position(|c| *c == record.class_label) {
            Some(label) => samples.push((record.image_path.clone(), label)),
            None => warn!("Skipping {:?}: class '{}' unknown to the model", record.image_path, record.class_label),
        }
    }
    if samples.is_empty() {
        bail!("no images of known classes to evaluate");
    }

    let input_size = artifact.config.input_size;
    let eval_set = CropImageDataset::new(samples, input_size);
    let batcher = CropBatcher::with_image_size(class_names.len(), input_size);
    let evaluation = evaluate(&artifact.model, &eval_set, &batcher, batch_size, &device)?;

    let metrics = Metrics::from_probabilities(&evaluation.probabilities, &evaluation.labels, class_names.len())?;
    println!("{}", metrics.display());
    println!("{}", "Classification Report:".cyan().bold());
    println!("{}", ClassificationReport::new(&metrics, &class_names));
    println!("{}", "Confusion Matrix:".cyan().bold());
    println!("{}", metrics.confusion_matrix.display(Some(&class_names), false));

    std::fs::create_dir_all(output_dir)?;
    let cm = &metrics.confusion_matrix;
    save_confusion_matrix(cm, &class_names, false, "Confusion Matrix", &output_dir.join("confusion_matrix.svg"))?;
    save_confusion_matrix(
        cm,
        &class_names,
        true,
        "Normalized Confusion Matrix",
        &output_dir.join("confusion_matrix_normalized.svg"),
    )?;
    cm.save_csv(&output_dir.join("confusion_matrix.csv"), &class_names)?;
    std::fs::write(output_dir.join("metrics.json"), serde_json::to_string_pretty(&metrics)?)?;

    println!("  💾 Plots written to {:?}", output_dir);
    Ok(())
}

fn cmd_infer(input: &Path, model_dir: &Path, remedies: Option<&Path>) -> Result<()> {
    println!("{}", "Inference Configuration:".cyan().bold());
    println!("  📷 Input:   {:?}", input);
    println!("  🧠 Model:   {:?}", model_dir);
    println!("  🖥️  Backend: {}", backend_name());
    println!();

    let device = default_device();
    let predictor = Predictor::<DefaultBackend>::load(model_dir, &device)?;
    let table = remedies.map(RemedyTable::from_path).transpose()?;

    let files: Vec<PathBuf> = if input.is_dir() {
        let mut files: Vec<PathBuf> = std::fs::read_dir(input)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| is_image_file(p))
            .collect();
        files.sort();
        files
    } else {
        vec![input.to_path_buf()]
    };

    for path in &files {
        let prediction = match predictor.predict_path(path) {
            Ok(prediction) => prediction,
            Err(e) => {
                println!("{} {:?}: {}", "Error:".red(), path, e);
                continue;
            }
        };

        println!("📷 {}", path.file_name().unwrap_or_default().to_string_lossy());
        println!(
            "  Predicted: {} ({})",
            prediction.class_name.green().bold(),
            format_score(prediction.confidence)
        );

        if let Some(table) = &table {
            if is_healthy_class(&prediction.class_name) {
                println!("  Your crop seems to be healthy, no remedy needed.");
            } else {
                for field in [RemedyField::NaturalRemedies, RemedyField::ChemicalControl] {
                    let text = table.lookup(&prediction.class_name, field).unwrap_or("-");
                    println!("  {}: {}", field.to_string().cyan(), text);
                }
            }
        }
        println!();
    }
    Ok(())
}
