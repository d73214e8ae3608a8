//! Fit loop for a compiled classifier
//!
//! A hand-written loop over shuffled index batches, in three stages per
//! step. Units before the first trainable layer run once on the inner
//! (non-autodiff) backend. The remaining units run with frozen batch norms
//! in inference mode. Gradients are gathered for trainable layers only and
//! applied with Adam.

use std::path::PathBuf;

use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    module::AutodiffModule,
    optim::{GradientsParams, Optimizer},
    tensor::{
        activation::log_softmax,
        backend::{AutodiffBackend, Backend},
        ElementConversion, Tensor,
    },
};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use super::history::{TrainingHistory, HISTORY_FILE};
use crate::dataset::{ClassCatalog, CropBatcher, CropImageDataset};
use crate::model::efficientnet::LayerParams;
use crate::model::{CompiledModel, CropClassifier, ModelArtifact, NormPolicy, TrainableLayers};
use crate::utils::error::{AgronomicareError, Result};
use crate::utils::logging::TrainingLogger;
use crate::utils::metrics::{argmax, AccuracyTracker, RunningAverage};

/// Options for one call to [`fit`]
#[derive(Debug, Clone)]
pub struct FitOptions {
    /// Phase name used in log lines ("head", "fine-tune")
    pub phase: String,
    pub epochs: usize,
    pub batch_size: usize,
    /// Seed for the per-epoch shuffles
    pub seed: u64,
    /// Where to save the best model and the history, if anywhere
    pub checkpoint_dir: Option<PathBuf>,
}

impl FitOptions {
    pub fn new(phase: &str, epochs: usize, batch_size: usize, seed: u64) -> Self {
        Self {
            phase: phase.to_string(),
            epochs,
            batch_size,
            seed,
            checkpoint_dir: None,
        }
    }

    pub fn with_checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = Some(dir.into());
        self
    }
}

/// Loss, accuracy and class probabilities over a whole dataset
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    pub loss: f64,
    pub accuracy: f64,
    /// One probability vector per sample, in dataset order
    pub probabilities: Vec<Vec<f32>>,
    pub labels: Vec<usize>,
}

/// Mean categorical cross-entropy of `logits` against one-hot targets
pub fn categorical_cross_entropy<B: Backend>(logits: Tensor<B, 2>, one_hot: Tensor<B, 2>) -> Tensor<B, 1> {
    let log_probs = log_softmax(logits, 1);
    (one_hot * log_probs).sum_dim(1).mean().neg()
}

/// Train a compiled model and return it with its per-epoch history
///
/// Only layers in `compiled.trainable` are updated. When a checkpoint
/// directory is set, the model with the best validation accuracy so far is
/// saved there as a [`ModelArtifact`], along with the history.
pub fn fit<B: AutodiffBackend>(
    compiled: CompiledModel<B>,
    catalog: &ClassCatalog,
    train: &CropImageDataset,
    validation: &CropImageDataset,
    options: &FitOptions,
    device: &B::Device,
) -> Result<(CompiledModel<B>, TrainingHistory)> {
    if options.batch_size == 0 {
        return Err(AgronomicareError::Training("batch size must be positive".to_string()));
    }
    if train.is_empty() {
        return Err(AgronomicareError::Training("training set is empty".to_string()));
    }
    if compiled.model.num_classes() != catalog.len() {
        return Err(AgronomicareError::Training(format!(
            "model predicts {} classes but the catalog has {}",
            compiled.model.num_classes(),
            catalog.len()
        )));
    }

    let CompiledModel {
        model,
        config,
        trainable,
        optimizer: optimizer_config,
        learning_rate,
        loss,
    } = compiled;

    let layers = model.layers();
    let start_unit = trainable
        .first_unit(&layers)
        .ok_or_else(|| AgronomicareError::Training("no trainable layers".to_string()))?;

    println!(
        "{}",
        format!("Training phase '{}'", options.phase).green().bold()
    );
    println!("  📦 Batch size:        {}", options.batch_size);
    println!("  📈 Learning rate:     {}", learning_rate);
    println!("  🔓 Trainable layers:  {}", trainable.names(&layers).join(", "));
    println!("  🗂  Train/val:         {}/{}", train.len(), validation.len());
    println!();

    let batcher = CropBatcher::with_image_size(catalog.len(), config.input_size);
    let mut optimizer = optimizer_config.init::<B, CropClassifier<B>>();
    let mut rng = ChaCha8Rng::seed_from_u64(options.seed);

    // Layers before `start_unit` never change during this call.
    let frozen = model.valid();
    let mut model = model;

    let mut history = TrainingHistory::default();
    let mut best_val_accuracy = f64::NEG_INFINITY;
    let mut logger = TrainingLogger::new(&options.phase, options.epochs);

    for epoch in 0..options.epochs {
        logger.start_epoch(epoch);
        println!(
            "{}",
            format!("Epoch {}/{}", epoch + 1, options.epochs).yellow().bold()
        );

        let mut indices: Vec<usize> = (0..train.len()).collect();
        indices.shuffle(&mut rng);

        let progress = ProgressBar::new(indices.len() as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("  {bar:40.cyan/blue} {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );

        let mut epoch_loss = RunningAverage::new();
        let mut epoch_accuracy = AccuracyTracker::new();

        for chunk in indices.chunks(options.batch_size) {
            let items: Vec<_> = chunk.iter().filter_map(|&i| train.get(i)).collect();
            progress.inc(chunk.len() as u64);
            if items.is_empty() {
                continue;
            }
            let labels: Vec<usize> = items.iter().map(|item| item.label).collect();

            let batch = batcher.batch(items, device);
            let logits = forward_trainable(&model, &frozen, batch.images, start_unit, &trainable);
            let batch_loss = categorical_cross_entropy(logits.clone(), batch.one_hot);

            let loss_value: f64 = batch_loss.clone().into_scalar().elem();
            epoch_loss.add(loss_value, labels.len());
            epoch_accuracy.add_batch(&predicted_classes(logits)?, &labels);
            progress.set_message(format!("loss {:.4}", epoch_loss.average()));

            let mut grads = batch_loss.backward();
            for layer_grads in trainable_gradients(&model, &trainable, &mut grads) {
                model = optimizer.step(learning_rate, model, layer_grads);
            }
        }
        progress.finish_and_clear();

        let evaluation = evaluate(&model.valid(), validation, &batcher, options.batch_size, device)?;
        let (train_loss, train_accuracy) = (epoch_loss.average(), epoch_accuracy.accuracy());
        history.push_epoch(train_loss, train_accuracy, evaluation.loss, evaluation.accuracy);
        logger.end_epoch(train_loss, train_accuracy, evaluation.loss, evaluation.accuracy);

        let is_best = evaluation.accuracy > best_val_accuracy;
        if is_best {
            best_val_accuracy = evaluation.accuracy;
        }

        println!(
            "  {} Loss: {:.4} | Acc: {:.2}% | Val Loss: {:.4} | Val Acc: {:.2}% {}",
            "→".cyan(),
            train_loss,
            train_accuracy * 100.0,
            evaluation.loss,
            evaluation.accuracy * 100.0,
            if is_best { "(best)".green().to_string() } else { String::new() }
        );

        if let Some(dir) = &options.checkpoint_dir {
            if is_best {
                ModelArtifact::new(model.clone(), config.clone(), catalog.clone())?.save(dir)?;
                println!("  💾 Saved checkpoint to {:?}", dir);
            }
            history.save(&dir.join(HISTORY_FILE))?;
        }
    }

    logger.log_complete(history.best_val_accuracy().unwrap_or(0.0));

    let compiled = CompiledModel {
        model,
        config,
        trainable,
        optimizer: optimizer_config,
        learning_rate,
        loss,
    };
    Ok((compiled, history))
}

/// Run the frozen prefix on the inner backend, then the rest with autodiff
fn forward_trainable<B: AutodiffBackend>(
    model: &CropClassifier<B>,
    frozen: &CropClassifier<B::InnerBackend>,
    images: Tensor<B, 4>,
    start_unit: usize,
    trainable: &TrainableLayers,
) -> Tensor<B, 2> {
    let features = if start_unit == 0 {
        images
    } else {
        let prefix = frozen
            .backbone
            .forward_units(images.inner(), 0..start_unit, &NormPolicy::Auto);
        Tensor::from_inner(prefix)
    };
    model.forward_from(features, start_unit, &NormPolicy::TrainOnly(trainable.as_set()))
}

/// Gradients of each trainable layer that owns parameters
fn trainable_gradients<B: AutodiffBackend>(
    model: &CropClassifier<B>,
    trainable: &TrainableLayers,
    grads: &mut B::Gradients,
) -> Vec<GradientsParams> {
    let mut params = Vec::new();
    model.visit_layers(&mut |layer| {
        if !trainable.contains(layer.index) {
            return;
        }
        match layer.params {
            LayerParams::Conv(conv) => params.push(GradientsParams::from_module(grads, conv)),
            LayerParams::Norm(bn) => params.push(GradientsParams::from_module(grads, bn)),
            LayerParams::Dense(dense) => params.push(GradientsParams::from_module(grads, dense)),
            LayerParams::None => {}
        }
    });
    debug!("Collected gradients for {} layers", params.len());
    params
}

fn predicted_classes<B: Backend>(logits: Tensor<B, 2>) -> Result<Vec<usize>> {
    let [batch_size, _] = logits.dims();
    let indices = logits
        .argmax(1)
        .reshape([batch_size])
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|e| AgronomicareError::Training(format!("{:?}", e)))?;
    Ok(indices.into_iter().map(|i| i as usize).collect())
}

/// Evaluate a model over a whole dataset in inference mode
pub fn evaluate<B: Backend>(
    model: &CropClassifier<B>,
    dataset: &CropImageDataset,
    batcher: &CropBatcher,
    batch_size: usize,
    device: &B::Device,
) -> Result<Evaluation> {
    let batch_size = batch_size.max(1);
    let mut loss = RunningAverage::new();
    let mut evaluation = Evaluation::default();

    for start in (0..dataset.len()).step_by(batch_size) {
        let end = (start + batch_size).min(dataset.len());
        let items: Vec<_> = (start..end).filter_map(|i| dataset.get(i)).collect();
        if items.is_empty() {
            continue;
        }
        let labels: Vec<usize> = items.iter().map(|item| item.label).collect();
        let num_classes = model.num_classes();

        let batch = batcher.batch(items, device);
        let logits = model.forward(batch.images);

        let batch_loss: f64 = categorical_cross_entropy(logits.clone(), batch.one_hot)
            .into_scalar()
            .elem();
        loss.add(batch_loss, labels.len());

        let probabilities = burn::tensor::activation::softmax(logits, 1)
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| AgronomicareError::Inference(format!("{:?}", e)))?;

        evaluation
            .probabilities
            .extend(probabilities.chunks(num_classes).map(|row| row.to_vec()));
        evaluation.labels.extend(labels);
    }

    let correct = evaluation
        .probabilities
        .iter()
        .zip(&evaluation.labels)
        .filter(|(probs, &label)| argmax(probs) == label)
        .count();
    evaluation.accuracy = if evaluation.labels.is_empty() {
        0.0
    } else {
        correct as f64 / evaluation.labels.len() as f64
    };
    evaluation.loss = loss.average();

    info!(
        "Evaluated {} samples: loss {:.4}, accuracy {:.2}%",
        evaluation.labels.len(),
        evaluation.loss,
        evaluation.accuracy * 100.0
    );
    Ok(evaluation)
}
