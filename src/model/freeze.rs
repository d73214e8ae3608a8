//! Building, freezing and unfreezing the classifier
//!
//! A model is "compiled" by pairing it with the set of trainable layers, an
//! Adam configuration, a learning rate and the loss. Layers outside the set
//! receive no updates and their batch norms run with running statistics.

use std::collections::BTreeSet;
use std::path::PathBuf;

use burn::optim::AdamConfig;
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::classifier::{CropClassifier, LayerInfo};
use super::config::ModelConfig;
use super::efficientnet::EfficientNet;
use crate::utils::error::{AgronomicareError, Result};

/// Keras' Adam epsilon
const ADAM_EPSILON: f32 = 1e-7;

/// Where the backbone weights come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackboneSource {
    /// A Burn record file holding ImageNet weights for the backbone
    Pretrained(PathBuf),
    /// Random initialization (offline use and tests)
    RandomInit,
}

/// Loss the model is compiled with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LossKind {
    /// Cross-entropy against one-hot labels
    CategoricalCrossEntropy,
}

/// Indices (into the flat layer list) of the layers that receive updates
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainableLayers(BTreeSet<usize>);

impl TrainableLayers {
    /// Every layer of the head
    pub fn head<B: Backend>(model: &CropClassifier<B>) -> Self {
        let head_unit = model.head_unit();
        Self(
            model
                .layers()
                .into_iter()
                .filter(|l| l.unit == head_unit)
                .map(|l| l.index)
                .collect(),
        )
    }

    pub fn contains(&self, index: usize) -> bool {
        self.0.contains(&index)
    }

    pub fn insert(&mut self, index: usize) -> bool {
        self.0.insert(index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_set(&self) -> &BTreeSet<usize> {
        &self.0
    }

    /// Earliest forward unit holding a trainable layer
    pub fn first_unit(&self, layers: &[LayerInfo]) -> Option<usize> {
        layers
            .iter()
            .filter(|l| self.contains(l.index))
            .map(|l| l.unit)
            .min()
    }

    /// Names of the trainable layers, in forward order
    pub fn names(&self, layers: &[LayerInfo]) -> Vec<String> {
        layers
            .iter()
            .filter(|l| self.contains(l.index))
            .map(|l| l.name.clone())
            .collect()
    }
}

/// A classifier ready for training
#[derive(Clone)]
pub struct CompiledModel<B: Backend> {
    pub model: CropClassifier<B>,
    pub config: ModelConfig,
    pub trainable: TrainableLayers,
    pub optimizer: AdamConfig,
    pub learning_rate: f64,
    pub loss: LossKind,
}

fn adam() -> AdamConfig {
    AdamConfig::new().with_epsilon(ADAM_EPSILON)
}

/// Build the classifier over a frozen backbone
///
/// Only the head (pooling, batch norm, dropout, dense) is trainable, with Adam
/// at `config.learning_rate`. A backbone that cannot be loaded is an error.
pub fn build_model<B: Backend>(
    config: &ModelConfig,
    source: &BackboneSource,
    device: &B::Device,
) -> Result<CompiledModel<B>> {
    config.validate()?;

    let backbone = EfficientNet::new(config.backbone, device);
    let backbone = match source {
        BackboneSource::Pretrained(path) => {
            if !path.exists() {
                return Err(AgronomicareError::PathNotFound(path.clone()));
            }
            info!("Loading {} weights from {:?}", config.backbone, path);
            backbone.load_pretrained(path, device)?
        }
        BackboneSource::RandomInit => {
            warn!("Using a randomly initialized {} backbone", config.backbone);
            backbone
        }
    };

    let model = CropClassifier::with_backbone(backbone, config, device);
    let trainable = TrainableLayers::head(&model);

    info!(
        "Built classifier: {} classes, {} layers, {} trainable",
        config.num_classes,
        model.layers().len(),
        trainable.len()
    );

    Ok(CompiledModel {
        model,
        config: config.clone(),
        trainable,
        optimizer: adam(),
        learning_rate: config.learning_rate,
        loss: LossKind::CategoricalCrossEntropy,
    })
}

/// Copy a compiled model and unfreeze its last layers for fine-tuning
///
/// The copy keeps every trainable layer of `compiled` and adds the
/// non-normalization layers among the last `config.unfreeze_last`. It is
/// recompiled with a fresh Adam at `config.fine_tune_learning_rate`.
/// Burn tensors are immutable, so training the copy never touches the
/// original's weights.
pub fn unfreeze_and_clone<B: Backend>(compiled: &CompiledModel<B>) -> CompiledModel<B> {
    let model = compiled.model.clone();
    let mut trainable = compiled.trainable.clone();

    let layers = model.layers();
    for layer in layers.iter().rev().take(compiled.config.unfreeze_last) {
        if !layer.kind.is_normalization() {
            trainable.insert(layer.index);
        }
    }

    info!(
        "Unfroze layers for fine-tuning: {}",
        trainable.names(&layers).join(", ")
    );

    CompiledModel {
        model,
        config: compiled.config.clone(),
        trainable,
        optimizer: adam(),
        learning_rate: compiled.config.fine_tune_learning_rate,
        loss: compiled.loss,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::config::BackboneVariant;
    use burn::backend::NdArray;
    use burn::module::Module;

    type TestBackend = NdArray;

    fn compiled(variant: BackboneVariant) -> CompiledModel<TestBackend> {
        let config = ModelConfig::new(4).with_backbone(variant);
        build_model(&config, &BackboneSource::RandomInit, &Default::default()).unwrap()
    }

    #[test]
    fn test_build_model_trains_only_the_head() {
        let compiled = compiled(BackboneVariant::Tiny);
        let layers = compiled.model.layers();

        assert_eq!(compiled.learning_rate, 1e-2);
        assert_eq!(compiled.loss, LossKind::CategoricalCrossEntropy);
        assert_eq!(
            compiled.trainable.names(&layers),
            vec!["avg_pool", "batch_normalization", "top_dropout", "pred"]
        );
        assert_eq!(compiled.trainable.first_unit(&layers), Some(compiled.model.head_unit()));
    }

    #[test]
    fn test_missing_pretrained_weights_fail() {
        let config = ModelConfig::new(4).with_backbone(BackboneVariant::Tiny);
        let source = BackboneSource::Pretrained(PathBuf::from("/no/such/weights.mpk"));
        let result = build_model::<TestBackend>(&config, &source, &Default::default());
        assert!(matches!(result, Err(AgronomicareError::PathNotFound(_))));
    }

    #[test]
    fn test_unfreeze_skips_normalization_layers() {
        let original = compiled(BackboneVariant::B0);
        let unfrozen = unfreeze_and_clone(&original);
        let layers = unfrozen.model.layers();

        assert_eq!(unfrozen.learning_rate, 1e-5);
        assert_eq!(
            unfrozen.trainable.names(&layers),
            vec![
                "block7a_se_excite",
                "block7a_project_conv",
                "top_conv",
                "top_activation",
                "avg_pool",
                "batch_normalization",
                "top_dropout",
                "pred",
            ]
        );

        let tail: Vec<&LayerInfo> = layers.iter().rev().take(10).collect();
        for layer in tail {
            if layer.kind.is_normalization() && layer.name != "batch_normalization" {
                assert!(!unfrozen.trainable.contains(layer.index), "{} is trainable", layer.name);
            }
        }

        // The original keeps its own compilation.
        assert_eq!(original.learning_rate, 1e-2);
        assert_eq!(original.trainable.len(), 4);
    }

    #[test]
    fn test_clone_has_equal_weights() {
        let original = compiled(BackboneVariant::Tiny);
        let unfrozen = unfreeze_and_clone(&original);

        let a = original.model.head.pred.weight.val().into_data().to_vec::<f32>().unwrap();
        let b = unfrozen.model.head.pred.weight.val().into_data().to_vec::<f32>().unwrap();
        assert_eq!(a, b);
        assert_eq!(original.model.num_params(), unfrozen.model.num_params());
    }
}
