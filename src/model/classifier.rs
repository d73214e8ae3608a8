//! Crop disease classifier: EfficientNet backbone plus a small head
//!
//! Architecture:
//! - EfficientNet feature extractor
//! - Global average pooling
//! - Batch normalization
//! - Dropout
//! - Dense layer over the class catalog (softmax applied on demand)

use burn::{
    module::Module,
    nn::{
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        BatchNorm, Dropout, DropoutConfig, Linear, LinearConfig,
    },
    tensor::{activation::softmax, backend::Backend, Tensor},
};

use super::config::ModelConfig;
use super::efficientnet::{
    apply_batch_norm, batch_norm_config, EfficientNet, LayerKind, LayerParams, LayerRef, NormPolicy,
};

/// Layer names of the head, in forward order
pub const HEAD_LAYER_NAMES: [&str; 4] = ["avg_pool", "batch_normalization", "top_dropout", "pred"];

/// Pooling, normalization, dropout and the dense prediction layer
#[derive(Module, Debug)]
pub struct ClassifierHead<B: Backend> {
    pool: AdaptiveAvgPool2d,
    pub bn: BatchNorm<B, 2>,
    dropout: Dropout,
    pub pred: Linear<B>,
    first_layer: usize,
}

impl<B: Backend> ClassifierHead<B> {
    pub fn new(in_features: usize, num_classes: usize, dropout: f64, first_layer: usize, device: &B::Device) -> Self {
        Self {
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            bn: batch_norm_config(in_features).init(device),
            dropout: DropoutConfig::new(dropout).init(),
            pred: LinearConfig::new(in_features, num_classes).init(device),
            first_layer,
        }
    }

    /// Features `[batch, channels, h, w]` to logits `[batch, num_classes]`
    pub fn forward(&self, features: Tensor<B, 4>, policy: &NormPolicy) -> Tensor<B, 2> {
        let x = self.pool.forward(features);
        let x = apply_batch_norm(&self.bn, x, self.first_layer + 1, policy);

        let [batch_size, channels, _, _] = x.dims();
        let x = x.reshape([batch_size, channels]);

        let x = self.dropout.forward(x);
        self.pred.forward(x)
    }

    fn visit<'a>(&'a self, unit: usize, f: &mut dyn FnMut(LayerRef<'a, B>)) {
        let layers = [
            (LayerKind::Pool, LayerParams::None),
            (LayerKind::BatchNorm, LayerParams::Norm(&self.bn)),
            (LayerKind::Dropout, LayerParams::None),
            (LayerKind::Dense, LayerParams::Dense(&self.pred)),
        ];
        for (offset, ((kind, params), name)) in layers.into_iter().zip(HEAD_LAYER_NAMES).enumerate() {
            f(LayerRef {
                index: self.first_layer + offset,
                unit,
                name: name.to_string(),
                kind,
                params,
            });
        }
    }
}

/// Summary of one layer of the flat list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerInfo {
    pub index: usize,
    pub unit: usize,
    pub name: String,
    pub kind: LayerKind,
    pub has_weights: bool,
}

/// The full classifier
#[derive(Module, Debug)]
pub struct CropClassifier<B: Backend> {
    pub backbone: EfficientNet<B>,
    pub head: ClassifierHead<B>,
}

impl<B: Backend> CropClassifier<B> {
    /// Create a randomly initialized classifier from configuration
    pub fn new(config: &ModelConfig, device: &B::Device) -> Self {
        Self::with_backbone(EfficientNet::new(config.backbone, device), config, device)
    }

    /// Attach a fresh head to an existing backbone
    pub fn with_backbone(backbone: EfficientNet<B>, config: &ModelConfig, device: &B::Device) -> Self {
        let head = ClassifierHead::new(
            config.backbone.out_channels(),
            config.num_classes,
            config.dropout_rate,
            backbone.layer_count(),
            device,
        );
        Self { backbone, head }
    }

    /// Width of the prediction layer
    pub fn num_classes(&self) -> usize {
        self.head.pred.weight.val().dims()[1]
    }

    /// Forward unit of the head; backbone units come before it
    pub fn head_unit(&self) -> usize {
        self.backbone.num_units()
    }

    /// Run the network from unit `start_unit` on, returning logits
    ///
    /// `x` must be the output of unit `start_unit - 1` (or the image batch
    /// when `start_unit` is 0).
    pub fn forward_from(&self, x: Tensor<B, 4>, start_unit: usize, policy: &NormPolicy) -> Tensor<B, 2> {
        let features = self.backbone.forward_units(x, start_unit..self.head_unit(), policy);
        self.head.forward(features, policy)
    }

    /// Forward pass through the network
    ///
    /// # Arguments
    /// * `x` - Input tensor of shape [batch_size, 3, height, width]
    ///
    /// # Returns
    /// * Logits tensor of shape [batch_size, num_classes]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward_from(x, 0, &NormPolicy::Auto)
    }

    /// Forward pass with softmax for inference
    pub fn forward_softmax(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(x), 1)
    }

    /// Visit every layer, backbone first, in forward order
    pub fn visit_layers<'a>(&'a self, f: &mut dyn FnMut(LayerRef<'a, B>)) {
        self.backbone.visit_layers(f);
        self.head.visit(self.head_unit(), f);
    }

    /// The flat layer list
    pub fn layers(&self) -> Vec<LayerInfo> {
        let mut layers = Vec::new();
        self.visit_layers(&mut |layer| {
            layers.push(LayerInfo {
                index: layer.index,
                unit: layer.unit,
                name: layer.name,
                kind: layer.kind,
                has_weights: layer.params.has_weights(),
            })
        });
        layers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::config::BackboneVariant;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray;

    fn tiny(num_classes: usize) -> CropClassifier<TestBackend> {
        let config = ModelConfig::new(num_classes).with_backbone(BackboneVariant::Tiny);
        CropClassifier::new(&config, &Default::default())
    }

    #[test]
    fn test_output_shape_and_softmax_rows() {
        let model = tiny(5);
        let x = Tensor::<TestBackend, 4>::random([3, 3, 32, 32], Distribution::Default, &Default::default());

        let probs = model.forward_softmax(x);
        assert_eq!(probs.dims(), [3, 5]);

        let values = probs.into_data().to_vec::<f32>().unwrap();
        for row in values.chunks(5) {
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-4);
            assert!(row.iter().all(|&p| (0.0..=1.0).contains(&p)));
        }
    }

    #[test]
    fn test_num_classes_from_weights() {
        assert_eq!(tiny(7).num_classes(), 7);
    }

    #[test]
    fn test_last_ten_layers() {
        let model = CropClassifier::<TestBackend>::new(&ModelConfig::new(3), &Default::default());
        let layers = model.layers();
        let last: Vec<&str> = layers.iter().rev().take(10).map(|l| l.name.as_str()).collect();

        assert_eq!(
            last,
            vec![
                "pred",
                "top_dropout",
                "batch_normalization",
                "avg_pool",
                "top_activation",
                "top_bn",
                "top_conv",
                "block7a_project_bn",
                "block7a_project_conv",
                "block7a_se_excite",
            ]
        );
        assert_eq!(layers.last().map(|l| l.unit), Some(model.head_unit()));
    }

    #[test]
    fn test_head_layer_indices_follow_backbone() {
        let model = tiny(2);
        let layers = model.layers();
        for (i, layer) in layers.iter().enumerate() {
            assert_eq!(layer.index, i);
        }
    }
}
