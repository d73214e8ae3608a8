//! EfficientNet backbone
//!
//! An EfficientNet feature extractor built from MBConv blocks (inverted
//! residuals with squeeze-and-excitation and SiLU activations). Besides the
//! forward pass, the network exposes a flat, ordered list of named layers
//! (`stem_conv`, `block1a_dwconv`, ..., `top_activation`) so that training can
//! freeze and unfreeze individual layers.

use std::collections::BTreeSet;
use std::ops::Range;
use std::path::Path;

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, PaddingConfig2d,
    },
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::{
        activation::{sigmoid, silu},
        backend::Backend,
        Tensor,
    },
};
use serde::{Deserialize, Serialize};

use super::config::BackboneVariant;
use crate::utils::error::{AgronomicareError, Result};

/// Keras-compatible batch norm epsilon
const BN_EPSILON: f64 = 1e-3;
/// Keras momentum 0.99 expressed as Burn's update weight
const BN_MOMENTUM: f64 = 0.01;
/// Drop-connect rate of the last block; earlier blocks scale linearly
const DROP_CONNECT_RATE: f64 = 0.2;
const SE_RATIO: f64 = 0.25;

/// What a layer in the flat layer list does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayerKind {
    Conv,
    BatchNorm,
    Activation,
    Pool,
    Dropout,
    Dense,
    Multiply,
    Add,
}

impl LayerKind {
    pub fn is_normalization(&self) -> bool {
        matches!(self, LayerKind::BatchNorm)
    }
}

/// The weights a layer owns, if any
pub enum LayerParams<'a, B: Backend> {
    Conv(&'a Conv2d<B>),
    Norm(&'a BatchNorm<B, 2>),
    Dense(&'a Linear<B>),
    None,
}

impl<B: Backend> LayerParams<'_, B> {
    pub fn has_weights(&self) -> bool {
        !matches!(self, LayerParams::None)
    }
}

/// One entry of the flat layer list
pub struct LayerRef<'a, B: Backend> {
    /// Position in the flat list
    pub index: usize,
    /// Forward unit the layer belongs to (stem, one block, top or head)
    pub unit: usize,
    pub name: String,
    pub kind: LayerKind,
    pub params: LayerParams<'a, B>,
}

/// How batch norm layers pick their statistics during a forward pass
#[derive(Debug, Clone, Copy)]
pub enum NormPolicy<'a> {
    /// Burn's default: batch statistics under autodiff, running statistics otherwise
    Auto,
    /// Only the listed layers use batch statistics; every other batch norm
    /// is applied with its running statistics
    TrainOnly(&'a BTreeSet<usize>),
}

impl NormPolicy<'_> {
    fn uses_running_stats(&self, layer: usize) -> bool {
        match self {
            NormPolicy::Auto => false,
            NormPolicy::TrainOnly(trainable) => !trainable.contains(&layer),
        }
    }
}

/// Apply `bn` as layer `layer` under `policy`
pub fn apply_batch_norm<B: Backend>(
    bn: &BatchNorm<B, 2>,
    x: Tensor<B, 4>,
    layer: usize,
    policy: &NormPolicy,
) -> Tensor<B, 4> {
    if !policy.uses_running_stats(layer) {
        return bn.forward(x);
    }

    let channels = x.dims()[1];
    let shape = [1, channels, 1, 1];
    let mean = bn.running_mean.value().reshape(shape);
    let var = bn.running_var.value().reshape(shape);
    let gamma = bn.gamma.val().reshape(shape);
    let beta = bn.beta.val().reshape(shape);

    x.sub(mean)
        .div(var.add_scalar(bn.epsilon).sqrt())
        .mul(gamma)
        .add(beta)
}

pub(crate) fn batch_norm_config(channels: usize) -> BatchNormConfig {
    BatchNormConfig::new(channels)
        .with_epsilon(BN_EPSILON)
        .with_momentum(BN_MOMENTUM)
}

/// One MBConv stage: `repeats` blocks sharing kernel size and output width
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageLayout {
    pub expand_ratio: usize,
    pub kernel: usize,
    pub stride: usize,
    pub out_channels: usize,
    pub repeats: usize,
}

impl StageLayout {
    const fn new(expand_ratio: usize, kernel: usize, stride: usize, out_channels: usize, repeats: usize) -> Self {
        Self {
            expand_ratio,
            kernel,
            stride,
            out_channels,
            repeats,
        }
    }
}

const B0_STAGES: [StageLayout; 7] = [
    StageLayout::new(1, 3, 1, 16, 1),
    StageLayout::new(6, 3, 2, 24, 2),
    StageLayout::new(6, 5, 2, 40, 2),
    StageLayout::new(6, 3, 2, 80, 3),
    StageLayout::new(6, 5, 1, 112, 3),
    StageLayout::new(6, 5, 2, 192, 4),
    StageLayout::new(6, 3, 1, 320, 1),
];

const TINY_STAGES: [StageLayout; 3] = [
    StageLayout::new(1, 3, 1, 8, 1),
    StageLayout::new(6, 3, 2, 16, 1),
    StageLayout::new(6, 5, 2, 24, 1),
];

impl BackboneVariant {
    pub fn stages(&self) -> &'static [StageLayout] {
        match self {
            BackboneVariant::B0 => &B0_STAGES,
            BackboneVariant::Tiny => &TINY_STAGES,
        }
    }

    pub fn stem_channels(&self) -> usize {
        match self {
            BackboneVariant::B0 => 32,
            BackboneVariant::Tiny => 8,
        }
    }

    /// Channels of the feature map handed to the head
    pub fn out_channels(&self) -> usize {
        match self {
            BackboneVariant::B0 => 1280,
            BackboneVariant::Tiny => 32,
        }
    }
}

/// Convolution followed by batch norm and an optional SiLU
#[derive(Module, Debug)]
pub struct ConvBnAct<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B, 2>,
    activate: bool,
    first_layer: usize,
}

impl<B: Backend> ConvBnAct<B> {
    #[allow(clippy::too_many_arguments)]
    fn new(
        channels: [usize; 2],
        kernel: usize,
        stride: usize,
        groups: usize,
        activate: bool,
        first_layer: usize,
        device: &B::Device,
    ) -> Self {
        let pad = kernel / 2;
        let conv = Conv2dConfig::new(channels, [kernel, kernel])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(pad, pad))
            .with_groups(groups)
            .with_bias(false)
            .init(device);

        Self {
            conv,
            bn: batch_norm_config(channels[1]).init(device),
            activate,
            first_layer,
        }
    }

    fn layer_count(&self) -> usize {
        if self.activate {
            3
        } else {
            2
        }
    }

    fn forward(&self, x: Tensor<B, 4>, policy: &NormPolicy) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = apply_batch_norm(&self.bn, x, self.first_layer + 1, policy);
        if self.activate {
            silu(x)
        } else {
            x
        }
    }

    fn visit<'a>(&'a self, unit: usize, names: [&str; 3], f: &mut dyn FnMut(LayerRef<'a, B>)) {
        f(LayerRef {
            index: self.first_layer,
            unit,
            name: names[0].to_string(),
            kind: LayerKind::Conv,
            params: LayerParams::Conv(&self.conv),
        });
        f(LayerRef {
            index: self.first_layer + 1,
            unit,
            name: names[1].to_string(),
            kind: LayerKind::BatchNorm,
            params: LayerParams::Norm(&self.bn),
        });
        if self.activate {
            f(LayerRef {
                index: self.first_layer + 2,
                unit,
                name: names[2].to_string(),
                kind: LayerKind::Activation,
                params: LayerParams::None,
            });
        }
    }
}

/// Squeeze-and-excitation: channel gating from globally pooled features
#[derive(Module, Debug)]
pub struct SqueezeExcite<B: Backend> {
    pool: AdaptiveAvgPool2d,
    pub reduce: Conv2d<B>,
    pub expand: Conv2d<B>,
}

impl<B: Backend> SqueezeExcite<B> {
    fn new(channels: usize, reduced: usize, device: &B::Device) -> Self {
        Self {
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            reduce: Conv2dConfig::new([channels, reduced], [1, 1]).init(device),
            expand: Conv2dConfig::new([reduced, channels], [1, 1]).init(device),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let s = self.pool.forward(x.clone());
        let s = silu(self.reduce.forward(s));
        let s = sigmoid(self.expand.forward(s));
        x.mul(s)
    }
}

/// Inverted-residual block with squeeze-and-excitation
#[derive(Module, Debug)]
pub struct MBConvBlock<B: Backend> {
    pub expand: Option<ConvBnAct<B>>,
    pub depthwise: ConvBnAct<B>,
    pub se: SqueezeExcite<B>,
    pub project: ConvBnAct<B>,
    drop: Option<Dropout>,
    stage: usize,
    position: usize,
    first_layer: usize,
}

impl<B: Backend> MBConvBlock<B> {
    #[allow(clippy::too_many_arguments)]
    fn new(
        in_channels: usize,
        layout: &StageLayout,
        stride: usize,
        stage: usize,
        position: usize,
        drop_rate: f64,
        first_layer: usize,
        device: &B::Device,
    ) -> Self {
        let hidden = in_channels * layout.expand_ratio;
        let mut next = first_layer;

        let expand = (layout.expand_ratio != 1).then(|| {
            let block = ConvBnAct::new([in_channels, hidden], 1, 1, 1, true, next, device);
            next += 3;
            block
        });

        let depthwise = ConvBnAct::new([hidden, hidden], layout.kernel, stride, hidden, true, next, device);
        next += 3;

        let reduced = ((in_channels as f64 * SE_RATIO) as usize).max(1);
        let se = SqueezeExcite::new(hidden, reduced, device);
        next += 4;

        let project = ConvBnAct::new([hidden, layout.out_channels], 1, 1, 1, false, next, device);

        let residual = stride == 1 && in_channels == layout.out_channels;
        let drop = residual.then(|| DropoutConfig::new(drop_rate).init());

        Self {
            expand,
            depthwise,
            se,
            project,
            drop,
            stage,
            position,
            first_layer,
        }
    }

    /// Keras-style prefix: `block1a`, `block2b`, ...
    pub fn prefix(&self) -> String {
        let letter = (b'a' + self.position as u8) as char;
        format!("block{}{}", self.stage + 1, letter)
    }

    fn layer_count(&self) -> usize {
        let expand = self.expand.as_ref().map(|e| e.layer_count()).unwrap_or(0);
        let residual = if self.drop.is_some() { 2 } else { 0 };
        expand + self.depthwise.layer_count() + 4 + self.project.layer_count() + residual
    }

    fn forward(&self, input: Tensor<B, 4>, policy: &NormPolicy) -> Tensor<B, 4> {
        let x = match &self.expand {
            Some(expand) => expand.forward(input.clone(), policy),
            None => input.clone(),
        };
        let x = self.depthwise.forward(x, policy);
        let x = self.se.forward(x);
        let x = self.project.forward(x, policy);

        match &self.drop {
            Some(drop) => drop.forward(x).add(input),
            None => x,
        }
    }

    fn visit<'a>(&'a self, unit: usize, f: &mut dyn FnMut(LayerRef<'a, B>)) {
        let p = self.prefix();

        if let Some(expand) = &self.expand {
            let names = [
                format!("{p}_expand_conv"),
                format!("{p}_expand_bn"),
                format!("{p}_expand_activation"),
            ];
            expand.visit(unit, [&names[0], &names[1], &names[2]], f);
        }

        let names = [format!("{p}_dwconv"), format!("{p}_bn"), format!("{p}_activation")];
        self.depthwise.visit(unit, [&names[0], &names[1], &names[2]], f);

        let se_first = self.depthwise.first_layer + self.depthwise.layer_count();
        let se_layers = [
            ("se_squeeze", LayerKind::Pool, LayerParams::None),
            ("se_reduce", LayerKind::Conv, LayerParams::Conv(&self.se.reduce)),
            ("se_expand", LayerKind::Conv, LayerParams::Conv(&self.se.expand)),
            ("se_excite", LayerKind::Multiply, LayerParams::None),
        ];
        for (offset, (suffix, kind, params)) in se_layers.into_iter().enumerate() {
            f(LayerRef {
                index: se_first + offset,
                unit,
                name: format!("{p}_{suffix}"),
                kind,
                params,
            });
        }

        let names = [format!("{p}_project_conv"), format!("{p}_project_bn"), String::new()];
        self.project.visit(unit, [&names[0], &names[1], &names[2]], f);

        if self.drop.is_some() {
            let after = self.project.first_layer + self.project.layer_count();
            f(LayerRef {
                index: after,
                unit,
                name: format!("{p}_drop"),
                kind: LayerKind::Dropout,
                params: LayerParams::None,
            });
            f(LayerRef {
                index: after + 1,
                unit,
                name: format!("{p}_add"),
                kind: LayerKind::Add,
                params: LayerParams::None,
            });
        }
    }
}

/// EfficientNet feature extractor without its ImageNet classifier
///
/// Forward units: 0 is the stem, `1..=blocks.len()` are the MBConv blocks
/// and `blocks.len() + 1` is the top convolution.
#[derive(Module, Debug)]
pub struct EfficientNet<B: Backend> {
    pub stem: ConvBnAct<B>,
    pub blocks: Vec<MBConvBlock<B>>,
    pub top: ConvBnAct<B>,
}

impl<B: Backend> EfficientNet<B> {
    /// Create a randomly initialized backbone
    pub fn new(variant: BackboneVariant, device: &B::Device) -> Self {
        let stem_channels = variant.stem_channels();
        let stem = ConvBnAct::new([3, stem_channels], 3, 2, 1, true, 0, device);
        let mut next = stem.layer_count();

        let stages = variant.stages();
        let total_blocks: usize = stages.iter().map(|s| s.repeats).sum();

        let mut blocks = Vec::with_capacity(total_blocks);
        let mut in_channels = stem_channels;
        for (stage, layout) in stages.iter().enumerate() {
            for position in 0..layout.repeats {
                let stride = if position == 0 { layout.stride } else { 1 };
                let drop_rate = DROP_CONNECT_RATE * blocks.len() as f64 / total_blocks as f64;
                let block = MBConvBlock::new(in_channels, layout, stride, stage, position, drop_rate, next, device);
                next += block.layer_count();
                in_channels = layout.out_channels;
                blocks.push(block);
            }
        }

        let top = ConvBnAct::new([in_channels, variant.out_channels()], 1, 1, 1, true, next, device);

        Self { stem, blocks, top }
    }

    /// Load pretrained weights from a Burn record file
    pub fn load_pretrained(self, path: &Path, device: &B::Device) -> Result<Self> {
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        self.load_file(path.to_path_buf(), &recorder, device)
            .map_err(|e| AgronomicareError::Model(format!("failed to load backbone weights from {:?}: {}", path, e)))
    }

    /// Number of forward units (stem, blocks, top)
    pub fn num_units(&self) -> usize {
        self.blocks.len() + 2
    }

    /// Number of layers in the flat list
    pub fn layer_count(&self) -> usize {
        self.top.first_layer + self.top.layer_count()
    }

    /// Run units `units.start..units.end`
    pub fn forward_units(&self, x: Tensor<B, 4>, units: Range<usize>, policy: &NormPolicy) -> Tensor<B, 4> {
        let top_unit = self.blocks.len() + 1;
        units.fold(x, |x, unit| match unit {
            0 => self.stem.forward(x, policy),
            u if u < top_unit => self.blocks[u - 1].forward(x, policy),
            u if u == top_unit => self.top.forward(x, policy),
            _ => x,
        })
    }

    /// Run the whole backbone
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.forward_units(x, 0..self.num_units(), &NormPolicy::Auto)
    }

    /// Visit every layer in forward order
    pub fn visit_layers<'a>(&'a self, f: &mut dyn FnMut(LayerRef<'a, B>)) {
        self.stem.visit(0, ["stem_conv", "stem_bn", "stem_activation"], f);
        for (i, block) in self.blocks.iter().enumerate() {
            block.visit(i + 1, f);
        }
        self.top.visit(self.blocks.len() + 1, ["top_conv", "top_bn", "top_activation"], f);
    }
}
