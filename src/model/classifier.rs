//! Dual-head flower classifier
//!
//! One shared backbone, two independent heads (dropout + linear): species and
//! color. The backbone is fully frozen at construction; only the heads start
//! trainable.

use std::collections::HashSet;

use burn::{
    config::Config,
    module::{Ignored, Module, ParamId},
    nn::{Dropout, DropoutConfig, Linear, LinearConfig},
    tensor::{backend::Backend, Tensor},
};

use super::backbone::{BackboneStage, FlowerBackbone, FlowerBackboneConfig};
use super::freeze::{self, RunningStats};

/// Train/eval tag consulted by the forward pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelMode {
    /// Dropout active
    #[default]
    Train,
    /// Dropout skipped
    Eval,
}

/// Configuration for the dual-head classifier
#[derive(Config, Debug)]
pub struct DualHeadClassifierConfig {
    /// Number of species classes
    #[config(default = "16")]
    pub num_species: usize,

    /// Number of color classes
    #[config(default = "8")]
    pub num_colors: usize,

    /// Dropout rate of both heads
    #[config(default = "0.4")]
    pub dropout: f64,

    /// Base number of backbone filters
    #[config(default = "32")]
    pub base_filters: usize,
}

impl DualHeadClassifierConfig {
    /// Head sizes, dropout and width taken from a run configuration
    pub fn from_run_config(config: &crate::config::FlowerConfig) -> Self {
        Self::new()
            .with_num_species(config.num_species)
            .with_num_colors(config.num_colors)
            .with_dropout(config.dropout)
            .with_base_filters(config.base_filters)
    }

    pub fn backbone_config(&self) -> FlowerBackboneConfig {
        FlowerBackboneConfig::new().with_base_filters(self.base_filters)
    }

    /// Fresh backbone, frozen, with trainable heads
    pub fn init<B: Backend>(&self, device: &B::Device) -> DualHeadClassifier<B> {
        let backbone = self.backbone_config().init(device);
        self.init_with_backbone(backbone, device)
    }

    /// Wrap an existing (e.g. pretrained) backbone; it is frozen here
    pub fn init_with_backbone<B: Backend>(
        &self,
        backbone: FlowerBackbone<B>,
        device: &B::Device,
    ) -> DualHeadClassifier<B> {
        let embedding = backbone.output_dim();
        let backbone = freeze::set_trainable::<B, _>(backbone, false);

        DualHeadClassifier {
            backbone,
            species_head: ClassifierHead::new(embedding, self.num_species, self.dropout, device),
            color_head: ClassifierHead::new(embedding, self.num_colors, self.dropout, device),
            mode: Ignored(ModelMode::Train),
        }
    }
}

/// Dropout followed by a linear layer
#[derive(Module, Debug)]
pub struct ClassifierHead<B: Backend> {
    pub dropout: Dropout,
    pub linear: Linear<B>,
}

impl<B: Backend> ClassifierHead<B> {
    pub fn new(in_features: usize, num_classes: usize, dropout: f64, device: &B::Device) -> Self {
        Self {
            dropout: DropoutConfig::new(dropout).init(),
            linear: LinearConfig::new(in_features, num_classes).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 2>, mode: ModelMode) -> Tensor<B, 2> {
        let x = match mode {
            ModelMode::Train => self.dropout.forward(x),
            ModelMode::Eval => x,
        };
        self.linear.forward(x)
    }

    pub fn num_classes(&self) -> usize {
        self.linear.weight.dims()[1]
    }
}

impl<B: Backend> RunningStats for ClassifierHead<B> {
    fn running_stat_ids(&self) -> HashSet<ParamId> {
        self.linear.running_stat_ids()
    }
}

/// Shared backbone with species and color heads
#[derive(Module, Debug)]
pub struct DualHeadClassifier<B: Backend> {
    pub backbone: FlowerBackbone<B>,
    pub species_head: ClassifierHead<B>,
    pub color_head: ClassifierHead<B>,
    mode: Ignored<ModelMode>,
}

impl<B: Backend> DualHeadClassifier<B> {
    /// Forward pass
    ///
    /// # Arguments
    /// * `images` - Normalized tensor of shape [batch_size, 3, height, width]
    ///
    /// # Returns
    /// * `(species_logits, color_logits)` of shapes [batch_size, num_species]
    ///   and [batch_size, num_colors]
    pub fn forward(&self, images: Tensor<B, 4>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let embedding = self.backbone.forward(images);
        let mode = self.mode();

        let species = self.species_head.forward(embedding.clone(), mode);
        let color = self.color_head.forward(embedding, mode);

        (species, color)
    }

    pub fn mode(&self) -> ModelMode {
        self.mode.0
    }

    pub fn with_mode(mut self, mode: ModelMode) -> Self {
        self.mode = Ignored(mode);
        self
    }

    pub fn train_mode(self) -> Self {
        self.with_mode(ModelMode::Train)
    }

    pub fn eval_mode(self) -> Self {
        self.with_mode(ModelMode::Eval)
    }

    pub fn num_species(&self) -> usize {
        self.species_head.num_classes()
    }

    pub fn num_colors(&self) -> usize {
        self.color_head.num_classes()
    }

    /// Parameter ids of both heads
    pub fn head_param_ids(&self) -> Vec<ParamId> {
        let mut ids = freeze::param_ids::<B, _>(&self.species_head);
        ids.extend(freeze::param_ids::<B, _>(&self.color_head));
        ids
    }

    /// Parameter ids of one backbone stage
    pub fn stage_param_ids(&self, stage: BackboneStage) -> Vec<ParamId> {
        freeze::param_ids::<B, _>(self.backbone.stage(stage))
    }

    /// Parameter ids of one backbone stage that are still frozen
    pub fn frozen_stage_param_ids(&self, stage: BackboneStage) -> Vec<ParamId> {
        freeze::frozen_param_ids::<B, _>(self.backbone.stage(stage))
    }

    /// Mark every parameter of a backbone stage trainable
    pub fn unfreeze_stage(mut self, stage: BackboneStage) -> Self {
        self.backbone = self
            .backbone
            .map_stage(stage, |block| freeze::set_trainable::<B, _>(block, true));
        self
    }
}

impl<B: Backend> RunningStats for DualHeadClassifier<B> {
    fn running_stat_ids(&self) -> HashSet<ParamId> {
        self.backbone.running_stat_ids()
    }
}
