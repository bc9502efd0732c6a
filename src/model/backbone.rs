//! Convolutional feature extractor
//!
//! A stem block followed by four named stages. Each stage is a unit of
//! trainability: the unfreeze schedule flips all of a stage's parameters at
//! once. After global average pooling the embedding width is `8 * base_filters`.

use std::collections::HashSet;
use std::path::Path;

use burn::{
    config::Config,
    module::{Module, ParamId},
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
    },
    record::CompactRecorder,
    tensor::{backend::Backend, Tensor},
};
use serde::{Deserialize, Serialize};

use super::freeze::RunningStats;
use crate::utils::error::FloraError;

/// Named backbone stages, shallowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackboneStage {
    Stage1,
    Stage2,
    Stage3,
    Stage4,
}

impl BackboneStage {
    /// Order in which stages become trainable: deepest first
    pub const UNFREEZE_ORDER: [BackboneStage; 4] = [
        BackboneStage::Stage4,
        BackboneStage::Stage3,
        BackboneStage::Stage2,
        BackboneStage::Stage1,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BackboneStage::Stage1 => "stage1",
            BackboneStage::Stage2 => "stage2",
            BackboneStage::Stage3 => "stage3",
            BackboneStage::Stage4 => "stage4",
        }
    }
}

/// Blocks ending in a 2x2 max-pool: the stem plus one per stage
const POOLED_BLOCKS: usize = 1 + BackboneStage::UNFREEZE_ORDER.len();

/// Smallest square input that survives every pooling step (32 pixels)
pub const MIN_INPUT_SIZE: usize = 1 << POOLED_BLOCKS;

impl std::fmt::Display for BackboneStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Configuration for the backbone
#[derive(Config, Debug)]
pub struct FlowerBackboneConfig {
    /// Number of input channels (3 for RGB)
    #[config(default = "3")]
    pub in_channels: usize,

    /// Base number of convolutional filters
    #[config(default = "32")]
    pub base_filters: usize,
}

impl FlowerBackboneConfig {
    /// Width of the pooled embedding
    pub fn output_dim(&self) -> usize {
        self.base_filters * 8
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> FlowerBackbone<B> {
        let base = self.base_filters;

        FlowerBackbone {
            stem: ConvBlock::new(self.in_channels, base, 3, true, device),
            stage1: StageBlock::new(base, base, device),
            stage2: StageBlock::new(base, base * 2, device),
            stage3: StageBlock::new(base * 2, base * 4, device),
            stage4: StageBlock::new(base * 4, base * 8, device),
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            output_dim: self.output_dim(),
        }
    }
}

/// Conv2d, BatchNorm, ReLU, and optional MaxPool
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B, 2>,
    pub relu: Relu,
    pub pool: Option<MaxPool2d>,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        with_pool: bool,
        device: &B::Device,
    ) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [kernel_size, kernel_size])
            .with_padding(PaddingConfig2d::Same)
            .init(device);

        let bn = BatchNormConfig::new(out_channels).init(device);

        let pool = if with_pool {
            Some(MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init())
        } else {
            None
        };

        Self {
            conv,
            bn,
            relu: Relu::new(),
            pool,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.bn.forward(x);
        let x = self.relu.forward(x);

        match &self.pool {
            Some(pool) => pool.forward(x),
            None => x,
        }
    }
}

/// Two conv blocks; the first halves the spatial size
#[derive(Module, Debug)]
pub struct StageBlock<B: Backend> {
    pub downsample: ConvBlock<B>,
    pub refine: ConvBlock<B>,
}

impl<B: Backend> StageBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        Self {
            downsample: ConvBlock::new(in_channels, out_channels, 3, true, device),
            refine: ConvBlock::new(out_channels, out_channels, 3, false, device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.refine.forward(self.downsample.forward(x))
    }
}

/// Feature extractor: stem, stage1..stage4, global average pooling
#[derive(Module, Debug)]
pub struct FlowerBackbone<B: Backend> {
    pub stem: ConvBlock<B>,
    pub stage1: StageBlock<B>,
    pub stage2: StageBlock<B>,
    pub stage3: StageBlock<B>,
    pub stage4: StageBlock<B>,
    pub global_pool: AdaptiveAvgPool2d,
    output_dim: usize,
}

impl<B: Backend> FlowerBackbone<B> {
    /// Map `[batch, 3, H, W]` images to `[batch, output_dim]` embeddings
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.stem.forward(x);
        let x = self.stage1.forward(x);
        let x = self.stage2.forward(x);
        let x = self.stage3.forward(x);
        let x = self.stage4.forward(x);

        // [B, C, H, W] -> [B, C, 1, 1] -> [B, C]
        let x = self.global_pool.forward(x);
        let [batch_size, channels, _, _] = x.dims();
        x.reshape([batch_size, channels])
    }

    pub fn output_dim(&self) -> usize {
        self.output_dim
    }

    pub fn stage(&self, stage: BackboneStage) -> &StageBlock<B> {
        match stage {
            BackboneStage::Stage1 => &self.stage1,
            BackboneStage::Stage2 => &self.stage2,
            BackboneStage::Stage3 => &self.stage3,
            BackboneStage::Stage4 => &self.stage4,
        }
    }

    /// Replace one stage with the result of `f`
    pub fn map_stage<F>(mut self, stage: BackboneStage, f: F) -> Self
    where
        F: FnOnce(StageBlock<B>) -> StageBlock<B>,
    {
        match stage {
            BackboneStage::Stage1 => self.stage1 = f(self.stage1),
            BackboneStage::Stage2 => self.stage2 = f(self.stage2),
            BackboneStage::Stage3 => self.stage3 = f(self.stage3),
            BackboneStage::Stage4 => self.stage4 = f(self.stage4),
        }
        self
    }

    /// Load pretrained weights saved with `CompactRecorder`
    pub fn load_pretrained(
        self,
        path: &Path,
        device: &B::Device,
    ) -> crate::utils::error::Result<Self> {
        let recorder = CompactRecorder::new();
        self.load_file(path.to_path_buf(), &recorder, device)
            .map_err(|e| FloraError::Model(format!("Failed to load backbone weights {:?}: {:?}", path, e)))
    }
}

impl<B: Backend> RunningStats for ConvBlock<B> {
    fn running_stat_ids(&self) -> HashSet<ParamId> {
        self.bn.running_stat_ids()
    }
}

impl<B: Backend> RunningStats for StageBlock<B> {
    fn running_stat_ids(&self) -> HashSet<ParamId> {
        let mut ids = self.downsample.running_stat_ids();
        ids.extend(self.refine.running_stat_ids());
        ids
    }
}

impl<B: Backend> RunningStats for FlowerBackbone<B> {
    fn running_stat_ids(&self) -> HashSet<ParamId> {
        let mut ids = self.stem.running_stat_ids();
        for stage in BackboneStage::UNFREEZE_ORDER {
            ids.extend(self.stage(stage).running_stat_ids());
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_embedding_shape() {
        let device = Default::default();
        let config = FlowerBackboneConfig::new().with_base_filters(4);
        let backbone: FlowerBackbone<TestBackend> = config.init(&device);

        let x = Tensor::<TestBackend, 4>::zeros([2, 3, 32, 32], &device);
        let out = backbone.forward(x);

        assert_eq!(out.dims(), [2, 32]);
        assert_eq!(backbone.output_dim(), 32);
    }

    #[test]
    fn test_min_input_size_reaches_one_pixel() {
        assert_eq!(MIN_INPUT_SIZE, 32);

        let device = Default::default();
        let backbone: FlowerBackbone<TestBackend> =
            FlowerBackboneConfig::new().with_base_filters(2).init(&device);
        let x = Tensor::<TestBackend, 4>::zeros([1, 3, MIN_INPUT_SIZE, MIN_INPUT_SIZE], &device);
        assert_eq!(backbone.forward(x).dims(), [1, 16]);
    }

    #[test]
    fn test_running_stats_cover_every_batch_norm() {
        let device = Default::default();
        let backbone: FlowerBackbone<TestBackend> =
            FlowerBackboneConfig::new().with_base_filters(2).init(&device);

        // stem + 4 stages x 2 blocks, two running tensors each
        assert_eq!(backbone.running_stat_ids().len(), 9 * 2);
        // conv weight, conv bias, gamma, beta per block
        assert_eq!(crate::model::freeze::param_ids::<TestBackend, _>(&backbone.stage4).len(), 8);
    }

    #[test]
    fn test_unfreeze_order_is_deepest_first() {
        assert_eq!(BackboneStage::UNFREEZE_ORDER[0], BackboneStage::Stage4);
        assert_eq!(BackboneStage::UNFREEZE_ORDER[3], BackboneStage::Stage1);
        assert_eq!(BackboneStage::Stage2.to_string(), "stage2");
    }
}
