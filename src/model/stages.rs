use burn::{nn::Relu, prelude::*};

use super::blocks::{
    ConvBn, ConvBnConfig, ConvBnRelu, ConvBnReluConfig, Downsample, DownsampleConfig, Upsample,
    UpsampleConfig,
};

/// Identity-residual unit of the first stage: 1×1 → 3×3 conv-bn-relu →
/// 3×3 conv-bn, then ReLU of the sum with the unit input. The input channel
/// count must already equal `channels`; there is no projection.
#[derive(Module, Debug)]
pub struct BottleneckUnit<B: Backend> {
    conv1: ConvBnRelu<B>,
    conv2: ConvBnRelu<B>,
    conv3: ConvBn<B>,
    activation: Relu,
}

impl<B: Backend> BottleneckUnit<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let residual = x.clone();

        let x = self.conv1.forward(x);
        let x = self.conv2.forward(x);
        let x = self.conv3.forward(x);

        self.activation.forward(x + residual)
    }
}

/// Single-branch first stage: four identity-residual units at a fixed width.
#[derive(Module, Debug)]
pub struct Stage1<B: Backend> {
    units: Vec<BottleneckUnit<B>>,
}

impl<B: Backend> Stage1<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.units.iter().fold(x, |x, unit| unit.forward(x))
    }
}

#[derive(Config, Debug)]
pub struct Stage1Config {
    channels: usize,
    #[config(default = "4")]
    repeat: usize,
}

impl Stage1Config {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Stage1<B> {
        let unit = |device| BottleneckUnit {
            conv1: ConvBnReluConfig::new(self.channels, self.channels).init(device),
            conv2: ConvBnReluConfig::new(self.channels, self.channels)
                .with_kernel_size(3)
                .init(device),
            conv3: ConvBnConfig::new(self.channels, self.channels).init(device),
            activation: Relu::new(),
        };

        Stage1 {
            units: (0..self.repeat).map(|_| unit(device)).collect(),
        }
    }
}

/// Inner unit of a residual stage: 3×3 conv-bn-relu → 3×3 conv-bn, added to
/// a residual supplied by the caller, then ReLU.
#[derive(Module, Debug)]
pub struct BasicUnit<B: Backend> {
    conv1: ConvBnRelu<B>,
    conv2: ConvBn<B>,
    activation: Relu,
}

impl<B: Backend> BasicUnit<B> {
    pub fn forward(&self, x: Tensor<B, 4>, residual: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv1.forward(x);
        let x = self.conv2.forward(x);

        self.activation.forward(x + residual)
    }
}

/// One outer repetition of a residual stage.
///
/// The residual is captured once at block entry and the SAME snapshot is
/// added by all four inner units; it is never refreshed between units. This
/// mirrors the reference network and must not be "fixed" to standard
/// residual semantics.
#[derive(Module, Debug)]
pub struct StageBlock<B: Backend> {
    units: Vec<BasicUnit<B>>,
}

impl<B: Backend> StageBlock<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let captured = x.clone();
        self.units
            .iter()
            .fold(x, |x, unit| unit.forward(x, captured.clone()))
    }
}

/// Generic residual stage at an arbitrary channel width, `repeat` outer
/// blocks of four inner units each.
#[derive(Module, Debug)]
pub struct ResidualStage<B: Backend> {
    blocks: Vec<StageBlock<B>>,
}

impl<B: Backend> ResidualStage<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.blocks.iter().fold(x, |x, block| block.forward(x))
    }
}

#[derive(Config, Debug)]
pub struct ResidualStageConfig {
    channels: usize,
    repeat: usize,
    #[config(default = "4")]
    units_per_block: usize,
}

impl ResidualStageConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ResidualStage<B> {
        let unit = |device| BasicUnit {
            conv1: ConvBnReluConfig::new(self.channels, self.channels)
                .with_kernel_size(3)
                .init(device),
            conv2: ConvBnConfig::new(self.channels, self.channels).init(device),
            activation: Relu::new(),
        };

        ResidualStage {
            blocks: (0..self.repeat)
                .map(|_| StageBlock {
                    units: (0..self.units_per_block).map(|_| unit(device)).collect(),
                })
                .collect(),
        }
    }
}

/// Transform applied to one source branch when fusing into one target level.
#[derive(Module, Debug)]
pub enum FuseOp<B: Backend> {
    /// Same resolution: channel alignment only.
    Align(ConvBnRelu<B>),
    /// Target is coarser: strided residual reduction.
    Reduce(Downsample<B>),
    /// Target is finer: bilinear expansion.
    Expand(Upsample<B>),
}

impl<B: Backend> FuseOp<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            FuseOp::Align(block) => block.forward(x),
            FuseOp::Reduce(block) => block.forward(x),
            FuseOp::Expand(block) => block.forward(x),
        }
    }
}

/// All source contributions to one target resolution level.
#[derive(Module, Debug)]
pub struct FuseTarget<B: Backend> {
    ops: Vec<FuseOp<B>>,
}

/// Dense cross-branch fusion: every source branch contributes to every
/// target level, transformed to the target's resolution and channel width,
/// and the contributions are summed.
///
/// Built data-driven from `(in_widths, out_widths)`; the transform is chosen
/// by comparing source and target levels, with the resolution ratio between
/// adjacent levels fixed at 2. A single-source layer degenerates to the
/// branch-splitting transition after stage 1.
#[derive(Module, Debug)]
pub struct FuseLayer<B: Backend> {
    targets: Vec<FuseTarget<B>>,
}

impl<B: Backend> FuseLayer<B> {
    /// Fuse `branches` (finest resolution first) into one tensor per target
    /// level. The number of inputs must match the configured source count.
    pub fn forward(&self, branches: Vec<Tensor<B, 4>>) -> Vec<Tensor<B, 4>> {
        self.targets
            .iter()
            .map(|target| {
                assert_eq!(
                    target.ops.len(),
                    branches.len(),
                    "fuse layer expects {} source branches, got {}",
                    target.ops.len(),
                    branches.len()
                );
                target
                    .ops
                    .iter()
                    .zip(branches.iter())
                    .map(|(op, x)| op.forward(x.clone()))
                    .reduce(|sum, x| sum + x)
                    .expect("fuse layer has at least one source branch")
            })
            .collect()
    }
}

#[derive(Config, Debug)]
pub struct FuseLayerConfig {
    /// Channel width of each source branch, finest level first.
    in_widths: Vec<usize>,
    /// Channel width of each target branch, finest level first.
    out_widths: Vec<usize>,
}

impl FuseLayerConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> FuseLayer<B> {
        assert!(
            !self.in_widths.is_empty() && !self.out_widths.is_empty(),
            "fuse layer needs at least one source and one target branch"
        );

        let targets = (0..self.out_widths.len())
            .map(|target| {
                let width = self.out_widths[target];
                let ops = self
                    .in_widths
                    .iter()
                    .enumerate()
                    .map(|(source, &in_width)| {
                        if source == target {
                            FuseOp::Align(ConvBnReluConfig::new(in_width, width).init(device))
                        } else if source > target {
                            let factor = 1 << (source - target);
                            FuseOp::Expand(UpsampleConfig::new(in_width, width, factor).init(device))
                        } else {
                            let factor = 1 << (target - source);
                            FuseOp::Reduce(
                                DownsampleConfig::new(in_width, width, factor).init(device),
                            )
                        }
                    })
                    .collect();
                FuseTarget { ops }
            })
            .collect();

        FuseLayer { targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray;

    #[test]
    fn stage1_preserves_shape() {
        let device = Default::default();
        let input =
            Tensor::<TestBackend, 4>::random([2, 16, 8, 8], Distribution::Default, &device);

        let stage = Stage1Config::new(16).init::<TestBackend>(&device);
        assert_eq!(stage.forward(input).dims(), [2, 16, 8, 8]);
    }

    #[test]
    fn residual_stage_preserves_shape() {
        let device = Default::default();
        let input =
            Tensor::<TestBackend, 4>::random([1, 24, 16, 16], Distribution::Default, &device);

        let stage = ResidualStageConfig::new(24, 3).init::<TestBackend>(&device);
        assert_eq!(stage.forward(input).dims(), [1, 24, 16, 16]);
    }

    #[test]
    fn fuse_layer_produces_target_widths_and_resolutions() {
        let device = Default::default();
        // Two source branches at 16x16 and 8x8.
        let branches = vec![
            Tensor::<TestBackend, 4>::random([2, 8, 16, 16], Distribution::Default, &device),
            Tensor::<TestBackend, 4>::random([2, 16, 8, 8], Distribution::Default, &device),
        ];

        let fuse = FuseLayerConfig::new(vec![8, 16], vec![8, 16, 32]).init::<TestBackend>(&device);
        let outputs = fuse.forward(branches);

        assert_eq!(outputs.len(), 3);
        assert_eq!(outputs[0].dims(), [2, 8, 16, 16]);
        assert_eq!(outputs[1].dims(), [2, 16, 8, 8]);
        assert_eq!(outputs[2].dims(), [2, 32, 4, 4]);
    }

    #[test]
    fn fuse_layer_splits_a_single_source_branch() {
        let device = Default::default();
        let branches =
            vec![Tensor::<TestBackend, 4>::random([1, 64, 16, 16], Distribution::Default, &device)];

        let fuse = FuseLayerConfig::new(vec![64], vec![8, 16]).init::<TestBackend>(&device);
        let outputs = fuse.forward(branches);

        assert_eq!(outputs[0].dims(), [1, 8, 16, 16]);
        assert_eq!(outputs[1].dims(), [1, 16, 8, 8]);
    }
}
