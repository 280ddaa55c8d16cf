use burn::{
    nn::conv::{Conv2d, Conv2dConfig},
    prelude::*,
    tensor::{
        module::interpolate,
        ops::{InterpolateMode, InterpolateOptions},
    },
};

#[cfg(feature = "training")]
use crate::{dataset::SegmentationBatch, training::SegmentationOutput};
#[cfg(feature = "training")]
use burn::{
    tensor::backend::AutodiffBackend,
    train::{TrainOutput, TrainStep, ValidStep},
};

use crate::config::IGNORE_INDEX;
use crate::training::loss::{SceLoss, SceLossConfig};

use super::blocks::{
    ConvBnRelu, ConvBnReluConfig, Downsample, DownsampleConfig, Upsample, UpsampleConfig,
};
use super::stages::{
    FuseLayer, FuseLayerConfig, ResidualStage, ResidualStageConfig, Stage1, Stage1Config,
};

/// High-resolution segmentation network.
///
/// A stem of two strided residual blocks takes the input to 1/4 resolution
/// at 64 channels. Stage 1 runs there, then the branch set grows by one
/// level per stage through dense fuse layers: widths `c`, `2c`, `4c`, `8c`
/// at 1/4, 1/8, 1/16 and 1/32 resolution. The head upsamples every branch to
/// 1/4 resolution, concatenates to `15c` channels, projects to class logits
/// with a 1×1 convolution and restores full resolution with two 2× bilinear
/// resizes.
#[derive(Module, Debug)]
pub struct HrNet<B: Backend> {
    stem1: Downsample<B>,
    stem2: Downsample<B>,
    after_stem: ConvBnRelu<B>,
    stage1: Stage1<B>,
    transition1: FuseLayer<B>,
    stage2: Vec<ResidualStage<B>>,
    fuse2: FuseLayer<B>,
    stage3: Vec<ResidualStage<B>>,
    fuse3: FuseLayer<B>,
    stage4: Vec<ResidualStage<B>>,
    head_upsamples: Vec<Upsample<B>>,
    classifier: Conv2d<B>,
    loss: SceLoss<B>,
}

#[derive(Config, Debug)]
pub struct HrNetConfig {
    num_classes: usize,

    /// Channel-width multiplier `c` of the resolution branches.
    #[config(default = "32")]
    channel_width: usize,

    /// Per-class loss weights; empty disables weighting.
    #[config(default = "Vec::new()")]
    class_weight: Vec<f32>,
}

impl HrNetConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> HrNet<B> {
        let c = self.channel_width;
        let widths2 = vec![c, c * 2];
        let widths3 = vec![c, c * 2, c * 4];
        let widths4 = vec![c, c * 2, c * 4, c * 8];

        let stages = |widths: &[usize], repeat| -> Vec<ResidualStage<B>> {
            widths
                .iter()
                .map(|&width| ResidualStageConfig::new(width, repeat).init(device))
                .collect()
        };

        HrNet {
            stem1: DownsampleConfig::new(3, 64, 2).init(device),
            stem2: DownsampleConfig::new(64, 64, 2).init(device),
            after_stem: ConvBnReluConfig::new(64, 64).init(device),
            stage1: Stage1Config::new(64).init(device),
            transition1: FuseLayerConfig::new(vec![64], widths2.clone()).init(device),
            stage2: stages(&widths2, 1),
            fuse2: FuseLayerConfig::new(widths2, widths3.clone()).init(device),
            stage3: stages(&widths3, 4),
            fuse3: FuseLayerConfig::new(widths3, widths4.clone()).init(device),
            stage4: stages(&widths4, 3),
            // Each coarse branch is brought to 1/4 resolution at its own
            // width before the concatenation.
            head_upsamples: widths4[1..]
                .iter()
                .enumerate()
                .map(|(level, &width)| {
                    UpsampleConfig::new(width, width, 1 << (level + 1)).init(device)
                })
                .collect(),
            classifier: Conv2dConfig::new([c * 15, self.num_classes], [1, 1]).init(device),
            loss: SceLossConfig::new(self.num_classes)
                .with_class_weight(self.class_weight.clone())
                .with_ignore_index(IGNORE_INDEX)
                .init(device),
        }
    }
}

impl<B: Backend> HrNet<B> {
    /// Compute class logits at the input resolution.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.stem1.forward(images);
        let x = self.stem2.forward(x);
        let x = self.after_stem.forward(x);
        let x = self.stage1.forward(x);

        let branches = self.transition1.forward(vec![x]);
        let branches = self.run_stages(&self.stage2, branches);
        let branches = self.fuse2.forward(branches);
        let branches = self.run_stages(&self.stage3, branches);
        let branches = self.fuse3.forward(branches);
        let branches = self.run_stages(&self.stage4, branches);

        let mut branches = branches.into_iter();
        let mut features = vec![branches.next().expect("network has a finest branch")];
        features.extend(
            self.head_upsamples
                .iter()
                .zip(branches)
                .map(|(up, x)| up.forward(x)),
        );

        let x = self.classifier.forward(Tensor::cat(features, 1));

        let x = double_resolution(x);
        double_resolution(x)
    }

    fn run_stages(
        &self,
        stages: &[ResidualStage<B>],
        branches: Vec<Tensor<B, 4>>,
    ) -> Vec<Tensor<B, 4>> {
        assert_eq!(
            stages.len(),
            branches.len(),
            "one residual stage per branch"
        );
        stages
            .iter()
            .zip(branches)
            .map(|(stage, x)| stage.forward(x))
            .collect()
    }

    #[cfg(feature = "training")]
    pub fn forward_segmentation(&self, item: SegmentationBatch<B>) -> SegmentationOutput<B> {
        let targets = item.labels;
        let output = self.forward(item.images);

        let loss = self.loss.forward(output.clone(), targets.clone());

        SegmentationOutput {
            loss,
            output,
            targets,
        }
    }
}

/// 2× bilinear resize.
fn double_resolution<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 4> {
    let [_, _, height, width] = x.dims();
    interpolate(
        x,
        [height * 2, width * 2],
        InterpolateOptions::new(InterpolateMode::Bilinear),
    )
}

#[cfg(feature = "training")]
impl<B: AutodiffBackend> TrainStep<SegmentationBatch<B>, SegmentationOutput<B>> for HrNet<B> {
    fn step(&self, batch: SegmentationBatch<B>) -> TrainOutput<SegmentationOutput<B>> {
        let item = self.forward_segmentation(batch);
        TrainOutput::new(self, item.loss.backward(), item)
    }
}

#[cfg(feature = "training")]
impl<B: Backend> ValidStep<SegmentationBatch<B>, SegmentationOutput<B>> for HrNet<B> {
    fn step(&self, batch: SegmentationBatch<B>) -> SegmentationOutput<B> {
        self.forward_segmentation(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray;

    #[test]
    fn logits_come_back_at_input_resolution() {
        let device = Default::default();
        let images =
            Tensor::<TestBackend, 4>::random([2, 3, 64, 64], Distribution::Default, &device);

        let model = HrNetConfig::new(5).with_channel_width(8).init(&device);
        let logits = model.forward(images);

        assert_eq!(logits.dims(), [2, 5, 64, 64]);
    }

    #[cfg(feature = "training")]
    #[test]
    fn segmentation_step_produces_a_finite_loss() {
        let device = Default::default();
        let batch = SegmentationBatch {
            images: Tensor::<TestBackend, 4>::random(
                [1, 3, 32, 32],
                Distribution::Default,
                &device,
            ),
            labels: Tensor::<TestBackend, 3, Int>::zeros([1, 32, 32], &device),
        };

        let model = HrNetConfig::new(3).with_channel_width(4).init(&device);
        let output = model.forward_segmentation(batch);

        let loss: f32 = output.loss.into_scalar();
        assert!(loss.is_finite());
        assert!(loss >= 0.0);
        assert_eq!(output.output.dims(), [1, 3, 32, 32]);
    }
}
