//! Segmentation losses over raw label maps.
//!
//! Every loss takes `(logits, label_map)` with logits shaped
//! `[batch, num_classes, height, width]` and the label map shaped
//! `[batch, height, width]` holding class indices or the ignore sentinel.
//! Labels are one-hot encoded internally; the one-hot row of an ignored
//! pixel is all zeros, so ignored pixels contribute nothing to the
//! cross-entropy numerators.

use burn::{prelude::*, tensor::activation::log_softmax};

use crate::config::IGNORE_INDEX;

/// One-hot encode a flattened label vector, zeroing the rows of pixels that
/// carry the ignore sentinel.
pub(crate) fn one_hot_with_ignored<B: Backend>(
    labels: Tensor<B, 1, Int>,
    num_classes: usize,
    ignore_index: usize,
    device: &B::Device,
) -> Tensor<B, 2> {
    let total = labels.dims()[0];

    let valid = labels.clone().not_equal_elem(ignore_index as i64);
    // The sentinel is out of range for scatter; park ignored pixels on class
    // 0, the mask below removes them again.
    let clamped = labels.mask_fill(valid.clone().bool_not(), 0);

    let one_hot = Tensor::<B, 2>::zeros([total, num_classes], device).scatter(
        1,
        clamped.reshape([total, 1]),
        Tensor::ones([total, 1], device),
    );

    one_hot * valid.int().float().reshape([total, 1])
}

/// Flatten `[batch, classes, height, width]` logits to `[pixels, classes]`.
fn flatten_logits<B: Backend>(logits: Tensor<B, 4>) -> Tensor<B, 2> {
    let [batch, classes, height, width] = logits.dims();
    logits
        .reshape([batch, classes, height * width])
        .permute([0, 2, 1])
        .reshape([batch * height * width, classes])
}

fn assert_shapes<B: Backend>(logits: &Tensor<B, 4>, targets: &Tensor<B, 3, Int>, classes: usize) {
    let [batch, channels, height, width] = logits.dims();
    let [target_batch, target_height, target_width] = targets.dims();

    assert_eq!(
        channels, classes,
        "logits have {channels} channels but the loss was built for {classes} classes"
    );
    assert_eq!(
        (batch, height, width),
        (target_batch, target_height, target_width),
        "logits and label map disagree on batch or spatial dimensions"
    );
}

fn assert_weights(weights: &[f32], num_classes: usize) {
    assert!(
        weights.is_empty() || weights.len() == num_classes,
        "class_weight must be empty or hold {num_classes} entries, got {}",
        weights.len()
    );
}

/// Configuration for [`SceLoss`].
#[derive(Config, Debug)]
pub struct SceLossConfig {
    pub num_classes: usize,

    /// Per-class weights; an empty list disables weighting.
    #[config(default = "Vec::new()")]
    pub class_weight: Vec<f32>,

    #[config(default = "IGNORE_INDEX")]
    pub ignore_index: usize,
}

impl SceLossConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> SceLoss<B> {
        assert_weights(&self.class_weight, self.num_classes);
        SceLoss {
            weights: (!self.class_weight.is_empty())
                .then(|| Tensor::<B, 1>::from_floats(self.class_weight.as_slice(), device)),
            num_classes: self.num_classes,
            ignore_index: self.ignore_index,
        }
    }
}

/// Softmax cross entropy with ignore mask and optional class weights; the
/// loss the model is compiled with.
///
/// The reduction is the mean over ALL pixels: ignored pixels contribute zero
/// to the numerator but still count in the denominator, matching the
/// reference network.
#[derive(Module, Debug)]
pub struct SceLoss<B: Backend> {
    pub weights: Option<Tensor<B, 1>>,
    pub num_classes: usize,
    pub ignore_index: usize,
}

impl<B: Backend> SceLoss<B> {
    pub fn forward(&self, logits: Tensor<B, 4>, targets: Tensor<B, 3, Int>) -> Tensor<B, 1> {
        assert_shapes(&logits, &targets, self.num_classes);

        let device = logits.device();
        let [batch, classes, height, width] = logits.dims();
        let total = batch * height * width;

        let one_hot = one_hot_with_ignored(
            targets.reshape([total]),
            self.num_classes,
            self.ignore_index,
            &device,
        );

        let log_probs = log_softmax(flatten_logits(logits), 1);
        let ce = (one_hot.clone() * log_probs)
            .sum_dim(1)
            .reshape([total])
            .neg();

        let ce = match &self.weights {
            Some(weights) => {
                // Per-pixel weight = sum(one_hot × class weights); zero at
                // ignored pixels.
                let pixel_weights = (one_hot * weights.clone().reshape([1, classes]))
                    .sum_dim(1)
                    .reshape([total]);
                ce * pixel_weights
            }
            None => ce,
        };

        ce.mean()
    }
}

/// Configuration for [`WceLoss`].
#[derive(Config, Debug)]
pub struct WceLossConfig {
    pub num_classes: usize,

    /// Positive-class weight of the sigmoid cross entropy.
    #[config(default = "1.0")]
    pub pos_weight: f32,

    /// Per-class weights applied after the spatial reduction; empty disables.
    #[config(default = "Vec::new()")]
    pub class_weight: Vec<f32>,

    #[config(default = "IGNORE_INDEX")]
    pub ignore_index: usize,
}

impl WceLossConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> WceLoss<B> {
        assert_weights(&self.class_weight, self.num_classes);
        assert!(
            self.pos_weight > 0.0,
            "pos_weight must be positive, got {}",
            self.pos_weight
        );
        WceLoss {
            weights: (!self.class_weight.is_empty())
                .then(|| Tensor::<B, 1>::from_floats(self.class_weight.as_slice(), device)),
            pos_weight: self.pos_weight,
            num_classes: self.num_classes,
            ignore_index: self.ignore_index,
        }
    }
}

/// Weighted (sigmoid) cross entropy: per-pixel weighted binary cross entropy
/// against the one-hot labels, averaged over the spatial dimensions, then
/// scaled by the per-class weight vector and averaged to a scalar. An
/// alternate loss, not the compiled default.
#[derive(Module, Debug)]
pub struct WceLoss<B: Backend> {
    pub weights: Option<Tensor<B, 1>>,
    pub pos_weight: f32,
    pub num_classes: usize,
    pub ignore_index: usize,
}

impl<B: Backend> WceLoss<B> {
    pub fn forward(&self, logits: Tensor<B, 4>, targets: Tensor<B, 3, Int>) -> Tensor<B, 1> {
        assert_shapes(&logits, &targets, self.num_classes);

        let device = logits.device();
        let [batch, classes, height, width] = logits.dims();
        let total = batch * height * width;

        let one_hot = one_hot_with_ignored(
            targets.reshape([total]),
            self.num_classes,
            self.ignore_index,
            &device,
        )
        .reshape([batch, height, width, classes])
        .permute([0, 3, 1, 2]);

        let per_pixel = weighted_sigmoid_cross_entropy(logits, one_hot, self.pos_weight);
        let per_class = per_pixel
            .mean_dim(3)
            .mean_dim(2)
            .reshape([batch, classes]);

        let per_class = match &self.weights {
            Some(weights) => per_class * weights.clone().reshape([1, classes]),
            None => per_class,
        };

        per_class.mean()
    }
}

/// Configuration for [`BceLoss`].
#[derive(Config, Debug)]
pub struct BceLossConfig {
    pub num_classes: usize,

    #[config(default = "IGNORE_INDEX")]
    pub ignore_index: usize,
}

impl BceLossConfig {
    pub fn init(&self) -> BceLoss {
        BceLoss {
            num_classes: self.num_classes,
            ignore_index: self.ignore_index,
        }
    }
}

/// Plain sigmoid cross entropy against the one-hot labels, reduced to a
/// scalar mean. An alternate loss, not the compiled default.
#[derive(Clone, Debug)]
pub struct BceLoss {
    pub num_classes: usize,
    pub ignore_index: usize,
}

impl BceLoss {
    pub fn forward<B: Backend>(
        &self,
        logits: Tensor<B, 4>,
        targets: Tensor<B, 3, Int>,
    ) -> Tensor<B, 1> {
        assert_shapes(&logits, &targets, self.num_classes);

        let device = logits.device();
        let [batch, classes, height, width] = logits.dims();
        let total = batch * height * width;

        let one_hot = one_hot_with_ignored(
            targets.reshape([total]),
            self.num_classes,
            self.ignore_index,
            &device,
        )
        .reshape([batch, height, width, classes])
        .permute([0, 3, 1, 2]);

        sigmoid_cross_entropy(logits, one_hot).mean()
    }
}

/// Numerically stable `max(x, 0) - x·z + log(1 + exp(-|x|))`.
fn sigmoid_cross_entropy<B: Backend>(x: Tensor<B, 4>, z: Tensor<B, 4>) -> Tensor<B, 4> {
    x.clone().clamp_min(0.0) - x.clone() * z + softplus_neg_abs(x)
}

/// Stable sigmoid cross entropy with positive-class weight `q`:
/// `(1 - z)·x + (1 + (q - 1)·z)·(log(1 + exp(-|x|)) + max(-x, 0))`.
fn weighted_sigmoid_cross_entropy<B: Backend>(
    x: Tensor<B, 4>,
    z: Tensor<B, 4>,
    q: f32,
) -> Tensor<B, 4> {
    let coefficient = z.clone().mul_scalar(q - 1.0).add_scalar(1.0);
    let log_term = softplus_neg_abs(x.clone()) + x.clone().neg().clamp_min(0.0);

    (z.neg().add_scalar(1.0)) * x + coefficient * log_term
}

/// `log(1 + exp(-|x|))`.
fn softplus_neg_abs<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 4> {
    x.abs().neg().exp().add_scalar(1.0).log()
}
