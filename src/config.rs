use burn::prelude::*;

use crate::error::{HrnetError, HrnetResult};

/// Ignore sentinel: label value marking pixels excluded from loss and metrics.
pub const IGNORE_INDEX: usize = 255;

/// How the model weights are initialized at construction time.
#[derive(Config, Debug, PartialEq, Eq)]
pub enum RunMode {
    /// Mode 0: fresh random initialization, nothing is loaded.
    Train,
    /// Mode 1: resume training from the numbered checkpoint of `present_epoch`.
    Resume,
    /// Mode 2: evaluation; loads the best checkpoint when `test.best` is set,
    /// otherwise the numbered checkpoint.
    Test,
}

/// Evaluation-run options.
#[derive(Config, Debug)]
pub struct TestConfig {
    /// File name (without extension) of the best checkpoint under `save_path`.
    pub best_file_name: String,

    /// Load the best checkpoint instead of the numbered one.
    #[config(default = false)]
    pub best: bool,
}

/// Immutable experiment configuration, created once at startup.
///
/// `class_weight` may be empty, which disables per-class loss weighting.
#[derive(Config, Debug)]
pub struct ExperimentConfig {
    /// Input image size as `[height, width]`.
    pub image_size: [usize; 2],

    /// Number of segmentation classes.
    pub num_classes: usize,

    /// Directory holding checkpoint files.
    pub save_path: String,

    /// Evaluation options.
    pub test: TestConfig,

    #[config(default = "8")]
    pub batch_size: usize,

    /// Per-class loss weights; empty disables weighting.
    #[config(default = "Vec::new()")]
    pub class_weight: Vec<f32>,

    /// Positive-class weight of the weighted (sigmoid) cross entropy.
    #[config(default = "1.0")]
    pub wce_weight: f32,

    #[config(default = "3e-4")]
    pub lr: f64,

    /// Inverse-time learning-rate decay factor (0 disables decay).
    #[config(default = "0.0")]
    pub lr_decay: f64,

    #[config(default = "RunMode::Train")]
    pub mode: RunMode,

    /// Epoch of the numbered checkpoint to resume from.
    #[config(default = "0")]
    pub present_epoch: usize,

    /// Channel-width multiplier `c` of the resolution branches.
    #[config(default = "32")]
    pub channel_width: usize,
}

impl ExperimentConfig {
    /// Fail fast on configurations the graph or the losses cannot honor.
    pub fn validate(&self) -> HrnetResult<()> {
        if !self.class_weight.is_empty() && self.class_weight.len() != self.num_classes {
            return Err(HrnetError::InvalidConfiguration {
                reason: format!(
                    "class_weight has {} entries but num_classes is {}",
                    self.class_weight.len(),
                    self.num_classes
                ),
            });
        }

        if self.num_classes == 0 {
            return Err(HrnetError::InvalidConfiguration {
                reason: "num_classes must be at least 1".to_string(),
            });
        }

        // The deepest branch sits at 1/32 of the input resolution; anything
        // not divisible by 32 would break the resize round trip.
        let [height, width] = self.image_size;
        if height % 32 != 0 || width % 32 != 0 {
            return Err(HrnetError::InvalidConfiguration {
                reason: format!("image_size ({height}, {width}) must be a multiple of 32"),
            });
        }

        if self.channel_width == 0 {
            return Err(HrnetError::InvalidConfiguration {
                reason: "channel_width must be at least 1".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> ExperimentConfig {
        ExperimentConfig::new(
            [64, 64],
            3,
            "artifacts".to_string(),
            TestConfig::new("best".to_string()),
        )
    }

    #[test]
    fn accepts_empty_class_weights() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn accepts_matching_class_weights() {
        let config = base_config().with_class_weight(vec![1.0, 2.0, 0.5]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_mismatched_class_weights() {
        let config = base_config().with_class_weight(vec![1.0, 2.0]);
        assert!(matches!(
            config.validate(),
            Err(HrnetError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn rejects_unaligned_image_size() {
        let config = ExperimentConfig::new(
            [60, 64],
            3,
            "artifacts".to_string(),
            TestConfig::new("best".to_string()),
        );
        assert!(matches!(
            config.validate(),
            Err(HrnetError::InvalidConfiguration { .. })
        ));
    }
}
