use std::path::PathBuf;

use burn::{
    LearningRate,
    lr_scheduler::LrScheduler,
    module::Module,
    optim::AdamConfig,
    prelude::*,
    record::{BinFileRecorder, FullPrecisionSettings},
};

use crate::config::{ExperimentConfig, RunMode};
use crate::error::{HrnetError, HrnetResult};
use crate::training::loss::{BceLoss, BceLossConfig, WceLoss, WceLossConfig};

use super::hrnet::{HrNet, HrNetConfig};

/// Model wrapper tying an [`HrNet`] to an [`ExperimentConfig`]: it builds
/// the network, restores weights according to the configured run mode and
/// owns the checkpoint naming scheme under `save_path`.
///
/// Numbered checkpoints are named `model_{epoch}`; the evaluation mode can
/// alternatively load the file named by `test.best_file_name`. A missing
/// checkpoint is an error, never a silent fall back to random weights.
pub struct Segmenter<B: Backend> {
    model: HrNet<B>,
    config: ExperimentConfig,
}

impl<B: Backend> Segmenter<B> {
    pub fn new(config: ExperimentConfig, device: &B::Device) -> HrnetResult<Self> {
        config.validate()?;

        let model = HrNetConfig::new(config.num_classes)
            .with_channel_width(config.channel_width)
            .with_class_weight(config.class_weight.clone())
            .init(device);

        let model = match config.mode {
            RunMode::Train => model,
            RunMode::Resume => {
                let path = numbered_checkpoint(&config, config.present_epoch);
                load_weights(model, path, device)?
            }
            RunMode::Test => {
                let path = if config.test.best {
                    PathBuf::from(&config.save_path).join(&config.test.best_file_name)
                } else {
                    numbered_checkpoint(&config, config.present_epoch)
                };
                load_weights(model, path, device)?
            }
        };

        Ok(Self { model, config })
    }

    pub fn model(&self) -> &HrNet<B> {
        &self.model
    }

    pub fn into_model(self) -> HrNet<B> {
        self.model
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// Write the numbered checkpoint for `epoch` under `save_path`.
    pub fn save_checkpoint(&self, epoch: usize) -> HrnetResult<PathBuf> {
        let path = numbered_checkpoint(&self.config, epoch);
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();

        self.model
            .clone()
            .save_file(&path, &recorder)
            .map_err(|err| HrnetError::WeightSaving {
                path: path.with_extension("bin"),
                reason: err.to_string(),
            })?;

        Ok(path.with_extension("bin"))
    }

    /// Optimizer the model trains with.
    pub fn optimizer(&self) -> AdamConfig {
        AdamConfig::new()
    }

    /// Alternate weighted sigmoid cross entropy built from the experiment
    /// configuration; the network itself trains with [`SceLoss`].
    ///
    /// [`SceLoss`]: crate::training::SceLoss
    pub fn wce_loss(&self, device: &B::Device) -> WceLoss<B> {
        WceLossConfig::new(self.config.num_classes)
            .with_pos_weight(self.config.wce_weight)
            .with_class_weight(self.config.class_weight.clone())
            .init(device)
    }

    /// Alternate plain sigmoid cross entropy.
    pub fn bce_loss(&self) -> BceLoss {
        BceLossConfig::new(self.config.num_classes).init()
    }

    /// Inverse-time decayed learning rate after `step` optimizer steps;
    /// `lr_decay` of zero keeps the rate constant.
    pub fn decayed_lr(&self, step: usize) -> f64 {
        self.config.lr / (1.0 + self.config.lr_decay * step as f64)
    }

    /// Scheduler applying [`decayed_lr`](Self::decayed_lr) at every
    /// optimizer step; hand this to the learner in place of a fixed rate.
    pub fn lr_scheduler(&self) -> InverseTimeLrScheduler {
        InverseTimeLrScheduler {
            lr: self.config.lr,
            decay: self.config.lr_decay,
            step: 0,
        }
    }
}

/// Inverse-time learning-rate decay, `lr / (1 + decay·step)`.
#[derive(Clone, Debug)]
pub struct InverseTimeLrScheduler {
    lr: f64,
    decay: f64,
    step: usize,
}

impl LrScheduler for InverseTimeLrScheduler {
    type Record<B: Backend> = usize;

    fn step(&mut self) -> LearningRate {
        let lr = self.lr / (1.0 + self.decay * self.step as f64);
        self.step += 1;
        lr
    }

    fn to_record<B: Backend>(&self) -> Self::Record<B> {
        self.step
    }

    fn load_record<B: Backend>(mut self, record: Self::Record<B>) -> Self {
        self.step = record;
        self
    }
}

fn numbered_checkpoint(config: &ExperimentConfig, epoch: usize) -> PathBuf {
    PathBuf::from(&config.save_path).join(format!("model_{epoch}"))
}

fn load_weights<B: Backend>(
    model: HrNet<B>,
    path: PathBuf,
    device: &B::Device,
) -> HrnetResult<HrNet<B>> {
    // The recorder appends its own extension; check the on-disk name.
    let file = path.with_extension("bin");
    if !file.exists() {
        return Err(HrnetError::CheckpointNotFound { path: file });
    }

    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model
        .load_file(&path, &recorder, device)
        .map_err(|err| HrnetError::WeightLoading {
            path: file,
            reason: err.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TestConfig;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray;

    fn config(save_path: &std::path::Path) -> ExperimentConfig {
        ExperimentConfig::new(
            [32, 32],
            3,
            save_path.to_string_lossy().into_owned(),
            TestConfig::new("best".to_string()),
        )
        .with_channel_width(4)
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("hrnet-segmenter-{name}"));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn train_mode_builds_without_touching_disk() {
        let device = Default::default();
        let config = config(std::path::Path::new("does-not-exist"));

        assert!(Segmenter::<TestBackend>::new(config, &device).is_ok());
    }

    #[test]
    fn resume_mode_fails_on_missing_checkpoint() {
        let device = Default::default();
        let dir = temp_dir("missing");
        let config = config(&dir).with_mode(RunMode::Resume).with_present_epoch(7);

        let result = Segmenter::<TestBackend>::new(config, &device);
        assert!(matches!(
            result,
            Err(HrnetError::CheckpointNotFound { path }) if path.ends_with("model_7.bin")
        ));
    }

    #[test]
    fn invalid_configuration_is_rejected_before_any_loading() {
        let device = Default::default();
        let config = config(std::path::Path::new("unused")).with_class_weight(vec![1.0]);

        assert!(matches!(
            Segmenter::<TestBackend>::new(config, &device),
            Err(HrnetError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn checkpoints_round_trip_through_resume_mode() {
        let device = Default::default();
        let dir = temp_dir("roundtrip");

        let trained = Segmenter::<TestBackend>::new(config(&dir), &device).unwrap();
        trained.save_checkpoint(2).unwrap();

        let resumed = Segmenter::<TestBackend>::new(
            config(&dir).with_mode(RunMode::Resume).with_present_epoch(2),
            &device,
        )
        .unwrap();

        let images =
            Tensor::<TestBackend, 4>::random([1, 3, 32, 32], Distribution::Default, &device);
        let lhs = trained.model().forward(images.clone()).to_data();
        let rhs = resumed.model().forward(images).to_data();
        lhs.assert_approx_eq(&rhs, 5);
    }

    #[test]
    fn decayed_lr_follows_inverse_time() {
        let device = Default::default();
        let config = config(std::path::Path::new("unused"))
            .with_lr(1.0)
            .with_lr_decay(0.5);

        let segmenter = Segmenter::<TestBackend>::new(config, &device).unwrap();
        assert!((segmenter.decayed_lr(0) - 1.0).abs() < 1e-12);
        assert!((segmenter.decayed_lr(2) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn lr_scheduler_decays_every_step() {
        let device = Default::default();
        let config = config(std::path::Path::new("unused"))
            .with_lr(1.0)
            .with_lr_decay(0.5);

        let segmenter = Segmenter::<TestBackend>::new(config, &device).unwrap();
        let mut scheduler = segmenter.lr_scheduler();

        for step in 0..4 {
            let lr = LrScheduler::step(&mut scheduler);
            assert!((lr - segmenter.decayed_lr(step)).abs() < 1e-12);
        }

        // The record restores the step count, so resuming continues the decay.
        let mut resumed = segmenter
            .lr_scheduler()
            .load_record::<TestBackend>(scheduler.to_record::<TestBackend>());
        let lr = LrScheduler::step(&mut resumed);
        assert!((lr - segmenter.decayed_lr(4)).abs() < 1e-12);
    }
}
