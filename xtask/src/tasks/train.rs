use std::path::PathBuf;

use anyhow::Result;
use burn::data::dataloader::Dataset;
use burn::record::{BinFileRecorder, CompactRecorder, FullPrecisionSettings};
use burn::train::metric::LossMetric;
use burn::{
    backend::{Autodiff, Wgpu, wgpu::WgpuDevice},
    data::dataloader::DataLoaderBuilder,
    module::Module,
    prelude::*,
    train::LearnerBuilder,
};
use burn_hrnet::{
    ExperimentConfig, RunMode, Segmenter, TestConfig,
    dataset::SegmentationBatcher,
    training::{MeanIouMetric, PixelAccuracyMetric},
};
use clap::Args;

use super::load_segmentation_dataset;

#[derive(Args)]
pub struct TrainArgs {
    #[arg(short, long)]
    pub train_data_dir: PathBuf,

    #[arg(short, long)]
    pub valid_data_dir: PathBuf,

    #[arg(short, long, default_value_t = 10)]
    pub epochs: usize,

    #[arg(short, long, default_value_t = 8)]
    pub batch_size: usize,

    #[arg(short, long, default_value_t = 0.0003)]
    pub lr: f64,

    /// Inverse-time learning-rate decay factor.
    #[arg(long, default_value_t = 0.0)]
    pub lr_decay: f64,

    #[arg(long, default_value_t = 4)]
    pub num_workers: usize,

    #[arg(short, long, default_value = "artifacts")]
    pub artifact_dir: PathBuf,

    /// Directory holding the numbered weight checkpoints.
    #[arg(long, default_value = "checkpoints")]
    pub save_path: PathBuf,

    #[arg(long)]
    pub num_classes: usize,

    #[arg(long, default_value_t = 32)]
    pub channel_width: usize,

    #[arg(long, default_value_t = 256)]
    pub image_height: usize,

    #[arg(long, default_value_t = 256)]
    pub image_width: usize,

    /// Per-class loss weights; leave empty to disable weighting.
    #[arg(long, num_args = 0.., value_delimiter = ',')]
    pub class_weight: Vec<f32>,

    /// Resume from the numbered checkpoint of `present_epoch`.
    #[arg(long, default_value_t = false)]
    pub resume: bool,

    #[arg(long, default_value_t = 0)]
    pub present_epoch: usize,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

pub fn run(args: &TrainArgs) -> Result<()> {
    type MyBackend = Wgpu<f32, i32>;
    type MyAutodiffBackend = Autodiff<MyBackend>;

    println!("Initializing device...");
    let device = WgpuDevice::default();

    MyAutodiffBackend::seed(args.seed);

    let mode = if args.resume {
        RunMode::Resume
    } else {
        RunMode::Train
    };

    let config = ExperimentConfig::new(
        [args.image_height, args.image_width],
        args.num_classes,
        args.save_path.to_string_lossy().into_owned(),
        TestConfig::new("best".to_string()),
    )
    .with_batch_size(args.batch_size)
    .with_class_weight(args.class_weight.clone())
    .with_lr(args.lr)
    .with_lr_decay(args.lr_decay)
    .with_mode(mode)
    .with_present_epoch(args.present_epoch)
    .with_channel_width(args.channel_width);

    std::fs::create_dir_all(&args.save_path)?;
    std::fs::create_dir_all(&args.artifact_dir)?;

    let segmenter = Segmenter::<MyAutodiffBackend>::new(config, &device)?;

    println!(
        "Loading training dataset from {}...",
        args.train_data_dir.display()
    );
    let train_dataset = load_segmentation_dataset(&args.train_data_dir, args.num_classes)?;
    println!("Loaded {} samples (training dataset)", train_dataset.len());

    let valid_dataset = load_segmentation_dataset(&args.valid_data_dir, args.num_classes)?;
    println!("Loaded {} samples (valid dataset)", valid_dataset.len());

    println!("Creating data batchers...");
    let image_size = [args.image_height, args.image_width];
    let batcher_train = SegmentationBatcher::<MyAutodiffBackend>::new(device.clone(), image_size);
    let batcher_valid = SegmentationBatcher::<MyBackend>::new(device.clone(), image_size);

    println!(
        "Building dataloaders with batch size {}...",
        args.batch_size
    );
    let dataloader_train = DataLoaderBuilder::new(batcher_train)
        .batch_size(args.batch_size)
        .num_workers(args.num_workers)
        .shuffle(args.seed)
        .build(train_dataset);

    let dataloader_valid = DataLoaderBuilder::new(batcher_valid)
        .shuffle(args.seed)
        .build(valid_dataset);

    let lr_scheduler = segmenter.lr_scheduler();
    let optimizer = segmenter.optimizer().init();
    let model = segmenter.into_model();

    println!("Building learner...");
    let learner = LearnerBuilder::new(&args.artifact_dir)
        .metric_train_numeric(LossMetric::new())
        .metric_valid_numeric(LossMetric::new())
        .metric_train_numeric(PixelAccuracyMetric::new())
        .metric_valid_numeric(PixelAccuracyMetric::new())
        .metric_train_numeric(MeanIouMetric::new(args.num_classes))
        .metric_valid_numeric(MeanIouMetric::new(args.num_classes))
        .with_file_checkpointer(CompactRecorder::new())
        .num_epochs(args.epochs)
        .build(model, optimizer, lr_scheduler);

    let model_trained = learner.fit(dataloader_train, dataloader_valid);

    let checkpoint = args.save_path.join(format!("model_{}", args.epochs));
    println!("Saving model checkpoint to {}...", checkpoint.display());
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model_trained.save_file(&checkpoint, &recorder)?;

    println!("Training completed successfully!");
    Ok(())
}
