use std::path::PathBuf;

use anyhow::Result;
use burn::data::dataloader::Dataset;
use burn::{
    backend::{Wgpu, wgpu::WgpuDevice},
    data::dataloader::DataLoaderBuilder,
};
use burn_hrnet::{
    ExperimentConfig, RunMode, Segmenter, TestConfig,
    dataset::SegmentationBatcher,
    training::metrics::{ConfusionMatrix, pixel_accuracy},
};
use clap::Args;

use super::load_segmentation_dataset;

#[derive(Args)]
pub struct EvalArgs {
    #[arg(short, long)]
    pub data_dir: PathBuf,

    /// Directory holding the weight checkpoints.
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

    #[arg(short, long, default_value_t = 8)]
    pub batch_size: usize,

    /// Load the best checkpoint instead of the numbered one.
    #[arg(long, default_value_t = false)]
    pub best: bool,

    /// File name (without extension) of the best checkpoint.
    #[arg(long, default_value = "best")]
    pub best_file_name: String,

    /// Epoch of the numbered checkpoint to evaluate.
    #[arg(long, default_value_t = 0)]
    pub present_epoch: usize,
}

pub fn run(args: &EvalArgs) -> Result<()> {
    type MyBackend = Wgpu<f32, i32>;

    println!("Initializing device...");
    let device = WgpuDevice::default();

    let config = ExperimentConfig::new(
        [args.image_height, args.image_width],
        args.num_classes,
        args.save_path.to_string_lossy().into_owned(),
        TestConfig::new(args.best_file_name.clone()).with_best(args.best),
    )
    .with_mode(RunMode::Test)
    .with_present_epoch(args.present_epoch)
    .with_channel_width(args.channel_width);

    let segmenter = Segmenter::<MyBackend>::new(config, &device)?;
    let model = segmenter.into_model();

    println!("Loading dataset from {}...", args.data_dir.display());
    let dataset = load_segmentation_dataset(&args.data_dir, args.num_classes)?;
    println!("Loaded {} samples", dataset.len());

    let batcher = SegmentationBatcher::<MyBackend>::new(
        device.clone(),
        [args.image_height, args.image_width],
    );
    let dataloader = DataLoaderBuilder::new(batcher)
        .batch_size(args.batch_size)
        .build(dataset);

    let mut matrix = ConfusionMatrix::new(args.num_classes);
    let mut accuracy_sum = 0.0;
    let mut batches = 0;

    for batch in dataloader.iter() {
        let predictions = model.forward(batch.images).argmax(1).squeeze::<3>(1);

        matrix.update(predictions.clone(), batch.labels.clone());
        accuracy_sum += pixel_accuracy(predictions, batch.labels);
        batches += 1;
    }

    anyhow::ensure!(batches > 0, "dataset produced no batches");

    println!("Mean IoU:       {:.4}", matrix.mean_iou());
    println!("Pixel accuracy: {:.4}", accuracy_sum / batches as f64);

    Ok(())
}
