pub mod config;
pub mod error;
pub mod model;
pub mod training;

#[cfg(feature = "dataset")]
pub mod dataset;

pub use config::{ExperimentConfig, IGNORE_INDEX, RunMode, TestConfig};
pub use error::{HrnetError, HrnetResult};
pub use model::{HrNet, HrNetConfig, InverseTimeLrScheduler, Segmenter};

#[cfg(feature = "dataset")]
pub use dataset::{SegmentationBatch, SegmentationBatcher};

#[cfg(feature = "training")]
pub use training::{MeanIouMetric, PixelAccuracyMetric, SegmentationOutput};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
