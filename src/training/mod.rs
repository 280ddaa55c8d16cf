#[cfg(feature = "training")]
pub mod learner;
pub mod loss;
#[cfg(feature = "training")]
pub mod metrics;

#[cfg(feature = "training")]
pub use learner::SegmentationOutput;
pub use loss::{BceLoss, BceLossConfig, SceLoss, SceLossConfig, WceLoss, WceLossConfig};
#[cfg(feature = "training")]
pub use metrics::{MeanIouMetric, PixelAccuracyMetric, SegmentationInput};
