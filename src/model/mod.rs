pub mod blocks;
pub mod hrnet;
pub mod segmenter;
pub mod stages;

pub use hrnet::{HrNet, HrNetConfig};
pub use segmenter::{InverseTimeLrScheduler, Segmenter};
