use std::marker::PhantomData;

use burn::prelude::*;
use burn::train::metric::state::{FormatOptions, NumericMetricState};
use burn::train::metric::{Metric, MetricEntry, MetricMetadata, Numeric};
use derive_new::new;

use crate::config::IGNORE_INDEX;

/// Metric input shared by the segmentation metrics: raw logits and the label
/// map, both at full resolution.
#[derive(new)]
pub struct SegmentationInput<B: Backend> {
    pub outputs: Tensor<B, 4>,
    pub targets: Tensor<B, 3, Int>,
}

/// Running confusion matrix over class indices, accumulated across batches
/// and reset at epoch boundaries.
///
/// Ignored pixels are masked by multiplication, which remaps them to class 0
/// instead of dropping them; class-0 counts therefore include ignored pixels.
pub struct ConfusionMatrix {
    counts: Vec<u64>,
    num_classes: usize,
}

impl ConfusionMatrix {
    pub fn new(num_classes: usize) -> Self {
        Self {
            counts: vec![0; num_classes * num_classes],
            num_classes,
        }
    }

    pub fn reset(&mut self) {
        self.counts.fill(0);
    }

    /// Accumulate one batch of predictions against its label map.
    pub fn update<B: Backend>(
        &mut self,
        predictions: Tensor<B, 3, Int>,
        targets: Tensor<B, 3, Int>,
    ) {
        let mask = targets.clone().not_equal_elem(IGNORE_INDEX as i64).int();
        let predictions = predictions * mask.clone();
        let targets = targets * mask;

        let predictions = predictions.to_data();
        let targets = targets.to_data();

        for (prediction, target) in predictions.iter::<i64>().zip(targets.iter::<i64>()) {
            self.counts[target as usize * self.num_classes + prediction as usize] += 1;
        }
    }

    /// Mean over per-class `tp / (row + col - tp)`, skipping classes whose
    /// union is empty. Zero when every union is empty.
    pub fn mean_iou(&self) -> f64 {
        let n = self.num_classes;

        let mut total_iou = 0.0;
        let mut observed_classes = 0;

        for class_idx in 0..n {
            let tp = self.counts[class_idx * n + class_idx];
            let row: u64 = (0..n).map(|col| self.counts[class_idx * n + col]).sum();
            let col: u64 = (0..n).map(|row| self.counts[row * n + class_idx]).sum();

            let union = row + col - tp;
            if union > 0 {
                total_iou += tp as f64 / union as f64;
                observed_classes += 1;
            }
        }

        if observed_classes > 0 {
            total_iou / observed_classes as f64
        } else {
            0.0
        }
    }
}

/// Fraction of pixels whose masked prediction equals the masked label.
///
/// Both sides are multiplied by the ignore mask before comparison, so an
/// ignored pixel compares 0 against 0 and always counts as correct.
pub fn pixel_accuracy<B: Backend>(
    predictions: Tensor<B, 3, Int>,
    targets: Tensor<B, 3, Int>,
) -> f64 {
    let [batch, height, width] = targets.dims();
    let total = batch * height * width;

    let mask = targets.clone().not_equal_elem(IGNORE_INDEX as i64).int();
    let matches = (predictions * mask.clone())
        .equal(targets * mask)
        .int()
        .sum()
        .into_scalar()
        .elem::<i64>();

    matches as f64 / total as f64
}

/// Mean intersection-over-union, computed from a confusion matrix that runs
/// over the whole epoch rather than per batch.
pub struct MeanIouMetric<B: Backend> {
    state: NumericMetricState,
    matrix: ConfusionMatrix,
    _b: PhantomData<B>,
}

impl<B: Backend> MeanIouMetric<B> {
    pub fn new(num_classes: usize) -> Self {
        Self {
            state: NumericMetricState::default(),
            matrix: ConfusionMatrix::new(num_classes),
            _b: PhantomData,
        }
    }
}

impl<B: Backend> Metric for MeanIouMetric<B> {
    type Input = SegmentationInput<B>;
    const NAME: &'static str = "Mean IoU";

    fn update(&mut self, input: &SegmentationInput<B>, _metadata: &MetricMetadata) -> MetricEntry {
        let [batch_size, _, _, _] = input.outputs.dims();
        let predictions = input.outputs.clone().argmax(1).squeeze::<3>(1);

        self.matrix.update(predictions, input.targets.clone());

        self.state.update(
            100.0 * self.matrix.mean_iou(),
            batch_size,
            FormatOptions::new(Self::NAME).unit("%").precision(2),
        )
    }

    fn clear(&mut self) {
        self.matrix.reset();
        self.state.reset()
    }
}

impl<B: Backend> Numeric for MeanIouMetric<B> {
    fn value(&self) -> f64 {
        self.state.value()
    }
}

/// Per-batch pixel accuracy, averaged by the metric state.
#[derive(Default)]
pub struct PixelAccuracyMetric<B: Backend> {
    state: NumericMetricState,
    _b: PhantomData<B>,
}

impl<B: Backend> PixelAccuracyMetric<B> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<B: Backend> Metric for PixelAccuracyMetric<B> {
    type Input = SegmentationInput<B>;
    const NAME: &'static str = "Pixel Accuracy";

    fn update(&mut self, input: &SegmentationInput<B>, _metadata: &MetricMetadata) -> MetricEntry {
        let [batch_size, _, _, _] = input.outputs.dims();
        let predictions = input.outputs.clone().argmax(1).squeeze::<3>(1);

        let accuracy = pixel_accuracy(predictions, input.targets.clone());

        self.state.update(
            100.0 * accuracy,
            batch_size,
            FormatOptions::new(Self::NAME).unit("%").precision(2),
        )
    }

    fn clear(&mut self) {
        self.state.reset()
    }
}

impl<B: Backend> Numeric for PixelAccuracyMetric<B> {
    fn value(&self) -> f64 {
        self.state.value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn label_map(
        device: &<TestBackend as Backend>::Device,
        values: Vec<i32>,
    ) -> Tensor<TestBackend, 3, Int> {
        let len = values.len();
        Tensor::<TestBackend, 1, Int>::from_ints(values.as_slice(), device).reshape([1, 1, len])
    }

    #[test]
    fn perfect_predictions_give_unit_iou() {
        let device = Default::default();
        let targets = label_map(&device, vec![0, 1, 2, 1, 0, 2]);

        let mut matrix = ConfusionMatrix::new(3);
        matrix.update(targets.clone(), targets);

        assert!((matrix.mean_iou() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn confusion_matrix_matches_hand_computed_iou() {
        let device = Default::default();
        // Class 0: tp = 2, union = 3 (one false negative). Class 1: tp = 1,
        // union = 2 (one false positive).
        let targets = label_map(&device, vec![0, 0, 0, 1]);
        let predictions = label_map(&device, vec![0, 0, 1, 1]);

        let mut matrix = ConfusionMatrix::new(2);
        matrix.update(predictions, targets);

        let expected = (2.0 / 3.0 + 1.0 / 2.0) / 2.0;
        assert!((matrix.mean_iou() - expected).abs() < 1e-12);
    }

    #[test]
    fn unobserved_classes_are_skipped() {
        let device = Default::default();
        let targets = label_map(&device, vec![0, 0]);

        let mut matrix = ConfusionMatrix::new(5);
        matrix.update(targets.clone(), targets);

        assert!((matrix.mean_iou() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn ignored_pixels_are_remapped_to_class_zero() {
        let device = Default::default();
        let targets = label_map(&device, vec![255, 255, 1]);
        let predictions = label_map(&device, vec![0, 0, 1]);

        let mut matrix = ConfusionMatrix::new(2);
        matrix.update(predictions, targets);

        // The ignored pixels land in class 0 as true positives.
        assert!((matrix.mean_iou() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn reset_clears_the_accumulator() {
        let device = Default::default();
        let targets = label_map(&device, vec![0, 1]);
        let predictions = label_map(&device, vec![1, 0]);

        let mut matrix = ConfusionMatrix::new(2);
        matrix.update(predictions, targets.clone());
        assert!(matrix.mean_iou() < 1e-12);

        matrix.reset();
        matrix.update(targets.clone(), targets);
        assert!((matrix.mean_iou() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn accumulation_spans_updates() {
        let device = Default::default();

        let mut matrix = ConfusionMatrix::new(2);
        matrix.update(label_map(&device, vec![0, 0]), label_map(&device, vec![0, 0]));
        matrix.update(label_map(&device, vec![1, 1]), label_map(&device, vec![1, 0]));

        // Accumulated: class 0 tp = 3, union = 4; class 1 tp = 1, union = 2.
        let expected = (3.0 / 4.0 + 1.0 / 2.0) / 2.0;
        assert!((matrix.mean_iou() - expected).abs() < 1e-12);
    }

    #[test]
    fn pixel_accuracy_counts_matching_pixels() {
        let device = Default::default();
        let targets = label_map(&device, vec![0, 1, 2, 2]);
        let predictions = label_map(&device, vec![0, 1, 2, 0]);

        assert!((pixel_accuracy(targets.clone(), targets.clone()) - 1.0).abs() < 1e-12);
        assert!((pixel_accuracy(predictions, targets) - 0.75).abs() < 1e-12);
    }

    #[test]
    fn ignored_pixels_count_as_correct_in_pixel_accuracy() {
        let device = Default::default();
        let targets = label_map(&device, vec![255, 255, 1, 1]);
        let predictions = label_map(&device, vec![2, 0, 1, 0]);

        // Both ignored pixels compare 0 against 0 after masking.
        assert!((pixel_accuracy(predictions, targets) - 0.75).abs() < 1e-12);
    }
}
