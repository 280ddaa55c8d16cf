use burn::data::dataset::vision::{Annotation, ImageDatasetItem, PixelDepth};
use burn::{data::dataloader::batcher::Batcher, prelude::*};

use crate::config::IGNORE_INDEX;

/// Builds [`SegmentationBatch`]es from RGB image items with integer label
/// maps. Label values pass through untouched, including the ignore sentinel.
#[derive(Clone)]
pub struct SegmentationBatcher<B: Backend> {
    device: B::Device,
    image_size: [usize; 2],
}

impl<B: Backend> SegmentationBatcher<B> {
    pub fn new(device: B::Device, image_size: [usize; 2]) -> Self {
        Self { device, image_size }
    }
}

#[derive(Clone, Debug)]
pub struct SegmentationBatch<B: Backend> {
    /// `[batch, 3, height, width]`, scaled to `[0, 1]`.
    pub images: Tensor<B, 4, Float>,
    /// `[batch, height, width]` class indices, 255 marking ignored pixels.
    pub labels: Tensor<B, 3, Int>,
}

impl<B: Backend> Batcher<ImageDatasetItem, SegmentationBatch<B>> for SegmentationBatcher<B> {
    fn batch(&self, items: Vec<ImageDatasetItem>) -> SegmentationBatch<B> {
        let batch_size = items.len();
        let [height, width] = self.image_size;

        let mut images = Vec::with_capacity(batch_size);
        let mut labels = Vec::with_capacity(batch_size);

        for item in items {
            let mut image_data = Vec::with_capacity(3 * height * width);

            for c in 0..3 {
                for y in 0..height {
                    for x in 0..width {
                        let idx = (y * width + x) * 3 + c;
                        let val = match item.image.get(idx) {
                            Some(pixel) => match pixel {
                                PixelDepth::U8(v) => *v as f32 / 255.0,
                                PixelDepth::U16(v) => *v as f32 / 65535.0,
                                PixelDepth::F32(v) => *v,
                            },
                            None => 0.0,
                        };
                        image_data.push(val);
                    }
                }
            }

            let image_tensor = Tensor::<B, 3>::from_data(
                TensorData::new(image_data, Shape::new([3, height, width]))
                    .convert::<B::FloatElem>(),
                &self.device,
            );

            let label_tensor: Tensor<B, 2, Int> = match &item.annotation {
                Annotation::SegmentationMask(mask) => {
                    let int_mask: Vec<i32> = mask.mask.iter().map(|&x| x as i32).collect();

                    Tensor::<B, 2, Int>::from_data(
                        TensorData::new(int_mask, Shape::new([height, width]))
                            .convert::<B::IntElem>(),
                        &self.device,
                    )
                }
                _ => {
                    println!("Warning: Item does not contain segmentation mask annotation");
                    // Fully ignored label map keeps the item out of the loss.
                    let ignored = vec![IGNORE_INDEX as i32; height * width];
                    Tensor::<B, 2, Int>::from_data(
                        TensorData::new(ignored, Shape::new([height, width]))
                            .convert::<B::IntElem>(),
                        &self.device,
                    )
                }
            };

            images.push(image_tensor);
            labels.push(label_tensor);
        }

        let images: Tensor<B, 4> = Tensor::stack::<4>(images.to_vec(), 0);
        let labels: Tensor<B, 3, Int> = Tensor::stack::<3>(labels.to_vec(), 0);

        SegmentationBatch { images, labels }
    }
}
