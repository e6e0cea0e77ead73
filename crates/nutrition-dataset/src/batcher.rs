//! Burn batcher turning samples into dual-target tensors.

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use nutrition_core::{ImageDimensions, NUTRITION_DIMS};

use crate::sample::{one_hot, Sample};

/// Tensors of one training or evaluation step
#[derive(Clone, Debug)]
pub struct NutritionBatch<B: Backend> {
    /// Images `[batch, 3, height, width]`
    pub images: Tensor<B, 4>,
    /// One-hot classification targets `[batch, K]`
    pub targets: Tensor<B, 2>,
    /// Class indices `[batch]`
    pub class_indices: Tensor<B, 1, Int>,
    /// Nutrition targets `[batch, 7]`
    pub nutrition: Tensor<B, 2>,
}

/// Converts concatenated HWC buffers into an NCHW tensor.
pub fn images_to_tensor<B: Backend>(
    pixels: Vec<f32>,
    batch_size: usize,
    dims: ImageDimensions,
    device: &B::Device,
) -> Tensor<B, 4> {
    let [height, width, channels] = dims.hwc();
    Tensor::<B, 4>::from_floats(
        TensorData::new(pixels, [batch_size, height, width, channels]),
        device,
    )
    .permute([0, 3, 1, 2])
}

#[derive(Clone, Debug)]
pub struct NutritionBatcher {
    num_classes: usize,
    dims: ImageDimensions,
}

impl NutritionBatcher {
    pub fn new(num_classes: usize, dims: ImageDimensions) -> Self {
        Self { num_classes, dims }
    }
}

impl<B: Backend> Batcher<B, Sample, NutritionBatch<B>> for NutritionBatcher {
    fn batch(&self, items: Vec<Sample>, device: &B::Device) -> NutritionBatch<B> {
        let batch_size = items.len();
        let k = self.num_classes;

        let mut pixels = Vec::with_capacity(batch_size * self.dims.total_values());
        let mut targets = Vec::with_capacity(batch_size * k);
        let mut indices = Vec::with_capacity(batch_size);
        let mut nutrition = Vec::with_capacity(batch_size * NUTRITION_DIMS);

        for item in items {
            targets.extend(one_hot(item.class_index, k));
            indices.push(item.class_index as i64);
            nutrition.extend_from_slice(&item.nutrition);
            pixels.extend(item.image);
        }

        NutritionBatch {
            images: images_to_tensor(pixels, batch_size, self.dims, device),
            targets: Tensor::<B, 2>::from_floats(TensorData::new(targets, [batch_size, k]), device),
            class_indices: Tensor::<B, 1, Int>::from_data(
                TensorData::new(indices, [batch_size]),
                device,
            ),
            nutrition: Tensor::<B, 2>::from_floats(
                TensorData::new(nutrition, [batch_size, NUTRITION_DIMS]),
                device,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_batch_shapes_and_layout() {
        let device = Default::default();
        let dims = ImageDimensions::square_rgb(2);
        let batcher = NutritionBatcher::new(3, dims);

        // Pixel (0, 1) of the first image has a distinct red value
        let mut image = vec![0.0; 12];
        image[3] = 0.5;
        let items = vec![
            Sample {
                image,
                class_index: 2,
                nutrition: [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0],
            },
            Sample {
                image: vec![1.0; 12],
                class_index: 0,
                nutrition: [0.0; 7],
            },
        ];

        let batch: NutritionBatch<TestBackend> = batcher.batch(items, &device);

        assert_eq!(batch.images.dims(), [2, 3, 2, 2]);
        assert_eq!(batch.targets.dims(), [2, 3]);
        assert_eq!(batch.nutrition.dims(), [2, 7]);

        let images = batch.images.into_data().to_vec::<f32>().unwrap();
        // NCHW: image 0, channel 0, row 0, column 1
        assert_eq!(images[1], 0.5);
        assert_eq!(images[12..].iter().sum::<f32>(), 12.0);

        let targets = batch.targets.into_data().to_vec::<f32>().unwrap();
        assert_eq!(targets, vec![0.0, 0.0, 1.0, 1.0, 0.0, 0.0]);

        let indices = batch.class_indices.into_data().to_vec::<i64>().unwrap();
        assert_eq!(indices, vec![2, 0]);

        let nutrition = batch.nutrition.into_data().to_vec::<f32>().unwrap();
        assert_eq!(&nutrition[..7], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
    }
}
