//! Training-time photometric and geometric augmentation.
//!
//! Operates on normalized HWC buffers. Every transform covers the whole
//! image; the result is clamped back into `[0, 1]`.

use nutrition_core::AugmentationConfig;
use rand::Rng;

/// Random augmentation applied to training samples only
#[derive(Debug, Clone)]
pub struct Augmenter {
    config: AugmentationConfig,
}

impl Augmenter {
    pub fn new(config: AugmentationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AugmentationConfig {
        &self.config
    }

    /// Applies flip, brightness, contrast and saturation in that order.
    pub fn apply<R: Rng>(
        &self,
        pixels: &mut [f32],
        width: usize,
        height: usize,
        rng: &mut R,
    ) {
        debug_assert_eq!(pixels.len(), width * height * 3);

        if rng.gen::<f32>() < self.config.horizontal_flip_prob {
            flip_horizontal(pixels, width, height);
        }

        let delta = self.config.max_brightness_delta;
        if delta > 0.0 {
            adjust_brightness(pixels, rng.gen_range(-delta..=delta));
        }

        adjust_contrast(pixels, sample_factor(self.config.contrast_range, rng));
        adjust_saturation(pixels, sample_factor(self.config.saturation_range, rng));

        for v in pixels.iter_mut() {
            *v = v.clamp(0.0, 1.0);
        }
    }
}

fn sample_factor<R: Rng>((lo, hi): (f32, f32), rng: &mut R) -> f32 {
    if lo < hi {
        rng.gen_range(lo..=hi)
    } else {
        lo
    }
}

/// Mirrors each row in place.
pub fn flip_horizontal(pixels: &mut [f32], width: usize, height: usize) {
    for y in 0..height {
        let row = &mut pixels[y * width * 3..(y + 1) * width * 3];
        for x in 0..width / 2 {
            let mirror = width - 1 - x;
            for c in 0..3 {
                row.swap(x * 3 + c, mirror * 3 + c);
            }
        }
    }
}

pub fn adjust_brightness(pixels: &mut [f32], delta: f32) {
    for v in pixels.iter_mut() {
        *v += delta;
    }
}

/// Scales each channel's deviation from its mean.
pub fn adjust_contrast(pixels: &mut [f32], factor: f32) {
    if factor == 1.0 || pixels.is_empty() {
        return;
    }
    let count = (pixels.len() / 3) as f32;
    let mut mean = [0.0f32; 3];
    for px in pixels.chunks_exact(3) {
        for c in 0..3 {
            mean[c] += px[c];
        }
    }
    for m in mean.iter_mut() {
        *m /= count;
    }

    for px in pixels.chunks_exact_mut(3) {
        for c in 0..3 {
            px[c] = (px[c] - mean[c]) * factor + mean[c];
        }
    }
}

/// Blends each pixel with its luminance.
pub fn adjust_saturation(pixels: &mut [f32], factor: f32) {
    if factor == 1.0 {
        return;
    }
    for px in pixels.chunks_exact_mut(3) {
        let gray = 0.299 * px[0] + 0.587 * px[1] + 0.114 * px[2];
        for c in 0..3 {
            px[c] = gray + (px[c] - gray) * factor;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_flip_horizontal() {
        // 3x1 image: red, green, blue
        let mut pixels = vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];
        flip_horizontal(&mut pixels, 3, 1);
        assert_eq!(pixels, vec![0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_contrast_keeps_channel_mean() {
        let mut pixels = vec![0.2, 0.4, 0.6, 0.4, 0.6, 0.8];
        adjust_contrast(&mut pixels, 1.2);
        assert!(((pixels[0] + pixels[3]) / 2.0 - 0.3).abs() < 1e-6);
        assert!((pixels[0] - 0.18).abs() < 1e-6);
        assert!((pixels[3] - 0.42).abs() < 1e-6);
    }

    #[test]
    fn test_saturation_leaves_gray_untouched() {
        let mut pixels = vec![0.5, 0.5, 0.5];
        adjust_saturation(&mut pixels, 0.8);
        for v in pixels {
            assert!((v - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn test_apply_stays_in_range() {
        let augmenter = Augmenter::new(AugmentationConfig::default());
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        for _ in 0..20 {
            let mut pixels: Vec<f32> = (0..4 * 4 * 3).map(|i| (i % 11) as f32 / 10.0).collect();
            augmenter.apply(&mut pixels, 4, 4, &mut rng);
            assert!(pixels.iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }

    #[test]
    fn test_apply_is_seeded() {
        let augmenter = Augmenter::new(AugmentationConfig::default());
        let original: Vec<f32> = (0..8 * 8 * 3).map(|i| (i % 17) as f32 / 17.0).collect();

        let mut a = original.clone();
        let mut b = original.clone();
        augmenter.apply(&mut a, 8, 8, &mut ChaCha8Rng::seed_from_u64(9));
        augmenter.apply(&mut b, 8, 8, &mut ChaCha8Rng::seed_from_u64(9));
        assert_eq!(a, b);
        assert_ne!(a, original);
    }
}
