//! Image decoding, resizing and normalization.

use std::path::Path;

use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView};
use nutrition_core::{Error, ImageDimensions, Result};

/// Image handed to the pipeline, either still encoded or already decoded.
///
/// Resolved once with [`ImageInput::decode`]; everything downstream works
/// on a [`DynamicImage`].
#[derive(Debug, Clone)]
pub enum ImageInput {
    RawBytes(Vec<u8>),
    Decoded(DynamicImage),
}

impl ImageInput {
    pub fn decode(self) -> Result<DynamicImage> {
        let image = match self {
            ImageInput::RawBytes(bytes) => {
                if bytes.is_empty() {
                    return Err(Error::InvalidImage("empty image payload".to_string()));
                }
                image::load_from_memory(&bytes)?
            }
            ImageInput::Decoded(image) => image,
        };

        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(Error::InvalidImage(format!(
                "image has zero size ({width}x{height})"
            )));
        }
        Ok(image)
    }
}

impl From<Vec<u8>> for ImageInput {
    fn from(bytes: Vec<u8>) -> Self {
        ImageInput::RawBytes(bytes)
    }
}

impl From<DynamicImage> for ImageInput {
    fn from(image: DynamicImage) -> Self {
        ImageInput::Decoded(image)
    }
}

/// Resizes to the model resolution and scales intensities to `[0, 1]`.
#[derive(Debug, Clone, Copy)]
pub struct ImagePreprocessor {
    dims: ImageDimensions,
}

impl ImagePreprocessor {
    pub fn new(dims: ImageDimensions) -> Self {
        Self { dims }
    }

    pub fn dims(&self) -> ImageDimensions {
        self.dims
    }

    /// Reads and decodes an image file.
    pub fn open(&self, path: &Path) -> Result<DynamicImage> {
        let bytes = std::fs::read(path)?;
        ImageInput::RawBytes(bytes)
            .decode()
            .map_err(|e| Error::InvalidImage(format!("{}: {e}", path.display())))
    }

    /// HWC `f32` buffer of `width * height * 3` values in `[0, 1]`.
    pub fn preprocess(&self, image: &DynamicImage) -> Vec<f32> {
        let rgb = image.to_rgb8();
        let (width, height) = (self.dims.width, self.dims.height);

        let resized = if rgb.dimensions() == (width, height) {
            rgb
        } else {
            imageops::resize(&rgb, width, height, FilterType::Triangle)
        };

        resized
            .into_raw()
            .into_iter()
            .map(|v| v as f32 / 255.0)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn gradient(width: u32, height: u32) -> RgbImage {
        ImageBuffer::from_fn(width, height, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 5 % 256) as u8, ((x + y) % 256) as u8])
        })
    }

    fn png_bytes(image: &RgbImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image.clone())
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_preprocess_shape_and_range() {
        let preprocessor = ImagePreprocessor::new(ImageDimensions::default());
        let pixels = preprocessor.preprocess(&DynamicImage::ImageRgb8(gradient(300, 180)));

        assert_eq!(pixels.len(), 224 * 224 * 3);
        assert!(pixels.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_preprocess_divides_by_255() {
        let preprocessor = ImagePreprocessor::new(ImageDimensions::square_rgb(2));
        let image = ImageBuffer::from_fn(2, 2, |_, _| Rgb([255u8, 0, 51]));
        let pixels = preprocessor.preprocess(&DynamicImage::ImageRgb8(image));

        assert_eq!(&pixels[..3], &[1.0, 0.0, 0.2]);
    }

    #[test]
    fn test_decode_raw_bytes() {
        let image = gradient(16, 8);
        let decoded = ImageInput::from(png_bytes(&image)).decode().unwrap();
        assert_eq!(decoded.dimensions(), (16, 8));
        assert_eq!(decoded.to_rgb8(), image);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            ImageInput::RawBytes(vec![1, 2, 3, 4]).decode(),
            Err(Error::InvalidImage(_))
        ));
        assert!(matches!(
            ImageInput::RawBytes(Vec::new()).decode(),
            Err(Error::InvalidImage(_))
        ));
    }
}
