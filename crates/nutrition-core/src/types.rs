//! Core type definitions.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Number of regression targets produced by the nutrition head.
pub const NUTRITION_DIMS: usize = 7;

/// Catalog field names in output order.
pub const NUTRIENT_FIELDS: [&str; NUTRITION_DIMS] = [
    "calories", "protein", "fat", "carbs", "fiber", "sugars", "sodium",
];

/// Nutrition values for one serving of a food class.
///
/// Units are fixed: kcal, g, g, g, g, g, mg.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct NutritionVector {
    pub calories: f32,
    pub protein: f32,
    pub fat: f32,
    pub carbs: f32,
    pub fiber: f32,
    pub sugars: f32,
    pub sodium: f32,
}

impl NutritionVector {
    /// Values in the fixed field order.
    pub fn to_array(&self) -> [f32; NUTRITION_DIMS] {
        [
            self.calories,
            self.protein,
            self.fat,
            self.carbs,
            self.fiber,
            self.sugars,
            self.sodium,
        ]
    }

    pub fn from_array(values: [f32; NUTRITION_DIMS]) -> Self {
        let [calories, protein, fat, carbs, fiber, sugars, sodium] = values;
        Self {
            calories,
            protein,
            fat,
            carbs,
            fiber,
            sugars,
            sodium,
        }
    }

    /// Builds a vector from a slice, returning `None` unless it holds
    /// exactly seven values.
    pub fn from_slice(values: &[f32]) -> Option<Self> {
        let array: [f32; NUTRITION_DIMS] = values.try_into().ok()?;
        Some(Self::from_array(array))
    }

    /// Multiplies every value by `factor` (portion scaling).
    pub fn scaled(&self, factor: f32) -> Self {
        Self::from_array(self.to_array().map(|v| v * factor))
    }
}

/// Image dimensions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageDimensions {
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Number of channels (3 for RGB)
    pub channels: u32,
}

impl ImageDimensions {
    pub fn new(width: u32, height: u32, channels: u32) -> Self {
        Self {
            width,
            height,
            channels,
        }
    }

    /// Square RGB input used by the model (224x224x3)
    pub fn square_rgb(size: u32) -> Self {
        Self::new(size, size, 3)
    }

    /// Number of values in one HWC image buffer
    pub fn total_values(&self) -> usize {
        (self.width * self.height * self.channels) as usize
    }

    /// The network takes square, non-empty RGB images.
    pub fn validate_model_input(&self) -> Result<()> {
        if self.width == 0 || self.width != self.height {
            return Err(Error::Config(format!(
                "image_size must be square and non-empty, got {}x{}",
                self.width, self.height
            )));
        }
        if self.channels != 3 {
            return Err(Error::Config(format!(
                "images must have 3 channels, got {}",
                self.channels
            )));
        }
        Ok(())
    }

    /// Shape as `[height, width, channels]`
    pub fn hwc(&self) -> [usize; 3] {
        [
            self.height as usize,
            self.width as usize,
            self.channels as usize,
        ]
    }
}

impl Default for ImageDimensions {
    fn default() -> Self {
        Self::square_rgb(224)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nutrition_vector_order() {
        let v = NutritionVector {
            calories: 266.0,
            protein: 11.0,
            fat: 10.0,
            carbs: 33.0,
            fiber: 2.3,
            sugars: 3.6,
            sodium: 598.0,
        };
        assert_eq!(v.to_array(), [266.0, 11.0, 10.0, 33.0, 2.3, 3.6, 598.0]);
        assert_eq!(NutritionVector::from_array(v.to_array()), v);
    }

    #[test]
    fn test_from_slice_requires_seven_values() {
        assert!(NutritionVector::from_slice(&[1.0; 6]).is_none());
        assert!(NutritionVector::from_slice(&[1.0; 8]).is_none());
        let v = NutritionVector::from_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]).unwrap();
        assert_eq!(v.sodium, 7.0);
    }

    #[test]
    fn test_scaled() {
        let v = NutritionVector::from_array([100.0, 10.0, 5.0, 20.0, 2.0, 1.0, 300.0]);
        let large = v.scaled(1.5);
        assert_eq!(large.calories, 150.0);
        assert_eq!(large.sodium, 450.0);
    }

    #[test]
    fn test_image_dimensions() {
        let dims = ImageDimensions::default();
        assert_eq!(dims.hwc(), [224, 224, 3]);
        assert_eq!(dims.total_values(), 224 * 224 * 3);
        assert!(dims.validate_model_input().is_ok());
    }

    #[test]
    fn test_model_input_must_be_square_rgb() {
        assert!(ImageDimensions::new(224, 160, 3).validate_model_input().is_err());
        assert!(ImageDimensions::new(0, 0, 3).validate_model_input().is_err());
        assert!(ImageDimensions::new(64, 64, 1).validate_model_input().is_err());
    }
}
