//! Turns one `(class_probs[K], nutrition[7])` pair into a
//! [`PredictionResult`].

use std::cmp::Ordering;

use nutrition_core::{Error, NutritionCatalog, Result, NUTRIENT_FIELDS, NUTRITION_DIMS};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Number of ranked classes in a prediction
pub const TOP_K: usize = 5;

/// One ranked class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodPrediction {
    pub name: String,
    pub class_id: usize,
    /// Probability in `[0, 1]`
    pub confidence: f32,
}

/// Nutrition values rounded to one decimal, in kcal, g and mg
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NutritionBreakdown {
    pub calories: f32,
    pub protein_g: f32,
    pub fat_g: f32,
    pub carbs_g: f32,
    pub fiber_g: f32,
    pub sugars_g: f32,
    pub sodium_mg: f32,
}

fn round1(value: f32) -> f32 {
    (value * 10.0).round() / 10.0
}

impl NutritionBreakdown {
    pub fn from_values(values: &[f32; NUTRITION_DIMS]) -> Self {
        Self {
            calories: round1(values[0]),
            protein_g: round1(values[1]),
            fat_g: round1(values[2]),
            carbs_g: round1(values[3]),
            fiber_g: round1(values[4]),
            sugars_g: round1(values[5]),
            sodium_mg: round1(values[6]),
        }
    }

    pub fn to_array(&self) -> [f32; NUTRITION_DIMS] {
        [
            self.calories,
            self.protein_g,
            self.fat_g,
            self.carbs_g,
            self.fiber_g,
            self.sugars_g,
            self.sodium_mg,
        ]
    }

    /// Every value multiplied by `factor`, rounded again.
    pub fn scaled(&self, factor: f32) -> Self {
        Self::from_values(&self.to_array().map(|v| v * factor))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub detected_food: FoodPrediction,
    pub top5: Vec<FoodPrediction>,
    pub nutrition: NutritionBreakdown,
    /// Nutrients the model predicted as negative; values are left as is
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nutrition_flags: Vec<String>,
    #[serde(default)]
    pub inference_time_ms: f64,
}

/// Descending by probability; NaN sorts after every number.
fn by_probability(a: f32, b: f32) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}

/// Indices of the `k` most probable classes, most probable first. Ties go
/// to the lower index; at most `probs.len()` indices are returned.
pub fn rank_top_k(probs: &[f32], k: usize) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..probs.len()).collect();
    indices.sort_by(|&a, &b| by_probability(probs[a], probs[b]).then(a.cmp(&b)));
    indices.truncate(k.min(probs.len()));
    indices
}

/// Names of the nutrients with a negative predicted value.
pub fn negative_nutrients(values: &[f32; NUTRITION_DIMS]) -> Vec<String> {
    NUTRIENT_FIELDS
        .iter()
        .zip(values)
        .filter(|(_, &v)| v < 0.0)
        .map(|(name, _)| name.to_string())
        .collect()
}

pub fn build_prediction(
    probs: &[f32],
    nutrition: &[f32],
    catalog: &NutritionCatalog,
) -> Result<PredictionResult> {
    if probs.len() != catalog.len() {
        return Err(Error::ShapeMismatch {
            what: "class probabilities".to_string(),
            expected: vec![catalog.len()],
            actual: vec![probs.len()],
        });
    }
    let nutrition: &[f32; NUTRITION_DIMS] =
        nutrition.try_into().map_err(|_| Error::ShapeMismatch {
            what: "nutrition values".to_string(),
            expected: vec![NUTRITION_DIMS],
            actual: vec![nutrition.len()],
        })?;

    let top5 = rank_top_k(probs, TOP_K)
        .into_iter()
        .map(|class_id| {
            let name = catalog
                .class_name(class_id)
                .ok_or_else(|| Error::CatalogMismatch(format!("no class with index {class_id}")))?;
            let p = probs[class_id];
            Ok(FoodPrediction {
                name: name.to_string(),
                class_id,
                confidence: if p.is_nan() { 0.0 } else { p.clamp(0.0, 1.0) },
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let detected_food = top5
        .first()
        .cloned()
        .ok_or_else(|| Error::Model("empty class distribution".to_string()))?;

    let nutrition_flags = negative_nutrients(nutrition);
    if !nutrition_flags.is_empty() {
        warn!(
            "Negative nutrition predicted for {}: {:?}",
            detected_food.name, nutrition_flags
        );
    }

    Ok(PredictionResult {
        detected_food,
        top5,
        nutrition: NutritionBreakdown::from_values(nutrition),
        nutrition_flags,
        inference_time_ms: 0.0,
    })
}
