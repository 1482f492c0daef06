use serde::{Deserialize, Serialize};
use std::fmt;

use crate::nutrition::NutritionTable;

/// Per-sitting ceilings. A total equal to its limit is still safe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeLimits {
    pub calories: f64,
    pub sugar_g: f64,
}

impl Default for IntakeLimits {
    fn default() -> Self {
        Self { calories: 600.0, sugar_g: 25.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntakeStatus {
    Safe,
    CaloriesExceeded,
    SugarExceeded,
    BothExceeded,
}

impl IntakeStatus {
    /// Classify totals against limits. Both over wins, then calories, then sugar.
    pub fn classify(total_calories: f64, total_sugar: f64, limits: &IntakeLimits) -> Self {
        let calories_over = total_calories > limits.calories;
        let sugar_over = total_sugar > limits.sugar_g;
        match (calories_over, sugar_over) {
            (true, true) => IntakeStatus::BothExceeded,
            (true, false) => IntakeStatus::CaloriesExceeded,
            (false, true) => IntakeStatus::SugarExceeded,
            (false, false) => IntakeStatus::Safe,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IntakeStatus::Safe => "SAFE",
            IntakeStatus::CaloriesExceeded => "CALORIES EXCEEDED",
            IntakeStatus::SugarExceeded => "SUGAR EXCEEDED",
            IntakeStatus::BothExceeded => "CALORIES & SUGAR EXCEEDED",
        }
    }

    pub fn is_safe(&self) -> bool {
        matches!(self, IntakeStatus::Safe)
    }
}

impl fmt::Display for IntakeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything derived from one frame's retained detections.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameAssessment {
    pub labels: Vec<String>,
    pub total_calories: f64,
    pub total_sugar: f64,
    pub status: IntakeStatus,
    pub calorie_burn_minutes: f64,
    pub sugar_burn_minutes: f64,
    /// One entry per label occurrence that had no nutrition entry.
    pub unmatched: Vec<String>,
}

impl FrameAssessment {
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Aggregated intake before burn-time estimation.
#[derive(Debug, Clone, PartialEq)]
pub struct IntakeSummary {
    pub total_calories: f64,
    pub total_sugar: f64,
    pub status: IntakeStatus,
    pub unmatched: Vec<String>,
}

/// Sum nutrition over `labels` and classify the totals.
///
/// Labels missing from the table add nothing and are reported once per occurrence.
pub fn evaluate<S: AsRef<str>>(
    labels: &[S],
    table: &NutritionTable,
    limits: &IntakeLimits,
) -> IntakeSummary {
    let mut total_calories = 0.0;
    let mut total_sugar = 0.0;
    let mut unmatched = Vec::new();

    for label in labels {
        let label = label.as_ref();
        match table.get(label) {
            Some(entry) => {
                total_calories += entry.calories;
                total_sugar += entry.sugar_g;
            }
            None => {
                log::warn!("'{}' not found in nutrition table", label);
                unmatched.push(label.to_string());
            }
        }
    }

    IntakeSummary {
        total_calories,
        total_sugar,
        status: IntakeStatus::classify(total_calories, total_sugar, limits),
        unmatched,
    }
}
