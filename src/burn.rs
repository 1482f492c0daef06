use serde::{Deserialize, Serialize};

/// Fixed exercise rates used to turn intake into minutes of activity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BurnRates {
    pub kcal_per_minute: f64,
    pub kcal_per_sugar_gram: f64,
}

impl Default for BurnRates {
    fn default() -> Self {
        Self {
            kcal_per_minute: 10.0,
            kcal_per_sugar_gram: 4.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BurnTime {
    pub calorie_minutes: f64,
    pub sugar_minutes: f64,
}

impl BurnRates {
    pub fn estimate(&self, total_calories: f64, total_sugar: f64) -> BurnTime {
        BurnTime {
            calorie_minutes: total_calories / self.kcal_per_minute,
            sugar_minutes: total_sugar * self.kcal_per_sugar_gram / self.kcal_per_minute,
        }
    }
}
