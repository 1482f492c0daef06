use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::{NutriError, Result};

/// Per-item nutrition values for one packaged food.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NutritionEntry {
    pub calories: f64,
    pub sugar_g: f64,
}

impl NutritionEntry {
    pub fn new(calories: f64, sugar_g: f64) -> Self {
        Self { calories, sugar_g }
    }
}

// Accept both `[kcal, sugar]` pairs and `{ "calories": .., "sugar_g": .. }` objects.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawEntry {
    Pair(f64, f64),
    Named { calories: f64, sugar_g: f64 },
}

impl<'de> Deserialize<'de> for NutritionEntry {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Ok(match RawEntry::deserialize(deserializer)? {
            RawEntry::Pair(calories, sugar_g) => NutritionEntry { calories, sugar_g },
            RawEntry::Named { calories, sugar_g } => NutritionEntry { calories, sugar_g },
        })
    }
}

/// Label -> nutrition mapping, immutable once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct NutritionTable {
    entries: HashMap<String, NutritionEntry>,
}

impl NutritionTable {
    /// Build a table, rejecting negative or non-finite values.
    pub fn new(entries: HashMap<String, NutritionEntry>) -> Result<Self> {
        for (label, entry) in &entries {
            let valid = |v: f64| v.is_finite() && v >= 0.0;
            if !valid(entry.calories) || !valid(entry.sugar_g) {
                return Err(NutriError::InvalidNutrition(format!(
                    "'{}' has invalid values ({} kcal, {} g sugar)",
                    label, entry.calories, entry.sugar_g
                )));
            }
        }
        Ok(Self { entries })
    }

    /// Load from a JSON object keyed by label.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = fs::read_to_string(path.as_ref())?;
        Self::from_json(&data)
    }

    pub fn from_json(data: &str) -> Result<Self> {
        let entries: HashMap<String, NutritionEntry> = serde_json::from_str(data)
            .map_err(|e| NutriError::InvalidNutrition(e.to_string()))?;
        Self::new(entries)
    }

    pub fn get(&self, label: &str) -> Option<&NutritionEntry> {
        self.entries.get(label)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Labels in alphabetical order.
    pub fn labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self.entries.keys().cloned().collect();
        labels.sort();
        labels
    }
}

const DEFAULT_ENTRIES: &[(&str, f64, f64)] = &[
    ("Dairy Milk Hazelnut", 83.0, 7.4),
    ("Maggi Sup Ayam", 254.0, 2.2),
    ("Milo Nuggets", 74.0, 6.8),
    ("Mister Potato Crips Original", 139.0, 0.3),
    ("Pocky Double Choco", 77.0, 13.0),
    ("Samyang Spicy Noodle", 425.0, 6.0),
    ("Tiger Susu Biscuits", 157.0, 7.3),
    ("Tropicana Twister Orange Juice", 64.0, 14.5),
    ("Twiggies Cream Dream Vanila Bread", 150.0, 10.9),
    ("Wonda Latte Milk Coffee Drink", 86.0, 10.3),
];

impl Default for NutritionTable {
    fn default() -> Self {
        let entries = DEFAULT_ENTRIES
            .iter()
            .map(|&(label, kcal, sugar)| (label.to_string(), NutritionEntry::new(kcal, sugar)))
            .collect();
        Self { entries }
    }
}
