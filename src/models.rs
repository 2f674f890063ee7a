use std::fmt;

use serde::{Deserialize, Serialize};

/// Sensor categories used in topic paths and payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorType {
    Temperature,
    Fan,
    Liquid,
    Power,
    Other,
}

impl SensorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorType::Temperature => "temperature",
            SensorType::Fan => "fan",
            SensorType::Liquid => "liquid",
            SensorType::Power => "power",
            SensorType::Other => "other",
        }
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One (label, value, unit) triplet extracted from the tool output.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    /// Normalized name of the device section this reading was found under.
    /// Empty when the output carried no device header.
    pub device_name: String,
    pub sensor_type: SensorType,
    pub sensor_name: String,
    pub original_key: String,
    pub value: f64,
    pub unit: Option<String>,
}

/// One keyword rule of the classification table.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassificationRule {
    pub keywords: Vec<String>,
    pub sensor_type: SensorType,
}

impl ClassificationRule {
    fn matches(&self, text: &str) -> bool {
        self.keywords
            .iter()
            .any(|keyword| text.contains(keyword.to_lowercase().as_str()))
    }
}

/// Built-in classification table; first match wins.
pub fn default_classification() -> Vec<ClassificationRule> {
    let rule = |keywords: &[&str], sensor_type| ClassificationRule {
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        sensor_type,
    };
    vec![
        rule(&["temp", "°c"], SensorType::Temperature),
        rule(&["fan", "pump"], SensorType::Fan),
        rule(&["power"], SensorType::Power),
        rule(&["liquid"], SensorType::Liquid),
    ]
}

/// Classify a reading by matching its label and unit against the table.
/// Matching is a case-insensitive substring check; unmatched text is `Other`.
pub fn classify(label: &str, unit: Option<&str>, rules: &[ClassificationRule]) -> SensorType {
    let mut text = label.to_lowercase();
    if let Some(unit) = unit {
        text.push(' ');
        text.push_str(&unit.to_lowercase());
    }
    rules
        .iter()
        .find(|rule| rule.matches(&text))
        .map(|rule| rule.sensor_type)
        .unwrap_or(SensorType::Other)
}

/// Lowercase a raw label and collapse whitespace runs into underscores.
pub fn normalize_name(raw: &str) -> String {
    raw.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}
