//! Simulation parameter schema
//!
//! The schema is closed: every field of [`SimulationConfig`] is destructured in
//! [`SimulationConfig::parameters`], so adding a field without deciding how it
//! diffs and fingerprints fails to compile.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{Result, SimError};

/// What the tariff scenario is expressed in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TariffMeasure {
    /// Ad-valorem tariff rate in percent (e.g. 3.5 for 3.5%)
    Rate { tariff_rate: f64 },
    /// Harmonized System product code; the rate is looked up per chapter
    ProductCode { product_code: String },
}

impl TariffMeasure {
    /// Schema discriminator, used to decide whether two runs are comparable
    pub fn kind(&self) -> &'static str {
        match self {
            TariffMeasure::Rate { .. } => "rate",
            TariffMeasure::ProductCode { .. } => "product_code",
        }
    }
}

/// Parameters of one tariff-impact simulation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Importing country
    pub country: String,
    /// Projection horizon in months
    pub time_horizon_months: u32,
    #[serde(flatten)]
    pub measure: TariffMeasure,
    /// Affected product categories (set semantics)
    #[serde(default)]
    pub product_categories: Vec<String>,
    /// Scenario modifiers such as "retaliation" (set semantics)
    #[serde(default)]
    pub scenario_tags: Vec<String>,
    /// Confidence level for the reported interval, in (0, 1)
    pub confidence_level: f64,
}

/// A single parameter value, as seen by diffing and comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Number(f64),
    Text(String),
    Set(Vec<String>),
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::Number(n) => write!(f, "{}", n),
            ParamValue::Text(s) => write!(f, "{}", s),
            ParamValue::Set(items) => write!(f, "[{}]", items.join(", ")),
        }
    }
}

/// Sort, deduplicate, and normalise a set-valued field
pub fn canonical_set(items: &[String]) -> Vec<String> {
    let mut out: Vec<String> = items
        .iter()
        .map(|s| canonical_text(s))
        .filter(|s| !s.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

/// Trim and lowercase a free-text field
pub fn canonical_text(s: &str) -> String {
    s.trim().to_lowercase()
}

impl SimulationConfig {
    /// Rate-based config with no categories or tags
    pub fn with_rate(country: &str, tariff_rate: f64) -> Self {
        Self {
            country: country.to_string(),
            time_horizon_months: 12,
            measure: TariffMeasure::Rate { tariff_rate },
            product_categories: Vec::new(),
            scenario_tags: Vec::new(),
            confidence_level: 0.95,
        }
    }

    /// Reject configurations that cannot be fingerprinted or simulated
    pub fn validate(&self) -> Result<()> {
        if canonical_text(&self.country).is_empty() {
            return Err(SimError::Config("country must not be empty".into()));
        }
        if self.time_horizon_months == 0 {
            return Err(SimError::Config("time horizon must be at least one month".into()));
        }
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return Err(SimError::Config(format!(
                "confidence level must be in (0, 1), got {}",
                self.confidence_level
            )));
        }
        match &self.measure {
            TariffMeasure::Rate { tariff_rate } => {
                if !tariff_rate.is_finite() || *tariff_rate < 0.0 {
                    return Err(SimError::Config(format!(
                        "tariff rate must be a non-negative number, got {}",
                        tariff_rate
                    )));
                }
            }
            TariffMeasure::ProductCode { product_code } => {
                if product_code.trim().is_empty() {
                    return Err(SimError::Config("product code must not be empty".into()));
                }
            }
        }
        Ok(())
    }

    /// Flatten into named parameters, canonicalised the same way as the cache
    /// key so diffing and comparison agree with fingerprint equivalence
    pub fn parameters(&self) -> BTreeMap<&'static str, ParamValue> {
        let SimulationConfig {
            country,
            time_horizon_months,
            measure,
            product_categories,
            scenario_tags,
            confidence_level,
        } = self;

        let mut params = BTreeMap::new();
        params.insert("country", ParamValue::Text(canonical_text(country)));
        params.insert(
            "time_horizon_months",
            ParamValue::Number(f64::from(*time_horizon_months)),
        );
        match measure {
            TariffMeasure::Rate { tariff_rate } => {
                params.insert("tariff_rate", ParamValue::Number(*tariff_rate));
            }
            TariffMeasure::ProductCode { product_code } => {
                params.insert("product_code", ParamValue::Text(canonical_text(product_code)));
            }
        }
        params.insert(
            "product_categories",
            ParamValue::Set(canonical_set(product_categories)),
        );
        params.insert("scenario_tags", ParamValue::Set(canonical_set(scenario_tags)));
        params.insert("confidence_level", ParamValue::Number(*confidence_level));
        params
    }

    /// Whether two configs describe the same simulation. Invalid configs are
    /// never equivalent to anything.
    pub fn is_equivalent(&self, other: &SimulationConfig) -> bool {
        use crate::cache::SimulationParameterKey;
        match (
            SimulationParameterKey::from_config(self),
            SimulationParameterKey::from_config(other),
        ) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}
