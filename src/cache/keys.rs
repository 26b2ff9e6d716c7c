//! Simulation cache keys
//!
//! A [`SimulationParameterKey`] is the canonical form of a valid
//! [`SimulationConfig`]: free text trimmed and lowercased, set-valued fields
//! sorted and deduplicated, `-0.0` folded into `0.0`. The fingerprint is the
//! SHA-256 of a length-prefixed binary encoding of the key, with floats hashed
//! by their bit pattern, so construction order of any field never changes it.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::simulation::{canonical_set, canonical_text, SimulationConfig, TariffMeasure};
use crate::types::Result;

/// Bumped whenever the cached result format changes
pub const CACHE_FORMAT_VERSION: &str = "tariff-sim/v2";

/// Canonical measure component of a key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MeasureKey {
    Rate { tariff_rate: f64 },
    ProductCode { product_code: String },
}

/// Canonical, order-independent cache key for a simulation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationParameterKey {
    pub version: String,
    pub country: String,
    pub time_horizon_months: u32,
    pub measure: MeasureKey,
    pub product_categories: Vec<String>,
    pub scenario_tags: Vec<String>,
    pub confidence_level: f64,
}

/// Canonical country name, also the cache partition tag
pub fn canonical_country(country: &str) -> String {
    canonical_text(country)
}

fn canonical_f64(v: f64) -> f64 {
    if v == 0.0 {
        0.0
    } else {
        v
    }
}

fn hash_str(hasher: &mut Sha256, s: &str) {
    hasher.update((s.len() as u64).to_be_bytes());
    hasher.update(s.as_bytes());
}

fn hash_set(hasher: &mut Sha256, items: &[String]) {
    hasher.update((items.len() as u64).to_be_bytes());
    for item in items {
        hash_str(hasher, item);
    }
}

impl SimulationParameterKey {
    /// Build the canonical key for a config.
    ///
    /// Fails with `Config` for anything `SimulationConfig::validate` rejects,
    /// so every key holds finite floats and compares reflexively.
    pub fn from_config(config: &SimulationConfig) -> Result<Self> {
        config.validate()?;

        let measure = match &config.measure {
            TariffMeasure::Rate { tariff_rate } => MeasureKey::Rate {
                tariff_rate: canonical_f64(*tariff_rate),
            },
            TariffMeasure::ProductCode { product_code } => MeasureKey::ProductCode {
                product_code: canonical_text(product_code),
            },
        };

        Ok(Self {
            version: CACHE_FORMAT_VERSION.to_string(),
            country: canonical_country(&config.country),
            time_horizon_months: config.time_horizon_months,
            measure,
            product_categories: canonical_set(&config.product_categories),
            scenario_tags: canonical_set(&config.scenario_tags),
            confidence_level: canonical_f64(config.confidence_level),
        })
    }

    /// Fixed-length hex digest of the canonical key (64 chars)
    pub fn fingerprint(&self) -> String {
        let SimulationParameterKey {
            version,
            country,
            time_horizon_months,
            measure,
            product_categories,
            scenario_tags,
            confidence_level,
        } = self;

        let mut hasher = Sha256::new();
        hash_str(&mut hasher, version);
        hash_str(&mut hasher, country);
        hasher.update(time_horizon_months.to_be_bytes());
        match measure {
            MeasureKey::Rate { tariff_rate } => {
                hasher.update([0u8]);
                hasher.update(tariff_rate.to_bits().to_be_bytes());
            }
            MeasureKey::ProductCode { product_code } => {
                hasher.update([1u8]);
                hash_str(&mut hasher, product_code);
            }
        }
        hash_set(&mut hasher, product_categories);
        hash_set(&mut hasher, scenario_tags);
        hasher.update(confidence_level.to_bits().to_be_bytes());
        hex::encode(hasher.finalize())
    }

    /// Partition tag: all entries for one country share a partition
    pub fn partition(&self) -> &str {
        &self.country
    }
}

impl fmt::Display for SimulationParameterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let measure = match &self.measure {
            MeasureKey::Rate { tariff_rate } => format!("rate={}", tariff_rate),
            MeasureKey::ProductCode { product_code } => format!("hs={}", product_code),
        };
        write!(
            f,
            "{}/{}m/{}/cl={}",
            self.country, self.time_horizon_months, measure, self.confidence_level
        )
    }
}

/// Fingerprint a config directly
pub fn fingerprint(config: &SimulationConfig) -> Result<String> {
    Ok(SimulationParameterKey::from_config(config)?.fingerprint())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> SimulationConfig {
        let mut config = SimulationConfig::with_rate("Vietnam", 3.5);
        config.product_categories = vec!["electronics".into(), "textiles".into(), "footwear".into()];
        config.scenario_tags = vec!["baseline".into(), "retaliation".into()];
        config
    }

    #[test]
    fn test_fingerprint_deterministic() {
        assert_eq!(fingerprint(&base()).unwrap(), fingerprint(&base()).unwrap());
        assert_eq!(fingerprint(&base()).unwrap().len(), 64);
    }

    #[test]
    fn test_reordered_sets_fingerprint_identically() {
        let mut reordered = base();
        reordered.product_categories = vec!["footwear".into(), "Textiles".into(), "electronics".into(), "textiles".into()];
        reordered.scenario_tags = vec!["retaliation".into(), "baseline".into()];
        assert_eq!(fingerprint(&base()).unwrap(), fingerprint(&reordered).unwrap());
    }

    #[test]
    fn test_country_case_and_whitespace_ignored() {
        let mut other = base();
        other.country = "  VIETNAM ".into();
        assert_eq!(fingerprint(&base()).unwrap(), fingerprint(&other).unwrap());
    }

    #[test]
    fn test_distinct_fields_distinct_fingerprints() {
        let original = fingerprint(&base()).unwrap();

        let mut rate = base();
        rate.measure = TariffMeasure::Rate { tariff_rate: 5.0 };
        assert_ne!(original, fingerprint(&rate).unwrap());

        let mut horizon = base();
        horizon.time_horizon_months = 24;
        assert_ne!(original, fingerprint(&horizon).unwrap());

        let mut confidence = base();
        confidence.confidence_level = 0.9;
        assert_ne!(original, fingerprint(&confidence).unwrap());

        let mut tags = base();
        tags.scenario_tags.push("escalation".into());
        assert_ne!(original, fingerprint(&tags).unwrap());

        let mut country = base();
        country.country = "Thailand".into();
        assert_ne!(original, fingerprint(&country).unwrap());
    }

    #[test]
    fn test_rate_and_product_code_never_collide() {
        let mut code = base();
        code.measure = TariffMeasure::ProductCode { product_code: "3.5".into() };
        assert_ne!(fingerprint(&base()).unwrap(), fingerprint(&code).unwrap());
    }

    #[test]
    fn test_negative_zero_folds() {
        let mut a = base();
        a.measure = TariffMeasure::Rate { tariff_rate: 0.0 };
        let mut b = base();
        b.measure = TariffMeasure::Rate { tariff_rate: -0.0 };
        assert_eq!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());
    }

    #[test]
    fn test_partition_is_canonical_country() {
        let key = SimulationParameterKey::from_config(&base()).unwrap();
        assert_eq!(key.partition(), "vietnam");
        assert!(key.to_string().starts_with("vietnam/12m/rate=3.5"));
    }

    #[test]
    fn test_invalid_configs_have_no_key() {
        let mut nan = base();
        nan.confidence_level = f64::NAN;
        assert!(SimulationParameterKey::from_config(&nan).is_err());

        let mut inf = base();
        inf.measure = TariffMeasure::Rate { tariff_rate: f64::INFINITY };
        assert!(fingerprint(&inf).is_err());

        let mut empty = base();
        empty.country = "  ".into();
        assert!(fingerprint(&empty).is_err());
    }

    #[test]
    fn test_nearby_floats_fingerprint_apart() {
        let mut a = base();
        a.measure = TariffMeasure::Rate { tariff_rate: 0.1 + 0.2 };
        let mut b = base();
        b.measure = TariffMeasure::Rate { tariff_rate: 0.3 };
        assert_ne!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());
    }

    #[test]
    fn test_set_boundaries_are_unambiguous() {
        let mut joined = base();
        joined.product_categories = vec!["ab".into()];
        joined.scenario_tags = vec![];
        let mut split = base();
        split.product_categories = vec!["a".into(), "b".into()];
        split.scenario_tags = vec![];
        assert_ne!(fingerprint(&joined).unwrap(), fingerprint(&split).unwrap());
    }

    #[test]
    fn test_product_code_case_ignored() {
        let mut lower = base();
        lower.measure = TariffMeasure::ProductCode { product_code: "8471.30ab".into() };
        let mut upper = base();
        upper.measure = TariffMeasure::ProductCode { product_code: " 8471.30AB".into() };
        assert_eq!(fingerprint(&lower).unwrap(), fingerprint(&upper).unwrap());
    }
}
