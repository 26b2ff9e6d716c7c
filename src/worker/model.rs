//! Monte Carlo tariff-impact model
//!
//! Each draw samples a pass-through share, a demand elasticity, and an exchange
//! rate shock from `rand_distr` normals, then derives the consumer price impact
//! and the import volume change for the scenario's effective tariff. The RNG is
//! seeded from the parameter fingerprint, so identical parameters give identical
//! results.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

use crate::simulation::{canonical_set, SimulationConfig, TariffMeasure};

/// Price impact above which an outcome counts as severe, in percent
const SEVERE_IMPACT_PCT: f64 = 5.0;

/// Summary statistics of a completed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TariffImpactSummary {
    pub iterations: u32,
    pub effective_tariff_rate: f64,
    pub mean_price_impact_pct: f64,
    pub median_price_impact_pct: f64,
    pub lower_bound_pct: f64,
    pub upper_bound_pct: f64,
    pub mean_volume_change_pct: f64,
    pub probability_severe_impact: f64,
    pub confidence_level: f64,
}

/// Applied tariff rate (percent) for an HS product code, by chapter
pub fn rate_for_product_code(code: &str) -> f64 {
    let chapter: u32 = code
        .chars()
        .filter(|c| c.is_ascii_digit())
        .take(2)
        .collect::<String>()
        .parse()
        .unwrap_or(0);

    match chapter {
        1..=24 => 12.0,  // agricultural and food products
        50..=63 => 15.0, // textiles and apparel
        64 => 18.0,      // footwear
        72 | 73 => 25.0, // iron and steel
        84 | 85 => 7.5,  // machinery and electronics
        87 => 10.0,      // vehicles
        _ => 5.0,
    }
}

/// Multiplier a scenario tag applies to the headline rate
fn scenario_multiplier(tag: &str) -> f64 {
    match tag {
        "retaliation" => 1.25,
        "escalation" => 1.5,
        "exemption" => 0.5,
        "trade-agreement" | "trade_agreement" => 0.7,
        _ => 1.0,
    }
}

pub struct TariffImpactModel {
    effective_rate: f64,
    exposure: f64,
    horizon_years: f64,
    confidence_level: f64,
    rng: StdRng,
    price_impacts: Vec<f64>,
    volume_changes: Vec<f64>,
}

impl TariffImpactModel {
    pub fn new(config: &SimulationConfig, seed: u64) -> Self {
        let headline = match &config.measure {
            TariffMeasure::Rate { tariff_rate } => *tariff_rate,
            TariffMeasure::ProductCode { product_code } => rate_for_product_code(product_code),
        };
        let effective_rate = canonical_set(&config.scenario_tags)
            .iter()
            .fold(headline, |rate, tag| rate * scenario_multiplier(tag));

        // Each affected category widens the share of imports exposed
        let categories = canonical_set(&config.product_categories).len() as i32;
        let exposure = if categories == 0 {
            1.0
        } else {
            1.0 - 0.85_f64.powi(categories + 3)
        };

        Self {
            effective_rate,
            exposure,
            horizon_years: f64::from(config.time_horizon_months) / 12.0,
            confidence_level: config.confidence_level,
            rng: StdRng::seed_from_u64(seed),
            price_impacts: Vec::new(),
            volume_changes: Vec::new(),
        }
    }

    /// Seed derived from a hex fingerprint
    pub fn seed_from_fingerprint(fingerprint: &str) -> u64 {
        let prefix: String = fingerprint.chars().take(16).collect();
        u64::from_str_radix(&prefix, 16).unwrap_or(0x5EED_5EED_5EED_5EED)
    }

    pub fn completed_iterations(&self) -> usize {
        self.price_impacts.len()
    }

    /// Run `n` more draws
    pub fn run_batch(&mut self, n: usize) {
        self.price_impacts.reserve(n);
        self.volume_changes.reserve(n);

        for _ in 0..n {
            let pass_through = (0.6 + 0.15 * self.standard_normal()).clamp(0.0, 1.0);
            let elasticity = (-1.2 + 0.3 * self.standard_normal()).min(0.0);
            let fx_shock = 0.02 * self.horizon_years.sqrt() * self.standard_normal();

            let price_impact =
                self.effective_rate * pass_through * self.exposure + fx_shock * 100.0;
            self.price_impacts.push(price_impact);
            self.volume_changes.push(elasticity * price_impact);
        }
    }

    pub fn summary(&self) -> TariffImpactSummary {
        let n = self.price_impacts.len();
        let mut sorted = self.price_impacts.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let tail = (1.0 - self.confidence_level) / 2.0 * 100.0;
        let severe = self
            .price_impacts
            .iter()
            .filter(|p| **p > SEVERE_IMPACT_PCT)
            .count();

        TariffImpactSummary {
            iterations: n as u32,
            effective_tariff_rate: self.effective_rate,
            mean_price_impact_pct: mean(&self.price_impacts),
            median_price_impact_pct: percentile_sorted(&sorted, 50.0),
            lower_bound_pct: percentile_sorted(&sorted, tail),
            upper_bound_pct: percentile_sorted(&sorted, 100.0 - tail),
            mean_volume_change_pct: mean(&self.volume_changes),
            probability_severe_impact: if n == 0 { 0.0 } else { severe as f64 / n as f64 },
            confidence_level: self.confidence_level,
        }
    }

    fn standard_normal(&mut self) -> f64 {
        StandardNormal.sample(&mut self.rng)
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = (p / 100.0) * (n as f64 - 1.0);
            let lower = rank.floor() as usize;
            let upper = rank.ceil() as usize;
            let w = rank - lower as f64;
            sorted[lower] * (1.0 - w) + sorted[upper] * w
        }
    }
}
