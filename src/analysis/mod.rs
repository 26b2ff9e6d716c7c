//! Analysis of completed runs
//!
//! The orchestrator asks an [`AnalysisGenerator`] for a report once a run has
//! results, and attaches whatever comes back to the output.

use chrono::Utc;

use crate::simulation::{AnalysisReport, SimulationInput, SimulationOutput, TariffMeasure};
use crate::types::{Result, SimError};

/// Produces an analysis report for a completed output
#[async_trait::async_trait]
pub trait AnalysisGenerator: Send + Sync {
    async fn generate(
        &self,
        input: &SimulationInput,
        output: &SimulationOutput,
    ) -> Result<AnalysisReport>;
}

/// Rule-based report built from the summary statistics in the results
#[derive(Debug, Clone)]
pub struct SummaryAnalysisGenerator {
    /// Mean price impact (percent) above which mitigation is recommended
    pub mitigation_threshold_pct: f64,
    /// Probability of severe impact above which the risk is flagged
    pub severe_probability_threshold: f64,
}

impl Default for SummaryAnalysisGenerator {
    fn default() -> Self {
        Self {
            mitigation_threshold_pct: 3.0,
            severe_probability_threshold: 0.25,
        }
    }
}

impl SummaryAnalysisGenerator {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl AnalysisGenerator for SummaryAnalysisGenerator {
    async fn generate(
        &self,
        input: &SimulationInput,
        output: &SimulationOutput,
    ) -> Result<AnalysisReport> {
        let results = output
            .results
            .as_ref()
            .ok_or_else(|| SimError::NotFound(format!("results for output {}", output.id)))?;
        let metric = |name: &str| results.get(name).and_then(|v| v.as_f64());

        let params = &input.parameters;
        let measure = match &params.measure {
            TariffMeasure::Rate { tariff_rate } => format!("a {}% tariff", tariff_rate),
            TariffMeasure::ProductCode { product_code } => {
                format!("tariffs on HS {}", product_code.trim())
            }
        };

        let mean = metric("mean_price_impact_pct").unwrap_or(0.0);
        let summary = format!(
            "Over {} months, {} on imports to {} raises consumer prices by {:.2}% on average.",
            params.time_horizon_months,
            measure,
            params.country.trim(),
            mean
        );

        let mut findings = Vec::new();
        if let (Some(lo), Some(hi)) = (metric("lower_bound_pct"), metric("upper_bound_pct")) {
            findings.push(format!(
                "{:.0}% interval for the price impact: {:.2}% to {:.2}%",
                params.confidence_level * 100.0,
                lo,
                hi
            ));
        }
        if let Some(volume) = metric("mean_volume_change_pct") {
            findings.push(format!("Import volumes change by {:.2}% on average", volume));
        }
        let severe = metric("probability_severe_impact");
        if let Some(p) = severe {
            findings.push(format!("Probability of a severe price impact: {:.1}%", p * 100.0));
        }

        let mut recommendations = Vec::new();
        if mean > self.mitigation_threshold_pct {
            recommendations.push("Review sourcing alternatives for the affected goods".to_string());
        }
        if severe.is_some_and(|p| p > self.severe_probability_threshold) {
            recommendations
                .push("Hedge currency exposure and build inventory ahead of the change".to_string());
        }
        if recommendations.is_empty() {
            recommendations.push("Monitor; no immediate action needed".to_string());
        }

        Ok(AnalysisReport {
            summary,
            findings,
            recommendations,
            generated_at: Utc::now(),
        })
    }
}
