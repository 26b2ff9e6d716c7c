//! Comparison of completed runs
//!
//! The first run is the baseline. Every other run gets one [`DifferenceCell`]
//! per parameter (and per numeric result metric) describing how far it is
//! from the baseline:
//!
//! - numbers: `abs = v - base`, `pct = abs / |base| * 100`; when `base` is 0
//!   the percentage is 0 if `v` is also 0 and ±100 otherwise
//! - text and sets: 0/0 when equal, 1/100 when not
//! - a key missing from one side counts as different (1/100)

use std::collections::BTreeSet;
use tracing::debug;

use crate::cache::SimulationParameterKey;
use crate::simulation::{
    DifferenceCell, DifferenceMatrix, ParamValue, RunStatus, SimulationComparison,
    SimulationInput, SimulationOutput,
};
use crate::types::{Result, SimError};

/// A completed output together with the input it ran
pub type ComparedRun = (SimulationInput, SimulationOutput);

pub struct ComparisonEngine;

impl ComparisonEngine {
    /// Compare completed runs, baseline first
    pub fn compare(
        runs: &[ComparedRun],
        name: &str,
        description: Option<String>,
    ) -> Result<SimulationComparison> {
        Self::check_comparable(runs)?;

        let (base_input, base_output) = &runs[0];
        let rest = &runs[1..];

        let base_params = base_input.parameters.parameters();
        let param_keys: BTreeSet<&'static str> = runs
            .iter()
            .flat_map(|(input, _)| input.parameters.parameters().into_keys())
            .collect();

        let mut parameter_differences = DifferenceMatrix::new();
        for key in param_keys {
            let cells = rest
                .iter()
                .map(|(input, output)| {
                    let params = input.parameters.parameters();
                    let (pct, abs) = value_difference(base_params.get(key), params.get(key));
                    cell(&output.id, pct, abs)
                })
                .collect();
            parameter_differences.insert(key.to_string(), cells);
        }

        let base_metrics = numeric_metrics(base_output);
        let metric_keys: BTreeSet<String> = runs
            .iter()
            .flat_map(|(_, output)| numeric_metrics(output).into_iter().map(|(k, _)| k))
            .collect();

        let mut result_differences = DifferenceMatrix::new();
        for key in metric_keys {
            let base = lookup(&base_metrics, &key);
            let cells = rest
                .iter()
                .map(|(_, output)| {
                    let value = lookup(&numeric_metrics(output), &key);
                    let (pct, abs) = value_difference(base.as_ref(), value.as_ref());
                    cell(&output.id, pct, abs)
                })
                .collect();
            result_differences.insert(key, cells);
        }

        debug!(
            baseline = %base_output.id,
            compared = rest.len(),
            "Built comparison matrices"
        );

        Ok(SimulationComparison::new(
            name,
            description,
            runs.iter().map(|(_, output)| output.id.clone()).collect(),
            parameter_differences,
            result_differences,
        ))
    }

    fn check_comparable(runs: &[ComparedRun]) -> Result<()> {
        if runs.len() < 2 {
            return Err(SimError::InvalidComparison(format!(
                "need at least two runs, got {}",
                runs.len()
            )));
        }

        for (input, output) in runs {
            if output.input_id != input.id {
                return Err(SimError::InvalidComparison(format!(
                    "output {} does not belong to input {}",
                    output.id, input.id
                )));
            }
            if output.status != RunStatus::Completed || output.results.is_none() {
                return Err(SimError::InvalidComparison(format!(
                    "output {} is {}, not completed",
                    output.id, output.status
                )));
            }
        }

        let base = SimulationParameterKey::from_config(&runs[0].0.parameters)?;
        let base_kind = runs[0].0.parameters.measure.kind();
        for (input, output) in &runs[1..] {
            let kind = input.parameters.measure.kind();
            if kind != base_kind {
                return Err(SimError::InvalidComparison(format!(
                    "output {} uses {} parameters, baseline uses {}",
                    output.id, kind, base_kind
                )));
            }
            let version = SimulationParameterKey::from_config(&input.parameters)?.version;
            if version != base.version {
                return Err(SimError::InvalidComparison(format!(
                    "output {} has schema {}, baseline has {}",
                    output.id, version, base.version
                )));
            }
        }
        Ok(())
    }
}

fn cell(output_id: &str, percentage_difference: f64, absolute_difference: f64) -> DifferenceCell {
    DifferenceCell {
        output_id: output_id.to_string(),
        percentage_difference,
        absolute_difference,
    }
}

/// `(percentage, absolute)` difference of `value` from `base`
fn value_difference(base: Option<&ParamValue>, value: Option<&ParamValue>) -> (f64, f64) {
    match (base, value) {
        (Some(ParamValue::Number(b)), Some(ParamValue::Number(v))) => {
            let abs = v - b;
            let pct = if *b == 0.0 {
                if abs == 0.0 {
                    0.0
                } else {
                    100.0 * abs.signum()
                }
            } else {
                abs / b.abs() * 100.0
            };
            (pct, abs)
        }
        (None, None) => (0.0, 0.0),
        (Some(b), Some(v)) if b == v => (0.0, 0.0),
        _ => (100.0, 1.0),
    }
}

/// Top-level numeric fields of an output's results
fn numeric_metrics(output: &SimulationOutput) -> Vec<(String, f64)> {
    output
        .results
        .as_ref()
        .and_then(|r| r.as_object())
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_f64().map(|n| (k.clone(), n)))
                .collect()
        })
        .unwrap_or_default()
}

fn lookup(metrics: &[(String, f64)], key: &str) -> Option<ParamValue> {
    metrics
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| ParamValue::Number(*v))
}
