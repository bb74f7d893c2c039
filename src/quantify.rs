//! Atomic concentrations from fitted peak areas.
//!
//! Each area is divided by its relative sensitivity factor (RSF) and the corrected
//! intensities are normalized to percent:
//!
//! ```math
//! C_i = \frac{A_i}{S_i} \qquad x_i = 100\frac{C_i}{\sum_j C_j}
//! ```
use std::collections::HashMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{ConfigurationError, Problem, ValidationError, ValidationIssue};
use crate::fitting::FitResult;

/// Relative sensitivity factors by region label
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RsfTable {
    factors: HashMap<String, f64>,
}

impl RsfTable {
    /// Build a table, rejecting non-positive, non-finite and repeated entries
    pub fn new<I, S>(entries: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let mut factors = HashMap::new();
        let mut issues = Vec::new();
        for (label, factor) in entries {
            let label: String = label.into();
            if !factor.is_finite() {
                issues.push(ValidationIssue::new(&label, Some("rsf"), Problem::NonFinite(factor)));
            } else if factor <= 0.0 {
                issues.push(ValidationIssue::new(
                    &label,
                    Some("rsf"),
                    Problem::NonPositiveSensitivity(factor),
                ));
            } else if factors.contains_key(&label) {
                issues.push(ValidationIssue::new(&label, None, Problem::DuplicateRegion));
            } else {
                factors.insert(label, factor);
            }
        }
        ValidationError::check(issues)?;
        Ok(Self { factors })
    }

    pub fn get(&self, region_id: &str) -> Option<f64> {
        self.factors.get(region_id).copied()
    }

    pub fn len(&self) -> usize {
        self.factors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.factors.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct QuantConfig {
    /// Divide each area by its region's acquisition time before applying the RSF, for
    /// regions acquired with differing count times
    pub normalize_by_time: bool,
}

impl QuantConfig {
    pub fn normalize_by_time(mut self, normalize_by_time: bool) -> Self {
        self.normalize_by_time = normalize_by_time;
        self
    }
}

/// The quantified share of one region
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Concentration {
    pub region_id: String,
    pub area: f64,
    pub sensitivity: f64,
    /// The sensitivity-corrected intensity, $`C_i`$
    pub corrected: f64,
    pub atomic_percent: f64,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConcentrationResult {
    /// In the fit's peak order
    pub concentrations: Vec<Concentration>,
    /// Regions that had no sensitivity factor and were left out of the normalization
    pub unquantified: Vec<String>,
}

impl ConcentrationResult {
    pub fn get(&self, region_id: &str) -> Option<&Concentration> {
        self.concentrations.iter().find(|c| c.region_id == region_id)
    }

    pub fn atomic_percent(&self, region_id: &str) -> Option<f64> {
        self.get(region_id).map(|c| c.atomic_percent)
    }

    pub fn total_percent(&self) -> f64 {
        self.concentrations.iter().map(|c| c.atomic_percent).sum()
    }
}

/// Convert the areas of a fit into atomic percentages
pub fn compute(fit: &FitResult, rsf: &RsfTable, config: QuantConfig) -> Result<ConcentrationResult, ConfigurationError> {
    let mut concentrations = Vec::new();
    let mut unquantified = Vec::new();

    for peak in fit.peaks.iter() {
        let Some(sensitivity) = rsf.get(&peak.region_id) else {
            log::debug!("No sensitivity factor for {}, leaving it unquantified", peak.region_id);
            unquantified.push(peak.region_id.clone());
            continue;
        };
        let area = if config.normalize_by_time {
            peak.area_per_second()
                .ok_or_else(|| ConfigurationError::InvalidAcquisitionTime(peak.region_id.clone()))?
        } else {
            peak.area
        };
        concentrations.push(Concentration {
            region_id: peak.region_id.clone(),
            area,
            sensitivity,
            corrected: area / sensitivity,
            atomic_percent: 0.0,
        });
    }

    if concentrations.is_empty() {
        return Err(ConfigurationError::NoQuantifiableRegions);
    }
    let total: f64 = concentrations.iter().map(|c| c.corrected).sum();
    if total == 0.0 || !total.is_finite() {
        return Err(ConfigurationError::ZeroDenominator(total));
    }
    for c in concentrations.iter_mut() {
        c.atomic_percent = 100.0 * c.corrected / total;
    }

    Ok(ConcentrationResult {
        concentrations,
        unquantified,
    })
}
