//! Error types shared across the fitting and quantification stages.
//!
//! Only structural problems are errors. A fit that fails to converge is reported through
//! [`FitResult::converged`](crate::fitting::FitResult::converged), and a cancelled fit through
//! [`FitOutcome::Cancelled`](crate::fitting::FitOutcome::Cancelled).
use std::fmt;

use thiserror::Error;

/// What is wrong with a single seed or RSF value
#[derive(Debug, Clone, PartialEq)]
pub enum Problem {
    /// `min > max`
    InvertedBounds { min: f64, max: f64 },
    /// `init` lies outside `[min, max]`
    InitOutOfBounds { min: f64, init: f64, max: f64 },
    NonFinite(f64),
    /// Width parameters need a strictly positive lower bound
    NonPositiveWidth(f64),
    /// Lorentzian mixing bounds must lie within `[0, 1]`
    MixingOutOfRange { min: f64, max: f64 },
    NegativeTime(f64),
    NonPositiveSensitivity(f64),
    DuplicateRegion,
    MalformedField { field: String, value: String },
    FieldCount { expected: usize, actual: usize },
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvertedBounds { min, max } => write!(f, "inverted bounds, min {min} > max {max}"),
            Self::InitOutOfBounds { min, init, max } => {
                write!(f, "initial value {init} outside [{min}, {max}]")
            }
            Self::NonFinite(v) => write!(f, "non-finite value {v}"),
            Self::NonPositiveWidth(v) => write!(f, "width lower bound {v} must be positive"),
            Self::MixingOutOfRange { min, max } => {
                write!(f, "mixing bounds [{min}, {max}] must lie within [0, 1]")
            }
            Self::NegativeTime(v) => write!(f, "negative acquisition time {v}"),
            Self::NonPositiveSensitivity(v) => {
                write!(f, "sensitivity factor {v} must be positive")
            }
            Self::DuplicateRegion => f.write_str("duplicate region label"),
            Self::MalformedField { field, value } => {
                write!(f, "field '{field}' is not numeric: '{value}'")
            }
            Self::FieldCount { expected, actual } => {
                write!(f, "expected {expected} fields, found {actual}")
            }
        }
    }
}

/// One offending region/parameter pair found while validating input
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    pub region_id: String,
    /// The parameter or field name, absent for problems with the whole region
    pub parameter: Option<String>,
    pub problem: Problem,
}

impl ValidationIssue {
    pub fn new(region_id: impl Into<String>, parameter: Option<&str>, problem: Problem) -> Self {
        Self {
            region_id: region_id.into(),
            parameter: parameter.map(String::from),
            problem,
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.parameter {
            Some(param) => write!(f, "{}.{}: {}", self.region_id, param, self.problem),
            None => write!(f, "{}: {}", self.region_id, self.problem),
        }
    }
}

fn list_issues(issues: &[ValidationIssue]) -> String {
    let listed: Vec<String> = issues.iter().map(ValidationIssue::to_string).collect();
    format!("{} validation issue(s): {}", issues.len(), listed.join("; "))
}

/// Every problem found in one validation pass over seed or RSF input
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{}", list_issues(.issues))]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationError {
    pub fn new(issues: Vec<ValidationIssue>) -> Self {
        Self { issues }
    }

    /// `Ok(())` when no issues were collected
    pub fn check(issues: Vec<ValidationIssue>) -> Result<(), Self> {
        if issues.is_empty() {
            Ok(())
        } else {
            Err(Self::new(issues))
        }
    }

    /// Whether any issue names `region_id` and `parameter`
    pub fn mentions(&self, region_id: &str, parameter: &str) -> bool {
        self.issues
            .iter()
            .any(|i| i.region_id == region_id && i.parameter.as_deref() == Some(parameter))
    }
}

/// A fitting or quantification setup that cannot be satisfied
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("no peak regions were supplied")]
    NoRegions,
    #[error("region '{0}' is defined more than once")]
    DuplicateRegion(String),
    #[error("unknown background shape '{0}', expected 'constant' or 'linear'")]
    UnknownBackgroundShape(String),
    #[error("no region has a sensitivity factor entry")]
    NoQuantifiableRegions,
    #[error("corrected intensities sum to {0}, cannot normalize")]
    ZeroDenominator(f64),
    #[error("region '{0}' has no positive acquisition time to normalize by")]
    InvalidAcquisitionTime(String),
}

/// Structural problems with a fit invocation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    #[error("spectrum has {0} point(s), at least 2 are required")]
    TooFewPoints(usize),
    #[error("spectrum spans a zero-width binding energy range")]
    DegenerateEnergyRange,
    #[error("model expects {expected} parameters, got initial={initial}, lower={lower}, upper={upper}")]
    ParameterLengthMismatch {
        expected: usize,
        initial: usize,
        lower: usize,
        upper: usize,
    },
    #[error("the model is not finite at the initial parameters")]
    NonFiniteInitialCost,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_validation_display_lists_everything() {
        let err = ValidationError::new(vec![
            ValidationIssue::new(
                "Pb 4f 1/2",
                Some("sigma"),
                Problem::InvertedBounds { min: 2.0, max: 0.3 },
            ),
            ValidationIssue::new("C 1s", None, Problem::DuplicateRegion),
        ]);
        let text = err.to_string();
        assert!(text.starts_with("2 validation issue(s)"));
        assert!(text.contains("Pb 4f 1/2.sigma: inverted bounds"));
        assert!(text.contains("C 1s: duplicate region label"));
        assert!(err.mentions("Pb 4f 1/2", "sigma"));
        assert!(!err.mentions("Pb 4f 1/2", "center"));
        assert!(ValidationError::check(Vec::new()).is_ok());
    }

    #[test]
    fn test_validation_error_is_std_error() {
        let err: Box<dyn std::error::Error> = Box::new(ValidationError::new(vec![ValidationIssue::new(
            "O 1s",
            Some("rsf"),
            Problem::NonPositiveSensitivity(-1.0),
        )]));
        assert_eq!(
            err.to_string(),
            "1 validation issue(s): O 1s.rsf: sensitivity factor -1 must be positive"
        );
        assert!(err.source().is_none());
    }
}
