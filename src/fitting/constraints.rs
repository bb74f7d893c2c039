use std::collections::HashSet;

use crate::error::{Problem, ValidationError, ValidationIssue};

use super::{BackgroundSpec, Bounded, CompositeModel, ParameterKind, PeakSpec};

/// Checks one bounded parameter, pushing every problem it has onto `issues`
fn check_bounded(region_id: &str, kind: ParameterKind, bounds: &Bounded, issues: &mut Vec<ValidationIssue>) {
    let name = kind.name();
    let mut push = |problem| issues.push(ValidationIssue::new(region_id, Some(name), problem));

    if !bounds.init.is_finite() {
        push(Problem::NonFinite(bounds.init));
        return;
    }
    if bounds.min.is_nan() || bounds.max.is_nan() {
        push(Problem::NonFinite(f64::NAN));
        return;
    }
    if bounds.min > bounds.max {
        push(Problem::InvertedBounds {
            min: bounds.min,
            max: bounds.max,
        });
    } else if !bounds.contains(bounds.init) {
        push(Problem::InitOutOfBounds {
            min: bounds.min,
            init: bounds.init,
            max: bounds.max,
        });
    }

    match kind {
        ParameterKind::Sigma if bounds.min <= 0.0 => push(Problem::NonPositiveWidth(bounds.min)),
        ParameterKind::Gamma if bounds.min < 0.0 || bounds.max > 1.0 => push(Problem::MixingOutOfRange {
            min: bounds.min,
            max: bounds.max,
        }),
        _ => {}
    }
}

/// Validate a full set of peak definitions and background in one pass.
///
/// Every problem is collected, so the returned error names each offending region and
/// parameter rather than only the first.
pub fn validate(peaks: &[PeakSpec], background: &BackgroundSpec) -> Result<(), ValidationError> {
    let mut issues = Vec::new();
    let mut seen = HashSet::new();

    for peak in peaks {
        if !seen.insert(peak.region_id.as_str()) {
            issues.push(ValidationIssue::new(&peak.region_id, None, Problem::DuplicateRegion));
        }
        for (kind, bounds) in peak.parameters() {
            check_bounded(&peak.region_id, kind, &bounds, &mut issues);
        }
        if !peak.total_time.is_finite() {
            issues.push(ValidationIssue::new(
                &peak.region_id,
                Some("total_time"),
                Problem::NonFinite(peak.total_time),
            ));
        } else if peak.total_time < 0.0 {
            issues.push(ValidationIssue::new(
                &peak.region_id,
                Some("total_time"),
                Problem::NegativeTime(peak.total_time),
            ));
        }
    }

    for (kind, bounds) in background.parameters() {
        check_bounded("background", kind, &bounds, &mut issues);
    }
    if let Some(reference) = background.reference {
        if !reference.is_finite() {
            issues.push(ValidationIssue::new(
                "background",
                Some("reference"),
                Problem::NonFinite(reference),
            ));
        }
    }

    ValidationError::check(issues)
}

/// The box constraints of a fit, aligned to a [`ParameterLayout`](super::ParameterLayout)
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintManager {
    initial: Vec<f64>,
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl ConstraintManager {
    /// Validate the model's seeded bounds and lay them out as vectors
    pub fn new(model: &CompositeModel) -> Result<Self, ValidationError> {
        validate(model.peaks(), model.background())?;
        Ok(Self::from_validated(model))
    }

    /// Lay out the bounds of a model whose peaks and background already passed [`validate`]
    pub(crate) fn from_validated(model: &CompositeModel) -> Self {
        let bounds = model.layout().bounds();
        Self {
            initial: bounds.iter().map(|b| b.init).collect(),
            lower: bounds.iter().map(|b| b.min).collect(),
            upper: bounds.iter().map(|b| b.max).collect(),
        }
    }

    /// Build from raw vectors, as when refitting from a previous result.
    ///
    /// Positions present in all three vectors are validated. Differing lengths are
    /// reported by the fitter, which knows the expected parameter count.
    pub fn from_vectors(initial: Vec<f64>, lower: Vec<f64>, upper: Vec<f64>) -> Result<Self, ValidationError> {
        let mut issues = Vec::new();
        for (i, ((init, min), max)) in initial.iter().zip(lower.iter()).zip(upper.iter()).enumerate() {
            let name = format!("p{i}");
            let bounds = Bounded::new(*min, *init, *max);
            let mut local = Vec::new();
            check_bounded("parameters", ParameterKind::Amplitude, &bounds, &mut local);
            issues.extend(local.into_iter().map(|mut issue| {
                issue.parameter = Some(name.clone());
                issue
            }));
        }
        ValidationError::check(issues)?;
        Ok(Self { initial, lower, upper })
    }

    /// Replace the starting point, clamped into bounds
    pub fn with_initial(mut self, initial: &[f64]) -> Self {
        for (slot, value) in self.initial.iter_mut().zip(initial) {
            *slot = *value;
        }
        let mut initial = std::mem::take(&mut self.initial);
        self.project(&mut initial);
        self.initial = initial;
        self
    }

    pub fn initial(&self) -> &[f64] {
        &self.initial
    }

    pub fn lower(&self) -> &[f64] {
        &self.lower
    }

    pub fn upper(&self) -> &[f64] {
        &self.upper
    }

    pub fn len(&self) -> usize {
        self.initial.len()
    }

    pub fn is_empty(&self) -> bool {
        self.initial.is_empty()
    }

    /// Whether the parameter at `index` is held constant
    pub fn is_fixed(&self, index: usize) -> bool {
        self.lower[index] == self.upper[index]
    }

    /// The positions of the parameters the optimizer may move
    pub fn free_indices(&self) -> Vec<usize> {
        (0..self.len()).filter(|i| !self.is_fixed(*i)).collect()
    }

    /// Clamp every entry of `params` into its bounds
    pub fn project(&self, params: &mut [f64]) {
        for ((value, lo), hi) in params.iter_mut().zip(self.lower.iter()).zip(self.upper.iter()) {
            *value = value.max(*lo).min(*hi);
        }
    }
}
