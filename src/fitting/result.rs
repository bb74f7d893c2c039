#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::{Background, BackgroundShape, ParameterKind, PeakShape, PeakShapeKind};

/// A fitted parameter value
#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ParameterEstimate {
    pub value: f64,
    /// The standard error, absent when the parameter was held fixed or the curvature
    /// matrix could not be inverted
    pub stderr: Option<f64>,
    /// Whether the optimizer was allowed to move this parameter
    pub vary: bool,
}

impl ParameterEstimate {
    pub fn new(value: f64, stderr: Option<f64>, vary: bool) -> Self {
        Self { value, stderr, vary }
    }

    pub fn fixed(value: f64) -> Self {
        Self::new(value, None, false)
    }
}

/// The fitted state of one peak
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PeakFitResult {
    pub region_id: String,
    pub kind: PeakShapeKind,
    pub center: ParameterEstimate,
    pub sigma: ParameterEstimate,
    pub amplitude: ParameterEstimate,
    /// Reported as fixed at zero for profiles without a Lorentzian component
    pub gamma: ParameterEstimate,
    /// Reported as fixed at zero for symmetric profiles
    pub skew: ParameterEstimate,
    /// The integrated area of the peak
    pub area: f64,
    pub total_time: f64,
}

impl PeakFitResult {
    pub fn estimate(&self, kind: ParameterKind) -> Option<&ParameterEstimate> {
        match kind {
            ParameterKind::Center => Some(&self.center),
            ParameterKind::Sigma => Some(&self.sigma),
            ParameterKind::Amplitude => Some(&self.amplitude),
            ParameterKind::Gamma => Some(&self.gamma),
            ParameterKind::Skew => Some(&self.skew),
            ParameterKind::Offset | ParameterKind::Slope => None,
        }
    }

    pub fn shape(&self) -> PeakShape {
        PeakShape::new(
            self.center.value,
            self.sigma.value,
            self.amplitude.value,
            self.gamma.value,
            self.skew.value,
        )
    }

    /// The area divided by the acquisition time, when that time is positive
    pub fn area_per_second(&self) -> Option<f64> {
        (self.total_time > 0.0).then(|| self.area / self.total_time)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BackgroundFitResult {
    pub shape: BackgroundShape,
    pub offset: ParameterEstimate,
    pub slope: ParameterEstimate,
    pub reference: f64,
}

impl BackgroundFitResult {
    pub fn background(&self) -> Background {
        Background::new(self.offset.value, self.slope.value, self.reference)
    }
}

/// Goodness of fit for a whole fit session
#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FitStatistics {
    /// Residual sum of squares
    pub rss: f64,
    /// `rss / (n_points - n_free)`, absent when there are no degrees of freedom
    pub reduced_chi_square: Option<f64>,
    /// The coefficient of determination
    pub r_squared: f64,
    pub n_points: usize,
    pub n_free: usize,
}

/// The outcome of a completed fit.
///
/// A fit that ran out of iterations still produces a result with the best parameters
/// found, with [`FitResult::converged`] unset.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FitResult {
    pub peaks: Vec<PeakFitResult>,
    pub background: BackgroundFitResult,
    pub statistics: FitStatistics,
    pub converged: bool,
    pub iterations: usize,
    /// The full parameter vector in layout order
    pub parameters: Vec<f64>,
    /// Standard errors aligned with `parameters`
    pub stderr: Vec<Option<f64>>,
}

impl FitResult {
    pub fn peak(&self, region_id: &str) -> Option<&PeakFitResult> {
        self.peaks.iter().find(|p| p.region_id == region_id)
    }

    /// The fitted model's intensity at `x`
    pub fn evaluate(&self, x: f64) -> f64 {
        self.peaks.iter().map(|p| p.shape().density(x)).sum::<f64>() + self.background.background().evaluate(x)
    }

    pub fn predict(&self, xs: &[f64]) -> Vec<f64> {
        xs.iter().map(|x| self.evaluate(*x)).collect()
    }

    pub fn total_area(&self) -> f64 {
        self.peaks.iter().map(|p| p.area).sum()
    }
}
