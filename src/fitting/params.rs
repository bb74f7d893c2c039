use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::PeakShapeKind;

/// A fittable value with its box constraint, `min <= init <= max`
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Bounded {
    pub min: f64,
    pub init: f64,
    pub max: f64,
}

impl Bounded {
    pub fn new(min: f64, init: f64, max: f64) -> Self {
        Self { min, init, max }
    }

    /// Build from the `(init, min, max)` ordering used by seed files
    pub fn from_seed(init: f64, min: f64, max: f64) -> Self {
        Self::new(min, init, max)
    }

    /// A value held constant during fitting
    pub fn fixed(value: f64) -> Self {
        Self::new(value, value, value)
    }

    pub fn unbounded(init: f64) -> Self {
        Self::new(f64::NEG_INFINITY, init, f64::INFINITY)
    }

    pub fn is_fixed(&self) -> bool {
        self.min == self.max
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min <= value && value <= self.max
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.max(self.min).min(self.max)
    }
}

impl Default for Bounded {
    fn default() -> Self {
        Self::fixed(0.0)
    }
}

/// The kinds of parameters the composite model is built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ParameterKind {
    Center,
    Sigma,
    Amplitude,
    /// Lorentzian mixing fraction
    Gamma,
    /// Asymmetry
    Skew,
    Offset,
    Slope,
}

impl ParameterKind {
    pub const PEAK: [ParameterKind; 5] = [
        Self::Center,
        Self::Sigma,
        Self::Amplitude,
        Self::Gamma,
        Self::Skew,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Center => "center",
            Self::Sigma => "sigma",
            Self::Amplitude => "amplitude",
            Self::Gamma => "gamma",
            Self::Skew => "skew",
            Self::Offset => "offset",
            Self::Slope => "slope",
        }
    }
}

impl fmt::Display for ParameterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The line shape of a peak together with the bounded parameters only that shape uses.
///
/// Shapes are chosen explicitly, so a `gamma` or `skew` of exactly zero in a
/// [`PeakProfile::SkewedPseudoVoigt`] is still fitted rather than dropped.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PeakProfile {
    Gaussian,
    PseudoVoigt { gamma: Bounded },
    SkewedPseudoVoigt { gamma: Bounded, skew: Bounded },
}

impl PeakProfile {
    pub fn kind(&self) -> PeakShapeKind {
        match self {
            Self::Gaussian => PeakShapeKind::Gaussian,
            Self::PseudoVoigt { .. } => PeakShapeKind::PseudoVoigt,
            Self::SkewedPseudoVoigt { .. } => PeakShapeKind::SkewedPseudoVoigt,
        }
    }

    pub fn gamma(&self) -> Option<&Bounded> {
        match self {
            Self::Gaussian => None,
            Self::PseudoVoigt { gamma } | Self::SkewedPseudoVoigt { gamma, .. } => Some(gamma),
        }
    }

    pub fn skew(&self) -> Option<&Bounded> {
        match self {
            Self::SkewedPseudoVoigt { skew, .. } => Some(skew),
            _ => None,
        }
    }
}

/// One fittable peak definition, usually one row of a seed file
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PeakSpec {
    /// Element, shell and orbital label, e.g. `"Pb 4f 1/2"`
    pub region_id: String,
    pub center: Bounded,
    pub sigma: Bounded,
    pub amplitude: Bounded,
    pub profile: PeakProfile,
    /// Acquisition duration in seconds, only used to normalize areas across count times
    pub total_time: f64,
}

impl PeakSpec {
    /// A Gaussian peak, see [`PeakSpec::profile`] to choose another shape
    pub fn new(region_id: impl Into<String>, center: Bounded, sigma: Bounded, amplitude: Bounded) -> Self {
        Self {
            region_id: region_id.into(),
            center,
            sigma,
            amplitude,
            profile: PeakProfile::Gaussian,
            total_time: 1.0,
        }
    }

    pub fn profile(mut self, profile: PeakProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn total_time(mut self, total_time: f64) -> Self {
        self.total_time = total_time;
        self
    }

    /// The bounded parameters of this peak in composite model order
    pub fn parameters(&self) -> Vec<(ParameterKind, Bounded)> {
        let mut params = vec![
            (ParameterKind::Center, self.center),
            (ParameterKind::Sigma, self.sigma),
            (ParameterKind::Amplitude, self.amplitude),
        ];
        if let Some(gamma) = self.profile.gamma() {
            params.push((ParameterKind::Gamma, *gamma));
        }
        if let Some(skew) = self.profile.skew() {
            params.push((ParameterKind::Skew, *skew));
        }
        params
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parameter_order() {
        let spec = PeakSpec::new(
            "C 1s",
            Bounded::new(284.0, 284.8, 285.5),
            Bounded::new(0.3, 0.8, 2.0),
            Bounded::new(0.0, 100.0, 1e4),
        );
        let kinds: Vec<_> = spec.parameters().into_iter().map(|(k, _)| k).collect();
        assert_eq!(
            kinds,
            vec![ParameterKind::Center, ParameterKind::Sigma, ParameterKind::Amplitude]
        );

        let spec = spec.profile(PeakProfile::SkewedPseudoVoigt {
            gamma: Bounded::new(0.0, 0.0, 1.0),
            skew: Bounded::fixed(0.0),
        });
        let kinds: Vec<_> = spec.parameters().into_iter().map(|(k, _)| k).collect();
        assert_eq!(kinds, ParameterKind::PEAK.to_vec());
    }

    #[test]
    fn test_bounded() {
        let b = Bounded::from_seed(136.5, 136.0, 137.0);
        assert_eq!(b, Bounded::new(136.0, 136.5, 137.0));
        assert_eq!(b.clamp(140.0), 137.0);
        assert!(b.contains(136.0));
        assert!(!b.is_fixed());
        assert!(Bounded::fixed(2.0).is_fixed());
    }
}
