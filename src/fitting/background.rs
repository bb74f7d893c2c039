use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

use super::{Bounded, ParameterKind};

/// The baseline form fitted underneath the peaks
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum BackgroundShape {
    #[default]
    Constant,
    Linear,
}

impl FromStr for BackgroundShape {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "constant" => Ok(Self::Constant),
            "linear" => Ok(Self::Linear),
            _ => Err(ConfigurationError::UnknownBackgroundShape(s.to_string())),
        }
    }
}

/// Bounded background parameters for a fit session
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BackgroundSpec {
    pub shape: BackgroundShape,
    pub offset: Bounded,
    /// Only used by [`BackgroundShape::Linear`]
    pub slope: Bounded,
    /// The binding energy the slope pivots around. When unset the fitter uses the
    /// midpoint of the spectrum's energy range.
    pub reference: Option<f64>,
}

impl Default for BackgroundSpec {
    fn default() -> Self {
        Self::constant(Bounded::unbounded(0.0))
    }
}

impl BackgroundSpec {
    pub fn constant(offset: Bounded) -> Self {
        Self {
            shape: BackgroundShape::Constant,
            offset,
            slope: Bounded::fixed(0.0),
            reference: None,
        }
    }

    pub fn linear(offset: Bounded, slope: Bounded) -> Self {
        Self {
            shape: BackgroundShape::Linear,
            offset,
            slope,
            reference: None,
        }
    }

    pub fn reference(mut self, reference: f64) -> Self {
        self.reference = Some(reference);
        self
    }

    /// The bounded parameters of the background in composite model order
    pub fn parameters(&self) -> Vec<(ParameterKind, Bounded)> {
        match self.shape {
            BackgroundShape::Constant => vec![(ParameterKind::Offset, self.offset)],
            BackgroundShape::Linear => vec![
                (ParameterKind::Offset, self.offset),
                (ParameterKind::Slope, self.slope),
            ],
        }
    }
}

/// An evaluated background with concrete parameter values
#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Background {
    pub offset: f64,
    pub slope: f64,
    pub reference: f64,
}

impl Background {
    pub fn new(offset: f64, slope: f64, reference: f64) -> Self {
        Self {
            offset,
            slope,
            reference,
        }
    }

    #[inline]
    pub fn evaluate(&self, x: f64) -> f64 {
        self.offset + self.slope * (x - self.reference)
    }

    /// The partial derivatives with respect to `[offset, slope]`
    #[inline]
    pub fn gradient(&self, x: f64) -> [f64; 2] {
        [1.0, x - self.reference]
    }
}
