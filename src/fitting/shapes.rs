use std::f64::consts::{FRAC_2_SQRT_PI, PI, SQRT_2};

use libm::erf;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The Lorentzian half width at half maximum for a Gaussian of unit $`\sigma`$, $`\sqrt{2\ln 2}`$,
/// so both components share the same FWHM.
pub const LORENTZIAN_HWHM_FACTOR: f64 = 1.177_410_022_515_474_7;

/// Ratio of the full width at half maximum to $`\sigma`$ for the symmetric profile
pub const FWHM_FACTOR: f64 = 2.0 * LORENTZIAN_HWHM_FACTOR;

/// Which line shape a [`PeakShape`] was fit as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PeakShapeKind {
    Gaussian,
    PseudoVoigt,
    SkewedPseudoVoigt,
}

/// Skewed pseudo-Voigt peak shape model
///
/// ```math
/// \begin{aligned}
/// G &= \exp\left(-\frac{(x - \mu)^2}{2\sigma^2}\right) \qquad
/// L = \frac{w^2}{w^2 + (x-\mu)^2},\ w = \sigma\sqrt{2\ln 2} \\
/// y &= a\left[(1 - \gamma) G + \gamma L\right]\left(1 + \text{erf}\left(\frac{\alpha (x - \mu)}{\sqrt{2}\sigma}\right)\right)
/// \end{aligned}
/// ```
///
/// With $`\gamma = 0`$ and $`\alpha = 0`$ this is a plain Gaussian of height $`a`$. Gaussian and
/// pseudo-Voigt peaks are represented with the unused parameters set to zero.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PeakShape {
    pub center: f64,
    pub sigma: f64,
    pub amplitude: f64,
    pub gamma: f64,
    pub skew: f64,
}

impl PeakShape {
    pub fn new(center: f64, sigma: f64, amplitude: f64, gamma: f64, skew: f64) -> Self {
        Self {
            center,
            sigma,
            amplitude,
            gamma,
            skew,
        }
    }

    pub fn gaussian(center: f64, sigma: f64, amplitude: f64) -> Self {
        Self::new(center, sigma, amplitude, 0.0, 0.0)
    }

    /// The Lorentzian half width
    #[inline]
    pub fn lorentzian_width(&self) -> f64 {
        self.sigma * LORENTZIAN_HWHM_FACTOR
    }

    /// The full width at half maximum of the symmetric part of the profile
    pub fn fwhm(&self) -> f64 {
        self.sigma * FWHM_FACTOR
    }

    /// Compute the theoretical intensity at a specified binding energy
    #[inline]
    pub fn density(&self, x: f64) -> f64 {
        let d = x - self.center;
        let w = self.lorentzian_width();
        let g = (-0.5 * d * d / (self.sigma * self.sigma)).exp();
        let l = w * w / (w * w + d * d);
        let s = 1.0 + erf(self.skew * d / (SQRT_2 * self.sigma));
        self.amplitude * ((1.0 - self.gamma) * g + self.gamma * l) * s
    }

    /// Given a coordinate sequence, produce the complementary sequence of theoretical intensities
    pub fn predict(&self, xs: &[f64]) -> Vec<f64> {
        xs.iter().map(|x| self.density(*x)).collect()
    }

    /// The partial derivatives of [`PeakShape::density`] at `x` with respect to
    /// `[center, sigma, amplitude, gamma, skew]`
    #[inline]
    pub fn gradient(&self, x: f64) -> [f64; 5] {
        let amp = self.amplitude;
        let sigma = self.sigma;
        let eta = self.gamma;
        let alpha = self.skew;

        let d = x - self.center;
        let d2 = d * d;
        let sigma2 = sigma * sigma;
        let w = sigma * LORENTZIAN_HWHM_FACTOR;
        let w2 = w * w;

        let g = (-0.5 * d2 / sigma2).exp();
        let l = w2 / (w2 + d2);
        let l2 = l * l;

        let dg_dmu = g * d / sigma2;
        let dg_dsigma = g * d2 / (sigma2 * sigma);
        let dl_dmu = 2.0 * d * l2 / w2;
        let dl_dsigma = LORENTZIAN_HWHM_FACTOR * 2.0 * d2 * l2 / (w2 * w);

        let v = (1.0 - eta) * g + eta * l;
        let dv_dmu = (1.0 - eta) * dg_dmu + eta * dl_dmu;
        let dv_dsigma = (1.0 - eta) * dg_dsigma + eta * dl_dsigma;

        let z = alpha * d / (SQRT_2 * sigma);
        let s = 1.0 + erf(z);
        let ds_dz = FRAC_2_SQRT_PI * (-z * z).exp();
        let dz_dmu = -alpha / (SQRT_2 * sigma);
        let dz_dsigma = -alpha * d / (SQRT_2 * sigma2);
        let dz_dalpha = d / (SQRT_2 * sigma);

        [
            amp * (dv_dmu * s + v * ds_dz * dz_dmu),
            amp * (dv_dsigma * s + v * ds_dz * dz_dsigma),
            v * s,
            amp * (l - g) * s,
            amp * v * ds_dz * dz_dalpha,
        ]
    }

    /// The area of the Gaussian component for unit amplitude, $`\sigma\sqrt{2\pi}`$
    pub(crate) fn gaussian_unit_area(&self) -> f64 {
        self.sigma * (2.0 * PI).sqrt()
    }

    /// The area of the Lorentzian component for unit amplitude, $`\pi w`$
    pub(crate) fn lorentzian_unit_area(&self) -> f64 {
        PI * self.lorentzian_width()
    }
}
