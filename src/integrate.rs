//! Integrated peak areas from fitted parameters.
//!
//! Areas are computed from the fitted [`PeakShape`] rather than the sampled spectrum, so
//! they do not depend on the grid the spectrum was acquired on.
use std::f64::consts::{FRAC_1_SQRT_2, PI};

use libm::erfc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::fitting::PeakShape;

/// The narrowest integration window allowed for quadrature, in multiples of `sigma`
pub const MIN_HALF_WIDTH_SIGMAS: f64 = 10.0;

const MAX_DEPTH: usize = 48;
const INITIAL_PANELS: usize = 32;

/// How to turn a [`PeakShape`] into an area
#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AreaMethod {
    /// The closed form, see [`analytic_area`]
    #[default]
    Analytic,
    /// Adaptive Simpson quadrature over `center ± half_width_sigmas * sigma`
    Quadrature { half_width_sigmas: f64, tolerance: f64 },
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AreaIntegrator {
    pub method: AreaMethod,
}

impl AreaIntegrator {
    pub fn analytic() -> Self {
        Self {
            method: AreaMethod::Analytic,
        }
    }

    /// Numerical integration, with the window widened to at least
    /// [`MIN_HALF_WIDTH_SIGMAS`]
    pub fn quadrature(half_width_sigmas: f64, tolerance: f64) -> Self {
        Self {
            method: AreaMethod::Quadrature {
                half_width_sigmas: half_width_sigmas.max(MIN_HALF_WIDTH_SIGMAS),
                tolerance,
            },
        }
    }

    pub fn area(&self, shape: &PeakShape) -> f64 {
        match self.method {
            AreaMethod::Analytic => analytic_area(shape),
            AreaMethod::Quadrature {
                half_width_sigmas,
                tolerance,
            } => quadrature_area(shape, half_width_sigmas, tolerance),
        }
    }
}

/// The exact area under a skewed pseudo-Voigt peak
///
/// ```math
/// A = a\left[(1 - \gamma)\sigma\sqrt{2\pi} + \gamma\pi w\right]
/// ```
///
/// The skew factor adds nothing: $`G\,\text{erf}`$ and $`L\,\text{erf}`$ are odd about the
/// center and integrate to zero.
pub fn analytic_area(shape: &PeakShape) -> f64 {
    shape.amplitude
        * ((1.0 - shape.gamma) * shape.gaussian_unit_area() + shape.gamma * shape.lorentzian_unit_area())
}

/// The area of the symmetric profile lying further than `half_width` from the center
fn tail_area(shape: &PeakShape, half_width: f64) -> f64 {
    let w = shape.lorentzian_width();
    let gaussian_tail = shape.gaussian_unit_area() * erfc(half_width / shape.sigma * FRAC_1_SQRT_2);
    let lorentzian_tail = w * (PI - 2.0 * (half_width / w).atan());
    shape.amplitude * ((1.0 - shape.gamma) * gaussian_tail + shape.gamma * lorentzian_tail)
}

fn simpson(fa: f64, fm: f64, fb: f64, a: f64, b: f64) -> f64 {
    (b - a) / 6.0 * (fa + 4.0 * fm + fb)
}

#[allow(clippy::too_many_arguments)]
fn adaptive_simpson<F: Fn(f64) -> f64>(
    f: &F,
    a: f64,
    b: f64,
    fa: f64,
    fm: f64,
    fb: f64,
    whole: f64,
    tolerance: f64,
    depth: usize,
) -> f64 {
    let m = 0.5 * (a + b);
    let lm = 0.5 * (a + m);
    let rm = 0.5 * (m + b);
    let flm = f(lm);
    let frm = f(rm);
    let left = simpson(fa, flm, fm, a, m);
    let right = simpson(fm, frm, fb, m, b);
    let delta = left + right - whole;
    if depth == 0 || delta.abs() <= 15.0 * tolerance {
        left + right + delta / 15.0
    } else {
        adaptive_simpson(f, a, m, fa, flm, fm, left, tolerance / 2.0, depth - 1)
            + adaptive_simpson(f, m, b, fm, frm, fb, right, tolerance / 2.0, depth - 1)
    }
}

/// Integrate `f` over `[a, b]` to within roughly `tolerance`
pub fn integrate_simpson<F: Fn(f64) -> f64>(f: F, a: f64, b: f64, tolerance: f64) -> f64 {
    if a == b {
        return 0.0;
    }
    let step = (b - a) / INITIAL_PANELS as f64;
    let panel_tolerance = tolerance / INITIAL_PANELS as f64;
    (0..INITIAL_PANELS)
        .map(|i| {
            let lo = a + step * i as f64;
            let hi = if i + 1 == INITIAL_PANELS { b } else { lo + step };
            let mid = 0.5 * (lo + hi);
            let (flo, fmid, fhi) = (f(lo), f(mid), f(hi));
            let whole = simpson(flo, fmid, fhi, lo, hi);
            adaptive_simpson(&f, lo, hi, flo, fmid, fhi, whole, panel_tolerance, MAX_DEPTH)
        })
        .sum()
}

/// The area under `shape` by adaptive Simpson quadrature over `center ± k·sigma`,
/// `k >= 10`, plus the closed form area of the symmetric tails outside the window.
///
/// `tolerance` is relative to the analytic area.
pub fn quadrature_area(shape: &PeakShape, half_width_sigmas: f64, tolerance: f64) -> f64 {
    if shape.sigma <= 0.0 || shape.amplitude == 0.0 {
        return 0.0;
    }
    let half_width = half_width_sigmas.max(MIN_HALF_WIDTH_SIGMAS) * shape.sigma;
    let scale = analytic_area(shape).abs().max(f64::MIN_POSITIVE);
    let window = integrate_simpson(
        |x| shape.density(x),
        shape.center - half_width,
        shape.center + half_width,
        tolerance * scale,
    );
    window + tail_area(shape, half_width)
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::*;
    use crate::arrayops::{gridspace, trapz};

    #[rstest]
    #[case(PeakShape::gaussian(136.5, 0.8, 1000.0))]
    #[case(PeakShape::new(136.5, 0.8, 1000.0, 0.3, 0.0))]
    #[case(PeakShape::new(136.5, 0.8, 1000.0, 0.3, 0.7))]
    #[case(PeakShape::new(284.8, 0.35, 42.0, 1.0, -1.0))]
    fn test_analytic_matches_quadrature(#[case] shape: PeakShape) {
        let exact = analytic_area(&shape);
        let numeric = quadrature_area(&shape, 10.0, 1e-9);
        assert!(
            ((exact - numeric) / exact).abs() < 1e-6,
            "analytic {exact} quadrature {numeric}"
        );
    }

    #[test]
    fn test_gaussian_area() {
        let shape = PeakShape::gaussian(0.0, 1.0, 1.0);
        assert!((analytic_area(&shape) - (2.0 * PI).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_window_is_widened() {
        let integrator = AreaIntegrator::quadrature(3.0, 1e-8);
        assert_eq!(
            integrator.method,
            AreaMethod::Quadrature {
                half_width_sigmas: 10.0,
                tolerance: 1e-8
            }
        );
    }

    #[test]
    fn test_sampled_area_converges_to_analytic() {
        let shape = PeakShape::new(136.5, 0.8, 1000.0, 0.0, 0.5);
        let exact = AreaIntegrator::default().area(&shape);
        for step in [0.05, 0.01] {
            let xs: Vec<f64> = gridspace(126.5, 146.5, step);
            let ys = shape.predict(&xs);
            let sampled = trapz(&xs, &ys);
            assert!(((sampled - exact) / exact).abs() < 1e-3);
        }
    }

    #[test]
    fn test_degenerate_shapes() {
        assert_eq!(quadrature_area(&PeakShape::gaussian(0.0, 1.0, 0.0), 10.0, 1e-8), 0.0);
        assert_eq!(integrate_simpson(|x| x, 1.0, 1.0, 1e-8), 0.0);
        assert!((integrate_simpson(|x| x * x, 0.0, 3.0, 1e-10) - 9.0).abs() < 1e-9);
    }
}
