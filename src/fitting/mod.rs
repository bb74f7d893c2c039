//! Constrained multi-peak fitting of XPS spectra.
//!
//! A fit session is built from a list of [`PeakSpec`] seeds and a [`BackgroundSpec`]:
//!
//! 1. [`CompositeModel`] sums every peak and the background into one function of a
//!    flat parameter vector, laid out by [`ParameterLayout`].
//! 2. [`ConstraintManager`] validates the seeded `(min, init, max)` triples and turns
//!    them into bound vectors aligned with that layout.
//! 3. [`Fitter`] runs a projected Levenberg-Marquardt search within those bounds and
//!    produces a [`FitResult`], or [`FitOutcome::Cancelled`] if its
//!    [`CancellationToken`] was set.
//!
//! The only peak shape is the skewed pseudo-Voigt [`PeakShape`]. Plain Gaussian and
//! pseudo-Voigt peaks are the same function with the mixing and skew parameters held
//! at zero, chosen per peak with [`PeakProfile`].
//!
//! # Example
//!
//! ```rust
//! use xpsfit::fitting::{
//!     fit, BackgroundSpec, Bounded, CompositeModel, ConstraintManager, FitConfig, PeakProfile, PeakShape,
//!     PeakSpec,
//! };
//! use xpsfit::spectrum::Spectrum;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let truth = PeakShape::new(284.8, 0.5, 300.0, 0.2, 0.0);
//! let xs: Vec<f64> = (0..200).map(|i| 280.0 + i as f64 * 0.05).collect();
//! let ys: Vec<f64> = xs.iter().map(|x| truth.density(*x) + 10.0).collect();
//! let spectrum = Spectrum::new(xs, ys)?;
//!
//! let seed = PeakSpec::new(
//!     "C 1s",
//!     Bounded::new(284.0, 284.6, 285.5),
//!     Bounded::new(0.2, 0.8, 2.0),
//!     Bounded::new(0.0, 200.0, 1000.0),
//! )
//! .profile(PeakProfile::PseudoVoigt { gamma: Bounded::new(0.0, 0.5, 1.0) });
//!
//! let model = CompositeModel::new(vec![seed], BackgroundSpec::default())?;
//! let constraints = ConstraintManager::new(&model)?;
//! let result = fit(&spectrum, &model, &constraints, FitConfig::default())?
//!     .completed()
//!     .expect("not cancelled");
//! assert!((result.peaks[0].center.value - 284.8).abs() < 0.01);
//! # Ok(())
//! # }
//! ```

mod background;
mod config;
mod constraints;
mod fitter;
mod model;
mod params;
mod result;
mod shapes;

pub use background::{Background, BackgroundShape, BackgroundSpec};
pub use config::FitConfig;
pub use constraints::{validate, ConstraintManager};
pub use fitter::{fit, CancellationToken, FitOutcome, Fitter};
pub use model::{CompositeModel, ParameterKey, ParameterLayout, ParameterTarget};
pub use params::{Bounded, ParameterKind, PeakProfile, PeakSpec};
pub use result::{BackgroundFitResult, FitResult, FitStatistics, ParameterEstimate, PeakFitResult};
pub use shapes::{PeakShape, PeakShapeKind, FWHM_FACTOR, LORENTZIAN_HWHM_FACTOR};
