//! `xpsfit` decomposes X-ray photoemission spectra into overlapping peaks by constrained
//! nonlinear least squares and converts the fitted peak areas into atomic concentrations
//! using relative sensitivity factors.
//!
//! The pieces compose in one direction:
//!
//! 1. A [`Spectrum`] holds binding energy and intensity arrays plus provenance metadata.
//! 2. Seed [`PeakSpec`]s, usually read with [`text::parse_seed_table`], describe each
//!    peak's `(min, init, max)` bounds and line shape.
//! 3. [`fitting`] builds a [`CompositeModel`] from the seeds and fits it with a projected
//!    Levenberg-Marquardt search, producing a [`FitResult`].
//! 4. [`integrate`] turns fitted peaks into areas and [`quantify`] turns areas into
//!    atomic percentages with an [`RsfTable`].
//!
//! [`analysis`] wires these steps together for one spectrum, and [`BatchAnalyzer`] runs
//! many spectra in parallel.
//!
//! # Usage
//! ```
//! use xpsfit::prelude::*;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let truth = PeakShape::new(136.5, 0.8, 1000.0, 0.3, 0.0);
//! let xs: Vec<f64> = (0..200).map(|i| 130.0 + 0.05 * i as f64).collect();
//! let ys: Vec<f64> = xs.iter().map(|x| truth.density(*x)).collect();
//! let spectrum = Spectrum::new(xs, ys)?;
//!
//! let seeds = xpsfit::text::parse_seed_table(
//!     "Pb 4f 1/2,136.5,136.0,137.0,0.8,0.3,2.0,1000,0,5000,60,0.3,0,1,0,-1,1",
//! )?;
//! let rsf = RsfTable::new([("Pb 4f 1/2", 5.678)])?;
//!
//! let analysis = analyze(&spectrum, &seeds, Some(&rsf), &AnalysisConfig::default(), None)?
//!     .completed()
//!     .expect("not cancelled");
//! for region in analysis.regions() {
//!     println!("{} {:.2}%", region.region_id, region.atomic_percent.unwrap_or_default());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//! - `parallelism`, on by default, runs [`BatchAnalyzer`] tasks on a `rayon` thread pool.
//! - `serde` derives `Serialize` and `Deserialize` for configuration and result types.
pub mod analysis;
pub mod arrayops;
pub mod error;
pub mod fitting;
pub mod integrate;
pub mod prelude;
pub mod quantify;
pub mod spectrum;
pub mod text;

pub use crate::analysis::{analyze, AnalysisConfig, AnalysisError, AnalysisOutcome, BatchAnalyzer};
pub use crate::arrayops::{gridspace, trapz};
pub use crate::error::{ConfigurationError, FitError, ValidationError};
pub use crate::fitting::{
    fit, CancellationToken, CompositeModel, ConstraintManager, FitConfig, FitOutcome, FitResult, PeakShape,
    PeakSpec,
};
pub use crate::integrate::AreaIntegrator;
pub use crate::quantify::{compute, ConcentrationResult, QuantConfig, RsfTable};
pub use crate::spectrum::{Spectrum, SpectrumMetadata};
