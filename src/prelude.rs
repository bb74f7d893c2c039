//! The types most analyses need, for glob import.
pub use crate::analysis::{
    analyze, AnalysisConfig, AnalysisOutcome, AnalysisTask, BatchAnalyzer, RegionReport, SpectrumAnalysis,
};
pub use crate::error::{ConfigurationError, FitError, ValidationError};
pub use crate::fitting::{
    BackgroundShape, BackgroundSpec, Bounded, CancellationToken, CompositeModel, ConstraintManager, FitConfig,
    FitOutcome, FitResult, Fitter, PeakProfile, PeakShape, PeakSpec,
};
pub use crate::integrate::{AreaIntegrator, AreaMethod};
pub use crate::quantify::{QuantConfig, RsfTable};
pub use crate::spectrum::{Spectrum, SpectrumCollection, SpectrumFilter, SpectrumMetadata};
