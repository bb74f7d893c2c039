//! Fit-then-quantify pipeline for one spectrum, and a batch runner for many.
//!
//! Every spectrum is analyzed independently, so a batch is dispatched across a thread pool
//! when the `parallelism` feature is enabled. A failure in one task is reported in that
//! task's slot and does not affect the others.
use std::borrow::Cow;

use log::debug;
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{ConfigurationError, FitError, ValidationError};
use crate::fitting::{
    self, BackgroundSpec, CancellationToken, CompositeModel, ConstraintManager, FitConfig, FitOutcome, FitResult,
    FitStatistics, Fitter, ParameterEstimate, PeakShapeKind, PeakSpec,
};
use crate::quantify::{self, ConcentrationResult, QuantConfig, RsfTable};
use crate::spectrum::{Spectrum, SpectrumCollection, SpectrumFilter};

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),
    #[error("invalid configuration: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("fit failed: {0}")]
    Fit(#[from] FitError),
}

/// Settings for the whole pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AnalysisConfig {
    pub fit: FitConfig,
    pub quant: QuantConfig,
    pub background: BackgroundSpec,
}

impl AnalysisConfig {
    pub fn fit(mut self, fit: FitConfig) -> Self {
        self.fit = fit;
        self
    }

    pub fn quant(mut self, quant: QuantConfig) -> Self {
        self.quant = quant;
        self
    }

    pub fn background(mut self, background: BackgroundSpec) -> Self {
        self.background = background;
        self
    }
}

/// One row of an analysis report
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RegionReport {
    pub region_id: String,
    pub kind: PeakShapeKind,
    pub center: ParameterEstimate,
    pub sigma: ParameterEstimate,
    pub amplitude: ParameterEstimate,
    pub gamma: ParameterEstimate,
    pub skew: ParameterEstimate,
    pub area: f64,
    /// Absent when no sensitivity factors were supplied or the region had none
    pub atomic_percent: Option<f64>,
    pub converged: bool,
}

/// The fit and, when sensitivity factors were given, the quantification of one spectrum
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SpectrumAnalysis {
    pub spectrum_name: String,
    pub fit: FitResult,
    pub concentrations: Option<ConcentrationResult>,
}

impl SpectrumAnalysis {
    pub fn regions(&self) -> Vec<RegionReport> {
        self.fit
            .peaks
            .iter()
            .map(|peak| RegionReport {
                region_id: peak.region_id.clone(),
                kind: peak.kind,
                center: peak.center,
                sigma: peak.sigma,
                amplitude: peak.amplitude,
                gamma: peak.gamma,
                skew: peak.skew,
                area: peak.area,
                atomic_percent: self
                    .concentrations
                    .as_ref()
                    .and_then(|c| c.atomic_percent(&peak.region_id)),
                converged: self.fit.converged,
            })
            .collect()
    }

    pub fn statistics(&self) -> &FitStatistics {
        &self.fit.statistics
    }

    pub fn converged(&self) -> bool {
        self.fit.converged
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AnalysisOutcome {
    Completed(SpectrumAnalysis),
    Cancelled { iterations: usize },
}

impl AnalysisOutcome {
    pub fn completed(self) -> Option<SpectrumAnalysis> {
        match self {
            Self::Completed(analysis) => Some(analysis),
            Self::Cancelled { .. } => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Validate `peaks`, fit them to `spectrum` and quantify the fitted areas if `rsf` is given
pub fn analyze(
    spectrum: &Spectrum<'_>,
    peaks: &[PeakSpec],
    rsf: Option<&RsfTable>,
    config: &AnalysisConfig,
    cancellation: Option<&CancellationToken>,
) -> Result<AnalysisOutcome, AnalysisError> {
    fitting::validate(peaks, &config.background)?;
    let model = CompositeModel::new(peaks.to_vec(), config.background)?;
    let constraints = ConstraintManager::from_validated(&model);

    let mut fitter = Fitter::new(&model, config.fit);
    if let Some(token) = cancellation {
        fitter = fitter.with_cancellation(token.clone());
    }
    let fit = match fitter.fit(spectrum, &constraints)? {
        FitOutcome::Completed(fit) => fit,
        FitOutcome::Cancelled { iterations } => return Ok(AnalysisOutcome::Cancelled { iterations }),
    };

    let concentrations = rsf
        .map(|table| quantify::compute(&fit, table, config.quant))
        .transpose()?;

    Ok(AnalysisOutcome::Completed(SpectrumAnalysis {
        spectrum_name: spectrum.name().to_string(),
        fit,
        concentrations,
    }))
}

/// One unit of batch work
#[derive(Debug, Clone)]
pub struct AnalysisTask<'a> {
    pub spectrum: Spectrum<'a>,
    pub peaks: Cow<'a, [PeakSpec]>,
}

impl<'a> AnalysisTask<'a> {
    pub fn new(spectrum: Spectrum<'a>, peaks: impl Into<Cow<'a, [PeakSpec]>>) -> Self {
        Self {
            spectrum,
            peaks: peaks.into(),
        }
    }
}

pub type TaskResult = Result<AnalysisOutcome, AnalysisError>;

/// Runs many independent analyses, sharing one set of sensitivity factors, configuration
/// and cancellation flag
#[derive(Debug, Clone, Default)]
pub struct BatchAnalyzer {
    config: AnalysisConfig,
    rsf: Option<RsfTable>,
    /// Worker threads to use, `0` for the thread pool's default
    jobs: usize,
    cancellation: CancellationToken,
}

impl BatchAnalyzer {
    pub fn new(config: AnalysisConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn rsf(mut self, rsf: RsfTable) -> Self {
        self.rsf = Some(rsf);
        self
    }

    pub fn jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    /// A handle that stops every running and pending task when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn run_one(&self, task: &AnalysisTask<'_>) -> TaskResult {
        let result = analyze(
            &task.spectrum,
            &task.peaks,
            self.rsf.as_ref(),
            &self.config,
            Some(&self.cancellation),
        );
        if let Err(err) = &result {
            debug!("Analysis of '{}' failed: {err}", task.spectrum.name());
        }
        result
    }

    fn run_sequential(&self, tasks: &[AnalysisTask<'_>]) -> Vec<TaskResult> {
        tasks.iter().map(|task| self.run_one(task)).collect()
    }

    /// Analyze every task, returning results in task order
    pub fn run(&self, tasks: &[AnalysisTask<'_>]) -> Vec<TaskResult> {
        debug!("Analyzing {} spectra", tasks.len());
        self.dispatch(tasks)
    }

    /// Analyze every spectrum in `collection` matching `filter` against the same seeds,
    /// pairing each result with the spectrum's name
    pub fn run_collection(
        &self,
        collection: &SpectrumCollection<'_>,
        filter: &SpectrumFilter,
        peaks: &[PeakSpec],
    ) -> Vec<(String, TaskResult)> {
        let tasks: Vec<AnalysisTask<'_>> = collection
            .select(filter)
            .map(|spectrum| AnalysisTask::new(spectrum.borrow(), peaks))
            .collect();
        let results = self.run(&tasks);
        tasks
            .iter()
            .map(|task| task.spectrum.name().to_string())
            .zip(results)
            .collect()
    }
}

// cfg-if only expands to items
cfg_if::cfg_if! {
    if #[cfg(feature = "parallelism")] {
        use rayon::prelude::*;

        impl BatchAnalyzer {
            fn dispatch(&self, tasks: &[AnalysisTask<'_>]) -> Vec<TaskResult> {
                match rayon::ThreadPoolBuilder::new().num_threads(self.jobs).build() {
                    Ok(pool) => pool.install(|| tasks.par_iter().map(|task| self.run_one(task)).collect()),
                    Err(err) => {
                        log::warn!("Failed to build a thread pool, running sequentially: {err}");
                        self.run_sequential(tasks)
                    }
                }
            }
        }
    } else {
        impl BatchAnalyzer {
            fn dispatch(&self, tasks: &[AnalysisTask<'_>]) -> Vec<TaskResult> {
                self.run_sequential(tasks)
            }
        }
    }
}
