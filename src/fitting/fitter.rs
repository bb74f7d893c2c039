use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use log::{debug, trace};
use nalgebra::{DMatrix, DVector};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::FitError;
use crate::spectrum::Spectrum;

use super::{
    BackgroundFitResult, BackgroundShape, CompositeModel, ConstraintManager, FitConfig, FitResult, FitStatistics,
    ParameterEstimate, ParameterKey, ParameterKind, PeakFitResult,
};

/// Diagonal entries of the curvature matrix are floored at this before scaling the damping
const DIAGONAL_FLOOR: f64 = 1e-12;

/// A shared flag that asks running fits to stop at their next iteration boundary
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// How a fit ended when it did not fail outright
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FitOutcome {
    Completed(FitResult),
    /// The cancellation token was set, no partial result is kept
    Cancelled { iterations: usize },
}

impl FitOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    pub fn completed(self) -> Option<FitResult> {
        match self {
            Self::Completed(result) => Some(result),
            Self::Cancelled { .. } => None,
        }
    }

    pub fn as_completed(&self) -> Option<&FitResult> {
        match self {
            Self::Completed(result) => Some(result),
            Self::Cancelled { .. } => None,
        }
    }
}

/// The normal equations of the linearized problem over the free parameters
struct NormalEquations {
    jtj: DMatrix<f64>,
    jtr: DVector<f64>,
}

/// Fits a [`CompositeModel`] to a [`Spectrum`] with a projected Levenberg-Marquardt
/// search inside the box constraints.
///
/// Each trial point is clamped into bounds before it is evaluated. Steps that do not
/// reduce the residual sum of squares are rejected and the damping raised, steps that
/// do are accepted and the damping relaxed.
#[derive(Debug, Clone)]
pub struct Fitter<'m> {
    model: &'m CompositeModel,
    config: FitConfig,
    cancellation: Option<CancellationToken>,
}

impl<'m> Fitter<'m> {
    pub fn new(model: &'m CompositeModel, config: FitConfig) -> Self {
        Self {
            model,
            config,
            cancellation: None,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .map(|c| c.is_cancelled())
            .unwrap_or_default()
    }

    fn rss(model: &CompositeModel, spectrum: &Spectrum<'_>, params: &[f64]) -> f64 {
        let shapes = model.shapes(params);
        let background = model.background_at(params);
        spectrum
            .iter()
            .map(|(x, y)| {
                let fx = shapes.iter().map(|p| p.density(x)).sum::<f64>() + background.evaluate(x);
                (y - fx).powi(2)
            })
            .sum()
    }

    fn normal_equations(
        model: &CompositeModel,
        spectrum: &Spectrum<'_>,
        params: &[f64],
        free: &[usize],
    ) -> NormalEquations {
        let m = free.len();
        let shapes = model.shapes(params);
        let background = model.background_at(params);
        let mut jtj = DMatrix::<f64>::zeros(m, m);
        let mut jtr = DVector::<f64>::zeros(m);
        let mut gradient = vec![0.0; model.n_params()];
        let mut row = vec![0.0; m];

        for (x, y) in spectrum.iter() {
            let fx = shapes.iter().map(|p| p.density(x)).sum::<f64>() + background.evaluate(x);
            let r = y - fx;
            model.gradient_into(x, &shapes, &background, &mut gradient);
            for (slot, i) in row.iter_mut().zip(free) {
                *slot = gradient[*i];
            }
            for a in 0..m {
                jtr[a] += row[a] * r;
                for b in a..m {
                    jtj[(a, b)] += row[a] * row[b];
                }
            }
        }
        for a in 0..m {
            for b in 0..a {
                jtj[(a, b)] = jtj[(b, a)];
            }
        }
        NormalEquations { jtj, jtr }
    }

    /// Solve the damped system, `None` when it is not positive definite
    fn damped_step(eqs: &NormalEquations, damping: f64) -> Option<DVector<f64>> {
        let mut a = eqs.jtj.clone();
        for i in 0..a.nrows() {
            a[(i, i)] += damping * eqs.jtj[(i, i)].max(DIAGONAL_FLOOR);
        }
        let step = a.cholesky()?.solve(&eqs.jtr);
        step.iter().all(|v| v.is_finite()).then_some(step)
    }

    fn check_inputs(&self, spectrum: &Spectrum<'_>, constraints: &ConstraintManager) -> Result<(), FitError> {
        let n = spectrum.len();
        if n < 2 {
            return Err(FitError::TooFewPoints(n));
        }
        let span = spectrum.span();
        if !(span.is_finite() && span > 0.0) {
            return Err(FitError::DegenerateEnergyRange);
        }
        let expected = self.model.n_params();
        let (initial, lower, upper) = (
            constraints.initial().len(),
            constraints.lower().len(),
            constraints.upper().len(),
        );
        if initial != expected || lower != expected || upper != expected {
            return Err(FitError::ParameterLengthMismatch {
                expected,
                initial,
                lower,
                upper,
            });
        }
        Ok(())
    }

    /// Fit the model to `spectrum` starting from the constraint manager's initial point
    pub fn fit(&self, spectrum: &Spectrum<'_>, constraints: &ConstraintManager) -> Result<FitOutcome, FitError> {
        self.check_inputs(spectrum, constraints)?;

        let model = self.model.anchored(spectrum.midpoint());
        let config = &self.config;
        let mut params = constraints.initial().to_vec();
        constraints.project(&mut params);
        let free = constraints.free_indices();

        let mut cost = Self::rss(&model, spectrum, &params);
        if !cost.is_finite() {
            return Err(FitError::NonFiniteInitialCost);
        }
        debug!(
            "Fitting {} peak(s) to {} points with {} of {} parameters free, initial RSS {cost:0.4e}",
            model.peaks().len(),
            spectrum.len(),
            free.len(),
            model.n_params(),
        );

        let mut damping = config.damping;
        let mut converged = false;
        let mut iterations = 0;

        while iterations < config.max_iter {
            if self.is_cancelled() {
                debug!("Fit cancelled after {iterations} iterations");
                return Ok(FitOutcome::Cancelled { iterations });
            }
            if free.is_empty() || cost == 0.0 {
                converged = true;
                break;
            }
            iterations += 1;

            let eqs = Self::normal_equations(&model, spectrum, &params, &free);
            let mut accepted = false;
            while damping <= config.max_damping {
                let Some(step) = Self::damped_step(&eqs, damping) else {
                    damping *= config.damping_factor;
                    continue;
                };
                let mut trial = params.clone();
                for (delta, i) in step.iter().zip(free.iter()) {
                    trial[*i] += delta;
                }
                constraints.project(&mut trial);
                let trial_cost = Self::rss(&model, spectrum, &trial);

                if trial_cost.is_finite() && trial_cost < cost {
                    let reduction = (cost - trial_cost) / cost;
                    params = trial;
                    cost = trial_cost;
                    damping = (damping / config.damping_factor).max(config.min_damping);
                    accepted = true;
                    if reduction < config.convergence {
                        converged = true;
                    }
                    break;
                }
                damping *= config.damping_factor;
            }
            trace!("Iteration {iterations}: RSS {cost:0.6e}, damping {damping:0.2e}, accepted {accepted}");

            if !accepted {
                debug!("No downhill step remains at damping {damping:0.2e}, treating as stationary");
                converged = true;
                break;
            }
            if converged {
                break;
            }
        }

        if !converged {
            debug!(
                "Fit did not converge within {} iterations, RSS {cost:0.4e}",
                config.max_iter
            );
        } else {
            debug!("Fit converged after {iterations} iterations, RSS {cost:0.4e}");
        }

        let result = self.build_result(&model, spectrum, constraints, params, &free, cost, converged, iterations);
        Ok(FitOutcome::Completed(result))
    }

    fn standard_errors(
        model: &CompositeModel,
        spectrum: &Spectrum<'_>,
        params: &[f64],
        free: &[usize],
        rss: f64,
    ) -> Vec<Option<f64>> {
        let mut stderr = vec![None; params.len()];
        let n = spectrum.len();
        if free.is_empty() || n <= free.len() {
            return stderr;
        }
        let s2 = rss / (n - free.len()) as f64;
        let eqs = Self::normal_equations(model, spectrum, params, free);
        let Some(inverse) = eqs.jtj.cholesky().map(|c| c.inverse()) else {
            debug!("Curvature matrix is singular, standard errors are unavailable");
            return stderr;
        };
        for (a, i) in free.iter().enumerate() {
            let variance = s2 * inverse[(a, a)];
            if variance.is_finite() && variance >= 0.0 {
                stderr[*i] = Some(variance.sqrt());
            }
        }
        stderr
    }

    #[allow(clippy::too_many_arguments)]
    fn build_result(
        &self,
        model: &CompositeModel,
        spectrum: &Spectrum<'_>,
        constraints: &ConstraintManager,
        params: Vec<f64>,
        free: &[usize],
        rss: f64,
        converged: bool,
        iterations: usize,
    ) -> FitResult {
        let stderr = Self::standard_errors(model, spectrum, &params, free, rss);
        let layout = model.layout();
        let estimate = |key: ParameterKey| match layout.index_of(&key) {
            Some(i) => ParameterEstimate::new(params[i], stderr[i], !constraints.is_fixed(i)),
            None => ParameterEstimate::fixed(0.0),
        };

        let peaks = model
            .peaks()
            .iter()
            .enumerate()
            .map(|(i, spec)| {
                let shape = model.peak_shape(i, &params);
                PeakFitResult {
                    region_id: spec.region_id.clone(),
                    kind: spec.profile.kind(),
                    center: estimate(ParameterKey::peak(i, ParameterKind::Center)),
                    sigma: estimate(ParameterKey::peak(i, ParameterKind::Sigma)),
                    amplitude: estimate(ParameterKey::peak(i, ParameterKind::Amplitude)),
                    gamma: estimate(ParameterKey::peak(i, ParameterKind::Gamma)),
                    skew: estimate(ParameterKey::peak(i, ParameterKind::Skew)),
                    area: self.config.integrator.area(&shape),
                    total_time: spec.total_time,
                }
            })
            .collect();

        let background = BackgroundFitResult {
            shape: model.background().shape,
            offset: estimate(ParameterKey::background(ParameterKind::Offset)),
            slope: match model.background().shape {
                BackgroundShape::Constant => ParameterEstimate::fixed(0.0),
                BackgroundShape::Linear => estimate(ParameterKey::background(ParameterKind::Slope)),
            },
            reference: model.background_at(&params).reference,
        };

        let n = spectrum.len();
        let tss = spectrum.null_residuals();
        let statistics = FitStatistics {
            rss,
            reduced_chi_square: (n > free.len()).then(|| rss / (n - free.len()) as f64),
            r_squared: if tss > 0.0 { 1.0 - rss / tss } else if rss == 0.0 { 1.0 } else { 0.0 },
            n_points: n,
            n_free: free.len(),
        };

        FitResult {
            peaks,
            background,
            statistics,
            converged,
            iterations,
            parameters: params,
            stderr,
        }
    }
}

/// Fit `model` to `spectrum` within `constraints` without cancellation
pub fn fit(
    spectrum: &Spectrum<'_>,
    model: &CompositeModel,
    constraints: &ConstraintManager,
    config: FitConfig,
) -> Result<FitOutcome, FitError> {
    Fitter::new(model, config).fit(spectrum, constraints)
}

#[cfg(test)]
mod test {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rstest::{fixture, rstest};

    use super::*;
    use crate::arrayops::gridspace;
    use crate::fitting::{BackgroundSpec, Bounded, PeakProfile, PeakShape, PeakSpec};

    fn pb_4f_seed() -> PeakSpec {
        PeakSpec::new(
            "Pb 4f 1/2",
            Bounded::from_seed(136.5, 136.0, 137.0),
            Bounded::from_seed(0.8, 0.3, 2.0),
            Bounded::from_seed(1000.0, 0.0, 5000.0),
        )
        .profile(PeakProfile::SkewedPseudoVoigt {
            gamma: Bounded::from_seed(0.3, 0.0, 1.0),
            skew: Bounded::from_seed(0.0, -1.0, 1.0),
        })
    }

    #[fixture]
    fn pb_4f_spectrum() -> Spectrum<'static> {
        let truth = PeakShape::new(136.62, 0.72, 1180.0, 0.25, 0.2);
        let xs: Vec<f64> = gridspace(130.0, 140.0, 0.05);
        let ys: Vec<f64> = xs.iter().map(|x| truth.density(*x) + 20.0).collect();
        Spectrum::new(xs, ys).unwrap()
    }

    #[rstest]
    #[test_log::test]
    fn test_pb_4f_fit(pb_4f_spectrum: Spectrum<'static>) {
        let model = CompositeModel::new(vec![pb_4f_seed()], BackgroundSpec::default()).unwrap();
        let constraints = ConstraintManager::new(&model).unwrap();
        let result = fit(&pb_4f_spectrum, &model, &constraints, FitConfig::default())
            .unwrap()
            .completed()
            .unwrap();

        assert!(result.converged);
        let peak = result.peak("Pb 4f 1/2").unwrap();
        assert!((peak.center.value - 136.62).abs() < 0.05, "{:?}", peak.center);
        assert!((peak.sigma.value - 0.72).abs() / 0.72 < 0.01);
        assert!((peak.amplitude.value - 1180.0).abs() / 1180.0 < 0.01);
        assert!((result.background.offset.value - 20.0).abs() < 0.5);
        assert!(result.statistics.r_squared > 0.9999);
        assert!(peak.center.stderr.is_some());
        assert!(peak.area > 0.0);
    }

    #[rstest]
    fn test_fit_is_idempotent(pb_4f_spectrum: Spectrum<'static>) {
        let model = CompositeModel::new(vec![pb_4f_seed()], BackgroundSpec::default()).unwrap();
        let constraints = ConstraintManager::new(&model).unwrap();
        let first = fit(&pb_4f_spectrum, &model, &constraints, FitConfig::default()).unwrap();
        let second = fit(&pb_4f_spectrum, &model, &constraints, FitConfig::default()).unwrap();
        assert_eq!(first, second);
    }

    #[rstest]
    #[test_log::test]
    fn test_refit_from_result_is_stable(pb_4f_spectrum: Spectrum<'static>) {
        let model = CompositeModel::new(vec![pb_4f_seed()], BackgroundSpec::default()).unwrap();
        let constraints = ConstraintManager::new(&model).unwrap();
        let first = fit(&pb_4f_spectrum, &model, &constraints, FitConfig::default())
            .unwrap()
            .completed()
            .unwrap();
        let reseeded = constraints.clone().with_initial(&first.parameters);
        let second = fit(&pb_4f_spectrum, &model, &reseeded, FitConfig::default())
            .unwrap()
            .completed()
            .unwrap();
        assert!(second.converged);
        for (a, b) in first.parameters.iter().zip(second.parameters.iter()) {
            assert!((a - b).abs() <= 1e-6 * (1.0 + a.abs()), "{a} vs {b}");
        }
        assert!(second.statistics.rss <= first.statistics.rss * (1.0 + 1e-9));
    }

    /// Uniform noise of up to 1% of the amplitude. Gamma is the loosest parameter since
    /// the Lorentzian share mostly shows in the tails, where the noise dominates.
    #[test_log::test]
    fn test_recovers_parameters_from_noisy_data() {
        let truth = PeakShape::new(136.5, 0.8, 1000.0, 0.3, 0.0);
        let mut rng = StdRng::seed_from_u64(4242);
        let xs: Vec<f64> = gridspace(130.0, 140.0, 0.05);
        let ys: Vec<f64> = xs
            .iter()
            .map(|x| truth.density(*x) + rng.gen_range(-10.0..=10.0))
            .collect();
        let spectrum = Spectrum::new(xs, ys).unwrap();

        let model = CompositeModel::new(vec![pb_4f_seed()], BackgroundSpec::default()).unwrap();
        let constraints = ConstraintManager::new(&model).unwrap();
        let result = fit(&spectrum, &model, &constraints, FitConfig::default())
            .unwrap()
            .completed()
            .unwrap();
        assert!(result.converged);

        let peak = result.peak("Pb 4f 1/2").unwrap();
        assert!((peak.center.value - truth.center).abs() < 0.05, "{:?}", peak.center);
        assert!((peak.sigma.value - truth.sigma).abs() / truth.sigma < 0.03, "{:?}", peak.sigma);
        assert!(
            (peak.amplitude.value - truth.amplitude).abs() / truth.amplitude < 0.03,
            "{:?}",
            peak.amplitude
        );
        assert!((peak.gamma.value - truth.gamma).abs() < 0.1, "{:?}", peak.gamma);
        assert!(result.background.offset.value.abs() < 5.0);
        assert!(result.statistics.r_squared > 0.99);
    }

    #[test_log::test]
    fn test_recovers_doublet_with_linear_background() {
        let a = PeakShape::new(136.9, 0.6, 900.0, 0.2, 0.0);
        let b = PeakShape::new(141.8, 0.6, 650.0, 0.2, 0.0);
        let xs: Vec<f64> = gridspace(132.0, 146.0, 0.04);
        let ys: Vec<f64> = xs
            .iter()
            .map(|x| a.density(*x) + b.density(*x) + 50.0 + 2.0 * (x - 139.0))
            .collect();
        let spectrum = Spectrum::new(xs.clone(), ys).unwrap();
        let mid = spectrum.midpoint();

        let seed = |label: &str, center: f64, amp: f64| {
            PeakSpec::new(
                label,
                Bounded::new(center - 0.6, center + 0.2, center + 0.6),
                Bounded::new(0.2, 0.9, 2.0),
                Bounded::new(0.0, amp, 5000.0),
            )
            .profile(PeakProfile::PseudoVoigt {
                gamma: Bounded::new(0.0, 0.5, 1.0),
            })
        };
        let model = CompositeModel::new(
            vec![seed("Pb 4f 7/2", 136.9, 500.0), seed("Pb 4f 5/2", 141.8, 500.0)],
            BackgroundSpec::linear(Bounded::unbounded(0.0), Bounded::unbounded(0.0)),
        )
        .unwrap();
        let constraints = ConstraintManager::new(&model).unwrap();
        let result = fit(&spectrum, &model, &constraints, FitConfig::default())
            .unwrap()
            .completed()
            .unwrap();
        assert!(result.converged);

        for (label, truth) in [("Pb 4f 7/2", a), ("Pb 4f 5/2", b)] {
            let peak = result.peak(label).unwrap();
            assert!((peak.center.value - truth.center).abs() < 0.01);
            assert!((peak.sigma.value - truth.sigma).abs() / truth.sigma < 0.01);
            assert!((peak.amplitude.value - truth.amplitude).abs() / truth.amplitude < 0.01);
            assert!((peak.gamma.value - truth.gamma).abs() < 0.01);
            assert_eq!(peak.skew, ParameterEstimate::fixed(0.0));
        }
        assert_eq!(result.background.reference, mid);
        assert!((result.background.slope.value - 2.0).abs() < 0.01);
        for x in [133.0, 139.0, 145.0] {
            let expected = a.density(x) + b.density(x) + 50.0 + 2.0 * (x - 139.0);
            assert!((result.evaluate(x) - expected).abs() / expected < 1e-3);
        }
    }

    #[test]
    fn test_degenerate_spectra_are_rejected() {
        let model = CompositeModel::new(vec![pb_4f_seed()], BackgroundSpec::default()).unwrap();
        let constraints = ConstraintManager::new(&model).unwrap();
        let empty = Spectrum::new(Vec::new(), Vec::new()).unwrap();
        assert_eq!(
            fit(&empty, &model, &constraints, FitConfig::default()).unwrap_err(),
            FitError::TooFewPoints(0)
        );
        let single = Spectrum::new(vec![136.0], vec![10.0]).unwrap();
        assert_eq!(
            fit(&single, &model, &constraints, FitConfig::default()).unwrap_err(),
            FitError::TooFewPoints(1)
        );
    }

    #[rstest]
    fn test_parameter_length_mismatch(pb_4f_spectrum: Spectrum<'static>) {
        let model = CompositeModel::new(vec![pb_4f_seed()], BackgroundSpec::default()).unwrap();
        let constraints = ConstraintManager::from_vectors(vec![136.5, 0.8], vec![136.0, 0.3], vec![137.0, 2.0]).unwrap();
        assert_eq!(
            fit(&pb_4f_spectrum, &model, &constraints, FitConfig::default()).unwrap_err(),
            FitError::ParameterLengthMismatch {
                expected: 6,
                initial: 2,
                lower: 2,
                upper: 2
            }
        );
    }

    #[rstest]
    fn test_iteration_cap_reports_not_converged(pb_4f_spectrum: Spectrum<'static>) {
        let model = CompositeModel::new(vec![pb_4f_seed()], BackgroundSpec::default()).unwrap();
        let constraints = ConstraintManager::new(&model).unwrap();
        let result = fit(&pb_4f_spectrum, &model, &constraints, FitConfig::default().max_iter(1))
            .unwrap()
            .completed()
            .unwrap();
        assert!(!result.converged);
        assert_eq!(result.iterations, 1);
        let initial_rss = Fitter::rss(&model.anchored(pb_4f_spectrum.midpoint()), &pb_4f_spectrum, constraints.initial());
        assert!(result.statistics.rss < initial_rss);
    }

    #[rstest]
    fn test_cancellation(pb_4f_spectrum: Spectrum<'static>) {
        let model = CompositeModel::new(vec![pb_4f_seed()], BackgroundSpec::default()).unwrap();
        let constraints = ConstraintManager::new(&model).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let outcome = Fitter::new(&model, FitConfig::default())
            .with_cancellation(token.clone())
            .fit(&pb_4f_spectrum, &constraints)
            .unwrap();
        assert_eq!(outcome, FitOutcome::Cancelled { iterations: 0 });
        assert!(token.is_cancelled());
    }

    #[rstest]
    fn test_fixed_parameters_do_not_move(pb_4f_spectrum: Spectrum<'static>) {
        let mut seed = pb_4f_seed();
        seed.center = Bounded::fixed(136.62);
        let model = CompositeModel::new(vec![seed], BackgroundSpec::default()).unwrap();
        let constraints = ConstraintManager::new(&model).unwrap();
        let result = fit(&pb_4f_spectrum, &model, &constraints, FitConfig::default())
            .unwrap()
            .completed()
            .unwrap();
        let peak = &result.peaks[0];
        assert_eq!(peak.center.value, 136.62);
        assert!(!peak.center.vary);
        assert!(peak.center.stderr.is_none());
        assert_eq!(result.statistics.n_free, 5);
    }
}
