#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::integrate::AreaIntegrator;

/// Hyperparameters of the damped least squares optimizer
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FitConfig {
    /// The maximum number of iterations to attempt when fitting a model
    pub max_iter: usize,
    /// The relative reduction of the residual sum of squares between accepted steps
    /// below which the model is considered converged
    pub convergence: f64,
    /// The starting damping factor
    pub damping: f64,
    /// How much the damping grows after a rejected step and shrinks after an accepted one
    pub damping_factor: f64,
    /// Once damping exceeds this no step can make progress, and the current point is
    /// treated as stationary
    pub max_damping: f64,
    /// The floor damping shrinks to after accepted steps
    pub min_damping: f64,
    /// How fitted peaks are integrated
    pub integrator: AreaIntegrator,
}

impl FitConfig {
    /// The maximum number of iterations to attempt when fitting a model
    pub fn max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// The relative residual reduction at which to decide the model has converged
    pub fn convergence(mut self, convergence: f64) -> Self {
        self.convergence = convergence;
        self
    }

    pub fn damping(mut self, damping: f64) -> Self {
        self.damping = damping;
        self
    }

    pub fn damping_factor(mut self, damping_factor: f64) -> Self {
        self.damping_factor = damping_factor;
        self
    }

    pub fn max_damping(mut self, max_damping: f64) -> Self {
        self.max_damping = max_damping;
        self
    }

    pub fn min_damping(mut self, min_damping: f64) -> Self {
        self.min_damping = min_damping;
        self
    }

    pub fn integrator(mut self, integrator: AreaIntegrator) -> Self {
        self.integrator = integrator;
        self
    }
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            convergence: 1e-8,
            damping: 1e-3,
            damping_factor: 10.0,
            max_damping: 1e16,
            min_damping: 1e-12,
            integrator: AreaIntegrator::default(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_builder() {
        let config = FitConfig::default()
            .max_iter(50)
            .damping(1e-2)
            .max_damping(1e10)
            .min_damping(1e-6);
        assert_eq!(config.max_iter, 50);
        assert_eq!(config.damping, 1e-2);
        assert_eq!(config.max_damping, 1e10);
        assert_eq!(config.min_damping, 1e-6);
        assert_eq!(config.convergence, FitConfig::default().convergence);
    }
}
