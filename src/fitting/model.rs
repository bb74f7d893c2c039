use std::collections::{HashMap, HashSet};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

use super::{Background, BackgroundShape, BackgroundSpec, Bounded, ParameterKind, PeakShape, PeakSpec};

/// What a parameter belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ParameterTarget {
    /// The peak at this position in the model's peak list
    Peak(usize),
    Background,
}

/// Names one entry of the full parameter vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ParameterKey {
    pub target: ParameterTarget,
    pub kind: ParameterKind,
}

impl ParameterKey {
    pub fn peak(index: usize, kind: ParameterKind) -> Self {
        Self {
            target: ParameterTarget::Peak(index),
            kind,
        }
    }

    pub fn background(kind: ParameterKind) -> Self {
        Self {
            target: ParameterTarget::Background,
            kind,
        }
    }
}

/// The bijection between named parameters and positions in the parameter vector.
///
/// Peaks come first in their input order, each laid out as
/// `center, sigma, amplitude[, gamma][, skew]`, followed by the background's
/// `offset[, slope]`.
#[derive(Debug, Clone, Default)]
pub struct ParameterLayout {
    keys: Vec<ParameterKey>,
    bounds: Vec<Bounded>,
    index: HashMap<ParameterKey, usize>,
}

impl ParameterLayout {
    fn push(&mut self, key: ParameterKey, bounds: Bounded) {
        self.index.insert(key, self.keys.len());
        self.keys.push(key);
        self.bounds.push(bounds);
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn index_of(&self, key: &ParameterKey) -> Option<usize> {
        self.index.get(key).copied()
    }

    pub fn key_at(&self, index: usize) -> Option<ParameterKey> {
        self.keys.get(index).copied()
    }

    /// The seeded bounds for each position
    pub fn bounds(&self) -> &[Bounded] {
        &self.bounds
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &ParameterKey)> {
        self.keys.iter().enumerate()
    }
}

/// The sum of all peaks plus the background as one function of the full parameter vector
#[derive(Debug, Clone)]
pub struct CompositeModel {
    peaks: Vec<PeakSpec>,
    background: BackgroundSpec,
    layout: ParameterLayout,
}

impl CompositeModel {
    pub fn new(peaks: Vec<PeakSpec>, background: BackgroundSpec) -> Result<Self, ConfigurationError> {
        if peaks.is_empty() {
            return Err(ConfigurationError::NoRegions);
        }
        let mut seen = HashSet::new();
        for peak in peaks.iter() {
            if !seen.insert(peak.region_id.as_str()) {
                return Err(ConfigurationError::DuplicateRegion(peak.region_id.clone()));
            }
        }

        let mut layout = ParameterLayout::default();
        for (i, peak) in peaks.iter().enumerate() {
            for (kind, bounds) in peak.parameters() {
                layout.push(ParameterKey::peak(i, kind), bounds);
            }
        }
        for (kind, bounds) in background.parameters() {
            layout.push(ParameterKey::background(kind), bounds);
        }

        Ok(Self {
            peaks,
            background,
            layout,
        })
    }

    pub fn peaks(&self) -> &[PeakSpec] {
        &self.peaks
    }

    pub fn background(&self) -> &BackgroundSpec {
        &self.background
    }

    pub fn layout(&self) -> &ParameterLayout {
        &self.layout
    }

    pub fn n_params(&self) -> usize {
        self.layout.len()
    }

    /// A copy of this model whose background pivots around `reference`
    /// unless one was already chosen.
    pub fn anchored(&self, reference: f64) -> Self {
        let mut this = self.clone();
        if this.background.reference.is_none() {
            this.background.reference = Some(reference);
        }
        this
    }

    /// A human readable name like `"Pb 4f 1/2.center"` for position `index`
    pub fn parameter_name(&self, index: usize) -> Option<String> {
        let key = self.layout.key_at(index)?;
        let owner = match key.target {
            ParameterTarget::Peak(i) => self.peaks[i].region_id.as_str(),
            ParameterTarget::Background => "background",
        };
        Some(format!("{owner}.{}", key.kind))
    }

    fn value(&self, key: ParameterKey, params: &[f64]) -> f64 {
        self.layout
            .index_of(&key)
            .and_then(|i| params.get(i).copied())
            .unwrap_or_default()
    }

    /// The concrete shape of peak `index` under `params`. Parameters the peak's
    /// profile does not use are zero.
    pub fn peak_shape(&self, index: usize, params: &[f64]) -> PeakShape {
        let get = |kind| self.value(ParameterKey::peak(index, kind), params);
        PeakShape::new(
            get(ParameterKind::Center),
            get(ParameterKind::Sigma),
            get(ParameterKind::Amplitude),
            get(ParameterKind::Gamma),
            get(ParameterKind::Skew),
        )
    }

    pub fn background_at(&self, params: &[f64]) -> Background {
        let offset = self.value(ParameterKey::background(ParameterKind::Offset), params);
        let slope = match self.background.shape {
            BackgroundShape::Constant => 0.0,
            BackgroundShape::Linear => self.value(ParameterKey::background(ParameterKind::Slope), params),
        };
        Background::new(offset, slope, self.background.reference.unwrap_or_default())
    }

    /// All peak shapes under `params`, in peak order
    pub fn shapes(&self, params: &[f64]) -> Vec<PeakShape> {
        (0..self.peaks.len()).map(|i| self.peak_shape(i, params)).collect()
    }

    /// Predicted intensity at `x`
    pub fn evaluate(&self, x: f64, params: &[f64]) -> f64 {
        let background = self.background_at(params);
        self.shapes(params)
            .iter()
            .map(|p| p.density(x))
            .sum::<f64>()
            + background.evaluate(x)
    }

    pub fn predict(&self, xs: &[f64], params: &[f64]) -> Vec<f64> {
        let shapes = self.shapes(params);
        let background = self.background_at(params);
        xs.iter()
            .map(|x| shapes.iter().map(|p| p.density(*x)).sum::<f64>() + background.evaluate(*x))
            .collect()
    }

    /// Fill `out` with the partial derivatives of the prediction at `x` for every
    /// parameter, in layout order.
    pub fn gradient_into(&self, x: f64, shapes: &[PeakShape], background: &Background, out: &mut [f64]) {
        let mut cached: Option<(usize, [f64; 5])> = None;
        let background_grad = background.gradient(x);
        for (i, key) in self.layout.keys.iter().enumerate() {
            out[i] = match key.target {
                ParameterTarget::Peak(p) => {
                    let grad = match cached {
                        Some((q, grad)) if q == p => grad,
                        _ => {
                            let grad = shapes[p].gradient(x);
                            cached = Some((p, grad));
                            grad
                        }
                    };
                    match key.kind {
                        ParameterKind::Center => grad[0],
                        ParameterKind::Sigma => grad[1],
                        ParameterKind::Amplitude => grad[2],
                        ParameterKind::Gamma => grad[3],
                        ParameterKind::Skew => grad[4],
                        ParameterKind::Offset | ParameterKind::Slope => 0.0,
                    }
                }
                ParameterTarget::Background => match key.kind {
                    ParameterKind::Offset => background_grad[0],
                    ParameterKind::Slope => background_grad[1],
                    _ => 0.0,
                },
            };
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fitting::PeakProfile;

    fn doublet() -> Vec<PeakSpec> {
        vec![
            PeakSpec::new(
                "Pb 4f 7/2",
                Bounded::new(136.0, 136.9, 137.5),
                Bounded::new(0.3, 0.7, 2.0),
                Bounded::new(0.0, 1000.0, 5000.0),
            )
            .profile(PeakProfile::PseudoVoigt {
                gamma: Bounded::new(0.0, 0.2, 1.0),
            }),
            PeakSpec::new(
                "Pb 4f 5/2",
                Bounded::new(141.0, 141.8, 142.5),
                Bounded::new(0.3, 0.7, 2.0),
                Bounded::new(0.0, 750.0, 5000.0),
            ),
        ]
    }

    #[test]
    fn test_layout_is_a_bijection() {
        let model = CompositeModel::new(
            doublet(),
            BackgroundSpec::linear(Bounded::unbounded(5.0), Bounded::unbounded(0.0)),
        )
        .unwrap();
        assert_eq!(model.n_params(), 4 + 3 + 2);
        for (i, key) in model.layout().iter() {
            assert_eq!(model.layout().index_of(key), Some(i));
        }
        assert_eq!(
            model.layout().index_of(&ParameterKey::peak(1, ParameterKind::Center)),
            Some(4)
        );
        assert_eq!(model.parameter_name(3).as_deref(), Some("Pb 4f 7/2.gamma"));
        assert_eq!(model.parameter_name(8).as_deref(), Some("background.slope"));
        assert!(model.layout().index_of(&ParameterKey::peak(1, ParameterKind::Gamma)).is_none());
    }

    #[test]
    fn test_duplicate_and_empty() {
        let mut peaks = doublet();
        peaks[1].region_id = peaks[0].region_id.clone();
        assert_eq!(
            CompositeModel::new(peaks, BackgroundSpec::default()).unwrap_err(),
            ConfigurationError::DuplicateRegion("Pb 4f 7/2".into())
        );
        assert_eq!(
            CompositeModel::new(Vec::new(), BackgroundSpec::default()).unwrap_err(),
            ConfigurationError::NoRegions
        );
    }

    #[test]
    fn test_evaluate_sums_components() {
        let model = CompositeModel::new(doublet(), BackgroundSpec::default()).unwrap();
        let params = vec![136.9, 0.7, 1000.0, 0.2, 141.8, 0.7, 750.0, 12.0];
        let a = PeakShape::new(136.9, 0.7, 1000.0, 0.2, 0.0);
        let b = PeakShape::gaussian(141.8, 0.7, 750.0);
        for x in [135.0, 137.0, 140.0, 142.0] {
            let expected = a.density(x) + b.density(x) + 12.0;
            assert!((model.evaluate(x, &params) - expected).abs() < 1e-9);
        }
        let predicted = model.predict(&[137.0], &params);
        assert!((predicted[0] - model.evaluate(137.0, &params)).abs() < 1e-12);
    }

    #[test]
    fn test_gradient_layout() {
        let model = CompositeModel::new(
            doublet(),
            BackgroundSpec::linear(Bounded::unbounded(5.0), Bounded::unbounded(0.0)).reference(139.0),
        )
        .unwrap();
        let params = vec![136.9, 0.7, 1000.0, 0.2, 141.8, 0.7, 750.0, 12.0, 0.5];
        let shapes = model.shapes(&params);
        let bg = model.background_at(&params);
        let mut out = vec![0.0; model.n_params()];
        model.gradient_into(141.0, &shapes, &bg, &mut out);
        let h = 1e-6;
        for i in 0..model.n_params() {
            let mut up = params.clone();
            let mut down = params.clone();
            up[i] += h;
            down[i] -= h;
            let numeric = (model.evaluate(141.0, &up) - model.evaluate(141.0, &down)) / (2.0 * h);
            assert!(
                (out[i] - numeric).abs() < 1e-4 * (1.0 + numeric.abs()),
                "{:?}: {} vs {}",
                model.parameter_name(i),
                out[i],
                numeric
            );
        }
    }
}
