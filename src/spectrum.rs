//! Canonical in-memory spectra, their provenance metadata, and indexed collections.
//!
//! A [`Spectrum`] is what the file-format readers hand to the fitting engine. The engine
//! only reads the binding-energy and intensity arrays; [`SpectrumMetadata`] is carried
//! along for provenance and for selecting spectra out of a [`SpectrumCollection`] with
//! [`SpectrumFilter`] predicates.
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use thiserror::Error;

use crate::arrayops::trapz;

/// All the ways building a spectrum can fail
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SpectrumError {
    #[error("binding energy array length ({energy}) does not match intensity array length ({intensity})")]
    LengthMismatch { energy: usize, intensity: usize },
    #[error("binding energy axis is not strictly monotonic at index {index}")]
    NotMonotonic { index: usize },
    #[error("non-finite {field} value at index {index}")]
    NonFinite { field: &'static str, index: usize },
    #[error("block data has {actual} values, expected {expected}")]
    BlockShapeMismatch { expected: usize, actual: usize },
    #[error("axis '{0}' needs at least two distinct points to integrate along")]
    DegenerateAxis(String),
    #[error("a spectrum named '{0}' is already in the collection")]
    DuplicateName(String),
}

/// Failure to read a typed value out of the open settings mapping
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SettingError {
    #[error("setting '{key}' holds {found}, expected {expected}")]
    WrongType {
        key: String,
        expected: &'static str,
        found: &'static str,
    },
}

/// A scalar value of an in-situ condition or other additional setting.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SettingValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl SettingValue {
    /// Interpret a raw string as an integer, then as a float, falling back to text.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Ok(i) = raw.parse::<i64>() {
            Self::Integer(i)
        } else if let Ok(f) = raw.parse::<f64>() {
            Self::Float(f)
        } else {
            Self::Text(raw.to_string())
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::Integer(_) => "an integer",
            Self::Float(_) => "a float",
            Self::Text(_) => "text",
        }
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for SettingValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<i64> for SettingValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<&str> for SettingValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Provenance information for a [`Spectrum`]. None of it is read by the fitter.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SpectrumMetadata {
    pub name: String,
    /// Acquisition time in seconds relative to an experiment-defined origin
    pub acquisition_time: Option<f64>,
    /// X-ray source power in watts
    pub xray_power: Option<f64>,
    pub instrument: Option<String>,
    /// Open mapping of additional settings, typed lazily on access
    pub settings: BTreeMap<String, SettingValue>,
}

impl SpectrumMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn acquisition_time(mut self, time: f64) -> Self {
        self.acquisition_time = Some(time);
        self
    }

    pub fn xray_power(mut self, power: f64) -> Self {
        self.xray_power = Some(power);
        self
    }

    pub fn instrument(mut self, instrument: impl Into<String>) -> Self {
        self.instrument = Some(instrument.into());
        self
    }

    pub fn setting(mut self, key: impl Into<String>, value: impl Into<SettingValue>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    /// Read a numeric setting. A missing key is `Ok(None)`, a text value is an error.
    pub fn setting_f64(&self, key: &str) -> Result<Option<f64>, SettingError> {
        match self.settings.get(key) {
            None => Ok(None),
            Some(value) => value.as_f64().map(Some).ok_or_else(|| SettingError::WrongType {
                key: key.to_string(),
                expected: "a number",
                found: value.type_name(),
            }),
        }
    }

    /// Read a text setting. A missing key is `Ok(None)`, a numeric value is an error.
    pub fn setting_str(&self, key: &str) -> Result<Option<&str>, SettingError> {
        match self.settings.get(key) {
            None => Ok(None),
            Some(value) => value.as_str().map(Some).ok_or_else(|| SettingError::WrongType {
                key: key.to_string(),
                expected: "text",
                found: value.type_name(),
            }),
        }
    }
}

/// A one dimensional XPS trace of intensity over binding energy.
///
/// The binding energy axis is strictly increasing or strictly decreasing. Arrays may be
/// borrowed from a reader's buffers or owned.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Spectrum<'a> {
    binding_energy: Cow<'a, [f64]>,
    intensity: Cow<'a, [f64]>,
    pub metadata: SpectrumMetadata,
}

impl<'a> Spectrum<'a> {
    pub fn new(
        binding_energy: impl Into<Cow<'a, [f64]>>,
        intensity: impl Into<Cow<'a, [f64]>>,
    ) -> Result<Self, SpectrumError> {
        let binding_energy = binding_energy.into();
        let intensity = intensity.into();
        if binding_energy.len() != intensity.len() {
            return Err(SpectrumError::LengthMismatch {
                energy: binding_energy.len(),
                intensity: intensity.len(),
            });
        }
        if let Some(index) = binding_energy.iter().position(|x| !x.is_finite()) {
            return Err(SpectrumError::NonFinite {
                field: "binding energy",
                index,
            });
        }
        if let Some(index) = intensity.iter().position(|y| !y.is_finite()) {
            return Err(SpectrumError::NonFinite {
                field: "intensity",
                index,
            });
        }
        if binding_energy.len() > 1 {
            let ascending = binding_energy[1] > binding_energy[0];
            for (i, pair) in binding_energy.windows(2).enumerate() {
                let ok = if ascending {
                    pair[1] > pair[0]
                } else {
                    pair[1] < pair[0]
                };
                if !ok {
                    return Err(SpectrumError::NotMonotonic { index: i + 1 });
                }
            }
        }
        Ok(Self {
            binding_energy,
            intensity,
            metadata: SpectrumMetadata::default(),
        })
    }

    pub fn with_metadata(mut self, metadata: SpectrumMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn binding_energy(&self) -> &[f64] {
        &self.binding_energy
    }

    pub fn intensity(&self) -> &[f64] {
        &self.intensity
    }

    pub fn len(&self) -> usize {
        self.binding_energy.len()
    }

    pub fn is_empty(&self) -> bool {
        self.binding_energy.is_empty()
    }

    pub fn is_ascending(&self) -> bool {
        match (self.binding_energy.first(), self.binding_energy.last()) {
            (Some(a), Some(b)) => b >= a,
            _ => true,
        }
    }

    /// The `(lowest, highest)` binding energy covered, if any.
    pub fn energy_range(&self) -> Option<(f64, f64)> {
        let first = *self.binding_energy.first()?;
        let last = *self.binding_energy.last()?;
        Some((first.min(last), first.max(last)))
    }

    /// The width of the binding energy range, zero for fewer than two points.
    pub fn span(&self) -> f64 {
        self.energy_range().map(|(lo, hi)| hi - lo).unwrap_or_default()
    }

    pub fn midpoint(&self) -> f64 {
        self.energy_range()
            .map(|(lo, hi)| (lo + hi) / 2.0)
            .unwrap_or_default()
    }

    pub fn get(&self, index: usize) -> Option<(f64, f64)> {
        Some((*self.binding_energy.get(index)?, *self.intensity.get(index)?))
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = (f64, f64)> + '_ {
        self.binding_energy
            .iter()
            .copied()
            .zip(self.intensity.iter().copied())
    }

    /// Create a new [`Spectrum`] that borrows its arrays from this one
    pub fn borrow(&self) -> Spectrum<'_> {
        Spectrum {
            binding_energy: Cow::Borrowed(self.binding_energy.deref()),
            intensity: Cow::Borrowed(self.intensity.deref()),
            metadata: self.metadata.clone(),
        }
    }

    /// Select the points whose binding energy lies within `[low, high]`, borrowing from `self`.
    pub fn window(&self, low: f64, high: f64) -> Spectrum<'_> {
        let (low, high) = if low <= high { (low, high) } else { (high, low) };
        let energies = self.binding_energy.deref();
        let (start, end) = if self.is_ascending() {
            (
                energies.partition_point(|x| *x < low),
                energies.partition_point(|x| *x <= high),
            )
        } else {
            (
                energies.partition_point(|x| *x > high),
                energies.partition_point(|x| *x >= low),
            )
        };
        let end = end.max(start);
        Spectrum {
            binding_energy: Cow::Borrowed(&energies[start..end]),
            intensity: Cow::Borrowed(&self.intensity[start..end]),
            metadata: self.metadata.clone(),
        }
    }

    /// Compute the "null model" residuals $`\sum_i(y_i - \bar{y})^2`$
    pub fn null_residuals(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let mean = self.intensity.iter().sum::<f64>() / self.len() as f64;
        self.intensity.iter().map(|y| (y - mean).powi(2)).sum()
    }

    /// Integrate the raw signal with the trapezoid rule. This depends on the sampling
    /// grid and includes the background, unlike fitted peak areas.
    pub fn integrate(&self) -> f64 {
        trapz(&self.binding_energy, &self.intensity).abs()
    }

    pub fn into_owned(self) -> Spectrum<'static> {
        Spectrum {
            binding_energy: Cow::Owned(self.binding_energy.into_owned()),
            intensity: Cow::Owned(self.intensity.into_owned()),
            metadata: self.metadata,
        }
    }
}

/// A dense two dimensional acquisition block, binding energy by some secondary axis such
/// as detector Y-scale or sequence iteration, stored row-major by energy.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SpectralBlock {
    pub binding_energy: Vec<f64>,
    pub secondary_name: String,
    pub secondary: Vec<f64>,
    pub data: Vec<f64>,
    pub metadata: SpectrumMetadata,
}

impl SpectralBlock {
    pub fn new(
        binding_energy: Vec<f64>,
        secondary_name: impl Into<String>,
        secondary: Vec<f64>,
        data: Vec<f64>,
    ) -> Result<Self, SpectrumError> {
        let expected = binding_energy.len() * secondary.len();
        if data.len() != expected {
            return Err(SpectrumError::BlockShapeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            binding_energy,
            secondary_name: secondary_name.into(),
            secondary,
            data,
            metadata: SpectrumMetadata::default(),
        })
    }

    pub fn with_metadata(mut self, metadata: SpectrumMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// The intensities along the secondary axis at energy index `index`
    pub fn row(&self, index: usize) -> &[f64] {
        let width = self.secondary.len();
        &self.data[index * width..(index + 1) * width]
    }

    /// Collapse the secondary axis by trapezoid integration normalized by the axis span,
    /// i.e. the mean signal along that axis.
    pub fn integrate_secondary(&self) -> Result<Spectrum<'static>, SpectrumError> {
        let span = match (self.secondary.first(), self.secondary.last()) {
            (Some(a), Some(b)) if self.secondary.len() > 1 && a != b => b - a,
            _ => return Err(SpectrumError::DegenerateAxis(self.secondary_name.clone())),
        };
        let intensity: Vec<f64> = (0..self.binding_energy.len())
            .map(|i| trapz(&self.secondary, self.row(i)) / span)
            .collect();
        Ok(Spectrum::new(self.binding_energy.clone(), intensity)?.with_metadata(self.metadata.clone()))
    }
}

/// A predicate over spectrum metadata used to select spectra out of a [`SpectrumCollection`]
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SpectrumFilter {
    /// Spectrum name contains this text
    Name(String),
    Instrument(String),
    /// Acquisition time within `[start, end]`
    AcquiredBetween(f64, f64),
    SettingEquals(String, SettingValue),
    /// A numeric setting within `[min, max]`
    SettingInRange(String, f64, f64),
    All(Vec<SpectrumFilter>),
    Any(Vec<SpectrumFilter>),
    Not(Box<SpectrumFilter>),
}

impl SpectrumFilter {
    pub fn matches(&self, spectrum: &Spectrum<'_>) -> bool {
        let meta = &spectrum.metadata;
        match self {
            Self::Name(text) => meta.name.contains(text.as_str()),
            Self::Instrument(name) => meta.instrument.as_deref() == Some(name.as_str()),
            Self::AcquiredBetween(start, end) => meta
                .acquisition_time
                .is_some_and(|t| *start <= t && t <= *end),
            Self::SettingEquals(key, value) => meta.settings.get(key) == Some(value),
            Self::SettingInRange(key, min, max) => matches!(
                meta.setting_f64(key),
                Ok(Some(v)) if *min <= v && v <= *max
            ),
            Self::All(filters) => filters.iter().all(|f| f.matches(spectrum)),
            Self::Any(filters) => filters.iter().any(|f| f.matches(spectrum)),
            Self::Not(filter) => !filter.matches(spectrum),
        }
    }

    pub fn and(self, other: SpectrumFilter) -> Self {
        match self {
            Self::All(mut filters) => {
                filters.push(other);
                Self::All(filters)
            }
            this => Self::All(vec![this, other]),
        }
    }

    pub fn or(self, other: SpectrumFilter) -> Self {
        match self {
            Self::Any(mut filters) => {
                filters.push(other);
                Self::Any(filters)
            }
            this => Self::Any(vec![this, other]),
        }
    }

    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }
}

/// An ordered set of spectra indexed by name
#[derive(Debug, Default, Clone)]
pub struct SpectrumCollection<'a> {
    spectra: Vec<Spectrum<'a>>,
    by_name: BTreeMap<String, usize>,
}

impl<'a> SpectrumCollection<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, spectrum: Spectrum<'a>) -> Result<(), SpectrumError> {
        let name = spectrum.name().to_string();
        if self.by_name.contains_key(&name) {
            return Err(SpectrumError::DuplicateName(name));
        }
        self.by_name.insert(name, self.spectra.len());
        self.spectra.push(spectrum);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Spectrum<'a>> {
        self.by_name.get(name).map(|i| &self.spectra[*i])
    }

    pub fn len(&self) -> usize {
        self.spectra.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spectra.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Spectrum<'a>> {
        self.spectra.iter()
    }

    /// Iterate over the spectra matching `filter` in insertion order
    pub fn select<'s, 'f>(
        &'s self,
        filter: &'f SpectrumFilter,
    ) -> impl Iterator<Item = &'s Spectrum<'a>> + 'f
    where
        's: 'f,
    {
        self.spectra.iter().filter(move |s| filter.matches(s))
    }

    /// The spectra matching `filter` that have an acquisition time, ordered by that time
    pub fn time_series(&self, filter: &SpectrumFilter) -> Vec<&Spectrum<'a>> {
        let mut series: Vec<_> = self
            .spectra
            .iter()
            .filter(|s| filter.matches(s) && s.metadata.acquisition_time.is_some())
            .collect();
        series.sort_by(|a, b| {
            let ta = a.metadata.acquisition_time.unwrap_or_default();
            let tb = b.metadata.acquisition_time.unwrap_or_default();
            ta.total_cmp(&tb)
        });
        series
    }
}

impl<'a> FromIterator<Spectrum<'a>> for SpectrumCollection<'a> {
    /// Later spectra with an already seen name are dropped
    fn from_iter<T: IntoIterator<Item = Spectrum<'a>>>(iter: T) -> Self {
        let mut this = Self::new();
        for spectrum in iter {
            if let Err(err) = this.push(spectrum) {
                log::warn!("Skipping spectrum: {err}");
            }
        }
        this
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn named(name: &str, time: f64, temperature: f64) -> Spectrum<'static> {
        Spectrum::new(vec![1.0, 2.0, 3.0], vec![1.0, 2.0, 1.0])
            .unwrap()
            .with_metadata(
                SpectrumMetadata::new(name)
                    .acquisition_time(time)
                    .instrument("Scienta R4000")
                    .setting("temperature", temperature)
                    .setting("gas", "O2"),
            )
    }

    #[test]
    fn test_construction_errors() {
        assert_eq!(
            Spectrum::new(vec![1.0, 2.0], vec![1.0]).unwrap_err(),
            SpectrumError::LengthMismatch {
                energy: 2,
                intensity: 1
            }
        );
        assert_eq!(
            Spectrum::new(vec![1.0, 2.0, 2.0], vec![1.0, 1.0, 1.0]).unwrap_err(),
            SpectrumError::NotMonotonic { index: 2 }
        );
        assert!(matches!(
            Spectrum::new(vec![1.0, f64::NAN], vec![1.0, 1.0]),
            Err(SpectrumError::NonFinite { index: 1, .. })
        ));
        assert!(Spectrum::new(Vec::new(), Vec::new()).unwrap().is_empty());
        let descending = Spectrum::new(vec![3.0, 2.0, 1.0], vec![0.0; 3]).unwrap();
        assert!(!descending.is_ascending());
        assert_eq!(descending.energy_range(), Some((1.0, 3.0)));
    }

    #[test]
    fn test_window() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [1.0, 2.0, 3.0, 4.0, 5.0];
        let s = Spectrum::new(&x[..], &y[..]).unwrap();
        let w = s.window(2.0, 4.0);
        assert_eq!(w.binding_energy(), &[2.0, 3.0, 4.0]);

        let xr = [5.0, 4.0, 3.0, 2.0, 1.0];
        let s = Spectrum::new(&xr[..], &y[..]).unwrap();
        let w = s.window(4.5, 1.5);
        assert_eq!(w.binding_energy(), &[4.0, 3.0, 2.0]);
        assert_eq!(w.intensity(), &[2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_settings_are_typed_lazily() {
        assert_eq!(SettingValue::parse("12"), SettingValue::Integer(12));
        assert_eq!(SettingValue::parse(" 1.5e-3 "), SettingValue::Float(1.5e-3));
        assert_eq!(SettingValue::parse("argon"), SettingValue::Text("argon".into()));

        let s = named("a", 0.0, 300.0);
        assert_eq!(s.metadata.setting_f64("temperature"), Ok(Some(300.0)));
        assert_eq!(s.metadata.setting_f64("pressure"), Ok(None));
        assert_eq!(s.metadata.setting_str("gas"), Ok(Some("O2")));
        assert!(matches!(
            s.metadata.setting_f64("gas"),
            Err(SettingError::WrongType { .. })
        ));
    }

    #[test]
    fn test_filters_and_collection() {
        let collection: SpectrumCollection = vec![
            named("Pb4f_run3", 30.0, 500.0),
            named("Pb4f_run1", 10.0, 300.0),
            named("O1s_run1", 12.0, 300.0),
            named("Pb4f_run2", 20.0, 400.0),
        ]
        .into_iter()
        .collect();
        assert_eq!(collection.len(), 4);
        assert!(collection.get("O1s_run1").is_some());

        let filter = SpectrumFilter::Name("Pb4f".into())
            .and(SpectrumFilter::SettingInRange("temperature".into(), 350.0, 600.0));
        let names: Vec<_> = collection.select(&filter).map(|s| s.name()).collect();
        assert_eq!(names, vec!["Pb4f_run3", "Pb4f_run2"]);

        let series = collection.time_series(&SpectrumFilter::Name("Pb4f".into()));
        let names: Vec<_> = series.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["Pb4f_run1", "Pb4f_run2", "Pb4f_run3"]);

        let hot: Vec<&Spectrum> = {
            let filter = SpectrumFilter::SettingInRange("temperature".into(), 450.0, 600.0);
            collection.select(&filter).collect()
        };
        assert_eq!(hot.len(), 1);
        assert_eq!(hot[0].name(), "Pb4f_run3");

        let early = SpectrumFilter::AcquiredBetween(0.0, 15.0);
        assert_eq!(collection.select(&early).count(), 2);
        assert_eq!(collection.select(&early.clone().negate()).count(), 2);
        let o2 = SpectrumFilter::SettingEquals("gas".into(), SettingValue::from("O2"));
        assert_eq!(collection.select(&o2).count(), 4);

        let mut collection = collection;
        assert_eq!(
            collection.push(named("Pb4f_run1", 0.0, 0.0)),
            Err(SpectrumError::DuplicateName("Pb4f_run1".into()))
        );
    }

    #[test]
    fn test_block_integration() {
        let block = SpectralBlock::new(
            vec![624.0, 625.0],
            "Y-Scale [mm]",
            vec![0.0, 1.0],
            vec![1.0, 2.0, 3.0, 4.0],
        )
        .unwrap();
        let spectrum = block.integrate_secondary().unwrap();
        assert_eq!(spectrum.intensity(), &[1.5, 3.5]);

        let uneven = SpectralBlock::new(
            vec![624.0],
            "Seq. Iteration",
            vec![1.0, 2.0, 4.0],
            vec![2.0, 4.0, 4.0],
        )
        .unwrap();
        let spectrum = uneven.integrate_secondary().unwrap();
        assert!((spectrum.intensity()[0] - 11.0 / 3.0).abs() < 1e-12);

        let flat = SpectralBlock::new(vec![1.0], "Y", vec![0.0], vec![1.0]).unwrap();
        assert!(matches!(
            flat.integrate_secondary(),
            Err(SpectrumError::DegenerateAxis(_))
        ));
        assert!(SpectralBlock::new(vec![1.0], "Y", vec![0.0, 1.0], vec![1.0]).is_err());
    }
}
