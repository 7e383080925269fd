//! Observed emission-line measurements for one target.

use std::collections::BTreeMap;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::FitError;

/// Measurement status of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Detection {
    /// A measured flux with a 1σ uncertainty.
    Detected,
    /// `flux` is an upper limit; the model is penalised only above it.
    UpperLimit,
    /// Not covered or not usable; contributes nothing.
    NotObserved,
}

impl Detection {
    /// Parse the free-form flag values found in measurement tables.
    pub fn parse_flag(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "detected" | "det" | "d" | "1" => Some(Detection::Detected),
            "upper_limit" | "upper-limit" | "ul" | "limit" | "u" => Some(Detection::UpperLimit),
            "not_observed" | "not-observed" | "none" | "n" | "0" => Some(Detection::NotObserved),
            _ => None,
        }
    }

    /// Whether the line can enter the cost at all.
    pub fn is_usable(self) -> bool {
        !matches!(self, Detection::NotObserved)
    }
}

/// One line measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineObservation {
    pub flux: f64,
    pub uncertainty: f64,
    pub detection: Detection,
}

impl LineObservation {
    pub fn detected(flux: f64, uncertainty: f64) -> Self {
        Self {
            flux,
            uncertainty,
            detection: Detection::Detected,
        }
    }

    pub fn upper_limit(limit: f64, uncertainty: f64) -> Self {
        Self {
            flux: limit,
            uncertainty,
            detection: Detection::UpperLimit,
        }
    }

    pub fn not_observed() -> Self {
        Self {
            flux: 0.0,
            uncertainty: 0.0,
            detection: Detection::NotObserved,
        }
    }

    /// Signal-to-noise ratio.
    pub fn snr(&self) -> f64 {
        self.flux / self.uncertainty
    }

    fn validate(&self, line: &str) -> Result<(), FitError> {
        if !self.detection.is_usable() {
            return Ok(());
        }
        if !self.flux.is_finite() {
            return Err(FitError::InvalidObservation {
                line: line.to_string(),
                reason: format!("flux {} is not finite", self.flux),
            });
        }
        if !(self.uncertainty.is_finite() && self.uncertainty > 0.0) {
            return Err(FitError::InvalidObservation {
                line: line.to_string(),
                reason: format!("uncertainty {} must be finite and > 0", self.uncertainty),
            });
        }
        Ok(())
    }
}

/// What to do with detected lines below the S/N threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum LowSnrPolicy {
    /// Drop the line from the fit.
    Exclude,
    /// Keep it as an upper limit at `min_snr × σ`.
    UpperLimit,
}

/// All line measurements for one target.
///
/// Lines are kept sorted by id so iteration (and therefore the floating-point
/// summation order of the cost) is deterministic.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ObservedSpectrum {
    id: String,
    lines: BTreeMap<String, LineObservation>,
}

impl ObservedSpectrum {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            lines: BTreeMap::new(),
        }
    }

    /// Add (or replace) a line measurement after validating it.
    pub fn insert(
        &mut self,
        line: impl Into<String>,
        obs: LineObservation,
    ) -> Result<(), FitError> {
        let line = line.into();
        obs.validate(&line)?;
        self.lines.insert(line, obs);
        Ok(())
    }

    /// Builder-style [`ObservedSpectrum::insert`].
    pub fn with_line(
        mut self,
        line: impl Into<String>,
        obs: LineObservation,
    ) -> Result<Self, FitError> {
        self.insert(line, obs)?;
        Ok(self)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn get(&self, line: &str) -> Option<&LineObservation> {
        self.lines.get(line)
    }

    pub fn lines(&self) -> impl Iterator<Item = (&str, &LineObservation)> {
        self.lines.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Number of lines with the given status.
    pub fn count(&self, detection: Detection) -> usize {
        self.lines.values().filter(|o| o.detection == detection).count()
    }

    /// Keep only the listed lines; everything else is dropped.
    pub fn retain_lines(&mut self, keep: &[String]) {
        self.lines.retain(|line, _| keep.iter().any(|k| k == line));
    }

    /// Demote weak detections (flux/σ ≤ `min_snr`) according to `policy`.
    ///
    /// Returns the ids of the lines that were changed.
    pub fn apply_snr_threshold(&mut self, min_snr: f64, policy: LowSnrPolicy) -> Vec<String> {
        let mut changed = Vec::new();
        if !(min_snr.is_finite() && min_snr > 0.0) {
            return changed;
        }
        for (line, obs) in self.lines.iter_mut() {
            if obs.detection != Detection::Detected || obs.snr() > min_snr {
                continue;
            }
            *obs = match policy {
                LowSnrPolicy::Exclude => LineObservation::not_observed(),
                LowSnrPolicy::UpperLimit => {
                    LineObservation::upper_limit(min_snr * obs.uncertainty, obs.uncertainty)
                }
            };
            changed.push(line.clone());
        }
        changed
    }

    /// Synthesise an unresolved doublet `into` from its components `a` and `b`.
    ///
    /// Does nothing if `into` is already present or a component is missing.
    /// Fluxes add, uncertainties add in quadrature; the blend is a detection
    /// only when both components are detected, an upper limit if either is a
    /// limit, and not observed otherwise.
    pub fn blend_doublet(&mut self, a: &str, b: &str, into: &str) -> bool {
        if self.lines.contains_key(into) {
            return false;
        }
        let (Some(oa), Some(ob)) = (self.lines.get(a).copied(), self.lines.get(b).copied()) else {
            return false;
        };

        let detection = match (oa.detection, ob.detection) {
            (Detection::Detected, Detection::Detected) => Detection::Detected,
            (Detection::NotObserved, _) | (_, Detection::NotObserved) => Detection::NotObserved,
            _ => Detection::UpperLimit,
        };
        let blend = match detection {
            Detection::NotObserved => LineObservation::not_observed(),
            _ => LineObservation {
                flux: oa.flux + ob.flux,
                uncertainty: oa.uncertainty.hypot(ob.uncertainty),
                detection,
            },
        };

        self.lines.remove(a);
        self.lines.remove(b);
        self.lines.insert(into.to_string(), blend);
        true
    }
}
