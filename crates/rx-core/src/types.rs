//! Common data types for the misID pipeline

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Prefix shared by every real-data sample name.
pub const DATA_PREFIX: &str = "DATA_";

/// Simulated samples with a known misidentified species.
///
/// PID efficiency maps are picked by species, so every simulated sample that enters the
/// pipeline must be listed here.
pub const SIMULATED_SAMPLES: &[(&str, Hadron)] = &[
    ("Bu_piplpimnKpl_eq_sqDalitz_DPC", Hadron::Pion),
    ("Bu_KplKplKmn_eq_sqDalitz_DPC", Hadron::Kaon),
    ("Bu_Kee_eq_btosllball05_DPC", Hadron::Electron),
    ("Bu_JpsiK_ee_eq_DPC", Hadron::Electron),
];

/// PID tagging region.
///
/// The first half of the name is the SS leg state, the second half the OS leg state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Region {
    /// SS leg passes, OS leg fails.
    PassFail,
    /// SS leg fails, OS leg passes.
    FailPass,
    /// Both legs fail.
    FailFail,
}

impl Region {
    /// All regions, in splitting order.
    pub const ALL: [Region; 3] = [Region::PassFail, Region::FailPass, Region::FailFail];

    /// Label stored in the `kind` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Region::PassFail => "PassFail",
            Region::FailPass => "FailPass",
            Region::FailFail => "FailFail",
        }
    }

    /// Whether the SS leg passes the lepton PID requirement in this region.
    pub fn ss_passes(self) -> bool {
        matches!(self, Region::PassFail)
    }

    /// Whether the OS leg passes the lepton PID requirement in this region.
    pub fn os_passes(self) -> bool {
        matches!(self, Region::FailPass)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Region {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PassFail" => Ok(Region::PassFail),
            "FailPass" => Ok(Region::FailPass),
            "FailFail" => Ok(Region::FailFail),
            other => Err(Error::InvalidRegionKind(other.to_string())),
        }
    }
}

/// Charge of the reference composite particle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChargeHypothesis {
    /// Positively charged reference (e.g. B+).
    Positive,
    /// Negatively charged reference (e.g. B-).
    Negative,
}

impl ChargeHypothesis {
    /// Both hypotheses.
    pub const ALL: [ChargeHypothesis; 2] = [ChargeHypothesis::Positive, ChargeHypothesis::Negative];

    /// Build from an "is positive" flag.
    pub fn from_positive(is_positive: bool) -> Self {
        if is_positive { ChargeHypothesis::Positive } else { ChargeHypothesis::Negative }
    }

    /// `+1.0` or `-1.0`.
    pub fn sign(self) -> f64 {
        match self {
            ChargeHypothesis::Positive => 1.0,
            ChargeHypothesis::Negative => -1.0,
        }
    }

    /// Label stored in the `bmeson` column.
    pub fn label(self) -> &'static str {
        match self {
            ChargeHypothesis::Positive => "bplus",
            ChargeHypothesis::Negative => "bminus",
        }
    }
}

impl fmt::Display for ChargeHypothesis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ChargeHypothesis {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "plus" | "positive" | "bplus" | "+" => Ok(ChargeHypothesis::Positive),
            "minus" | "negative" | "bminus" | "-" => Ok(ChargeHypothesis::Negative),
            other => Err(Error::Validation(format!("unknown charge hypothesis '{other}'"))),
        }
    }
}

/// Particle species that fakes a lepton.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hadron {
    /// Kaon
    Kaon,
    /// Pion
    Pion,
    /// Electron (used for the lepton-efficiency maps of signal-like simulation).
    Electron,
}

impl Hadron {
    /// Label stored in the `hadron` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Hadron::Kaon => "kaon",
            Hadron::Pion => "pion",
            Hadron::Electron => "electron",
        }
    }
}

impl fmt::Display for Hadron {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Hadron {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "kaon" | "K" => Ok(Hadron::Kaon),
            "pion" | "Pi" => Ok(Hadron::Pion),
            "electron" | "E" => Ok(Hadron::Electron),
            other => Err(Error::Validation(format!("unknown hadron species '{other}'"))),
        }
    }
}

/// Signal-region or control-region estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalMode {
    /// Extrapolate into the PID signal region.
    Signal,
    /// Stay in the PID control region.
    Control,
}

impl SignalMode {
    /// Build from an "is signal" flag.
    pub fn from_signal(is_signal: bool) -> Self {
        if is_signal { SignalMode::Signal } else { SignalMode::Control }
    }
}

impl fmt::Display for SignalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SignalMode::Signal => "signal",
            SignalMode::Control => "control",
        })
    }
}

/// Weighting category of a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleCategory {
    /// Real data.
    Data,
    /// Simulation where a hadron fakes the lepton.
    HadronMc,
    /// Simulation with genuine leptons.
    LeptonMc,
}

/// Validated sample identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SampleId {
    /// Real data, split into tagging regions.
    Data(String),
    /// Simulation with a fixed species, only charge-filtered.
    Simulated {
        /// Sample name.
        name: String,
        /// Species looked up in [`SIMULATED_SAMPLES`].
        hadron: Hadron,
    },
}

impl SampleId {
    /// Resolve a sample name.
    ///
    /// Names starting with [`DATA_PREFIX`] are data; anything else must be listed in
    /// [`SIMULATED_SAMPLES`].
    pub fn parse(name: &str) -> Result<Self> {
        if name.starts_with(DATA_PREFIX) {
            return Ok(SampleId::Data(name.to_string()));
        }
        SIMULATED_SAMPLES
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(n, h)| SampleId::Simulated { name: n.to_string(), hadron: *h })
            .ok_or_else(|| Error::UnrecognizedSample(name.to_string()))
    }

    /// Sample name.
    pub fn name(&self) -> &str {
        match self {
            SampleId::Data(name) | SampleId::Simulated { name, .. } => name,
        }
    }

    /// `true` for real data.
    pub fn is_data(&self) -> bool {
        matches!(self, SampleId::Data(_))
    }

    /// Species fixed by the sample, `None` for data.
    pub fn hadron(&self) -> Option<Hadron> {
        match self {
            SampleId::Data(_) => None,
            SampleId::Simulated { hadron, .. } => Some(*hadron),
        }
    }

    /// Category used to select the weighting rule.
    pub fn category(&self) -> SampleCategory {
        match self {
            SampleId::Data(_) => SampleCategory::Data,
            SampleId::Simulated { hadron: Hadron::Electron, .. } => SampleCategory::LeptonMc,
            SampleId::Simulated { .. } => SampleCategory::HadronMc,
        }
    }
}

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Selection parameters forwarded to the table source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputSelection {
    /// Sample name, e.g. `DATA_24_MagUp_24c2`.
    pub sample: String,
    /// Trigger line.
    pub trigger: String,
    /// q2 bin (`low`, `central`, `high`).
    #[serde(default = "default_q2bin")]
    pub q2bin: String,
    /// Data project, e.g. `nopid`.
    #[serde(default = "default_project")]
    pub project: String,
}

fn default_q2bin() -> String {
    "central".to_string()
}

fn default_project() -> String {
    "nopid".to_string()
}

impl InputSelection {
    /// Create a selection with default q2 bin and project.
    pub fn new(sample: impl Into<String>, trigger: impl Into<String>) -> Self {
        Self {
            sample: sample.into(),
            trigger: trigger.into(),
            q2bin: default_q2bin(),
            project: default_project(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_roundtrip_and_invalid_kind() {
        for r in Region::ALL {
            assert_eq!(r.as_str().parse::<Region>().unwrap(), r);
        }
        let err = "PassPass".parse::<Region>().unwrap_err();
        assert!(matches!(err, Error::InvalidRegionKind(k) if k == "PassPass"));
    }

    #[test]
    fn test_region_leg_states() {
        assert!(Region::PassFail.ss_passes() && !Region::PassFail.os_passes());
        assert!(!Region::FailPass.ss_passes() && Region::FailPass.os_passes());
        assert!(!Region::FailFail.ss_passes() && !Region::FailFail.os_passes());
    }

    #[test]
    fn test_sample_registry() {
        let data = SampleId::parse("DATA_24_MagUp_24c2").unwrap();
        assert!(data.is_data());
        assert_eq!(data.category(), SampleCategory::Data);
        assert_eq!(data.hadron(), None);

        let pions = SampleId::parse("Bu_piplpimnKpl_eq_sqDalitz_DPC").unwrap();
        assert_eq!(pions.hadron(), Some(Hadron::Pion));
        assert_eq!(pions.category(), SampleCategory::HadronMc);

        let ee = SampleId::parse("Bu_JpsiK_ee_eq_DPC").unwrap();
        assert_eq!(ee.category(), SampleCategory::LeptonMc);

        let err = SampleId::parse("Bu_Kmumu_eq_btosllball05_DPC").unwrap_err();
        assert!(matches!(err, Error::UnrecognizedSample(_)));
    }

    #[test]
    fn test_charge_hypothesis() {
        assert_eq!(ChargeHypothesis::from_positive(true).sign(), 1.0);
        assert_eq!(ChargeHypothesis::from_positive(false).sign(), -1.0);
        assert_eq!("minus".parse::<ChargeHypothesis>().unwrap(), ChargeHypothesis::Negative);
        assert_eq!(ChargeHypothesis::Positive.label(), "bplus");
    }

    #[test]
    fn test_hadron_labels_accept_short_names() {
        assert_eq!("K".parse::<Hadron>().unwrap(), Hadron::Kaon);
        assert_eq!("pion".parse::<Hadron>().unwrap(), Hadron::Pion);
        assert!("muon".parse::<Hadron>().is_err());
    }
}
