//! YAML configuration for the misID pipeline.
//!
//! ```yaml
//! lepton_tagging:
//!   pass: "LEP_PID_E > 3"
//!   fail: "LEP_PID_E < 3"
//! hadron_tagging:
//!   kaon: "LEP_PROBNN_K > 0.1"
//!   pion: "LEP_PROBNN_K < 0.1"
//! tracks: { ss: L1, os: L2 }
//! branches: [B_M_brem_track_2, block, L1_TRACK_PT, L1_TRACK_ETA, L2_TRACK_PT, L2_TRACK_ETA]
//! splitting: { block_branch: block, charge_branch: B_ID, pdg_id: 521 }
//! weights:
//!   pt: TRACK_PT
//!   eta: TRACK_ETA
//!   maps:
//!     - hadron: kaon
//!       blocks: [1, 2, 3, 4, 5, 6, 7, 8]
//!       pt_edges: [500, 5000, 20000]
//!       eta_edges: [1.5, 3.0, 5.0]
//!       efficiency: [[0.01, 0.02], [0.03, 0.04]]
//! input: { sample: DATA_24_MagUp_24c2, trigger: Hlt2RD_BuToKpEE_MVA_ext }
//! density:
//!   observable: B_M_brem_track_2
//!   bounds: [4500, 7060]
//!   bandwidth: silverman
//! ```
//!
//! A fixed kernel width is written as a single-key map, `bandwidth: { fixed: 25.0 }`.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use rx_core::{Error, Hadron, InputSelection, Result, SampleCategory, SampleId, SignalMode};
use rx_frame::{CutTemplate, LEG_SLOT};
use rx_frame::cache::sha256_hex;

use crate::efficiency::EfficiencyMap;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MisidConfig {
    /// Lepton PID cut templates.
    pub lepton_tagging: LeptonTagging,
    /// Extra fail-side requirement per hadron species.
    pub hadron_tagging: BTreeMap<Hadron, String>,
    /// Leg prefixes.
    pub tracks: Tracks,
    /// Columns kept in the split output.
    pub branches: Vec<String>,
    /// Pre-selection branch names.
    #[serde(default)]
    pub splitting: SplittingConfig,
    /// Weighting rules and efficiency maps.
    #[serde(default)]
    pub weights: WeightsConfig,
    /// Input selection.
    pub input: InputSelection,
    /// Hadron species processed by the calculator for data samples.
    #[serde(default = "default_hadrons")]
    pub hadrons: Vec<Hadron>,
    /// Density estimation settings.
    #[serde(default)]
    pub density: Option<DensityConfig>,
}

/// `lepton_tagging` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeptonTagging {
    /// Leg passes the lepton PID requirement.
    pub pass: String,
    /// Leg fails it.
    pub fail: String,
}

/// `tracks` section: column prefixes of the two legs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tracks {
    /// Same-sign leg (same charge as the reference particle).
    pub ss: String,
    /// Opposite-sign leg.
    pub os: String,
}

impl Tracks {
    /// Prefix of `leg`.
    pub fn prefix(&self, leg: Leg) -> &str {
        match leg {
            Leg::Same => &self.ss,
            Leg::Opposite => &self.os,
        }
    }
}

/// One of the two tagged legs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Leg {
    /// SS leg.
    Same,
    /// OS leg.
    Opposite,
}

impl Leg {
    /// Whether this leg passes the lepton requirement in `region`.
    pub fn passes_in(self, region: rx_core::Region) -> bool {
        match self {
            Leg::Same => region.ss_passes(),
            Leg::Opposite => region.os_passes(),
        }
    }
}

/// `splitting` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplittingConfig {
    /// Data-taking block column; rows need `block > 0`.
    pub block_branch: String,
    /// Reference particle id column.
    pub charge_branch: String,
    /// Absolute PDG id of the reference particle.
    pub pdg_id: i64,
}

impl Default for SplittingConfig {
    fn default() -> Self {
        Self { block_branch: "block".into(), charge_branch: "B_ID".into(), pdg_id: 521 }
    }
}

/// Per-leg factor computed by the weighter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorKind {
    /// `1` for a passing leg, `ε / (1 - ε)` for a failing one.
    TransferFactor,
    /// Always `1`.
    Unit,
    /// `ε`
    PassEfficiency,
    /// `1 - ε`
    FailEfficiency,
}

impl FactorKind {
    /// `true` if the factor reads the leg's efficiency.
    pub fn uses_efficiency(self) -> bool {
        !matches!(self, FactorKind::Unit)
    }
}

/// Factor per signal mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeRules {
    /// Signal-region estimate.
    pub signal: FactorKind,
    /// Control-region estimate.
    pub control: FactorKind,
}

impl ModeRules {
    /// Factor for `mode`.
    pub fn get(&self, mode: SignalMode) -> FactorKind {
        match mode {
            SignalMode::Signal => self.signal,
            SignalMode::Control => self.control,
        }
    }
}

/// Weighting rule table keyed by sample category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightRules {
    /// Real data.
    pub data: ModeRules,
    /// Hadron simulation.
    pub hadron_mc: ModeRules,
    /// Lepton simulation.
    pub lepton_mc: ModeRules,
}

impl Default for WeightRules {
    fn default() -> Self {
        let mc = ModeRules { signal: FactorKind::PassEfficiency, control: FactorKind::FailEfficiency };
        Self {
            data: ModeRules { signal: FactorKind::TransferFactor, control: FactorKind::Unit },
            hadron_mc: mc,
            lepton_mc: mc,
        }
    }
}

impl WeightRules {
    /// Factor applied to each leg for `(category, mode)`.
    pub fn rule(&self, category: SampleCategory, mode: SignalMode) -> FactorKind {
        match category {
            SampleCategory::Data => self.data.get(mode),
            SampleCategory::HadronMc => self.hadron_mc.get(mode),
            SampleCategory::LeptonMc => self.lepton_mc.get(mode),
        }
    }
}

/// `weights` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightsConfig {
    /// Transverse momentum column suffix, read as `{leg}_{pt}`.
    pub pt: String,
    /// Pseudorapidity column suffix, read as `{leg}_{eta}`.
    pub eta: String,
    /// Factor rules.
    pub rules: WeightRules,
    /// PID efficiency maps.
    pub maps: Vec<EfficiencyMap>,
}

impl Default for WeightsConfig {
    fn default() -> Self {
        Self {
            pt: "TRACK_PT".into(),
            eta: "TRACK_ETA".into(),
            rules: WeightRules::default(),
            maps: Vec::new(),
        }
    }
}

/// KDE bandwidth choice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bandwidth {
    /// Fixed width in observable units.
    Fixed(f64),
    /// Silverman's rule of thumb on the weighted sample.
    #[default]
    Silverman,
}

/// `density` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DensityConfig {
    /// Observable column.
    pub observable: String,
    /// Support `[low, high]`.
    pub bounds: [f64; 2],
    /// Kernel width: `silverman` or `{ fixed: h }`.
    #[serde(default, with = "serde_yaml_ng::with::singleton_map")]
    pub bandwidth: Bandwidth,
    /// Extended (yield-carrying) model.
    #[serde(default = "default_true")]
    pub extended: bool,
}

/// Parse a tagging cut and require it to read at least one per-leg column.
fn leg_template(field: &str, cut: &str) -> Result<CutTemplate> {
    let template = CutTemplate::parse(cut).map_err(|e| Error::Config(format!("{field}: {e}")))?;
    if !template.has_slot() {
        return Err(Error::Config(format!(
            "{field}: '{cut}' does not reference a {LEG_SLOT} column"
        )));
    }
    Ok(template)
}

fn default_true() -> bool {
    true
}

fn default_hadrons() -> Vec<Hadron> {
    vec![Hadron::Kaon, Hadron::Pion]
}

/// The parts of the configuration that change the split output.
#[derive(Serialize)]
struct SplittingView<'a> {
    lepton_tagging: &'a LeptonTagging,
    hadron_tagging: &'a BTreeMap<Hadron, String>,
    tracks: &'a Tracks,
    branches: &'a [String],
    splitting: &'a SplittingConfig,
}

impl MisidConfig {
    /// Read and validate a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    /// Parse and validate YAML text.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let cfg: MisidConfig =
            serde_yaml_ng::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<()> {
        leg_template("lepton_tagging.pass", &self.lepton_tagging.pass)?;
        leg_template("lepton_tagging.fail", &self.lepton_tagging.fail)?;
        for (hadron, cut) in &self.hadron_tagging {
            leg_template(&format!("hadron_tagging.{hadron}"), cut)?;
        }

        let sample = SampleId::parse(&self.input.sample)?;
        if sample.is_data() {
            if self.hadrons.is_empty() {
                return Err(Error::Config("hadrons must not be empty".into()));
            }
            for hadron in &self.hadrons {
                if !self.hadron_tagging.contains_key(hadron) {
                    return Err(Error::Config(format!("hadron_tagging has no entry for '{hadron}'")));
                }
            }
        }

        let (ss, os) = (self.tracks.ss.trim(), self.tracks.os.trim());
        if ss.is_empty() || os.is_empty() {
            return Err(Error::Config("tracks.ss and tracks.os must be non-empty".into()));
        }
        if ss == os {
            return Err(Error::Config(format!("tracks.ss and tracks.os are both '{ss}'")));
        }

        if self.branches.is_empty() {
            return Err(Error::Config("branches must not be empty".into()));
        }
        if self.splitting.pdg_id == 0 {
            return Err(Error::Config("splitting.pdg_id must be non-zero".into()));
        }

        for category in [SampleCategory::HadronMc, SampleCategory::LeptonMc] {
            for mode in [SignalMode::Signal, SignalMode::Control] {
                if self.weights.rules.rule(category, mode) == FactorKind::TransferFactor {
                    return Err(Error::Config(format!(
                        "transfer_factor needs tagging regions and cannot weight {category:?} ({mode})"
                    )));
                }
            }
        }
        for (i, map) in self.weights.maps.iter().enumerate() {
            map.validate().map_err(|e| Error::Config(format!("weights.maps[{i}]: {e}")))?;
        }

        if let Some(density) = &self.density {
            let [low, high] = density.bounds;
            if !low.is_finite() || !high.is_finite() || low >= high {
                return Err(Error::Config(format!(
                    "density.bounds must be finite with low < high, got [{low}, {high}]"
                )));
            }
            if let Bandwidth::Fixed(h) = density.bandwidth {
                if !h.is_finite() || h <= 0.0 {
                    return Err(Error::Config(format!(
                        "density.bandwidth must be finite and > 0, got {h}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Validated sample identity of `input.sample`.
    pub fn sample(&self) -> Result<SampleId> {
        SampleId::parse(&self.input.sample)
    }

    /// `density` section, required by density estimation.
    pub fn density(&self) -> Result<&DensityConfig> {
        self.density.as_ref().ok_or_else(|| Error::Config("missing 'density' section".into()))
    }

    /// SHA-256 over the sections that affect splitting.
    pub fn splitting_hash(&self) -> Result<String> {
        let view = SplittingView {
            lepton_tagging: &self.lepton_tagging,
            hadron_tagging: &self.hadron_tagging,
            tracks: &self.tracks,
            branches: &self.branches,
            splitting: &self.splitting,
        };
        Ok(sha256_hex(&serde_json::to_string(&view)?))
    }
}
