//! Signed combination of tagging regions.
//!
//! Events with both legs failing enter both single-fail extrapolations, so their
//! contribution is subtracted once: FailFail weights become `-|w|`, every other region
//! `+|w|`. Per-kind inspection keeps all weights positive.

use std::collections::BTreeMap;

use rx_core::{Error, Logger, Region, Result};
use rx_frame::{EventTable, WEIGHT_COLUMN};

use crate::splitter::RegionTables;

/// Sign applied to the weights of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    /// `+|w|`
    Add,
    /// `-|w|`
    Subtract,
}

impl Sign {
    fn apply(self, w: f64) -> f64 {
        match self {
            Sign::Add => w.abs(),
            Sign::Subtract => -w.abs(),
        }
    }
}

/// Region -> sign table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CombinationRule {
    signs: BTreeMap<Region, Sign>,
}

impl Default for CombinationRule {
    /// Inclusion-exclusion over the three regions.
    fn default() -> Self {
        Self::new([
            (Region::PassFail, Sign::Add),
            (Region::FailPass, Sign::Add),
            (Region::FailFail, Sign::Subtract),
        ])
    }
}

impl CombinationRule {
    /// Rule from explicit `(region, sign)` pairs.
    pub fn new(signs: impl IntoIterator<Item = (Region, Sign)>) -> Self {
        Self { signs: signs.into_iter().collect() }
    }

    /// Sign of `region`. Regions absent from the rule are an error.
    pub fn sign(&self, region: Region) -> Result<Sign> {
        self.signs
            .get(&region)
            .copied()
            .ok_or_else(|| Error::InvalidRegionKind(format!("{region} has no combination sign")))
    }
}

/// Merges weighted regions into one sample.
#[derive(Debug, Clone, Default)]
pub struct MisidCombiner {
    rule: CombinationRule,
    logger: Logger,
}

impl MisidCombiner {
    /// Combiner with the default inclusion-exclusion rule.
    pub fn new() -> Self {
        Self::default()
    }

    /// Combiner with a custom rule.
    pub fn with_rule(rule: CombinationRule) -> Self {
        Self { rule, ..Self::default() }
    }

    /// Emit logs through `logger`.
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /// Signed union of the regions. No renormalization.
    pub fn combine(&self, regions: &RegionTables) -> Result<EventTable> {
        self.logger.in_scope(|| {
            let mut parts = Vec::with_capacity(Region::ALL.len());
            for (region, table) in regions.iter() {
                let sign = self.rule.sign(region)?;
                let signed = with_signed_weights(table, |w| sign.apply(w))?;
                let sum_w: f64 = signed.float(WEIGHT_COLUMN)?.iter().sum();
                tracing::debug!(kind = %region, rows = signed.n_rows(), sum_w, "combined region");
                parts.push(signed);
            }
            EventTable::concat(&parts)
        })
    }

    /// Regions kept apart with all weights `+|w|`.
    pub fn combine_per_kind(&self, regions: &RegionTables) -> Result<BTreeMap<Region, EventTable>> {
        regions
            .iter()
            .map(|(region, table)| Ok((region, with_signed_weights(table, f64::abs)?)))
            .collect()
    }
}

/// Copy of `table` with `f` applied to its weights (a missing weight column counts as 1).
fn with_signed_weights(table: &EventTable, f: impl Fn(f64) -> f64) -> Result<EventTable> {
    let weights = table.weights()?.into_iter().map(f).collect();
    let mut out = table.clone();
    out.set_float(WEIGHT_COLUMN, weights)?;
    Ok(out)
}
