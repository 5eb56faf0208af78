//! Yield summaries of split or combined samples.
//!
//! Per-kind yields always use `+|w|`. Combined yields (total, per hadron, per charge)
//! subtract FailFail; tables without a `kind` column sum their weights as they are.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use rx_core::{Region, Result};
use rx_frame::{EventTable, HADRON_COLUMN, KIND_COLUMN};

use crate::calculator::BMESON_COLUMN;
use crate::combiner::{CombinationRule, Sign};

/// Row count and yield of one group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct GroupYield {
    /// Rows in the group.
    pub rows: usize,
    /// Sum of weights under the group's sign policy.
    #[serde(rename = "yield")]
    pub yield_: f64,
}

impl GroupYield {
    fn add(&mut self, w: f64) {
        self.rows += 1;
        self.yield_ += w;
    }
}

/// Yield breakdown of a table.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct YieldSummary {
    /// Total rows.
    pub rows: usize,
    /// Signed total yield.
    pub total: f64,
    /// Per region, positive weights.
    pub per_kind: BTreeMap<Region, GroupYield>,
    /// Signed, per `hadron` label.
    pub per_hadron: BTreeMap<String, GroupYield>,
    /// Signed, per `bmeson` label.
    pub per_charge: BTreeMap<String, GroupYield>,
}

impl YieldSummary {
    /// Summarize `table` with the default combination signs.
    pub fn from_table(table: &EventTable) -> Result<Self> {
        Self::with_rule(table, &CombinationRule::default())
    }

    /// Summarize `table` with explicit combination signs.
    pub fn with_rule(table: &EventTable, rule: &CombinationRule) -> Result<Self> {
        let weights = table.weights()?;
        let kinds = if table.has_column(KIND_COLUMN) {
            Some(
                table
                    .labels(KIND_COLUMN)?
                    .iter()
                    .map(|k| k.parse::<Region>())
                    .collect::<Result<Vec<_>>>()?,
            )
        } else {
            None
        };
        let hadrons = optional_labels(table, HADRON_COLUMN)?;
        let charges = optional_labels(table, BMESON_COLUMN)?;

        let mut out = Self { rows: table.n_rows(), ..Self::default() };
        for (i, &w) in weights.iter().enumerate() {
            let signed = match &kinds {
                Some(kinds) => {
                    let region = kinds[i];
                    out.per_kind.entry(region).or_default().add(w.abs());
                    match rule.sign(region)? {
                        Sign::Add => w.abs(),
                        Sign::Subtract => -w.abs(),
                    }
                }
                None => w,
            };
            out.total += signed;
            if let Some(h) = hadrons.and_then(|h| h.get(i)) {
                out.per_hadron.entry(h.clone()).or_default().add(signed);
            }
            if let Some(c) = charges.and_then(|c| c.get(i)) {
                out.per_charge.entry(c.clone()).or_default().add(signed);
            }
        }
        Ok(out)
    }
}

fn optional_labels<'a>(table: &'a EventTable, name: &str) -> Result<Option<&'a [String]>> {
    if table.has_column(name) { table.labels(name).map(Some) } else { Ok(None) }
}

impl fmt::Display for YieldSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let line = "-".repeat(44);
        writeln!(f, "{line}")?;
        writeln!(f, "{:<20}{:>10}{:>14}", "Group", "Entries", "Yield")?;
        writeln!(f, "{line}")?;
        for (region, g) in &self.per_kind {
            writeln!(f, "{:<20}{:>10}{:>14.3}", region.as_str(), g.rows, g.yield_)?;
        }
        for (h, g) in &self.per_hadron {
            writeln!(f, "{:<20}{:>10}{:>14.3}", format!("hadron={h}"), g.rows, g.yield_)?;
        }
        for (c, g) in &self.per_charge {
            writeln!(f, "{:<20}{:>10}{:>14.3}", format!("bmeson={c}"), g.rows, g.yield_)?;
        }
        writeln!(f, "{line}")?;
        write!(f, "{:<20}{:>10}{:>14.3}", "total", self.rows, self.total)
    }
}
