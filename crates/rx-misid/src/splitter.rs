//! Region splitting.
//!
//! Data are split into PassFail / FailPass / FailFail by the lepton PID outcome of the
//! SS and OS legs. Simulation only goes through the pre-selection (block and charge) and
//! keeps the species fixed by the sample.

use std::collections::BTreeMap;
use std::sync::Arc;

use rx_core::{ChargeHypothesis, Error, Hadron, Logger, Region, Result, SampleId};
use rx_frame::{
    CacheKey, CacheStore, CutTemplate, EventTable, HADRON_COLUMN, KIND_COLUMN, Predicate,
    TableSource, WEIGHT_COLUMN,
};

use crate::config::{Leg, MisidConfig};

/// Cache label of split artifacts.
pub const SPLIT_CACHE_LABEL: &str = "split";

/// Split output, one table per region.
///
/// Every region is present; regions without rows hold a zero-row table.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionTables {
    tables: BTreeMap<Region, EventTable>,
}

impl RegionTables {
    /// Build from per-region tables. Missing regions get an empty table with the schema of
    /// the first present one.
    pub fn new(tables: BTreeMap<Region, EventTable>) -> Self {
        let template = tables.values().next().map(EventTable::empty_like).unwrap_or_default();
        let mut tables = tables;
        for region in Region::ALL {
            tables.entry(region).or_insert_with(|| template.clone());
        }
        Self { tables }
    }

    /// Recover regions from a table with a `kind` column.
    pub fn from_table(table: &EventTable) -> Result<Self> {
        if table.is_empty() && !table.has_column(KIND_COLUMN) {
            return Ok(Self::new(BTreeMap::new()));
        }
        let mut tables = BTreeMap::new();
        for (label, part) in table.partition_by_label(KIND_COLUMN)? {
            tables.insert(label.parse::<Region>()?, part);
        }
        let mut out = Self::new(tables);
        if table.is_empty() {
            for t in out.tables.values_mut() {
                *t = table.empty_like();
            }
        }
        Ok(out)
    }

    /// Table of `region`.
    pub fn get(&self, region: Region) -> &EventTable {
        // `new` fills every region.
        &self.tables[&region]
    }

    /// Replace the table of `region`.
    pub fn insert(&mut self, region: Region, table: EventTable) {
        self.tables.insert(region, table);
    }

    /// Regions in `Region::ALL` order.
    pub fn iter(&self) -> impl Iterator<Item = (Region, &EventTable)> {
        self.tables.iter().map(|(r, t)| (*r, t))
    }

    /// Apply `f` to each region table.
    pub fn try_map(&self, mut f: impl FnMut(Region, &EventTable) -> Result<EventTable>) -> Result<Self> {
        let mut tables = BTreeMap::new();
        for (region, table) in self.iter() {
            tables.insert(region, f(region, table)?);
        }
        Ok(Self { tables })
    }

    /// Total rows across regions.
    pub fn n_rows(&self) -> usize {
        self.tables.values().map(EventTable::n_rows).sum()
    }

    /// Concatenate the regions row-wise.
    pub fn to_table(&self) -> Result<EventTable> {
        let parts: Vec<EventTable> = self.tables.values().cloned().collect();
        EventTable::concat(&parts)
    }
}

/// Per-step row counts of one split.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CutFlow {
    /// Input rows.
    pub total: usize,
    /// Rows after `block > 0`.
    pub block: usize,
    /// Rows after the charge requirement.
    pub charge: usize,
    /// Rows per region.
    pub regions: BTreeMap<Region, usize>,
    /// Rows assigned to more than one region.
    pub overlapping: usize,
    /// Rows assigned to no region.
    pub untagged: usize,
}

impl std::fmt::Display for CutFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{:<20}{:>12}", "Cut", "Entries")?;
        writeln!(f, "{:<20}{:>12}", "total", self.total)?;
        writeln!(f, "{:<20}{:>12}", "block", self.block)?;
        write!(f, "{:<20}{:>12}", "charge", self.charge)?;
        for (region, n) in &self.regions {
            write!(f, "\n{:<20}{:>12}", region.as_str(), n)?;
        }
        Ok(())
    }
}

/// Splits one input sample for one `(hadron, charge)` key.
pub struct SampleSplitter {
    config: Arc<MisidConfig>,
    sample: SampleId,
    hadron: Hadron,
    charge: ChargeHypothesis,
    pass: CutTemplate,
    fail: CutTemplate,
    cache: Option<Arc<dyn CacheStore>>,
    logger: Logger,
}

impl std::fmt::Debug for SampleSplitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleSplitter")
            .field("sample", &self.sample)
            .field("hadron", &self.hadron)
            .field("charge", &self.charge)
            .field("cached", &self.cache.is_some())
            .finish()
    }
}

impl SampleSplitter {
    /// Splitter for `config.input.sample`.
    ///
    /// For simulated samples the species comes from the sample registry and `hadron` is
    /// ignored.
    pub fn new(config: Arc<MisidConfig>, hadron: Hadron, charge: ChargeHypothesis) -> Result<Self> {
        let sample = config.sample()?;
        let hadron = sample.hadron().unwrap_or(hadron);

        let pass = CutTemplate::parse(&config.lepton_tagging.pass)?;
        let fail = CutTemplate::parse(&config.lepton_tagging.fail)?;
        let fail = if sample.is_data() {
            let tag = config.hadron_tagging.get(&hadron).ok_or_else(|| {
                Error::Config(format!("hadron_tagging has no entry for '{hadron}'"))
            })?;
            fail.and(&CutTemplate::parse(tag)?)
        } else {
            fail
        };

        Ok(Self { config, sample, hadron, charge, pass, fail, cache: None, logger: Logger::current() })
    }

    /// Store results through `cache`.
    pub fn with_cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Emit logs through `logger`.
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /// Sample being split.
    pub fn sample(&self) -> &SampleId {
        &self.sample
    }

    /// Species label written to the `hadron` column.
    pub fn hadron(&self) -> Hadron {
        self.hadron
    }

    /// Charge hypothesis.
    pub fn charge(&self) -> ChargeHypothesis {
        self.charge
    }

    /// SS and OS predicates selecting `region`.
    pub fn region_predicates(&self, region: Region) -> (Predicate, Predicate) {
        let template = |leg: Leg| if leg.passes_in(region) { &self.pass } else { &self.fail };
        let tracks = &self.config.tracks;
        (
            template(Leg::Same).instantiate(&tracks.ss),
            template(Leg::Opposite).instantiate(&tracks.os),
        )
    }

    /// Cache key for an input with identity `uid`.
    pub fn cache_key(&self, uid: &str) -> Result<CacheKey> {
        Ok(CacheKey::builder(SPLIT_CACHE_LABEL)
            .text("uid", uid)
            .text("sample", self.sample.name())
            .text("hadron", self.hadron.as_str())
            .text("charge", self.charge.label())
            .text("config", &self.config.splitting_hash()?)
            .finish())
    }

    /// Load (or fetch from the cache) and split the configured input.
    ///
    /// Data come back with a `kind` column; simulation does not.
    pub fn get_samples(&self, source: &dyn TableSource) -> Result<EventTable> {
        self.logger.in_scope(|| {
            let input = &self.config.input;
            let uid = source.uid(input)?;
            let key = self.cache_key(&uid)?;

            if let Some(cache) = &self.cache {
                if let Some(table) = cache.get(&key)? {
                    tracing::info!(
                        sample = %self.sample,
                        hadron = %self.hadron,
                        charge = %self.charge,
                        rows = table.n_rows(),
                        "using cached split"
                    );
                    return Ok(table);
                }
            }

            let raw = source.load(input)?;
            let out = if self.sample.is_data() {
                self.split_in_scope(&raw)?.to_table()?
            } else {
                self.filter_simulation_in_scope(&raw)?
            };

            if let Some(cache) = &self.cache {
                cache.put(&key, &out)?;
            }
            Ok(out)
        })
    }

    /// Split a data table into the three regions.
    pub fn split(&self, table: &EventTable) -> Result<RegionTables> {
        self.logger.in_scope(|| self.split_in_scope(table))
    }

    /// Pre-select a simulated table and label its species.
    pub fn filter_simulation(&self, table: &EventTable) -> Result<EventTable> {
        self.logger.in_scope(|| self.filter_simulation_in_scope(table))
    }

    fn split_in_scope(&self, table: &EventTable) -> Result<RegionTables> {
        let (selected, mut flow) = self.preselect(table)?;

        let mut masks = BTreeMap::new();
        for region in Region::ALL {
            let (ss, os) = self.region_predicates(region);
            tracing::debug!(kind = %region, ss = %ss, os = %os, "region cuts");
            let ss_mask = ss.mask(&selected)?;
            let os_mask = os.mask(&selected)?;
            let mask: Vec<bool> = ss_mask.iter().zip(&os_mask).map(|(a, b)| *a && *b).collect();
            masks.insert(region, mask);
        }

        for i in 0..selected.n_rows() {
            match masks.values().filter(|m| m[i]).count() {
                0 => flow.untagged += 1,
                1 => {}
                _ => flow.overlapping += 1,
            }
        }
        if flow.overlapping > 0 {
            tracing::warn!(
                rows = flow.overlapping,
                "rows satisfy more than one region; pass and fail cuts overlap"
            );
        }

        let mut tables = BTreeMap::new();
        for (region, mask) in &masks {
            tracing::info!(kind = %region, "calculating sample");
            let mut out = self.finish(&selected.filter(mask)?)?;
            out.set_label(KIND_COLUMN, region.as_str())?;
            flow.regions.insert(*region, out.n_rows());
            tables.insert(*region, out);
        }

        for (region, n) in &flow.regions {
            if *n == 0 {
                tracing::warn!(kind = %region, hadron = %self.hadron, charge = %self.charge, "empty dataset");
                tracing::info!("cut flow:\n{flow}");
            }
        }
        tracing::debug!(
            untagged = flow.untagged,
            passfail = flow.regions.get(&Region::PassFail).copied().unwrap_or_default(),
            failpass = flow.regions.get(&Region::FailPass).copied().unwrap_or_default(),
            failfail = flow.regions.get(&Region::FailFail).copied().unwrap_or_default(),
            "split done"
        );
        Ok(RegionTables::new(tables))
    }

    fn filter_simulation_in_scope(&self, table: &EventTable) -> Result<EventTable> {
        let (selected, flow) = self.preselect(table)?;
        let out = self.finish(&selected)?;
        if out.is_empty() {
            tracing::warn!(sample = %self.sample, charge = %self.charge, "empty dataset");
            tracing::info!("cut flow:\n{flow}");
        }
        Ok(out)
    }

    /// `block > 0` then the charge requirement.
    fn preselect(&self, table: &EventTable) -> Result<(EventTable, CutFlow)> {
        let s = &self.config.splitting;
        let block = Predicate::greater_than(&s.block_branch, 0.0);
        let charge = Predicate::equals(&s.charge_branch, self.charge.sign() * s.pdg_id as f64);

        let after_block = table.filter(&block.mask(table)?)?;
        let after_charge = after_block.filter(&charge.mask(&after_block)?)?;
        let flow = CutFlow {
            total: table.n_rows(),
            block: after_block.n_rows(),
            charge: after_charge.n_rows(),
            ..CutFlow::default()
        };
        Ok((after_charge, flow))
    }

    /// Keep the configured branches, default the weight and tag the species.
    fn finish(&self, table: &EventTable) -> Result<EventTable> {
        let mut out = table.select(&self.config.branches)?;
        if !out.has_column(WEIGHT_COLUMN) {
            out.set_float(WEIGHT_COLUMN, vec![1.0; out.n_rows()])?;
        }
        out.set_label(HADRON_COLUMN, self.hadron.as_str())?;
        Ok(out)
    }
}
