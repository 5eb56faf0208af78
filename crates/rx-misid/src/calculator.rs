//! Full misID sample: split, weight and combine every `(hadron, charge)` key.

use std::collections::BTreeMap;
use std::sync::Arc;

use rayon::prelude::*;

use rx_core::{ChargeHypothesis, Hadron, Logger, Region, Result, SampleId, SignalMode};
use rx_frame::{CacheStore, EventTable, TableSource};

use crate::combiner::{CombinationRule, MisidCombiner};
use crate::config::MisidConfig;
use crate::splitter::{RegionTables, SampleSplitter};
use crate::weighter::SampleWeighter;

/// Column holding the charge hypothesis label (`bplus` / `bminus`).
pub const BMESON_COLUMN: &str = "bmeson";

/// Runs the pipeline for the configured input.
///
/// Keys are independent and run on the rayon pool. The only shared state is the cache.
pub struct MisIdCalculator {
    config: Arc<MisidConfig>,
    sample: SampleId,
    mode: SignalMode,
    source: Arc<dyn TableSource>,
    cache: Option<Arc<dyn CacheStore>>,
    rule: CombinationRule,
    logger: Logger,
}

impl std::fmt::Debug for MisIdCalculator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MisIdCalculator")
            .field("sample", &self.sample)
            .field("mode", &self.mode)
            .field("keys", &self.keys())
            .finish()
    }
}

impl MisIdCalculator {
    /// Calculator for `config.input` in `mode`.
    pub fn new(
        config: Arc<MisidConfig>,
        mode: SignalMode,
        source: Arc<dyn TableSource>,
    ) -> Result<Self> {
        let sample = config.sample()?;
        Ok(Self {
            config,
            sample,
            mode,
            source,
            cache: None,
            rule: CombinationRule::default(),
            logger: Logger::current(),
        })
    }

    /// Cache split outputs.
    pub fn with_cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Replace the combination rule.
    pub fn with_rule(mut self, rule: CombinationRule) -> Self {
        self.rule = rule;
        self
    }

    /// Emit logs through `logger`.
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /// `(hadron, charge)` keys: configured hadrons for data, the sample's species otherwise.
    pub fn keys(&self) -> Vec<(Hadron, ChargeHypothesis)> {
        let hadrons = match self.sample.hadron() {
            Some(h) => vec![h],
            None => self.config.hadrons.clone(),
        };
        hadrons
            .into_iter()
            .flat_map(|h| ChargeHypothesis::ALL.into_iter().map(move |c| (h, c)))
            .collect()
    }

    /// Signed, weighted misID sample over all keys, with a `bmeson` column.
    ///
    /// Data are combined with the sign rule; simulation is weighted only.
    pub fn get_misid(&self) -> Result<EventTable> {
        let parts = self.run_keys(|hadron, charge| {
            let table = self.weighted_key(hadron, charge)?;
            let out = match table {
                Weighted::Regions(regions) => self.combiner().combine(&regions)?,
                Weighted::Simulation(table) => table,
            };
            tracing::debug!(hadron = %hadron, charge = %charge, rows = out.n_rows(), "key done");
            Ok(out)
        })?;

        let out = EventTable::concat(&parts)?;
        self.logger.in_scope(|| {
            tracing::info!(
                sample = %self.sample,
                mode = %self.mode,
                rows = out.n_rows(),
                "misID sample ready"
            );
        });
        Ok(out)
    }

    /// Weighted regions over all keys, every weight `+|w|`. Simulation has no regions and
    /// yields an empty map.
    pub fn get_misid_per_kind(&self) -> Result<BTreeMap<Region, EventTable>> {
        let parts = self.run_keys(|hadron, charge| match self.weighted_key(hadron, charge)? {
            Weighted::Regions(regions) => self.combiner().combine_per_kind(&regions),
            Weighted::Simulation(_) => Ok(BTreeMap::new()),
        })?;

        let mut grouped: BTreeMap<Region, Vec<EventTable>> = BTreeMap::new();
        for part in parts {
            for (region, table) in part {
                grouped.entry(region).or_default().push(table);
            }
        }
        grouped
            .into_iter()
            .map(|(region, tables)| Ok((region, EventTable::concat(&tables)?)))
            .collect()
    }

    fn run_keys<T: Send>(
        &self,
        f: impl Fn(Hadron, ChargeHypothesis) -> Result<T> + Sync,
    ) -> Result<Vec<T>> {
        self.keys()
            .par_iter()
            .map(|&(hadron, charge)| self.logger.in_scope(|| f(hadron, charge)))
            .collect()
    }

    fn combiner(&self) -> MisidCombiner {
        MisidCombiner::with_rule(self.rule.clone()).with_logger(self.logger.clone())
    }

    fn weighted_key(&self, hadron: Hadron, charge: ChargeHypothesis) -> Result<Weighted> {
        let mut splitter = SampleSplitter::new(Arc::clone(&self.config), hadron, charge)?
            .with_logger(self.logger.clone());
        if let Some(cache) = &self.cache {
            splitter = splitter.with_cache(Arc::clone(cache));
        }
        let weighter = SampleWeighter::new(Arc::clone(&self.config), &self.sample, self.mode)?
            .with_logger(self.logger.clone());

        let table = splitter.get_samples(self.source.as_ref())?;
        let label = |t: &EventTable| -> Result<EventTable> {
            let mut t = t.clone();
            t.set_label(BMESON_COLUMN, charge.label())?;
            Ok(t)
        };

        if self.sample.is_data() {
            let regions = RegionTables::from_table(&table)?
                .try_map(|_, t| label(&weighter.get_weighted_data(t)?))?;
            Ok(Weighted::Regions(regions))
        } else {
            Ok(Weighted::Simulation(label(&weighter.get_weighted_data(&table)?)?))
        }
    }
}

enum Weighted {
    Regions(RegionTables),
    Simulation(EventTable),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::BASE_YAML;
    use rx_frame::{Column, InMemorySource, WEIGHT_COLUMN};

    #[test]
    fn test_keys() {
        let src: Arc<dyn TableSource> = Arc::new(InMemorySource::new());
        let cfg = Arc::new(MisidConfig::from_yaml_str(BASE_YAML).unwrap());
        let calc = MisIdCalculator::new(cfg, SignalMode::Signal, Arc::clone(&src)).unwrap();
        assert_eq!(calc.keys().len(), 4);

        let y = BASE_YAML.replace("DATA_24_MagUp_24c2", "Bu_JpsiK_ee_eq_DPC");
        let cfg = Arc::new(MisidConfig::from_yaml_str(&y).unwrap());
        let calc = MisIdCalculator::new(cfg, SignalMode::Signal, src).unwrap();
        assert_eq!(
            calc.keys(),
            vec![
                (Hadron::Electron, ChargeHypothesis::Positive),
                (Hadron::Electron, ChargeHypothesis::Negative)
            ]
        );
    }

    #[test]
    fn test_simulation_is_weighted_not_split() {
        let y = BASE_YAML.replace("DATA_24_MagUp_24c2", "Bu_KplKplKmn_eq_sqDalitz_DPC");
        let cfg = Arc::new(MisidConfig::from_yaml_str(&y).unwrap());
        let raw = EventTable::from_columns(vec![
            ("B_M".to_string(), Column::Float(vec![5000.0, 5100.0, 5200.0])),
            ("block".to_string(), Column::Float(vec![1.0, 2.0, 1.0])),
            ("B_ID".to_string(), Column::Float(vec![521.0, -521.0, 521.0])),
            ("L1_TRACK_PT".to_string(), Column::Float(vec![5000.0; 3])),
            ("L1_TRACK_ETA".to_string(), Column::Float(vec![2.0; 3])),
            ("L2_TRACK_PT".to_string(), Column::Float(vec![5000.0; 3])),
            ("L2_TRACK_ETA".to_string(), Column::Float(vec![2.0; 3])),
        ])
        .unwrap();
        let src = InMemorySource::new().with_table(
            "Bu_KplKplKmn_eq_sqDalitz_DPC",
            "Hlt2RD_BuToKpEE_MVA_ext",
            raw,
        );
        let calc = MisIdCalculator::new(cfg, SignalMode::Signal, Arc::new(src))
            .unwrap()
            .with_logger(Logger::silent());
        let out = calc.get_misid().unwrap();
        assert_eq!(out.n_rows(), 3);
        assert!(!out.has_column("kind"));
        assert_eq!(
            out.labels(BMESON_COLUMN).unwrap(),
            &["bplus".to_string(), "bplus".to_string(), "bminus".to_string()]
        );
        assert!(out.float(WEIGHT_COLUMN).unwrap().iter().all(|w| (*w - 0.01).abs() < 1e-12));
        assert!(calc.get_misid_per_kind().unwrap().is_empty());
    }
}
