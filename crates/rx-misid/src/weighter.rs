//! Per-event correction weights.

use std::sync::Arc;

use rx_core::{Error, Hadron, Logger, Region, Result, SampleCategory, SampleId, SignalMode};
use rx_frame::{EventTable, HADRON_COLUMN, KIND_COLUMN, WEIGHT_COLUMN};

use crate::config::{FactorKind, Leg, MisidConfig};
use crate::efficiency::EfficiencyMaps;

/// Assigns the `weight` column from leg kinematics.
///
/// The rule is picked once from the sample category and the signal mode; each leg
/// contributes one factor and the event weight is their product. Tracks not covered by an
/// efficiency map get a factor of exactly 0.
#[derive(Debug, Clone)]
pub struct SampleWeighter {
    config: Arc<MisidConfig>,
    maps: EfficiencyMaps,
    category: SampleCategory,
    mode: SignalMode,
    rule: FactorKind,
    logger: Logger,
}

impl SampleWeighter {
    /// Weighter for `sample` in `mode`.
    pub fn new(config: Arc<MisidConfig>, sample: &SampleId, mode: SignalMode) -> Result<Self> {
        let maps = EfficiencyMaps::new(config.weights.maps.clone())?;
        let category = sample.category();
        let rule = config.weights.rules.rule(category, mode);
        if rule == FactorKind::TransferFactor && category != SampleCategory::Data {
            return Err(Error::Config(format!(
                "transfer_factor cannot weight simulated sample '{sample}'"
            )));
        }
        Ok(Self { config, maps, category, mode, rule, logger: Logger::current() })
    }

    /// Emit logs through `logger`.
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /// Rule applied to every leg.
    pub fn rule(&self) -> FactorKind {
        self.rule
    }

    /// Copy of `table` with `weight` set to the product of the two leg factors.
    pub fn get_weighted_data(&self, table: &EventTable) -> Result<EventTable> {
        self.logger.in_scope(|| {
            let ss = self.leg_factors(table, Leg::Same)?;
            let os = self.leg_factors(table, Leg::Opposite)?;
            let weights: Vec<f64> = ss.iter().zip(&os).map(|(a, b)| a * b).collect();

            let zeros = weights.iter().filter(|w| **w == 0.0).count();
            tracing::debug!(
                category = ?self.category,
                mode = %self.mode,
                rule = ?self.rule,
                rows = weights.len(),
                zeros,
                "weighted sample"
            );
            if zeros > 0 && self.rule.uses_efficiency() {
                tracing::info!(zeros, rows = weights.len(), "events outside efficiency maps");
            }

            let mut out = table.clone();
            out.set_float(WEIGHT_COLUMN, weights)?;
            Ok(out)
        })
    }

    /// Factor of one leg for every row.
    ///
    /// Reads `{leg}_{pt}`, `{leg}_{eta}`, the block column and `hadron`; `kind` is only
    /// read by the transfer factor.
    pub fn leg_factors(&self, table: &EventTable, leg: Leg) -> Result<Vec<f64>> {
        if self.rule == FactorKind::Unit {
            return Ok(vec![1.0; table.n_rows()]);
        }

        let prefix = self.config.tracks.prefix(leg);
        let w = &self.config.weights;
        let pt = table.float(&format!("{prefix}_{}", w.pt))?;
        let eta = table.float(&format!("{prefix}_{}", w.eta))?;
        let block = table.float(&self.config.splitting.block_branch)?;
        let hadrons = parse_labels::<Hadron>(table.labels(HADRON_COLUMN)?)?;
        let regions = match self.rule {
            FactorKind::TransferFactor => Some(parse_labels::<Region>(table.labels(KIND_COLUMN)?)?),
            _ => None,
        };

        let factors = (0..table.n_rows())
            .map(|i| {
                let Some(eff) = self.maps.lookup(hadrons[i], block[i], pt[i], eta[i]) else {
                    return 0.0;
                };
                let f = match self.rule {
                    FactorKind::PassEfficiency => eff,
                    FactorKind::FailEfficiency => 1.0 - eff,
                    FactorKind::TransferFactor => {
                        let passes = regions.as_ref().is_some_and(|r| leg.passes_in(r[i]));
                        if passes {
                            1.0
                        } else if eff < 1.0 {
                            eff / (1.0 - eff)
                        } else {
                            0.0
                        }
                    }
                    FactorKind::Unit => 1.0,
                };
                if f.is_finite() && f >= 0.0 { f } else { 0.0 }
            })
            .collect();
        Ok(factors)
    }
}

fn parse_labels<T: std::str::FromStr<Err = Error>>(labels: &[String]) -> Result<Vec<T>> {
    labels.iter().map(|l| l.parse::<T>()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::BASE_YAML;
    use approx::assert_relative_eq;
    use rx_frame::Column;

    fn config() -> Arc<MisidConfig> {
        Arc::new(MisidConfig::from_yaml_str(BASE_YAML).unwrap())
    }

    fn table(kinds: &[&str]) -> EventTable {
        let n = kinds.len();
        // L1 in (pt bin 0, eta bin 0) -> 0.1, L2 in (pt bin 1, eta bin 1) -> 0.4
        EventTable::from_columns(vec![
            ("block".to_string(), Column::Float(vec![1.0; n])),
            ("L1_TRACK_PT".to_string(), Column::Float(vec![5000.0; n])),
            ("L1_TRACK_ETA".to_string(), Column::Float(vec![2.0; n])),
            ("L2_TRACK_PT".to_string(), Column::Float(vec![50000.0; n])),
            ("L2_TRACK_ETA".to_string(), Column::Float(vec![4.0; n])),
            (WEIGHT_COLUMN.to_string(), Column::Float(vec![10.0; n])),
            (HADRON_COLUMN.to_string(), Column::Label(vec!["kaon".into(); n])),
            (KIND_COLUMN.to_string(), Column::Label(kinds.iter().map(|k| k.to_string()).collect())),
        ])
        .unwrap()
    }

    fn data() -> SampleId {
        SampleId::parse("DATA_24_MagUp_24c2").unwrap()
    }

    #[test]
    fn test_transfer_factor_per_region() {
        let w = SampleWeighter::new(config(), &data(), SignalMode::Signal)
            .unwrap()
            .with_logger(Logger::silent());
        let out = w.get_weighted_data(&table(&["PassFail", "FailPass", "FailFail"])).unwrap();
        let wt = out.float(WEIGHT_COLUMN).unwrap();
        let tf1 = 0.1 / 0.9;
        let tf2 = 0.4 / 0.6;
        assert_relative_eq!(wt[0], tf2, epsilon = 1e-12);
        assert_relative_eq!(wt[1], tf1, epsilon = 1e-12);
        assert_relative_eq!(wt[2], tf1 * tf2, epsilon = 1e-12);
    }

    #[test]
    fn test_control_mode_is_unit() {
        let w = SampleWeighter::new(config(), &data(), SignalMode::Control)
            .unwrap()
            .with_logger(Logger::silent());
        let out = w.get_weighted_data(&table(&["FailFail"])).unwrap();
        assert_eq!(out.float(WEIGHT_COLUMN).unwrap(), &[1.0]);
    }

    #[test]
    fn test_simulation_efficiencies() {
        let mc = SampleId::parse("Bu_KplKplKmn_eq_sqDalitz_DPC").unwrap();
        let sig = SampleWeighter::new(config(), &mc, SignalMode::Signal)
            .unwrap()
            .with_logger(Logger::silent());
        let t = table(&["FailFail"]).select(&[
            "block", "L1_TRACK_PT", "L1_TRACK_ETA", "L2_TRACK_PT", "L2_TRACK_ETA", HADRON_COLUMN,
        ])
        .unwrap();
        let w = sig.get_weighted_data(&t).unwrap();
        assert_relative_eq!(w.float(WEIGHT_COLUMN).unwrap()[0], 0.1 * 0.4, epsilon = 1e-12);

        let ctl = SampleWeighter::new(config(), &mc, SignalMode::Control)
            .unwrap()
            .with_logger(Logger::silent());
        let w = ctl.get_weighted_data(&t).unwrap();
        assert_relative_eq!(w.float(WEIGHT_COLUMN).unwrap()[0], 0.9 * 0.6, epsilon = 1e-12);
    }

    #[test]
    fn test_out_of_range_gives_zero() {
        let w = SampleWeighter::new(config(), &data(), SignalMode::Signal)
            .unwrap()
            .with_logger(Logger::silent());
        let t = table(&["FailFail", "FailFail"])
            .map_float("L1_TRACK_ETA", |_| 7.5)
            .unwrap();
        let out = w.get_weighted_data(&t).unwrap();
        assert_eq!(out.float(WEIGHT_COLUMN).unwrap(), &[0.0, 0.0]);

        // Unmapped species (no pion map) is also zero.
        let mut t = table(&["FailFail"]);
        t.set_label(HADRON_COLUMN, "pion").unwrap();
        assert_eq!(w.leg_factors(&t, Leg::Same).unwrap(), vec![0.0]);
    }

    #[test]
    fn test_weights_are_finite_and_non_negative() {
        use rand::prelude::*;
        let mut rng = StdRng::seed_from_u64(7);
        let n = 500;
        let kinds = ["PassFail", "FailPass", "FailFail"];
        let kind: Vec<&str> = (0..n).map(|_| kinds[rng.gen_range(0..3)]).collect();
        let mut t = table(&kind);
        for leg in ["L1", "L2"] {
            t.set_float(
                format!("{leg}_TRACK_PT"),
                (0..n).map(|_| rng.gen_range(-1000.0..200_000.0)).collect(),
            )
            .unwrap();
            t.set_float(
                format!("{leg}_TRACK_ETA"),
                (0..n).map(|_| rng.gen_range(1.0..6.0)).collect(),
            )
            .unwrap();
        }
        t.set_float("block", (0..n).map(|_| rng.gen_range(0..=9) as f64).collect()).unwrap();

        for mode in [SignalMode::Signal, SignalMode::Control] {
            let w = SampleWeighter::new(config(), &data(), mode)
                .unwrap()
                .with_logger(Logger::silent());
            let out = w.get_weighted_data(&t).unwrap();
            assert!(out.float(WEIGHT_COLUMN).unwrap().iter().all(|w| w.is_finite() && *w >= 0.0));
        }
    }

    #[test]
    fn test_missing_kinematics() {
        let w = SampleWeighter::new(config(), &data(), SignalMode::Signal)
            .unwrap()
            .with_logger(Logger::silent());
        let t = table(&["FailFail"]).select(&["block", HADRON_COLUMN, KIND_COLUMN]).unwrap();
        assert!(matches!(w.get_weighted_data(&t).unwrap_err(), Error::MissingColumn(_)));
    }
}
