//! Density templates for one `(sample, trigger, q2bin)` selection.

use std::sync::Arc;

use rx_core::{Logger, Result, SignalMode};
use rx_frame::{CacheStore, EventTable, TableSource};

use crate::calculator::MisIdCalculator;
use crate::config::{DensityConfig, MisidConfig};
use crate::density::{DensityEstimator, DensityModel, WeightedData};

/// Project every density template is built from.
pub const PDF_PROJECT: &str = "nopid";

/// Builds misID density templates.
///
/// The configured `input` is replaced by the requested selection; the `density` section
/// must be present.
pub struct PdfMaker {
    config: Arc<MisidConfig>,
    source: Arc<dyn TableSource>,
    cache: Option<Arc<dyn CacheStore>>,
    logger: Logger,
}

impl std::fmt::Debug for PdfMaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfMaker").field("input", &self.config.input).finish_non_exhaustive()
    }
}

impl PdfMaker {
    /// Maker for `sample` / `trigger` / `q2bin` on top of `config`.
    pub fn new(
        config: &MisidConfig,
        sample: &str,
        trigger: &str,
        q2bin: &str,
        source: Arc<dyn TableSource>,
    ) -> Result<Self> {
        let mut config = config.clone();
        config.input.sample = sample.to_string();
        config.input.trigger = trigger.to_string();
        config.input.q2bin = q2bin.to_string();
        config.input.project = PDF_PROJECT.to_string();
        config.validate()?;
        config.density()?;
        Ok(Self { config: Arc::new(config), source, cache: None, logger: Logger::current() })
    }

    /// Cache split outputs.
    pub fn with_cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Emit logs through `logger`.
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /// Effective configuration after the input override.
    pub fn config(&self) -> &MisidConfig {
        &self.config
    }

    /// Combined misID sample restricted to the observable window.
    pub fn get_data(&self, mode: SignalMode) -> Result<EventTable> {
        let density = self.config.density()?;
        let mut calc = MisIdCalculator::new(Arc::clone(&self.config), mode, Arc::clone(&self.source))?
            .with_logger(self.logger.clone());
        if let Some(cache) = &self.cache {
            calc = calc.with_cache(Arc::clone(cache));
        }
        let table = calc.get_misid()?;
        self.logger.in_scope(|| in_window(&table, density))
    }

    /// Density of the windowed sample, plus the data it was built from.
    pub fn get_pdf(&self, mode: SignalMode) -> Result<(DensityModel, Arc<WeightedData>)> {
        let table = self.get_data(mode)?;
        self.estimate(&table)
    }

    /// Density of an already windowed sample, as returned by [`PdfMaker::get_data`].
    pub fn estimate(&self, table: &EventTable) -> Result<(DensityModel, Arc<WeightedData>)> {
        let density = self.config.density()?;
        DensityEstimator::from_config(density)?
            .with_logger(self.logger.clone())
            .estimate(table, &density.observable)
    }
}

fn in_window(table: &EventTable, density: &DensityConfig) -> Result<EventTable> {
    let [low, high] = density.bounds;
    let mask: Vec<bool> =
        table.float(&density.observable)?.iter().map(|&x| x >= low && x <= high).collect();
    let kept = table.filter(&mask)?;
    let removed = table.n_rows() - kept.n_rows();
    if removed > 0 {
        tracing::info!(
            observable = %density.observable,
            low,
            high,
            removed,
            kept = kept.n_rows(),
            "restricted to observable window"
        );
    }
    Ok(kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::BASE_YAML;
    use approx::assert_relative_eq;
    use rx_core::Error;
    use rx_frame::{Column, InMemorySource, WEIGHT_COLUMN};

    const TRIGGER: &str = "Hlt2RD_BuToKpEE_MVA_ext";
    const SAMPLE: &str = "Bu_KplKplKmn_eq_sqDalitz_DPC";

    fn source() -> Arc<dyn TableSource> {
        let raw = EventTable::from_columns(vec![
            ("B_M".to_string(), Column::Float(vec![4000.0, 5100.0, 5200.0, 6000.0])),
            ("block".to_string(), Column::Float(vec![1.0, 2.0, 1.0, 3.0])),
            ("B_ID".to_string(), Column::Float(vec![521.0, 521.0, -521.0, 521.0])),
            ("L1_TRACK_PT".to_string(), Column::Float(vec![5000.0; 4])),
            ("L1_TRACK_ETA".to_string(), Column::Float(vec![2.0; 4])),
            ("L2_TRACK_PT".to_string(), Column::Float(vec![20000.0; 4])),
            ("L2_TRACK_ETA".to_string(), Column::Float(vec![4.0; 4])),
        ])
        .unwrap();
        Arc::new(InMemorySource::new().with_table(SAMPLE, TRIGGER, raw))
    }

    fn maker() -> PdfMaker {
        let cfg = MisidConfig::from_yaml_str(BASE_YAML).unwrap();
        PdfMaker::new(&cfg, SAMPLE, TRIGGER, "central", source())
            .unwrap()
            .with_logger(Logger::silent())
    }

    #[test]
    fn test_input_override() {
        let m = maker();
        assert_eq!(m.config().input.sample, SAMPLE);
        assert_eq!(m.config().input.project, PDF_PROJECT);
    }

    #[test]
    fn test_window_and_yield() {
        let m = maker();
        let data = m.get_data(SignalMode::Signal).unwrap();
        assert_eq!(data.n_rows(), 3);
        let sum_w: f64 = data.float(WEIGHT_COLUMN).unwrap().iter().sum();
        // 0.1 * 0.4 per event
        assert_relative_eq!(sum_w, 3.0 * 0.04, max_relative = 1e-12);

        let (model, wd) = m.get_pdf(SignalMode::Signal).unwrap();
        assert!(model.is_extended());
        assert_eq!(wd.len(), 3);
        assert_relative_eq!(model.integral(4500.0, 7060.0), sum_w, max_relative = 1e-9);
    }

    #[test]
    fn test_estimate_of_get_data_matches_get_pdf() {
        let m = maker();
        let data = m.get_data(SignalMode::Signal).unwrap();
        let (from_data, wd) = m.estimate(&data).unwrap();
        let (direct, _) = m.get_pdf(SignalMode::Signal).unwrap();
        assert_eq!(wd.weights(), data.float(WEIGHT_COLUMN).unwrap());
        assert_eq!(from_data.bandwidth(), direct.bandwidth());
        for x in [4600.0, 5150.0, 5200.0, 6500.0] {
            assert_relative_eq!(from_data.evaluate(x), direct.evaluate(x), max_relative = 1e-12);
        }
    }

    #[test]
    fn test_requires_density_and_known_sample() {
        let cfg = MisidConfig::from_yaml_str(BASE_YAML).unwrap();
        let err = PdfMaker::new(&cfg, "Bu_Kmumu_DPC", TRIGGER, "central", source()).unwrap_err();
        assert!(matches!(err, Error::UnrecognizedSample(_)));

        let mut no_density = cfg.clone();
        no_density.density = None;
        let err = PdfMaker::new(&no_density, SAMPLE, TRIGGER, "central", source()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
