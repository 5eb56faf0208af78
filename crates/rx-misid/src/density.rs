//! Smoothed misID density from a signed, weighted sample.

use std::sync::Arc;

use rx_core::{Error, Logger, Result};
use rx_frame::{EventTable, WEIGHT_COLUMN};

use crate::config::{Bandwidth, DensityConfig};
use crate::kde::{BoundedKde, silverman_bandwidth};

/// Fraction of the support width used as bandwidth when Silverman's rule degenerates.
const FALLBACK_BANDWIDTH_FRACTION: f64 = 0.01;

/// The sample a density was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedData {
    observable: String,
    support: (f64, f64),
    values: Vec<f64>,
    weights: Vec<f64>,
}

impl WeightedData {
    /// Observable name.
    pub fn observable(&self) -> &str {
        &self.observable
    }

    /// `(low, high)`
    pub fn support(&self) -> (f64, f64) {
        self.support
    }

    /// Observable values.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Signed weights, aligned with `values`.
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// `true` if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// `Σ w`
    pub fn sum_weights(&self) -> f64 {
        self.weights.iter().sum()
    }

    /// Kish effective sample size `(Σ|w|)² / Σw²`.
    pub fn effective_size(&self) -> f64 {
        let s: f64 = self.weights.iter().map(|w| w.abs()).sum();
        let s2: f64 = self.weights.iter().map(|w| w * w).sum();
        if s2 > 0.0 { s * s / s2 } else { 0.0 }
    }
}

/// Immutable smoothed density over one bounded observable.
#[derive(Debug, Clone)]
pub struct DensityModel {
    kde: BoundedKde,
    extended: bool,
    total_yield: f64,
    data: Arc<WeightedData>,
}

impl DensityModel {
    /// Density at `x`, floored at 0; `0` outside the support.
    ///
    /// An extended model integrates to [`DensityModel::total_yield`], a normalized one to 1
    /// (before flooring).
    pub fn evaluate(&self, x: f64) -> f64 {
        let v = self.kde.kernel_sum(x) / self.scale();
        v.max(0.0)
    }

    /// [`DensityModel::evaluate`] over many points.
    pub fn evaluate_many(&self, xs: &[f64]) -> Vec<f64> {
        xs.iter().map(|&x| self.evaluate(x)).collect()
    }

    /// Signed analytic integral over `[a, b]` (clipped to the support).
    ///
    /// For an extended model this is a yield; over the full support it equals the sum of
    /// the underlying weights.
    pub fn integral(&self, a: f64, b: f64) -> f64 {
        self.kde.integral(a, b) / self.scale()
    }

    /// `true` if the model carries a yield.
    pub fn is_extended(&self) -> bool {
        self.extended
    }

    /// Sum of the underlying weights.
    pub fn total_yield(&self) -> f64 {
        self.total_yield
    }

    /// Data the model was built from.
    pub fn underlying_data(&self) -> &Arc<WeightedData> {
        &self.data
    }

    /// Kernel width.
    pub fn bandwidth(&self) -> f64 {
        self.kde.bandwidth()
    }

    /// `(low, high)`
    pub fn support(&self) -> (f64, f64) {
        self.data.support
    }

    fn scale(&self) -> f64 {
        if self.extended { 1.0 } else { self.total_yield }
    }
}

/// Builds [`DensityModel`]s from weighted tables.
#[derive(Debug, Clone)]
pub struct DensityEstimator {
    support: (f64, f64),
    bandwidth: Bandwidth,
    extended: bool,
    logger: Logger,
}

impl DensityEstimator {
    /// Extended estimator on `support` with Silverman's bandwidth.
    pub fn new(support: (f64, f64)) -> Result<Self> {
        let (low, high) = support;
        if !low.is_finite() || !high.is_finite() || low >= high {
            return Err(Error::Validation(format!(
                "density support must be finite with low < high, got ({low}, {high})"
            )));
        }
        Ok(Self { support, bandwidth: Bandwidth::Silverman, extended: true, logger: Logger::current() })
    }

    /// Estimator configured by a `density` section.
    pub fn from_config(cfg: &DensityConfig) -> Result<Self> {
        let [low, high] = cfg.bounds;
        Ok(Self::new((low, high))?.with_bandwidth(cfg.bandwidth).extended(cfg.extended))
    }

    /// Set the bandwidth rule.
    pub fn with_bandwidth(mut self, bandwidth: Bandwidth) -> Self {
        self.bandwidth = bandwidth;
        self
    }

    /// Build extended (`true`) or normalized (`false`) models.
    pub fn extended(mut self, extended: bool) -> Self {
        self.extended = extended;
        self
    }

    /// Emit logs through `logger`.
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /// Support `(low, high)`.
    pub fn support(&self) -> (f64, f64) {
        self.support
    }

    /// Estimate the density of `observable` weighted by the `weight` column.
    pub fn estimate(
        &self,
        table: &EventTable,
        observable: &str,
    ) -> Result<(DensityModel, Arc<WeightedData>)> {
        self.logger.in_scope(|| {
            let values = table.float(observable)?.to_vec();
            let weights = table.float(WEIGHT_COLUMN)?.to_vec();

            if weights.iter().any(|w| !w.is_finite()) {
                return Err(Error::Validation("weights must be finite".into()));
            }
            if weights.iter().all(|w| *w == 0.0) {
                return Err(Error::DegenerateSample(format!(
                    "{} rows with zero total absolute weight",
                    weights.len()
                )));
            }
            let (low, high) = self.support;
            if let Some(x) = values.iter().find(|&&x| !(x >= low && x <= high)) {
                return Err(Error::OutOfSupport(format!(
                    "{observable} = {x} not in [{low}, {high}]"
                )));
            }

            let total_yield: f64 = weights.iter().sum();
            if !self.extended && !(total_yield > 0.0) {
                return Err(Error::DegenerateSample(format!(
                    "normalized density needs a positive total yield, got {total_yield}"
                )));
            }

            let h = match self.bandwidth {
                Bandwidth::Fixed(h) => h,
                Bandwidth::Silverman => match silverman_bandwidth(&values, &weights) {
                    Some(h) => h,
                    None => {
                        let h = FALLBACK_BANDWIDTH_FRACTION * (high - low);
                        tracing::warn!(bandwidth = h, "zero spread sample, using fallback bandwidth");
                        h
                    }
                },
            };

            let kde = BoundedKde::from_samples(self.support, &values, &weights, h)?;
            let data = Arc::new(WeightedData {
                observable: observable.to_string(),
                support: self.support,
                values,
                weights,
            });
            tracing::info!(
                observable,
                rows = data.len(),
                total_yield,
                n_eff = data.effective_size(),
                bandwidth = h,
                extended = self.extended,
                "density estimated"
            );

            let model =
                DensityModel { kde, extended: self.extended, total_yield, data: Arc::clone(&data) };
            Ok((model, data))
        })
    }
}
