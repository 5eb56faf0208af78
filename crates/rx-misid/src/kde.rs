use std::f64::consts::{PI, SQRT_2};

use rx_core::{Error, Result};

/// Kernels further than this many bandwidths from `x` are skipped in pointwise sums.
const KERNEL_CUTOFF: f64 = 10.0;

#[inline]
pub(crate) fn standard_normal_cdf(z: f64) -> f64 {
    0.5 * statrs::function::erf::erfc(-z / SQRT_2)
}

#[inline]
fn standard_normal_pdf(z: f64) -> f64 {
    (-0.5 * z * z).exp() / (2.0 * PI).sqrt()
}

/// 1D Gaussian KDE on a bounded support with signed weights.
///
/// Every kernel is truncated to `[low, high]` and renormalized there:
///
/// `f(x) = Σ_i w_i · φ((x - x_i)/h) / (h · Z_i)`,  `Z_i = Φ((high - x_i)/h) - Φ((low - x_i)/h)`
///
/// so `∫_low^high f = Σ w_i` exactly. Weights may be negative; `f` itself is not
/// normalized and not floored.
#[derive(Debug, Clone)]
pub(crate) struct BoundedKde {
    support: (f64, f64),
    /// Centers sorted ascending.
    centers: Vec<f64>,
    /// `w_i / (h · Z_i)`, aligned with `centers`.
    coeffs: Vec<f64>,
    /// `w_i / Z_i`, aligned with `centers`.
    mass: Vec<f64>,
    bandwidth: f64,
    inv_bandwidth: f64,
}

impl BoundedKde {
    pub(crate) fn from_samples(
        support: (f64, f64),
        centers: &[f64],
        weights: &[f64],
        bandwidth: f64,
    ) -> Result<Self> {
        let (low, high) = support;
        if !low.is_finite() || !high.is_finite() || low >= high {
            return Err(Error::Validation(format!(
                "KDE requires finite support with low < high, got ({low}, {high})"
            )));
        }
        if !bandwidth.is_finite() || bandwidth <= 0.0 {
            return Err(Error::Validation(format!(
                "KDE bandwidth must be finite and > 0, got {bandwidth}"
            )));
        }
        if centers.len() != weights.len() {
            return Err(Error::Validation(format!(
                "KDE weights length mismatch: expected {}, got {}",
                centers.len(),
                weights.len()
            )));
        }
        if weights.iter().any(|w| !w.is_finite()) {
            return Err(Error::Validation("KDE weights must be finite".into()));
        }
        if let Some(x) = centers.iter().find(|&&x| !(x >= low && x <= high)) {
            return Err(Error::OutOfSupport(format!("{x} not in [{low}, {high}]")));
        }

        let mut order: Vec<usize> = (0..centers.len()).collect();
        order.sort_by(|&a, &b| centers[a].total_cmp(&centers[b]));

        let inv_bandwidth = 1.0 / bandwidth;
        let mut sorted = Vec::with_capacity(order.len());
        let mut coeffs = Vec::with_capacity(order.len());
        let mut mass = Vec::with_capacity(order.len());
        for i in order {
            let x0 = centers[i];
            let z_low = (low - x0) * inv_bandwidth;
            let z_high = (high - x0) * inv_bandwidth;
            let mut z = standard_normal_cdf(z_high) - standard_normal_cdf(z_low);
            if !z.is_finite() || z <= 0.0 {
                // Kernel mass lies entirely outside the support.
                z = f64::MIN_POSITIVE;
            }
            sorted.push(x0);
            mass.push(weights[i] / z);
            coeffs.push(weights[i] / (z * bandwidth));
        }

        Ok(Self { support, centers: sorted, coeffs, mass, bandwidth, inv_bandwidth })
    }

    pub(crate) fn bandwidth(&self) -> f64 {
        self.bandwidth
    }

    /// Signed kernel sum at `x`; `0` outside the support.
    pub(crate) fn kernel_sum(&self, x: f64) -> f64 {
        let (low, high) = self.support;
        if !(x >= low && x <= high) {
            return 0.0;
        }
        let reach = KERNEL_CUTOFF * self.bandwidth;
        let start = self.centers.partition_point(|&c| c < x - reach);
        let end = self.centers.partition_point(|&c| c <= x + reach);

        self.centers[start..end]
            .iter()
            .zip(&self.coeffs[start..end])
            .map(|(x0, c)| c * standard_normal_pdf((x - x0) * self.inv_bandwidth))
            .sum()
    }

    /// Signed integral over `[a, b] ∩ support`.
    pub(crate) fn integral(&self, a: f64, b: f64) -> f64 {
        let (low, high) = self.support;
        let (a, b) = (a.max(low), b.min(high));
        if !(a < b) {
            return 0.0;
        }
        self.centers
            .iter()
            .zip(&self.mass)
            .map(|(x0, m)| {
                let za = (a - x0) * self.inv_bandwidth;
                let zb = (b - x0) * self.inv_bandwidth;
                m * (standard_normal_cdf(zb) - standard_normal_cdf(za))
            })
            .sum()
    }
}

/// Silverman's rule `h = 1.06 · σ · n_eff^(-1/5)`.
///
/// `σ` is the standard deviation weighted by `|w|` and `n_eff = (Σ|w|)² / Σw²` is the Kish
/// effective sample size. Returns `None` when either is degenerate.
pub(crate) fn silverman_bandwidth(xs: &[f64], weights: &[f64]) -> Option<f64> {
    let abs_w: Vec<f64> = weights.iter().map(|w| w.abs()).collect();
    let sum_w: f64 = abs_w.iter().sum();
    let sum_w2: f64 = abs_w.iter().map(|w| w * w).sum();
    if !(sum_w > 0.0 && sum_w2 > 0.0) {
        return None;
    }
    let n_eff = sum_w * sum_w / sum_w2;

    let mean = xs.iter().zip(&abs_w).map(|(x, w)| x * w).sum::<f64>() / sum_w;
    let var = xs.iter().zip(&abs_w).map(|(x, w)| w * (x - mean).powi(2)).sum::<f64>() / sum_w;
    let sigma = var.sqrt();

    let h = 1.06 * sigma * n_eff.powf(-0.2);
    (h.is_finite() && h > 0.0).then_some(h)
}
