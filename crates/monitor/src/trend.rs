//! Linear trend fitting with confidence, forecasts, and factor annotation.

use crate::types::{Forecast, TrendDirection, TrendFactor, TrendResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use vigil_core::Metric;

/// Tunables for trend analysis; thresholds are in the metric's native units
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendConfig {
    /// Minimum points before a fit is attempted
    pub min_points: usize,
    /// |slope| below this is classified as stable
    pub slope_threshold: f64,
    /// Coefficient of variation above this reports a volatility factor
    pub volatility_threshold: f64,
    /// Autocorrelation strength above this reports a seasonality factor
    pub seasonality_threshold: f64,
    /// Points beyond this many stddevs count as outliers
    pub outlier_sigma: f64,
    /// Refit delta above this reports an outlier-sensitivity factor
    pub outlier_impact_threshold: f64,
    /// Hit-rate change rate (%/period) below this flags cache efficiency
    pub efficiency_degradation_pct: f64,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            min_points: 5,
            slope_threshold: 0.01,
            volatility_threshold: 0.2,
            seasonality_threshold: 0.3,
            outlier_sigma: 3.0,
            outlier_impact_threshold: 0.1,
            efficiency_degradation_pct: -10.0,
        }
    }
}

/// Ordinary-least-squares line over unit-spaced indices
#[derive(Debug, Clone, Copy, PartialEq)]
struct LineFit {
    slope: f64,
    intercept: f64,
}

impl LineFit {
    fn at(&self, index: f64) -> f64 {
        self.slope * index + self.intercept
    }
}

/// Fits a linear trend to a metric's recent history and annotates the
/// contributing factors. Stateless: every call recomputes from the series.
#[derive(Debug)]
pub struct TrendAnalyzer {
    config: RwLock<TrendConfig>,
}

impl TrendAnalyzer {
    pub fn new(config: TrendConfig) -> Self {
        Self {
            config: RwLock::new(config),
        }
    }

    pub fn set_config(&self, config: TrendConfig) {
        *self.config.write() = config;
    }

    /// Analyze a metric series, oldest point first
    pub fn analyze(&self, metric: Metric, instance: &str, values: &[f64]) -> TrendResult {
        let config = self.config.read().clone();
        let n = values.len();

        if n < config.min_points {
            let last = values.last().copied().unwrap_or(0.0);
            return TrendResult {
                metric,
                instance: instance.to_string(),
                direction: TrendDirection::Stable,
                change_rate_pct: 0.0,
                confidence: 0.0,
                forecast: Forecast {
                    next_hour: last,
                    next_day: last,
                    next_week: last,
                },
                factors: Vec::new(),
            };
        }

        let fit = linear_fit(values);
        let direction = if fit.slope > config.slope_threshold {
            TrendDirection::Improving
        } else if fit.slope < -config.slope_threshold {
            TrendDirection::Degrading
        } else {
            TrendDirection::Stable
        };

        let mean = values.iter().sum::<f64>() / n as f64;
        let change_rate_pct = if mean.abs() <= f64::EPSILON {
            0.0
        } else {
            fit.slope / mean * 100.0
        };
        let confidence = r_squared(values, fit).clamp(0.0, 1.0);

        let forecast = Forecast {
            next_hour: fit.at((n + 1) as f64),
            next_day: fit.at((n + 24) as f64),
            next_week: fit.at((n + 168) as f64),
        };

        let mut factors = Vec::new();
        if let Some(factor) = volatility_factor(values, mean, &config) {
            factors.push(factor);
        }
        if let Some(factor) = seasonality_factor(values, mean, &config) {
            factors.push(factor);
        }
        if let Some(factor) = outlier_factor(values, fit, mean, &config) {
            factors.push(factor);
        }
        if metric == Metric::HitRate
            && direction == TrendDirection::Degrading
            && change_rate_pct < config.efficiency_degradation_pct
        {
            factors.push(TrendFactor::CacheEfficiency {
                impact: (change_rate_pct.abs() / 100.0).min(1.0),
            });
        }

        TrendResult {
            metric,
            instance: instance.to_string(),
            direction,
            change_rate_pct,
            confidence,
            forecast,
            factors,
        }
    }
}

impl Default for TrendAnalyzer {
    fn default() -> Self {
        Self::new(TrendConfig::default())
    }
}

fn linear_fit(values: &[f64]) -> LineFit {
    let n = values.len() as f64;
    let sum_x = (0..values.len()).map(|i| i as f64).sum::<f64>();
    let sum_y = values.iter().sum::<f64>();
    let sum_xy = values
        .iter()
        .enumerate()
        .map(|(i, v)| i as f64 * v)
        .sum::<f64>();
    let sum_xx = (0..values.len()).map(|i| (i as f64).powi(2)).sum::<f64>();

    let denominator = n * sum_xx - sum_x * sum_x;
    if denominator.abs() <= f64::EPSILON {
        return LineFit {
            slope: 0.0,
            intercept: sum_y / n,
        };
    }
    let slope = (n * sum_xy - sum_x * sum_y) / denominator;
    let intercept = (sum_y - slope * sum_x) / n;
    LineFit { slope, intercept }
}

/// Coefficient of determination against the fit; a constant series with a
/// perfect fit counts as fully explained.
fn r_squared(values: &[f64], fit: LineFit) -> f64 {
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let ss_tot = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>();
    let ss_res = values
        .iter()
        .enumerate()
        .map(|(i, v)| (v - fit.at(i as f64)).powi(2))
        .sum::<f64>();

    if ss_tot <= f64::EPSILON {
        return if ss_res <= f64::EPSILON { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

fn volatility_factor(values: &[f64], mean: f64, config: &TrendConfig) -> Option<TrendFactor> {
    if mean.abs() <= f64::EPSILON {
        return None;
    }
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    let cv = variance.sqrt() / mean.abs();
    (cv > config.volatility_threshold).then_some(TrendFactor::Volatility { impact: cv })
}

/// Lag autocorrelation over candidate periods `2..=n/3`
fn seasonality_factor(values: &[f64], mean: f64, config: &TrendConfig) -> Option<TrendFactor> {
    let n = values.len();
    let max_period = n / 3;
    if max_period < 2 {
        return None;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
    if variance <= f64::EPSILON {
        return None;
    }

    let mut best: Option<(usize, f64)> = None;
    for period in 2..=max_period {
        let count = n - period;
        let score = (0..count)
            .map(|i| values[i] * values[i + period])
            .sum::<f64>()
            / count as f64;
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((period, score)),
        }
    }

    let (period, score) = best?;
    let strength = score / variance;
    (strength > config.seasonality_threshold)
        .then_some(TrendFactor::Seasonality { period, strength })
}

/// Refit with 3σ outliers removed and report how much the fit moves
fn outlier_factor(
    values: &[f64],
    fit: LineFit,
    mean: f64,
    config: &TrendConfig,
) -> Option<TrendFactor> {
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    let stddev = variance.sqrt();
    if stddev <= f64::EPSILON {
        return None;
    }

    let filtered: Vec<f64> = values
        .iter()
        .copied()
        .filter(|v| (v - mean).abs() <= config.outlier_sigma * stddev)
        .collect();
    let removed = values.len() - filtered.len();
    if removed == 0 || filtered.len() < 2 {
        return None;
    }

    let refit = linear_fit(&filtered);
    let impact =
        (relative_change(fit.slope, refit.slope) + relative_change(fit.intercept, refit.intercept))
            / 2.0;
    (impact > config.outlier_impact_threshold)
        .then_some(TrendFactor::OutlierSensitivity { impact })
}

fn relative_change(original: f64, updated: f64) -> f64 {
    if original.abs() <= 1e-12 {
        if updated.abs() <= 1e-12 {
            0.0
        } else {
            1.0
        }
    } else {
        (updated - original).abs() / original.abs()
    }
}
