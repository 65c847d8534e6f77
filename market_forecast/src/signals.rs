//! Market-intelligence signals derived from history and the ensemble
//!
//! Three indicators are produced for every metric that reaches an ensemble:
//!
//! - **Maturity index**: weighted mean of normalized adoption level, revenue
//!   growth and job-impact magnitude. Every component is min-max scaled over
//!   all history up to the evaluation point, recomputed on every call.
//! - **Risk score**: `(1 - a) * v + a * j` where `v = r / (1 + r)`, `r` is
//!   the mean interval width relative to the point estimate, `a` the
//!   automation-risk weight and `j` the normalized job impact (`v` alone
//!   when the region has no job-impact series).
//! - **Anomalies**: interval breaches found by the walk-forward backtest
//!   and trend reversals after a sustained rise.
//!
//! Each signal carries the reliability of the run that produced it.

use crate::config::{MaturityConfig, SignalConfig};
use crate::data::{MetricKey, MetricTable, TimeSeries};
use crate::ensemble::EnsembleForecast;
use crate::error::{ForecastError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trend_math::normalization::{min_max_scale, DEGENERATE_MIDPOINT};
use trend_math::volatility::period_returns;

/// How much of the intended computation backs an output record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Reliability {
    /// Every assigned adapter contributed
    Nominal,
    /// Some adapters failed; the ensemble ran on the rest
    Degraded,
    /// No forecast was produced for this run
    RunCancelled,
}

impl std::fmt::Display for Reliability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Reliability::Nominal => "nominal",
            Reliability::Degraded => "degraded",
            Reliability::RunCancelled => "run-cancelled",
        })
    }
}

/// Provenance shared by every signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalMeta {
    /// Last historical timestamp the signal saw
    pub as_of: DateTime<Utc>,
    pub derived_from: Vec<MetricKey>,
    pub forecast_id: String,
    pub reliability: Reliability,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MaturityComponents {
    pub adoption: Option<f64>,
    pub revenue_growth: Option<f64>,
    pub job_impact: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MaturityPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaturitySignal {
    pub value: f64,
    pub components: MaturityComponents,
    pub series: Vec<MaturityPoint>,
    pub meta: SignalMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSignal {
    pub score: f64,
    /// Mean interval width over the point estimate
    pub relative_width: f64,
    pub volatility_component: f64,
    pub automation_component: Option<f64>,
    pub meta: SignalMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnomalyKind {
    /// Observation fell outside the one-step-ahead interval
    IntervalBreach {
        observed: f64,
        expected: f64,
        lower: f64,
        upper: f64,
        /// Distance beyond the nearest bound
        distance: f64,
    },
    /// Changes turned negative after a sustained rise
    TrendReversal {
        negative_run: usize,
        positive_run: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyFlag {
    pub timestamp: DateTime<Utc>,
    pub index: usize,
    pub kind: AnomalyKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalySignal {
    pub flagged: bool,
    pub flags: Vec<AnomalyFlag>,
    pub meta: SignalMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSet {
    pub maturity: MaturitySignal,
    pub risk: RiskSignal,
    pub anomaly: AnomalySignal,
}

/// Series feeding the maturity composite for one region
#[derive(Debug, Clone, Default)]
pub struct MaturitySources {
    pub adoption: Option<TimeSeries>,
    pub revenue: Option<TimeSeries>,
    pub job_impact: Option<TimeSeries>,
}

impl MaturitySources {
    /// Look up the configured metrics in the region of `key`.
    ///
    /// A region tracking none of them uses `key`'s own series as the
    /// adoption component, so every record still gets an index.
    pub fn from_table(table: &MetricTable, key: &MetricKey, config: &MaturityConfig) -> Self {
        let lookup = |metric: &str| table.get(&key.sibling(metric)).cloned();
        let mut sources = Self {
            adoption: lookup(&config.adoption_metric),
            revenue: lookup(&config.revenue_metric),
            job_impact: lookup(&config.job_impact_metric),
        };

        if sources.keys().is_empty() {
            sources.adoption = table.get(key).cloned();
        }
        sources
    }

    pub fn keys(&self) -> Vec<MetricKey> {
        [&self.adoption, &self.revenue, &self.job_impact]
            .iter()
            .filter_map(|s| s.as_ref().map(|s| s.key().clone()))
            .collect()
    }
}

/// Observed values at or before `at`
fn history_until(series: &TimeSeries, at: DateTime<Utc>) -> Vec<Option<f64>> {
    series
        .observations()
        .iter()
        .take_while(|o| o.timestamp <= at)
        .map(|o| o.value)
        .collect()
}

/// Latest observed value normalized against everything before it
fn latest_normalized(values: &[f64]) -> Result<Option<f64>> {
    match values.last() {
        Some(&latest) => Ok(Some(min_max_scale(latest, values)?)),
        None => Ok(None),
    }
}

/// What the orchestrator knows about the run when signals are computed
#[derive(Debug, Clone)]
pub struct SignalContext<'a> {
    pub series: &'a TimeSeries,
    /// History with flagged observations replaced by ensemble estimates
    pub modeled: &'a TimeSeries,
    pub forecast: &'a EnsembleForecast,
    pub sources: &'a MaturitySources,
    pub breaches: Vec<AnomalyFlag>,
    pub reliability: Reliability,
}

/// Computes maturity, risk and anomaly signals
#[derive(Debug, Clone)]
pub struct SignalDetector {
    config: SignalConfig,
}

impl SignalDetector {
    pub fn new(config: SignalConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    /// Normalized components as of `at`
    pub fn maturity_components(
        &self,
        sources: &MaturitySources,
        at: DateTime<Utc>,
    ) -> Result<MaturityComponents> {
        let adoption = match &sources.adoption {
            Some(s) => {
                let observed: Vec<f64> = history_until(s, at).into_iter().flatten().collect();
                latest_normalized(&observed)?
            }
            None => None,
        };

        let revenue_growth = match &sources.revenue {
            Some(s) => {
                let growth: Vec<f64> = period_returns(&history_until(s, at))
                    .into_iter()
                    .flatten()
                    .collect();
                latest_normalized(&growth)?
            }
            None => None,
        };

        let job_impact = match &sources.job_impact {
            Some(s) => {
                let magnitude: Vec<f64> = history_until(s, at)
                    .into_iter()
                    .flatten()
                    .map(f64::abs)
                    .collect();
                latest_normalized(&magnitude)?
            }
            None => None,
        };

        Ok(MaturityComponents {
            adoption,
            revenue_growth,
            job_impact,
        })
    }

    /// Weighted composite of the available components, within [0, 1]
    pub fn maturity_index(&self, components: &MaturityComponents) -> f64 {
        let m = &self.config.maturity;
        let weighted: Vec<(f64, f64)> = [
            (components.adoption, m.adoption_weight),
            (components.revenue_growth, m.revenue_growth_weight),
            (components.job_impact, m.job_impact_weight),
        ]
        .iter()
        .filter_map(|(v, w)| v.map(|v| (v, *w)))
        .collect();

        let total: f64 = weighted.iter().map(|(_, w)| w).sum();
        if weighted.is_empty() || total <= 0.0 {
            return DEGENERATE_MIDPOINT;
        }

        let index = weighted.iter().map(|(v, w)| v * w).sum::<f64>() / total;
        index.clamp(0.0, 1.0)
    }

    /// Maturity index evaluated at each timestamp
    pub fn maturity_series(
        &self,
        sources: &MaturitySources,
        timestamps: &[DateTime<Utc>],
    ) -> Result<Vec<MaturityPoint>> {
        timestamps
            .iter()
            .map(|&timestamp| {
                let components = self.maturity_components(sources, timestamp)?;
                Ok(MaturityPoint {
                    timestamp,
                    value: self.maturity_index(&components),
                })
            })
            .collect()
    }

    /// Mean interval width relative to the point estimate.
    ///
    /// Returns infinity when any point estimate is effectively zero.
    pub fn relative_width(forecast: &EnsembleForecast) -> f64 {
        if forecast.points.is_empty() {
            return 0.0;
        }
        let mut total = 0.0;
        for p in &forecast.points {
            if p.point.abs() < 1e-12 {
                return f64::INFINITY;
            }
            total += p.width() / p.point.abs();
        }
        total / forecast.points.len() as f64
    }

    /// Risk score in [0, 1], with the relative width and the volatility
    /// component it was built from
    pub fn risk_score(&self, forecast: &EnsembleForecast, job_impact: Option<f64>) -> (f64, f64, f64) {
        let r = Self::relative_width(forecast);
        let v = if r.is_finite() { r / (1.0 + r) } else { 1.0 };
        let a = self.config.automation_risk_weight;

        let score = match job_impact {
            Some(j) => (1.0 - a) * v + a * j,
            None => v,
        };
        (score.clamp(0.0, 1.0), r, v)
    }

    /// Distance beyond the interval when it exceeds the configured number
    /// of interval widths
    pub fn interval_breach(&self, observed: f64, lower: f64, upper: f64) -> Option<f64> {
        let distance = if observed > upper {
            observed - upper
        } else if observed < lower {
            lower - observed
        } else {
            return None;
        };

        let width = (upper - lower).max(0.0);
        (distance > self.config.anomaly.interval_width_threshold * width).then_some(distance)
    }

    /// Indices where a run of negative changes of the configured length
    /// completes directly after a sustained run of positive changes
    pub fn trend_reversals(&self, values: &[Option<f64>]) -> Vec<usize> {
        let negative_run = self.config.anomaly.reversal_min_run;
        let positive_run = self.config.anomaly.sustained_positive_run;

        let mut changes = vec![None];
        changes.extend(values.windows(2).map(|w| match (w[0], w[1]) {
            (Some(a), Some(b)) => Some(b - a),
            _ => None,
        }));

        (negative_run + positive_run..values.len())
            .filter(|&i| {
                let falling = changes[i + 1 - negative_run..=i]
                    .iter()
                    .all(|c| c.map_or(false, |c| c < 0.0));
                let rising = changes[i + 1 - negative_run - positive_run..=i - negative_run]
                    .iter()
                    .all(|c| c.map_or(false, |c| c > 0.0));
                falling && rising
            })
            .collect()
    }

    /// All three signals for one metric
    pub fn detect(&self, ctx: SignalContext<'_>) -> Result<SignalSet> {
        let as_of = ctx.series.last_timestamp().ok_or_else(|| {
            ForecastError::DataError(format!("Series {} is empty", ctx.series.key()))
        })?;

        let mut derived_from = vec![ctx.series.key().clone()];
        for key in ctx.sources.keys() {
            if !derived_from.contains(&key) {
                derived_from.push(key);
            }
        }

        let meta = SignalMeta {
            as_of,
            derived_from,
            forecast_id: ctx.forecast.id.clone(),
            reliability: ctx.reliability,
        };

        let components = self.maturity_components(ctx.sources, as_of)?;
        let maturity = MaturitySignal {
            value: self.maturity_index(&components),
            components,
            series: self.maturity_series(ctx.sources, &ctx.series.timestamps())?,
            meta: meta.clone(),
        };

        let (score, relative_width, volatility_component) =
            self.risk_score(ctx.forecast, components.job_impact);
        let risk = RiskSignal {
            score,
            relative_width,
            volatility_component,
            automation_component: components.job_impact,
            meta: meta.clone(),
        };

        let mut flags = ctx.breaches;
        let timestamps = ctx.modeled.timestamps();
        for index in self.trend_reversals(&ctx.modeled.values()) {
            flags.push(AnomalyFlag {
                timestamp: timestamps[index],
                index,
                kind: AnomalyKind::TrendReversal {
                    negative_run: self.config.anomaly.reversal_min_run,
                    positive_run: self.config.anomaly.sustained_positive_run,
                },
            });
        }
        flags.sort_by_key(|f| f.index);

        let anomaly = AnomalySignal {
            flagged: !flags.is_empty(),
            flags,
            meta,
        };

        Ok(SignalSet {
            maturity,
            risk,
            anomaly,
        })
    }
}
