//! Derived metric engine
//!
//! Pure mapping from `{current reading, previous reading in the same series}`
//! to velocity, momentum, trend and forecasted exhaustion. Callers persist
//! the result; nothing here performs I/O.
//!
//! Bootstrap (no previous reading) is deliberately asymmetric: a growth
//! series takes the current raw value as its first velocity, a consumption
//! series starts from zero.

use crate::observation::{columns, format_timestamp, ObservationRow, SeriesKind};
use crate::thresholds::{BandThresholds, MetricThresholds};
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Forecasts further out than this are treated as "never"
const MAX_FORECAST_SECONDS: f64 = 1.0e12;

/// The reading being derived
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub observed_at: DateTime<Utc>,
    pub value: f64,
    pub measured_rate: Option<f64>,
    pub target_rate: Option<f64>,
    pub remaining_material: Option<f64>,
}

impl Reading {
    pub fn new(observed_at: DateTime<Utc>, value: f64) -> Self {
        Self {
            observed_at,
            value,
            measured_rate: None,
            target_rate: None,
            remaining_material: None,
        }
    }

    pub fn with_rates(mut self, measured: Option<f64>, target: Option<f64>) -> Self {
        self.measured_rate = measured;
        self.target_rate = target;
        self
    }

    pub fn with_remaining(mut self, remaining: f64) -> Self {
        self.remaining_material = Some(remaining);
        self
    }

    pub fn from_row(row: &ObservationRow) -> Result<Self> {
        Ok(Self {
            observed_at: row.observed_at()?,
            value: row.f64(columns::VALUE).ok_or_else(|| {
                Error::InvalidObservation("Missing numeric column 'value'".to_string())
            })?,
            measured_rate: row.f64(columns::MEASURED_RATE),
            target_rate: row.f64(columns::TARGET_RATE),
            remaining_material: row.f64(columns::REMAINING_MATERIAL),
        })
    }

    /// measured ÷ target, when both are present and the target is positive
    pub fn performance_factor(&self) -> Option<f64> {
        match (self.measured_rate, self.target_rate) {
            (Some(measured), Some(target)) if target > 0.0 => {
                let factor = measured / target;
                factor.is_finite().then_some(factor)
            }
            _ => None,
        }
    }
}

/// The previous reading in the same series, as last persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorReading {
    pub observed_at: DateTime<Utc>,
    pub value: f64,
    /// Persisted velocity, if the prior reading was already derived
    pub velocity: Option<f64>,
    pub measured_rate: Option<f64>,
}

impl PriorReading {
    pub fn new(observed_at: DateTime<Utc>, value: f64, velocity: Option<f64>) -> Self {
        Self {
            observed_at,
            value,
            velocity,
            measured_rate: None,
        }
    }

    pub fn from_row(row: &ObservationRow) -> Result<Self> {
        Ok(Self {
            observed_at: row.observed_at()?,
            value: row.f64(columns::VALUE).ok_or_else(|| {
                Error::InvalidObservation("Missing numeric column 'value'".to_string())
            })?,
            velocity: row.f64(columns::VELOCITY),
            measured_rate: row.f64(columns::MEASURED_RATE),
        })
    }
}

/// Growth series trend tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrowthTrend {
    InsufficientData,
    RapidDecline,
    ModerateDecline,
    SlowDecline,
    Stable,
    SlowGrowth,
    ModerateGrowth,
    RapidGrowth,
}

impl GrowthTrend {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrowthTrend::InsufficientData => "insufficient_data",
            GrowthTrend::RapidDecline => "rapid_decline",
            GrowthTrend::ModerateDecline => "moderate_decline",
            GrowthTrend::SlowDecline => "slow_decline",
            GrowthTrend::Stable => "stable",
            GrowthTrend::SlowGrowth => "slow_growth",
            GrowthTrend::ModerateGrowth => "moderate_growth",
            GrowthTrend::RapidGrowth => "rapid_growth",
        }
    }

    fn from_band(band: i8) -> Self {
        match band {
            i8::MIN..=-3 => GrowthTrend::RapidDecline,
            -2 => GrowthTrend::ModerateDecline,
            -1 => GrowthTrend::SlowDecline,
            0 => GrowthTrend::Stable,
            1 => GrowthTrend::SlowGrowth,
            2 => GrowthTrend::ModerateGrowth,
            _ => GrowthTrend::RapidGrowth,
        }
    }
}

/// Consumption series trend tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumptionTrend {
    InsufficientData,
    SharpDeceleration,
    ModerateDeceleration,
    MildDeceleration,
    Steady,
    MildAcceleration,
    ModerateAcceleration,
    CriticalAcceleration,
}

impl ConsumptionTrend {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsumptionTrend::InsufficientData => "insufficient_data",
            ConsumptionTrend::SharpDeceleration => "sharp_deceleration",
            ConsumptionTrend::ModerateDeceleration => "moderate_deceleration",
            ConsumptionTrend::MildDeceleration => "mild_deceleration",
            ConsumptionTrend::Steady => "steady",
            ConsumptionTrend::MildAcceleration => "mild_acceleration",
            ConsumptionTrend::ModerateAcceleration => "moderate_acceleration",
            ConsumptionTrend::CriticalAcceleration => "critical_acceleration",
        }
    }

    fn from_band(band: i8) -> Self {
        match band {
            i8::MIN..=-3 => ConsumptionTrend::SharpDeceleration,
            -2 => ConsumptionTrend::ModerateDeceleration,
            -1 => ConsumptionTrend::MildDeceleration,
            0 => ConsumptionTrend::Steady,
            1 => ConsumptionTrend::MildAcceleration,
            2 => ConsumptionTrend::ModerateAcceleration,
            _ => ConsumptionTrend::CriticalAcceleration,
        }
    }
}

/// Trend tag of either series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum Trend {
    Growth(GrowthTrend),
    Consumption(ConsumptionTrend),
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Growth(t) => t.as_str(),
            Trend::Consumption(t) => t.as_str(),
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived metric snapshot; a rebuildable cache, never source of truth
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedMetrics {
    pub velocity: f64,
    /// Consumption series only
    pub momentum: Option<f64>,
    pub trend: Trend,
    /// Consumption series only
    pub forecasted_exhaustion_at: Option<DateTime<Utc>>,
}

impl DerivedMetrics {
    /// Render as a change set over the derived columns
    pub fn to_changes(&self, derived_at: DateTime<Utc>) -> ObservationRow {
        let mut changes = ObservationRow::new()
            .with(columns::VELOCITY, self.velocity)
            .with(columns::TREND, self.trend.as_str())
            .with(columns::DERIVED_AT, format_timestamp(derived_at));
        changes.set(
            columns::MOMENTUM,
            self.momentum
                .map(serde_json::Value::from)
                .unwrap_or(serde_json::Value::Null),
        );
        changes.set(
            columns::FORECASTED_EXHAUSTION_AT,
            self.forecasted_exhaustion_at
                .map(|ts| serde_json::Value::from(format_timestamp(ts)))
                .unwrap_or(serde_json::Value::Null),
        );
        changes
    }
}

/// Days between two readings, never less than one
pub fn days_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    let secs = (later - earlier).num_seconds().abs() as f64;
    (secs / SECONDS_PER_DAY).max(1.0)
}

/// Classify `x` into a signed band in `-3..=3`
fn band(x: f64, thresholds: &BandThresholds) -> i8 {
    let magnitude = x.abs();
    let level = if magnitude <= thresholds.stable {
        0
    } else if magnitude <= thresholds.slow {
        1
    } else if magnitude <= thresholds.moderate {
        2
    } else {
        3
    };
    if x < 0.0 {
        -level
    } else {
        level
    }
}

/// Stateless engine parameterized by band configuration
#[derive(Debug, Clone, Default)]
pub struct MetricEngine {
    thresholds: MetricThresholds,
}

impl MetricEngine {
    pub fn new(thresholds: MetricThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &MetricThresholds {
        &self.thresholds
    }

    pub fn compute(
        &self,
        kind: SeriesKind,
        current: &Reading,
        previous: Option<&PriorReading>,
    ) -> DerivedMetrics {
        match kind {
            SeriesKind::Petri => self.compute_growth(current, previous),
            SeriesKind::Gasifier => self.compute_consumption(current, previous),
        }
    }

    fn compute_growth(&self, current: &Reading, previous: Option<&PriorReading>) -> DerivedMetrics {
        let (velocity, trend) = match previous {
            None => (current.value, GrowthTrend::InsufficientData),
            Some(prev) => {
                let velocity = (current.value - prev.value)
                    / days_between(prev.observed_at, current.observed_at);
                (velocity, GrowthTrend::from_band(band(velocity, &self.thresholds.growth)))
            }
        };
        DerivedMetrics {
            velocity,
            momentum: None,
            trend: Trend::Growth(trend),
            forecasted_exhaustion_at: None,
        }
    }

    fn compute_consumption(
        &self,
        current: &Reading,
        previous: Option<&PriorReading>,
    ) -> DerivedMetrics {
        let delta_velocity = previous
            .map(|prev| {
                (current.value - prev.value) / days_between(prev.observed_at, current.observed_at)
            })
            .unwrap_or(0.0);
        let velocity = current
            .measured_rate
            .filter(|r| r.is_finite())
            .unwrap_or(delta_velocity);

        let (momentum, trend) = match previous {
            None => (0.0, ConsumptionTrend::InsufficientData),
            Some(prev) => {
                let momentum = prev
                    .velocity
                    .or(prev.measured_rate)
                    .map(|prev_velocity| velocity - prev_velocity)
                    .unwrap_or(0.0);
                (momentum, self.classify_consumption(momentum, current.performance_factor()))
            }
        };

        DerivedMetrics {
            velocity,
            momentum: Some(momentum),
            trend: Trend::Consumption(trend),
            forecasted_exhaustion_at: forecast_exhaustion(
                current.observed_at,
                current.remaining_material,
                velocity,
            ),
        }
    }

    fn classify_consumption(&self, momentum: f64, factor: Option<f64>) -> ConsumptionTrend {
        if let Some(factor) = factor {
            if factor >= self.thresholds.critical_performance_factor && momentum > 0.0 {
                return ConsumptionTrend::CriticalAcceleration;
            }
            if factor <= self.thresholds.low_performance_factor && momentum < 0.0 {
                return ConsumptionTrend::SharpDeceleration;
            }
        }
        ConsumptionTrend::from_band(band(momentum, &self.thresholds.consumption))
    }
}

/// `observed_at + remaining / rate` days; `None` when it cannot be projected
pub fn forecast_exhaustion(
    observed_at: DateTime<Utc>,
    remaining: Option<f64>,
    rate: f64,
) -> Option<DateTime<Utc>> {
    let remaining = remaining.filter(|r| r.is_finite() && *r >= 0.0)?;
    if !rate.is_finite() || rate <= 0.0 {
        return None;
    }
    let seconds = remaining / rate * SECONDS_PER_DAY;
    if !seconds.is_finite() || seconds > MAX_FORECAST_SECONDS {
        return None;
    }
    let millis = (seconds * 1000.0).round() as i64;
    observed_at.checked_add_signed(Duration::milliseconds(millis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap() + Duration::days(n)
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    /// Feed readings through the engine the way the write path does
    fn run_series(kind: SeriesKind, readings: &[Reading]) -> Vec<DerivedMetrics> {
        let engine = MetricEngine::default();
        let mut prev: Option<PriorReading> = None;
        let mut out = Vec::new();
        for r in readings {
            let m = engine.compute(kind, r, prev.as_ref());
            prev = Some(PriorReading {
                observed_at: r.observed_at,
                value: r.value,
                velocity: Some(m.velocity),
                measured_rate: r.measured_rate,
            });
            out.push(m);
        }
        out
    }

    #[test]
    fn test_growth_velocities() {
        let readings = [
            Reading::new(day(0), 10.0),
            Reading::new(day(1), 25.0),
            Reading::new(day(3), 30.0),
        ];
        let metrics = run_series(SeriesKind::Petri, &readings);
        let velocities: Vec<f64> = metrics.iter().map(|m| m.velocity).collect();
        assert_eq!(velocities, vec![10.0, 15.0, 2.5]);
        assert_eq!(metrics[0].trend, Trend::Growth(GrowthTrend::InsufficientData));
        assert_eq!(metrics[1].trend, Trend::Growth(GrowthTrend::RapidGrowth));
        assert_eq!(metrics[2].trend, Trend::Growth(GrowthTrend::ModerateGrowth));
        assert!(metrics.iter().all(|m| m.momentum.is_none()));
    }

    #[test]
    fn test_same_day_readings_use_one_day_floor() {
        let prev = PriorReading::new(day(0), 10.0, None);
        let current = Reading::new(day(0) + Duration::hours(3), 12.0);
        let m = MetricEngine::default().compute(SeriesKind::Petri, &current, Some(&prev));
        assert_eq!(m.velocity, 2.0);
    }

    #[test]
    fn test_consumption_momentum() {
        let readings = [
            Reading::new(day(0), 100.0).with_rates(Some(1.0), Some(1.0)),
            Reading::new(day(1), 98.5).with_rates(Some(1.5), Some(1.0)),
            Reading::new(day(2), 97.7).with_rates(Some(0.8), Some(1.0)),
        ];
        let metrics = run_series(SeriesKind::Gasifier, &readings);
        let momentum: Vec<f64> = metrics.iter().map(|m| m.momentum.unwrap()).collect();
        assert!(approx(momentum[0], 0.0));
        assert!(approx(momentum[1], 0.5));
        assert!(approx(momentum[2], -0.7));
    }

    #[test]
    fn test_consumption_bootstrap_velocity_is_zero() {
        let m = MetricEngine::default().compute(
            SeriesKind::Gasifier,
            &Reading::new(day(0), 40.0),
            None,
        );
        assert_eq!(m.velocity, 0.0);
        assert_eq!(m.momentum, Some(0.0));
        assert_eq!(m.trend, Trend::Consumption(ConsumptionTrend::InsufficientData));
        assert!(m.forecasted_exhaustion_at.is_none());
    }

    #[test]
    fn test_forecast() {
        assert_eq!(forecast_exhaustion(day(0), Some(10.0), 2.0), Some(day(5)));
        assert_eq!(forecast_exhaustion(day(0), Some(10.0), 0.0), None);
        assert_eq!(forecast_exhaustion(day(0), Some(10.0), -1.0), None);
        assert_eq!(forecast_exhaustion(day(0), None, 2.0), None);
        assert_eq!(forecast_exhaustion(day(0), Some(1.0e12), 1.0e-12), None);
    }

    #[test]
    fn test_forecast_through_engine() {
        let prev = PriorReading::new(day(0), 50.0, Some(2.0));
        let current = Reading::new(day(1), 48.0)
            .with_rates(Some(2.0), Some(2.0))
            .with_remaining(10.0);
        let m = MetricEngine::default().compute(SeriesKind::Gasifier, &current, Some(&prev));
        assert_eq!(m.forecasted_exhaustion_at, Some(day(6)));
        assert_eq!(m.trend, Trend::Consumption(ConsumptionTrend::Steady));
    }

    #[test]
    fn test_performance_factor_overrides_band() {
        let engine = MetricEngine::default();
        let prev = PriorReading::new(day(0), 0.0, Some(1.0));

        let hot = Reading::new(day(1), 0.0).with_rates(Some(1.02), Some(0.5));
        let m = engine.compute(SeriesKind::Gasifier, &hot, Some(&prev));
        assert_eq!(m.trend, Trend::Consumption(ConsumptionTrend::CriticalAcceleration));

        let cold = Reading::new(day(1), 0.0).with_rates(Some(0.98), Some(4.0));
        let m = engine.compute(SeriesKind::Gasifier, &cold, Some(&prev));
        assert_eq!(m.trend, Trend::Consumption(ConsumptionTrend::SharpDeceleration));
    }

    #[test]
    fn test_bands_follow_configuration() {
        let thresholds = MetricThresholds {
            growth: BandThresholds::new(10.0, 20.0, 30.0),
            ..Default::default()
        };
        let engine = MetricEngine::new(thresholds);
        let prev = PriorReading::new(day(0), 0.0, None);
        let m = engine.compute(SeriesKind::Petri, &Reading::new(day(1), 15.0), Some(&prev));
        assert_eq!(m.trend, Trend::Growth(GrowthTrend::SlowGrowth));
        let m = engine.compute(SeriesKind::Petri, &Reading::new(day(1), -35.0), Some(&prev));
        assert_eq!(m.trend, Trend::Growth(GrowthTrend::RapidDecline));
    }

    #[test]
    fn test_to_changes_writes_derived_columns_only() {
        let m = MetricEngine::default().compute(SeriesKind::Petri, &Reading::new(day(0), 3.0), None);
        let changes = m.to_changes(day(0));
        let mut cols: Vec<&str> = changes.columns().collect();
        cols.sort();
        let mut expected = columns::DERIVED.to_vec();
        expected.sort();
        assert_eq!(cols, expected);
        assert!(changes.get(columns::MOMENTUM).unwrap().is_null());
    }
}
