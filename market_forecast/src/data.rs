//! Time series data handling for forecasting
//!
//! The cleaned table handed over by the data-cleaning step is read into one
//! [`TimeSeries`] per metric/region. Missing values stay in the series as
//! explicit `None` observations.

use crate::error::{ForecastError, Result};
use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Identifies one tracked metric, optionally scoped to a region
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MetricKey {
    pub metric: String,
    pub region: Option<String>,
}

impl MetricKey {
    pub fn new(metric: &str, region: Option<&str>) -> Self {
        Self {
            metric: metric.to_string(),
            region: region.map(str::to_string),
        }
    }

    /// A metric without a region scope
    pub fn global(metric: &str) -> Self {
        Self::new(metric, None)
    }

    /// The same region with a different metric
    pub fn sibling(&self, metric: &str) -> Self {
        Self {
            metric: metric.to_string(),
            region: self.region.clone(),
        }
    }
}

impl std::fmt::Display for MetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.region {
            Some(region) => write!(f, "{}@{}", self.metric, region),
            None => f.write_str(&self.metric),
        }
    }
}

/// One timestamped value; `None` marks a missing observation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    pub value: Option<f64>,
}

impl Observation {
    pub fn new(timestamp: DateTime<Utc>, value: Option<f64>) -> Self {
        Self { timestamp, value }
    }
}

/// Ordered observations of one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    key: MetricKey,
    observations: Vec<Observation>,
}

impl TimeSeries {
    /// Create a series, checking that timestamps strictly increase and that
    /// every present value is finite
    pub fn new(key: MetricKey, observations: Vec<Observation>) -> Result<Self> {
        for pair in observations.windows(2) {
            if pair[1].timestamp <= pair[0].timestamp {
                return Err(ForecastError::DataError(format!(
                    "Timestamps for {} must be strictly increasing ({} then {})",
                    key, pair[0].timestamp, pair[1].timestamp
                )));
            }
        }
        if let Some(obs) = observations
            .iter()
            .find(|o| o.value.map_or(false, |v| !v.is_finite()))
        {
            return Err(ForecastError::DataError(format!(
                "Non-finite value for {} at {}",
                key, obs.timestamp
            )));
        }

        Ok(Self { key, observations })
    }

    /// Create a series from dates and fully observed values
    pub fn from_values(key: MetricKey, dates: Vec<DateTime<Utc>>, values: Vec<f64>) -> Result<Self> {
        if dates.len() != values.len() {
            return Err(ForecastError::DataError(format!(
                "Dates length ({}) doesn't match values length ({})",
                dates.len(),
                values.len()
            )));
        }

        let observations = dates
            .into_iter()
            .zip(values)
            .map(|(t, v)| Observation::new(t, Some(v)))
            .collect();

        Self::new(key, observations)
    }

    pub fn key(&self) -> &MetricKey {
        &self.key
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn timestamps(&self) -> Vec<DateTime<Utc>> {
        self.observations.iter().map(|o| o.timestamp).collect()
    }

    /// Values with missing markers preserved
    pub fn values(&self) -> Vec<Option<f64>> {
        self.observations.iter().map(|o| o.value).collect()
    }

    /// Only the observed values, in order
    pub fn observed_values(&self) -> Vec<f64> {
        self.observations.iter().filter_map(|o| o.value).collect()
    }

    /// Number of non-missing observations
    pub fn observed_count(&self) -> usize {
        self.observations.iter().filter(|o| o.value.is_some()).count()
    }

    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.observations.first().map(|o| o.timestamp)
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.observations.last().map(|o| o.timestamp)
    }

    /// The first `len` observations as a new series
    pub fn prefix(&self, len: usize) -> Self {
        Self {
            key: self.key.clone(),
            observations: self.observations[..len.min(self.len())].to_vec(),
        }
    }

    /// A copy with the same timestamps and replaced values
    pub fn with_values(&self, values: &[Option<f64>]) -> Result<Self> {
        if values.len() != self.len() {
            return Err(ForecastError::DataError(format!(
                "Replacement values length ({}) doesn't match series length ({})",
                values.len(),
                self.len()
            )));
        }

        let observations = self
            .observations
            .iter()
            .zip(values)
            .map(|(o, v)| Observation::new(o.timestamp, *v))
            .collect();

        Self::new(self.key.clone(), observations)
    }

    /// Spacing between consecutive observations
    pub fn cadence(&self) -> Result<Cadence> {
        Cadence::infer(&self.timestamps())
    }

    /// The `steps` timestamps immediately following the last observation
    pub fn future_timestamps(&self, steps: usize) -> Result<Vec<DateTime<Utc>>> {
        let last = self.last_timestamp().ok_or_else(|| {
            ForecastError::DataError(format!("Series {} has no timestamps", self.key))
        })?;
        let cadence = self.cadence()?;

        (1..=steps).map(|k| cadence.advance(last, k)).collect()
    }

    /// Gap-free values for model fitting.
    ///
    /// Interior gaps are linearly interpolated, leading gaps are dropped and
    /// trailing gaps are reported as an offset so forecasts still start
    /// right after the last timestamp.
    pub fn model_view(&self) -> ModelSeries {
        let values = self.values();
        let first = values.iter().position(Option::is_some);
        let last = values.iter().rposition(Option::is_some);

        let (first, last) = match (first, last) {
            (Some(f), Some(l)) => (f, l),
            _ => {
                return ModelSeries {
                    values: Vec::new(),
                    trailing_gap: values.len(),
                    interpolated: 0,
                }
            }
        };

        let mut filled = Vec::with_capacity(last - first + 1);
        let mut interpolated = 0;
        let mut prev_idx = first;

        for i in first..=last {
            match values[i] {
                Some(v) => {
                    filled.push(v);
                    prev_idx = i;
                }
                None => {
                    // next observed point exists because `last` is observed
                    let next_idx = (i + 1..=last)
                        .find(|&j| values[j].is_some())
                        .unwrap_or(last);
                    let (v0, v1) = (
                        values[prev_idx].unwrap_or_default(),
                        values[next_idx].unwrap_or_default(),
                    );
                    let frac = (i - prev_idx) as f64 / (next_idx - prev_idx) as f64;
                    filled.push(v0 + (v1 - v0) * frac);
                    interpolated += 1;
                }
            }
        }

        ModelSeries {
            values: filled,
            trailing_gap: values.len() - 1 - last,
            interpolated,
        }
    }
}

/// Gap-free view of a series used by the model adapters
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSeries {
    /// Values from the first to the last observation, gaps interpolated
    pub values: Vec<f64>,
    /// Missing observations after the last observed value
    pub trailing_gap: usize,
    /// How many interior points were interpolated
    pub interpolated: usize,
}

/// Regular spacing of a series
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Whole calendar months (1 = monthly, 3 = quarterly, 12 = yearly)
    Months(u32),
    /// A fixed duration
    Fixed(Duration),
}

impl Cadence {
    /// Infer the cadence from strictly increasing timestamps
    pub fn infer(timestamps: &[DateTime<Utc>]) -> Result<Self> {
        if timestamps.len() < 2 {
            return Err(ForecastError::DataError(
                "Cannot infer a cadence from fewer than 2 timestamps".to_string(),
            ));
        }

        let month_steps: Option<Vec<u32>> = timestamps
            .windows(2)
            .map(|pair| whole_months_between(pair[0], pair[1]))
            .collect();

        if let Some(steps) = month_steps {
            if let Some(&step) = steps.iter().min() {
                if step > 0 {
                    return Ok(Cadence::Months(step));
                }
            }
        }

        let mut gaps: Vec<i64> = timestamps
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).num_seconds())
            .collect();
        gaps.sort_unstable();
        let median = gaps[gaps.len() / 2];

        if median <= 0 {
            return Err(ForecastError::DataError(
                "Timestamps must be strictly increasing".to_string(),
            ));
        }

        Ok(Cadence::Fixed(Duration::seconds(median)))
    }

    /// Move `from` forward by `k` cadence steps
    pub fn advance(&self, from: DateTime<Utc>, k: usize) -> Result<DateTime<Utc>> {
        let out_of_range = || {
            ForecastError::DataError(format!("Timestamp overflow advancing {} by {} steps", from, k))
        };

        match self {
            Cadence::Months(m) => {
                let months = u32::try_from(k)
                    .ok()
                    .and_then(|k| k.checked_mul(*m))
                    .ok_or_else(out_of_range)?;
                from.checked_add_months(Months::new(months))
                    .ok_or_else(out_of_range)
            }
            Cadence::Fixed(d) => {
                let k = i32::try_from(k).map_err(|_| out_of_range())?;
                from.checked_add_signed(*d * k).ok_or_else(out_of_range)
            }
        }
    }
}

fn is_month_end(t: DateTime<Utc>) -> bool {
    t.date_naive().succ_opt().map_or(false, |next| next.day() == 1)
}

/// Whole calendar months between two timestamps, if they are exactly that
fn whole_months_between(a: DateTime<Utc>, b: DateTime<Utc>) -> Option<u32> {
    if a.time() != b.time() {
        return None;
    }
    let same_day = a.day() == b.day() || (is_month_end(a) && is_month_end(b));
    if !same_day {
        return None;
    }
    let months = (b.year() - a.year()) * 12 + b.month() as i32 - a.month() as i32;
    u32::try_from(months).ok().filter(|m| *m > 0)
}

/// Parse the timestamp formats found in cleaned tables: RFC 3339,
/// `YYYY-MM-DD`, `YYYY-MM` and bare years
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.with_timezone(&Utc));
    }
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return midnight(d, raw);
    }
    if let Ok(d) = NaiveDate::parse_from_str(&format!("{}-01", raw), "%Y-%m-%d") {
        return midnight(d, raw);
    }
    if raw.len() == 4 {
        if let Ok(year) = raw.parse::<i32>() {
            if let Some(d) = NaiveDate::from_ymd_opt(year, 1, 1) {
                return midnight(d, raw);
            }
        }
    }

    Err(ForecastError::DataError(format!(
        "Unrecognised timestamp '{}'",
        raw
    )))
}

fn midnight(date: NaiveDate, raw: &str) -> Result<DateTime<Utc>> {
    let naive = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| ForecastError::DataError(format!("Invalid date '{}'", raw)))?;
    Ok(Utc.from_utc_datetime(&naive))
}

/// Column layout of a cleaned table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TableLayout {
    /// `metric,region,timestamp,value`, one row per observation
    #[default]
    Long,
    /// A time column followed by one column per metric
    Wide,
}

impl std::str::FromStr for TableLayout {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "long" => Ok(TableLayout::Long),
            "wide" => Ok(TableLayout::Wide),
            other => Err(ForecastError::InvalidParameter(format!(
                "Unknown table layout '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct LongRow {
    metric: String,
    #[serde(default)]
    region: Option<String>,
    timestamp: String,
    value: Option<f64>,
}

/// All series of a cleaned table, keyed by metric and region
#[derive(Debug, Clone, Default)]
pub struct MetricTable {
    series: BTreeMap<MetricKey, TimeSeries>,
}

impl MetricTable {
    /// Load a table from a CSV file
    pub fn from_csv<P: AsRef<Path>>(path: P, layout: TableLayout) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(file, layout)
    }

    /// Load a table from any CSV source
    pub fn from_reader<R: Read>(reader: R, layout: TableLayout) -> Result<Self> {
        let reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let rows = match layout {
            TableLayout::Long => Self::read_long(reader)?,
            TableLayout::Wide => Self::read_wide(reader)?,
        };

        Self::from_rows(rows)
    }

    /// Build a table from already-parsed series
    pub fn from_series(series: Vec<TimeSeries>) -> Result<Self> {
        let mut table = Self::default();
        for s in series {
            if table.series.contains_key(s.key()) {
                return Err(ForecastError::DataError(format!(
                    "Series {} supplied twice",
                    s.key()
                )));
            }
            table.series.insert(s.key().clone(), s);
        }
        Ok(table)
    }

    fn read_long<R: Read>(mut reader: csv::Reader<R>) -> Result<Vec<(MetricKey, Observation)>> {
        let mut rows = Vec::new();
        for record in reader.deserialize() {
            let row: LongRow = record?;
            let region = row.region.filter(|r| !r.is_empty());
            let key = MetricKey {
                metric: row.metric,
                region,
            };
            rows.push((key, Observation::new(parse_timestamp(&row.timestamp)?, row.value)));
        }
        Ok(rows)
    }

    fn read_wide<R: Read>(mut reader: csv::Reader<R>) -> Result<Vec<(MetricKey, Observation)>> {
        let headers = reader.headers()?.clone();
        if headers.len() < 2 {
            return Err(ForecastError::DataError(
                "Wide tables need a time column and at least one metric column".to_string(),
            ));
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let timestamp = parse_timestamp(record.get(0).unwrap_or_default())?;

            for (column, field) in headers.iter().zip(record.iter()).skip(1) {
                let value = if field.is_empty() {
                    None
                } else {
                    Some(field.parse::<f64>().map_err(|e| {
                        ForecastError::DataError(format!(
                            "Column '{}' at {}: '{}' is not numeric ({})",
                            column, timestamp, field, e
                        ))
                    })?)
                };
                rows.push((MetricKey::global(column), Observation::new(timestamp, value)));
            }
        }
        Ok(rows)
    }

    fn from_rows(rows: Vec<(MetricKey, Observation)>) -> Result<Self> {
        let mut grouped: BTreeMap<MetricKey, Vec<Observation>> = BTreeMap::new();
        for (key, obs) in rows {
            grouped.entry(key).or_default().push(obs);
        }

        let mut series = Vec::with_capacity(grouped.len());
        for (key, mut observations) in grouped {
            observations.sort_by_key(|o| o.timestamp);
            if let Some(pair) = observations
                .windows(2)
                .find(|pair| pair[0].timestamp == pair[1].timestamp)
            {
                return Err(ForecastError::DataError(format!(
                    "Duplicate timestamp {} for {}",
                    pair[0].timestamp, key
                )));
            }
            series.push(TimeSeries::new(key, observations)?);
        }

        Self::from_series(series)
    }

    pub fn get(&self, key: &MetricKey) -> Option<&TimeSeries> {
        self.series.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &MetricKey> {
        self.series.keys()
    }

    pub fn series(&self) -> impl Iterator<Item = &TimeSeries> {
        self.series.values()
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}
