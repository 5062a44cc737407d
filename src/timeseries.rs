//! Time series tables and the providers which supply them.
//!
//! A [`TimeSeries`] is a strictly increasing timestamp index with named `f64` columns. Providers
//! filter series to the run's date range and resample them to a stage's resolution.
use crate::id::NodeID;
use crate::resolution::Resolution;
use crate::technology::InterconnectionType;
use anyhow::{Context, Result, ensure};
use chrono::{Datelike, NaiveDate, NaiveDateTime, TimeDelta};
use indexmap::IndexMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};

/// Name of the timestamp column in time series files
pub const TIMESTAMP_COLUMN: &str = "timestamp";

/// Name of the demand column in node time series
pub const DEMAND_COLUMN: &str = "demand";

/// Format used when writing timestamps
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const ACCEPTED_TIMESTAMP_FORMATS: [&str; 3] =
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

/// Parse a timestamp in any of the accepted formats
pub fn parse_timestamp(s: &str) -> Result<NaiveDateTime> {
    let s = s.trim();
    ACCEPTED_TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .with_context(|| format!("Invalid timestamp '{s}'"))
}

/// An inclusive range of calendar dates
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    /// First day included
    pub start: NaiveDate,
    /// Last day included
    pub end: NaiveDate,
}

impl DateRange {
    /// Whether the timestamp falls on a day in the range
    pub fn contains(&self, timestamp: NaiveDateTime) -> bool {
        (self.start..=self.end).contains(&timestamp.date())
    }

    /// The whole of a calendar year
    pub fn year(year: i32) -> Option<Self> {
        Some(Self {
            start: NaiveDate::from_ymd_opt(year, 1, 1)?,
            end: NaiveDate::from_ymd_opt(year, 12, 31)?,
        })
    }
}

/// A table of named columns indexed by timestamp
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TimeSeries {
    index: Vec<NaiveDateTime>,
    columns: IndexMap<String, Vec<f64>>,
}

impl TimeSeries {
    /// Create a series with no columns. The index must be strictly increasing.
    pub fn new(index: Vec<NaiveDateTime>) -> Result<Self> {
        ensure!(
            index.iter().tuple_windows().all(|(a, b)| a < b),
            "Time series index must be strictly increasing"
        );

        Ok(Self {
            index,
            columns: IndexMap::new(),
        })
    }

    /// Add a column, replacing any existing column with the same name
    pub fn with_column(mut self, name: &str, values: Vec<f64>) -> Result<Self> {
        self.insert_column(name, values)?;
        Ok(self)
    }

    /// Insert a column, replacing any existing column with the same name
    pub fn insert_column(&mut self, name: &str, values: Vec<f64>) -> Result<()> {
        ensure!(
            values.len() == self.index.len(),
            "Column '{name}' has {} values but the index has {}",
            values.len(),
            self.index.len()
        );
        self.columns.insert(name.to_string(), values);

        Ok(())
    }

    /// The timestamps
    pub fn index(&self) -> &[NaiveDateTime] {
        &self.index
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the series has no rows
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Values of the named column
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    /// Iterate over columns in insertion order
    pub fn columns(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.columns
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    /// Keep only the rows for which `keep` returns true
    #[must_use]
    pub fn filter<F>(&self, keep: F) -> Self
    where
        F: Fn(NaiveDateTime) -> bool,
    {
        let rows: Vec<usize> = (0..self.len()).filter(|&i| keep(self.index[i])).collect();
        Self {
            index: rows.iter().map(|&i| self.index[i]).collect(),
            columns: self
                .columns
                .iter()
                .map(|(name, values)| (name.clone(), rows.iter().map(|&i| values[i]).collect()))
                .collect(),
        }
    }

    /// Keep only the rows within a date range
    #[must_use]
    pub fn filter_dates(&self, range: &DateRange) -> Self {
        self.filter(|ts| range.contains(ts))
    }

    /// Remove rows falling on 29 February
    #[must_use]
    pub fn drop_leap_days(&self) -> Self {
        self.filter(|ts| !(ts.month() == 2 && ts.day() == 29))
    }

    /// Resample to a fixed resolution.
    ///
    /// Bins start at midnight of the first day. Each bin takes the mean of the source rows falling
    /// in it; bins with no source rows (when upsampling) take the previous bin's value. The last
    /// bin is the one containing the end of the final source period.
    #[must_use]
    pub fn resample(&self, resolution: Resolution) -> Self {
        let (Some(&first), Some(&last)) = (self.index.first(), self.index.last()) else {
            return self.clone();
        };
        let origin = first.date().and_time(chrono::NaiveTime::MIN);
        let source_step = self
            .index
            .iter()
            .tuple_windows()
            .map(|(a, b)| *b - *a)
            .min()
            .unwrap_or_else(|| resolution.duration());
        let end = last + source_step;

        let step = resolution.duration();
        let mut bins = Vec::new();
        let mut bin = resolution.floor(first, origin);
        while bin < end {
            bins.push(bin);
            bin += step;
        }

        // Row ranges for each bin (the index is sorted so rows for a bin are contiguous)
        let mut ranges = Vec::with_capacity(bins.len());
        let mut row = 0;
        for &bin_start in &bins {
            let start = row;
            while row < self.len() && self.index[row] < bin_start + step {
                row += 1;
            }
            ranges.push(start..row);
        }

        let columns = self
            .columns
            .iter()
            .map(|(name, values)| {
                let mut out = Vec::with_capacity(bins.len());
                let mut previous = f64::NAN;
                for range in &ranges {
                    let value = if range.is_empty() {
                        previous
                    } else {
                        let slice = &values[range.clone()];
                        slice.iter().sum::<f64>() / slice.len() as f64
                    };
                    out.push(value);
                    previous = value;
                }
                (name.clone(), out)
            })
            .collect();

        Self {
            index: bins,
            columns,
        }
    }

    /// Replace NaN values by forward filling, then back filling.
    ///
    /// Returns the names of the columns which contained NaN values.
    pub fn fill_missing(&mut self) -> Vec<String> {
        let mut filled = Vec::new();
        for (name, values) in &mut self.columns {
            if !values.iter().any(|v| v.is_nan()) {
                continue;
            }
            filled.push(name.clone());
            fill_forward_backward(values);
        }

        filled
    }
}

/// Forward fill then back fill NaN values in place
pub fn fill_forward_backward(values: &mut [f64]) {
    let mut last = None;
    for value in values.iter_mut() {
        if value.is_nan() {
            if let Some(last) = last {
                *value = last;
            }
        } else {
            last = Some(*value);
        }
    }

    let mut next = None;
    for value in values.iter_mut().rev() {
        if value.is_nan() {
            if let Some(next) = next {
                *value = next;
            }
        } else {
            next = Some(*value);
        }
    }
}

/// Supplies demand, capacity factor and network limit time series
pub trait TimeSeriesProvider {
    /// The time series for a node: a `demand` column and capacity-factor columns named
    /// `<technology>_<zone>`
    fn node_series(
        &self,
        node: &NodeID,
        range: &DateRange,
        resolution: Resolution,
    ) -> Result<TimeSeries>;

    /// Network limits in MW for one interconnection type, one column per `<from>-<to>` edge
    fn interconnection_limits(
        &self,
        kind: InterconnectionType,
        range: &DateRange,
        resolution: Resolution,
    ) -> Result<TimeSeries>;
}

fn prepare(series: &TimeSeries, range: &DateRange, resolution: Resolution) -> Result<TimeSeries> {
    let series = series.filter_dates(range);
    ensure!(
        !series.is_empty(),
        "No data between {} and {}",
        range.start,
        range.end
    );

    Ok(series.resample(resolution))
}

/// Reads time series from CSV files under a data directory.
///
/// Node series are read from `nodes/<node>.csv` and limits from
/// `interconnections/<type>.csv`.
pub struct CsvTimeSeriesProvider {
    data_dir: PathBuf,
}

impl CsvTimeSeriesProvider {
    /// Create a provider reading from the given directory
    pub fn new<P: Into<PathBuf>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Path to a node's time series file
    pub fn node_path(&self, node: &NodeID) -> PathBuf {
        self.data_dir.join("nodes").join(format!("{node}.csv"))
    }

    /// Path to an interconnection type's limits file
    pub fn interconnection_path(&self, kind: InterconnectionType) -> PathBuf {
        self.data_dir
            .join("interconnections")
            .join(format!("{kind}.csv"))
    }
}

impl TimeSeriesProvider for CsvTimeSeriesProvider {
    fn node_series(
        &self,
        node: &NodeID,
        range: &DateRange,
        resolution: Resolution,
    ) -> Result<TimeSeries> {
        let path = self.node_path(node);
        let series = read_time_series_csv(&path)?;
        prepare(&series, range, resolution).with_context(|| input_err_msg(&path))
    }

    fn interconnection_limits(
        &self,
        kind: InterconnectionType,
        range: &DateRange,
        resolution: Resolution,
    ) -> Result<TimeSeries> {
        let path = self.interconnection_path(kind);
        let series = read_time_series_csv(&path)?;
        prepare(&series, range, resolution).with_context(|| input_err_msg(&path))
    }
}

/// Format an error message to include the file path
pub fn input_err_msg<P: AsRef<Path>>(file_path: P) -> String {
    format!("Error reading {}", file_path.as_ref().display())
}

/// Read a time series from a CSV file with a `timestamp` column.
///
/// Empty cells are read as NaN.
pub fn read_time_series_csv(file_path: &Path) -> Result<TimeSeries> {
    let file = File::open(file_path).with_context(|| input_err_msg(file_path))?;
    read_time_series(csv::Reader::from_reader(file)).with_context(|| input_err_msg(file_path))
}

fn read_time_series<R: std::io::Read>(mut reader: csv::Reader<R>) -> Result<TimeSeries> {
    let headers = reader.headers()?.clone();
    let timestamp_col = headers
        .iter()
        .position(|h| h.trim() == TIMESTAMP_COLUMN)
        .with_context(|| format!("Missing '{TIMESTAMP_COLUMN}' column"))?;

    let names: Vec<(usize, &str)> = headers
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != timestamp_col)
        .map(|(i, h)| (i, h.trim()))
        .collect();

    let mut index = Vec::new();
    let mut values = vec![Vec::new(); names.len()];
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let timestamp = record.get(timestamp_col).unwrap_or_default();
        index.push(parse_timestamp(timestamp).with_context(|| format!("Row {}", row + 1))?);

        for ((col, name), column) in names.iter().zip(&mut values) {
            let cell = record.get(*col).unwrap_or_default().trim();
            let value = if cell.is_empty() {
                f64::NAN
            } else {
                cell.parse().with_context(|| {
                    format!("Invalid value '{cell}' in column '{name}' at row {}", row + 1)
                })?
            };
            column.push(value);
        }
    }

    let mut series = TimeSeries::new(index)?;
    for ((_, name), column) in names.into_iter().zip(values) {
        series.insert_column(name, column)?;
    }

    Ok(series)
}

/// Serves time series held in memory
#[derive(Default)]
pub struct InMemoryProvider {
    nodes: IndexMap<NodeID, TimeSeries>,
    interconnections: IndexMap<InterconnectionType, TimeSeries>,
}

impl InMemoryProvider {
    /// Add a node's series
    #[must_use]
    pub fn with_node(mut self, node: &str, series: TimeSeries) -> Self {
        self.nodes.insert(node.into(), series);
        self
    }

    /// Add the limits for an interconnection type
    #[must_use]
    pub fn with_interconnection(mut self, kind: InterconnectionType, series: TimeSeries) -> Self {
        self.interconnections.insert(kind, series);
        self
    }
}

impl TimeSeriesProvider for InMemoryProvider {
    fn node_series(
        &self,
        node: &NodeID,
        range: &DateRange,
        resolution: Resolution,
    ) -> Result<TimeSeries> {
        let series = self
            .nodes
            .get(node)
            .with_context(|| format!("No time series for node {node}"))?;
        prepare(series, range, resolution)
    }

    fn interconnection_limits(
        &self,
        kind: InterconnectionType,
        range: &DateRange,
        resolution: Resolution,
    ) -> Result<TimeSeries> {
        let series = self
            .interconnections
            .get(&kind)
            .with_context(|| format!("No limits for interconnection type {kind}"))?;
        prepare(series, range, resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{assert_error, hourly_index, jan_1};
    use float_cmp::assert_approx_eq;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn new_rejects_unsorted_index() {
        let start = jan_1(2050);
        let index = vec![start + TimeDelta::hours(1), start];
        assert_error!(
            TimeSeries::new(index),
            "Time series index must be strictly increasing"
        );
    }

    #[test]
    fn with_column_checks_length() {
        let series = TimeSeries::new(hourly_index(2050, 3)).unwrap();
        assert!(series.with_column("demand", vec![1.0]).is_err());
    }

    #[test]
    fn resample_hourly_to_daily_takes_mean() {
        let values: Vec<f64> = (0..48).map(f64::from).collect();
        let series = TimeSeries::new(hourly_index(2050, 48))
            .unwrap()
            .with_column("demand", values)
            .unwrap();
        let daily = series.resample(Resolution::daily());

        assert_eq!(daily.index(), [jan_1(2050), jan_1(2050) + TimeDelta::days(1)]);
        let demand = daily.column("demand").unwrap();
        assert_approx_eq!(f64, demand[0], 11.5);
        assert_approx_eq!(f64, demand[1], 35.5);
    }

    #[test]
    fn resample_daily_to_hourly_forward_fills() {
        let index = vec![jan_1(2050), jan_1(2050) + TimeDelta::days(1)];
        let series = TimeSeries::new(index)
            .unwrap()
            .with_column("demand", vec![10.0, 20.0])
            .unwrap();
        let hourly = series.resample(Resolution::hourly());

        assert_eq!(hourly.len(), 48);
        let demand = hourly.column("demand").unwrap();
        assert!(demand[..24].iter().all(|&v| v == 10.0));
        assert!(demand[24..].iter().all(|&v| v == 20.0));
    }

    #[test]
    fn drop_leap_days_removes_29_february() {
        let start = NaiveDate::from_ymd_opt(2048, 2, 28)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let index = (0..3).map(|d| start + TimeDelta::days(d)).collect();
        let series = TimeSeries::new(index)
            .unwrap()
            .with_column("demand", vec![1.0, 2.0, 3.0])
            .unwrap()
            .drop_leap_days();

        assert_eq!(series.len(), 2);
        assert_eq!(series.column("demand").unwrap(), [1.0, 3.0]);
    }

    #[test]
    fn fill_missing_forward_then_backward() {
        let mut series = TimeSeries::new(hourly_index(2050, 5))
            .unwrap()
            .with_column("demand", vec![f64::NAN, 2.0, f64::NAN, f64::NAN, 5.0])
            .unwrap()
            .with_column("pv_Z1", vec![0.5; 5])
            .unwrap();
        let filled = series.fill_missing();

        assert_eq!(filled, ["demand"]);
        assert_eq!(series.column("demand").unwrap(), [2.0, 2.0, 2.0, 2.0, 5.0]);
    }

    #[test]
    fn filter_dates_is_inclusive() {
        let series = TimeSeries::new(hourly_index(2050, 72)).unwrap();
        let day = jan_1(2050).date().succ_opt().unwrap();
        let range = DateRange {
            start: day,
            end: day,
        };
        let filtered = series.filter_dates(&range);
        assert_eq!(filtered.len(), 24);
        assert_eq!(filtered.index()[0].date(), day);
    }

    #[rstest::rstest]
    #[case("2050-01-01 06:00:00")]
    #[case("2050-01-01T06:00:00")]
    #[case("2050-01-01 06:00")]
    fn parse_timestamp_formats(#[case] s: &str) {
        assert_eq!(
            parse_timestamp(s).unwrap(),
            jan_1(2050) + TimeDelta::hours(6)
        );
    }

    #[test]
    fn csv_provider_reads_and_resamples() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("nodes")).unwrap();
        let mut contents = String::from("timestamp,demand,pv_Z1\n");
        for hour in 0..48 {
            let ts = jan_1(2050) + TimeDelta::hours(hour);
            let pv = if hour == 5 { String::new() } else { "0.5".into() };
            contents.push_str(&format!("{},{},{pv}\n", ts.format(TIMESTAMP_FORMAT), hour));
        }
        fs::write(dir.path().join("nodes/NL00.csv"), contents).unwrap();

        let provider = CsvTimeSeriesProvider::new(dir.path());
        let range = DateRange {
            start: jan_1(2050).date(),
            end: jan_1(2050).date(),
        };
        let series = provider
            .node_series(&"NL00".into(), &range, Resolution::from_minutes(240).unwrap())
            .unwrap();

        assert_eq!(series.len(), 6);
        assert_approx_eq!(f64, series.column("demand").unwrap()[0], 1.5);
        assert!(series.column("pv_Z1").unwrap()[1].is_nan());
    }

    #[test]
    fn csv_provider_missing_file() {
        let dir = tempdir().unwrap();
        let provider = CsvTimeSeriesProvider::new(dir.path());
        let range = DateRange::year(2050).unwrap();
        assert!(
            provider
                .node_series(&"XX00".into(), &range, Resolution::daily())
                .is_err()
        );
    }

    #[test]
    fn in_memory_provider_filters_range() {
        let series = TimeSeries::new(hourly_index(2050, 48))
            .unwrap()
            .with_column("demand", vec![1.0; 48])
            .unwrap();
        let provider = InMemoryProvider::default().with_node("A", series);
        let range = DateRange {
            start: NaiveDate::from_ymd_opt(2050, 1, 2).unwrap(),
            end: NaiveDate::from_ymd_opt(2050, 1, 31).unwrap(),
        };
        let series = provider
            .node_series(&"A".into(), &range, Resolution::daily())
            .unwrap();
        assert_eq!(series.len(), 1);
    }
}
