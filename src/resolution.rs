//! Time resolutions at which the model is solved.
use anyhow::{Context, Result, ensure};
use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const MINUTES_PER_HOUR: u32 = 60;
const MINUTES_PER_DAY: u32 = 24 * MINUTES_PER_HOUR;
const MINUTES_PER_WEEK: u32 = 7 * MINUTES_PER_DAY;

/// A fixed time granularity, e.g. daily or hourly.
///
/// Resolutions are totally ordered by duration, so sorting a list of them in reverse gives the
/// order in which stages are solved (coarsest first).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Resolution {
    minutes: u32,
}

impl Resolution {
    /// Create a resolution with the given length in minutes
    pub fn from_minutes(minutes: u32) -> Result<Self> {
        ensure!(minutes > 0, "Resolution must be longer than zero minutes");
        Ok(Self { minutes })
    }

    /// Hourly resolution
    pub fn hourly() -> Self {
        Self {
            minutes: MINUTES_PER_HOUR,
        }
    }

    /// Daily resolution
    pub fn daily() -> Self {
        Self {
            minutes: MINUTES_PER_DAY,
        }
    }

    /// Length of one timestep in minutes
    pub fn minutes(&self) -> u32 {
        self.minutes
    }

    /// Length of one timestep in hours
    pub fn hours(&self) -> f64 {
        f64::from(self.minutes) / f64::from(MINUTES_PER_HOUR)
    }

    /// Length of one timestep as a [`TimeDelta`]
    pub fn duration(&self) -> TimeDelta {
        TimeDelta::minutes(i64::from(self.minutes))
    }

    /// The start of the bin containing `timestamp`, with bins laid out from `origin`.
    pub fn floor(&self, timestamp: NaiveDateTime, origin: NaiveDateTime) -> NaiveDateTime {
        let step = i64::from(self.minutes);
        let offset = (timestamp - origin).num_minutes();
        origin + TimeDelta::minutes(offset.div_euclid(step) * step)
    }
}

impl FromStr for Resolution {
    type Err = anyhow::Error;

    /// Parse strings like `1D`, `4H`, `30min` or `1W` (case-insensitive, count defaults to 1)
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
        let (count, unit) = s.split_at(split);
        let count: u32 = if count.is_empty() {
            1
        } else {
            count
                .parse()
                .with_context(|| format!("Invalid count in resolution '{s}'"))?
        };

        let unit_minutes = match unit.trim().to_ascii_lowercase().as_str() {
            "min" | "t" => 1,
            "h" => MINUTES_PER_HOUR,
            "d" => MINUTES_PER_DAY,
            "w" => MINUTES_PER_WEEK,
            other => anyhow::bail!("Unknown unit '{other}' in resolution '{s}'"),
        };

        let minutes = count
            .checked_mul(unit_minutes)
            .with_context(|| format!("Resolution '{s}' is too long"))?;
        Self::from_minutes(minutes).with_context(|| format!("Invalid resolution '{s}'"))
    }
}

impl TryFrom<String> for Resolution {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Resolution> for String {
    fn from(value: Resolution) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.minutes;
        if m % MINUTES_PER_WEEK == 0 {
            write!(f, "{}W", m / MINUTES_PER_WEEK)
        } else if m % MINUTES_PER_DAY == 0 {
            write!(f, "{}D", m / MINUTES_PER_DAY)
        } else if m % MINUTES_PER_HOUR == 0 {
            write!(f, "{}H", m / MINUTES_PER_HOUR)
        } else {
            write!(f, "{m}min")
        }
    }
}
