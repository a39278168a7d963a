use chrono::{DateTime, Utc};
use std::str::FromStr;

/// Timestamp precision of line protocol writes.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub enum Precision {
    #[default]
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
}

impl Precision {
    /// Value of the `precision` query parameter of the write API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Precision::Nanoseconds => "ns",
            Precision::Microseconds => "us",
            Precision::Milliseconds => "ms",
            Precision::Seconds => "s",
        }
    }

    /// Converts a datetime to an integer timestamp in this precision.
    ///
    /// Nanoseconds only cover the years 1677 to 2262, hence the option.
    pub fn timestamp(&self, datetime: &DateTime<Utc>) -> Option<i64> {
        match self {
            Precision::Nanoseconds => datetime.timestamp_nanos_opt(),
            Precision::Microseconds => Some(datetime.timestamp_micros()),
            Precision::Milliseconds => Some(datetime.timestamp_millis()),
            Precision::Seconds => Some(datetime.timestamp()),
        }
    }
}

impl FromStr for Precision {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ns" => Ok(Precision::Nanoseconds),
            "us" => Ok(Precision::Microseconds),
            "ms" => Ok(Precision::Milliseconds),
            "s" => Ok(Precision::Seconds),
            _ => anyhow::bail!("Invalid precision '{}': expected ns, us, ms or s", s),
        }
    }
}
