use super::aggregation::Aggregation;
use super::metric::{MetricTags, reserved_tag_key_reason};
use crate::storage::StorageError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Lookback applied when a query carries no start time.
pub const DEFAULT_LOOKBACK_HOURS: i64 = 24;

/// Filter specification for reading metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "name": "cpu_usage",
    "tags": {"host": "server-01"},
    "start_time": "2023-09-25T00:00:00Z",
    "end_time": "2023-09-25T23:59:59Z",
    "aggregation": "mean"
}))]
pub struct MetricQuery {
    /// Exact, case-sensitive measurement name.
    #[serde(default)]
    pub name: Option<String>,

    /// Required tag values, combined with AND.
    #[serde(default)]
    pub tags: MetricTags,

    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,

    /// Raw points are returned when absent.
    #[serde(default)]
    pub aggregation: Option<Aggregation>,
}

/// Time bounds a query is actually evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// The end was not provided: the backend evaluates up to its own "now".
    pub open_ended: bool,
}

impl TimeRange {
    pub fn width(&self) -> Duration {
        self.end - self.start
    }
}

impl MetricQuery {
    pub fn for_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start_time = Some(start);
        self.end_time = Some(end);
        self
    }

    pub fn since(mut self, start: DateTime<Utc>) -> Self {
        self.start_time = Some(start);
        self.end_time = None;
        self
    }

    pub fn aggregated(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = Some(aggregation);
        self
    }

    /// Sets the aggregation from its textual name.
    pub fn aggregated_by_name(self, name: &str) -> Result<Self, StorageError> {
        Ok(self.aggregated(name.parse()?))
    }

    /// Resolves the effective range against `now`.
    ///
    /// A lone `end_time` is ignored and falls back to the default window.
    pub fn effective_range(&self, now: DateTime<Utc>) -> TimeRange {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => TimeRange {
                start,
                end,
                open_ended: false,
            },
            (Some(start), None) => TimeRange {
                start,
                end: now,
                open_ended: true,
            },
            (None, _) => TimeRange {
                start: now - Duration::hours(DEFAULT_LOOKBACK_HOURS),
                end: now,
                open_ended: false,
            },
        }
    }

    /// Checks the query before anything is sent to the backend.
    pub fn validate(&self) -> Result<(), StorageError> {
        if let Some(name) = &self.name {
            if name.is_empty() {
                return Err(StorageError::InvalidQuery(
                    "name filter must not be empty".to_string(),
                ));
            }
        }
        for key in self.tags.keys() {
            if let Some(reason) = reserved_tag_key_reason(key) {
                return Err(StorageError::InvalidQuery(reason));
            }
        }
        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            if start >= end {
                return Err(StorageError::InvalidQuery(format!(
                    "start_time {} must be before end_time {}",
                    start.to_rfc3339(),
                    end.to_rfc3339()
                )));
            }
        }
        Ok(())
    }

    /// Validates the query and resolves its range against `now`.
    ///
    /// Ranges that can't contain any point are rejected, including a lone
    /// `start_time` that is not in the past.
    pub fn resolve(&self, now: DateTime<Utc>) -> Result<TimeRange, StorageError> {
        self.validate()?;
        let range = self.effective_range(now);
        if range.start >= range.end {
            return Err(StorageError::InvalidQuery(format!(
                "start_time {} must be before the current time {}",
                range.start.to_rfc3339(),
                range.end.to_rfc3339()
            )));
        }
        Ok(range)
    }
}

/// Number of hours looked back by the "recent" endpoints.
///
/// Must lie strictly between 0 and 168 (one week).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecentWindow(u32);

impl RecentWindow {
    pub const MAX_EXCLUSIVE_HOURS: u32 = 168;

    pub fn hours(hours: u32) -> Result<Self, StorageError> {
        if hours == 0 || hours >= Self::MAX_EXCLUSIVE_HOURS {
            return Err(StorageError::InvalidQuery(format!(
                "hours must be greater than 0 and lower than {}, got {}",
                Self::MAX_EXCLUSIVE_HOURS,
                hours
            )));
        }
        Ok(Self(hours))
    }

    /// `[now - hours, now]`
    pub fn bounds(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (now - Duration::hours(i64::from(self.0)), now)
    }
}
