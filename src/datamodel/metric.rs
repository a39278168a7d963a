use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;
use uuid::Uuid;

/// Tag set of a metric. Sorted so that encoded writes and compiled queries
/// are deterministic; the semantics stay those of an unordered map.
pub type MetricTags = BTreeMap<String, String>;

/// Column names owned by the backend. They can't be used as tag keys.
pub const RESERVED_TAG_KEYS: [&str; 6] = [
    "time",
    "value",
    "measurement",
    "field",
    "result",
    "table",
];

/// Returns the reason why `key` can't be a tag key, if any.
pub fn reserved_tag_key_reason(key: &str) -> Option<String> {
    if key.is_empty() {
        return Some("tag keys must not be empty".to_string());
    }
    if key.starts_with('_') {
        return Some(format!(
            "tag key '{}' is reserved: keys starting with '_' are backend columns",
            key
        ));
    }
    if RESERVED_TAG_KEYS.contains(&key) {
        return Some(format!("tag key '{}' is reserved", key));
    }
    None
}

/// Returns the reason why `text` can't be written as a line protocol
/// identifier or tag value, if any.
///
/// Line breaks would split the record in two. The encoder does not escape
/// backslashes, so one placed before a separator or at the end would be
/// read back as an escape.
pub fn unencodable_reason(what: &str, text: &str) -> Option<String> {
    if text.chars().any(char::is_control) {
        return Some(format!("{} {:?} must not contain control characters", what, text));
    }
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\'
            && chars
                .peek()
                .is_none_or(|&next| matches!(next, ' ' | ',' | '=' | '\\'))
        {
            return Some(format!(
                "{} {:?} must not have a backslash before a separator or at the end",
                what, text
            ));
        }
    }
    None
}

/// One time-stamped numeric data point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "name": "cpu_usage",
    "value": 75.5,
    "tags": {"host": "server-01", "region": "us-west"},
    "timestamp": "2023-09-25T12:00:00Z"
}))]
pub struct Metric {
    /// Opaque identifier. Generated on ingestion, not stable across queries.
    #[serde(default)]
    pub id: Option<String>,

    /// Measurement name, for example `cpu_usage`.
    pub name: String,

    pub value: f64,

    #[serde(default)]
    pub tags: MetricTags,

    /// Defaults to the ingestion time.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Metric {
    pub fn new(
        name: impl Into<String>,
        value: f64,
        tags: MetricTags,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            name: name.into(),
            value,
            tags,
            timestamp,
        }
    }

    pub fn generate_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Assigns a fresh identifier when none was provided.
    pub fn with_generated_id(mut self) -> Self {
        if self.id.as_deref().is_none_or(str::is_empty) {
            self.id = Some(Self::generate_id());
        }
        self
    }

    /// Checks the invariants a metric must hold before being written.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("metric name must not be empty".to_string());
        }
        if let Some(reason) = unencodable_reason("metric name", &self.name) {
            return Err(reason);
        }
        // Lines starting with '#' are comments
        if self.name.starts_with('#') {
            return Err(format!("metric name {:?} must not start with '#'", self.name));
        }
        if !self.value.is_finite() {
            return Err(format!("metric value must be finite, got {}", self.value));
        }
        for (key, value) in &self.tags {
            if let Some(reason) = reserved_tag_key_reason(key) {
                return Err(reason);
            }
            if value.is_empty() {
                return Err(format!("tag '{}' must have a non-empty value", key));
            }
            if let Some(reason) = unencodable_reason("tag key", key)
                .or_else(|| unencodable_reason("tag value", value))
            {
                return Err(reason);
            }
        }
        Ok(())
    }
}
