//! Compilation of metric queries into Flux.
//!
//! Every value coming from a caller is written as a Flux string literal,
//! escaped with [`string_literal`]. Tag keys go through bracket notation
//! (`r["key"]`) so they can't be parsed as identifiers or operators.

use crate::datamodel::{Aggregation, MetricQuery, TimeRange};
use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt::Write;

/// Escapes `value` and wraps it in double quotes.
///
/// Besides quotes and backslashes, `${` must be escaped as it starts a
/// string interpolation in Flux.
pub fn string_literal(value: &str) -> String {
    let mut literal = String::with_capacity(value.len() + 2);
    literal.push('"');
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => literal.push_str("\\\\"),
            '"' => literal.push_str("\\\""),
            '\n' => literal.push_str("\\n"),
            '\r' => literal.push_str("\\r"),
            '\t' => literal.push_str("\\t"),
            '$' if chars.peek() == Some(&'{') => literal.push_str("\\$"),
            c => literal.push(c),
        }
    }
    literal.push('"');
    literal
}

/// RFC3339 time literal, always in UTC.
pub fn time_literal(datetime: &DateTime<Utc>) -> String {
    datetime.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn range_clause(range: &TimeRange) -> String {
    if range.open_ended {
        format!("range(start: {})", time_literal(&range.start))
    } else {
        format!(
            "range(start: {}, stop: {})",
            time_literal(&range.start),
            time_literal(&range.end)
        )
    }
}

fn group_clause(query: &MetricQuery) -> String {
    let columns = std::iter::once(string_literal("_measurement"))
        .chain(query.tags.keys().map(|key| string_literal(key)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("group(columns: [{}])", columns)
}

fn aggregation_clause(aggregation: Aggregation) -> String {
    format!("{}()", aggregation.as_str())
}

/// Compiles `query` into a Flux pipeline reading from `bucket`.
///
/// `range` is the query's effective range, resolved by the caller so the
/// same clock is used for compilation and for reshaping the results.
pub fn compile(bucket: &str, query: &MetricQuery, range: &TimeRange) -> String {
    let mut flux = format!("from(bucket: {})", string_literal(bucket));

    // write! on a String can't fail
    let _ = write!(flux, " |> {}", range_clause(range));

    if let Some(name) = &query.name {
        let _ = write!(
            flux,
            " |> filter(fn: (r) => r._measurement == {})",
            string_literal(name)
        );
    }

    for (key, value) in &query.tags {
        let _ = write!(
            flux,
            " |> filter(fn: (r) => r[{}] == {})",
            string_literal(key),
            string_literal(value)
        );
    }

    if let Some(aggregation) = query.aggregation {
        let _ = write!(
            flux,
            " |> {} |> {}",
            group_clause(query),
            aggregation_clause(aggregation)
        );
    }

    flux
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 9, 25, 12, 0, 0).unwrap()
    }

    fn compile_at_now(query: &MetricQuery) -> String {
        compile("metrics", query, &query.effective_range(now()))
    }

    #[test]
    fn test_default_range() {
        let flux = compile_at_now(&MetricQuery::default());
        assert_eq!(
            flux,
            r#"from(bucket: "metrics") |> range(start: 2023-09-24T12:00:00Z, stop: 2023-09-25T12:00:00Z)"#
        );
    }

    #[test]
    fn test_bounded_range() {
        let start = Utc.with_ymd_and_hms(2023, 9, 25, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2023, 9, 25, 23, 59, 59).unwrap();
        let flux = compile_at_now(&MetricQuery::default().between(start, end));
        assert_eq!(
            flux,
            r#"from(bucket: "metrics") |> range(start: 2023-09-25T00:00:00Z, stop: 2023-09-25T23:59:59Z)"#
        );
    }

    #[test]
    fn test_open_ended_range() {
        let start = now() - Duration::hours(2);
        let flux = compile_at_now(&MetricQuery::default().since(start));
        assert_eq!(
            flux,
            r#"from(bucket: "metrics") |> range(start: 2023-09-25T10:00:00Z)"#
        );
    }

    #[test]
    fn test_subsecond_precision() {
        let start = Utc.timestamp_opt(1_695_600_000, 123_000_000).unwrap();
        assert_eq!(time_literal(&start), "2023-09-25T00:00:00.123Z");
    }

    #[test]
    fn test_name_and_tags() {
        let query = MetricQuery::for_name("cpu")
            .with_tag("region", "us-west")
            .with_tag("host", "a");
        let flux = compile_at_now(&query);
        assert_eq!(
            flux,
            concat!(
                r#"from(bucket: "metrics") |> range(start: 2023-09-24T12:00:00Z, stop: 2023-09-25T12:00:00Z)"#,
                r#" |> filter(fn: (r) => r._measurement == "cpu")"#,
                r#" |> filter(fn: (r) => r["host"] == "a")"#,
                r#" |> filter(fn: (r) => r["region"] == "us-west")"#,
            )
        );
    }

    #[test]
    fn test_aggregation() {
        let query = MetricQuery::for_name("cpu")
            .with_tag("host", "a")
            .aggregated(Aggregation::Mean);
        let flux = compile_at_now(&query);
        assert!(flux.ends_with(
            r#" |> filter(fn: (r) => r["host"] == "a") |> group(columns: ["_measurement", "host"]) |> mean()"#
        ));

        for aggregation in Aggregation::ALL {
            let flux = compile_at_now(&MetricQuery::for_name("cpu").aggregated(aggregation));
            assert!(flux.ends_with(&format!(
                r#" |> group(columns: ["_measurement"]) |> {}()"#,
                aggregation
            )));
        }
    }

    #[test]
    fn test_raw_points_are_not_grouped() {
        let flux = compile_at_now(&MetricQuery::for_name("cpu").with_tag("host", "a"));
        assert!(!flux.contains("group("));
    }

    #[test]
    fn test_string_literal_escaping() {
        assert_eq!(string_literal("plain"), r#""plain""#);
        assert_eq!(string_literal(r#"a"b"#), r#""a\"b""#);
        assert_eq!(string_literal(r"a\b"), r#""a\\b""#);
        assert_eq!(string_literal("a\nb\tc\r"), r#""a\nb\tc\r""#);
        assert_eq!(string_literal("${x}"), r#""\${x}""#);
        assert_eq!(string_literal("cost $5"), r#""cost $5""#);
        assert_eq!(string_literal(r"\"), r#""\\""#);
    }

    #[test]
    fn test_injection_attempts_stay_inside_literals() {
        let payload = r#"a") |> drop(columns: ["_value"]) |> filter(fn: (r) => r.host == "b"#;
        let query = MetricQuery::for_name(payload).with_tag("host", payload);
        let flux = compile_at_now(&query);

        // The payload contains one pipe and one filter each: compiled, only the
        // structural ones appear outside of literals.
        assert_eq!(count_unquoted(&flux, "|>"), 3);
        assert_eq!(count_unquoted(&flux, "filter("), 2);
        assert_eq!(count_unquoted(&flux, "drop("), 0);

        let backslash_payload = "a\\\") |> yield(";
        let flux = compile_at_now(&MetricQuery::default().with_tag("host", backslash_payload));
        assert_eq!(count_unquoted(&flux, "yield("), 0);

        let key_payload = r#"host"] == "x" or r["host"#;
        let flux = compile_at_now(&MetricQuery::default().with_tag(key_payload, "a"));
        assert_eq!(count_unquoted(&flux, " or "), 0);
    }

    /// Counts occurrences of `needle` outside of Flux string literals.
    fn count_unquoted(flux: &str, needle: &str) -> usize {
        let mut unquoted = String::new();
        let mut in_string = false;
        let mut escaped = false;
        for c in flux.chars() {
            if in_string {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == '"' {
                    in_string = false;
                    unquoted.push('"');
                }
            } else {
                if c == '"' {
                    in_string = true;
                }
                unquoted.push(c);
            }
        }
        unquoted.matches(needle).count()
    }
}
