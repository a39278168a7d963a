use super::precision::Precision;
use crate::datamodel::unencodable_reason;
use crate::storage::{DataPoint, StorageError};
use influxdb_line_protocol::LineProtocolBuilder;

/// Rejects text the builder would write unescaped in a way that breaks the
/// record boundary.
fn check_encodable(point: &DataPoint) -> Result<(), StorageError> {
    if point.measurement.starts_with('#') {
        return Err(StorageError::InvalidMetric(format!(
            "measurement {:?} must not start with '#'",
            point.measurement
        )));
    }
    let reason = unencodable_reason("measurement", &point.measurement)
        .or_else(|| unencodable_reason("field", &point.field))
        .or_else(|| {
            point.tags.iter().find_map(|(key, value)| {
                unencodable_reason("tag key", key).or_else(|| unencodable_reason("tag value", value))
            })
        });
    match reason {
        Some(reason) => Err(StorageError::InvalidMetric(reason)),
        None => Ok(()),
    }
}

/// Encodes one point as a line protocol record.
///
/// Escaping of spaces, commas and equal signs is handled by the builder.
/// Control characters and trailing backslashes are rejected.
pub fn encode_point(point: &DataPoint, precision: Precision) -> Result<Vec<u8>, StorageError> {
    check_encodable(point)?;
    let timestamp = precision.timestamp(&point.timestamp).ok_or_else(|| {
        StorageError::InvalidMetric(format!(
            "timestamp {} can't be represented with {} precision",
            point.timestamp.to_rfc3339(),
            precision.as_str()
        ))
    })?;

    let line = point.tags.iter().fold(
        LineProtocolBuilder::new().measurement(&point.measurement),
        |line, (key, value)| line.tag(key, value),
    );

    Ok(line
        .field(&point.field, point.value)
        .timestamp(timestamp)
        .close_line()
        .build())
}
