//! Decoding of the annotated CSV returned by the InfluxDB query API.
//!
//! A response is a sequence of tables. Each table starts with optional
//! annotation rows (`#datatype`, `#group`, `#default`) followed by a header
//! row whose first two named columns are `result` and `table`. Query
//! failures that happen while streaming are reported in-band as a table with
//! `error` and `reference` columns.

use crate::storage::{FluxRecord, FluxTable, StorageError};
use csv_async::{AsyncReaderBuilder, StringRecord};
use futures::io::Cursor;
use std::collections::BTreeMap;

const DEFAULT_ANNOTATION: &str = "#default";

struct Header {
    columns: Vec<String>,
    defaults: Vec<String>,
}

impl Header {
    fn is_error_table(&self) -> bool {
        self.columns.iter().any(|c| c == "error") && self.columns.iter().any(|c| c == "reference")
    }

    fn position(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }
}

fn is_header_row(record: &StringRecord) -> bool {
    record.get(1) == Some("result") && record.get(2) == Some("table")
        || record.get(1) == Some("error")
}

fn is_blank(record: &StringRecord) -> bool {
    record.iter().all(str::is_empty)
}

/// Parses an annotated CSV body into tables, preserving backend order.
pub async fn parse_tables(body: Vec<u8>) -> Result<Vec<FluxTable>, StorageError> {
    let mut reader = AsyncReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .create_reader(Cursor::new(body));

    let mut tables: Vec<FluxTable> = Vec::new();
    let mut header: Option<Header> = None;
    let mut pending_defaults: Vec<String> = Vec::new();
    let mut record = StringRecord::new();

    loop {
        let has_record = reader
            .read_record(&mut record)
            .await
            .map_err(|e| StorageError::query_error(format!("Malformed query response: {}", e)))?;
        if !has_record {
            break;
        }

        if is_blank(&record) {
            header = None;
            continue;
        }

        if let Some(annotation) = record.get(0).filter(|first| first.starts_with('#')) {
            // A new annotation block always starts a new table schema
            header = None;
            if annotation == DEFAULT_ANNOTATION {
                pending_defaults = record.iter().map(str::to_string).collect();
            }
            continue;
        }

        if header.is_none() || is_header_row(&record) {
            header = Some(Header {
                columns: record.iter().map(str::to_string).collect(),
                defaults: std::mem::take(&mut pending_defaults),
            });
            continue;
        }

        let Some(current) = header.as_ref() else {
            continue;
        };

        if current.is_error_table() {
            let message = current
                .position("error")
                .and_then(|index| record.get(index))
                .unwrap_or("unknown error");
            return Err(StorageError::query_error(message));
        }

        let mut values = BTreeMap::new();
        for (index, column) in current.columns.iter().enumerate() {
            if column.is_empty() {
                continue;
            }
            let value = record
                .get(index)
                .filter(|value| !value.is_empty())
                .or_else(|| current.defaults.get(index).map(String::as_str))
                .unwrap_or_default();
            values.insert(column.clone(), value.to_string());
        }

        let index = values
            .get("table")
            .and_then(|table| table.parse::<i64>().ok())
            .unwrap_or_default();

        match tables.last_mut() {
            Some(table) if table.index == index => table.records.push(FluxRecord::new(values)),
            _ => tables.push(FluxTable {
                index,
                records: vec![FluxRecord::new(values)],
            }),
        }
    }

    Ok(tables)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_TABLES: &str = "#datatype,string,long,dateTime:RFC3339,dateTime:RFC3339,dateTime:RFC3339,double,string,string,string
#group,false,false,true,true,false,false,true,true,true
#default,_result,,,,,,,,
,result,table,_start,_stop,_time,_value,_field,_measurement,host
,,0,2023-09-25T00:00:00Z,2023-09-26T00:00:00Z,2023-09-25T12:00:00Z,75.5,value,cpu,a
,,0,2023-09-25T00:00:00Z,2023-09-26T00:00:00Z,2023-09-25T12:01:00Z,80,value,cpu,a
,,1,2023-09-25T00:00:00Z,2023-09-26T00:00:00Z,2023-09-25T12:00:00Z,12.25,value,cpu,b
";

    #[tokio::test]
    async fn test_parse_tables() {
        let tables = parse_tables(TWO_TABLES.as_bytes().to_vec()).await.unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].index, 0);
        assert_eq!(tables[0].records.len(), 2);
        assert_eq!(tables[1].index, 1);
        assert_eq!(tables[1].records.len(), 1);

        let first = &tables[0].records[0];
        assert_eq!(first.get("result"), Some("_result"));
        assert_eq!(first.measurement(), Some("cpu"));
        assert_eq!(first.value(), Some("75.5"));
        assert_eq!(first.time(), Some("2023-09-25T12:00:00Z"));
        assert_eq!(first.get("host"), Some("a"));
        assert_eq!(tables[1].records[0].get("host"), Some("b"));
    }

    #[tokio::test]
    async fn test_parse_multiple_schemas() {
        let body = "#datatype,string,long,string,double
#group,false,false,true,false
#default,_result,,,
,result,table,_measurement,_value
,,0,cpu,50

#datatype,string,long,string,string,double
#group,false,false,true,true,false
#default,_result,,,,
,result,table,_measurement,region,_value
,,1,cpu,eu,42
";
        let tables = parse_tables(body.as_bytes().to_vec()).await.unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].records[0].get("region"), None);
        assert_eq!(tables[1].records[0].get("region"), Some("eu"));
        assert_eq!(tables[1].records[0].value(), Some("42"));
    }

    #[tokio::test]
    async fn test_parse_without_annotations() {
        let body = ",result,table,_time,_value,_measurement
,_result,0,2023-09-25T12:00:00Z,1,cpu
,_result,0,2023-09-25T12:00:10Z,2,cpu
";
        let tables = parse_tables(body.as_bytes().to_vec()).await.unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].records.len(), 2);
        assert_eq!(tables[0].records[1].value(), Some("2"));
    }

    #[tokio::test]
    async fn test_parse_empty_body() {
        let tables = parse_tables(Vec::new()).await.unwrap();
        assert!(tables.is_empty());

        let tables = parse_tables(b"\r\n".to_vec()).await.unwrap();
        assert!(tables.is_empty());
    }

    #[tokio::test]
    async fn test_in_band_error() {
        let body = "#datatype,string,string
#group,true,true
#default,,
,error,reference
,\"failed to execute query: type error\",897
";
        let result = parse_tables(body.as_bytes().to_vec()).await;
        assert_eq!(
            result,
            Err(StorageError::query_error(
                "failed to execute query: type error"
            ))
        );
    }

    #[tokio::test]
    async fn test_values_containing_commas_and_quotes() {
        let body = ",result,table,_value,_measurement,path
,_result,0,1,disk,\"/var,\"\"lib\"\"\"
";
        let tables = parse_tables(body.as_bytes().to_vec()).await.unwrap();
        assert_eq!(tables[0].records[0].get("path"), Some("/var,\"lib\""));
    }
}
