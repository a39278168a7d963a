pub mod error;
pub mod influxdb;
pub mod storage;

pub use error::StorageError;
pub use storage::{DataPoint, FluxRecord, FluxTable, StorageInstance};
