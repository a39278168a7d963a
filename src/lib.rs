#![forbid(unsafe_code)]

pub mod analytics;
pub mod clock;
pub mod config;
pub mod datamodel;
pub mod http;
pub mod repository;
pub mod storage;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
