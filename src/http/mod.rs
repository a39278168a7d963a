pub mod app_error;
pub mod health;
pub mod metrics;
pub mod server;
pub mod state;
