//! Scheduled Overlay Registry
//!
//! Durable bookkeeping of deferred overlay notification jobs for the driver
//! fleet, plus the pipeline that delivers them through FCM once they are due.

pub mod app_state;
pub mod config;
pub mod models;
pub mod observability;
pub mod routes;
pub mod services;
