//! DDI update client library
//!
//! Device-side client for a polling device-management server: polls for
//! deployments and cancellations, downloads and verifies artifacts, applies
//! them through pluggable updaters and reports feedback.

pub mod actor;
pub mod app;
pub mod deploy;
pub mod errors;
pub mod events;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod models;
pub mod providers;
pub mod storage;
pub mod utils;
pub mod workers;
