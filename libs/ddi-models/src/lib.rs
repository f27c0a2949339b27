//! Wire models for the DDI polling protocol

pub mod models;

pub use models::*;
