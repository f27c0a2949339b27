//! Client assembly and lifecycle

pub mod options;
pub mod run;
