//! Long-running units behind the client

pub mod actions;
pub mod feedback;
pub mod poller;
