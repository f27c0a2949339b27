//! Domain models layered over the wire types

pub mod deployment;
pub mod feedback;
