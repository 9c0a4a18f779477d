//! CLI command implementations.

pub mod plan;
pub mod policy;
pub mod route;
pub mod schedule;
