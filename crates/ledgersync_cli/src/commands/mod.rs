//! CLI command implementations.

pub mod serve;
pub mod stats;
pub mod sweep;
pub mod sync;
