//! # LedgerSync Testkit
//!
//! Test utilities shared by the LedgerSync crates.
//!
//! This crate provides:
//! - Record and dataset fixtures for the known collections
//! - A fixed reference clock and relative-date helpers
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ledgersync_testkit::prelude::*;
//!
//! let dataset = Dataset::empty_default()
//!     .with_record("cotizaciones", quote("A1", "2024-01-01"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use ledgersync_protocol::{Dataset, Record};
}

pub use fixtures::*;
pub use generators::*;
