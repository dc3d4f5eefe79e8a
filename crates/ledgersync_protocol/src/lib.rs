//! # LedgerSync Protocol
//!
//! Dataset model and wire types shared by the LedgerSync client and server.
//!
//! This crate provides:
//! - `Dataset`, `Record` and the known collection kinds with their merge keys
//! - Effective-timestamp rules used by merging and retention
//! - JSON request/response bodies for the replication endpoints
//!
//! This is a pure protocol crate with no I/O operations.
//!
//! ## Wire format
//!
//! A dataset travels as a single JSON object. Every top-level array is a
//! collection of records; every other top-level value is an opaque field:
//!
//! ```text
//! {
//!   "cotizaciones": [ { "numero": "A1", "updatedAt": "2024-02-01", ... } ],
//!   "clientes":     [ { "rut": "76.123.456-7", ... } ],
//!   "ordenesCompra": [],
//!   "ordenesTrabajo": [],
//!   "empresa": { ... }
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod collection;
mod dataset;
mod error;
mod messages;
mod record;
mod timestamp;

pub use collection::{merge_key_for, CollectionKind, DEFAULT_MERGE_KEY};
pub use dataset::Dataset;
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    require_user_key, ErrorResponse, HealthResponse, PushResponse, StatsResponse, UserKeyQuery,
    UserStats,
};
pub use record::{Record, ATTACHMENT_FIELDS, DATE_FIELD, DELETED_FIELD, UPDATED_AT_FIELD};
pub use timestamp::{parse_timestamp, parse_timestamp_value, Timestamp};
