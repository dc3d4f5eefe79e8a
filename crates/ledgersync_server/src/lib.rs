//! # LedgerSync Server
//!
//! Replication server for LedgerSync.
//!
//! This crate provides:
//! - The merge engine (last-write-wins per record, keyed by business fields)
//! - HTTP endpoints (health, pull, push, stats)
//! - Dataset persistence (in-memory and file-backed stores) with an audit log
//! - The retention sweeper that purges old tombstones
//!
//! # Architecture
//!
//! The server keeps one canonical dataset per `userKey`. A push loads the
//! stored dataset, merges the incoming snapshot into it and writes the
//! result back, bumping a per-user version counter. The read → merge → write
//! sequence is serialized per user, and the sweeper takes the same per-user
//! lock, so concurrent writers never drop each other's records.
//!
//! ```rust,ignore
//! use ledgersync_server::{ServerConfig, SyncServer};
//!
//! let server = SyncServer::new(ServerConfig::default())?;
//! server.serve(tokio::signal::ctrl_c()).await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod handler;
mod http;
mod locks;
pub mod merge;
mod server;
pub mod store;
mod sweeper;

pub use config::{retention_from_days, ServerConfig};
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, ReplicationHandler};
pub use http::router;
pub use locks::KeyedLocks;
pub use merge::{merge, CollectionReport, MergeOutcome, MergeReport};
pub use server::SyncServer;
pub use store::{
    AuditAction, AuditEntry, DatasetStore, FileStore, MemoryStore, StoreError, StoreResult,
    StoredDataset,
};
pub use sweeper::{sweep_dataset, RetentionSweeper, SweepReport};

/// Version string reported by the health endpoint.
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");
