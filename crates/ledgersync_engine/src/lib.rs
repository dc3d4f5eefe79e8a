//! # LedgerSync Engine
//!
//! Client-side sync coordinator for LedgerSync.
//!
//! This crate provides:
//! - `SyncCoordinator`, which decides when to sync and runs push-then-pull
//!   cycles for one user
//! - `CoordinatorRegistry`, one shared coordinator per `userKey`
//! - The `LocalStore` adapter contract with memory and file implementations
//! - The `SyncTransport` abstraction with an HTTP implementation and a mock
//! - Events with isolated synchronous listeners and a broadcast channel
//!
//! ## Cycle
//!
//! 1. Read the local dataset
//! 2. Push it, unless this is a fresh installation with nothing to send
//! 3. Pull the reconciled dataset and overwrite local state with it
//! 4. Record the completed sync
//!
//! ## Key Invariants
//!
//! - At most one cycle runs per coordinator at a time
//! - The server's merge is authoritative; local state is replaced, not merged
//! - Failures are reported as outcomes and events, never as panics
//! - Retries are bounded and never follow a connectivity or validation error

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod coordinator;
mod error;
mod events;
mod http;
mod local_store;
mod registry;
mod transport;

pub use config::{RetryConfig, SyncConfig};
pub use coordinator::{SkipReason, SyncCoordinator, SyncOutcome, SyncReport, SyncStatus};
pub use error::{SyncError, SyncResult};
pub use events::{EventBus, SubscriptionId, SyncEvent};
pub use http::HttpTransport;
pub use local_store::{FileLocalStore, LocalStore, MemoryLocalStore};
pub use registry::CoordinatorRegistry;
pub use transport::{MockCall, MockTransport, SyncTransport};
