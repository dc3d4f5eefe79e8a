//! Request handlers for the replication endpoints.
//!
//! Handlers are synchronous and transport-agnostic. The HTTP layer in
//! [`crate::router`] runs them on the blocking pool.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::locks::KeyedLocks;
use crate::merge::merge;
use crate::store::{AuditEntry, DatasetStore, MemoryStore, StoreResult, StoredDataset};
use crate::sweeper::RetentionSweeper;
use crate::SERVER_VERSION;
use ledgersync_protocol::{
    require_user_key, Dataset, HealthResponse, PushResponse, StatsResponse, UserStats,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Shared state for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Dataset persistence (shared across all handlers).
    pub store: Arc<dyn DatasetStore>,
    /// Per-user write locks, shared with the sweeper.
    pub locks: Arc<KeyedLocks>,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(config: ServerConfig, store: Arc<dyn DatasetStore>) -> Self {
        Self {
            config,
            store,
            locks: Arc::new(KeyedLocks::new()),
        }
    }

    /// Creates a context backed by a fresh in-memory store.
    pub fn in_memory(config: ServerConfig) -> Self {
        Self::new(config, Arc::new(MemoryStore::new()))
    }

    /// Returns a sweeper sharing this context's store and locks.
    pub fn sweeper(&self) -> RetentionSweeper {
        RetentionSweeper::new(
            Arc::clone(&self.store),
            Arc::clone(&self.locks),
            self.config.retention,
        )
    }

    /// Creates empty datasets for the configured seed users.
    pub fn seed_users(&self) -> StoreResult<usize> {
        let mut seeded = 0;
        for user_key in &self.config.seed_users {
            if self.store.load(user_key)?.is_none() {
                self.store.create(user_key, Dataset::empty_default())?;
                seeded += 1;
            }
        }
        if seeded > 0 {
            info!(seeded, "seeded initial user datasets");
        }
        Ok(seeded)
    }
}

/// Handler for replication requests.
#[derive(Clone)]
pub struct ReplicationHandler {
    context: Arc<HandlerContext>,
}

impl ReplicationHandler {
    /// Creates a new handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Returns the shared context.
    pub fn context(&self) -> &Arc<HandlerContext> {
        &self.context
    }

    /// Returns the user's canonical dataset, creating an empty one on first
    /// access.
    pub fn handle_pull(&self, user_key: Option<&str>) -> ServerResult<Dataset> {
        let user_key = require_user_key(user_key)?;
        let row = match self.context.store.load(&user_key)? {
            Some(row) => row,
            None => {
                info!(user_key = %user_key, "creating empty dataset on first pull");
                self.context
                    .locks
                    .with_lock(&user_key, || {
                        self.context.store.create(&user_key, Dataset::empty_default())
                    })?
            }
        };
        info!(
            user_key = %user_key,
            version = row.version,
            records = row.dataset.record_count(),
            "pull"
        );
        Ok(row.dataset)
    }

    /// Merges an incoming snapshot into the user's dataset and persists it.
    pub fn handle_push(&self, user_key: Option<&str>, incoming: Dataset) -> ServerResult<PushResponse> {
        let user_key = require_user_key(user_key)?;
        if incoming.has_no_entries() {
            return Err(ServerError::Validation("data is required".into()));
        }
        let incoming_sizes = incoming.collection_sizes();

        let row = self.context.locks.with_lock(&user_key, || -> ServerResult<StoredDataset> {
            let existing = self
                .context
                .store
                .load(&user_key)?
                .map(|row| row.dataset)
                .unwrap_or_else(Dataset::empty_default);

            let outcome = merge(existing, incoming);
            let skipped: usize = outcome
                .report
                .collections
                .values()
                .map(|c| c.skipped_keyless)
                .sum();
            if skipped > 0 {
                warn!(user_key = %user_key, skipped, "push contained records without a merge key");
            }

            let row = self.context.store.upsert(&user_key, outcome.dataset)?;
            let entry = AuditEntry::push(
                user_key.as_str(),
                incoming_sizes,
                row.dataset.collection_sizes(),
                row.version,
                row.updated_at,
            );
            self.context.store.append_audit(entry)?;

            info!(
                user_key = %user_key,
                version = row.version,
                inserted = outcome.report.inserted(),
                updated = outcome.report.updated(),
                "push merged"
            );
            Ok(row)
        })?;

        Ok(PushResponse::new(row.version, row.updated_at, row.dataset))
    }

    /// Returns per-user dataset statistics, most recently updated first.
    pub fn handle_stats(&self) -> ServerResult<StatsResponse> {
        let mut rows = self.context.store.list()?;
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        let stats = rows
            .into_iter()
            .map(|row| UserStats {
                collections: row.dataset.collection_sizes(),
                user_key: row.user_key,
                version: row.version,
                updated_at: row.updated_at,
            })
            .collect();
        Ok(StatsResponse { stats })
    }

    /// Returns the liveness payload.
    pub fn handle_health(&self) -> HealthResponse {
        HealthResponse::ok(SERVER_VERSION)
    }
}

/// Decodes a push body. An empty body, JSON `null` or `{}` is a validation
/// error.
pub(crate) fn parse_push_body(bytes: &[u8]) -> ServerResult<Dataset> {
    let trimmed = bytes.trim_ascii();
    if trimmed.is_empty() || trimmed == b"null" {
        return Err(ServerError::Validation("data is required".into()));
    }
    let dataset = Dataset::from_slice(trimmed)?;
    if dataset.has_no_entries() {
        return Err(ServerError::Validation("data is required".into()));
    }
    Ok(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::AuditAction;
    use ledgersync_protocol::Record;
    use serde_json::json;

    fn handler() -> ReplicationHandler {
        ReplicationHandler::new(Arc::new(HandlerContext::in_memory(ServerConfig::default())))
    }

    fn quote(numero: &str, updated_at: &str) -> Record {
        Record::new().with("numero", numero).with("updatedAt", updated_at)
    }

    #[test]
    fn pull_creates_default_dataset() {
        let handler = handler();
        let dataset = handler.handle_pull(Some("meg")).unwrap();

        assert_eq!(dataset, Dataset::empty_default());
        let row = handler.context().store.load("meg").unwrap().unwrap();
        assert_eq!(row.version, 1);
    }

    #[test]
    fn missing_user_key() {
        let handler = handler();
        assert!(matches!(handler.handle_pull(None), Err(ServerError::Validation(_))));
        assert!(matches!(
            handler.handle_push(Some("  "), Dataset::new()),
            Err(ServerError::Validation(_))
        ));
    }

    #[test]
    fn push_newer_record_wins() {
        let handler = handler();
        handler
            .handle_push(
                Some("meg"),
                Dataset::empty_default().with_record("cotizaciones", quote("A1", "2024-01-01")),
            )
            .unwrap();

        let response = handler
            .handle_push(
                Some("meg"),
                Dataset::new().with_record("cotizaciones", quote("A1", "2024-02-01").with("monto", 500)),
            )
            .unwrap();

        assert!(response.success);
        assert_eq!(response.version, 2);
        let quotes = response.merged.collection("cotizaciones").unwrap();
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].get("monto"), Some(&json!(500)));
    }

    #[test]
    fn push_is_idempotent() {
        let handler = handler();
        let dataset = Dataset::empty_default()
            .with_record("cotizaciones", quote("A1", "2024-01-01"))
            .with_record("clientes", Record::new().with("rut", "1-9"));

        let first = handler.handle_push(Some("meg"), dataset.clone()).unwrap();
        let second = handler.handle_push(Some("meg"), dataset).unwrap();

        assert_eq!(first.merged, second.merged);
        assert_eq!(second.version, first.version + 1);
    }

    #[test]
    fn push_without_entries_is_rejected() {
        let handler = handler();
        assert!(matches!(
            handler.handle_push(Some("meg"), Dataset::new()),
            Err(ServerError::Validation(_))
        ));
        assert!(handler.context().store.load("meg").unwrap().is_none());
        assert!(handler.context().store.audit_log().unwrap().is_empty());
    }

    #[test]
    fn push_appends_audit_entry() {
        let handler = handler();
        let incoming = Dataset::new().with_record("cotizaciones", quote("A1", "2024-01-01"));
        handler.handle_push(Some("meg"), incoming).unwrap();

        let log = handler.context().store.audit_log().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].action, AuditAction::Push);
        assert_eq!(log[0].incoming.len(), 1);
        assert_eq!(log[0].merged.len(), 4);
        assert_eq!(log[0].merged["cotizaciones"], 1);
    }

    #[test]
    fn stats_most_recent_first() {
        let handler = handler();
        handler.handle_push(Some("a"), Dataset::empty_default()).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        handler
            .handle_push(
                Some("b"),
                Dataset::empty_default().with_record("cotizaciones", quote("A1", "2024-01-01")),
            )
            .unwrap();

        let stats = handler.handle_stats().unwrap().stats;
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].user_key, "b");
        assert_eq!(stats[0].collections["cotizaciones"], 1);
    }

    #[test]
    fn seeds_configured_users() {
        let config = ServerConfig::default().with_seed_users(vec!["meg".into(), "myorganic".into()]);
        let context = HandlerContext::in_memory(config);
        assert_eq!(context.seed_users().unwrap(), 2);
        assert_eq!(context.seed_users().unwrap(), 0);
    }

    #[test]
    fn push_body_parsing() {
        assert!(matches!(parse_push_body(b""), Err(ServerError::Validation(_))));
        assert!(matches!(parse_push_body(b" null "), Err(ServerError::Validation(_))));
        assert!(matches!(parse_push_body(b"[1,2]"), Err(ServerError::MalformedBody(_))));
        assert!(matches!(
            parse_push_body(br#"{"cotizaciones":[1]}"#),
            Err(ServerError::MalformedBody(_))
        ));
        assert!(matches!(parse_push_body(b" {} "), Err(ServerError::Validation(_))));
        assert!(!parse_push_body(br#"{"clientes":[]}"#).unwrap().has_no_entries());
    }

    #[test]
    fn health_reports_version() {
        let health = handler().handle_health();
        assert_eq!(health.status, "ok");
        assert_eq!(health.version, SERVER_VERSION);
    }
}
