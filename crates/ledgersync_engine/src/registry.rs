//! One coordinator per user key.

use crate::config::SyncConfig;
use crate::coordinator::SyncCoordinator;
use crate::error::{SyncError, SyncResult};
use crate::local_store::LocalStore;
use crate::transport::SyncTransport;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Hands out a shared coordinator per `userKey`, creating it on first use.
///
/// Every coordinator shares the registry's transport and local store.
pub struct CoordinatorRegistry {
    config: SyncConfig,
    transport: Arc<dyn SyncTransport>,
    store: Arc<dyn LocalStore>,
    coordinators: Mutex<HashMap<String, SyncCoordinator>>,
}

impl CoordinatorRegistry {
    /// Creates an empty registry.
    pub fn new(
        config: SyncConfig,
        transport: Arc<dyn SyncTransport>,
        store: Arc<dyn LocalStore>,
    ) -> Self {
        Self {
            config,
            transport,
            store,
            coordinators: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the coordinator for `user_key`, creating it if needed.
    ///
    /// New coordinators are not started.
    pub fn get_or_create(&self, user_key: &str) -> SyncResult<SyncCoordinator> {
        let user_key = user_key.trim();
        if user_key.is_empty() {
            return Err(SyncError::Validation("userKey is required".into()));
        }

        let mut coordinators = self.coordinators.lock();
        let coordinator = coordinators
            .entry(user_key.to_string())
            .or_insert_with(|| {
                debug!(user_key, "creating sync coordinator");
                SyncCoordinator::new(
                    user_key,
                    self.config.clone(),
                    Arc::clone(&self.transport),
                    Arc::clone(&self.store),
                )
            });
        Ok(coordinator.clone())
    }

    /// Returns the coordinator for `user_key` if one exists.
    pub fn get(&self, user_key: &str) -> Option<SyncCoordinator> {
        self.coordinators.lock().get(user_key.trim()).cloned()
    }

    /// Stops and forgets the coordinator for `user_key`.
    pub fn dispose(&self, user_key: &str) -> bool {
        let removed = self.coordinators.lock().remove(user_key.trim());
        match removed {
            Some(coordinator) => {
                coordinator.stop();
                true
            }
            None => false,
        }
    }

    /// Stops and forgets every coordinator.
    pub fn dispose_all(&self) {
        let drained: Vec<_> = self.coordinators.lock().drain().collect();
        for (_, coordinator) in drained {
            coordinator.stop();
        }
    }

    /// Number of live coordinators.
    pub fn len(&self) -> usize {
        self.coordinators.lock().len()
    }

    /// Returns true if no coordinator exists.
    pub fn is_empty(&self) -> bool {
        self.coordinators.lock().is_empty()
    }
}

impl std::fmt::Debug for CoordinatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.coordinators.lock().keys().cloned().collect();
        keys.sort();
        f.debug_struct("CoordinatorRegistry")
            .field("user_keys", &keys)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_store::MemoryLocalStore;
    use crate::transport::MockTransport;

    fn registry() -> CoordinatorRegistry {
        CoordinatorRegistry::new(
            SyncConfig::default(),
            Arc::new(MockTransport::new()),
            Arc::new(MemoryLocalStore::new()),
        )
    }

    #[test]
    fn same_key_same_coordinator() {
        let registry = registry();
        let a = registry.get_or_create("meg").unwrap();
        let b = registry.get_or_create("meg").unwrap();
        a.handle_offline();

        // Both handles observe the same state.
        assert!(!b.status().is_online);
        assert_eq!(registry.len(), 1);

        registry.get_or_create("myorganic").unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn empty_key_is_rejected() {
        let registry = registry();
        assert!(matches!(
            registry.get_or_create("  "),
            Err(SyncError::Validation(_))
        ));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn dispose_stops_and_forgets() {
        let registry = registry();
        let coordinator = registry.get_or_create("meg").unwrap();
        coordinator.start();
        assert!(coordinator.status().is_running);

        assert!(registry.dispose("meg"));
        assert!(!registry.dispose("meg"));
        assert!(!coordinator.status().is_running);
        assert!(registry.get("meg").is_none());

        registry.get_or_create("a").unwrap();
        registry.get_or_create("b").unwrap();
        registry.dispose_all();
        assert!(registry.is_empty());
    }
}
