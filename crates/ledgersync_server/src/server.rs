//! Main sync server.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, ReplicationHandler};
use crate::http::router;
use crate::store::{DatasetStore, FileStore, MemoryStore};
use crate::sweeper::RetentionSweeper;
use axum::Router;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// The sync server.
///
/// Owns the dataset store, the replication handler and the retention
/// sweeper. Handlers can be called directly (useful in tests and for
/// embedding) or served over HTTP with [`SyncServer::serve`].
///
/// # Example
///
/// ```
/// use ledgersync_server::{ServerConfig, SyncServer};
///
/// let server = SyncServer::new(ServerConfig::default()).unwrap();
/// let dataset = server.handler().handle_pull(Some("meg")).unwrap();
/// assert!(dataset.is_empty());
/// ```
pub struct SyncServer {
    handler: ReplicationHandler,
    context: Arc<HandlerContext>,
}

impl SyncServer {
    /// Creates a server, opening a [`FileStore`] when `data_dir` is set and
    /// a [`MemoryStore`] otherwise.
    pub fn new(config: ServerConfig) -> ServerResult<Self> {
        let store: Arc<dyn DatasetStore> = match &config.data_dir {
            Some(dir) => Arc::new(FileStore::open(dir)?),
            None => Arc::new(MemoryStore::new()),
        };
        Ok(Self::with_store(config, store))
    }

    /// Creates a server over an existing store.
    pub fn with_store(config: ServerConfig, store: Arc<dyn DatasetStore>) -> Self {
        let context = Arc::new(HandlerContext::new(config, store));
        let handler = ReplicationHandler::new(Arc::clone(&context));
        Self { handler, context }
    }

    /// Returns the request handler.
    pub fn handler(&self) -> &ReplicationHandler {
        &self.handler
    }

    /// Returns the dataset store.
    pub fn store(&self) -> &Arc<dyn DatasetStore> {
        &self.context.store
    }

    /// Returns the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }

    /// Returns a sweeper sharing the server's store and locks.
    pub fn sweeper(&self) -> RetentionSweeper {
        self.context.sweeper()
    }

    /// Builds the HTTP router.
    pub fn router(&self) -> Router {
        router(self.handler.clone())
    }

    /// Binds the configured address and serves until `shutdown` resolves.
    ///
    /// Seeds the configured users and starts the retention schedule first.
    pub async fn serve<F>(self, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.config().bind_addr).await?;
        self.serve_on(listener, shutdown).await
    }

    /// Serves on an already-bound listener.
    pub async fn serve_on<F>(self, listener: TcpListener, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let context = Arc::clone(&self.context);
        tokio::task::spawn_blocking(move || context.seed_users())
            .await
            .map_err(|e| ServerError::Internal(e.to_string()))??;

        let config = self.config();
        let sweeper = self
            .sweeper()
            .spawn(config.initial_sweep_delay, config.sweep_interval);

        info!(
            addr = %listener.local_addr()?,
            production = config.production,
            "sync server listening"
        );

        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await;
        sweeper.abort();
        info!("sync server stopped");
        Ok(result?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgersync_protocol::{Dataset, Record};

    #[test]
    fn memory_backed_by_default() {
        let server = SyncServer::new(ServerConfig::default()).unwrap();
        server.handler().handle_pull(Some("meg")).unwrap();
        assert_eq!(server.store().user_keys().unwrap(), vec!["meg".to_string()]);
    }

    #[test]
    fn file_backed_with_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        {
            let server = SyncServer::new(ServerConfig::default().with_data_dir(dir.path())).unwrap();
            server
                .handler()
                .handle_push(
                    Some("meg"),
                    Dataset::new().with_record("cotizaciones", Record::new().with("numero", "A1")),
                )
                .unwrap();
        }

        let server = SyncServer::new(ServerConfig::default().with_data_dir(dir.path())).unwrap();
        let dataset = server.handler().handle_pull(Some("meg")).unwrap();
        assert_eq!(dataset.collection("cotizaciones").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn serves_until_shutdown() {
        let config = ServerConfig::new("127.0.0.1:0".parse().unwrap())
            .with_seed_users(vec!["meg".into()]);
        let server = SyncServer::new(config).unwrap();
        let store = Arc::clone(server.store());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(server.serve_on(listener, async move {
            let _ = rx.await;
        }));

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        tx.send(()).unwrap();
        task.await.unwrap().unwrap();

        assert!(store.load("meg").unwrap().is_some());
    }
}
