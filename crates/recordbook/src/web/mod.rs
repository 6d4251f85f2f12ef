//! HTTP surface for recordbook.
//!
//! Handlers get their dependencies from [`AppState`]: a [`StoreFactory`] for
//! per-request connections, a [`FlashSigner`] for notifications and a
//! [`CsrfGuard`] for form tokens. No state survives a request other than what
//! the database holds.

pub mod csrf;
pub mod flash;
mod handlers;
pub mod views;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::storage::{RecordStore, StoreFactory};

pub use csrf::CsrfGuard;
pub use flash::{Flash, FlashLevel, FlashSigner};

/// Dependencies shared by all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    stores: StoreFactory,
    flash: FlashSigner,
    csrf: CsrfGuard,
}

impl AppState {
    /// Create state for `stores`, deriving cookie and token keys from
    /// `secret_key`.
    #[must_use]
    pub fn new(stores: StoreFactory, secret_key: &str) -> Self {
        Self {
            stores,
            flash: FlashSigner::new(secret_key),
            csrf: CsrfGuard::new(secret_key),
        }
    }

    /// Create state from the application configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            StoreFactory::from_config(config),
            &config.server.secret_key,
        )
    }

    /// Run `f` against a freshly opened store on the blocking pool.
    ///
    /// The connection lives only as long as the closure, so it is closed
    /// exactly once whether `f` succeeds, fails or panics.
    pub(crate) async fn with_store<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&RecordStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let stores = self.stores.clone();
        tokio::task::spawn_blocking(move || {
            let store = stores.open()?;
            f(&store)
        })
        .await
        .map_err(|e| Error::internal(format!("store task failed: {e}")))?
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::list_records))
        .route("/records", get(handlers::list_records))
        .route(
            "/records/new",
            get(handlers::new_record).post(handlers::create_record),
        )
        .route("/records/:id", get(handlers::view_record))
        .route(
            "/records/:id/edit",
            get(handlers::edit_record).post(handlers::update_record),
        )
        // No confirmation step or token; GET deletes too.
        .route(
            "/records/:id/delete",
            get(handlers::delete_record).post(handlers::delete_record),
        )
        .route("/index", get(handlers::index))
        .route("/about", get(handlers::about))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bootstrap the schema and serve HTTP until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the schema cannot be created, the listener cannot be
/// bound, or the server fails.
pub async fn serve(config: &Config) -> Result<()> {
    let addr = config.socket_addr()?;
    let state = AppState::from_config(config);

    let stores = state.stores.clone();
    tokio::task::spawn_blocking(move || stores.bootstrap())
        .await
        .map_err(|e| Error::internal(format!("schema bootstrap task failed: {e}")))??;

    if config.uses_dev_secret() {
        warn!("Using the default secret key; set server.secret_key before exposing this server");
    }

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| Error::ServerBind {
            address: addr.to_string(),
            source,
        })?;

    info!("Listening on http://{}", addr);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
