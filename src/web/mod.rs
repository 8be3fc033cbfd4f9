//! The web module for handling the Axum API.
//! This file declares the other files in this directory as sub-modules.

pub mod api;
pub mod models;

pub use api::{ApiError, AppState, create_router};

use std::future::Future;

/// Serve the API on `bind` until `shutdown` resolves.
pub async fn serve<F>(bind: &str, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("Web API listening on http://{}", listener.local_addr()?);
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
