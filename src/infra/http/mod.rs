//! Preview host: renders documents on request and memoizes the results.

mod middleware;
mod preview;

use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

pub use preview::{PreviewCache, PreviewState, build_router};

use crate::infra::error::InfraError;

pub(crate) const METRIC_PREVIEW_CACHE_HIT_TOTAL: &str = "folio_preview_cache_hit_total";
pub(crate) const METRIC_PREVIEW_CACHE_MISS_TOTAL: &str = "folio_preview_cache_miss_total";
pub(crate) const METRIC_PREVIEW_CACHE_ENTRIES: &str = "folio_preview_cache_entries";

/// Serve `router` on `addr` until ctrl-c.
pub async fn serve(addr: SocketAddr, router: Router) -> Result<(), InfraError> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    info!(
        target = "folio::http",
        addr = %local_addr,
        "Preview host listening"
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
    info!(target = "folio::http", "Shutdown signal received");
}
