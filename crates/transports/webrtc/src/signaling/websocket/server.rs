//! HTTP server wiring for the signaling endpoint

use super::handler::signal_handler;
use crate::session::SessionContext;
use crate::Result;
use axum::http::header::CONTENT_TYPE;
use axum::http::Method;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Build the relay router: `/signal` for WebSocket signaling and `/health`
pub fn router(ctx: Arc<SessionContext>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health))
        .route("/signal", get(signal_handler))
        .layer(cors)
        .with_state(ctx)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Signaling server bound to one session context
pub struct RelayServer {
    ctx: Arc<SessionContext>,
}

impl RelayServer {
    pub fn new(ctx: Arc<SessionContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> Arc<SessionContext> {
        Arc::clone(&self.ctx)
    }

    pub fn router(&self) -> Router {
        router(Arc::clone(&self.ctx))
    }

    /// Serve until `shutdown` resolves
    ///
    /// On shutdown every live session is asked to close before the listener
    /// stops accepting; in-flight connections are then drained by axum.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        info!("Signaling server listening on {}", addr);

        let registry = Arc::clone(&self.ctx.registry);
        let shutdown = async move {
            shutdown.await;
            let closing = registry.close_all();
            info!("Shutdown requested, closing {} session(s)", closing);
        };

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Signaling server stopped");
        Ok(())
    }
}
