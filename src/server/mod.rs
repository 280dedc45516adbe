pub mod routes;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::relay::Relay;

/// HTTP control surface over a shared relay
pub struct WebServer {
    bind_addr: SocketAddr,
    relay: Arc<Relay>,
}

impl WebServer {
    pub fn new(bind_addr: SocketAddr, relay: Arc<Relay>) -> Self {
        Self { bind_addr, relay }
    }

    pub async fn start(self) -> Result<()> {
        let state = routes::AppState { relay: self.relay };

        // Phone browsers load the page from elsewhere
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        let app = routes::create_router(state).layer(cors);

        let listener = tokio::net::TcpListener::bind(&self.bind_addr)
            .await
            .with_context(|| format!("Failed to bind {}", self.bind_addr))?;
        info!(addr = %self.bind_addr, "control API listening");
        axum::serve(listener, app).await?;

        Ok(())
    }
}
