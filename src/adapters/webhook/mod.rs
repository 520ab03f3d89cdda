//! Signal Webhook — External Signal Ingestion
//!
//! Small axum server accepting signal updates (RSI, MACD histogram,
//! directional enables) from an external alerting system, e.g.
//! TradingView alerts relayed as JSON. Updates flow into the
//! single-writer `SignalHub`; the engine reads one consistent snapshot
//! per cycle and never writes.

use std::sync::Arc;

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use tokio::sync::broadcast;
use tracing::{info, instrument};

use crate::domain::signals::{SignalHub, SignalUpdate};

/// HTTP listener feeding the signal hub.
pub struct SignalServer {
    /// The single writer for signal state.
    hub: Arc<SignalHub>,
    /// Bind port from config.
    port: u16,
}

impl SignalServer {
    pub fn new(hub: Arc<SignalHub>, port: u16) -> Self {
        Self { hub, port }
    }

    /// Serve `POST /signals` until shutdown.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let app = Router::new()
            .route("/signals", post(Self::ingest))
            .with_state(Arc::clone(&self.hub));

        let addr = format!("0.0.0.0:{}", self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        info!(address = %addr, "Signal webhook listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }

    /// Accept a partial signal update. Absent fields are left as-is.
    async fn ingest(
        State(hub): State<Arc<SignalHub>>,
        Json(update): Json<SignalUpdate>,
    ) -> impl IntoResponse {
        let state = hub.apply(&update);
        info!(
            rsi = state.rsi,
            macd_histogram = state.macd_histogram,
            long_enable = state.long_enable,
            short_enable = state.short_enable,
            buy_enable = state.buy_enable,
            sell_enable = state.sell_enable,
            "Signal update applied"
        );
        StatusCode::OK
    }
}
