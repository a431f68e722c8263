//! WebSocket-Endpunkt (axum)
//!
//! `GET /ws` wertet auf eine WebSocket-Verbindung auf; jede Text-Nachricht
//! ist genau eine JSON-kodierte `SignalMessage`. Danach laeuft dieselbe
//! `ClientConnection`-Schleife wie fuer TCP.
//!
//! `GET /health` liefert einen einfachen Health-Check.

use axum::extract::connect_info::ConnectInfo;
use axum::extract::{State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use crate::connection::ClientConnection;
use crate::server_state::SignalingState;

#[derive(Clone)]
struct WsState {
    signaling: Arc<SignalingState>,
    shutdown_rx: watch::Receiver<bool>,
}

/// Baut den axum-Router fuer WebSocket und Health-Check
pub fn ws_router(state: Arc<SignalingState>, shutdown_rx: watch::Receiver<bool>) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(WsState {
            signaling: state,
            shutdown_rx,
        })
}

/// Startet den WebSocket-Server mit Graceful Shutdown
pub async fn ws_starten(
    state: Arc<SignalingState>,
    bind_addr: SocketAddr,
    shutdown_rx: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(adresse = %listener.local_addr()?, "WebSocket-Endpunkt gestartet");

    let app = ws_router(state, shutdown_rx.clone());
    let mut signal_rx = shutdown_rx;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        while signal_rx.changed().await.is_ok() {
            if *signal_rx.borrow() {
                break;
            }
        }
    })
    .await?;

    tracing::info!("WebSocket-Endpunkt gestoppt");
    Ok(())
}

/// GET /ws – Aufwertung auf WebSocket
async fn ws_upgrade(
    ws: WebSocketUpgrade,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    State(ws_state): State<WsState>,
) -> Response {
    let peer_addr = connect_info.map(|ConnectInfo(addr)| addr);
    ws.on_upgrade(move |socket| async move {
        ClientConnection::neu(ws_state.signaling, peer_addr)
            .verarbeiten(socket, ws_state.shutdown_rx)
            .await;
    })
}

/// GET /health – Health-Check-Endpunkt
async fn health(State(ws_state): State<WsState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "healthy",
            "service": "parley",
            "verbindungen": ws_state.signaling.sitzungen.verbindungs_anzahl(),
            "uptime_sek": ws_state.signaling.uptime_sek(),
        })),
    )
}
