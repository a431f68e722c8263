//! Client-Connection – Verwaltet eine einzelne Verbindung (TCP oder WebSocket)
//!
//! Jede Verbindung bekommt eine `ClientConnection` in einem eigenen
//! tokio-Task. Die Schleife liest Anfragen, dispatcht sie, schreibt
//! Antworten und leert die Send-Queue des EventRouters.
//!
//! ## Keepalive
//! - Server sendet alle `keepalive_sek` einen Ping
//! - Kommt innerhalb von `verbindungs_timeout_sek` kein Frame, wird die
//!   Verbindung getrennt
//!
//! ## Ende
//! Egal wie die Schleife endet (Client schliesst, Timeout, Lese- oder
//! Schreibfehler, Shutdown): `verbindung_trennen` laeuft genau einmal.

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use parley_core::ConnectionId;
use parley_protocol::wire::{self, FrameCodec};
use parley_protocol::{ErrorCode, SignalMessage};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::codec::Framed;

use crate::dispatcher::{DispatcherContext, MessageDispatcher};
use crate::server_state::SignalingState;

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Fehler beim Empfangen einer Nachricht
#[derive(Debug)]
pub enum EmpfangsFehler {
    /// Frame war lesbar, aber keine gueltige SignalMessage
    Ungueltig(String),
    /// Transport ist defekt
    Io(io::Error),
}

/// Bidirektionaler Transport fuer SignalMessages
///
/// Implementiert fuer den laengen-praefixierten TCP-Stream und fuer
/// axum-WebSockets.
pub trait SignalTransport: Send {
    /// Naechste Nachricht; `None` wenn die Gegenseite geschlossen hat
    fn empfangen(
        &mut self,
    ) -> impl Future<Output = Option<Result<SignalMessage, EmpfangsFehler>>> + Send;

    fn senden(&mut self, nachricht: SignalMessage) -> impl Future<Output = io::Result<()>> + Send;
}

impl<S> SignalTransport for Framed<S, FrameCodec>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn empfangen(&mut self) -> Option<Result<SignalMessage, EmpfangsFehler>> {
        match self.next().await? {
            Ok(nachricht) => Some(Ok(nachricht)),
            // Nach einem Decode-Fehler liefert Framed keine weiteren Frames,
            // die Verbindung endet also nach der Fehlerantwort.
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                Some(Err(EmpfangsFehler::Ungueltig(e.to_string())))
            }
            Err(e) => Some(Err(EmpfangsFehler::Io(e))),
        }
    }

    async fn senden(&mut self, nachricht: SignalMessage) -> io::Result<()> {
        self.send(nachricht).await
    }
}

impl SignalTransport for WebSocket {
    async fn empfangen(&mut self) -> Option<Result<SignalMessage, EmpfangsFehler>> {
        loop {
            let frame = match self.recv().await? {
                Ok(frame) => frame,
                Err(e) => return Some(Err(EmpfangsFehler::Io(io::Error::other(e)))),
            };
            let ergebnis = match frame {
                Message::Text(text) => {
                    wire::nachricht_dekodieren(text.as_bytes(), wire::MAX_NACHRICHT_BYTES)
                }
                Message::Binary(daten) => {
                    wire::nachricht_dekodieren(&daten, wire::MAX_NACHRICHT_BYTES)
                }
                // Protokoll-Pings beantwortet axum selbst
                Message::Ping(_) | Message::Pong(_) => continue,
                Message::Close(_) => return None,
            };
            return Some(ergebnis.map_err(|e| EmpfangsFehler::Ungueltig(e.to_string())));
        }
    }

    async fn senden(&mut self, nachricht: SignalMessage) -> io::Result<()> {
        let json = wire::nachricht_kodieren(&nachricht, wire::MAX_NACHRICHT_BYTES)?;
        let text =
            String::from_utf8(json).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.send(Message::Text(text)).await.map_err(io::Error::other)
    }
}

// ---------------------------------------------------------------------------
// ClientConnection
// ---------------------------------------------------------------------------

/// Verarbeitet eine einzelne Verbindung
///
/// Liest Nachrichten ueber den `SignalTransport`, dispatcht an den
/// `MessageDispatcher` und sendet Antworten zurueck. Laeuft in einem
/// eigenen tokio-Task.
pub struct ClientConnection {
    state: Arc<SignalingState>,
    peer_addr: Option<SocketAddr>,
}

impl ClientConnection {
    /// Erstellt eine neue ClientConnection
    pub fn neu(state: Arc<SignalingState>, peer_addr: Option<SocketAddr>) -> Self {
        Self { state, peer_addr }
    }

    /// Startet die Verbindungs-Verarbeitungsschleife
    ///
    /// Diese Methode laeuft bis die Verbindung getrennt wird oder ein
    /// Shutdown-Signal eingeht.
    pub async fn verarbeiten<T: SignalTransport>(
        self,
        mut transport: T,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let verbindung = ConnectionId::naechste();
        let peer = self
            .peer_addr
            .map(|a| a.to_string())
            .unwrap_or_else(|| "-".to_string());
        let keepalive_intervall = Duration::from_secs(self.state.config.keepalive_sek.max(1));
        let timeout_dauer = Duration::from_secs(self.state.config.verbindungs_timeout_sek);

        let dispatcher = MessageDispatcher::neu(Arc::clone(&self.state));

        let mut sende_rx = match dispatcher.verbindung_oeffnen(verbindung) {
            Ok(rx) => rx,
            Err(e) => {
                let _ = transport
                    .senden(SignalMessage::error(0, e.code(), e.to_string()))
                    .await;
                return;
            }
        };

        tracing::info!(peer = %peer, connection_id = %verbindung, "Neue Verbindung");

        let mut ctx = DispatcherContext::neu(verbindung, self.peer_addr);

        // Zeitpunkt des letzten empfangenen Frames
        let mut letzter_empfang = Instant::now();
        // Zeitpunkt des naechsten Ping
        let mut naechster_ping = Instant::now() + keepalive_intervall;
        let mut ping_request_id: u32 = 0;

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let jetzt = Instant::now();

            // Timeout-Pruefung
            if jetzt.duration_since(letzter_empfang) > timeout_dauer {
                tracing::warn!(peer = %peer, connection_id = %verbindung, "Verbindungs-Timeout");
                break;
            }

            let ping_verzoegerung = if jetzt < naechster_ping {
                naechster_ping.duration_since(jetzt)
            } else {
                Duration::from_millis(1)
            };

            tokio::select! {
                // Eingehende Nachricht vom Client
                eingang = transport.empfangen() => {
                    match eingang {
                        Some(Ok(nachricht)) => {
                            letzter_empfang = Instant::now();
                            if let Some(antwort) = dispatcher.dispatch(nachricht, &mut ctx).await {
                                if let Err(e) = transport.senden(antwort).await {
                                    tracing::warn!(peer = %peer, fehler = %e, "Senden fehlgeschlagen");
                                    break;
                                }
                            }
                        }
                        Some(Err(EmpfangsFehler::Ungueltig(grund))) => {
                            letzter_empfang = Instant::now();
                            tracing::debug!(peer = %peer, grund = %grund, "Ungueltige Nachricht");
                            let fehler = SignalMessage::error(0, ErrorCode::InvalidRequest, grund);
                            if transport.senden(fehler).await.is_err() {
                                break;
                            }
                        }
                        Some(Err(EmpfangsFehler::Io(e))) => {
                            tracing::warn!(peer = %peer, fehler = %e, "Lesefehler");
                            break;
                        }
                        None => {
                            tracing::info!(peer = %peer, connection_id = %verbindung, "Verbindung vom Client getrennt");
                            break;
                        }
                    }
                }

                // Ausgehende Nachricht aus dem EventRouter
                Some(ausgehend) = sende_rx.recv() => {
                    if let Err(e) = transport.senden(ausgehend).await {
                        tracing::warn!(peer = %peer, fehler = %e, "Push-Senden fehlgeschlagen");
                        break;
                    }
                }

                // Keepalive-Ping
                _ = tokio::time::sleep(ping_verzoegerung) => {
                    if Instant::now() >= naechster_ping {
                        ping_request_id = ping_request_id.wrapping_add(1);
                        let ts = std::time::SystemTime::now()
                            .duration_since(std::time::UNIX_EPOCH)
                            .unwrap_or_default()
                            .as_millis() as u64;
                        if let Err(e) = transport.senden(SignalMessage::ping(ping_request_id, ts)).await {
                            tracing::warn!(peer = %peer, fehler = %e, "Ping-Senden fehlgeschlagen");
                            break;
                        }
                        naechster_ping = Instant::now() + keepalive_intervall;
                    }
                }

                // Shutdown-Signal
                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!(peer = %peer, "Shutdown-Signal – Verbindung wird getrennt");
                        let abschied = SignalMessage::error(
                            0,
                            ErrorCode::InternalError,
                            "Server wird heruntergefahren",
                        );
                        let _ = transport.senden(abschied).await;
                        break;
                    }
                }
            }
        }

        dispatcher.verbindung_trennen(verbindung).await;
        tracing::info!(peer = %peer, connection_id = %verbindung, "Verbindungs-Task beendet");
    }
}
