//! Message-Dispatcher – Routet SignalMessages an die richtigen Handler
//!
//! Der Dispatcher empfaengt SignalMessages einer Verbindung, bestimmt
//! den richtigen Handler und gibt die Antwort zurueck. Pushes an andere
//! Verbindungen laufen ueber den EventRouter, nie ueber den Rueckgabewert.
//!
//! ## Zustandspruefung
//! - `authenticate`, `ping` und `pong` sind immer erlaubt
//! - Alles andere erfordert eine authentifizierte Verbindung, sonst
//!   `UNAUTHENTICATED` ohne jede Zustandsaenderung oder Verteilung
//!
//! ## Aufraeumen
//! Trennen, Verbindungs-Timeout und Logout laufen durch denselben Pfad:
//! Anrufe verlassen, Tipp-Indikatoren beenden, alle Raeume verlassen.
//! Trennen entfernt danach zusaetzlich die Verbindung selbst.

use parley_core::{ConnectionId, UserId};
use parley_protocol::{ErrorCode, SignalMessage, SignalPayload};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::{SignalingError, SignalingResult};
use crate::handlers::call_handler::AushandlungsArt;
use crate::handlers::{auth_handler, call_handler, chat_handler, room_handler};
use crate::server_state::SignalingState;

/// Dispatcher-Kontext – Informationen ueber die aktuelle Verbindung
#[derive(Debug, Clone)]
pub struct DispatcherContext {
    /// Handle der Verbindung
    pub verbindung: ConnectionId,
    /// Peer-Adresse (nur fuer Logging)
    pub peer_addr: Option<SocketAddr>,
    /// Authentifizierte User-ID (None wenn nicht authentifiziert)
    pub user_id: Option<UserId>,
}

impl DispatcherContext {
    pub fn neu(verbindung: ConnectionId, peer_addr: Option<SocketAddr>) -> Self {
        Self {
            verbindung,
            peer_addr,
            user_id: None,
        }
    }
}

/// Zentraler Message-Dispatcher
///
/// Routet eingehende SignalMessages an die entsprechenden Handler und
/// gibt die Antwort-SignalMessage zurueck.
#[derive(Clone)]
pub struct MessageDispatcher {
    state: Arc<SignalingState>,
}

impl MessageDispatcher {
    /// Erstellt einen neuen Dispatcher
    pub fn neu(state: Arc<SignalingState>) -> Self {
        Self { state }
    }

    /// Nimmt eine neue Verbindung auf und gibt ihre Send-Queue zurueck
    ///
    /// Scheitert mit `ServerVoll` wenn `max_verbindungen` erreicht ist.
    pub fn verbindung_oeffnen(
        &self,
        verbindung: ConnectionId,
    ) -> SignalingResult<mpsc::Receiver<SignalMessage>> {
        if self.state.sitzungen.verbindungs_anzahl() >= self.state.config.max_verbindungen {
            tracing::warn!(
                connection_id = %verbindung,
                max = self.state.config.max_verbindungen,
                "Server voll – Verbindung abgelehnt"
            );
            return Err(SignalingError::ServerVoll);
        }
        self.state.sitzungen.verbindung_registrieren(verbindung);
        Ok(self.state.router.verbindung_registrieren(verbindung))
    }

    /// Verarbeitet eine eingehende SignalMessage und gibt die Antwort zurueck
    ///
    /// Gibt `None` zurueck wenn keine Antwort gesendet werden soll
    /// (Pong, erfolgreich weitergeleitete Aushandlung).
    pub async fn dispatch(
        &self,
        message: SignalMessage,
        ctx: &mut DispatcherContext,
    ) -> Option<SignalMessage> {
        let request_id = message.request_id;
        tracing::trace!(
            connection_id = %ctx.verbindung,
            request_id,
            typ = message.payload.typ_name(),
            "Dispatch"
        );

        match message.payload {
            // -------------------------------------------------------------------
            // Auth-Nachrichten (immer erlaubt)
            // -------------------------------------------------------------------
            SignalPayload::Authenticate(req) => {
                if ctx.user_id.is_some() {
                    return Some(SignalMessage::error(
                        request_id,
                        ErrorCode::AlreadyAuthenticated,
                        SignalingError::BereitsAuthentifiziert.to_string(),
                    ));
                }

                let (antwort, user_id) =
                    auth_handler::handle_authenticate(req, request_id, ctx.verbindung, &self.state)
                        .await;
                if user_id.is_some() {
                    ctx.user_id = user_id;
                }
                Some(antwort)
            }

            // -------------------------------------------------------------------
            // Keepalive
            // -------------------------------------------------------------------
            SignalPayload::Ping(ping) => {
                let server_ts = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_millis() as u64;
                Some(SignalMessage::pong(request_id, ping.timestamp_ms, server_ts))
            }

            SignalPayload::Pong(_) => {
                // Pong-Antworten vom Client werden nur geloggt (RTT-Messung)
                tracing::trace!(connection_id = %ctx.verbindung, "Pong empfangen");
                None
            }

            // -------------------------------------------------------------------
            // Authentifizierung erfordernde Nachrichten
            // -------------------------------------------------------------------
            payload => {
                let user_id = match ctx.user_id {
                    Some(uid) => uid,
                    None => {
                        tracing::debug!(
                            connection_id = %ctx.verbindung,
                            typ = payload.typ_name(),
                            "Nachricht vor Authentifizierung abgelehnt"
                        );
                        return Some(SignalMessage::error(
                            request_id,
                            ErrorCode::Unauthenticated,
                            SignalingError::NichtAuthentifiziert.to_string(),
                        ));
                    }
                };

                self.dispatch_authenticated(payload, request_id, user_id, ctx)
                    .await
            }
        }
    }

    /// Routet Nachrichten die eine Authentifizierung erfordern
    async fn dispatch_authenticated(
        &self,
        payload: SignalPayload,
        request_id: u32,
        user_id: UserId,
        ctx: &mut DispatcherContext,
    ) -> Option<SignalMessage> {
        let verbindung = ctx.verbindung;
        let state = &self.state;

        match payload {
            SignalPayload::Logout => {
                self.benutzer_bereinigen(verbindung, user_id);
                let antwort = auth_handler::handle_logout(request_id, verbindung, state).await;
                ctx.user_id = None;
                Some(antwort)
            }

            // -------------------------------------------------------------------
            // Raeume & Presence
            // -------------------------------------------------------------------
            SignalPayload::JoinRoom { conversation_id } => Some(
                room_handler::handle_join_room(conversation_id, request_id, verbindung, user_id, state)
                    .await,
            ),

            SignalPayload::LeaveRoom { conversation_id } => Some(room_handler::handle_leave_room(
                conversation_id,
                request_id,
                verbindung,
                state,
            )),

            SignalPayload::PresenceQuery { user_ids } => Some(
                room_handler::handle_presence_query(user_ids, request_id, state),
            ),

            // -------------------------------------------------------------------
            // Chat-Nachrichten
            // -------------------------------------------------------------------
            SignalPayload::SendMessage(req) => {
                Some(chat_handler::handle_send_message(req, request_id, user_id, state).await)
            }

            SignalPayload::MarkRead { message_id } => {
                Some(chat_handler::handle_mark_read(message_id, request_id, user_id, state).await)
            }

            SignalPayload::Typing { conversation_id } => Some(chat_handler::handle_typing(
                conversation_id,
                request_id,
                verbindung,
                user_id,
                state,
            )),

            SignalPayload::StopTyping { conversation_id } => Some(
                chat_handler::handle_stop_typing(conversation_id, request_id, verbindung, user_id, state),
            ),

            // -------------------------------------------------------------------
            // Anruf-Nachrichten
            // -------------------------------------------------------------------
            SignalPayload::CallStart(req) => Some(
                call_handler::handle_call_start(req, request_id, verbindung, user_id, state).await,
            ),

            SignalPayload::CallAccept { conversation_id } => Some(
                call_handler::handle_call_accept(conversation_id, request_id, verbindung, user_id, state),
            ),

            SignalPayload::CallReject { conversation_id } => Some(
                call_handler::handle_call_reject(conversation_id, request_id, verbindung, user_id, state),
            ),

            SignalPayload::CallEnd { conversation_id } => Some(call_handler::handle_call_end(
                conversation_id,
                request_id,
                verbindung,
                user_id,
                state,
            )),

            SignalPayload::WebrtcOffer(req) => call_handler::handle_aushandlung(
                AushandlungsArt::Offer,
                req,
                request_id,
                verbindung,
                user_id,
                state,
            ),

            SignalPayload::WebrtcAnswer(req) => call_handler::handle_aushandlung(
                AushandlungsArt::Answer,
                req,
                request_id,
                verbindung,
                user_id,
                state,
            ),

            SignalPayload::WebrtcIceCandidate(req) => call_handler::handle_aushandlung(
                AushandlungsArt::IceKandidat,
                req,
                request_id,
                verbindung,
                user_id,
                state,
            ),

            SignalPayload::MediaState(req) => {
                call_handler::handle_media_state(req, request_id, verbindung, user_id, state)
            }

            // -------------------------------------------------------------------
            // Unbekannte / unerwartete Nachrichten
            // -------------------------------------------------------------------
            SignalPayload::Authenticated(_)
            | SignalPayload::NewMessage { .. }
            | SignalPayload::MessageRead(_)
            | SignalPayload::UserTyping { .. }
            | SignalPayload::UserStopTyping { .. }
            | SignalPayload::UserOnline { .. }
            | SignalPayload::UserOffline { .. }
            | SignalPayload::PresenceState(_)
            | SignalPayload::IncomingCall(_)
            | SignalPayload::CallRinging(_)
            | SignalPayload::CallAccepted { .. }
            | SignalPayload::CallJoined(_)
            | SignalPayload::CallRejected { .. }
            | SignalPayload::CallEnded(_)
            | SignalPayload::WebrtcOfferReceived(_)
            | SignalPayload::WebrtcAnswerReceived(_)
            | SignalPayload::WebrtcIceCandidateReceived(_)
            | SignalPayload::MediaStateChanged(_)
            | SignalPayload::Ok
            | SignalPayload::Error(_) => {
                tracing::warn!(
                    connection_id = %verbindung,
                    request_id,
                    "Unerwartete Server->Client Nachricht vom Client empfangen"
                );
                Some(SignalMessage::error(
                    request_id,
                    ErrorCode::InvalidRequest,
                    "Unerwartete Nachricht",
                ))
            }

            // Werden oben bereits behandelt
            SignalPayload::Authenticate(_) => Some(SignalMessage::error(
                request_id,
                ErrorCode::AlreadyAuthenticated,
                SignalingError::BereitsAuthentifiziert.to_string(),
            )),
            SignalPayload::Ping(_) | SignalPayload::Pong(_) => None,
        }
    }

    /// Beendet alles, was der Benutzer ueber diese Verbindung haelt
    fn benutzer_bereinigen(&self, verbindung: ConnectionId, user_id: UserId) {
        self.state.anrufe.verbindung_getrennt(verbindung, user_id);
        self.state.tippen.verbindung_getrennt(verbindung);
        let raeume = self.state.raeume.alle_verlassen(verbindung);
        tracing::debug!(
            connection_id = %verbindung,
            user_id = %user_id,
            raeume = raeume.len(),
            "Verbindungs-Ressourcen bereinigt"
        );
    }

    /// Einziger Aufraeumpfad beim Trennen (Transport-Ende, Timeout, Shutdown)
    ///
    /// Idempotent: ein zweiter Aufruf findet nichts mehr vor.
    pub async fn verbindung_trennen(&self, verbindung: ConnectionId) {
        if let Some(user_id) = self.state.sitzungen.benutzer_von(verbindung) {
            self.benutzer_bereinigen(verbindung, user_id);
        } else {
            self.state.raeume.alle_verlassen(verbindung);
        }
        self.state.router.verbindung_entfernen(verbindung);

        if let Some((Some(user_id), kante)) = self.state.sitzungen.entfernen(verbindung) {
            self.state.presence.kante_melden(user_id, kante).await;
        }
    }

    pub fn state(&self) -> &Arc<SignalingState> {
        &self.state
    }
}
