//! Auth-Handler – Authenticate, Logout
//!
//! Bindet eine Verbindung an den Benutzer hinter dem Bearer-Credential
//! und meldet daraus folgende Presence-Kanten.

use parley_core::{ConnectionId, UserId};
use parley_protocol::{AuthenticateRequest, AuthenticatedResponse, SignalMessage, SignalPayload};
use std::sync::Arc;

use super::fehler_antwort;
use crate::server_state::SignalingState;

/// Verarbeitet eine Authenticate-Anfrage
///
/// Gibt bei Erfolg zusaetzlich die gebundene UserId zurueck, damit der
/// Dispatcher sie im Verbindungskontext ablegen kann.
pub async fn handle_authenticate(
    request: AuthenticateRequest,
    request_id: u32,
    verbindung: ConnectionId,
    state: &Arc<SignalingState>,
) -> (SignalMessage, Option<UserId>) {
    match state
        .sitzungen
        .authentifizieren(verbindung, &request.token)
        .await
    {
        Ok((user_id, kante)) => {
            tracing::info!(
                connection_id = %verbindung,
                user_id = %user_id,
                "Verbindung authentifiziert"
            );
            state.presence.kante_melden(user_id, kante).await;
            (
                SignalMessage::new(
                    request_id,
                    SignalPayload::Authenticated(AuthenticatedResponse { user_id }),
                ),
                Some(user_id),
            )
        }
        Err(e) => {
            tracing::warn!(
                connection_id = %verbindung,
                fehler = %e,
                "Authentifizierung fehlgeschlagen"
            );
            (fehler_antwort(request_id, &e), None)
        }
    }
}

/// Verarbeitet einen Logout
///
/// Raeume, Anrufe und Tipp-Indikatoren hat der Dispatcher zu diesem
/// Zeitpunkt bereits bereinigt. Die Verbindung bleibt offen und kann
/// sich erneut authentifizieren.
pub async fn handle_logout(
    request_id: u32,
    verbindung: ConnectionId,
    state: &Arc<SignalingState>,
) -> SignalMessage {
    if let Some((user_id, kante)) = state.sitzungen.entbinden(verbindung) {
        tracing::info!(connection_id = %verbindung, user_id = %user_id, "Logout");
        state.presence.kante_melden(user_id, kante).await;
    }
    SignalMessage::ok(request_id)
}
