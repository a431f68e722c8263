//! Raum-Handler – JoinRoom, LeaveRoom, PresenceQuery

use parley_core::{ConnectionId, ConversationId, UserId};
use parley_protocol::{PresenceStateResponse, SignalMessage, SignalPayload};
use std::sync::Arc;

use super::antwort;
use crate::error::{store_aufruf, SignalingError, SignalingResult};
use crate::server_state::SignalingState;

/// Tritt dem Raum einer Konversation bei
///
/// Nur Teilnehmer der Konversation duerfen beitreten. Erneuter Beitritt
/// ist ein No-op.
pub async fn handle_join_room(
    conversation_id: ConversationId,
    request_id: u32,
    verbindung: ConnectionId,
    user_id: UserId,
    state: &Arc<SignalingState>,
) -> SignalMessage {
    antwort(
        request_id,
        raum_beitreten(conversation_id, verbindung, user_id, state).await,
    )
}

async fn raum_beitreten(
    conversation_id: ConversationId,
    verbindung: ConnectionId,
    user_id: UserId,
    state: &Arc<SignalingState>,
) -> SignalingResult<SignalPayload> {
    if !state.raeume.ist_mitglied(verbindung, &conversation_id) {
        let teilnehmer = store_aufruf(
            state.config.store_timeout(),
            "teilnehmer_auflisten",
            state.konversationen.teilnehmer_auflisten(conversation_id),
        )
        .await?;
        if !teilnehmer.contains(&user_id) {
            return Err(SignalingError::nicht_gefunden(format!(
                "{} ist kein Teilnehmer von {}",
                user_id, conversation_id
            )));
        }
        state.raeume.beitreten(verbindung, conversation_id);
        tracing::debug!(
            connection_id = %verbindung,
            conversation_id = %conversation_id,
            "Raum beigetreten"
        );
    }
    Ok(SignalPayload::Ok)
}

/// Verlaesst einen Raum (auch ohne vorherigen Beitritt kein Fehler)
pub fn handle_leave_room(
    conversation_id: ConversationId,
    request_id: u32,
    verbindung: ConnectionId,
    state: &Arc<SignalingState>,
) -> SignalMessage {
    if state.raeume.verlassen(verbindung, conversation_id) {
        tracing::debug!(
            connection_id = %verbindung,
            conversation_id = %conversation_id,
            "Raum verlassen"
        );
    }
    SignalMessage::ok(request_id)
}

/// Online-Status einer Benutzerliste
pub fn handle_presence_query(
    user_ids: Vec<UserId>,
    request_id: u32,
    state: &Arc<SignalingState>,
) -> SignalMessage {
    SignalMessage::new(
        request_id,
        SignalPayload::PresenceState(PresenceStateResponse {
            online: state.presence.online_filtern(&user_ids),
        }),
    )
}
