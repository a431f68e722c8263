//! Chat-Handler – Nachrichten, Lesebestaetigungen, Tipp-Indikatoren
//!
//! Nachrichten und Lesebestaetigungen laufen ueber den `MessageRelay`
//! (erst persistieren, dann verteilen), Tipp-Indikatoren ueber den
//! `TypingCoordinator` (rein ephemer).

use parley_core::{ConnectionId, ConversationId, MessageId, UserId};
use parley_protocol::{SendMessageRequest, SignalMessage};
use std::sync::Arc;

use super::fehler_antwort;
use crate::error::SignalingError;
use crate::server_state::SignalingState;

/// Verarbeitet eine neue Chat-Nachricht
pub async fn handle_send_message(
    request: SendMessageRequest,
    request_id: u32,
    user_id: UserId,
    state: &Arc<SignalingState>,
) -> SignalMessage {
    match state
        .nachrichten
        .nachricht_senden(
            user_id,
            request.conversation_id,
            &request.content,
            &request.message_type,
        )
        .await
    {
        Ok(_) => SignalMessage::ok(request_id),
        Err(e) => {
            tracing::warn!(
                user_id = %user_id,
                conversation_id = %request.conversation_id,
                fehler = %e,
                "Nachricht senden fehlgeschlagen"
            );
            fehler_antwort(request_id, &e)
        }
    }
}

/// Markiert eine Nachricht als gelesen
pub async fn handle_mark_read(
    message_id: MessageId,
    request_id: u32,
    user_id: UserId,
    state: &Arc<SignalingState>,
) -> SignalMessage {
    match state.nachrichten.als_gelesen_markieren(message_id, user_id).await {
        Ok(_) => SignalMessage::ok(request_id),
        Err(e) => {
            tracing::debug!(
                user_id = %user_id,
                message_id = %message_id,
                fehler = %e,
                "Lesebestaetigung fehlgeschlagen"
            );
            fehler_antwort(request_id, &e)
        }
    }
}

/// Tipp-Indikator setzen (nur aus einem beigetretenen Raum)
pub fn handle_typing(
    conversation_id: ConversationId,
    request_id: u32,
    verbindung: ConnectionId,
    user_id: UserId,
    state: &Arc<SignalingState>,
) -> SignalMessage {
    if !state.raeume.ist_mitglied(verbindung, &conversation_id) {
        return fehler_antwort(
            request_id,
            &SignalingError::nicht_gefunden(format!("Raum {} nicht beigetreten", conversation_id)),
        );
    }
    state.tippen.tippen(verbindung, user_id, conversation_id);
    SignalMessage::ok(request_id)
}

/// Tipp-Indikator beenden (meldet immer)
pub fn handle_stop_typing(
    conversation_id: ConversationId,
    request_id: u32,
    verbindung: ConnectionId,
    user_id: UserId,
    state: &Arc<SignalingState>,
) -> SignalMessage {
    state.tippen.tippen_beenden(verbindung, user_id, conversation_id);
    SignalMessage::ok(request_id)
}
