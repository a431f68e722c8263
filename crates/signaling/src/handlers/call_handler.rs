//! Anruf-Handler – Lebenszyklus, Peer-Link-Aushandlung, Medienstatus
//!
//! Aushandlungsnachrichten (Offer, Answer, ICE-Kandidaten) und der
//! Medienstatus werden bei Erfolg nicht quittiert; nur Fehler gehen an
//! den Absender zurueck. Sonst verdoppelt sich der Verkehr waehrend des
//! ICE-Gatherings.

use parley_core::{ConnectionId, ConversationId, UserId};
use parley_protocol::{
    CallRingingResponse, CallStartRequest, MediaStateRequest, SignalMessage, SignalPayload,
    WebRtcOutbound,
};
use std::sync::Arc;

use super::{antwort, fehler_antwort};
use crate::error::SignalingResult;
use crate::server_state::SignalingState;

/// Art einer Aushandlungsnachricht
#[derive(Debug, Clone, Copy)]
pub enum AushandlungsArt {
    Offer,
    Answer,
    IceKandidat,
}

/// Startet einen Anruf; Antwort `call_ringing` mit den Eingeladenen
pub async fn handle_call_start(
    request: CallStartRequest,
    request_id: u32,
    verbindung: ConnectionId,
    user_id: UserId,
    state: &Arc<SignalingState>,
) -> SignalMessage {
    let conversation_id = request.conversation_id;
    let ergebnis = state
        .anrufe
        .anruf_starten(verbindung, user_id, conversation_id, request.call_kind)
        .await
        .map(|invited| {
            SignalPayload::CallRinging(CallRingingResponse {
                conversation_id,
                invited,
            })
        });
    if let Err(ref e) = ergebnis {
        tracing::debug!(
            user_id = %user_id,
            conversation_id = %conversation_id,
            fehler = %e,
            "Anruf-Start abgelehnt"
        );
    }
    antwort(request_id, ergebnis)
}

/// Nimmt an; Antwort `call_joined` mit den bereits Beigetretenen
pub fn handle_call_accept(
    conversation_id: ConversationId,
    request_id: u32,
    verbindung: ConnectionId,
    user_id: UserId,
    state: &Arc<SignalingState>,
) -> SignalMessage {
    antwort(
        request_id,
        state
            .anrufe
            .anruf_annehmen(verbindung, user_id, conversation_id)
            .map(SignalPayload::CallJoined),
    )
}

pub fn handle_call_reject(
    conversation_id: ConversationId,
    request_id: u32,
    verbindung: ConnectionId,
    user_id: UserId,
    state: &Arc<SignalingState>,
) -> SignalMessage {
    antwort(
        request_id,
        state
            .anrufe
            .anruf_ablehnen(verbindung, user_id, conversation_id)
            .map(|_| SignalPayload::Ok),
    )
}

pub fn handle_call_end(
    conversation_id: ConversationId,
    request_id: u32,
    verbindung: ConnectionId,
    user_id: UserId,
    state: &Arc<SignalingState>,
) -> SignalMessage {
    antwort(
        request_id,
        state
            .anrufe
            .anruf_beenden(verbindung, user_id, conversation_id)
            .map(|_| SignalPayload::Ok),
    )
}

/// Leitet Offer, Answer oder ICE-Kandidat an den Ziel-Teilnehmer weiter
pub fn handle_aushandlung(
    art: AushandlungsArt,
    request: WebRtcOutbound,
    request_id: u32,
    verbindung: ConnectionId,
    user_id: UserId,
    state: &Arc<SignalingState>,
) -> Option<SignalMessage> {
    let ergebnis = match art {
        AushandlungsArt::Offer => state.anrufe.offer_weiterleiten(verbindung, user_id, request),
        AushandlungsArt::Answer => state.anrufe.answer_weiterleiten(verbindung, user_id, request),
        AushandlungsArt::IceKandidat => {
            state.anrufe.kandidat_weiterleiten(verbindung, user_id, request)
        }
    };
    nur_fehler(request_id, ergebnis)
}

pub fn handle_media_state(
    request: MediaStateRequest,
    request_id: u32,
    verbindung: ConnectionId,
    user_id: UserId,
    state: &Arc<SignalingState>,
) -> Option<SignalMessage> {
    nur_fehler(
        request_id,
        state
            .anrufe
            .medienstatus_weiterleiten(verbindung, user_id, request),
    )
}

fn nur_fehler(request_id: u32, ergebnis: SignalingResult<()>) -> Option<SignalMessage> {
    match ergebnis {
        Ok(()) => None,
        Err(e) => {
            tracing::debug!(request_id, fehler = %e, "Anruf-Signal verworfen");
            Some(fehler_antwort(request_id, &e))
        }
    }
}
