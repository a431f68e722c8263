//! Handler fuer alle Client-Nachrichten
//!
//! Jeder Handler ist fuer eine Gruppe von Nachrichtentypen zustaendig
//! und hat Zugriff auf den gemeinsamen SignalingState. Fehler werden als
//! `error`-Payload mit der `request_id` der Anfrage beantwortet und gehen
//! nur an die ausloesende Verbindung.

pub mod auth_handler;
pub mod call_handler;
pub mod chat_handler;
pub mod room_handler;

use parley_protocol::{SignalMessage, SignalPayload};

use crate::error::{SignalingError, SignalingResult};

/// Fehler-Antwort an die ausloesende Verbindung
pub(crate) fn fehler_antwort(request_id: u32, fehler: &SignalingError) -> SignalMessage {
    SignalMessage::error(request_id, fehler.code(), fehler.to_string())
}

/// Wandelt ein Handler-Ergebnis in die Antwort-Nachricht
pub(crate) fn antwort(request_id: u32, ergebnis: SignalingResult<SignalPayload>) -> SignalMessage {
    match ergebnis {
        Ok(payload) => SignalMessage::new(request_id, payload),
        Err(e) => fehler_antwort(request_id, &e),
    }
}
