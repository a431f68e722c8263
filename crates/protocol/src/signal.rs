//! Signal-Protokoll (TCP und WebSocket)
//!
//! Definiert alle Nachrichten die zwischen Client und Server ueber den
//! bidirektionalen Event-Kanal ausgetauscht werden.
//!
//! ## Design
//! - Request/Response Pattern: jede Nachricht hat eine `request_id: u32`
//! - Server-Pushes (Broadcasts, Weiterleitungen) tragen `request_id = 0`
//! - JSON-Serialisierung via serde, Tagged Enum mit `type`-Feld
//! - SDP-Beschreibungen und ICE-Kandidaten sind opake JSON-Werte und
//!   werden vom Server nie interpretiert

use parley_core::{ConversationId, MessageId, MessageRecord, UserId};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Fehler-Codes
// ---------------------------------------------------------------------------

/// Standardisierte Fehler-Codes fuer Error-Antworten
///
/// Fehler werden immer nur an den ausloesenden Client gesendet,
/// nie an einen Raum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Allgemein
    InternalError,
    InvalidRequest,
    NotFound,
    // Auth
    Unauthenticated,
    AlreadyAuthenticated,
    InvalidCredential,
    // Anruf
    AlreadyInCall,
    /// Send-Queue des Gegenuebers kann die Aushandlung gerade nicht aufnehmen
    RecipientBusy,
    // Persistenz
    PersistenceFailure,
    // Server
    ServerFull,
}

// ---------------------------------------------------------------------------
// Anruf-Typen
// ---------------------------------------------------------------------------

/// Art eines Anrufs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    Audio,
    Video,
}

impl std::fmt::Display for CallKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Audio => write!(f, "audio"),
            Self::Video => write!(f, "video"),
        }
    }
}

// ---------------------------------------------------------------------------
// Auth-Nachrichten
// ---------------------------------------------------------------------------

/// Authentifizierung einer Verbindung mit einem Bearer-Token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticateRequest {
    pub token: String,
}

/// Erfolgreiche Authentifizierung
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedResponse {
    pub user_id: UserId,
}

// ---------------------------------------------------------------------------
// Nachrichten & Lesebestaetigungen
// ---------------------------------------------------------------------------

/// Neue Chat-Nachricht senden
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub conversation_id: ConversationId,
    pub content: String,
    #[serde(default = "standard_nachrichtentyp")]
    pub message_type: String,
}

fn standard_nachrichtentyp() -> String {
    "text".to_string()
}

/// Lesebestaetigung einer Nachricht (Broadcast an den Raum)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageReadEvent {
    pub message_id: MessageId,
    pub user_id: UserId,
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

/// Online-Status mehrerer Benutzer (Antwort auf `presence_query`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceStateResponse {
    pub online: Vec<UserId>,
}

// ---------------------------------------------------------------------------
// Anruf-Signalisierung
// ---------------------------------------------------------------------------

/// Anruf in einer Konversation starten
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallStartRequest {
    pub conversation_id: ConversationId,
    pub call_kind: CallKind,
}

/// Eingehender Anruf (an jede Verbindung eines Eingeladenen)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingCallEvent {
    pub conversation_id: ConversationId,
    pub caller_id: UserId,
    pub call_kind: CallKind,
    /// Alle Eingeladenen inklusive Anrufer
    pub participants: Vec<UserId>,
}

/// Bestaetigung an den Anrufer: es klingelt bei diesen Benutzern
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRingingResponse {
    pub conversation_id: ConversationId,
    pub invited: Vec<UserId>,
}

/// Antwort an den Annehmenden: diese Teilnehmer sind bereits beigetreten
///
/// Der Annehmende erzeugt an jeden von ihnen ein Offer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallJoinedResponse {
    pub conversation_id: ConversationId,
    pub call_kind: CallKind,
    pub participants: Vec<UserId>,
}

/// Ein Teilnehmer hat den Anruf verlassen oder der Anruf ist beendet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallEndedEvent {
    pub conversation_id: ConversationId,
    /// Wer aufgelegt hat
    pub user_id: UserId,
    /// `true` wenn die Anruf-Session dadurch aufgeloest wurde
    pub session_closed: bool,
}

/// Ausgehende WebRTC-Nachricht vom Client (Offer, Answer, Kandidat)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebRtcOutbound {
    pub conversation_id: ConversationId,
    pub target_user_id: UserId,
    /// Opaker Inhalt (SDP oder ICE-Kandidat)
    pub data: serde_json::Value,
}

/// Weitergeleitete WebRTC-Nachricht an den Ziel-Client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebRtcInbound {
    pub conversation_id: ConversationId,
    pub from_user_id: UserId,
    pub data: serde_json::Value,
}

/// Lokaler Medienstatus (Mute, Kamera, Bildschirmfreigabe)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaStateRequest {
    pub conversation_id: ConversationId,
    pub audio_muted: bool,
    pub video_enabled: bool,
    pub screen_sharing: bool,
}

/// Weitergeleiteter Medienstatus eines Teilnehmers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaStateChangedEvent {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub audio_muted: bool,
    pub video_enabled: bool,
    pub screen_sharing: bool,
}

// ---------------------------------------------------------------------------
// Keepalive
// ---------------------------------------------------------------------------

/// Ping (Client -> Server oder Server -> Client)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingMessage {
    /// Unix-Timestamp in Millisekunden fuer RTT-Messung
    pub timestamp_ms: u64,
}

/// Pong-Antwort (spiegelt Timestamp zurueck)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PongMessage {
    pub echo_timestamp_ms: u64,
    pub server_timestamp_ms: u64,
}

// ---------------------------------------------------------------------------
// Haupt-Enum
// ---------------------------------------------------------------------------

/// Alle moeglichen Signal-Nachrichten (typsicher via Tagged Enum)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalPayload {
    // Auth (Client -> Server)
    Authenticate(AuthenticateRequest),
    Logout,
    // Auth (Server -> Client)
    Authenticated(AuthenticatedResponse),

    // Raeume
    JoinRoom { conversation_id: ConversationId },
    LeaveRoom { conversation_id: ConversationId },

    // Nachrichten
    SendMessage(SendMessageRequest),
    NewMessage { message: MessageRecord },
    MarkRead { message_id: MessageId },
    MessageRead(MessageReadEvent),

    // Tippen
    Typing { conversation_id: ConversationId },
    StopTyping { conversation_id: ConversationId },
    UserTyping {
        conversation_id: ConversationId,
        user_id: UserId,
    },
    UserStopTyping {
        conversation_id: ConversationId,
        user_id: UserId,
    },

    // Presence
    UserOnline { user_id: UserId },
    UserOffline { user_id: UserId },
    PresenceQuery { user_ids: Vec<UserId> },
    PresenceState(PresenceStateResponse),

    // Anruf-Lebenszyklus (Client -> Server)
    CallStart(CallStartRequest),
    CallAccept { conversation_id: ConversationId },
    CallReject { conversation_id: ConversationId },
    CallEnd { conversation_id: ConversationId },
    // Anruf-Lebenszyklus (Server -> Client)
    IncomingCall(IncomingCallEvent),
    CallRinging(CallRingingResponse),
    CallAccepted {
        conversation_id: ConversationId,
        user_id: UserId,
    },
    CallJoined(CallJoinedResponse),
    CallRejected {
        conversation_id: ConversationId,
        user_id: UserId,
    },
    CallEnded(CallEndedEvent),

    // Peer-Link-Aushandlung: Client -> Server
    WebrtcOffer(WebRtcOutbound),
    WebrtcAnswer(WebRtcOutbound),
    WebrtcIceCandidate(WebRtcOutbound),
    // Peer-Link-Aushandlung: Server -> Client
    WebrtcOfferReceived(WebRtcInbound),
    WebrtcAnswerReceived(WebRtcInbound),
    WebrtcIceCandidateReceived(WebRtcInbound),

    // Medienstatus
    MediaState(MediaStateRequest),
    MediaStateChanged(MediaStateChangedEvent),

    // Keepalive
    Ping(PingMessage),
    Pong(PongMessage),

    // Quittung / Fehler
    Ok,
    Error(ErrorResponse),
}

impl SignalPayload {
    /// Name des Nachrichtentyps fuer Logging
    pub fn typ_name(&self) -> &'static str {
        match self {
            Self::Authenticate(_) => "authenticate",
            Self::Logout => "logout",
            Self::Authenticated(_) => "authenticated",
            Self::JoinRoom { .. } => "join_room",
            Self::LeaveRoom { .. } => "leave_room",
            Self::SendMessage(_) => "send_message",
            Self::NewMessage { .. } => "new_message",
            Self::MarkRead { .. } => "mark_read",
            Self::MessageRead(_) => "message_read",
            Self::Typing { .. } => "typing",
            Self::StopTyping { .. } => "stop_typing",
            Self::UserTyping { .. } => "user_typing",
            Self::UserStopTyping { .. } => "user_stop_typing",
            Self::UserOnline { .. } => "user_online",
            Self::UserOffline { .. } => "user_offline",
            Self::PresenceQuery { .. } => "presence_query",
            Self::PresenceState(_) => "presence_state",
            Self::CallStart(_) => "call_start",
            Self::CallAccept { .. } => "call_accept",
            Self::CallReject { .. } => "call_reject",
            Self::CallEnd { .. } => "call_end",
            Self::IncomingCall(_) => "incoming_call",
            Self::CallRinging(_) => "call_ringing",
            Self::CallAccepted { .. } => "call_accepted",
            Self::CallJoined(_) => "call_joined",
            Self::CallRejected { .. } => "call_rejected",
            Self::CallEnded(_) => "call_ended",
            Self::WebrtcOffer(_) => "webrtc_offer",
            Self::WebrtcAnswer(_) => "webrtc_answer",
            Self::WebrtcIceCandidate(_) => "webrtc_ice_candidate",
            Self::WebrtcOfferReceived(_) => "webrtc_offer_received",
            Self::WebrtcAnswerReceived(_) => "webrtc_answer_received",
            Self::WebrtcIceCandidateReceived(_) => "webrtc_ice_candidate_received",
            Self::MediaState(_) => "media_state",
            Self::MediaStateChanged(_) => "media_state_changed",
            Self::Ping(_) => "ping",
            Self::Pong(_) => "pong",
            Self::Ok => "ok",
            Self::Error(_) => "error",
        }
    }
}

/// Standardisierte Fehler-Antwort
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Signal-Frame (Umschlag fuer alle Nachrichten)
// ---------------------------------------------------------------------------

/// Signal-Nachricht mit Request/Response-Zuordnung
///
/// Jede Client-Nachricht traegt eine `request_id` die der Client vergibt.
/// Der Server kopiert die ID in die Antwort damit der Client
/// Request und Response zuordnen kann.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalMessage {
    /// Nachrichten-ID fuer Request/Response-Zuordnung (0 = Server-Push)
    pub request_id: u32,
    /// Inhalt der Nachricht
    pub payload: SignalPayload,
}

impl SignalMessage {
    /// Erstellt eine neue Signal-Nachricht
    pub fn new(request_id: u32, payload: SignalPayload) -> Self {
        Self {
            request_id,
            payload,
        }
    }

    /// Erstellt eine Server-Push-Nachricht (`request_id = 0`)
    pub fn push(payload: SignalPayload) -> Self {
        Self::new(0, payload)
    }

    /// Erstellt eine leere Quittung
    pub fn ok(request_id: u32) -> Self {
        Self::new(request_id, SignalPayload::Ok)
    }

    /// Erstellt eine Ping-Nachricht
    pub fn ping(request_id: u32, timestamp_ms: u64) -> Self {
        Self::new(request_id, SignalPayload::Ping(PingMessage { timestamp_ms }))
    }

    /// Erstellt eine Pong-Antwort
    pub fn pong(request_id: u32, echo_timestamp_ms: u64, server_timestamp_ms: u64) -> Self {
        Self::new(
            request_id,
            SignalPayload::Pong(PongMessage {
                echo_timestamp_ms,
                server_timestamp_ms,
            }),
        )
    }

    /// Erstellt eine Fehler-Antwort
    pub fn error(request_id: u32, code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(
            request_id,
            SignalPayload::Error(ErrorResponse {
                code,
                message: message.into(),
            }),
        )
    }

    /// Serialisiert die Nachricht als JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Deserialisiert eine Nachricht aus JSON
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
