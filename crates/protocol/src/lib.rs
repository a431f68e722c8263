//! parley-protocol – Protokoll-Definitionen
//!
//! Dieses Crate definiert alle Nachrichtentypen die zwischen Client und
//! Server ausgetauscht werden, sowie das Frame-Format fuer TCP.

pub mod signal;
pub mod wire;

pub use signal::{
    AuthenticateRequest, AuthenticatedResponse, CallEndedEvent, CallJoinedResponse, CallKind,
    CallRingingResponse, CallStartRequest, ErrorCode, ErrorResponse, IncomingCallEvent,
    MediaStateChangedEvent, MediaStateRequest, MessageReadEvent, PingMessage, PongMessage,
    PresenceStateResponse, SendMessageRequest, SignalMessage, SignalPayload, WebRtcInbound,
    WebRtcOutbound,
};
pub use wire::FrameCodec;
