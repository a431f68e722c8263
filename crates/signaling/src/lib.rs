//! parley-signaling – Echtzeit-Event-Kanal und Anruf-Signalisierung
//!
//! Dieser Crate verwaltet persistente Client-Verbindungen (TCP und
//! WebSocket), bindet sie an authentifizierte Benutzer, verteilt Chat-
//! Ereignisse an Konversations-Raeume und koordiniert Mehrparteien-Anrufe
//! (Vollvermaschung aus Peer-Links, SDP/ICE-Weiterleitung).
//!
//! ## Architektur
//!
//! ```text
//! SignalingServer (TCP)      ws_router (axum, GET /ws)
//!         \                      /
//!          v                    v
//!     ClientConnection (pro Verbindung ein Task)
//!         |  Lesen -> Dispatch -> Antwort, Send-Queue leeren, Keepalive
//!         v
//!     MessageDispatcher
//!         |
//!         +-- AuthHandler  (Authenticate, Logout)
//!         +-- RoomHandler  (JoinRoom, LeaveRoom, PresenceQuery)
//!         +-- ChatHandler  (SendMessage, MarkRead, Typing, StopTyping)
//!         +-- CallHandler  (Start, Accept, Reject, End, Offer/Answer/ICE, MediaState)
//!
//! SessionRegistry    – Verbindung <-> Benutzer, Presence-Kanten
//! RoomIndex          – Verbindung <-> Raum
//! EventRouter        – Send-Queues, Fan-out an Raum/Benutzer/Verbindung
//! PresenceTracker    – user_online / user_offline
//! TypingCoordinator  – Tipp-Indikatoren mit Ablauf
//! MessageRelay       – Persistieren, dann verteilen
//! CallCoordinator    – Anruf-Sessions, Peer-Links, ICE-Pufferung
//! ```

pub mod broadcast;
pub mod call;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod messages;
pub mod presence;
pub mod rooms;
pub mod server_state;
pub mod session;
pub mod tcp;
pub mod typing;
pub mod wartung;
pub mod ws;

// Bequeme Re-Exporte
pub use broadcast::EventRouter;
pub use call::{AnrufZustand, CallCoordinator, LinkZustand};
pub use connection::{ClientConnection, SignalTransport};
pub use dispatcher::{DispatcherContext, MessageDispatcher};
pub use error::{SignalingError, SignalingResult};
pub use messages::MessageRelay;
pub use presence::PresenceTracker;
pub use rooms::RoomIndex;
pub use server_state::{PresencePublikum, SignalingConfig, SignalingState};
pub use session::{PresenceKante, SessionRegistry};
pub use tcp::SignalingServer;
pub use typing::TypingCoordinator;
pub use wartung::wartung_starten;
pub use ws::{ws_router, ws_starten};
