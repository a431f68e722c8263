//! Gemeinsamer Server-Zustand fuer den Signaling-Service
//!
//! Haelt alle Zustands-Manager und die externen Schnittstellen als
//! Arc-Referenzen, die sicher zwischen tokio-Tasks geteilt werden koennen.

use parley_auth::AuthProvider;
use parley_store::{ConversationStore, MessageStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::broadcast::EventRouter;
use crate::call::CallCoordinator;
use crate::messages::MessageRelay;
use crate::presence::PresenceTracker;
use crate::rooms::RoomIndex;
use crate::session::SessionRegistry;
use crate::typing::TypingCoordinator;

/// Wer `user_online` / `user_offline` eines Benutzers erhaelt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresencePublikum {
    /// Jede authentifizierte Verbindung
    #[default]
    AllAuthenticated,
    /// Nur Verbindungen in Raeumen, an deren Konversation der Benutzer teilnimmt
    SharedConversations,
}

/// Konfiguration fuer den Signaling-Service
#[derive(Debug, Clone)]
pub struct SignalingConfig {
    /// Anzeigename des Servers
    pub server_name: String,
    /// Maximale gleichzeitige Verbindungen
    pub max_verbindungen: usize,
    /// Keepalive-Intervall in Sekunden
    pub keepalive_sek: u64,
    /// Timeout fuer inaktive Verbindungen in Sekunden
    pub verbindungs_timeout_sek: u64,
    /// Zeitlimit fuer Aufrufe an externe Stores und den Identity-Provider
    pub store_timeout_ms: u64,
    /// Tipp-Eintraege verfallen nach dieser Zeit ohne Erneuerung (0 = nie)
    pub tipp_timeout_ms: u64,
    /// Unbeantwortete Einladungen gelten danach als abgelehnt (0 = nie)
    pub klingel_timeout_sek: u64,
    pub presence_publikum: PresencePublikum,
    /// Groesse der Send-Queue pro Verbindung
    pub send_queue_groesse: usize,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            server_name: "Parley Server".to_string(),
            max_verbindungen: 1024,
            keepalive_sek: 30,
            verbindungs_timeout_sek: 90,
            store_timeout_ms: 5000,
            tipp_timeout_ms: 5000,
            klingel_timeout_sek: 45,
            presence_publikum: PresencePublikum::AllAuthenticated,
            send_queue_groesse: 64,
        }
    }
}

impl SignalingConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn tipp_timeout(&self) -> Option<Duration> {
        (self.tipp_timeout_ms > 0).then(|| Duration::from_millis(self.tipp_timeout_ms))
    }

    pub fn klingel_timeout(&self) -> Option<Duration> {
        (self.klingel_timeout_sek > 0).then(|| Duration::from_secs(self.klingel_timeout_sek))
    }
}

/// Gemeinsamer Server-Zustand (thread-safe, Arc-geteilt)
///
/// Alle Manager teilen ihren inneren Zustand ueber Arc; Clone eines
/// Managers gibt eine Referenz auf denselben Zustand.
pub struct SignalingState {
    /// Server-Konfiguration
    pub config: Arc<SignalingConfig>,
    /// Verbindung <-> Benutzer
    pub sitzungen: SessionRegistry,
    /// Raum-Mitgliedschaften
    pub raeume: RoomIndex,
    /// Send-Queues und Fan-out
    pub router: EventRouter,
    /// Online/Offline-Meldungen
    pub presence: PresenceTracker,
    /// Tipp-Indikatoren
    pub tippen: TypingCoordinator,
    /// Live-Nachrichten und Lesebestaetigungen
    pub nachrichten: MessageRelay,
    /// Anruf-Sessions und Peer-Links
    pub anrufe: CallCoordinator,
    /// Teilnehmer-Abfragen (Beitritt, Anruf)
    pub konversationen: Arc<dyn ConversationStore>,
    /// Startzeitpunkt des Servers (fuer Uptime-Berechnung)
    pub start_time: Instant,
}

impl SignalingState {
    /// Erstellt einen neuen SignalingState
    pub fn neu(
        config: SignalingConfig,
        auth: Arc<dyn AuthProvider>,
        nachrichten_store: Arc<dyn MessageStore>,
        konversationen: Arc<dyn ConversationStore>,
    ) -> Arc<Self> {
        let store_timeout = config.store_timeout();

        let sitzungen = SessionRegistry::neu(auth, store_timeout);
        let raeume = RoomIndex::neu();
        let router = EventRouter::neu(raeume.clone(), sitzungen.clone(), config.send_queue_groesse);
        let presence = PresenceTracker::neu(
            config.presence_publikum,
            sitzungen.clone(),
            raeume.clone(),
            router.clone(),
            Arc::clone(&konversationen),
            store_timeout,
        );
        let tippen = TypingCoordinator::neu(router.clone(), config.tipp_timeout());
        let nachrichten = MessageRelay::neu(
            nachrichten_store,
            Arc::clone(&konversationen),
            router.clone(),
            store_timeout,
        );
        let anrufe = CallCoordinator::neu(
            sitzungen.clone(),
            router.clone(),
            Arc::clone(&konversationen),
            store_timeout,
            config.klingel_timeout(),
        );

        Arc::new(Self {
            config: Arc::new(config),
            sitzungen,
            raeume,
            router,
            presence,
            tippen,
            nachrichten,
            anrufe,
            konversationen,
            start_time: Instant::now(),
        })
    }

    /// Gibt die Uptime in Sekunden zurueck
    pub fn uptime_sek(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
