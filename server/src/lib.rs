//! parley-server – Bibliotheks-Root
//!
//! Verdrahtet Identity-Provider, Store und Signaling-Service und startet
//! TCP-Listener, WebSocket-Endpunkt und Wartungs-Task.

pub mod config;

use anyhow::{Context, Result};
use config::ServerConfig;
use parley_auth::JwtAuthProvider;
use parley_signaling::{SignalingServer, SignalingState};
use parley_store::InMemoryStore;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Baut den Signaling-Zustand aus der Konfiguration
    ///
    /// Nachrichten und Konversationen liegen im Speicher des Prozesses.
    pub fn state_erstellen(&self) -> Result<Arc<SignalingState>> {
        let auth = JwtAuthProvider::mit_algorithmus(
            &self.config.auth.jwt_secret,
            &self.config.auth.jwt_algorithmus,
        )
        .context("Identity-Provider konnte nicht erstellt werden")?;
        let store = Arc::new(InMemoryStore::neu());

        Ok(SignalingState::neu(
            self.config.signaling_config(),
            Arc::new(auth),
            store.clone(),
            store,
        ))
    }

    /// Startet alle Subsysteme und laeuft bis Ctrl-C
    pub async fn starten(self) -> Result<()> {
        self.laufen_bis(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(fehler = %e, "Ctrl-C-Handler nicht verfuegbar");
            }
        })
        .await
    }

    /// Startet alle Subsysteme und laeuft bis `signal` fertig ist
    ///
    /// Reihenfolge:
    /// 1. Signaling-Zustand aufbauen
    /// 2. TCP-Listener starten
    /// 3. WebSocket-Endpunkt starten
    /// 4. Wartungs-Task starten
    /// 5. Auf das Shutdown-Signal warten, dann alle Tasks beenden
    pub async fn laufen_bis(self, signal: impl Future<Output = ()>) -> Result<()> {
        let tcp_addr: SocketAddr = self
            .config
            .tcp_bind_adresse()
            .parse()
            .context("Ungueltige TCP-Bind-Adresse")?;
        let ws_addr: SocketAddr = self
            .config
            .ws_bind_adresse()
            .parse()
            .context("Ungueltige WebSocket-Bind-Adresse")?;

        tracing::info!(
            server_name = %self.config.server.name,
            tcp = %tcp_addr,
            ws = %ws_addr,
            "Server startet"
        );

        let state = self.state_erstellen()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let tcp = tokio::spawn(
            SignalingServer::neu(Arc::clone(&state), tcp_addr).starten(shutdown_rx.clone()),
        );
        let ws = tokio::spawn(parley_signaling::ws_starten(
            Arc::clone(&state),
            ws_addr,
            shutdown_rx.clone(),
        ));
        let wartung = parley_signaling::wartung_starten(Arc::clone(&state), shutdown_rx);

        tracing::info!("Server laeuft. Warte auf Shutdown-Signal (Ctrl-C)...");
        signal.await;
        tracing::info!("Shutdown-Signal empfangen, Server wird beendet");

        // Fehler beim Senden heisst: alle Empfaenger sind schon weg
        let _ = shutdown_tx.send(true);

        for (name, handle) in [("tcp", tcp), ("ws", ws)] {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(listener = name, fehler = %e, "Listener-Fehler"),
                Err(e) => tracing::error!(listener = name, fehler = %e, "Listener-Task abgebrochen"),
            }
        }
        if let Err(e) = wartung.await {
            tracing::error!(fehler = %e, "Wartungs-Task abgebrochen");
        }

        tracing::info!(
            uptime_sek = state.uptime_sek(),
            "Server beendet"
        );
        Ok(())
    }
}
