//! Periodische Wartung: abgelaufene Tipp-Indikatoren und Klingel-Timeouts

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::server_state::SignalingState;

/// Abstand zwischen zwei Wartungslaeufen
pub const WARTUNGS_INTERVALL: Duration = Duration::from_secs(1);

/// Ein einzelner Wartungslauf
///
/// Gibt (beendete Tipp-Indikatoren, abgelaufene Einladungen) zurueck.
pub fn wartung_ausfuehren(state: &SignalingState, jetzt: Instant) -> (usize, usize) {
    let tippen = state.tippen.abgelaufene_entfernen(jetzt);
    let einladungen = state.anrufe.klingel_timeouts_pruefen(jetzt);
    if tippen > 0 || einladungen > 0 {
        tracing::debug!(tippen, einladungen, "Wartungslauf");
    }
    (tippen, einladungen)
}

/// Startet den Wartungs-Task
///
/// Laeuft bis `shutdown_rx` ein `true`-Signal empfaengt.
pub fn wartung_starten(
    state: Arc<SignalingState>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(WARTUNGS_INTERVALL);
        ticker.tick().await; // Ersten Tick ueberspringen

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    wartung_ausfuehren(&state, Instant::now());
                }
                ergebnis = shutdown_rx.changed() => {
                    if ergebnis.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("Wartungs-Task beendet");
    })
}
