//! Fehlertypen fuer den Signaling-Service

use parley_auth::AuthError;
use parley_core::ConnectionId;
use parley_protocol::ErrorCode;
use parley_store::{StoreError, StoreResult};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Fehlertyp fuer den Signaling-Service
///
/// Jeder Fehler betrifft genau eine Anfrage einer Verbindung und wird
/// nur an diese zurueckgemeldet.
#[derive(Debug, Error)]
pub enum SignalingError {
    /// Aktion vor `authenticate`
    #[error("Nicht authentifiziert – bitte zuerst authentifizieren")]
    NichtAuthentifiziert,

    /// Zweites `authenticate` auf derselben Verbindung
    #[error("Verbindung ist bereits authentifiziert")]
    BereitsAuthentifiziert,

    /// Credential vom Provider abgelehnt
    #[error("Ungueltige Anmeldedaten")]
    UngueltigeAnmeldedaten,

    /// Fuer die Konversation laeuft bereits ein Anruf
    #[error("In dieser Konversation laeuft bereits ein Anruf")]
    BereitsImAnruf,

    /// Session, Ziel oder Ressource nicht auffindbar
    #[error("Nicht gefunden: {0}")]
    NichtGefunden(String),

    /// Externer Store hat die Aktion abgelehnt oder ist ausgefallen
    #[error("Persistenz fehlgeschlagen: {0}")]
    Persistenz(String),

    /// Externer Aufruf hat das Zeitlimit ueberschritten
    #[error("Zeitlimit ueberschritten: {0}")]
    Zeitlimit(String),

    /// Anfrage ist formal gueltig, aber im aktuellen Zustand unsinnig
    #[error("Ungueltige Anfrage: {0}")]
    UngueltigeAnfrage(String),

    /// Send-Queue des Empfaengers reicht fuer eine Aushandlung nicht aus
    #[error("Empfaenger {0} ist ueberlastet")]
    EmpfaengerUeberlastet(ConnectionId),

    /// Verbindungslimit erreicht
    #[error("Server ist voll")]
    ServerVoll,

    /// IO-Fehler (TCP, Socket)
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    /// Senden an Client fehlgeschlagen (Queue geschlossen)
    #[error("Senden fehlgeschlagen")]
    SendFehler,

    /// Interner Fehler
    #[error("Interner Fehler: {0}")]
    Intern(String),
}

impl SignalingError {
    /// Erstellt einen internen Fehler
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Erstellt einen NotFound-Fehler
    pub fn nicht_gefunden(msg: impl Into<String>) -> Self {
        Self::NichtGefunden(msg.into())
    }

    /// Erstellt einen Fehler fuer eine ungueltige Anfrage
    pub fn ungueltig(msg: impl Into<String>) -> Self {
        Self::UngueltigeAnfrage(msg.into())
    }

    /// Wire-Code fuer die Error-Antwort an den Client
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NichtAuthentifiziert => ErrorCode::Unauthenticated,
            Self::BereitsAuthentifiziert => ErrorCode::AlreadyAuthenticated,
            Self::UngueltigeAnmeldedaten => ErrorCode::InvalidCredential,
            Self::BereitsImAnruf => ErrorCode::AlreadyInCall,
            Self::NichtGefunden(_) => ErrorCode::NotFound,
            Self::Persistenz(_) | Self::Zeitlimit(_) => ErrorCode::PersistenceFailure,
            Self::UngueltigeAnfrage(_) => ErrorCode::InvalidRequest,
            Self::EmpfaengerUeberlastet(_) => ErrorCode::RecipientBusy,
            Self::ServerVoll => ErrorCode::ServerFull,
            Self::Io(_) | Self::SendFehler | Self::Intern(_) => ErrorCode::InternalError,
        }
    }
}

impl From<AuthError> for SignalingError {
    fn from(e: AuthError) -> Self {
        if e.ist_credential_fehler() {
            Self::UngueltigeAnmeldedaten
        } else {
            Self::Intern(e.to_string())
        }
    }
}

impl From<StoreError> for SignalingError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NichtGefunden(msg) => Self::NichtGefunden(msg),
            StoreError::UngueltigeEingabe(msg) => Self::UngueltigeAnfrage(msg),
            StoreError::Backend(msg) => Self::Persistenz(msg),
        }
    }
}

/// Result-Typ fuer den Signaling-Service
pub type SignalingResult<T> = Result<T, SignalingError>;

/// Fuehrt einen Store-Aufruf mit Zeitlimit aus
///
/// Laeuft das Zeitlimit ab, wird der Aufruf abgebrochen und die Aktion
/// schlaegt mit `Zeitlimit` fehl. Es bleibt kein halber Zustand zurueck,
/// weil Aufrufer erst nach erfolgreichem Store-Ergebnis Zustand aendern.
pub(crate) async fn store_aufruf<T, F>(dauer: Duration, was: &str, fut: F) -> SignalingResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(dauer, fut).await {
        Ok(ergebnis) => ergebnis.map_err(SignalingError::from),
        Err(_) => {
            tracing::warn!(aufruf = was, zeitlimit_ms = dauer.as_millis() as u64, "Store-Aufruf abgebrochen");
            Err(SignalingError::Zeitlimit(was.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_entsprechen_taxonomie() {
        assert_eq!(SignalingError::NichtAuthentifiziert.code(), ErrorCode::Unauthenticated);
        assert_eq!(SignalingError::BereitsImAnruf.code(), ErrorCode::AlreadyInCall);
        assert_eq!(
            SignalingError::EmpfaengerUeberlastet(ConnectionId::naechste()).code(),
            ErrorCode::RecipientBusy
        );
        assert_eq!(SignalingError::nicht_gefunden("x").code(), ErrorCode::NotFound);
        assert_eq!(
            SignalingError::Zeitlimit("x".into()).code(),
            ErrorCode::PersistenceFailure
        );
    }

    #[test]
    fn auth_fehler_abbildung() {
        assert!(matches!(
            SignalingError::from(AuthError::TokenAbgelaufen),
            SignalingError::UngueltigeAnmeldedaten
        ));
        assert!(matches!(
            SignalingError::from(AuthError::intern("kaputt")),
            SignalingError::Intern(_)
        ));
    }

    #[test]
    fn store_fehler_abbildung() {
        assert_eq!(
            SignalingError::from(StoreError::backend("weg")).code(),
            ErrorCode::PersistenceFailure
        );
        assert_eq!(
            SignalingError::from(StoreError::nicht_gefunden("m")).code(),
            ErrorCode::NotFound
        );
    }

    #[tokio::test(start_paused = true)]
    async fn store_aufruf_zeitlimit() {
        let ergebnis: SignalingResult<()> = store_aufruf(Duration::from_millis(50), "test", async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;
        assert!(matches!(ergebnis, Err(SignalingError::Zeitlimit(_))));
    }
}
