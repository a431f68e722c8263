//! Fehlertypen fuer Parley
//!
//! Zentraler Fehler-Enum fuer crate-uebergreifende Fehlerzustaende.
//! Untermodule definieren eigene Fehler und konvertieren via `#[from]`.

use thiserror::Error;

/// Globaler Result-Alias fuer Parley
pub type Result<T> = std::result::Result<T, ParleyError>;

/// Crate-uebergreifende Fehler
#[derive(Debug, Error)]
pub enum ParleyError {
    #[error("Zeitlimit ueberschritten: {0}")]
    Zeitlimit(String),

    #[error("Ungueltige Nachricht: {0}")]
    UngueltigeNachricht(String),

    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    #[error("Interner Fehler: {0}")]
    Intern(String),
}

impl ParleyError {
    /// Erstellt einen internen Fehler aus einer beliebigen Nachricht
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Gibt true zurueck wenn der Fehler wiederholbar sein koennte
    pub fn ist_wiederholbar(&self) -> bool {
        matches!(self, Self::Zeitlimit(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fehler_anzeige() {
        let e = ParleyError::Konfiguration("jwt_secret fehlt".into());
        assert_eq!(e.to_string(), "Konfigurationsfehler: jwt_secret fehlt");
    }

    #[test]
    fn wiederholbar_erkennung() {
        assert!(ParleyError::Zeitlimit("store".into()).ist_wiederholbar());
        assert!(!ParleyError::intern("kaputt").ist_wiederholbar());
    }
}
