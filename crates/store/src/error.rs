//! Fehlertypen fuer die Store-Schnittstellen

use thiserror::Error;

/// Fehler eines externen Stores
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Nicht gefunden: {0}")]
    NichtGefunden(String),

    #[error("Ungueltige Eingabe: {0}")]
    UngueltigeEingabe(String),

    #[error("Backend-Fehler: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn nicht_gefunden(msg: impl Into<String>) -> Self {
        Self::NichtGefunden(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

/// Result-Alias fuer Store-Operationen
pub type StoreResult<T> = Result<T, StoreError>;
