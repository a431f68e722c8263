//! Fehlertypen fuer die Token-Pruefung

use thiserror::Error;

/// Alle moeglichen Fehler bei der Token-Pruefung
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Token ungueltig")]
    TokenUngueltig,

    #[error("Token abgelaufen")]
    TokenAbgelaufen,

    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    #[error("Interner Fehler: {0}")]
    Intern(String),
}

impl AuthError {
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// `true` wenn das Credential selbst abgelehnt wurde
    /// (im Gegensatz zu einem Fehler des Providers)
    pub fn ist_credential_fehler(&self) -> bool {
        matches!(self, Self::TokenUngueltig | Self::TokenAbgelaufen)
    }
}

/// Result-Alias fuer die Token-Pruefung
pub type AuthResult<T> = Result<T, AuthError>;
