//! Provider-Trait fuer die Aufloesung von Bearer-Credentials
//!
//! Der Signaling-Layer kennt nur diesen Trait. Welche Art Token dahinter
//! steckt (JWT, Session-Tabelle, externer Dienst) bleibt verborgen.

use async_trait::async_trait;
use parking_lot::RwLock;
use parley_core::UserId;
use std::collections::HashMap;

use crate::error::{AuthError, AuthResult};

/// Loest ein Bearer-Credential zu einer UserId auf
#[async_trait]
pub trait AuthProvider: Send + Sync + 'static {
    /// Prueft das Credential und gibt den zugehoerigen Benutzer zurueck
    async fn benutzer_aufloesen(&self, token: &str) -> AuthResult<UserId>;
}

/// Feste Token-Tabelle (Tests, lokale Entwicklung)
#[derive(Debug, Default)]
pub struct StaticTokenProvider {
    tokens: RwLock<HashMap<String, UserId>>,
}

impl StaticTokenProvider {
    /// Erstellt eine leere Token-Tabelle
    pub fn neu() -> Self {
        Self::default()
    }

    /// Traegt ein Token fuer einen Benutzer ein
    pub fn token_eintragen(&self, token: impl Into<String>, user_id: UserId) {
        self.tokens.write().insert(token.into(), user_id);
    }

    /// Entfernt ein Token (z.B. nach Widerruf)
    pub fn token_entfernen(&self, token: &str) -> bool {
        self.tokens.write().remove(token).is_some()
    }
}

#[async_trait]
impl AuthProvider for StaticTokenProvider {
    async fn benutzer_aufloesen(&self, token: &str) -> AuthResult<UserId> {
        self.tokens
            .read()
            .get(token)
            .copied()
            .ok_or(AuthError::TokenUngueltig)
    }
}
