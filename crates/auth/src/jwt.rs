//! JWT-basierter Identity-Provider
//!
//! Das Backend stellt HS256-signierte Tokens mit einem `user_id`-Claim
//! und 24 Stunden Gueltigkeit aus. Hier wird nur geprueft.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use parley_core::UserId;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{AuthError, AuthResult};
use crate::provider::AuthProvider;

/// Standard-Gueltigkeit ausgestellter Tokens: 24 Stunden
pub const TOKEN_GUELTIGKEIT_STUNDEN: i64 = 24;

/// Claims eines Zugriffs-Tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Claims {
    user_id: Uuid,
    /// Ablaufzeit (Unix-Timestamp in Sekunden)
    exp: i64,
}

/// Prueft Bearer-Tokens gegen ein gemeinsames Geheimnis
pub struct JwtAuthProvider {
    algorithmus: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtAuthProvider {
    /// Erstellt einen Provider fuer HS256
    pub fn neu(secret: &str) -> AuthResult<Self> {
        Self::mit_algorithmus(secret, "HS256")
    }

    /// Erstellt einen Provider mit konfiguriertem HMAC-Algorithmus
    ///
    /// Erlaubt sind `HS256`, `HS384` und `HS512`.
    pub fn mit_algorithmus(secret: &str, algorithmus: &str) -> AuthResult<Self> {
        if secret.is_empty() {
            return Err(AuthError::Konfiguration("JWT-Secret darf nicht leer sein".into()));
        }

        let algorithmus = Algorithm::from_str(algorithmus).map_err(|_| {
            AuthError::Konfiguration(format!("Unbekannter JWT-Algorithmus: {algorithmus}"))
        })?;
        if !matches!(algorithmus, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return Err(AuthError::Konfiguration(format!(
                "Nur HMAC-Algorithmen werden unterstuetzt, erhalten: {algorithmus:?}"
            )));
        }

        Ok(Self {
            algorithmus,
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(algorithmus),
        })
    }

    /// Stellt ein Token aus (fuer Tests und Entwicklungs-Tools)
    pub fn token_ausstellen(&self, user_id: UserId, gueltigkeit: Duration) -> AuthResult<String> {
        let claims = Claims {
            user_id: user_id.inner(),
            exp: (Utc::now() + gueltigkeit).timestamp(),
        };
        encode(&Header::new(self.algorithmus), &claims, &self.encoding_key)
            .map_err(|e| AuthError::intern(format!("Token-Erstellung fehlgeschlagen: {e}")))
    }

    /// Prueft ein Token synchron
    pub fn token_pruefen(&self, token: &str) -> AuthResult<UserId> {
        match decode::<Claims>(token, &self.decoding_key, &self.validation) {
            Ok(daten) => Ok(UserId(daten.claims.user_id)),
            Err(e) => match e.kind() {
                ErrorKind::ExpiredSignature => Err(AuthError::TokenAbgelaufen),
                _ => {
                    tracing::debug!(fehler = %e, "Token-Pruefung fehlgeschlagen");
                    Err(AuthError::TokenUngueltig)
                }
            },
        }
    }
}

#[async_trait]
impl AuthProvider for JwtAuthProvider {
    async fn benutzer_aufloesen(&self, token: &str) -> AuthResult<UserId> {
        self.token_pruefen(token)
    }
}
