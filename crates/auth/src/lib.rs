//! parley-auth – Anbindung an den Identity-Provider
//!
//! Dieses Crate implementiert:
//! - `AuthProvider`-Trait: Bearer-Credential -> UserId
//! - `JwtAuthProvider`: HS256-signierte Tokens mit `user_id`-Claim
//! - `StaticTokenProvider`: feste Token-Tabelle fuer Tests und Entwicklung
//!
//! Die Ausstellung von Credentials gehoert nicht zu diesem Crate; der
//! Signaling-Layer ruft den Provider genau einmal pro Verbindung auf.

pub mod error;
pub mod jwt;
pub mod provider;

// Bequeme Re-Exporte
pub use error::{AuthError, AuthResult};
pub use jwt::JwtAuthProvider;
pub use provider::{AuthProvider, StaticTokenProvider};
