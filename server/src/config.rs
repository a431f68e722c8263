//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte; nur `[auth] jwt_secret` muss gesetzt sein
//! (alternativ ueber `PARLEY_JWT_SECRET`).

use parley_core::ParleyError;
use parley_signaling::{PresencePublikum, SignalingConfig};
use serde::{Deserialize, Serialize};

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Allgemeine Server-Einstellungen
    pub server: ServerEinstellungen,
    /// Netzwerk-Einstellungen
    pub netzwerk: NetzwerkEinstellungen,
    /// Zeitlimits und Verteilungsregeln des Event-Kanals
    pub signaling: SignalingEinstellungen,
    /// Token-Pruefung
    pub auth: AuthEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
}

/// Allgemeine Server-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEinstellungen {
    /// Anzeigename des Servers
    pub name: String,
    /// Maximale Anzahl gleichzeitiger Verbindungen (TCP + WebSocket)
    pub max_verbindungen: usize,
}

impl Default for ServerEinstellungen {
    fn default() -> Self {
        Self {
            name: "Parley Server".into(),
            max_verbindungen: 1024,
        }
    }
}

/// Netzwerk-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    /// Bind-Adresse fuer alle Listener
    pub bind_adresse: String,
    /// Port fuer den laengen-praefixierten TCP-Kanal
    pub tcp_port: u16,
    /// Port fuer WebSocket (`/ws`) und Health-Check (`/health`)
    pub ws_port: u16,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".into(),
            tcp_port: 7400,
            ws_port: 7401,
        }
    }
}

/// Event-Kanal und Anruf-Signalisierung
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingEinstellungen {
    pub keepalive_sek: u64,
    pub verbindungs_timeout_sek: u64,
    /// Zeitlimit fuer Store- und Identity-Provider-Aufrufe
    pub store_timeout_ms: u64,
    /// 0 = Tipp-Indikatoren verfallen nicht serverseitig
    pub tipp_timeout_ms: u64,
    /// 0 = kein Klingel-Timeout
    pub klingel_timeout_sek: u64,
    pub presence_publikum: PresencePublikum,
    pub send_queue_groesse: usize,
}

impl Default for SignalingEinstellungen {
    fn default() -> Self {
        Self {
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

/// Token-Pruefung
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthEinstellungen {
    /// Gemeinsames Geheimnis mit dem Token-Aussteller
    pub jwt_secret: String,
    /// HS256, HS384 oder HS512
    pub jwt_algorithmus: String,
}

impl Default for AuthEinstellungen {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            jwt_algorithmus: "HS256".into(),
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        let mut config = match std::fs::read_to_string(pfad) {
            Ok(inhalt) => toml::from_str(&inhalt)
                .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Self::default()
            }
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
                ))
            }
        };

        config.umgebung_anwenden(|name| std::env::var(name).ok());
        config.pruefen()?;
        Ok(config)
    }

    /// Uebernimmt Overrides aus der Umgebung
    pub fn umgebung_anwenden(&mut self, lesen: impl Fn(&str) -> Option<String>) {
        if let Some(secret) = lesen("PARLEY_JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        if let Some(level) = lesen("PARLEY_LOG") {
            self.logging.level = level;
        }
        if let Some(format) = lesen("PARLEY_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Prueft die Konfiguration auf Widersprueche
    pub fn pruefen(&self) -> Result<(), ParleyError> {
        if self.auth.jwt_secret.is_empty() {
            return Err(ParleyError::Konfiguration(
                "[auth] jwt_secret fehlt (oder PARLEY_JWT_SECRET setzen)".into(),
            ));
        }
        if self.netzwerk.tcp_port != 0 && self.netzwerk.tcp_port == self.netzwerk.ws_port {
            return Err(ParleyError::Konfiguration(format!(
                "tcp_port und ws_port duerfen nicht gleich sein ({})",
                self.netzwerk.tcp_port
            )));
        }
        if self.server.max_verbindungen == 0 {
            return Err(ParleyError::Konfiguration(
                "max_verbindungen muss groesser 0 sein".into(),
            ));
        }
        if self.signaling.send_queue_groesse == 0 {
            return Err(ParleyError::Konfiguration(
                "send_queue_groesse muss groesser 0 sein".into(),
            ));
        }
        if self.signaling.verbindungs_timeout_sek <= self.signaling.keepalive_sek {
            return Err(ParleyError::Konfiguration(format!(
                "verbindungs_timeout_sek ({}) muss groesser als keepalive_sek ({}) sein",
                self.signaling.verbindungs_timeout_sek, self.signaling.keepalive_sek
            )));
        }
        if !matches!(self.logging.format.as_str(), "text" | "json") {
            return Err(ParleyError::Konfiguration(format!(
                "Unbekanntes Log-Format: {}",
                self.logging.format
            )));
        }
        Ok(())
    }

    /// Gibt die vollstaendige Bind-Adresse fuer TCP zurueck
    pub fn tcp_bind_adresse(&self) -> String {
        format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.tcp_port)
    }

    /// Gibt die vollstaendige Bind-Adresse fuer WebSocket zurueck
    pub fn ws_bind_adresse(&self) -> String {
        format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.ws_port)
    }

    /// Konfiguration fuer den Signaling-Service
    pub fn signaling_config(&self) -> SignalingConfig {
        let s = &self.signaling;
        SignalingConfig {
            server_name: self.server.name.clone(),
            max_verbindungen: self.server.max_verbindungen,
            keepalive_sek: s.keepalive_sek,
            verbindungs_timeout_sek: s.verbindungs_timeout_sek,
            store_timeout_ms: s.store_timeout_ms,
            tipp_timeout_ms: s.tipp_timeout_ms,
            klingel_timeout_sek: s.klingel_timeout_sek,
            presence_publikum: s.presence_publikum,
            send_queue_groesse: s.send_queue_groesse,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mit_secret() -> ServerConfig {
        let mut cfg = ServerConfig::default();
        cfg.auth.jwt_secret = "geheim".into();
        cfg
    }

    #[test]
    fn standardwerte() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.server.max_verbindungen, 1024);
        assert_eq!(cfg.netzwerk.tcp_port, 7400);
        assert_eq!(cfg.netzwerk.ws_port, 7401);
        assert_eq!(cfg.signaling.klingel_timeout_sek, 45);
        assert_eq!(cfg.auth.jwt_algorithmus, "HS256");
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn bind_adressen() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.tcp_bind_adresse(), "0.0.0.0:7400");
        assert_eq!(cfg.ws_bind_adresse(), "0.0.0.0:7401");
    }

    #[test]
    fn config_aus_toml_string() {
        let toml = r#"
            [server]
            name = "Mein Server"

            [signaling]
            presence_publikum = "shared_conversations"
            klingel_timeout_sek = 0

            [auth]
            jwt_secret = "s3cr3t"
        "#;
        let cfg: ServerConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.server.name, "Mein Server");
        assert_eq!(
            cfg.signaling.presence_publikum,
            PresencePublikum::SharedConversations
        );
        // Nicht angegebene Felder behalten Standardwerte
        assert_eq!(cfg.signaling.keepalive_sek, 30);
        assert!(cfg.pruefen().is_ok());

        let sc = cfg.signaling_config();
        assert_eq!(sc.server_name, "Mein Server");
        assert!(sc.klingel_timeout().is_none());
    }

    #[test]
    fn fehlendes_secret_abgelehnt() {
        let err = ServerConfig::default().pruefen().unwrap_err();
        assert!(matches!(err, ParleyError::Konfiguration(_)));
    }

    #[test]
    fn gleiche_ports_abgelehnt() {
        let mut cfg = mit_secret();
        cfg.netzwerk.ws_port = cfg.netzwerk.tcp_port;
        assert!(cfg.pruefen().is_err());
    }

    #[test]
    fn timeout_muss_ueber_keepalive_liegen() {
        let mut cfg = mit_secret();
        cfg.signaling.verbindungs_timeout_sek = 30;
        assert!(cfg.pruefen().is_err());
    }

    #[test]
    fn umgebung_ueberschreibt() {
        let mut cfg = ServerConfig::default();
        cfg.umgebung_anwenden(|name| match name {
            "PARLEY_JWT_SECRET" => Some("aus-env".into()),
            "PARLEY_LOG_FORMAT" => Some("json".into()),
            _ => None,
        });
        assert_eq!(cfg.auth.jwt_secret, "aus-env");
        assert_eq!(cfg.logging.format, "json");
        assert_eq!(cfg.logging.level, "info");
        assert!(cfg.pruefen().is_ok());
    }
}
