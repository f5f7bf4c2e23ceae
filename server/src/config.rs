//! Broker-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Broker ohne Konfigurationsdatei
//! lauffaehig ist. Danach werden die Umgebungsvariablen `PORT`,
//! `PUBLIC_IP`, `RTP_PORT_MIN`, `RTP_PORT_MAX` und
//! `RTP_PORT_QUARANTINE_SECONDS` angewendet.

use anyhow::{bail, Context};
use mediabroker_observability::logging::{log_format_gueltig, log_level_gueltig};
use mediabroker_rtp::{BrokerKonfig, StreamKonfig, WarteKonfig};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Vollstaendige Broker-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// HTTP-API und oeffentlicher Host
    pub netzwerk: NetzwerkEinstellungen,
    /// RTP-Portbereich und Session-Bereinigung
    pub rtp: RtpEinstellungen,
    /// Warten auf die Remote-Adresse
    pub wiedergabe: WiedergabeEinstellungen,
    /// Streaming-Prozess
    pub streaming: StreamingEinstellungen,
    pub logging: LoggingEinstellungen,
    /// Separater Observability-Server (Metriken, Health)
    pub observability: ObservabilityEinstellungen,
}

/// Netzwerk-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    /// Bind-Adresse der HTTP-API
    pub bind_adresse: String,
    /// Port der HTTP-API (Umgebung: `PORT`)
    pub api_port: u16,
    /// Host, der Clients als RTP-Ziel gemeldet wird (Umgebung: `PUBLIC_IP`)
    pub oeffentlicher_host: String,
    /// CORS-Origins (leer = kein CORS)
    pub cors_origins: Vec<String>,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".into(),
            api_port: 3003,
            oeffentlicher_host: "127.0.0.1".into(),
            cors_origins: vec![],
        }
    }
}

/// RTP-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RtpEinstellungen {
    /// Lokale Adresse der RTP-Sockets
    pub bind_host: String,
    /// Untere Grenze des Portbereichs (Umgebung: `RTP_PORT_MIN`)
    pub port_min: u16,
    /// Obere Grenze des Portbereichs (Umgebung: `RTP_PORT_MAX`)
    pub port_max: u16,
    /// Zufallsversuche pro Port-Suche
    pub versuche: u32,
    /// Neue Port-Suchen wenn ein Port nicht bindbar ist
    pub bind_versuche: u32,
    /// Inaktive Sessions nach dieser Zeit freigeben (0 = nie)
    pub inaktivitaet_timeout_secs: u64,
    /// Intervall des Bereinigungs-Tasks
    pub bereinigung_intervall_secs: u64,
    /// Abklingzeit freigegebener Ports (Umgebung: `RTP_PORT_QUARANTINE_SECONDS`)
    pub quarantaene_secs: u64,
}

impl Default for RtpEinstellungen {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".into(),
            port_min: 10000,
            port_max: 10100,
            versuche: mediabroker_rtp::STANDARD_VERSUCHE,
            bind_versuche: mediabroker_rtp::STANDARD_BIND_VERSUCHE,
            inaktivitaet_timeout_secs: 0,
            bereinigung_intervall_secs: 30,
            quarantaene_secs: mediabroker_rtp::STANDARD_QUARANTAENE.as_secs(),
        }
    }
}

/// Wiedergabe-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WiedergabeEinstellungen {
    /// Maximale Wartezeit auf die Remote-Adresse
    pub wartezeit_ms: u64,
    /// Pruefintervall waehrend der Wartezeit
    pub pruef_intervall_ms: u64,
    /// Aufbewahrung beendeter Wiedergabe-Status
    pub aufbewahrung_secs: u64,
}

impl Default for WiedergabeEinstellungen {
    fn default() -> Self {
        Self {
            wartezeit_ms: 5000,
            pruef_intervall_ms: 500,
            aufbewahrung_secs: 600,
        }
    }
}

/// Streaming-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingEinstellungen {
    /// Programm (Pfad oder Name im PATH)
    pub programm: String,
    /// Zusaetzliche Argumente vor den Streaming-Parametern
    pub vor_argumente: Vec<String>,
    pub sample_rate: u32,
    pub kanaele: u8,
    pub codec: String,
    pub paket_groesse: u16,
    /// Verzeichnis fuer temporaere Audiodateien (leer = OS-Standard)
    pub temp_verzeichnis: Option<String>,
}

impl Default for StreamingEinstellungen {
    fn default() -> Self {
        let standard = StreamKonfig::default();
        Self {
            programm: standard.programm,
            vor_argumente: standard.vor_argumente,
            sample_rate: standard.sample_rate,
            kanaele: standard.kanaele,
            codec: standard.codec,
            paket_groesse: standard.paket_groesse,
            temp_verzeichnis: None,
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

/// Observability-Einstellungen
///
/// `/health` und `/metrics` sind immer Teil der HTTP-API. Der separate
/// Server ist fuer Setups, in denen die API nicht gescrapt werden soll.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityEinstellungen {
    pub aktiviert: bool,
    pub port: u16,
}

impl Default for ObservabilityEinstellungen {
    fn default() -> Self {
        Self {
            aktiviert: false,
            port: 9300,
        }
    }
}

/// Woher die Konfiguration stammt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KonfigQuelle {
    Datei,
    /// Datei fehlt, Standardwerte
    Standard,
}

impl BrokerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    ///
    /// Loggt nicht selbst, da das Logging erst mit dieser Konfiguration
    /// initialisiert wird.
    pub fn laden(pfad: &str) -> anyhow::Result<(Self, KonfigQuelle)> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok((config, KonfigQuelle::Datei))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok((Self::default(), KonfigQuelle::Standard))
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Wendet die Umgebungsvariablen des Prozesses an
    pub fn umgebung_anwenden(&mut self) -> anyhow::Result<()> {
        self.umgebung_anwenden_mit(|name| std::env::var(name).ok())
    }

    /// Wendet Umgebungswerte aus einer beliebigen Quelle an
    pub fn umgebung_anwenden_mit<F>(&mut self, lesen: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lesen("PORT") {
            self.netzwerk.api_port = zahl("PORT", &port)?;
        }
        if let Some(ip) = lesen("PUBLIC_IP") {
            self.netzwerk.oeffentlicher_host = ip;
        }
        if let Some(min) = lesen("RTP_PORT_MIN") {
            self.rtp.port_min = zahl("RTP_PORT_MIN", &min)?;
        }
        if let Some(max) = lesen("RTP_PORT_MAX") {
            self.rtp.port_max = zahl("RTP_PORT_MAX", &max)?;
        }
        if let Some(secs) = lesen("RTP_PORT_QUARANTINE_SECONDS") {
            self.rtp.quarantaene_secs = zahl("RTP_PORT_QUARANTINE_SECONDS", &secs)?;
        }
        Ok(())
    }

    /// Prueft die Konfiguration auf Widersprueche
    pub fn validieren(&self) -> anyhow::Result<()> {
        let rtp = &self.rtp;
        if rtp.port_min > rtp.port_max {
            bail!(
                "RTP-Portbereich ungueltig: port_min ({}) ist groesser als port_max ({})",
                rtp.port_min,
                rtp.port_max
            );
        }
        if rtp.port_min == rtp.port_max && rtp.port_min % 2 != 0 {
            bail!("RTP-Portbereich {} enthaelt keinen geraden Port", rtp.port_min);
        }
        if rtp.versuche == 0 {
            bail!("rtp.versuche muss groesser als 0 sein");
        }
        if rtp.bereinigung_intervall_secs == 0 {
            bail!("rtp.bereinigung_intervall_secs muss groesser als 0 sein");
        }
        if self.wiedergabe.pruef_intervall_ms == 0 {
            bail!("wiedergabe.pruef_intervall_ms muss groesser als 0 sein");
        }
        if self.streaming.programm.trim().is_empty() {
            bail!("streaming.programm darf nicht leer sein");
        }
        if self.streaming.paket_groesse == 0 {
            bail!("streaming.paket_groesse muss groesser als 0 sein");
        }
        if self.netzwerk.oeffentlicher_host.trim().is_empty() {
            bail!("netzwerk.oeffentlicher_host darf nicht leer sein");
        }
        if !log_level_gueltig(&self.logging.level) {
            bail!("Unbekannter Log-Level: {}", self.logging.level);
        }
        if !log_format_gueltig(&self.logging.format) {
            bail!("Unbekanntes Log-Format: {}", self.logging.format);
        }
        Ok(())
    }

    /// Uebersetzt die Datei-Konfiguration in die Laufzeit-Konfiguration des Brokers
    pub fn broker_konfig(&self) -> anyhow::Result<BrokerKonfig> {
        let rtp_bind_host: IpAddr = self
            .rtp
            .bind_host
            .parse()
            .with_context(|| format!("rtp.bind_host ungueltig: {}", self.rtp.bind_host))?;

        let s = &self.streaming;
        Ok(BrokerKonfig {
            oeffentlicher_host: self.netzwerk.oeffentlicher_host.clone(),
            rtp_bind_host,
            port_min: self.rtp.port_min,
            port_max: self.rtp.port_max,
            versuche: self.rtp.versuche,
            bind_versuche: self.rtp.bind_versuche,
            quarantaene: Duration::from_secs(self.rtp.quarantaene_secs),
            warten: WarteKonfig {
                obergrenze: Duration::from_millis(self.wiedergabe.wartezeit_ms),
                intervall: Duration::from_millis(self.wiedergabe.pruef_intervall_ms),
            },
            streaming: StreamKonfig {
                programm: s.programm.clone(),
                vor_argumente: s.vor_argumente.clone(),
                sample_rate: s.sample_rate,
                kanaele: s.kanaele,
                codec: s.codec.clone(),
                paket_groesse: s.paket_groesse,
                temp_verzeichnis: s
                    .temp_verzeichnis
                    .as_deref()
                    .filter(|p| !p.is_empty())
                    .map(PathBuf::from),
            },
        })
    }

    /// Inaktivitaets-Timeout (None = Bereinigung inaktiver Sessions aus)
    pub fn inaktivitaet_timeout(&self) -> Option<Duration> {
        match self.rtp.inaktivitaet_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn bereinigung_intervall(&self) -> Duration {
        Duration::from_secs(self.rtp.bereinigung_intervall_secs)
    }

    pub fn aufbewahrung(&self) -> Duration {
        Duration::from_secs(self.wiedergabe.aufbewahrung_secs)
    }

    /// Gibt die Bind-Adresse fuer die HTTP-API zurueck
    pub fn api_bind_adresse(&self) -> String {
        format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.api_port)
    }

    /// Gibt die Bind-Adresse fuer den Observability-Server zurueck
    pub fn observability_bind_adresse(&self) -> String {
        format!("{}:{}", self.netzwerk.bind_adresse, self.observability.port)
    }
}

fn zahl<T: std::str::FromStr>(name: &str, wert: &str) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    wert.trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("Umgebungsvariable {name}={wert:?} ungueltig: {e}"))
}
