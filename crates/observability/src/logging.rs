//! Logging via tracing-subscriber
//!
//! Umgebungsvariablen haben Vorrang vor der Konfigurationsdatei:
//! - `MB_LOG_LEVEL`: Level oder Filter-Direktiven (`info,mediabroker_rtp=trace`)
//! - `MB_LOG_FORMAT`: `text` oder `json`

use std::str::FromStr;

use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_LEVEL_ENV: &str = "MB_LOG_LEVEL";
pub const LOG_FORMAT_ENV: &str = "MB_LOG_FORMAT";

/// Direktiven, die an jeden Filter angehaengt werden, damit einzelne
/// HTTP-Verbindungen das Log nicht fluten.
const LEISE_ABHAENGIGKEITEN: &str = "hyper=warn,h2=warn,tower_http=info";

const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            anders => Err(format!("unbekanntes Log-Format: {anders}")),
        }
    }
}

/// Installiert den globalen Subscriber.
///
/// Ungueltige Werte aus Umgebung oder Konfiguration fallen auf `info`
/// bzw. `text` zurueck.
pub fn logging_initialisieren(level: &str, format: &str) {
    let direktive = std::env::var(LOG_LEVEL_ENV)
        .ok()
        .filter(|d| log_level_gueltig(d))
        .unwrap_or_else(|| level.to_string());
    let filter = filter_bauen(&direktive);

    let format = std::env::var(LOG_FORMAT_ENV)
        .ok()
        .and_then(|f| f.parse().ok())
        .or_else(|| format.parse().ok())
        .unwrap_or(LogFormat::Text);

    match format {
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .with_thread_ids(true)
            .init(),
        LogFormat::Text => fmt().with_env_filter(filter).with_target(true).init(),
    }
}

fn filter_bauen(direktive: &str) -> EnvFilter {
    let direktive = if log_level_gueltig(direktive) {
        direktive
    } else {
        "info"
    };
    EnvFilter::try_new(format!("{direktive},{LEISE_ABHAENGIGKEITEN}"))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Prueft einen Level bzw. eine kommagetrennte Liste aus `level` und
/// `ziel=level`.
pub fn log_level_gueltig(direktive: &str) -> bool {
    !direktive.is_empty()
        && direktive.split(',').all(|teil| {
            let level = match teil.split_once('=') {
                Some((ziel, level)) if !ziel.is_empty() => level,
                Some(_) => return false,
                None => teil,
            };
            LEVELS.contains(&level)
        })
}

pub fn log_format_gueltig(format: &str) -> bool {
    format.parse::<LogFormat>().is_ok()
}
