//! Mediabroker – Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging und startet den Server.

use anyhow::Result;
use mediabroker_observability::logging_initialisieren;
use mediabroker_server::config::{BrokerConfig, KonfigQuelle};
use mediabroker_server::Server;

#[tokio::main]
async fn main() -> Result<()> {
    // Konfigurationsdatei-Pfad aus Umgebungsvariable oder Standard
    let config_pfad = std::env::var("MEDIABROKER_CONFIG")
        .unwrap_or_else(|_| "config.toml".into());

    // Konfiguration laden (Standardwerte falls Datei fehlt)
    let (mut config, quelle) = BrokerConfig::laden(&config_pfad)?;
    config.umgebung_anwenden()?;

    logging_initialisieren(&config.logging.level, &config.logging.format);
    if quelle == KonfigQuelle::Standard {
        tracing::warn!(
            pfad = %config_pfad,
            "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
        );
    }
    config.validieren()?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad,
        "Mediabroker wird initialisiert"
    );

    let server = Server::neu(config);
    server.starten().await?;

    Ok(())
}
