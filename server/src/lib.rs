//! mediabroker-server – Bibliotheks-Root
//!
//! Verdrahtet Broker, HTTP-API, Bereinigungs-Task und optionalen
//! Observability-Server.

pub mod config;

use anyhow::{Context, Result};
use axum::Router;
use config::BrokerConfig;
use mediabroker_api::{api_router, ApiServer, ApiServerKonfig, ApiState};
use mediabroker_observability::{observability_server_starten, HealthState, MediaMetrics};
use mediabroker_rtp::MediaBroker;

/// Aufgebaute Laufzeit-Komponenten
pub struct Komponenten {
    pub broker: MediaBroker,
    pub health: HealthState,
    pub router: Router,
}

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: BrokerConfig,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: BrokerConfig) -> Self {
        Self { config }
    }

    /// Baut Metriken, Broker und Router auf, ohne etwas zu starten
    pub fn komponenten(&self) -> Result<Komponenten> {
        let metriken = MediaMetrics::neu()?;
        let broker = MediaBroker::neu(self.config.broker_konfig()?, metriken.clone())?;
        let health = HealthState::neu(metriken);
        health.kapazitaet_setzen(broker.kapazitaet() as u64);
        let router = api_router(ApiState::neu(broker.clone()), health.clone());
        Ok(Komponenten {
            broker,
            health,
            router,
        })
    }

    /// Startet alle Subsysteme und laeuft bis zum Shutdown-Signal
    ///
    /// Reihenfolge:
    /// 1. Broker und Router aufbauen
    /// 2. Bereinigungs-Task starten
    /// 3. Optional: Observability-Server
    /// 4. HTTP-API starten, auf Ctrl-C / SIGTERM warten
    /// 5. Alle Sessions freigeben
    pub async fn starten(self) -> Result<()> {
        let Komponenten {
            broker,
            health,
            router,
        } = self.komponenten()?;

        let bereinigung = broker.bereinigung_starten(
            self.config.bereinigung_intervall(),
            self.config.inaktivitaet_timeout(),
            self.config.aufbewahrung(),
        );

        if self.config.observability.aktiviert {
            let addr = self
                .config
                .observability_bind_adresse()
                .parse()
                .context("Observability-Bind-Adresse ungueltig")?;
            let metriken = broker.metriken().clone();
            let health = health.clone();
            tokio::spawn(async move {
                if let Err(e) = observability_server_starten(addr, metriken, health).await {
                    tracing::error!(fehler = %e, "Observability-Server beendet");
                }
            });
        }

        let bind_addr = self
            .config
            .api_bind_adresse()
            .parse()
            .context("API-Bind-Adresse ungueltig")?;
        let api = ApiServer::neu(ApiServerKonfig {
            bind_addr,
            cors_origins: self.config.netzwerk.cors_origins.clone(),
        });

        tracing::info!(
            api = %self.config.api_bind_adresse(),
            host = %self.config.netzwerk.oeffentlicher_host,
            rtp_min = self.config.rtp.port_min,
            rtp_max = self.config.rtp.port_max,
            "Mediabroker startet"
        );
        health.bereit_setzen(true);

        let ergebnis = api.starten(router, shutdown_signal()).await;

        health.bereit_setzen(false);
        tracing::info!("Shutdown-Signal empfangen, Mediabroker wird beendet");
        broker.herunterfahren().await;
        if let Err(e) = bereinigung.await {
            tracing::warn!(fehler = %e, "Bereinigungs-Task nicht sauber beendet");
        }

        ergebnis
    }
}

/// Wartet auf Ctrl-C oder (unter Unix) SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(fehler = %e, "Ctrl-C-Handler nicht installierbar");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                tracing::error!(fehler = %e, "SIGTERM-Handler nicht installierbar");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = sigterm => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn komponenten_aus_standard_config() {
        let mut config = BrokerConfig::default();
        config.rtp.bind_host = "127.0.0.1".into();
        config.rtp.port_min = 44500;
        config.rtp.port_max = 44600;
        let server = Server::neu(config);

        let k = server.komponenten().unwrap();
        assert_eq!(k.broker.aktive_sessions(), 0);
        assert_eq!(k.health.antwort().kapazitaet, k.broker.kapazitaet() as u64);

        // Vor dem Start ist der Broker nicht bereit
        let response = k
            .router
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        k.health.bereit_setzen(true);
        let response = k
            .router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn ungueltiger_bereich_wird_abgelehnt() {
        let mut config = BrokerConfig::default();
        config.rtp.port_min = 20000;
        config.rtp.port_max = 10000;
        assert!(Server::neu(config).komponenten().is_err());
    }
}
