//! Axum HTTP-Server fuer die Mediabroker-API

use std::future::Future;
use std::net::SocketAddr;

use anyhow::Result;
use axum::http::{HeaderValue, Method};
use axum::Router;
use tower_http::cors::CorsLayer;

/// API-Server-Konfiguration
#[derive(Debug, Clone)]
pub struct ApiServerKonfig {
    pub bind_addr: SocketAddr,
    /// Erlaubte CORS-Origins. Leer = kein CORS-Layer.
    pub cors_origins: Vec<String>,
}

/// HTTP-Server fuer die Mediabroker-API
pub struct ApiServer {
    konfig: ApiServerKonfig,
}

impl ApiServer {
    pub fn neu(konfig: ApiServerKonfig) -> Self {
        Self { konfig }
    }

    /// Startet den Server und laeuft bis `stopp` aufgeloest wird
    pub async fn starten<F>(self, router: Router, stopp: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = match self.cors_layer() {
            Some(cors) => router.layer(cors),
            None => router,
        };

        let listener = tokio::net::TcpListener::bind(self.konfig.bind_addr).await?;
        tracing::info!(addr = %self.konfig.bind_addr, "Mediabroker-API gestartet");

        axum::serve(listener, app)
            .with_graceful_shutdown(stopp)
            .await?;
        tracing::info!("Mediabroker-API beendet");
        Ok(())
    }

    fn cors_layer(&self) -> Option<CorsLayer> {
        if self.konfig.cors_origins.is_empty() {
            return None;
        }
        let origins: Vec<HeaderValue> = self
            .konfig
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        Some(
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
                .allow_headers(tower_http::cors::Any),
        )
    }
}
