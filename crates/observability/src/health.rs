//! Health-Check-Endpunkt fuer den Mediabroker
//!
//! Endpoint: `GET /health`
//! Response: JSON mit Status, Version, Uptime, Broker-Bereitschaft und
//! Anzahl offener Sessions
//!
//! `degraded` (weiterhin 200) sobald mindestens 90% der RTP-Ports belegt
//! sind, `unhealthy` (503) solange der Broker nicht bereit ist.

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use crate::metrics::MediaMetrics;

/// Auslastung der Port-Kapazitaet ab der `degraded` gemeldet wird
pub const DEGRADED_AUSLASTUNG_PROZENT: u64 = 90;

/// Status des Health-Checks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Antwort des Health-Check-Endpunkts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub broker_bereit: bool,
    pub aktive_sessions: u64,
    /// Anzahl vergebbarer RTP-Ports (0 = unbekannt)
    pub kapazitaet: u64,
}

/// Geteilter Zustand fuer den Health-Check-Handler
#[derive(Clone)]
pub struct HealthState {
    pub start_time: Arc<Instant>,
    pub bereit: Arc<AtomicBool>,
    pub kapazitaet: Arc<AtomicU64>,
    pub metriken: MediaMetrics,
}

impl HealthState {
    pub fn neu(metriken: MediaMetrics) -> Self {
        Self {
            start_time: Arc::new(Instant::now()),
            bereit: Arc::new(AtomicBool::new(false)),
            kapazitaet: Arc::new(AtomicU64::new(0)),
            metriken,
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn ist_bereit(&self) -> bool {
        self.bereit.load(Ordering::Relaxed)
    }

    /// Markiert den Broker als bereit (nach dem Start) bzw. nicht bereit
    /// (waehrend des Herunterfahrens)
    pub fn bereit_setzen(&self, bereit: bool) {
        self.bereit.store(bereit, Ordering::Relaxed);
    }

    /// Setzt die Anzahl vergebbarer Ports (gerade Ports im RTP-Bereich)
    pub fn kapazitaet_setzen(&self, ports: u64) {
        self.kapazitaet.store(ports, Ordering::Relaxed);
    }

    pub fn aktive_sessions(&self) -> u64 {
        self.metriken.sessions_active.get().max(0.0) as u64
    }

    /// Baut die Antwort aus dem aktuellen Zustand
    pub fn antwort(&self) -> HealthResponse {
        let bereit = self.ist_bereit();
        let aktive = self.aktive_sessions();
        let kapazitaet = self.kapazitaet.load(Ordering::Relaxed);
        let ausgelastet = kapazitaet > 0
            && aktive * 100 >= kapazitaet * DEGRADED_AUSLASTUNG_PROZENT;

        let status = match (bereit, ausgelastet) {
            (false, _) => HealthStatus::Unhealthy,
            (true, true) => HealthStatus::Degraded,
            (true, false) => HealthStatus::Healthy,
        };

        HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.uptime_seconds(),
            broker_bereit: bereit,
            aktive_sessions: aktive,
            kapazitaet,
        }
    }
}

/// Axum-Router fuer den `/health`-Endpunkt
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
}

/// `GET /health` – gibt den Broker-Status zurueck
async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let response = state.antwort();

    let http_status = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (http_status, Json(response))
}
