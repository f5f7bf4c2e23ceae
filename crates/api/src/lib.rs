//! mediabroker-api – HTTP-Schnittstelle des Mediabrokers
//!
//! Endpunkte:
//! - `GET    /rtp-session`       – Session zuweisen, liefert `{ host, port }`
//! - `POST   /play-audio`        – Wiedergabe annehmen (202)
//! - `DELETE /rtp-session/:port` – Session freigeben (204)
//! - `GET    /playback/:id`      – Wiedergabe-Status
//! - `GET    /health`, `GET /metrics`

pub mod error;
pub mod handlers;
pub mod routes;
pub mod server;

use mediabroker_rtp::MediaBroker;

pub use error::{fehler_antwort, ApiFehler, ApiResult};
pub use routes::{api_router, MAX_BODY_BYTES};
pub use server::{ApiServer, ApiServerKonfig};

/// Axum-State der API
#[derive(Clone)]
pub struct ApiState {
    pub broker: MediaBroker,
}

impl ApiState {
    pub fn neu(broker: MediaBroker) -> Self {
        Self { broker }
    }
}
