//! Fehlertypen der HTTP-API
//!
//! Alle Fehler werden als `{ "error": { "code", "message" } }` ausgeliefert.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use mediabroker_core::BrokerError;
use serde_json::json;
use thiserror::Error;

/// Fehler, die ein Handler zurueckgeben kann
#[derive(Debug, Error)]
pub enum ApiFehler {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("Ungueltige Anfrage: {0}")]
    UngueltigeAnfrage(String),

    #[error("Ungueltige Base64-Daten: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Anfrage zu gross: {0}")]
    ZuGross(String),

    #[error("Wiedergabe nicht gefunden: {0}")]
    WiedergabeNichtGefunden(String),
}

pub type ApiResult<T> = Result<T, ApiFehler>;

impl From<axum::extract::rejection::JsonRejection> for ApiFehler {
    fn from(e: axum::extract::rejection::JsonRejection) -> Self {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self::ZuGross(e.body_text())
        } else {
            Self::UngueltigeAnfrage(e.body_text())
        }
    }
}

impl ApiFehler {
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::Broker(e) => {
                StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            Self::UngueltigeAnfrage(_) | Self::Base64(_) => StatusCode::BAD_REQUEST,
            Self::ZuGross(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::WiedergabeNichtGefunden(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ApiFehler {
    fn into_response(self) -> Response {
        let status = self.http_status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), fehler = %self, "Anfrage fehlgeschlagen");
        } else {
            tracing::debug!(status = status.as_u16(), fehler = %self, "Anfrage abgelehnt");
        }
        fehler_antwort(status, &self.to_string())
    }
}

/// Fehlerantwort fuer die REST-API
pub fn fehler_antwort(status: StatusCode, nachricht: &str) -> Response {
    (
        status,
        Json(json!({
            "error": {
                "code": status.as_u16(),
                "message": nachricht
            }
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_fehler_behalten_status() {
        let e = ApiFehler::from(BrokerError::SessionNichtGefunden(999));
        assert_eq!(e.http_status(), StatusCode::NOT_FOUND);

        let e = ApiFehler::from(BrokerError::PortsErschoepft { versuche: 100 });
        assert_eq!(e.http_status(), StatusCode::INTERNAL_SERVER_ERROR);

        let e = ApiFehler::from(BrokerError::ungueltig("leer"));
        assert_eq!(e.http_status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn base64_fehler_ist_400() {
        use base64::Engine;
        let e: ApiFehler = base64::engine::general_purpose::STANDARD
            .decode("%%%")
            .unwrap_err()
            .into();
        assert_eq!(e.http_status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn antwort_hat_fehlerformat() {
        let r = ApiFehler::UngueltigeAnfrage("rtp_port fehlt".into()).into_response();
        assert_eq!(r.status(), StatusCode::BAD_REQUEST);
    }
}
