//! REST-Handler fuer Sessions und Wiedergaben

use axum::{
    extract::{rejection::JsonRejection, rejection::PathRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use base64::Engine;
use bytes::Bytes;
use mediabroker_core::{PlaybackId, PlaybackStatus, SessionInfo};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiFehler, ApiResult};
use crate::ApiState;

/// GET /rtp-session
pub async fn rtp_session_zuweisen(State(state): State<ApiState>) -> ApiResult<Json<SessionInfo>> {
    let info = state.broker.session_zuweisen().await?;
    Ok(Json(info))
}

#[derive(Debug, Deserialize)]
pub struct PlayAudioBody {
    pub rtp_port: Option<u16>,
    pub audio_data_base64: Option<String>,
    pub format: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PlayAudioAntwort {
    pub status: String,
    pub playback_id: Uuid,
}

/// POST /play-audio
///
/// Antwortet mit 202 sobald die Wiedergabe angenommen ist. Das Streaming
/// beginnt erst, wenn die Gegenstelle ihr erstes Datagramm geschickt hat.
pub async fn audio_abspielen(
    State(state): State<ApiState>,
    body: Result<Json<PlayAudioBody>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(body) = body?;

    let port = match body.rtp_port {
        Some(p) if p > 0 => p,
        _ => return Err(ApiFehler::UngueltigeAnfrage("rtp_port fehlt".into())),
    };
    let daten = match body.audio_data_base64.as_deref() {
        Some(d) if !d.is_empty() => d,
        _ => {
            return Err(ApiFehler::UngueltigeAnfrage(
                "audio_data_base64 fehlt".into(),
            ))
        }
    };
    let payload = base64::engine::general_purpose::STANDARD.decode(daten)?;

    let id = state
        .broker
        .wiedergabe_starten(port, Bytes::from(payload), body.format.as_deref())?;

    Ok((
        StatusCode::ACCEPTED,
        Json(PlayAudioAntwort {
            status: "accepted".into(),
            playback_id: id.inner(),
        }),
    )
        .into_response())
}

/// DELETE /rtp-session/:port
pub async fn rtp_session_freigeben(
    State(state): State<ApiState>,
    port: Result<Path<u16>, PathRejection>,
) -> ApiResult<StatusCode> {
    let Path(port) = port.map_err(|e| ApiFehler::UngueltigeAnfrage(e.body_text()))?;
    state.broker.session_freigeben(port).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /playback/:id
pub async fn wiedergabe_abfragen(
    State(state): State<ApiState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Json<PlaybackStatus>> {
    let Path(id) = id.map_err(|e| ApiFehler::UngueltigeAnfrage(e.body_text()))?;
    state
        .broker
        .wiedergabe_status(&PlaybackId(id))
        .map(Json)
        .ok_or_else(|| ApiFehler::WiedergabeNichtGefunden(id.to_string()))
}
