//! Route-Definitionen der HTTP-API

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post},
    Router,
};
use mediabroker_observability::{
    health_router, metrics_router, request_timing_layer, timing_middleware, HealthState,
};

use crate::{handlers, ApiState};

/// Maximale Groesse eines Request-Bodys (10 MiB)
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Erstellt den vollstaendigen Router inklusive `/health` und `/metrics`
pub fn api_router(state: ApiState, health: HealthState) -> Router {
    let metriken = state.broker.metriken().clone();

    Router::new()
        .route("/rtp-session", get(handlers::rtp_session_zuweisen))
        .route("/rtp-session/:port", delete(handlers::rtp_session_freigeben))
        .route("/play-audio", post(handlers::audio_abspielen))
        .route("/playback/:id", get(handlers::wiedergabe_abfragen))
        .with_state(state)
        .merge(health_router(health))
        .merge(metrics_router(metriken.clone()))
        .layer(middleware::from_fn_with_state(metriken, timing_middleware))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(request_timing_layer())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use mediabroker_observability::MediaMetrics;
    use mediabroker_rtp::{BrokerKonfig, MediaBroker};
    use serde_json::{json, Value};
    use std::net::{IpAddr, Ipv4Addr};
    use tower::ServiceExt;

    fn app(port_min: u16, port_max: u16) -> (Router, MediaBroker) {
        let metriken = MediaMetrics::neu().unwrap();
        let konfig = BrokerKonfig {
            oeffentlicher_host: "203.0.113.7".into(),
            rtp_bind_host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port_min,
            port_max,
            ..BrokerKonfig::default()
        };
        let broker = MediaBroker::neu(konfig, metriken.clone()).unwrap();
        let health = HealthState::neu(metriken);
        health.bereit_setzen(true);
        let router = api_router(ApiState::neu(broker.clone()), health);
        (router, broker)
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn anfrage(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn session_zuweisen_liefert_host_und_port() {
        let (app, broker) = app(43000, 43100);

        let response = app.oneshot(anfrage("/rtp-session")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["host"], "203.0.113.7");
        let port = body["port"].as_u64().unwrap();
        assert_eq!(port % 2, 0);
        assert!((43000..=43100).contains(&port));

        broker.herunterfahren().await;
    }

    #[tokio::test]
    async fn erschoepfter_pool_ist_500() {
        let (app, broker) = app(43200, 43201);

        let erste = app.clone().oneshot(anfrage("/rtp-session")).await.unwrap();
        assert_eq!(erste.status(), StatusCode::OK);

        let zweite = app.oneshot(anfrage("/rtp-session")).await.unwrap();
        assert_eq!(zweite.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(zweite).await;
        assert_eq!(body["error"]["code"], 500);

        broker.herunterfahren().await;
    }

    #[tokio::test]
    async fn play_audio_unbekannter_port_ist_404() {
        let (app, _broker) = app(43300, 43400);

        let response = app
            .oneshot(post_json(
                "/play-audio",
                json!({ "rtp_port": 999, "audio_data_base64": "SUQz" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], 404);
        assert!(body["error"]["message"].as_str().unwrap().contains("999"));
    }

    #[tokio::test]
    async fn play_audio_ungueltige_anfragen_sind_400() {
        let (app, _broker) = app(43500, 43600);

        for body in [
            json!({ "audio_data_base64": "SUQz" }),
            json!({ "rtp_port": 10000 }),
            json!({ "rtp_port": 10000, "audio_data_base64": "" }),
            json!({ "rtp_port": 10000, "audio_data_base64": "%%%nicht base64" }),
            json!({ "rtp_port": "abc", "audio_data_base64": "SUQz" }),
        ] {
            let response = app
                .clone()
                .oneshot(post_json("/play-audio", body.clone()))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{body}");
        }

        let kaputt = Request::builder()
            .method("POST")
            .uri("/play-audio")
            .header("content-type", "application/json")
            .body(Body::from("{kein json"))
            .unwrap();
        let response = app.oneshot(kaputt).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn zu_grosser_body_ist_413() {
        let (app, _broker) = app(43700, 43800);
        let daten = "A".repeat(MAX_BODY_BYTES + 1024);
        let response = app
            .oneshot(post_json(
                "/play-audio",
                json!({ "rtp_port": 10000, "audio_data_base64": daten }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn wiedergabe_annehmen_abfragen_und_freigeben() {
        let (app, broker) = app(43900, 44000);

        let zuweisung = app.clone().oneshot(anfrage("/rtp-session")).await.unwrap();
        let port = json_body(zuweisung).await["port"].as_u64().unwrap();

        let response = app
            .clone()
            .oneshot(post_json(
                "/play-audio",
                json!({ "rtp_port": port, "audio_data_base64": "SUQzBAA=", "format": "mp3" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = json_body(response).await;
        assert_eq!(body["status"], "accepted");
        let id = body["playback_id"].as_str().unwrap().to_string();

        let status = app
            .clone()
            .oneshot(anfrage(&format!("/playback/{id}")))
            .await
            .unwrap();
        assert_eq!(status.status(), StatusCode::OK);
        let status = json_body(status).await;
        assert_eq!(status["phase"], "waiting");
        assert_eq!(status["port"], port);

        let loeschen = Request::builder()
            .method("DELETE")
            .uri(format!("/rtp-session/{port}"))
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(loeschen).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        // Freigabe bricht die wartende Wiedergabe ab
        let status = app
            .clone()
            .oneshot(anfrage(&format!("/playback/{id}")))
            .await
            .unwrap();
        assert_eq!(json_body(status).await["phase"], "cancelled");

        let nochmal = Request::builder()
            .method("DELETE")
            .uri(format!("/rtp-session/{port}"))
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(nochmal).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(broker.aktive_sessions(), 0);
    }

    #[tokio::test]
    async fn wiedergabe_abfrage_fehlerfaelle() {
        let (app, _broker) = app(44100, 44200);

        let unbekannt = app
            .clone()
            .oneshot(anfrage(&format!("/playback/{}", uuid::Uuid::new_v4())))
            .await
            .unwrap();
        assert_eq!(unbekannt.status(), StatusCode::NOT_FOUND);

        let kaputt = app.clone().oneshot(anfrage("/playback/keine-uuid")).await.unwrap();
        assert_eq!(kaputt.status(), StatusCode::BAD_REQUEST);

        let port = Request::builder()
            .method("DELETE")
            .uri("/rtp-session/kein-port")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(port).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn health_und_metrics_sind_eingebunden() {
        let (app, broker) = app(44300, 44400);

        let health = app.clone().oneshot(anfrage("/health")).await.unwrap();
        assert_eq!(health.status(), StatusCode::OK);

        app.clone().oneshot(anfrage("/rtp-session")).await.unwrap();

        let metrics = app.oneshot(anfrage("/metrics")).await.unwrap();
        assert_eq!(metrics.status(), StatusCode::OK);
        let bytes = to_bytes(metrics.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("mediabroker_sessions_active 1"));
        assert!(text.contains("mediabroker_http_requests_total"));
        assert!(text.contains("path=\"/rtp-session\""));

        broker.herunterfahren().await;
    }
}
