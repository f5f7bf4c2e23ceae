//! Prometheus-kompatible Metriken fuer den Mediabroker
//!
//! Registrierte Metriken:
//! - `mediabroker_sessions_active` – Gauge: Offene RTP-Sessions
//! - `mediabroker_port_allocations_total` – Counter: Port-Zuweisungen (result)
//! - `mediabroker_datagrams_received_total` – Counter: Empfangene RTP-Datagramme
//! - `mediabroker_remote_learned_total` – Counter: Gelernte Remote-Adressen
//! - `mediabroker_playbacks_total` – Counter: Beendete Wiedergaben (outcome)
//! - `mediabroker_stream_duration_seconds` – Histogram: Laufzeit des Streaming-Prozesses
//! - `mediabroker_http_requests_total` – Counter: HTTP-Anfragen (method, path, status)
//! - `mediabroker_http_request_duration_seconds` – Histogram: HTTP-Antwortzeit
//! - `process_*` – Prozess-Metriken (nur Linux)

use anyhow::Result;
use axum::{response::IntoResponse, routing::get, Router};
use prometheus::{
    Counter, Encoder, Gauge, Histogram, HistogramOpts, HistogramVec, IntCounterVec, Opts,
    Registry, TextEncoder,
};
use std::sync::Arc;

/// Alle Mediabroker-Prometheus-Metriken
#[derive(Clone)]
pub struct MediaMetrics {
    pub registry: Arc<Registry>,

    // Session-Metriken
    pub sessions_active: Gauge,
    pub port_allocations_total: IntCounterVec,
    pub datagrams_received_total: Counter,
    pub remote_learned_total: Counter,

    // Wiedergabe-Metriken
    pub playbacks_total: IntCounterVec,
    pub stream_duration_seconds: Histogram,

    // HTTP-Metriken
    pub http_requests_total: IntCounterVec,
    pub http_request_duration_seconds: HistogramVec,
}

impl MediaMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        // --- Session-Metriken ---
        let sessions_active = Gauge::with_opts(Opts::new(
            "mediabroker_sessions_active",
            "Anzahl offener RTP-Sessions",
        ))?;
        registry.register(Box::new(sessions_active.clone()))?;

        let port_allocations_total = IntCounterVec::new(
            Opts::new(
                "mediabroker_port_allocations_total",
                "Port-Zuweisungen nach Ergebnis",
            ),
            &["result"],
        )?;
        registry.register(Box::new(port_allocations_total.clone()))?;

        let datagrams_received_total = Counter::with_opts(Opts::new(
            "mediabroker_datagrams_received_total",
            "Gesamtanzahl empfangener RTP-Datagramme",
        ))?;
        registry.register(Box::new(datagrams_received_total.clone()))?;

        let remote_learned_total = Counter::with_opts(Opts::new(
            "mediabroker_remote_learned_total",
            "Anzahl gelernter Remote-Adressen",
        ))?;
        registry.register(Box::new(remote_learned_total.clone()))?;

        // --- Wiedergabe-Metriken ---
        let playbacks_total = IntCounterVec::new(
            Opts::new(
                "mediabroker_playbacks_total",
                "Beendete Wiedergaben nach Ergebnis",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(playbacks_total.clone()))?;

        let stream_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "mediabroker_stream_duration_seconds",
                "Laufzeit des Streaming-Prozesses in Sekunden",
            )
            .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
        )?;
        registry.register(Box::new(stream_duration_seconds.clone()))?;

        // --- HTTP-Metriken ---
        let http_requests_total = IntCounterVec::new(
            Opts::new(
                "mediabroker_http_requests_total",
                "Gesamtanzahl HTTP-Anfragen",
            ),
            &["method", "path", "status"],
        )?;
        registry.register(Box::new(http_requests_total.clone()))?;

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "mediabroker_http_request_duration_seconds",
                "HTTP-Antwortzeit in Sekunden",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
            ]),
            &["method", "path"],
        )?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;

        // Prozess-Metriken (CPU, Speicher, offene File-Deskriptoren)
        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        Ok(Self {
            registry: Arc::new(registry),
            sessions_active,
            port_allocations_total,
            datagrams_received_total,
            remote_learned_total,
            playbacks_total,
            stream_duration_seconds,
            http_requests_total,
            http_request_duration_seconds,
        })
    }

    /// Zaehlt eine Port-Zuweisung (`ok`, `exhausted`, `bind_error`, `error`)
    pub fn zuweisung_zaehlen(&self, ergebnis: &str) {
        self.port_allocations_total
            .with_label_values(&[ergebnis])
            .inc();
    }

    /// Zaehlt eine beendete Wiedergabe
    pub fn wiedergabe_zaehlen(&self, outcome: &str) {
        self.playbacks_total.with_label_values(&[outcome]).inc();
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: MediaMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(
    axum::extract::State(metriken): axum::extract::State<MediaMetrics>,
) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            axum::http::StatusCode::OK,
            [(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4",
            )],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metriken_erstellen_erfolgreich() {
        let metriken = MediaMetrics::neu().unwrap();
        assert!(!metriken.registry.gather().is_empty());
    }

    #[test]
    fn gauge_sessions_setzen() {
        let metriken = MediaMetrics::neu().unwrap();
        metriken.sessions_active.inc();
        metriken.sessions_active.inc();
        metriken.sessions_active.dec();
        assert_eq!(metriken.sessions_active.get(), 1.0);
    }

    #[test]
    fn zuweisungen_nach_ergebnis() {
        let metriken = MediaMetrics::neu().unwrap();
        metriken.zuweisung_zaehlen("ok");
        metriken.zuweisung_zaehlen("ok");
        metriken.zuweisung_zaehlen("exhausted");

        let ok = metriken
            .port_allocations_total
            .with_label_values(&["ok"])
            .get();
        let erschoepft = metriken
            .port_allocations_total
            .with_label_values(&["exhausted"])
            .get();
        assert_eq!(ok, 2);
        assert_eq!(erschoepft, 1);
    }

    #[test]
    fn wiedergaben_nach_outcome() {
        let metriken = MediaMetrics::neu().unwrap();
        metriken.wiedergabe_zaehlen("timed_out");
        assert_eq!(
            metriken
                .playbacks_total
                .with_label_values(&["timed_out"])
                .get(),
            1
        );
    }

    #[test]
    fn metriken_export_prometheus_format() {
        let metriken = MediaMetrics::neu().unwrap();
        metriken.sessions_active.set(3.0);
        metriken.datagrams_received_total.inc();

        let output = metriken.exportieren().unwrap();
        assert!(output.contains("mediabroker_sessions_active"));
        assert!(output.contains("mediabroker_datagrams_received_total"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn unabhaengige_registries() {
        // Jede Instanz hat eine eigene Registry (keine globale Kollision)
        let a = MediaMetrics::neu().unwrap();
        let b = MediaMetrics::neu().unwrap();
        a.sessions_active.set(5.0);
        assert_eq!(b.sessions_active.get(), 0.0);
    }
}
