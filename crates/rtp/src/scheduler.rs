//! Wiedergabe-Planer
//!
//! Nimmt Wiedergabe-Anfragen fuer eine Session an und fuehrt sie
//! asynchron aus:
//!
//! ```text
//! planen() -> PlaybackId (sofort)
//!     |
//!     v  (Task)
//! Remote-Adresse abwarten (Polling, Obergrenze)
//!     |-- Zeitlimit  -> Fehler loggen, kein Prozess
//!     v
//! Streaming-Slot der Session belegen (ein Prozess pro Session)
//!     v
//! StreamSupervisor::streamen()
//! ```

use crate::registry::SessionRegistry;
use crate::session::Session;
use crate::supervisor::{StreamAusgang, StreamErgebnis, StreamSupervisor};
use crate::tracker::PlaybackTracker;
use bytes::Bytes;
use mediabroker_core::{BrokerError, BrokerResult, PlaybackId, PlaybackPhase};
use mediabroker_observability::MediaMetrics;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Dateiendung wenn die Anfrage kein Format nennt
pub const STANDARD_FORMAT: &str = "mp3";

const MAX_FORMAT_LAENGE: usize = 10;

/// Wartezeit auf die Remote-Adresse
#[derive(Debug, Clone, Copy)]
pub struct WarteKonfig {
    /// Maximale Wartezeit ab Annahme
    pub obergrenze: Duration,
    /// Abstand zwischen zwei Pruefungen
    pub intervall: Duration,
}

impl Default for WarteKonfig {
    fn default() -> Self {
        Self {
            obergrenze: Duration::from_millis(5000),
            intervall: Duration::from_millis(500),
        }
    }
}

/// Ergebnis des Wartens auf die Remote-Adresse
enum Warten {
    Bekannt(SocketAddr),
    Zeitlimit,
    Abgebrochen,
}

/// Plant Wiedergaben und fuehrt sie im Hintergrund aus
#[derive(Clone)]
pub struct PlaybackScheduler {
    registry: SessionRegistry,
    supervisor: StreamSupervisor,
    tracker: PlaybackTracker,
    konfig: WarteKonfig,
    metriken: MediaMetrics,
}

impl PlaybackScheduler {
    pub fn neu(
        registry: SessionRegistry,
        supervisor: StreamSupervisor,
        tracker: PlaybackTracker,
        konfig: WarteKonfig,
        metriken: MediaMetrics,
    ) -> Self {
        Self {
            registry,
            supervisor,
            tracker,
            konfig,
            metriken,
        }
    }

    pub fn tracker(&self) -> &PlaybackTracker {
        &self.tracker
    }

    /// Nimmt eine Wiedergabe an
    ///
    /// Kehrt sofort zurueck. Fehler nach der Annahme (Zeitlimit,
    /// Prozessfehler) erscheinen nur in Logs, Metriken und im Tracker.
    pub fn planen(
        &self,
        port: u16,
        payload: Bytes,
        format: Option<&str>,
    ) -> BrokerResult<PlaybackId> {
        if payload.is_empty() {
            return Err(BrokerError::ungueltig("Audiodaten sind leer"));
        }
        let format = format_pruefen(format)?;

        let session = self.registry.suchen(port)?;
        if session.zustand().ist_geschlossen() {
            return Err(BrokerError::SessionNichtGefunden(port));
        }

        let id = self.tracker.eintragen(port);
        session.aktivitaet_melden();
        tracing::info!(
            port,
            playback = %id,
            bytes = payload.len(),
            format = %format,
            "Wiedergabe angenommen"
        );

        let planer = self.clone();
        let handle = tokio::spawn({
            let session = Arc::clone(&session);
            async move { planer.ausfuehren(session, id, payload, format).await }
        });
        session.aufgabe_registrieren(handle);

        Ok(id)
    }

    async fn ausfuehren(self, session: Arc<Session>, id: PlaybackId, payload: Bytes, format: String) {
        let port = session.port();
        let abbruch = session.abbruch_token();

        let ziel = match self.remote_abwarten(&session).await {
            Warten::Bekannt(adresse) => adresse,
            Warten::Zeitlimit => {
                let fehler = BrokerError::RemoteUnbekannt {
                    wartezeit_ms: self.konfig.obergrenze.as_millis() as u64,
                };
                tracing::error!(port, playback = %id, fehler = %fehler, "Wiedergabe verworfen");
                self.beenden(id, PlaybackPhase::Zeitlimit, None, Some(fehler.to_string()));
                return;
            }
            Warten::Abgebrochen => {
                tracing::info!(port, playback = %id, "Wiedergabe vor Start abgebrochen");
                self.beenden(id, PlaybackPhase::Abgebrochen, None, None);
                return;
            }
        };

        // Hoechstens ein Streaming-Prozess pro Session, weitere warten hier
        let _slot = tokio::select! {
            slot = session.stream_slot().lock() => slot,
            _ = abbruch.cancelled() => {
                tracing::info!(port, playback = %id, "Wiedergabe in Warteschlange abgebrochen");
                self.beenden(id, PlaybackPhase::Abgebrochen, None, None);
                return;
            }
        };

        self.registry.streaming_markieren(&session);
        self.tracker.phase_setzen(id, PlaybackPhase::Streaming);
        session.aktivitaet_melden();

        let ergebnis = self
            .supervisor
            .streamen(port, ziel, payload, &format, &abbruch)
            .await;
        session.aktivitaet_melden();

        let phase = phase_fuer(&ergebnis);
        self.beenden(
            id,
            phase,
            ergebnis.exit_code(),
            ergebnis.fehler().map(|e| e.to_string()),
        );
    }

    /// Pollt die Remote-Adresse bis sie bekannt ist oder die Obergrenze erreicht ist
    async fn remote_abwarten(&self, session: &Session) -> Warten {
        let abbruch = session.abbruch_token();
        let frist = Instant::now() + self.konfig.obergrenze;

        loop {
            if let Some(adresse) = session.remote() {
                return Warten::Bekannt(adresse);
            }
            let jetzt = Instant::now();
            if jetzt >= frist {
                return Warten::Zeitlimit;
            }
            let pause = self.konfig.intervall.min(frist - jetzt);

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = abbruch.cancelled() => return Warten::Abgebrochen,
            }
        }
    }

    fn beenden(
        &self,
        id: PlaybackId,
        phase: PlaybackPhase,
        exit_code: Option<i32>,
        fehler: Option<String>,
    ) {
        self.tracker.abschliessen(id, phase, exit_code, fehler);
        self.metriken.wiedergabe_zaehlen(phase.label());
    }
}

fn phase_fuer(ergebnis: &StreamErgebnis) -> PlaybackPhase {
    match ergebnis.ausgang {
        StreamAusgang::Abgebrochen => PlaybackPhase::Abgebrochen,
        _ if ergebnis.erfolgreich() => PlaybackPhase::Abgeschlossen,
        _ => PlaybackPhase::Fehlgeschlagen,
    }
}

/// Prueft die Dateiendung; nur kurze alphanumerische Endungen sind erlaubt
fn format_pruefen(format: Option<&str>) -> BrokerResult<String> {
    let format = match format.map(str::trim) {
        None | Some("") => return Ok(STANDARD_FORMAT.to_string()),
        Some(f) => f,
    };
    if format.len() > MAX_FORMAT_LAENGE || !format.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(BrokerError::ungueltig(format!("Ungueltiges Audioformat: {format:?}")));
    }
    Ok(format.to_ascii_lowercase())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::StreamKonfig;
    use mediabroker_core::SessionZustand;
    use tokio::net::UdpSocket;

    struct Aufbau {
        registry: SessionRegistry,
        planer: PlaybackScheduler,
        metriken: MediaMetrics,
        _temp: tempfile::TempDir,
    }

    fn aufbau(programm: &str, vor_argumente: Vec<String>) -> Aufbau {
        let metriken = MediaMetrics::neu().unwrap();
        let registry = SessionRegistry::neu(metriken.clone());
        let temp = tempfile::tempdir().unwrap();
        let supervisor = StreamSupervisor::neu(
            StreamKonfig {
                programm: programm.into(),
                vor_argumente,
                temp_verzeichnis: Some(temp.path().to_path_buf()),
                ..StreamKonfig::default()
            },
            metriken.clone(),
        );
        let planer = PlaybackScheduler::neu(
            registry.clone(),
            supervisor,
            PlaybackTracker::neu(),
            WarteKonfig::default(),
            metriken.clone(),
        );
        Aufbau {
            registry,
            planer,
            metriken,
            _temp: temp,
        }
    }

    fn shell(skript: &str) -> Aufbau {
        aufbau("sh", vec!["-c".into(), skript.into(), "stream".into()])
    }

    async fn session(registry: &SessionRegistry) -> Arc<Session> {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        registry.erstellen(port, socket).unwrap()
    }

    async fn aufgaben_abwarten(session: &Session) {
        for aufgabe in session.aufgaben_nehmen() {
            aufgabe.await.unwrap();
        }
    }

    fn remote_lernen(registry: &SessionRegistry, session: &Session) {
        registry.paket_empfangen(session, "127.0.0.1:40000".parse().unwrap(), 172);
    }

    #[test]
    fn format_regeln() {
        assert_eq!(format_pruefen(None).unwrap(), "mp3");
        assert_eq!(format_pruefen(Some("")).unwrap(), "mp3");
        assert_eq!(format_pruefen(Some("WAV")).unwrap(), "wav");
        assert!(format_pruefen(Some("mp3;rm")).is_err());
        assert!(format_pruefen(Some("../etc")).is_err());
        assert!(format_pruefen(Some("sehrlangeendung")).is_err());
    }

    #[tokio::test]
    async fn leere_payload_abgelehnt() {
        let a = aufbau("true", vec![]);
        let s = session(&a.registry).await;
        assert!(matches!(
            a.planer.planen(s.port(), Bytes::new(), None),
            Err(BrokerError::UngueltigeAnfrage(_))
        ));
        assert_eq!(a.planer.tracker().anzahl(), 0);
    }

    #[tokio::test]
    async fn unbekannte_session_abgelehnt() {
        let a = aufbau("true", vec![]);
        assert!(matches!(
            a.planer.planen(10000, Bytes::from_static(b"x"), None),
            Err(BrokerError::SessionNichtGefunden(10000))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn zeitlimit_ohne_remote() {
        let a = aufbau("/nicht/vorhanden/ffmpeg-mediabroker", vec![]);
        let s = session(&a.registry).await;
        let start = Instant::now();

        let id = a.planer.planen(s.port(), Bytes::from_static(b"x"), None).unwrap();
        aufgaben_abwarten(&s).await;

        assert!(start.elapsed() >= Duration::from_millis(5000));
        let status = a.planer.tracker().abfragen(&id).unwrap();
        assert_eq!(status.phase, PlaybackPhase::Zeitlimit);
        assert!(status.fehler.unwrap().contains("5000"));
        assert_eq!(
            a.metriken.playbacks_total.with_label_values(&["timed_out"]).get(),
            1
        );
        // Kein Prozessstart, also auch kein Streaming-Zustand
        assert_eq!(s.zustand(), SessionZustand::Zugewiesen);
        assert_eq!(a.metriken.stream_duration_seconds.get_sample_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_waehrend_wartezeit_gelernt() {
        let a = aufbau("/nicht/vorhanden/ffmpeg-mediabroker", vec![]);
        let s = session(&a.registry).await;

        let id = a.planer.planen(s.port(), Bytes::from_static(b"x"), None).unwrap();
        let lerner = {
            let registry = a.registry.clone();
            let s = Arc::clone(&s);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(1200)).await;
                remote_lernen(&registry, &s);
            })
        };
        aufgaben_abwarten(&s).await;
        lerner.await.unwrap();

        // Prozess wurde versucht: Fehlschlag statt Zeitlimit
        let status = a.planer.tracker().abfragen(&id).unwrap();
        assert_eq!(status.phase, PlaybackPhase::Fehlgeschlagen);
        assert_eq!(s.zustand(), SessionZustand::Streaming);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn bekannte_remote_streamt_sofort() {
        let a = shell("exit 0");
        let s = session(&a.registry).await;
        remote_lernen(&a.registry, &s);

        let id = a.planer.planen(s.port(), Bytes::from_static(b"x"), Some("wav")).unwrap();
        aufgaben_abwarten(&s).await;

        let status = a.planer.tracker().abfragen(&id).unwrap();
        assert_eq!(status.phase, PlaybackPhase::Abgeschlossen);
        assert_eq!(status.exit_code, Some(0));
        assert_eq!(
            a.metriken.playbacks_total.with_label_values(&["completed"]).get(),
            1
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn wiedergaben_einer_session_laufen_nacheinander() {
        let protokoll_dir = tempfile::tempdir().unwrap();
        let protokoll = protokoll_dir.path().join("ablauf.txt");
        let skript = format!(
            "echo start >> '{p}'; sleep 0.2; echo ende >> '{p}'",
            p = protokoll.display()
        );
        let a = shell(&skript);
        let s = session(&a.registry).await;
        remote_lernen(&a.registry, &s);

        let erste = a.planer.planen(s.port(), Bytes::from_static(b"a"), None).unwrap();
        let zweite = a.planer.planen(s.port(), Bytes::from_static(b"b"), None).unwrap();
        aufgaben_abwarten(&s).await;

        let ablauf = std::fs::read_to_string(&protokoll).unwrap();
        assert_eq!(ablauf.lines().collect::<Vec<_>>(), vec!["start", "ende", "start", "ende"]);
        for id in [erste, zweite] {
            assert_eq!(
                a.planer.tracker().abfragen(&id).unwrap().phase,
                PlaybackPhase::Abgeschlossen
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn freigabe_bricht_wartende_wiedergabe_ab() {
        let a = aufbau("/nicht/vorhanden/ffmpeg-mediabroker", vec![]);
        let s = session(&a.registry).await;
        let id = a.planer.planen(s.port(), Bytes::from_static(b"x"), None).unwrap();

        tokio::time::sleep(Duration::from_millis(700)).await;
        a.registry.entfernen(s.port());
        aufgaben_abwarten(&s).await;

        let status = a.planer.tracker().abfragen(&id).unwrap();
        assert_eq!(status.phase, PlaybackPhase::Abgebrochen);
        assert_eq!(
            a.metriken.playbacks_total.with_label_values(&["cancelled"]).get(),
            1
        );
    }

    #[tokio::test]
    async fn geschlossene_session_nimmt_nichts_an() {
        let a = aufbau("true", vec![]);
        let s = session(&a.registry).await;
        a.registry.schliessen(&s);
        assert!(matches!(
            a.planer.planen(s.port(), Bytes::from_static(b"x"), None),
            Err(BrokerError::SessionNichtGefunden(_))
        ));
    }
}
