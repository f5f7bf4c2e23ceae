//! Stream-Supervisor – startet und ueberwacht den externen Streaming-Prozess
//!
//! Ablauf pro Wiedergabe:
//! 1. Payload in eine eindeutig benannte temporaere Datei schreiben
//! 2. Streaming-Programm (Standard: ffmpeg) mit festen Parametern starten
//!    (mono, 8 kHz, µ-law ueber RTP, feste Paketgroesse)
//! 3. Prozessende asynchron abwarten, stderr ins Debug-Log
//! 4. Temporaere Datei loeschen, Exit-Code protokollieren
//!
//! Die temporaere Datei haengt an einem `NamedTempFile`-Guard und wird auf
//! jedem Pfad geloescht, auch wenn der Prozess gar nicht startet.
//!
//! Unter Unix laeuft der Prozess in einer eigenen Prozessgruppe. Beim Abbruch
//! wird die ganze Gruppe beendet, damit Wrapper keine Enkelprozesse
//! zuruecklassen.

use bytes::Bytes;
use mediabroker_core::BrokerError;
use mediabroker_observability::MediaMetrics;
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Wie lange nach Prozessende noch stderr gelesen wird
const STDERR_NACHLAUF: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Parameter des Streaming-Prozesses
#[derive(Debug, Clone)]
pub struct StreamKonfig {
    /// Programm (Pfad oder Name im PATH)
    pub programm: String,
    /// Argumente vor den Streaming-Parametern (z.B. fuer Wrapper wie `nice`)
    pub vor_argumente: Vec<String>,
    pub sample_rate: u32,
    pub kanaele: u8,
    pub codec: String,
    /// RTP-Paketgroesse in Bytes (160 = 20ms PCMU bei 8 kHz)
    pub paket_groesse: u16,
    /// Verzeichnis fuer temporaere Dateien (None = OS-Standard)
    pub temp_verzeichnis: Option<PathBuf>,
}

impl Default for StreamKonfig {
    fn default() -> Self {
        Self {
            programm: "ffmpeg".into(),
            vor_argumente: Vec::new(),
            sample_rate: 8000,
            kanaele: 1,
            codec: "pcm_mulaw".into(),
            paket_groesse: 160,
            temp_verzeichnis: None,
        }
    }
}

impl StreamKonfig {
    /// RTP-Ziel-URL fuer ffmpeg
    pub fn ziel_url(&self, ziel: SocketAddr) -> String {
        format!("rtp://{ziel}?pkt_size={}", self.paket_groesse)
    }

    /// Vollstaendige Argumentliste fuer den Prozess
    pub fn argumente(&self, eingabe: &Path, ziel: SocketAddr) -> Vec<String> {
        let mut args = self.vor_argumente.clone();
        args.extend([
            "-re".to_string(),
            "-i".to_string(),
            eingabe.display().to_string(),
            "-ar".to_string(),
            self.sample_rate.to_string(),
            "-ac".to_string(),
            self.kanaele.to_string(),
            "-acodec".to_string(),
            self.codec.clone(),
            "-f".to_string(),
            "rtp".to_string(),
            self.ziel_url(ziel),
        ]);
        args
    }
}

// ---------------------------------------------------------------------------
// Ergebnis
// ---------------------------------------------------------------------------

/// Wie ein Streaming-Vorgang geendet hat
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamAusgang {
    /// Prozess ist beendet (Exit-Code None = per Signal beendet)
    Beendet { exit_code: Option<i32> },
    /// Prozess konnte nicht gestartet oder nicht abgewartet werden
    ProzessFehler(String),
    /// Temporaere Datei konnte nicht angelegt werden
    ArtefaktFehler(String),
    /// Session wurde waehrend des Streamings geschlossen
    Abgebrochen,
}

/// Ergebnis eines Streaming-Vorgangs
#[derive(Debug, Clone)]
pub struct StreamErgebnis {
    pub ausgang: StreamAusgang,
    /// Pfad der (inzwischen geloeschten) temporaeren Datei
    pub artefakt: Option<PathBuf>,
    pub dauer: Duration,
}

impl StreamErgebnis {
    pub fn exit_code(&self) -> Option<i32> {
        match self.ausgang {
            StreamAusgang::Beendet { exit_code } => exit_code,
            _ => None,
        }
    }

    pub fn erfolgreich(&self) -> bool {
        self.exit_code() == Some(0)
    }

    /// Fehler fuer Logs und Status (None bei Erfolg oder Abbruch)
    pub fn fehler(&self) -> Option<BrokerError> {
        match &self.ausgang {
            StreamAusgang::Beendet { exit_code: Some(0) } | StreamAusgang::Abgebrochen => None,
            StreamAusgang::Beendet { exit_code: Some(code) } => {
                Some(BrokerError::Subprozess(format!("Exit-Code {code}")))
            }
            StreamAusgang::Beendet { exit_code: None } => {
                Some(BrokerError::Subprozess("durch Signal beendet".into()))
            }
            StreamAusgang::ProzessFehler(grund) => Some(BrokerError::Subprozess(grund.clone())),
            StreamAusgang::ArtefaktFehler(grund) => Some(BrokerError::Subprozess(format!(
                "temporaere Datei: {grund}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// StreamSupervisor
// ---------------------------------------------------------------------------

/// Startet Streaming-Prozesse und raeumt hinter ihnen auf
#[derive(Clone)]
pub struct StreamSupervisor {
    konfig: StreamKonfig,
    metriken: MediaMetrics,
}

impl StreamSupervisor {
    pub fn neu(konfig: StreamKonfig, metriken: MediaMetrics) -> Self {
        Self { konfig, metriken }
    }

    pub fn konfig(&self) -> &StreamKonfig {
        &self.konfig
    }

    /// Streamt `payload` an `ziel` und wartet auf das Prozessende
    ///
    /// Fehler werden nicht an den Aufrufer eskaliert, sondern im Ergebnis
    /// zurueckgegeben und geloggt. Wird `abbruch` ausgeloest, wird der
    /// Prozess beendet.
    pub async fn streamen(
        &self,
        port: u16,
        ziel: SocketAddr,
        payload: Bytes,
        format: &str,
        abbruch: &CancellationToken,
    ) -> StreamErgebnis {
        let start = Instant::now();

        let artefakt = match self.artefakt_anlegen(port, payload, format).await {
            Ok(a) => a,
            Err(e) => {
                tracing::error!(port, fehler = %e, "Temporaere Audiodatei konnte nicht angelegt werden");
                return StreamErgebnis {
                    ausgang: StreamAusgang::ArtefaktFehler(e.to_string()),
                    artefakt: None,
                    dauer: start.elapsed(),
                };
            }
        };
        let pfad = artefakt.path().to_path_buf();

        tracing::info!(
            port,
            ziel = %self.konfig.ziel_url(ziel),
            datei = %pfad.display(),
            "Streaming wird gestartet"
        );

        let ausgang = self.prozess_ausfuehren(port, &pfad, ziel, abbruch).await;

        let geloescht = tokio::task::spawn_blocking(move || artefakt.close())
            .await
            .map_err(std::io::Error::other)
            .and_then(|r| r);
        if let Err(e) = geloescht {
            tracing::warn!(port, datei = %pfad.display(), fehler = %e, "Temporaere Audiodatei nicht geloescht");
        }

        let dauer = start.elapsed();
        self.metriken
            .stream_duration_seconds
            .observe(dauer.as_secs_f64());

        let ergebnis = StreamErgebnis {
            ausgang,
            artefakt: Some(pfad),
            dauer,
        };

        match ergebnis.fehler() {
            None if ergebnis.erfolgreich() => {
                tracing::info!(port, dauer_ms = dauer.as_millis() as u64, "Streaming abgeschlossen");
            }
            None => {
                tracing::info!(port, "Streaming abgebrochen");
            }
            Some(e) => {
                tracing::error!(
                    port,
                    exit_code = ?ergebnis.exit_code(),
                    fehler = %e,
                    "Streaming-Prozess fehlgeschlagen"
                );
            }
        }

        ergebnis
    }

    /// Schreibt die Payload in eine neue temporaere Datei
    async fn artefakt_anlegen(
        &self,
        port: u16,
        payload: Bytes,
        format: &str,
    ) -> std::io::Result<NamedTempFile> {
        let verzeichnis = self.konfig.temp_verzeichnis.clone();
        let praefix = format!("audio_{port}_");
        let suffix = format!(".{format}");

        tokio::task::spawn_blocking(move || -> std::io::Result<NamedTempFile> {
            let mut builder = tempfile::Builder::new();
            builder.prefix(&praefix).suffix(&suffix);
            let mut datei = match verzeichnis {
                Some(dir) => builder.tempfile_in(dir)?,
                None => builder.tempfile()?,
            };
            datei.write_all(&payload)?;
            datei.flush()?;
            Ok(datei)
        })
        .await
        .map_err(std::io::Error::other)?
    }

    async fn prozess_ausfuehren(
        &self,
        port: u16,
        eingabe: &Path,
        ziel: SocketAddr,
        abbruch: &CancellationToken,
    ) -> StreamAusgang {
        let mut befehl = Command::new(&self.konfig.programm);
        befehl
            .args(self.konfig.argumente(eingabe, ziel))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        befehl.process_group(0);

        let mut kind = match befehl.spawn() {
            Ok(k) => k,
            Err(e) => {
                return StreamAusgang::ProzessFehler(format!(
                    "'{}' nicht startbar: {e}",
                    self.konfig.programm
                ));
            }
        };

        // Gruppen-ID = PID des Kindes (process_group(0))
        let gruppe = kind.id();

        let stderr_task = kind.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut zeilen = BufReader::new(stderr).lines();
                while let Ok(Some(zeile)) = zeilen.next_line().await {
                    tracing::debug!(port, "[stream stderr] {zeile}");
                }
            })
        });

        let ausgang = tokio::select! {
            status = kind.wait() => match status {
                Ok(s) => StreamAusgang::Beendet { exit_code: s.code() },
                Err(e) => StreamAusgang::ProzessFehler(format!("Warten auf Prozess fehlgeschlagen: {e}")),
            },
            _ = abbruch.cancelled() => {
                gruppe_beenden(port, gruppe);
                if let Err(e) = kind.kill().await {
                    tracing::warn!(port, fehler = %e, "Streaming-Prozess konnte nicht beendet werden");
                }
                StreamAusgang::Abgebrochen
            }
        };

        if let Some(mut task) = stderr_task {
            // Haelt ein Enkelprozess stderr offen, wird er mitsamt Gruppe beendet
            if tokio::time::timeout(STDERR_NACHLAUF, &mut task).await.is_err() {
                tracing::debug!(port, "stderr nach Prozessende noch offen, beende Prozessgruppe");
                gruppe_beenden(port, gruppe);
                task.abort();
            }
        }

        ausgang
    }
}

/// Sendet SIGKILL an die Prozessgruppe des Streaming-Prozesses
#[cfg(unix)]
fn gruppe_beenden(port: u16, gruppe: Option<u32>) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(gruppe) = gruppe.and_then(|g| i32::try_from(g).ok()) else {
        return;
    };
    match killpg(Pid::from_raw(gruppe), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => tracing::warn!(port, gruppe, fehler = %e, "Prozessgruppe konnte nicht beendet werden"),
    }
}

#[cfg(not(unix))]
fn gruppe_beenden(_port: u16, _gruppe: Option<u32>) {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
