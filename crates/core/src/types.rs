//! Gemeinsame Typen fuer den Mediabroker
//!
//! IDs verwenden das Newtype-Pattern, Zustaende sind explizite Enums.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// PlaybackId
// ---------------------------------------------------------------------------

/// Eindeutige ID einer angenommenen Wiedergabe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlaybackId(pub Uuid);

impl PlaybackId {
    /// Erstellt eine neue zufaellige PlaybackId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Gibt die innere UUID zurueck
    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl Default for PlaybackId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PlaybackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "playback:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// SessionZustand
// ---------------------------------------------------------------------------

/// Lebenszyklus einer RTP-Session
///
/// Die Reihenfolge der Varianten ist die erlaubte Uebergangsrichtung.
/// `Geschlossen` ist terminal und von jedem Zustand aus erreichbar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SessionZustand {
    Zugewiesen = 0,
    Lauschend = 1,
    RemoteBekannt = 2,
    Streaming = 3,
    Geschlossen = 4,
}

impl SessionZustand {
    /// Numerische Darstellung (fuer atomare Speicherung)
    pub fn als_u8(self) -> u8 {
        self as u8
    }

    /// Rueckwandlung aus der numerischen Darstellung
    pub fn aus_u8(wert: u8) -> Option<Self> {
        match wert {
            0 => Some(Self::Zugewiesen),
            1 => Some(Self::Lauschend),
            2 => Some(Self::RemoteBekannt),
            3 => Some(Self::Streaming),
            4 => Some(Self::Geschlossen),
            _ => None,
        }
    }

    /// Prueft ob der Zustand terminal ist
    pub fn ist_geschlossen(self) -> bool {
        self == Self::Geschlossen
    }
}

impl std::fmt::Display for SessionZustand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Zugewiesen => "zugewiesen",
            Self::Lauschend => "lauschend",
            Self::RemoteBekannt => "remote_bekannt",
            Self::Streaming => "streaming",
            Self::Geschlossen => "geschlossen",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// SessionInfo
// ---------------------------------------------------------------------------

/// Antwort auf eine Session-Zuweisung: Host und Port fuer die Gegenstelle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub host: String,
    pub port: u16,
}

// ---------------------------------------------------------------------------
// Wiedergabe-Status
// ---------------------------------------------------------------------------

/// Phase einer angenommenen Wiedergabe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackPhase {
    /// Wartet auf die Remote-Adresse
    #[serde(rename = "waiting")]
    Wartend,
    /// Streaming-Prozess laeuft
    #[serde(rename = "streaming")]
    Streaming,
    /// Prozess mit Exit-Code 0 beendet
    #[serde(rename = "completed")]
    Abgeschlossen,
    /// Prozess mit Fehler beendet oder nicht startbar
    #[serde(rename = "failed")]
    Fehlgeschlagen,
    /// Keine Remote-Adresse innerhalb der Wartezeit
    #[serde(rename = "timed_out")]
    Zeitlimit,
    /// Session wurde vor dem Ende freigegeben
    #[serde(rename = "cancelled")]
    Abgebrochen,
}

impl PlaybackPhase {
    /// Prueft ob die Wiedergabe beendet ist (egal mit welchem Ergebnis)
    pub fn ist_beendet(self) -> bool {
        !matches!(self, Self::Wartend | Self::Streaming)
    }

    /// Externer Name (JSON und Metrik-Label)
    pub fn label(self) -> &'static str {
        match self {
            Self::Wartend => "waiting",
            Self::Streaming => "streaming",
            Self::Abgeschlossen => "completed",
            Self::Fehlgeschlagen => "failed",
            Self::Zeitlimit => "timed_out",
            Self::Abgebrochen => "cancelled",
        }
    }
}

/// Abfragbarer Status einer Wiedergabe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackStatus {
    pub id: PlaybackId,
    pub port: u16,
    pub phase: PlaybackPhase,
    pub exit_code: Option<i32>,
    pub fehler: Option<String>,
    pub angenommen_am: DateTime<Utc>,
    pub beendet_am: Option<DateTime<Utc>>,
}

impl PlaybackStatus {
    /// Erstellt einen neuen Status in der Phase `Wartend`
    pub fn neu(id: PlaybackId, port: u16) -> Self {
        Self {
            id,
            port,
            phase: PlaybackPhase::Wartend,
            exit_code: None,
            fehler: None,
            angenommen_am: Utc::now(),
            beendet_am: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playback_id_eindeutig() {
        let a = PlaybackId::new();
        let b = PlaybackId::new();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("playback:"));
    }

    #[test]
    fn zustand_reihenfolge() {
        assert!(SessionZustand::Zugewiesen < SessionZustand::Lauschend);
        assert!(SessionZustand::Lauschend < SessionZustand::RemoteBekannt);
        assert!(SessionZustand::RemoteBekannt < SessionZustand::Streaming);
        assert!(SessionZustand::Streaming < SessionZustand::Geschlossen);
    }

    #[test]
    fn zustand_u8_umwandlung() {
        for z in [
            SessionZustand::Zugewiesen,
            SessionZustand::Lauschend,
            SessionZustand::RemoteBekannt,
            SessionZustand::Streaming,
            SessionZustand::Geschlossen,
        ] {
            assert_eq!(SessionZustand::aus_u8(z.als_u8()), Some(z));
        }
        assert_eq!(SessionZustand::aus_u8(9), None);
    }

    #[test]
    fn phase_beendet() {
        assert!(!PlaybackPhase::Wartend.ist_beendet());
        assert!(!PlaybackPhase::Streaming.ist_beendet());
        assert!(PlaybackPhase::Abgeschlossen.ist_beendet());
        assert!(PlaybackPhase::Zeitlimit.ist_beendet());
    }

    #[test]
    fn status_serialisierung() {
        let status = PlaybackStatus::neu(PlaybackId::new(), 10000);
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"phase\":\"waiting\""));
        assert!(json.contains("\"port\":10000"));
    }

    #[test]
    fn phase_json_entspricht_label() {
        for phase in [
            PlaybackPhase::Wartend,
            PlaybackPhase::Streaming,
            PlaybackPhase::Abgeschlossen,
            PlaybackPhase::Fehlgeschlagen,
            PlaybackPhase::Zeitlimit,
            PlaybackPhase::Abgebrochen,
        ] {
            let json = serde_json::to_value(phase).unwrap();
            assert_eq!(json, phase.label());
            let zurueck: PlaybackPhase = serde_json::from_value(json).unwrap();
            assert_eq!(zurueck, phase);
        }
    }

    #[test]
    fn session_info_json() {
        let info = SessionInfo {
            host: "127.0.0.1".into(),
            port: 10002,
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["host"], "127.0.0.1");
        assert_eq!(json["port"], 10002);
    }
}
