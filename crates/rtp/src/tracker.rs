//! Wiedergabe-Tracker – abfragbarer Status angenommener Wiedergaben
//!
//! Der Aufrufer von `play-audio` bekommt nur eine Annahme-Bestaetigung.
//! Zeitlimit und Prozessfehler treten danach auf und sind hier ueber die
//! `PlaybackId` abrufbar.

use chrono::Utc;
use dashmap::DashMap;
use mediabroker_core::{PlaybackId, PlaybackPhase, PlaybackStatus};
use std::sync::Arc;
use std::time::Duration;

/// Status aller Wiedergaben, indexiert nach `PlaybackId`
#[derive(Clone, Default)]
pub struct PlaybackTracker {
    eintraege: Arc<DashMap<PlaybackId, PlaybackStatus>>,
}

impl PlaybackTracker {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Legt einen neuen Eintrag in der Phase `Wartend` an
    pub fn eintragen(&self, port: u16) -> PlaybackId {
        let id = PlaybackId::new();
        self.eintraege.insert(id, PlaybackStatus::neu(id, port));
        id
    }

    /// Setzt eine Zwischenphase
    pub fn phase_setzen(&self, id: PlaybackId, phase: PlaybackPhase) {
        if let Some(mut eintrag) = self.eintraege.get_mut(&id) {
            eintrag.phase = phase;
        }
    }

    /// Schliesst eine Wiedergabe ab
    pub fn abschliessen(
        &self,
        id: PlaybackId,
        phase: PlaybackPhase,
        exit_code: Option<i32>,
        fehler: Option<String>,
    ) {
        if let Some(mut eintrag) = self.eintraege.get_mut(&id) {
            eintrag.phase = phase;
            eintrag.exit_code = exit_code;
            eintrag.fehler = fehler;
            eintrag.beendet_am = Some(Utc::now());
        }
    }

    pub fn abfragen(&self, id: &PlaybackId) -> Option<PlaybackStatus> {
        self.eintraege.get(id).map(|e| e.value().clone())
    }

    /// Alle Wiedergaben einer Session
    pub fn fuer_port(&self, port: u16) -> Vec<PlaybackStatus> {
        let mut liste: Vec<PlaybackStatus> = self
            .eintraege
            .iter()
            .filter(|e| e.port == port)
            .map(|e| e.value().clone())
            .collect();
        liste.sort_by_key(|s| s.angenommen_am);
        liste
    }

    /// Entfernt beendete Eintraege, die aelter als `aufbewahrung` sind
    pub fn alte_entfernen(&self, aufbewahrung: Duration) -> usize {
        let grenze = match chrono::Duration::from_std(aufbewahrung) {
            Ok(d) => Utc::now() - d,
            Err(_) => return 0,
        };
        let vorher = self.eintraege.len();
        self.eintraege
            .retain(|_, s| !matches!(s.beendet_am, Some(ende) if ende < grenze));
        vorher - self.eintraege.len()
    }

    pub fn anzahl(&self) -> usize {
        self.eintraege.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eintragen_und_abfragen() {
        let tracker = PlaybackTracker::neu();
        let id = tracker.eintragen(10000);

        let status = tracker.abfragen(&id).unwrap();
        assert_eq!(status.port, 10000);
        assert_eq!(status.phase, PlaybackPhase::Wartend);
        assert!(status.beendet_am.is_none());
    }

    #[test]
    fn abschliessen_setzt_ergebnis() {
        let tracker = PlaybackTracker::neu();
        let id = tracker.eintragen(10002);
        tracker.phase_setzen(id, PlaybackPhase::Streaming);
        tracker.abschliessen(id, PlaybackPhase::Fehlgeschlagen, Some(1), Some("exit 1".into()));

        let status = tracker.abfragen(&id).unwrap();
        assert_eq!(status.phase, PlaybackPhase::Fehlgeschlagen);
        assert_eq!(status.exit_code, Some(1));
        assert!(status.beendet_am.is_some());
    }

    #[test]
    fn unbekannte_id() {
        let tracker = PlaybackTracker::neu();
        assert!(tracker.abfragen(&PlaybackId::new()).is_none());
        // Kein Panic bei unbekannter ID
        tracker.phase_setzen(PlaybackId::new(), PlaybackPhase::Streaming);
    }

    #[test]
    fn nach_port_filtern() {
        let tracker = PlaybackTracker::neu();
        tracker.eintragen(10000);
        tracker.eintragen(10000);
        tracker.eintragen(10002);
        assert_eq!(tracker.fuer_port(10000).len(), 2);
        assert_eq!(tracker.fuer_port(10004).len(), 0);
    }

    #[test]
    fn nur_beendete_werden_entfernt() {
        let tracker = PlaybackTracker::neu();
        let laufend = tracker.eintragen(10000);
        let beendet = tracker.eintragen(10000);
        tracker.abschliessen(beendet, PlaybackPhase::Abgeschlossen, Some(0), None);
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(tracker.alte_entfernen(Duration::ZERO), 1);
        assert!(tracker.abfragen(&laufend).is_some());
        assert!(tracker.abfragen(&beendet).is_none());
    }

    #[test]
    fn frische_eintraege_bleiben() {
        let tracker = PlaybackTracker::neu();
        let id = tracker.eintragen(10000);
        tracker.abschliessen(id, PlaybackPhase::Zeitlimit, None, None);
        assert_eq!(tracker.alte_entfernen(Duration::from_secs(600)), 0);
        assert_eq!(tracker.anzahl(), 1);
    }
}
