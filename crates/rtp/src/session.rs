//! RTP-Session – Zustand eines reservierten Medien-Endpunkts
//!
//! Pro Session:
//! - gebundener UDP-Socket auf dem zugewiesenen Port
//! - Remote-Adresse (set-once, vom ersten Datagramm)
//! - monotoner Lebenszyklus-Zustand
//! - Abbruch-Token fuer Lauscher und Wiedergabe-Tasks
//! - Streaming-Slot (hoechstens ein Prozess gleichzeitig)
//!
//! Zustandsuebergaenge sind `pub(crate)` und werden ausschliesslich ueber
//! die `SessionRegistry` ausgeloest.

use mediabroker_core::SessionZustand;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Eine offene RTP-Session
pub struct Session {
    port: u16,
    socket: Arc<UdpSocket>,
    /// Adresse der Gegenstelle, gesetzt vom ersten empfangenen Datagramm
    remote: OnceLock<SocketAddr>,
    zustand: AtomicU8,
    erstellt: Instant,
    letzte_aktivitaet: Mutex<Instant>,
    pakete: AtomicU64,
    abbruch: CancellationToken,
    stream_slot: tokio::sync::Mutex<()>,
    /// Empfangs-Task des Lauschers
    lauscher: Mutex<Option<JoinHandle<()>>>,
    /// Laufende Wiedergabe-Tasks
    aufgaben: Mutex<Vec<JoinHandle<()>>>,
}

impl Session {
    pub(crate) fn neu(port: u16, socket: UdpSocket) -> Self {
        let jetzt = Instant::now();
        Self {
            port,
            socket: Arc::new(socket),
            remote: OnceLock::new(),
            zustand: AtomicU8::new(SessionZustand::Zugewiesen.als_u8()),
            erstellt: jetzt,
            letzte_aktivitaet: Mutex::new(jetzt),
            pakete: AtomicU64::new(0),
            abbruch: CancellationToken::new(),
            stream_slot: tokio::sync::Mutex::new(()),
            lauscher: Mutex::new(None),
            aufgaben: Mutex::new(Vec::new()),
        }
    }

    // -----------------------------------------------------------------------
    // Lesender Zugriff
    // -----------------------------------------------------------------------

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Gelernte Remote-Adresse (None solange kein Datagramm empfangen wurde)
    pub fn remote(&self) -> Option<SocketAddr> {
        self.remote.get().copied()
    }

    pub fn zustand(&self) -> SessionZustand {
        SessionZustand::aus_u8(self.zustand.load(Ordering::Acquire))
            .unwrap_or(SessionZustand::Geschlossen)
    }

    /// Anzahl empfangener Datagramme
    pub fn pakete(&self) -> u64 {
        self.pakete.load(Ordering::Relaxed)
    }

    /// Lokale Bind-Adresse des Sockets
    pub fn lokale_adresse(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Alter der Session
    pub fn alter(&self) -> Duration {
        self.erstellt.elapsed()
    }

    /// Prueft ob die Session als inaktiv gilt
    ///
    /// Inaktiv heisst: seit `timeout` weder ein Datagramm noch eine
    /// Wiedergabe-Aktivitaet, und kein Wiedergabe-Task laeuft.
    pub fn ist_inaktiv(&self, timeout: Duration) -> bool {
        self.letzte_aktivitaet.lock().elapsed() > timeout && !self.hat_laufende_aufgaben()
    }

    /// Prueft ob noch Wiedergabe-Tasks laufen
    pub fn hat_laufende_aufgaben(&self) -> bool {
        self.aufgaben.lock().iter().any(|h| !h.is_finished())
    }

    // -----------------------------------------------------------------------
    // Crate-interne Mutationen (ueber die Registry)
    // -----------------------------------------------------------------------

    pub(crate) fn socket(&self) -> Arc<UdpSocket> {
        Arc::clone(&self.socket)
    }

    pub(crate) fn abbruch_token(&self) -> CancellationToken {
        self.abbruch.clone()
    }

    pub(crate) fn stream_slot(&self) -> &tokio::sync::Mutex<()> {
        &self.stream_slot
    }

    /// Rueckt den Zustand vor, niemals zurueck
    ///
    /// Gibt `true` zurueck wenn sich der Zustand geaendert hat.
    pub(crate) fn zustand_vorruecken(&self, neu: SessionZustand) -> bool {
        let vorher = self.zustand.fetch_max(neu.als_u8(), Ordering::AcqRel);
        vorher < neu.als_u8()
    }

    /// Setzt die Remote-Adresse, falls noch keine bekannt ist
    pub(crate) fn remote_setzen(&self, adresse: SocketAddr) -> bool {
        self.remote.set(adresse).is_ok()
    }

    pub(crate) fn paket_zaehlen(&self) {
        self.pakete.fetch_add(1, Ordering::Relaxed);
        self.aktivitaet_melden();
    }

    pub(crate) fn aktivitaet_melden(&self) {
        *self.letzte_aktivitaet.lock() = Instant::now();
    }

    pub(crate) fn abbrechen(&self) {
        self.abbruch.cancel();
    }

    pub(crate) fn lauscher_setzen(&self, handle: JoinHandle<()>) {
        *self.lauscher.lock() = Some(handle);
    }

    pub(crate) fn lauscher_nehmen(&self) -> Option<JoinHandle<()>> {
        self.lauscher.lock().take()
    }

    /// Registriert einen Wiedergabe-Task; beendete Tasks werden dabei entfernt
    pub(crate) fn aufgabe_registrieren(&self, handle: JoinHandle<()>) {
        let mut aufgaben = self.aufgaben.lock();
        aufgaben.retain(|h| !h.is_finished());
        aufgaben.push(handle);
    }

    pub(crate) fn aufgaben_nehmen(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut *self.aufgaben.lock())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("port", &self.port)
            .field("remote", &self.remote())
            .field("zustand", &self.zustand())
            .field("pakete", &self.pakete())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_session() -> Session {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        Session::neu(port, socket)
    }

    #[tokio::test]
    async fn neue_session_ist_zugewiesen() {
        let s = test_session().await;
        assert_eq!(s.zustand(), SessionZustand::Zugewiesen);
        assert!(s.remote().is_none());
        assert_eq!(s.pakete(), 0);
    }

    #[tokio::test]
    async fn zustand_nur_vorwaerts() {
        let s = test_session().await;
        assert!(s.zustand_vorruecken(SessionZustand::RemoteBekannt));
        assert!(!s.zustand_vorruecken(SessionZustand::Lauschend));
        assert_eq!(s.zustand(), SessionZustand::RemoteBekannt);

        assert!(s.zustand_vorruecken(SessionZustand::Geschlossen));
        assert!(!s.zustand_vorruecken(SessionZustand::Streaming));
        assert_eq!(s.zustand(), SessionZustand::Geschlossen);
    }

    #[tokio::test]
    async fn remote_nur_einmal_setzbar() {
        let s = test_session().await;
        let erste: SocketAddr = "1.2.3.4:5000".parse().unwrap();
        let zweite: SocketAddr = "9.9.9.9:6000".parse().unwrap();

        assert!(s.remote_setzen(erste));
        assert!(!s.remote_setzen(zweite));
        assert_eq!(s.remote(), Some(erste));
    }

    #[tokio::test(start_paused = true)]
    async fn inaktivitaet_nach_timeout() {
        let s = test_session().await;
        assert!(!s.ist_inaktiv(Duration::from_secs(30)));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(s.ist_inaktiv(Duration::from_secs(30)));

        s.paket_zaehlen();
        assert!(!s.ist_inaktiv(Duration::from_secs(30)));
        assert_eq!(s.pakete(), 1);
    }

    #[tokio::test]
    async fn beendete_aufgaben_werden_aufgeraeumt() {
        let s = test_session().await;
        let fertig = tokio::spawn(async {});
        fertig_abwarten(&fertig).await;
        s.aufgabe_registrieren(fertig);
        assert!(!s.hat_laufende_aufgaben());

        let laufend = tokio::spawn(std::future::pending::<()>());
        s.aufgabe_registrieren(laufend);
        assert!(s.hat_laufende_aufgaben());

        let aufgaben = s.aufgaben_nehmen();
        assert_eq!(aufgaben.len(), 1);
        for a in aufgaben {
            a.abort();
        }
    }

    async fn fertig_abwarten(handle: &JoinHandle<()>) {
        while !handle.is_finished() {
            tokio::task::yield_now().await;
        }
    }
}
