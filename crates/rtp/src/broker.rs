//! MediaBroker – Fassade ueber Port-Vergabe, Registry, Lerner und Planer
//!
//! Einstiegspunkt fuer die API-Schicht. Haelt alle Komponenten zusammen
//! und kapselt den Lebenszyklus einer Session:
//!
//! ```text
//! session_zuweisen()  -> Port reservieren, UDP binden, Lauscher starten
//! wiedergabe_starten() -> PlaybackScheduler::planen()
//! session_freigeben() -> Tasks abbrechen und abwarten, Socket schliessen,
//!                        Port in Quarantaene
//! ```

use crate::learner::RemoteAddressLearner;
use crate::pool::{PortAllocator, PortBereich, PortPool, STANDARD_QUARANTAENE, STANDARD_VERSUCHE};
use crate::registry::SessionRegistry;
use crate::scheduler::{PlaybackScheduler, WarteKonfig};
use crate::session::Session;
use crate::supervisor::{StreamKonfig, StreamSupervisor};
use crate::tracker::PlaybackTracker;
use bytes::Bytes;
use mediabroker_core::{BrokerError, BrokerResult, PlaybackId, PlaybackStatus, SessionInfo};
use mediabroker_observability::MediaMetrics;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Standard-Anzahl Bind-Versuche pro Zuweisung
pub const STANDARD_BIND_VERSUCHE: u32 = 3;

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Laufzeit-Konfiguration des Brokers
#[derive(Debug, Clone)]
pub struct BrokerKonfig {
    /// Host, der Clients in `SessionInfo` gemeldet wird
    pub oeffentlicher_host: String,
    /// Lokale Adresse fuer die RTP-Sockets
    pub rtp_bind_host: IpAddr,
    pub port_min: u16,
    pub port_max: u16,
    /// Zufallsversuche pro Port-Suche
    pub versuche: u32,
    /// Neue Port-Suchen wenn der Bind fehlschlaegt
    pub bind_versuche: u32,
    /// Abklingzeit freigegebener Ports (0 = sofort wieder vergeben)
    pub quarantaene: Duration,
    pub warten: WarteKonfig,
    pub streaming: StreamKonfig,
}

impl Default for BrokerKonfig {
    fn default() -> Self {
        Self {
            oeffentlicher_host: "127.0.0.1".into(),
            rtp_bind_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port_min: 10000,
            port_max: 10100,
            versuche: STANDARD_VERSUCHE,
            bind_versuche: STANDARD_BIND_VERSUCHE,
            quarantaene: STANDARD_QUARANTAENE,
            warten: WarteKonfig::default(),
            streaming: StreamKonfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// MediaBroker
// ---------------------------------------------------------------------------

/// Zentrale Fassade (Clone-bar, teilt den Zustand)
#[derive(Clone)]
pub struct MediaBroker {
    inner: Arc<BrokerInner>,
}

struct BrokerInner {
    konfig: BrokerKonfig,
    allocator: PortAllocator,
    registry: SessionRegistry,
    scheduler: PlaybackScheduler,
    tracker: PlaybackTracker,
    metriken: MediaMetrics,
    /// Beendet den Bereinigungs-Task beim Herunterfahren
    stopp: CancellationToken,
}

impl MediaBroker {
    /// Baut alle Komponenten aus der Konfiguration auf
    pub fn neu(konfig: BrokerKonfig, metriken: MediaMetrics) -> BrokerResult<Self> {
        let bereich = PortBereich::neu(konfig.port_min, konfig.port_max)?;
        if konfig.versuche == 0 {
            return Err(BrokerError::Konfiguration(
                "versuche muss groesser als 0 sein".into(),
            ));
        }

        let allocator = PortAllocator::neu(PortPool::neu(), bereich, konfig.versuche)
            .mit_abklingzeit(konfig.quarantaene);
        let registry = SessionRegistry::neu(metriken.clone());
        let tracker = PlaybackTracker::neu();
        let supervisor = StreamSupervisor::neu(konfig.streaming.clone(), metriken.clone());
        let scheduler = PlaybackScheduler::neu(
            registry.clone(),
            supervisor,
            tracker.clone(),
            konfig.warten,
            metriken.clone(),
        );

        tracing::info!(
            port_min = konfig.port_min,
            port_max = konfig.port_max,
            kapazitaet = bereich.gerade_ports(),
            quarantaene_ms = konfig.quarantaene.as_millis() as u64,
            host = %konfig.oeffentlicher_host,
            "MediaBroker initialisiert"
        );

        Ok(Self {
            inner: Arc::new(BrokerInner {
                konfig,
                allocator,
                registry,
                scheduler,
                tracker,
                metriken,
                stopp: CancellationToken::new(),
            }),
        })
    }

    pub fn konfig(&self) -> &BrokerKonfig {
        &self.inner.konfig
    }

    pub fn metriken(&self) -> &MediaMetrics {
        &self.inner.metriken
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    /// Reserviert einen Port, bindet den UDP-Socket und startet den Lauscher
    pub async fn session_zuweisen(&self) -> BrokerResult<SessionInfo> {
        let inner = &self.inner;
        let mut letzter_fehler = None;

        for versuch in 1..=inner.konfig.bind_versuche.max(1) {
            let port = match inner.allocator.zuweisen() {
                Ok(p) => p,
                Err(e) => {
                    inner.metriken.zuweisung_zaehlen("exhausted");
                    return Err(e);
                }
            };

            let adresse = SocketAddr::new(inner.konfig.rtp_bind_host, port);
            let socket = match UdpSocket::bind(adresse).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(port, versuch, fehler = %e, "RTP-Port nicht bindbar");
                    inner.allocator.freigeben(port);
                    letzter_fehler = Some(e);
                    continue;
                }
            };

            let session = match inner.registry.erstellen(port, socket) {
                Ok(s) => s,
                Err(e) => {
                    inner.allocator.freigeben(port);
                    inner.metriken.zuweisung_zaehlen("error");
                    return Err(e);
                }
            };
            let lauscher = RemoteAddressLearner::starten(inner.registry.clone(), Arc::clone(&session));
            session.lauscher_setzen(lauscher);

            inner.metriken.zuweisung_zaehlen("ok");
            tracing::info!(port, host = %inner.konfig.oeffentlicher_host, "RTP-Session zugewiesen");
            return Ok(SessionInfo {
                host: inner.konfig.oeffentlicher_host.clone(),
                port,
            });
        }

        inner.metriken.zuweisung_zaehlen("bind_error");
        Err(match letzter_fehler {
            Some(e) => BrokerError::Io(e),
            None => BrokerError::intern("keine Bind-Versuche konfiguriert"),
        })
    }

    /// Gibt eine Session frei
    ///
    /// Bricht Lauscher und Wiedergaben ab, wartet auf ihr Ende (kein
    /// verwaister Streaming-Prozess), schliesst den Socket und legt den
    /// Port in Quarantaene.
    ///
    /// Der Abbau laeuft in einem eigenen Task und wird auch dann zu Ende
    /// gefuehrt, wenn der Aufrufer nicht mehr wartet.
    pub async fn session_freigeben(&self, port: u16) -> BrokerResult<()> {
        let session = self
            .inner
            .registry
            .entfernen(port)
            .ok_or(BrokerError::SessionNichtGefunden(port))?;

        let allocator = self.inner.allocator.clone();
        let abbau = tokio::spawn(async move {
            session_abbauen(&session).await;
            // Letzte Referenz: Socket wird hier geschlossen
            drop(session);
            allocator.zuruecklegen(port);
            tracing::info!(port, "RTP-Session freigegeben");
        });

        if let Err(e) = abbau.await {
            tracing::error!(port, fehler = %e, "Abbau der RTP-Session fehlgeschlagen");
        }
        Ok(())
    }

    /// Sucht eine offene Session
    pub fn session(&self, port: u16) -> BrokerResult<Arc<Session>> {
        self.inner.registry.suchen(port)
    }

    pub fn aktive_sessions(&self) -> usize {
        self.inner.registry.anzahl()
    }

    pub fn ports(&self) -> Vec<u16> {
        self.inner.registry.ports()
    }

    /// Anzahl vergebbarer Ports (gerade Ports im Bereich)
    pub fn kapazitaet(&self) -> usize {
        self.inner.allocator.bereich().gerade_ports()
    }

    // -----------------------------------------------------------------------
    // Wiedergabe
    // -----------------------------------------------------------------------

    /// Nimmt eine Wiedergabe an; das Streaming laeuft im Hintergrund
    pub fn wiedergabe_starten(
        &self,
        port: u16,
        payload: Bytes,
        format: Option<&str>,
    ) -> BrokerResult<PlaybackId> {
        self.inner.scheduler.planen(port, payload, format)
    }

    pub fn wiedergabe_status(&self, id: &PlaybackId) -> Option<PlaybackStatus> {
        self.inner.tracker.abfragen(id)
    }

    // -----------------------------------------------------------------------
    // Bereinigung
    // -----------------------------------------------------------------------

    /// Gibt alle Sessions frei, die laenger als `timeout` inaktiv sind
    pub async fn inaktive_bereinigen(&self, timeout: Duration) -> Vec<u16> {
        let inaktive = self.inner.registry.inaktive(timeout);

        for port in &inaktive {
            if self.session_freigeben(*port).await.is_ok() {
                tracing::warn!(port, "Inaktive RTP-Session entfernt (Timeout)");
            }
        }

        inaktive
    }

    /// Startet den periodischen Bereinigungs-Task
    ///
    /// Entfernt inaktive Sessions (wenn `timeout` gesetzt ist) und alte
    /// Wiedergabe-Eintraege. Laeuft bis `herunterfahren()` aufgerufen wird.
    pub fn bereinigung_starten(
        &self,
        intervall: Duration,
        timeout: Option<Duration>,
        aufbewahrung: Duration,
    ) -> JoinHandle<()> {
        let broker = self.clone();
        let stopp = self.inner.stopp.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(intervall);
            ticker.tick().await; // Ersten Tick ueberspringen

            loop {
                tokio::select! {
                    _ = stopp.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if let Some(timeout) = timeout {
                    let entfernt = broker.inaktive_bereinigen(timeout).await;
                    if !entfernt.is_empty() {
                        tracing::info!(sessions = entfernt.len(), "Inaktive Sessions bereinigt");
                    }
                }

                let frei = broker.inner.allocator.quarantaene_aufloesen();
                if !frei.is_empty() {
                    tracing::debug!(ports = frei.len(), "RTP-Ports aus Quarantaene freigegeben");
                }

                let alte = broker.inner.tracker.alte_entfernen(aufbewahrung);
                if alte > 0 {
                    tracing::debug!(eintraege = alte, "Alte Wiedergabe-Eintraege entfernt");
                }
            }
        })
    }

    /// Beendet den Bereinigungs-Task und gibt alle Sessions frei
    pub async fn herunterfahren(&self) {
        self.inner.stopp.cancel();

        let ports = self.inner.registry.ports();
        tracing::info!(sessions = ports.len(), "MediaBroker faehrt herunter");
        for port in ports {
            let _ = self.session_freigeben(port).await;
        }
    }
}

/// Wartet auf Lauscher und Wiedergabe-Tasks einer entfernten Session
async fn session_abbauen(session: &Session) {
    let port = session.port();
    if let Some(lauscher) = session.lauscher_nehmen() {
        if let Err(e) = lauscher.await {
            tracing::warn!(port, fehler = %e, "RTP-Lauscher nicht sauber beendet");
        }
    }
    for aufgabe in session.aufgaben_nehmen() {
        if let Err(e) = aufgabe.await {
            tracing::warn!(port, fehler = %e, "Wiedergabe-Task nicht sauber beendet");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
