//! Session-Registry – Port -> Session
//!
//! Reine Buchfuehrung ohne I/O. Alle Zustandsuebergaenge einer Session
//! laufen ueber die Registry, damit sie an einer Stelle geloggt und
//! gezaehlt werden.
//!
//! Thread-safe durch DashMap.

use crate::session::Session;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use mediabroker_core::{BrokerError, BrokerResult, SessionZustand};
use mediabroker_observability::MediaMetrics;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;

/// Zentrale Registry aller offenen RTP-Sessions
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    sessions: DashMap<u16, Arc<Session>>,
    metriken: MediaMetrics,
}

impl SessionRegistry {
    /// Erstellt eine leere Registry
    pub fn neu(metriken: MediaMetrics) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: DashMap::new(),
                metriken,
            }),
        }
    }

    /// Registriert eine neue Session fuer einen bereits gebundenen Socket
    pub fn erstellen(&self, port: u16, socket: UdpSocket) -> BrokerResult<Arc<Session>> {
        match self.inner.sessions.entry(port) {
            Entry::Occupied(_) => Err(BrokerError::PortBelegt(port)),
            Entry::Vacant(eintrag) => {
                let session = Arc::new(Session::neu(port, socket));
                eintrag.insert(Arc::clone(&session));
                self.inner.metriken.sessions_active.inc();
                tracing::info!(port, "RTP-Session registriert");
                Ok(session)
            }
        }
    }

    /// Sucht die Session zu einem Port
    pub fn suchen(&self, port: u16) -> BrokerResult<Arc<Session>> {
        self.inner
            .sessions
            .get(&port)
            .map(|s| s.value().clone())
            .ok_or(BrokerError::SessionNichtGefunden(port))
    }

    /// Entfernt eine Session und schliesst sie
    pub fn entfernen(&self, port: u16) -> Option<Arc<Session>> {
        let (_, session) = self.inner.sessions.remove(&port)?;
        self.schliessen(&session);
        self.inner.metriken.sessions_active.dec();
        tracing::info!(
            port,
            pakete = session.pakete(),
            alter_ms = session.alter().as_millis() as u64,
            "RTP-Session entfernt"
        );
        Some(session)
    }

    // -----------------------------------------------------------------------
    // Zustandsuebergaenge
    // -----------------------------------------------------------------------

    /// Lauscher ist gestartet
    pub fn lauschen_markieren(&self, session: &Session) {
        if session.zustand_vorruecken(SessionZustand::Lauschend) {
            tracing::debug!(port = session.port(), "RTP-Port lauscht");
        }
    }

    /// Verarbeitet ein empfangenes Datagramm
    ///
    /// Das erste Datagramm legt die Remote-Adresse fest; spaetere Absender
    /// aendern sie nicht mehr. Gibt `true` zurueck wenn die Adresse mit
    /// diesem Datagramm gelernt wurde.
    pub fn paket_empfangen(&self, session: &Session, absender: SocketAddr, bytes: usize) -> bool {
        session.paket_zaehlen();
        self.inner.metriken.datagrams_received_total.inc();

        let gelernt = session.remote_setzen(absender);
        if gelernt {
            session.zustand_vorruecken(SessionZustand::RemoteBekannt);
            self.inner.metriken.remote_learned_total.inc();
            tracing::info!(
                port = session.port(),
                remote = %absender,
                "Remote-Adresse gelernt"
            );
        } else if session.remote() != Some(absender) {
            tracing::debug!(
                port = session.port(),
                absender = %absender,
                remote = ?session.remote(),
                "Datagramm von abweichendem Absender ignoriert"
            );
        }

        tracing::trace!(
            port = session.port(),
            absender = %absender,
            bytes,
            "RTP-Datagramm empfangen"
        );
        gelernt
    }

    /// Session hat die Streaming-Phase erreicht
    pub fn streaming_markieren(&self, session: &Session) {
        if session.zustand_vorruecken(SessionZustand::Streaming) {
            tracing::debug!(port = session.port(), "RTP-Session streamt");
        }
    }

    /// Schliesst eine Session: terminaler Zustand, alle Tasks werden abgebrochen
    pub fn schliessen(&self, session: &Session) {
        session.zustand_vorruecken(SessionZustand::Geschlossen);
        session.abbrechen();
    }

    // -----------------------------------------------------------------------
    // Abfragen
    // -----------------------------------------------------------------------

    /// Alle registrierten Ports, aufsteigend sortiert
    pub fn ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.inner.sessions.iter().map(|e| *e.key()).collect();
        ports.sort_unstable();
        ports
    }

    /// Ports aller inaktiven Sessions
    pub fn inaktive(&self, timeout: Duration) -> Vec<u16> {
        self.inner
            .sessions
            .iter()
            .filter(|e| e.value().ist_inaktiv(timeout))
            .map(|e| *e.key())
            .collect()
    }

    pub fn anzahl(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn ist_registriert(&self, port: u16) -> bool {
        self.inner.sessions.contains_key(&port)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
