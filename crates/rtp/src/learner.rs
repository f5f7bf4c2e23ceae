//! Remote-Adress-Lerner – UDP-Empfangs-Task pro Session
//!
//! ```text
//! UDP Socket (recv_from)
//!     |
//!     v
//! SessionRegistry::paket_empfangen()  <- erstes Datagramm legt Remote fest
//! ```
//!
//! Der Inhalt der Datagramme wird nicht interpretiert (kein RTP-Parsing),
//! nur Absender und Groesse zaehlen.

use crate::registry::SessionRegistry;
use crate::session::Session;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Empfangspuffer pro Datagramm
pub const UDP_BUFFER_SIZE: usize = 2048;

/// Startet und betreibt den Empfangs-Task einer Session
pub struct RemoteAddressLearner;

impl RemoteAddressLearner {
    /// Startet den Empfangs-Task
    ///
    /// Der Task laeuft bis das Abbruch-Token der Session ausgeloest wird.
    pub fn starten(registry: SessionRegistry, session: Arc<Session>) -> JoinHandle<()> {
        tokio::spawn(async move {
            Self::empfangs_loop(&registry, &session).await;
        })
    }

    async fn empfangs_loop(registry: &SessionRegistry, session: &Session) {
        let socket = session.socket();
        let abbruch = session.abbruch_token();
        // Puffer wird fuer alle Datagramme wiederverwendet
        let mut buf = [0u8; UDP_BUFFER_SIZE];

        registry.lauschen_markieren(session);
        tracing::info!(port = session.port(), "RTP-Lauscher gestartet");

        loop {
            tokio::select! {
                biased;

                _ = abbruch.cancelled() => break,

                ergebnis = socket.recv_from(&mut buf) => {
                    match ergebnis {
                        Ok((len, absender)) => {
                            registry.paket_empfangen(session, absender, len);
                        }
                        Err(e) => {
                            tracing::warn!(
                                port = session.port(),
                                fehler = %e,
                                "UDP-Empfangsfehler"
                            );
                            // Kurze Pause gegen Busy-Loop bei persistentem Fehler
                            tokio::time::sleep(Duration::from_millis(1)).await;
                        }
                    }
                }
            }
        }

        tracing::debug!(
            port = session.port(),
            pakete = session.pakete(),
            "RTP-Lauscher beendet"
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
