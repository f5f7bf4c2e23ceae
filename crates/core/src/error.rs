//! Fehlertypen fuer den Mediabroker
//!
//! Zentraler Fehler-Enum fuer alle Zustaende des Session-Lebenszyklus.
//! Synchrone Fehler (Ports erschoepft, Session unbekannt, ungueltige Anfrage)
//! gehen direkt an den Aufrufer. `RemoteUnbekannt` und `Subprozess` treten erst
//! nach der Annahme einer Wiedergabe auf und landen nur in Logs, Metriken und
//! im Wiedergabe-Status.

use thiserror::Error;

/// Globaler Result-Alias fuer den Mediabroker
pub type BrokerResult<T> = std::result::Result<T, BrokerError>;

/// Alle moeglichen Fehler im Mediabroker
#[derive(Debug, Error)]
pub enum BrokerError {
    // --- Port-Vergabe ---
    #[error("Kein freier RTP-Port nach {versuche} Versuchen gefunden")]
    PortsErschoepft { versuche: u32 },

    // --- Sessions ---
    #[error("RTP-Session nicht gefunden: Port {0}")]
    SessionNichtGefunden(u16),

    #[error("Port bereits registriert: {0}")]
    PortBelegt(u16),

    // --- Anfragen ---
    #[error("Ungueltige Anfrage: {0}")]
    UngueltigeAnfrage(String),

    // --- Asynchrone Wiedergabe ---
    #[error("Remote-Adresse nach {wartezeit_ms}ms nicht bekannt")]
    RemoteUnbekannt { wartezeit_ms: u64 },

    #[error("Streaming-Prozess fehlgeschlagen: {0}")]
    Subprozess(String),

    // --- Konfiguration ---
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    // --- Intern ---
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    #[error("Interner Fehler: {0}")]
    Intern(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl BrokerError {
    /// Erstellt einen internen Fehler aus einer beliebigen Nachricht
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Erstellt einen Anfragefehler aus einer beliebigen Nachricht
    pub fn ungueltig(msg: impl Into<String>) -> Self {
        Self::UngueltigeAnfrage(msg.into())
    }

    /// Gibt true zurueck wenn ein spaeterer Versuch erfolgreich sein koennte
    ///
    /// Die Port-Suche ist zufallsbasiert und kann auch bei freien Ports
    /// scheitern.
    pub fn ist_wiederholbar(&self) -> bool {
        matches!(self, Self::PortsErschoepft { .. } | Self::RemoteUnbekannt { .. })
    }

    /// HTTP-Statuscode fuer REST-Antworten
    pub fn http_status(&self) -> u16 {
        match self {
            Self::UngueltigeAnfrage(_) => 400,
            Self::SessionNichtGefunden(_) => 404,
            Self::PortBelegt(_) => 409,
            Self::RemoteUnbekannt { .. } => 504,
            Self::PortsErschoepft { .. }
            | Self::Subprozess(_)
            | Self::Konfiguration(_)
            | Self::Io(_)
            | Self::Intern(_)
            | Self::Anyhow(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fehler_anzeige() {
        let e = BrokerError::SessionNichtGefunden(999);
        assert_eq!(e.to_string(), "RTP-Session nicht gefunden: Port 999");

        let e = BrokerError::PortsErschoepft { versuche: 100 };
        assert!(e.to_string().contains("100 Versuchen"));
    }

    #[test]
    fn wiederholbar_erkennung() {
        assert!(BrokerError::PortsErschoepft { versuche: 1 }.ist_wiederholbar());
        assert!(!BrokerError::SessionNichtGefunden(10000).ist_wiederholbar());
        assert!(!BrokerError::ungueltig("leer").ist_wiederholbar());
    }

    #[test]
    fn http_status_zuordnung() {
        assert_eq!(BrokerError::PortsErschoepft { versuche: 100 }.http_status(), 500);
        assert_eq!(BrokerError::SessionNichtGefunden(1).http_status(), 404);
        assert_eq!(BrokerError::ungueltig("x").http_status(), 400);
        assert_eq!(BrokerError::intern("x").http_status(), 500);
    }

    #[test]
    fn io_fehler_konvertierung() {
        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "belegt");
        let e: BrokerError = io.into();
        assert!(matches!(e, BrokerError::Io(_)));
        assert_eq!(e.http_status(), 500);
    }
}
