//! mediabroker-core – Gemeinsame Typen und Fehlertypen
//!
//! Dieses Crate stellt die Bausteine bereit, die von allen anderen
//! Mediabroker-Crates gemeinsam genutzt werden.

pub mod error;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use error::{BrokerError, BrokerResult};
pub use types::{PlaybackId, PlaybackPhase, PlaybackStatus, SessionInfo, SessionZustand};
