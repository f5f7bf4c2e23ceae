//! mediabroker-rtp – Lebenszyklus von RTP-Medien-Sessions
//!
//! Komponenten:
//! - `pool`       – Port-Pool und zufallsbasierte Port-Vergabe (gerade Ports)
//! - `session`    – Zustand einer Session (Socket, Remote-Adresse, Tasks)
//! - `registry`   – Port -> Session, alle Zustandsuebergaenge
//! - `learner`    – UDP-Empfangs-Task, lernt die Remote-Adresse
//! - `scheduler`  – nimmt Wiedergaben an, wartet auf die Remote-Adresse
//! - `supervisor` – startet den Streaming-Prozess (ffmpeg) und raeumt auf
//! - `tracker`    – abfragbarer Status angenommener Wiedergaben
//! - `broker`     – Fassade fuer die API-Schicht

pub mod broker;
pub mod learner;
pub mod pool;
pub mod registry;
pub mod scheduler;
pub mod session;
pub mod supervisor;
pub mod tracker;

pub use broker::{BrokerKonfig, MediaBroker, STANDARD_BIND_VERSUCHE};
pub use learner::{RemoteAddressLearner, UDP_BUFFER_SIZE};
pub use pool::{PortAllocator, PortBereich, PortPool, STANDARD_QUARANTAENE, STANDARD_VERSUCHE};
pub use registry::SessionRegistry;
pub use scheduler::{PlaybackScheduler, WarteKonfig, STANDARD_FORMAT};
pub use session::Session;
pub use supervisor::{StreamAusgang, StreamErgebnis, StreamKonfig, StreamSupervisor};
pub use tracker::PlaybackTracker;
