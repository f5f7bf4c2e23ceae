//! Port-Pool und Port-Allocator
//!
//! Der `PortPool` ist die einzige Stelle, an der belegte Ports gefuehrt
//! werden. Er wird in den `PortAllocator` injiziert statt als globaler
//! Zustand herumzuliegen.
//!
//! Die Suche ist zufallsbasiert: Kandidaten werden gleichverteilt aus
//! `[min, max]` gezogen, nur gerade Ports werden akzeptiert (RTP auf dem
//! geraden Port, RTCP auf dem folgenden ungeraden). Pruefen und Belegen
//! passiert unter einem Lock (compare-and-insert).
//!
//! Freigegebene Ports einer Session gehen zuerst in Quarantaene und bleiben
//! bis zum Ablauf der Abklingzeit belegt. Verspaetete Pakete des alten
//! Gespraechs landen so nicht als "erstes Paket" in der naechsten Session.

use mediabroker_core::{BrokerError, BrokerResult};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Standard-Versuchsbudget pro Zuweisung
pub const STANDARD_VERSUCHE: u32 = 100;

/// Standard-Abklingzeit freigegebener Ports
pub const STANDARD_QUARANTAENE: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// PortPool
// ---------------------------------------------------------------------------

/// Synchronisierte Menge belegter Ports
///
/// Ports in Quarantaene zaehlen als belegt.
#[derive(Clone, Default)]
pub struct PortPool {
    inner: Arc<Mutex<PoolZustand>>,
}

#[derive(Default)]
struct PoolZustand {
    belegt: HashSet<u16>,
    /// Port -> Zeitpunkt der Quarantaene
    quarantaene: HashMap<u16, Instant>,
}

impl PortPool {
    /// Erstellt einen leeren Pool
    pub fn neu() -> Self {
        Self::default()
    }

    /// Belegt einen Port, falls er frei ist
    ///
    /// Gibt `false` zurueck wenn der Port bereits belegt war.
    pub fn reservieren(&self, port: u16) -> bool {
        self.inner.lock().belegt.insert(port)
    }

    /// Gibt einen Port sofort frei (idempotent), auch aus der Quarantaene
    ///
    /// Gibt `true` zurueck wenn der Port belegt war.
    pub fn freigeben(&self, port: u16) -> bool {
        let mut zustand = self.inner.lock();
        zustand.quarantaene.remove(&port);
        zustand.belegt.remove(&port)
    }

    /// Stellt einen belegten Port unter Quarantaene
    ///
    /// Gibt `false` zurueck wenn der Port nicht belegt war.
    pub fn quarantaene(&self, port: u16) -> bool {
        let mut zustand = self.inner.lock();
        if !zustand.belegt.contains(&port) {
            return false;
        }
        zustand.quarantaene.entry(port).or_insert_with(Instant::now);
        true
    }

    /// Gibt alle Ports frei, deren Quarantaene laenger als `abklingzeit` laeuft
    pub fn quarantaene_aufloesen(&self, abklingzeit: Duration) -> Vec<u16> {
        let jetzt = Instant::now();
        let mut zustand = self.inner.lock();
        let PoolZustand {
            belegt,
            quarantaene,
        } = &mut *zustand;

        let mut frei = Vec::new();
        quarantaene.retain(|&port, seit| {
            if jetzt.duration_since(*seit) >= abklingzeit {
                belegt.remove(&port);
                frei.push(port);
                false
            } else {
                true
            }
        });
        frei.sort_unstable();
        frei
    }

    /// Prueft ob ein Port belegt ist
    pub fn ist_belegt(&self, port: u16) -> bool {
        self.inner.lock().belegt.contains(&port)
    }

    pub fn in_quarantaene(&self, port: u16) -> bool {
        self.inner.lock().quarantaene.contains_key(&port)
    }

    /// Anzahl belegter Ports (inklusive Quarantaene)
    pub fn anzahl(&self) -> usize {
        self.inner.lock().belegt.len()
    }

    pub fn quarantaene_anzahl(&self) -> usize {
        self.inner.lock().quarantaene.len()
    }

    /// Alle belegten Ports, aufsteigend sortiert
    pub fn belegte_ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.inner.lock().belegt.iter().copied().collect();
        ports.sort_unstable();
        ports
    }

    /// Anzahl belegter gerader Ports innerhalb eines Bereichs
    fn belegt_in(&self, bereich: &PortBereich) -> usize {
        self.inner
            .lock()
            .belegt
            .iter()
            .filter(|&&p| p % 2 == 0 && bereich.enthaelt(p))
            .count()
    }
}

// ---------------------------------------------------------------------------
// PortBereich
// ---------------------------------------------------------------------------

/// Geschlossener Port-Bereich `[min, max]` mit mindestens einem geraden Port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortBereich {
    min: u16,
    max: u16,
}

impl PortBereich {
    /// Validiert und erstellt einen Bereich
    pub fn neu(min: u16, max: u16) -> BrokerResult<Self> {
        if min > max {
            return Err(BrokerError::Konfiguration(format!(
                "RTP-Portbereich ungueltig: min ({min}) > max ({max})"
            )));
        }
        let bereich = Self { min, max };
        if bereich.gerade_ports() == 0 {
            return Err(BrokerError::Konfiguration(format!(
                "RTP-Portbereich {min}-{max} enthaelt keinen geraden Port"
            )));
        }
        Ok(bereich)
    }

    pub fn min(&self) -> u16 {
        self.min
    }

    pub fn max(&self) -> u16 {
        self.max
    }

    /// Prueft ob ein Port im Bereich liegt
    pub fn enthaelt(&self, port: u16) -> bool {
        (self.min..=self.max).contains(&port)
    }

    /// Anzahl gerader Ports im Bereich (= Kapazitaet)
    pub fn gerade_ports(&self) -> usize {
        let erster = u32::from(self.min) + u32::from(self.min % 2);
        let max = u32::from(self.max);
        if erster > max {
            0
        } else {
            ((max - erster) / 2 + 1) as usize
        }
    }
}

// ---------------------------------------------------------------------------
// PortAllocator
// ---------------------------------------------------------------------------

/// Waehlt freie gerade Ports aus einem Bereich
#[derive(Clone)]
pub struct PortAllocator {
    pool: PortPool,
    bereich: PortBereich,
    versuche: u32,
    abklingzeit: Duration,
}

impl PortAllocator {
    /// Erstellt einen Allocator ueber dem gegebenen Pool (ohne Quarantaene)
    pub fn neu(pool: PortPool, bereich: PortBereich, versuche: u32) -> Self {
        Self {
            pool,
            bereich,
            versuche,
            abklingzeit: Duration::ZERO,
        }
    }

    /// Setzt die Abklingzeit fuer `zuruecklegen`
    pub fn mit_abklingzeit(mut self, abklingzeit: Duration) -> Self {
        self.abklingzeit = abklingzeit;
        self
    }

    pub fn abklingzeit(&self) -> Duration {
        self.abklingzeit
    }

    /// Weist einen freien geraden Port zu
    ///
    /// Scheitert mit `PortsErschoepft` wenn das Versuchsbudget aufgebraucht
    /// ist. Das kann auch bei freien Ports passieren, der Aufrufer sollte es
    /// spaeter erneut versuchen. Sind alle geraden Ports belegt, scheitert
    /// die Zuweisung sofort.
    pub fn zuweisen(&self) -> BrokerResult<u16> {
        self.quarantaene_aufloesen();

        let kapazitaet = self.bereich.gerade_ports();
        if self.pool.belegt_in(&self.bereich) >= kapazitaet {
            tracing::warn!(
                min = self.bereich.min,
                max = self.bereich.max,
                kapazitaet,
                quarantaene = self.pool.quarantaene_anzahl(),
                "Alle RTP-Ports belegt"
            );
            return Err(BrokerError::PortsErschoepft { versuche: 0 });
        }

        let mut rng = rand::thread_rng();
        for _ in 0..self.versuche {
            let kandidat = rng.gen_range(self.bereich.min..=self.bereich.max);
            if kandidat % 2 != 0 {
                continue;
            }
            if self.pool.reservieren(kandidat) {
                tracing::debug!(port = kandidat, "RTP-Port reserviert");
                return Ok(kandidat);
            }
        }

        tracing::warn!(
            versuche = self.versuche,
            belegt = self.pool.anzahl(),
            "Kein freier RTP-Port innerhalb des Versuchsbudgets"
        );
        Err(BrokerError::PortsErschoepft {
            versuche: self.versuche,
        })
    }

    /// Gibt einen Port frei (idempotent)
    pub fn freigeben(&self, port: u16) -> bool {
        let war_belegt = self.pool.freigeben(port);
        if war_belegt {
            tracing::debug!(port, "RTP-Port freigegeben");
        }
        war_belegt
    }

    /// Gibt den Port einer beendeten Session zurueck
    ///
    /// Mit Abklingzeit landet der Port in Quarantaene, sonst ist er sofort
    /// wieder frei.
    pub fn zuruecklegen(&self, port: u16) -> bool {
        if self.abklingzeit.is_zero() {
            return self.freigeben(port);
        }
        let war_belegt = self.pool.quarantaene(port);
        if war_belegt {
            tracing::debug!(port, abklingzeit_ms = self.abklingzeit.as_millis() as u64, "RTP-Port in Quarantaene");
        }
        war_belegt
    }

    /// Gibt Ports frei, deren Abklingzeit abgelaufen ist
    pub fn quarantaene_aufloesen(&self) -> Vec<u16> {
        let frei = self.pool.quarantaene_aufloesen(self.abklingzeit);
        for port in &frei {
            tracing::debug!(port, "RTP-Port aus Quarantaene freigegeben");
        }
        frei
    }

    pub fn pool(&self) -> &PortPool {
        &self.pool
    }

    pub fn bereich(&self) -> PortBereich {
        self.bereich
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
