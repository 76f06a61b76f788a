//! Telemetry history shared by firmware and host targets.
//!
//! A bounded ring of the notable events of this power cycle, each stamped with
//! the clock and the current limit active at the time. The remote `STATUS`
//! command and the emulator read it back; nothing is persisted.

use core::fmt;

use heapless::HistoryBuf;

use crate::clock::Micros;
use crate::controller::CurrentLimit;
use crate::qualifier::FaultCode;
use crate::store::PresetSlot;

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 32;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TelemetryEventKind {
    Qualified,
    Fault(FaultCode),
    Trip,
    PresetCommitted(PresetSlot),
    PresetSaved(PresetSlot),
    DefaultChanged(PresetSlot),
    CountermeasureChanged(bool),
    /// Number of cells rewritten by the boot integrity pass.
    IntegrityRepaired(u8),
    StoreFailure,
    SessionOpened,
    SessionClosed { diagnostic: bool },
}

impl fmt::Display for TelemetryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEventKind::Qualified => f.write_str("qualified"),
            TelemetryEventKind::Fault(code) => write!(f, "fault {code}"),
            TelemetryEventKind::Trip => f.write_str("trip"),
            TelemetryEventKind::PresetCommitted(slot) => write!(f, "preset-committed {slot}"),
            TelemetryEventKind::PresetSaved(slot) => write!(f, "preset-saved {slot}"),
            TelemetryEventKind::DefaultChanged(slot) => write!(f, "default-changed {slot}"),
            TelemetryEventKind::CountermeasureChanged(on) => {
                write!(f, "countermeasure {}", if *on { "on" } else { "off" })
            }
            TelemetryEventKind::IntegrityRepaired(cells) => {
                write!(f, "integrity-repaired {cells}")
            }
            TelemetryEventKind::StoreFailure => f.write_str("store-failure"),
            TelemetryEventKind::SessionOpened => f.write_str("session-opened"),
            TelemetryEventKind::SessionClosed { diagnostic } => {
                if *diagnostic {
                    f.write_str("session-closed diagnostics")
                } else {
                    f.write_str("session-closed")
                }
            }
        }
    }
}

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TelemetryRecord {
    pub at: Micros,
    pub event: TelemetryEventKind,
    pub limit: CurrentLimit,
}

/// Records telemetry events into a fixed-size ring buffer.
pub struct TelemetryRecorder {
    ring: HistoryBuf<TelemetryRecord, TELEMETRY_RING_CAPACITY>,
    trips: u32,
    recorded: u32,
}

impl TelemetryRecorder {
    /// Creates a new telemetry recorder with an empty history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            trips: 0,
            recorded: 0,
        }
    }

    /// Records an event, evicting the oldest once the ring is full.
    ///
    /// A run of consecutive trips keeps only its first record; the count still
    /// advances for every trip.
    pub fn record(&mut self, event: TelemetryEventKind, at: Micros, limit: CurrentLimit) {
        if event == TelemetryEventKind::Trip {
            self.trips = self.trips.saturating_add(1);
            if self.latest().is_some_and(|last| last.event == TelemetryEventKind::Trip) {
                return;
            }
        }
        self.recorded = self.recorded.wrapping_add(1);
        self.ring.write(TelemetryRecord { at, event, limit });
    }

    /// Records written to the ring so far, including evicted ones.
    #[must_use]
    pub const fn recorded(&self) -> u32 {
        self.recorded
    }

    /// Returns the recorded telemetry in chronological order.
    pub fn oldest_first(&self) -> impl Iterator<Item = &TelemetryRecord> + '_ {
        self.ring.oldest_ordered()
    }

    /// Returns the most recent telemetry record, if available.
    pub fn latest(&self) -> Option<&TelemetryRecord> {
        self.ring.recent()
    }

    /// Overcurrent trips seen this power cycle, including evicted records.
    #[must_use]
    pub const fn trip_count(&self) -> u32 {
        self.trips
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

impl Default for TelemetryRecorder {
    fn default() -> Self {
        Self::new()
    }
}
