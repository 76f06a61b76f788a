//! Persistent preset store.
//!
//! Layout on the byte store, all cells little-endian `u16`:
//!
//! | offset                  | cell                       |
//! |-------------------------|----------------------------|
//! | `PRESET_BASE + 2 * n`   | preset `n` in milliamps    |
//! | after the last preset   | default preset index       |
//! | after the default index | countermeasure flag (0/1)  |
//!
//! Every cell access runs inside [`SignalGate::critical`]; the write cycle that
//! follows a cell write is waited out with the triggers live again. Values are range-checked
//! on the way in and normalized on the way out, so nothing above this layer
//! ever sees an out-of-range preset.

mod memory;

use core::fmt;

pub use memory::{MemoryStore, OutOfBounds};

use crate::config::LimiterConfig;
use crate::controller::CurrentLimit;
use crate::gate::{GateHardware, SignalGate};

/// First byte of the preset table.
pub const PRESET_BASE: u16 = 0x0000;
/// Width of every cell in bytes.
pub const CELL_WIDTH: u16 = 2;
const CELL_BYTES: usize = 2;

/// Byte-addressed non-volatile memory.
pub trait ByteStore {
    type Error: fmt::Debug;

    fn read_bytes(&mut self, address: u16, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Writes within one page, starting at most one internal write cycle.
    fn write_bytes(&mut self, address: u16, data: &[u8]) -> Result<(), Self::Error>;

    /// Blocks until the write cycle started by the last `write_bytes` ends.
    fn settle(&mut self) {}
}

/// Zero-based preset slot index. Displayed and addressed remotely as `1..=count`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PresetSlot(u8);

impl PresetSlot {
    pub const FIRST: Self = Self(0);

    #[must_use]
    pub fn new(index: u8, cfg: &LimiterConfig) -> Option<Self> {
        (index < cfg.preset_count).then_some(Self(index))
    }

    /// Converts a one-based slot number as typed by the operator.
    #[must_use]
    pub fn from_ordinal(ordinal: u32, cfg: &LimiterConfig) -> Option<Self> {
        let index = ordinal.checked_sub(1)?;
        Self::new(u8::try_from(index).ok()?, cfg)
    }

    #[must_use]
    pub const fn index(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn ordinal(self) -> u8 {
        self.0 + 1
    }

    /// Next slot, wrapping to the first after the last.
    #[must_use]
    pub fn next(self, cfg: &LimiterConfig) -> Self {
        if self.0 + 1 >= cfg.preset_count {
            Self::FIRST
        } else {
            Self(self.0 + 1)
        }
    }

    /// All configured slots in order.
    pub fn all(cfg: &LimiterConfig) -> impl Iterator<Item = PresetSlot> {
        (0..cfg.preset_count).map(PresetSlot)
    }
}

impl fmt::Display for PresetSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ordinal())
    }
}

/// Preset store failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreError<E> {
    /// The byte store transport failed.
    Io(E),
    SlotOutOfRange(u8),
    ValueOutOfRange(u16),
}

impl<E: fmt::Debug> fmt::Display for StoreError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(err) => write!(f, "store io {err:?}"),
            StoreError::SlotOutOfRange(slot) => write!(f, "slot {slot} out of range"),
            StoreError::ValueOutOfRange(value) => write!(f, "value {value} out of range"),
        }
    }
}

/// What the boot integrity pass had to rewrite.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IntegrityReport {
    /// Bit `n` set when preset `n` held a value above the maximum.
    pub repaired_slots: u16,
    pub default_reset: bool,
    pub countermeasure_reset: bool,
}

impl IntegrityReport {
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.repaired_slots == 0 && !self.default_reset && !self.countermeasure_reset
    }

    #[must_use]
    pub const fn repaired_count(&self) -> u32 {
        self.repaired_slots.count_ones()
    }
}

/// Typed access to the preset table.
#[derive(Clone, Copy, Debug)]
pub struct PresetStore {
    cfg: LimiterConfig,
}

impl PresetStore {
    #[must_use]
    pub const fn new(cfg: LimiterConfig) -> Self {
        Self { cfg }
    }

    fn slot_address(slot: PresetSlot) -> u16 {
        PRESET_BASE + CELL_WIDTH * u16::from(slot.0)
    }

    fn default_address(&self) -> u16 {
        PRESET_BASE + CELL_WIDTH * u16::from(self.cfg.preset_count)
    }

    fn countermeasure_address(&self) -> u16 {
        self.default_address() + CELL_WIDTH
    }

    fn check_slot<E>(&self, slot: PresetSlot) -> Result<(), StoreError<E>> {
        if slot.0 < self.cfg.preset_count {
            Ok(())
        } else {
            Err(StoreError::SlotOutOfRange(slot.ordinal()))
        }
    }

    /// Reads a preset. A stored value above the maximum reads as zero.
    pub fn load<H>(
        &self,
        signals: &SignalGate,
        hw: &mut H,
        slot: PresetSlot,
    ) -> Result<CurrentLimit, StoreError<H::Error>>
    where
        H: ByteStore + GateHardware + ?Sized,
    {
        self.check_slot(slot)?;
        let raw = read_cell(signals, hw, Self::slot_address(slot))?;
        Ok(CurrentLimit::new(raw, &self.cfg).unwrap_or(CurrentLimit::ZERO))
    }

    pub fn save<H>(
        &self,
        signals: &SignalGate,
        hw: &mut H,
        slot: PresetSlot,
        limit: CurrentLimit,
    ) -> Result<(), StoreError<H::Error>>
    where
        H: ByteStore + GateHardware + ?Sized,
    {
        self.check_slot(slot)?;
        if limit.milliamps() > self.cfg.max_current_ma {
            return Err(StoreError::ValueOutOfRange(limit.milliamps()));
        }
        write_cell(signals, hw, Self::slot_address(slot), limit.milliamps())
    }

    /// Reads the default slot. An out-of-range index reads as the first slot.
    pub fn default_slot<H>(
        &self,
        signals: &SignalGate,
        hw: &mut H,
    ) -> Result<PresetSlot, StoreError<H::Error>>
    where
        H: ByteStore + GateHardware + ?Sized,
    {
        let raw = read_cell(signals, hw, self.default_address())?;
        Ok(u8::try_from(raw)
            .ok()
            .and_then(|index| PresetSlot::new(index, &self.cfg))
            .unwrap_or(PresetSlot::FIRST))
    }

    pub fn set_default<H>(
        &self,
        signals: &SignalGate,
        hw: &mut H,
        slot: PresetSlot,
    ) -> Result<(), StoreError<H::Error>>
    where
        H: ByteStore + GateHardware + ?Sized,
    {
        self.check_slot(slot)?;
        write_cell(signals, hw, self.default_address(), u16::from(slot.0))
    }

    pub fn countermeasure<H>(
        &self,
        signals: &SignalGate,
        hw: &mut H,
    ) -> Result<bool, StoreError<H::Error>>
    where
        H: ByteStore + GateHardware + ?Sized,
    {
        let raw = read_cell(signals, hw, self.countermeasure_address())?;
        Ok(raw == 1)
    }

    pub fn set_countermeasure<H>(
        &self,
        signals: &SignalGate,
        hw: &mut H,
        enabled: bool,
    ) -> Result<(), StoreError<H::Error>>
    where
        H: ByteStore + GateHardware + ?Sized,
    {
        write_cell(signals, hw, self.countermeasure_address(), u16::from(enabled))
    }

    /// Boot-time normalization of every cell.
    ///
    /// Presets above the maximum become zero, an out-of-range default index
    /// becomes the first slot and a countermeasure cell other than 0/1 becomes 0.
    pub fn check_integrity<H>(
        &self,
        signals: &SignalGate,
        hw: &mut H,
    ) -> Result<IntegrityReport, StoreError<H::Error>>
    where
        H: ByteStore + GateHardware + ?Sized,
    {
        let mut report = IntegrityReport::default();
        for slot in PresetSlot::all(&self.cfg) {
            let address = Self::slot_address(slot);
            if read_cell(signals, hw, address)? > self.cfg.max_current_ma {
                write_cell(signals, hw, address, 0)?;
                report.repaired_slots |= 1 << slot.0;
            }
        }

        let default = self.default_address();
        if read_cell(signals, hw, default)? >= u16::from(self.cfg.preset_count) {
            write_cell(signals, hw, default, 0)?;
            report.default_reset = true;
        }

        let countermeasure = self.countermeasure_address();
        if read_cell(signals, hw, countermeasure)? > 1 {
            write_cell(signals, hw, countermeasure, 0)?;
            report.countermeasure_reset = true;
        }
        Ok(report)
    }
}

fn read_cell<H>(
    signals: &SignalGate,
    hw: &mut H,
    address: u16,
) -> Result<u16, StoreError<H::Error>>
where
    H: ByteStore + GateHardware + ?Sized,
{
    let mut cell = [0u8; CELL_BYTES];
    signals
        .critical(hw, |hw| hw.read_bytes(address, &mut cell))
        .map_err(StoreError::Io)?;
    Ok(u16::from_le_bytes(cell))
}

/// Cells are aligned to their width, so a cell never straddles a page.
fn write_cell<H>(
    signals: &SignalGate,
    hw: &mut H,
    address: u16,
    value: u16,
) -> Result<(), StoreError<H::Error>>
where
    H: ByteStore + GateHardware + ?Sized,
{
    signals
        .critical(hw, |hw| hw.write_bytes(address, &value.to_le_bytes()))
        .map_err(StoreError::Io)?;
    hw.settle();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimBoard;

    const CFG: LimiterConfig = LimiterConfig::DEFAULT;

    fn slot(ordinal: u32) -> PresetSlot {
        PresetSlot::from_ordinal(ordinal, &CFG).unwrap()
    }

    #[test]
    fn slot_ordinals_are_one_based() {
        assert_eq!(PresetSlot::from_ordinal(0, &CFG), None);
        assert_eq!(PresetSlot::from_ordinal(1, &CFG), Some(PresetSlot::FIRST));
        assert_eq!(slot(10).index(), 9);
        assert_eq!(PresetSlot::from_ordinal(11, &CFG), None);
        assert_eq!(slot(10).next(&CFG), PresetSlot::FIRST);
    }

    #[test]
    fn erased_store_normalizes_to_factory_defaults() {
        let gate = SignalGate::new();
        let mut board = SimBoard::new(&gate, CFG);
        let store = PresetStore::new(CFG);

        let report = store.check_integrity(&gate, &mut board).unwrap();
        assert_eq!(report.repaired_count(), 10);
        assert!(report.default_reset);
        assert!(report.countermeasure_reset);

        let report = store.check_integrity(&gate, &mut board).unwrap();
        assert!(report.is_clean());
        assert_eq!(store.load(&gate, &mut board, slot(4)), Ok(CurrentLimit::ZERO));
        assert_eq!(store.default_slot(&gate, &mut board), Ok(PresetSlot::FIRST));
        assert_eq!(store.countermeasure(&gate, &mut board), Ok(false));
    }

    #[test]
    fn integrity_pass_leaves_in_range_values_untouched() {
        let gate = SignalGate::new();
        let mut board = SimBoard::new(&gate, CFG);
        let store = PresetStore::new(CFG);
        store.check_integrity(&gate, &mut board).unwrap();

        for (milliamps, ordinal) in [(0u16, 1u32), (1, 2), (9_999, 3), (10_000, 4)] {
            let limit = CurrentLimit::new(milliamps, &CFG).unwrap();
            store.save(&gate, &mut board, slot(ordinal), limit).unwrap();
        }
        board.poke_cell(PRESET_BASE + CELL_WIDTH * 4, 10_001);
        board.poke_cell(PRESET_BASE + CELL_WIDTH * 5, u16::MAX);

        let report = store.check_integrity(&gate, &mut board).unwrap();
        assert_eq!(report.repaired_slots, 0b11_0000);
        assert_eq!(
            store.load(&gate, &mut board, slot(3)).unwrap().milliamps(),
            9_999
        );
        assert_eq!(
            store.load(&gate, &mut board, slot(4)).unwrap().milliamps(),
            10_000
        );
        assert_eq!(board.peek_cell(PRESET_BASE + CELL_WIDTH * 4), 0);
    }

    #[test]
    fn load_never_returns_out_of_range_values() {
        let gate = SignalGate::new();
        let mut board = SimBoard::new(&gate, CFG);
        let store = PresetStore::new(CFG);
        board.poke_cell(PRESET_BASE, 12_345);
        assert_eq!(store.load(&gate, &mut board, slot(1)), Ok(CurrentLimit::ZERO));
    }

    #[test]
    fn store_access_runs_with_triggers_masked() {
        let gate = SignalGate::new();
        let mut board = SimBoard::new(&gate, CFG);
        let store = PresetStore::new(CFG);
        gate.enable_triggers(&mut board);

        store.set_default(&gate, &mut board, slot(7)).unwrap();
        assert!(board.store_accessed_with_triggers_masked());
        assert!(gate.triggers_enabled());
        assert_eq!(store.default_slot(&gate, &mut board), Ok(slot(7)));
    }

    #[test]
    fn write_cycles_are_waited_out_with_triggers_live() {
        let gate = SignalGate::new();
        let mut board = SimBoard::new(&gate, CFG);
        let store = PresetStore::new(CFG);
        gate.enable_triggers(&mut board);

        let report = store.check_integrity(&gate, &mut board).unwrap();
        assert_eq!(report.repaired_count(), 10);
        assert_eq!(board.write_cycles(), 12);
        assert_eq!(board.masked_write_cycles(), 0);
        assert!(board.store_accessed_with_triggers_masked());

        // Crossings during the waits still reach the gate.
        assert!(gate.zero_cross.is_raised());
        assert!(board.triggers_unmasked());
    }

    #[test]
    fn reads_start_no_write_cycle() {
        let gate = SignalGate::new();
        let mut board = SimBoard::new(&gate, CFG);
        let store = PresetStore::new(CFG);
        let before = board.elapsed();
        let _ = store.load(&gate, &mut board, slot(1)).unwrap();
        assert_eq!(board.write_cycles(), 0);
        assert_eq!(board.elapsed(), before);
    }

    #[test]
    fn countermeasure_cell_round_trips() {
        let gate = SignalGate::new();
        let mut board = SimBoard::new(&gate, CFG);
        let store = PresetStore::new(CFG);
        store.set_countermeasure(&gate, &mut board, true).unwrap();
        assert_eq!(store.countermeasure(&gate, &mut board), Ok(true));
        assert_eq!(board.peek_cell(PRESET_BASE + CELL_WIDTH * 11), 1);
    }

    #[test]
    fn io_failures_surface_as_store_errors() {
        let gate = SignalGate::new();
        let mut board = SimBoard::new(&gate, CFG);
        let store = PresetStore::new(CFG);
        board.fail_store(true);
        assert!(matches!(
            store.load(&gate, &mut board, slot(1)),
            Err(StoreError::Io(_))
        ));
    }
}
