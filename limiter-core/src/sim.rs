//! Deterministic simulation board.
//!
//! Implements every collaborator trait on top of a virtual microsecond clock.
//! `delay` advances time and fires the zero-cross and overcurrent handlers of
//! the shared [`SignalGate`] exactly when the scripted line waveform and the
//! comparator model say so. Used by the tests and by the host emulator.

use core::fmt::Write as _;
use core::time::Duration;

use heapless::{Deque, String, Vec};

use crate::clock::{Clock, Micros};
use crate::config::LimiterConfig;
use crate::controller::{DutyDriver, StopSignal};
use crate::display::{Content, Region, Screen, Style};
use crate::gate::{Edge, EdgeMode, GateHardware, SignalGate};
use crate::hold::Button;
use crate::repl::RemoteLink;
use crate::store::{ByteStore, MemoryStore, OutOfBounds, CELL_WIDTH, PRESET_BASE};

/// Width of the detector pulse emitted at every zero crossing.
pub const PULSE_WIDTH: Duration = Duration::from_micros(500);
/// Backing size of the simulated EEPROM.
pub const SIM_STORE_BYTES: usize = 256;
/// Internal write cycle of the simulated EEPROM.
pub const WRITE_CYCLE: Duration = Duration::from_millis(5);

const FRAME_TEXT: usize = 32;
const REPLY_TEXT: usize = 96;
const MAX_REPLIES: usize = 64;
const MAX_FRAMES: usize = 64;

/// Scripted line waveform as seen by the zero-cross detector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineModel {
    /// One detector pulse per crossing: falling edge at every half period,
    /// rising edge one pulse width later.
    Mains { half_period: Duration },
    /// A single falling transition, then nothing.
    SingleEdge { at: Duration },
    /// Rising transitions midway through every half period and no falling
    /// ones, as from a detector whose falling edge never arrives.
    RisingOnly { half_period: Duration },
    /// No transitions at all.
    Flat,
}

impl LineModel {
    #[must_use]
    pub const fn mains(half_period: Duration) -> Self {
        LineModel::Mains { half_period }
    }

    fn edge(&self, index: u64) -> Option<(u64, Edge)> {
        match *self {
            LineModel::Mains { half_period } => {
                let half = micros(half_period);
                let pulse = micros(PULSE_WIDTH).min(half / 4);
                let crossing = (index / 2 + 1).checked_mul(half)?;
                if index % 2 == 0 {
                    Some((crossing, Edge::Falling))
                } else {
                    Some((crossing + pulse, Edge::Rising))
                }
            }
            LineModel::SingleEdge { at } => (index == 0).then(|| (micros(at), Edge::Falling)),
            LineModel::RisingOnly { half_period } => {
                let half = micros(half_period);
                let at = index.checked_mul(half)?.checked_add(half / 2)?;
                Some((at, Edge::Rising))
            }
            LineModel::Flat => None,
        }
    }
}

/// Behaviour of the sensed current against the programmed limit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SenseModel {
    /// A load drawing `milliamps`; the comparator trips `rise` after the
    /// actuator switches on whenever the load exceeds the limit.
    Load { milliamps: u16, rise: Duration },
    /// The comparator reads high whenever the limit is at or above `milliamps`.
    Crossover { milliamps: u16 },
    /// The comparator never trips.
    Quiet,
}

impl SenseModel {
    #[must_use]
    pub const fn load(milliamps: u16) -> Self {
        SenseModel::Load {
            milliamps,
            rise: Duration::from_millis(2),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub region: Region,
    pub style: Style,
    pub text: String<FRAME_TEXT>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimStoreError {
    Injected,
    OutOfBounds(u16),
}

impl From<OutOfBounds> for SimStoreError {
    fn from(error: OutOfBounds) -> Self {
        SimStoreError::OutOfBounds(error.address)
    }
}

#[derive(Clone, Copy, Debug)]
struct ScriptedPress {
    start: u64,
    release: u64,
}

/// Host-side board with a virtual clock.
pub struct SimBoard<'g> {
    signals: &'g SignalGate,
    cfg: LimiterConfig,
    now: u64,
    line: LineModel,
    line_origin: u64,
    next_edge: u64,
    sense: SenseModel,
    output: bool,
    output_since: u64,
    triggers: bool,
    edge_mode: EdgeMode,
    comparator: bool,
    synthetic: bool,
    duty: Option<(u16, u16)>,
    applied_limit: u16,
    max_applied_limit: u16,
    store: MemoryStore<SIM_STORE_BYTES>,
    store_fails: bool,
    unmasked_store_access: bool,
    write_pending: bool,
    write_cycles: u32,
    masked_write_cycles: u32,
    presses: Vec<ScriptedPress, 8>,
    stop_countdown: Option<u32>,
    rx: Deque<u8, 256>,
    replies: Deque<String<REPLY_TEXT>, MAX_REPLIES>,
    frames: Deque<Frame, MAX_FRAMES>,
    latest: [Option<Frame>; 4],
}

impl<'g> SimBoard<'g> {
    /// Nominal mains, quiet comparator, erased store.
    #[must_use]
    pub fn new(signals: &'g SignalGate, cfg: LimiterConfig) -> Self {
        Self {
            signals,
            cfg,
            now: 0,
            line: LineModel::mains(cfg.nominal_half_period),
            line_origin: 0,
            next_edge: 0,
            sense: SenseModel::Quiet,
            output: false,
            output_since: 0,
            triggers: false,
            edge_mode: EdgeMode::Either,
            comparator: false,
            synthetic: false,
            duty: None,
            applied_limit: 0,
            max_applied_limit: 0,
            store: MemoryStore::erased(),
            store_fails: false,
            unmasked_store_access: false,
            write_pending: false,
            write_cycles: 0,
            masked_write_cycles: 0,
            presses: Vec::new(),
            stop_countdown: None,
            rx: Deque::new(),
            replies: Deque::new(),
            frames: Deque::new(),
            latest: [None, None, None, None],
        }
    }

    #[must_use]
    pub fn with_line(mut self, line: LineModel) -> Self {
        self.set_line(line);
        self
    }

    #[must_use]
    pub fn with_sense(mut self, sense: SenseModel) -> Self {
        self.sense = sense;
        self
    }

    /// Replaces the line waveform, starting a fresh cycle at the current time.
    pub fn set_line(&mut self, line: LineModel) {
        self.line = line;
        self.line_origin = self.now;
        self.next_edge = 0;
    }

    pub fn set_sense(&mut self, sense: SenseModel) {
        self.sense = sense;
        self.update_comparator();
    }

    /// Virtual time since construction.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        Duration::from_micros(self.now)
    }

    #[must_use]
    pub fn output_on(&self) -> bool {
        self.output
    }

    #[must_use]
    pub fn triggers_unmasked(&self) -> bool {
        self.triggers
    }

    #[must_use]
    pub fn synthetic_edges(&self) -> bool {
        self.synthetic
    }

    /// Last duty code and phase offset written to the driver.
    #[must_use]
    pub fn duty(&self) -> Option<(u16, u16)> {
        self.duty
    }

    /// Highest limit ever applied through the duty driver.
    #[must_use]
    pub fn max_applied_limit(&self) -> u16 {
        self.max_applied_limit
    }

    /// Writes raw preset cells, then the default index and countermeasure cells.
    pub fn seed_store(&mut self, presets: &[u16], default_index: u16, countermeasure: u16) {
        for index in 0..self.cfg.preset_count {
            let value = presets.get(usize::from(index)).copied().unwrap_or(0);
            self.poke_cell(PRESET_BASE + CELL_WIDTH * u16::from(index), value);
        }
        let default_address = PRESET_BASE + CELL_WIDTH * u16::from(self.cfg.preset_count);
        self.poke_cell(default_address, default_index);
        self.poke_cell(default_address + CELL_WIDTH, countermeasure);
    }

    pub fn poke_cell(&mut self, address: u16, value: u16) {
        let _ = self.store.write_bytes(address, &value.to_le_bytes());
    }

    #[must_use]
    pub fn peek_cell(&mut self, address: u16) -> u16 {
        let mut cell = [0u8; 2];
        let _ = self.store.read_bytes(address, &mut cell);
        u16::from_le_bytes(cell)
    }

    /// Makes every store access fail until cleared.
    pub fn fail_store(&mut self, fail: bool) {
        self.store_fails = fail;
    }

    /// `true` once the store has been touched with the triggers unmasked.
    #[must_use]
    pub fn store_accessed_with_triggers_masked(&self) -> bool {
        !self.unmasked_store_access
    }

    /// Write cycles waited out so far.
    #[must_use]
    pub fn write_cycles(&self) -> u32 {
        self.write_cycles
    }

    /// Write cycles that were waited out with the triggers masked.
    #[must_use]
    pub fn masked_write_cycles(&self) -> u32 {
        self.masked_write_cycles
    }

    /// Schedules a press starting `after` from now and held for `hold`.
    pub fn press_after(&mut self, after: Duration, hold: Duration) {
        let start = self.now + micros(after);
        let _ = self.presses.push(ScriptedPress {
            start,
            release: start + micros(hold),
        });
    }

    /// Requests a stop once `polls` stop checks have passed.
    pub fn stop_after(&mut self, polls: u32) {
        self.stop_countdown = Some(polls);
    }

    /// Queues a line on the receive side, CR terminated.
    pub fn send_line(&mut self, line: &str) {
        for byte in line.bytes().chain(core::iter::once(b'\r')) {
            let _ = self.rx.push_back(byte);
        }
    }

    /// Takes every reply line written so far.
    pub fn drain_replies(&mut self) -> Vec<String<REPLY_TEXT>, MAX_REPLIES> {
        let mut lines = Vec::new();
        while let Some(line) = self.replies.pop_front() {
            let _ = lines.push(line);
        }
        lines
    }

    /// Takes every frame rendered so far.
    pub fn drain_frames(&mut self) -> Vec<Frame, MAX_FRAMES> {
        let mut frames = Vec::new();
        while let Some(frame) = self.frames.pop_front() {
            let _ = frames.push(frame);
        }
        frames
    }

    /// Most recent text drawn into `region`.
    #[must_use]
    pub fn shown(&self, region: Region) -> Option<&str> {
        self.latest[region_index(region)]
            .as_ref()
            .map(|frame| frame.text.as_str())
    }

    /// Most recent frame drawn into `region`.
    #[must_use]
    pub fn frame(&self, region: Region) -> Option<&Frame> {
        self.latest[region_index(region)].as_ref()
    }

    fn advance_to(&mut self, target: u64) {
        loop {
            let edge = self
                .line
                .edge(self.next_edge)
                .map(|(at, edge)| (self.line_origin + at, edge))
                .filter(|(at, _)| *at <= target);
            let rise = self.pending_rise().filter(|at| *at <= target);

            match (edge, rise) {
                (Some((edge_at, _)), Some(rise_at)) if rise_at <= edge_at => {
                    self.now = rise_at;
                    self.update_comparator();
                }
                (Some((edge_at, edge)), _) => {
                    self.now = edge_at;
                    self.next_edge += 1;
                    self.fire_edge(edge);
                    self.update_comparator();
                }
                (None, Some(rise_at)) => {
                    self.now = rise_at;
                    self.update_comparator();
                }
                (None, None) => break,
            }
        }
        self.now = target;
        self.update_comparator();
    }

    fn pending_rise(&self) -> Option<u64> {
        match self.sense {
            SenseModel::Load { milliamps, rise }
                if self.output && !self.comparator && milliamps > self.applied_limit =>
            {
                let at = self.output_since + micros(rise);
                (at > self.now).then_some(at)
            }
            _ => None,
        }
    }

    fn fire_edge(&mut self, edge: Edge) {
        if self.triggers && self.edge_mode.accepts(edge) {
            let signals = self.signals;
            let at = self.timestamp();
            signals.on_zero_cross(at, |on| self.drive_output(on));
        }
    }

    fn drive_output(&mut self, on: bool) {
        if on && !self.output {
            self.output_since = self.now;
        }
        self.output = on;
    }

    fn comparator_level(&self) -> bool {
        match self.sense {
            SenseModel::Load { milliamps, rise } => {
                self.output
                    && milliamps > self.applied_limit
                    && self.now >= self.output_since + micros(rise)
            }
            SenseModel::Crossover { milliamps } => self.applied_limit >= milliamps,
            SenseModel::Quiet => false,
        }
    }

    fn update_comparator(&mut self) {
        let level = self.comparator_level();
        if level && !self.comparator && self.triggers {
            let signals = self.signals;
            let at = self.timestamp();
            signals.on_overcurrent(at, || self.drive_output(false));
        }
        self.comparator = level;
    }

    fn timestamp(&self) -> Micros {
        u32::try_from(self.now & u64::from(u32::MAX)).unwrap_or(0)
    }

    fn store_access(&mut self) -> Result<(), SimStoreError> {
        if self.triggers {
            self.unmasked_store_access = true;
        }
        if self.store_fails {
            Err(SimStoreError::Injected)
        } else {
            Ok(())
        }
    }
}

impl Clock for SimBoard<'_> {
    fn now(&self) -> Micros {
        self.timestamp()
    }

    fn delay(&mut self, duration: Duration) {
        let target = self.now.saturating_add(micros(duration));
        self.advance_to(target);
    }
}

impl GateHardware for SimBoard<'_> {
    fn set_output(&mut self, on: bool) {
        self.drive_output(on);
        self.update_comparator();
    }

    fn set_triggers(&mut self, enabled: bool) {
        self.triggers = enabled;
    }

    fn set_edge(&mut self, mode: EdgeMode) {
        self.edge_mode = mode;
    }

    fn overcurrent_level(&mut self) -> bool {
        self.comparator_level()
    }

    fn use_synthetic_edges(&mut self, half_period: Duration) {
        self.synthetic = true;
        self.set_line(LineModel::mains(half_period));
    }
}

impl DutyDriver for SimBoard<'_> {
    fn set_duty(&mut self, code: u16, phase_offset: u16) {
        self.duty = Some((code, phase_offset));
        self.applied_limit = self
            .cfg
            .max_current_ma
            .saturating_add(1)
            .saturating_sub(code);
        self.max_applied_limit = self.max_applied_limit.max(self.applied_limit);
        self.update_comparator();
    }
}

impl StopSignal for SimBoard<'_> {
    fn stop_requested(&mut self) -> bool {
        if let Some(remaining) = self.stop_countdown {
            if remaining == 0 {
                self.stop_countdown = None;
                return true;
            }
            self.stop_countdown = Some(remaining - 1);
        }
        let input = matches!(self.read_byte(), Some(byte) if byte != b'\r' && byte != b'\n');
        input || self.pressed()
    }
}

impl Button for SimBoard<'_> {
    fn pressed(&mut self) -> bool {
        let now = self.now;
        self.presses.retain(|press| press.release > now);
        self.presses.iter().any(|press| press.start <= now)
    }
}

impl ByteStore for SimBoard<'_> {
    type Error = SimStoreError;

    fn read_bytes(&mut self, address: u16, buf: &mut [u8]) -> Result<(), Self::Error> {
        self.store_access()?;
        Ok(self.store.read_bytes(address, buf)?)
    }

    fn write_bytes(&mut self, address: u16, data: &[u8]) -> Result<(), Self::Error> {
        self.store_access()?;
        self.store.write_bytes(address, data)?;
        self.write_pending = true;
        Ok(())
    }

    fn settle(&mut self) {
        if !core::mem::take(&mut self.write_pending) {
            return;
        }
        self.write_cycles += 1;
        if !self.triggers {
            self.masked_write_cycles += 1;
        }
        self.delay(WRITE_CYCLE);
    }
}

impl Screen for SimBoard<'_> {
    fn render(&mut self, content: Content<'_>, region: Region, style: Style) {
        let mut text = String::new();
        let _ = write!(text, "{content}");
        let frame = Frame {
            region,
            style,
            text,
        };
        if self.frames.is_full() {
            self.frames.pop_front();
        }
        let _ = self.frames.push_back(frame.clone());
        self.latest[region_index(region)] = Some(frame);
    }
}

impl RemoteLink for SimBoard<'_> {
    fn read_byte(&mut self) -> Option<u8> {
        self.rx.pop_front()
    }

    fn write_line(&mut self, line: &str) {
        let mut text = String::new();
        let _ = text.push_str(line);
        if self.replies.is_full() {
            self.replies.pop_front();
        }
        let _ = self.replies.push_back(text);
    }
}

const fn region_index(region: Region) -> usize {
    match region {
        Region::Title => 0,
        Region::Value => 1,
        Region::Status => 2,
        Region::Detail => 3,
    }
}

fn micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}
