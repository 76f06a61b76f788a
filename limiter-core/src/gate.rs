//! Signal acquisition and actuator gate.
//!
//! Two edge-triggered handlers share state with the foreground through
//! [`SignalGate`]: the zero-cross handler raises its flag and re-drives the
//! actuator to the foreground's latest request, the overcurrent handler cuts
//! the actuator and raises its flag. Handlers only ever raise flags or drive
//! the output off, the foreground only ever clears flags or requests the
//! output on. Plain atomic loads and stores are enough for that pattern, which
//! keeps the type usable on cores without compare-and-swap.
//!
//! Disabling both triggers is the only lock in the system. [`SignalGate::critical`]
//! wraps a closure in that disable/restore pair and always forces the actuator
//! off while the triggers are down.

use core::time::Duration;

use portable_atomic::{AtomicBool, AtomicU32, Ordering};

use crate::clock::Micros;

/// Polarity transitions that fire the zero-cross trigger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EdgeMode {
    Either,
    Rising,
    Falling,
}

impl EdgeMode {
    /// Returns `true` when a transition of the given polarity fires the trigger.
    #[must_use]
    pub const fn accepts(self, edge: Edge) -> bool {
        matches!(
            (self, edge),
            (EdgeMode::Either, _) | (EdgeMode::Rising, Edge::Rising) | (EdgeMode::Falling, Edge::Falling)
        )
    }
}

/// Direction of a single line transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Edge {
    Rising,
    Falling,
}

/// Sticky event flag with the timestamp of its last assertion.
#[derive(Debug)]
pub struct EventFlag {
    raised: AtomicBool,
    at: AtomicU32,
}

impl EventFlag {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            raised: AtomicBool::new(false),
            at: AtomicU32::new(0),
        }
    }

    /// Asserts the flag. Called from handler context only.
    pub fn raise(&self, at: Micros) {
        self.at.store(at, Ordering::Relaxed);
        self.raised.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }

    /// Time of the most recent assertion while the flag is still raised.
    #[must_use]
    pub fn raised_at(&self) -> Option<Micros> {
        self.is_raised().then(|| self.at.load(Ordering::Relaxed))
    }

    /// Acknowledges the event. Called by the consumer after it has acted.
    pub fn clear(&self) {
        self.raised.store(false, Ordering::Release);
    }
}

impl Default for EventFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Pins and interrupt lines behind the gate.
pub trait GateHardware {
    /// Drives the actuator enable output.
    fn set_output(&mut self, on: bool);

    /// Enables or masks both the zero-cross and overcurrent triggers.
    fn set_triggers(&mut self, enabled: bool);

    /// Selects which line transitions fire the zero-cross trigger.
    fn set_edge(&mut self, mode: EdgeMode);

    /// Reads the overcurrent comparator directly.
    fn overcurrent_level(&mut self) -> bool;

    /// Substitutes a generated edge source for the line waveform.
    ///
    /// Only used in the load-disabled diagnostic posture. Boards without a
    /// generator leave the zero-cross trigger idle.
    fn use_synthetic_edges(&mut self, _half_period: Duration) {}
}

/// State shared between the trigger handlers and the foreground.
#[derive(Debug)]
pub struct SignalGate {
    pub zero_cross: EventFlag,
    pub overcurrent: EventFlag,
    requested: AtomicBool,
    triggers_enabled: AtomicBool,
}

impl SignalGate {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            zero_cross: EventFlag::new(),
            overcurrent: EventFlag::new(),
            requested: AtomicBool::new(false),
            triggers_enabled: AtomicBool::new(false),
        }
    }

    /// Zero-cross handler body: raise the flag, then re-drive the output.
    pub fn on_zero_cross(&self, at: Micros, drive: impl FnOnce(bool)) {
        self.zero_cross.raise(at);
        drive(self.requested.load(Ordering::Acquire));
    }

    /// Overcurrent handler body: cut the output first, then raise the flag.
    pub fn on_overcurrent(&self, at: Micros, cut: impl FnOnce()) {
        cut();
        self.overcurrent.raise(at);
    }

    /// Records the foreground's output request.
    ///
    /// Switching off takes effect immediately. Switching on waits for the next
    /// zero crossing so the load is never energized mid-cycle.
    pub fn request_output<H: GateHardware + ?Sized>(&self, hw: &mut H, on: bool) {
        self.requested.store(on, Ordering::Release);
        if !on {
            hw.set_output(false);
        }
    }

    #[must_use]
    pub fn output_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn triggers_enabled(&self) -> bool {
        self.triggers_enabled.load(Ordering::Acquire)
    }

    pub fn enable_triggers<H: GateHardware + ?Sized>(&self, hw: &mut H) {
        self.triggers_enabled.store(true, Ordering::Release);
        hw.set_triggers(true);
    }

    /// Masks both triggers and forces the actuator off.
    pub fn disable_triggers<H: GateHardware + ?Sized>(&self, hw: &mut H) {
        hw.set_triggers(false);
        hw.set_output(false);
        self.triggers_enabled.store(false, Ordering::Release);
    }

    /// Selects the zero-cross polarity and drops any stale edge.
    pub fn arm_zero_cross<H: GateHardware + ?Sized>(&self, hw: &mut H, mode: EdgeMode) {
        hw.set_edge(mode);
        self.zero_cross.clear();
    }

    /// Runs `f` with both triggers masked, restoring them afterwards if they
    /// were enabled on entry. Must not be held across a blocking wait.
    pub fn critical<H, R, F>(&self, hw: &mut H, f: F) -> R
    where
        H: GateHardware + ?Sized,
        F: FnOnce(&mut H) -> R,
    {
        let restore = self.triggers_enabled();
        self.disable_triggers(hw);
        let result = f(hw);
        if restore {
            self.enable_triggers(hw);
        }
        result
    }
}

impl Default for SignalGate {
    fn default() -> Self {
        Self::new()
    }
}
