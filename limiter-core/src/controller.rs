//! Current limit controller.
//!
//! Translates a milliamp limit into the inverted duty code the actuator driver
//! expects and owns the settle-time contract. Calibration, the current sweep
//! and the comparator test are built on top of [`CurrentController::apply`].

use core::fmt;
use core::time::Duration;

use crate::clock::{elapsed, Clock, Poll};
use crate::config::LimiterConfig;
use crate::gate::{GateHardware, SignalGate};

/// Current limit in milliamps, always within `0..=max_current_ma`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CurrentLimit(u16);

impl CurrentLimit {
    pub const ZERO: Self = Self(0);

    /// Returns `None` when `milliamps` exceeds the configured maximum.
    #[must_use]
    pub fn new(milliamps: u16, cfg: &LimiterConfig) -> Option<Self> {
        (milliamps <= cfg.max_current_ma).then_some(Self(milliamps))
    }

    #[must_use]
    pub fn maximum(cfg: &LimiterConfig) -> Self {
        Self(cfg.max_current_ma)
    }

    #[must_use]
    pub const fn milliamps(self) -> u16 {
        self.0
    }

    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Inverted actuator code: a zero limit maps to the highest code.
    #[must_use]
    pub fn duty_code(self, cfg: &LimiterConfig) -> u16 {
        cfg.max_current_ma.saturating_add(1).saturating_sub(self.0)
    }
}

impl fmt::Display for CurrentLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} mA", self.0)
    }
}

/// Actuator duty driver. Fire-and-forget.
pub trait DutyDriver {
    fn set_duty(&mut self, code: u16, phase_offset: u16);
}

/// External cancellation source: a button press or an incoming byte.
pub trait StopSignal {
    fn stop_requested(&mut self) -> bool;
}

/// Settle policy after a duty change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Settle {
    /// Full analog settle delay.
    Full,
    /// Short per-step delay used by the sweep.
    Step,
}

/// Reference voltage expected at the trim point for the calibrated limit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CalibrationReport {
    pub limit: CurrentLimit,
    pub reference_millivolts: u32,
}

impl fmt::Display for CalibrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "REF {}.{:03} V",
            self.reference_millivolts / 1000,
            self.reference_millivolts % 1000
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SweepOutcome {
    /// First limit at which the overcurrent event fired.
    Tripped(CurrentLimit),
    /// Reached the maximum without a trip.
    OutOfRange,
    Cancelled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CompareOutcome {
    /// The overcurrent handler fired.
    Interrupt { after: Duration },
    /// The comparator read high without the handler firing.
    Polled { after: Duration },
    NotObserved,
    Cancelled,
}

impl fmt::Display for CompareOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompareOutcome::Interrupt { after } => {
                write!(f, "TRIP IRQ {} us", after.as_micros())
            }
            CompareOutcome::Polled { after } => write!(f, "TRIP POLL {} us", after.as_micros()),
            CompareOutcome::NotObserved => f.write_str("NO TRIP"),
            CompareOutcome::Cancelled => f.write_str("CANCELLED"),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct CurrentController {
    cfg: LimiterConfig,
}

impl CurrentController {
    #[must_use]
    pub const fn new(cfg: LimiterConfig) -> Self {
        Self { cfg }
    }

    /// Drives the duty code for `limit` and waits for the reference to settle.
    ///
    /// A zero limit always gets the full settle delay and drops any overcurrent
    /// event raised while the reference was moving.
    pub fn apply<H>(&self, signals: &SignalGate, hw: &mut H, limit: CurrentLimit, settle: Settle)
    where
        H: DutyDriver + Clock + ?Sized,
    {
        hw.set_duty(limit.duty_code(&self.cfg), self.cfg.phase_offset);
        let wait = match settle {
            Settle::Step if !limit.is_zero() => self.cfg.sweep_step_delay,
            _ => self.cfg.settle_delay,
        };
        hw.delay(wait);
        if limit.is_zero() {
            signals.overcurrent.clear();
        }
    }

    /// Applies the maximum limit with the actuator forced off so the reference
    /// can be trimmed by hand. Nothing is persisted.
    pub fn calibrate<H>(
        &self,
        signals: &SignalGate,
        hw: &mut H,
        limit: &mut CurrentLimit,
    ) -> CalibrationReport
    where
        H: DutyDriver + GateHardware + Clock + ?Sized,
    {
        *limit = CurrentLimit::maximum(&self.cfg);
        self.apply(signals, hw, *limit, Settle::Full);
        signals.disable_triggers(hw);
        CalibrationReport {
            limit: *limit,
            reference_millivolts: self.reference_millivolts(*limit),
        }
    }

    /// Expected trim-point voltage for `limit` across the sense resistor.
    #[must_use]
    pub fn reference_millivolts(&self, limit: CurrentLimit) -> u32 {
        u32::from(limit.milliamps()) * self.cfg.sense_milliohms / 1000
    }

    /// Steps the limit up from zero one milliamp at a time until the
    /// overcurrent event fires. Checks for cancellation before every step.
    pub fn sweep<H>(&self, signals: &SignalGate, hw: &mut H, limit: &mut CurrentLimit) -> SweepOutcome
    where
        H: DutyDriver + GateHardware + StopSignal + Clock + ?Sized,
    {
        signals.overcurrent.clear();
        signals.enable_triggers(hw);
        for milliamps in 0..=self.cfg.max_current_ma {
            if hw.stop_requested() {
                return SweepOutcome::Cancelled;
            }
            *limit = CurrentLimit(milliamps);
            self.apply(signals, hw, *limit, Settle::Step);
            if signals.overcurrent.is_raised() {
                signals.overcurrent.clear();
                return SweepOutcome::Tripped(*limit);
            }
        }
        SweepOutcome::OutOfRange
    }

    /// Applies `target` and watches for a trip for the compare window.
    pub fn compare_test<H>(
        &self,
        signals: &SignalGate,
        hw: &mut H,
        limit: &mut CurrentLimit,
        target: CurrentLimit,
    ) -> CompareOutcome
    where
        H: DutyDriver + GateHardware + StopSignal + Clock + ?Sized,
    {
        *limit = target;
        self.apply(signals, hw, target, Settle::Full);
        signals.overcurrent.clear();
        signals.enable_triggers(hw);

        let started = hw.now();
        let poll = Poll::within(self.cfg.compare_window, self.cfg.poll_granularity);
        let outcome = poll
            .until(hw, |hw| {
                if let Some(at) = signals.overcurrent.raised_at() {
                    return Some(CompareOutcome::Interrupt {
                        after: elapsed(started, at),
                    });
                }
                if hw.overcurrent_level() {
                    return Some(CompareOutcome::Polled {
                        after: elapsed(started, hw.now()),
                    });
                }
                hw.stop_requested().then_some(CompareOutcome::Cancelled)
            })
            .unwrap_or(CompareOutcome::NotObserved);
        signals.overcurrent.clear();
        outcome
    }
}
