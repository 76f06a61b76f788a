//! Boot-time waveform qualifier.
//!
//! Runs once with the actuator held off and decides whether the line is safe
//! to switch. The zero-cross detector emits one pulse per crossing, so the
//! interval between two consecutive falling edges is one line half period.

use core::fmt;
use core::time::Duration;

use crate::clock::{elapsed, Clock, Micros, Poll};
use crate::config::LimiterConfig;
use crate::gate::{EdgeMode, GateHardware, SignalGate};

/// Qualifier verdict. Anything but `None` is terminal for this power cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FaultCode {
    #[default]
    None,
    NoZeroCross,
    NoAlternatingCycles,
    NonSinusoidal,
}

impl FaultCode {
    /// Fixed text shown on the display when the fault halts the system.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            FaultCode::None => "LINE OK",
            FaultCode::NoZeroCross => "NO ZERO CROSS",
            FaultCode::NoAlternatingCycles => "NO AC CYCLES",
            FaultCode::NonSinusoidal => "NOT SINUSOIDAL",
        }
    }

    #[must_use]
    pub const fn is_fault(self) -> bool {
        !matches!(self, FaultCode::None)
    }
}

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Result of a passing qualification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Qualification {
    /// Measured falling-to-falling interval.
    pub half_period: Duration,
}

/// Runs the qualification sequence.
///
/// On success the zero-cross trigger is left armed on the falling edge, once
/// per crossing, with both triggers enabled. On failure both triggers are disabled and the actuator is
/// off.
pub fn qualify<H>(
    signals: &SignalGate,
    hw: &mut H,
    cfg: &LimiterConfig,
) -> Result<Qualification, FaultCode>
where
    H: GateHardware + Clock + ?Sized,
{
    signals.request_output(hw, false);
    signals.arm_zero_cross(hw, EdgeMode::Either);
    signals.enable_triggers(hw);

    let outcome = run_sequence(signals, hw, cfg);
    match outcome {
        Ok(_) => signals.arm_zero_cross(hw, EdgeMode::Falling),
        Err(_) => signals.disable_triggers(hw),
    }
    outcome
}

fn run_sequence<H>(
    signals: &SignalGate,
    hw: &mut H,
    cfg: &LimiterConfig,
) -> Result<Qualification, FaultCode>
where
    H: GateHardware + Clock + ?Sized,
{
    let half = cfg.nominal_half_period;
    let period = half * 2;
    let first_edge = Poll::within(half, cfg.poll_granularity);
    let polarity_edge = Poll::within(period, cfg.poll_granularity);

    wait_edge(signals, hw, first_edge).ok_or(FaultCode::NoZeroCross)?;

    signals.arm_zero_cross(hw, EdgeMode::Rising);
    wait_edge(signals, hw, polarity_edge).ok_or(FaultCode::NoAlternatingCycles)?;

    signals.arm_zero_cross(hw, EdgeMode::Falling);
    let first = wait_edge(signals, hw, polarity_edge).ok_or(FaultCode::NoAlternatingCycles)?;
    signals.zero_cross.clear();
    let second = wait_edge(signals, hw, polarity_edge).ok_or(FaultCode::NoAlternatingCycles)?;

    let measured = elapsed(first, second);
    if measured < cfg.non_sinusoidal_floor() {
        return Err(FaultCode::NonSinusoidal);
    }
    Ok(Qualification {
        half_period: measured,
    })
}

fn wait_edge<H>(signals: &SignalGate, hw: &mut H, poll: Poll) -> Option<Micros>
where
    H: Clock + ?Sized,
{
    poll.until(hw, |_| signals.zero_cross.raised_at())
}
