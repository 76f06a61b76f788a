//! Process-wide state threaded through every entry point.

use core::fmt;
use core::time::Duration;

use crate::controller::CurrentLimit;
use crate::qualifier::FaultCode;
use crate::store::PresetSlot;

/// Top-level operating mode. Exactly one is active.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SystemMode {
    #[default]
    Startup,
    Qualifying,
    Normal,
    PresetBrowse,
    PresetEdit,
    Calibration,
    DiagnosticSweep,
    RemoteSession,
    /// Terminal for the rest of the power cycle.
    Fault,
}

impl SystemMode {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            SystemMode::Startup => "STARTUP",
            SystemMode::Qualifying => "QUALIFYING",
            SystemMode::Normal => "NORMAL",
            SystemMode::PresetBrowse => "BROWSE",
            SystemMode::PresetEdit => "EDIT",
            SystemMode::Calibration => "CALIBRATION",
            SystemMode::DiagnosticSweep => "SWEEP",
            SystemMode::RemoteSession => "REMOTE",
            SystemMode::Fault => "FAULT",
        }
    }
}

impl fmt::Display for SystemMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Configuration and mode state owned by the foreground.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SystemContext {
    mode: SystemMode,
    fault: FaultCode,
    pub current_limit: CurrentLimit,
    pub recalled_preset: PresetSlot,
    pub default_preset: PresetSlot,
    pub countermeasure: bool,
    /// Load-disabled diagnostic posture, kept until power-down once set.
    pub diagnostic: bool,
    pub line_half_period: Option<Duration>,
    pub duty_percent: u8,
}

impl SystemContext {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            mode: SystemMode::Startup,
            fault: FaultCode::None,
            current_limit: CurrentLimit::ZERO,
            recalled_preset: PresetSlot::FIRST,
            default_preset: PresetSlot::FIRST,
            countermeasure: false,
            diagnostic: false,
            line_half_period: None,
            duty_percent: 0,
        }
    }

    #[must_use]
    pub const fn mode(&self) -> SystemMode {
        self.mode
    }

    #[must_use]
    pub const fn fault(&self) -> FaultCode {
        self.fault
    }

    /// Switches mode. Returns `false` once the system has faulted.
    pub fn enter(&mut self, mode: SystemMode) -> bool {
        if self.mode == SystemMode::Fault {
            return false;
        }
        self.mode = mode;
        true
    }

    /// Latches the first qualifier fault and enters the terminal mode.
    pub fn latch_fault(&mut self, code: FaultCode) {
        if code.is_fault() && !self.fault.is_fault() {
            self.fault = code;
            self.mode = SystemMode::Fault;
        }
    }
}
