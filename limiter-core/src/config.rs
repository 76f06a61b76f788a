//! Compile-time defaults and the runtime configuration record.
//!
//! The defaults describe the reference board: a 10 A limiter on a 50 Hz line
//! with ten presets. Front-ends copy [`LimiterConfig::DEFAULT`], adjust what
//! their hardware needs, and call [`LimiterConfig::validate`] once before the
//! state machine is built.

use core::fmt;
use core::time::Duration;

/// Highest programmable current limit in milliamps.
pub const MAXIMUM_CURRENT_MA: u16 = 10_000;
/// Number of persisted preset slots.
pub const PRESET_COUNT: u8 = 10;
/// Upper bound on preset slots, sizes the static buffers.
pub const MAX_PRESETS: usize = 16;
/// Half period of the nominal 50 Hz line.
pub const NOMINAL_HALF_PERIOD: Duration = Duration::from_micros(10_000);
/// Measured half periods below this share of nominal are not sinusoidal.
pub const NON_SINUSOIDAL_PERCENT: u32 = 75;
/// Rise time of the reference filter before a comparator read is trusted.
pub const SETTLE_DELAY: Duration = Duration::from_millis(100);
/// Per-step delay while sweeping one milliamp at a time.
pub const SWEEP_STEP_DELAY: Duration = Duration::from_millis(1);
/// Current sense resistor.
pub const SENSE_MILLIOHMS: u32 = 100;
/// Grace window for the confirming press when the countermeasure is active.
pub const CONFIRM_WINDOW: Duration = Duration::from_secs(2);
/// Window during which a remote session may be requested at boot.
pub const REMOTE_PROMPT_WINDOW: Duration = Duration::from_secs(3);
/// Wait granularity for every bounded polling loop.
pub const POLL_GRANULARITY: Duration = Duration::from_micros(100);
/// How long the comparator test watches for a trip.
pub const COMPARE_WINDOW: Duration = Duration::from_secs(5);

/// Tunables shared by every component of the control core.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LimiterConfig {
    pub max_current_ma: u16,
    pub preset_count: u8,
    pub nominal_half_period: Duration,
    pub settle_delay: Duration,
    pub sweep_step_delay: Duration,
    pub sense_milliohms: u32,
    pub confirm_window: Duration,
    pub remote_prompt_window: Duration,
    pub poll_granularity: Duration,
    pub compare_window: Duration,
    /// Phase offset forwarded to the duty driver with every duty code.
    pub phase_offset: u16,
}

impl LimiterConfig {
    /// Reference board configuration.
    pub const DEFAULT: Self = Self {
        max_current_ma: MAXIMUM_CURRENT_MA,
        preset_count: PRESET_COUNT,
        nominal_half_period: NOMINAL_HALF_PERIOD,
        settle_delay: SETTLE_DELAY,
        sweep_step_delay: SWEEP_STEP_DELAY,
        sense_milliohms: SENSE_MILLIOHMS,
        confirm_window: CONFIRM_WINDOW,
        remote_prompt_window: REMOTE_PROMPT_WINDOW,
        poll_granularity: POLL_GRANULARITY,
        compare_window: COMPARE_WINDOW,
        phase_offset: 0,
    };

    /// Shortest half period still accepted as a sinusoidal line.
    #[must_use]
    pub fn non_sinusoidal_floor(&self) -> Duration {
        self.nominal_half_period * NON_SINUSOIDAL_PERCENT / 100
    }

    /// Number of decimal digits needed to edit any value up to the maximum.
    #[must_use]
    pub const fn current_digits(&self) -> u8 {
        let mut digits = 1;
        let mut rest = self.max_current_ma / 10;
        while rest > 0 {
            digits += 1;
            rest /= 10;
        }
        digits
    }

    /// Checks the invariants the rest of the core relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_current_ma == 0 || self.max_current_ma == u16::MAX {
            return Err(ConfigError::MaximumCurrent(self.max_current_ma));
        }
        if self.preset_count == 0 || usize::from(self.preset_count) > MAX_PRESETS {
            return Err(ConfigError::PresetCount(self.preset_count));
        }
        if self.nominal_half_period.is_zero() {
            return Err(ConfigError::HalfPeriod);
        }
        if self.poll_granularity.is_zero() || self.poll_granularity > self.nominal_half_period {
            return Err(ConfigError::PollGranularity);
        }
        Ok(())
    }
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Rejected configuration values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// Maximum current must leave room for the `max + 1` duty code.
    MaximumCurrent(u16),
    /// Preset count must be between 1 and [`MAX_PRESETS`].
    PresetCount(u8),
    /// Nominal half period must be non-zero.
    HalfPeriod,
    /// Poll granularity must be non-zero and finer than a half period.
    PollGranularity,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MaximumCurrent(value) => {
                write!(f, "maximum current {value} mA out of range")
            }
            ConfigError::PresetCount(count) => {
                write!(f, "preset count {count} must be 1-{MAX_PRESETS}")
            }
            ConfigError::HalfPeriod => f.write_str("nominal half period must be non-zero"),
            ConfigError::PollGranularity => {
                f.write_str("poll granularity must be non-zero and below the half period")
            }
        }
    }
}
