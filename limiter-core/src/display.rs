//! Display collaborator interface and the load duty meter.

use core::fmt;
use core::time::Duration;

use crate::clock::{elapsed, Micros};
use crate::store::PresetSlot;

/// Screen area a piece of content is drawn into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Region {
    Title,
    Value,
    Status,
    Detail,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Style {
    Normal,
    Highlight,
    Blink,
}

/// Text or a value the screen formats itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Content<'a> {
    Text(&'a str),
    Milliamps(u16),
    Millivolts(u32),
    Percent(u8),
    Slot(PresetSlot),
    /// A milliamp value with one digit marked as selected.
    Digits { value: u16, selected: u8, width: u8 },
}

impl fmt::Display for Content<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Content::Text(text) => f.write_str(text),
            Content::Milliamps(value) => write!(f, "{value} mA"),
            Content::Millivolts(value) => write!(f, "{}.{:03} V", value / 1000, value % 1000),
            Content::Percent(value) => write!(f, "{value} %"),
            Content::Slot(slot) => write!(f, "P{slot}"),
            Content::Digits {
                value,
                selected,
                width,
            } => {
                for position in 0..width {
                    let place = 10u32.pow(u32::from(width - 1 - position));
                    let digit = u32::from(value) / place % 10;
                    if position == selected {
                        write!(f, "[{digit}]")?;
                    } else {
                        write!(f, "{digit}")?;
                    }
                }
                f.write_str(" mA")
            }
        }
    }
}

/// Render sink. Owns all pixel-level state.
pub trait Screen {
    fn render(&mut self, content: Content<'_>, region: Region, style: Style);
}

/// Share of a half cycle the load was on, in whole percent.
#[must_use]
pub fn duty_percent(on_time: Duration, half_period: Duration) -> u8 {
    if half_period.is_zero() {
        return 0;
    }
    let percent = (on_time.as_micros() * 100 / half_period.as_micros()).min(100);
    u8::try_from(percent).unwrap_or(100)
}

/// Tracks the current half cycle and turns zero-cross/trip timestamps into a
/// duty percentage.
#[derive(Clone, Copy, Debug, Default)]
pub struct DutyMeter {
    cycle_start: Option<Micros>,
    trip_at: Option<Micros>,
    last: u8,
}

impl DutyMeter {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cycle_start: None,
            trip_at: None,
            last: 0,
        }
    }

    /// Closes the running half cycle and starts the next one. Returns the duty
    /// of the closed cycle, if one was open.
    pub fn on_zero_cross(&mut self, at: Micros, half_period: Duration) -> Option<u8> {
        let closed = self.cycle_start.map(|start| {
            let on_time = match self.trip_at {
                Some(trip) => elapsed(start, trip),
                None => half_period,
            };
            duty_percent(on_time, half_period)
        });
        self.cycle_start = Some(at);
        self.trip_at = None;
        if let Some(percent) = closed {
            self.last = percent;
        }
        closed
    }

    /// Marks the first trip of the running half cycle.
    pub fn on_trip(&mut self, at: Micros) {
        if self.cycle_start.is_some() && self.trip_at.is_none() {
            self.trip_at = Some(at);
        }
    }

    #[must_use]
    pub const fn last_percent(&self) -> u8 {
        self.last
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HALF: Duration = Duration::from_millis(10);

    #[test]
    fn digits_mark_the_selected_position() {
        use core::fmt::Write;
        let mut text = heapless::String::<24>::new();
        let content = Content::Digits {
            value: 2_500,
            selected: 1,
            width: 5,
        };
        write!(text, "{content}").unwrap();
        assert_eq!(text.as_str(), "0[2]500 mA");
    }

    #[test]
    fn percent_is_clamped() {
        assert_eq!(duty_percent(Duration::from_millis(5), HALF), 50);
        assert_eq!(duty_percent(Duration::from_millis(15), HALF), 100);
        assert_eq!(duty_percent(Duration::from_millis(5), Duration::ZERO), 0);
    }

    #[test]
    fn untripped_cycle_reads_full_duty() {
        let mut meter = DutyMeter::new();
        assert_eq!(meter.on_zero_cross(0, HALF), None);
        assert_eq!(meter.on_zero_cross(10_000, HALF), Some(100));
    }

    #[test]
    fn trip_shortens_on_time() {
        let mut meter = DutyMeter::new();
        meter.on_zero_cross(0, HALF);
        meter.on_trip(2_500);
        meter.on_trip(4_000);
        assert_eq!(meter.on_zero_cross(10_000, HALF), Some(25));
        assert_eq!(meter.last_percent(), 25);
    }
}
