//! Hold-duration input.
//!
//! Every interactive choice is encoded by how long the single control is held,
//! measured in whole seconds and capped at [`HOLD_CAP_SECS`]. The tables below
//! map a duration bucket to an action for each interaction state, so the menu
//! logic can be exercised without simulating button timing.

use core::fmt;
use core::time::Duration;

use crate::clock::{elapsed, Clock, Poll};

/// Holds at or above this many seconds are indistinguishable.
pub const HOLD_CAP_SECS: u8 = 10;

/// Whole seconds the control was held, saturating at the cap.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HoldSeconds(u8);

impl HoldSeconds {
    #[must_use]
    pub const fn new(secs: u8) -> Self {
        if secs > HOLD_CAP_SECS {
            Self(HOLD_CAP_SECS)
        } else {
            Self(secs)
        }
    }

    #[must_use]
    pub fn from_duration(held: Duration) -> Self {
        Self::new(u8::try_from(held.as_secs()).unwrap_or(HOLD_CAP_SECS))
    }

    #[must_use]
    pub const fn secs(self) -> u8 {
        self.0
    }
}

impl fmt::Display for HoldSeconds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}

/// The single operator control.
pub trait Button {
    fn pressed(&mut self) -> bool;
}

/// Measures a press that is already in progress.
///
/// Returns as soon as the control is released. A press that reaches the cap
/// is waited out until release so its tail is not read back as a second press.
pub fn measure_hold<H>(hw: &mut H, granularity: Duration) -> HoldSeconds
where
    H: Button + Clock + ?Sized,
{
    let started = hw.now();
    let cap = Duration::from_secs(u64::from(HOLD_CAP_SECS));
    let poll = Poll::within(cap, granularity);
    let released = poll.until(hw, |hw| (!hw.pressed()).then(|| hw.now()));
    if let Some(at) = released {
        return HoldSeconds::from_duration(elapsed(started, at));
    }
    while poll.until(hw, |hw| (!hw.pressed()).then_some(())).is_none() {}
    HoldSeconds::new(HOLD_CAP_SECS)
}

/// Power-up hold dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootAction {
    RemotePrompt,
    ToggleCountermeasureOnce,
    RemoteSession,
    Calibration,
}

#[must_use]
pub const fn boot_action(hold: HoldSeconds) -> BootAction {
    match hold.0 {
        0..=1 => BootAction::RemotePrompt,
        2..=4 => BootAction::ToggleCountermeasureOnce,
        5..=9 => BootAction::RemoteSession,
        _ => BootAction::Calibration,
    }
}

/// Second-level dispatch once calibration has been entered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalibrationAction {
    Display,
    Sweep,
    ToggleCountermeasure,
}

#[must_use]
pub const fn calibration_action(hold: HoldSeconds) -> CalibrationAction {
    match hold.0 {
        0..=4 => CalibrationAction::Display,
        5..=9 => CalibrationAction::Sweep,
        _ => CalibrationAction::ToggleCountermeasure,
    }
}

/// Run-mode menu entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MenuAction {
    Browse,
    Edit,
    Persist,
    SetDefault,
}

#[must_use]
pub const fn menu_action(hold: HoldSeconds) -> MenuAction {
    match hold.0 {
        0..=2 => MenuAction::Browse,
        3..=5 => MenuAction::Edit,
        6..=9 => MenuAction::Persist,
        HOLD_CAP_SECS.. => MenuAction::SetDefault,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BrowseAction {
    Next,
    Commit,
    Cancel,
}

#[must_use]
pub const fn browse_action(hold: HoldSeconds) -> BrowseAction {
    match hold.0 {
        0..=2 => BrowseAction::Next,
        3..=5 => BrowseAction::Commit,
        _ => BrowseAction::Cancel,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EditAction {
    Increment,
    NextDigit,
    Commit,
}

#[must_use]
pub const fn edit_action(hold: HoldSeconds) -> EditAction {
    match hold.0 {
        0..=2 => EditAction::Increment,
        3..=5 => EditAction::NextDigit,
        _ => EditAction::Commit,
    }
}
