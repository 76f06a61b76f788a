//! Aggregate collaborator trait implemented by each target board.

use crate::clock::Clock;
use crate::controller::{DutyDriver, StopSignal};
use crate::display::Screen;
use crate::gate::GateHardware;
use crate::hold::Button;
use crate::repl::RemoteLink;
use crate::store::ByteStore;

/// Everything the foreground needs from the hardware.
pub trait Board:
    GateHardware + DutyDriver + Clock + ByteStore + Screen + StopSignal + Button + RemoteLink
{
}

impl<T> Board for T where
    T: GateHardware + DutyDriver + Clock + ByteStore + Screen + StopSignal + Button + RemoteLink
{
}
