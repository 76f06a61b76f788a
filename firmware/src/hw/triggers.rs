//! Zero-cross and overcurrent trigger lines.
//!
//! Both triggers are EXTI lines configured through the PAC: the zero-cross
//! detector on PA0 (EXTI0_1) and the comparator output on PA7 (EXTI4_15). The
//! handlers only call into [`SIGNALS`] and drive the gate output, which is the
//! one pin shared with the foreground.

use core::cell::RefCell;

use critical_section::Mutex;
use embassy_stm32::gpio::Output;
use embassy_stm32::pac;
use embassy_time::Instant;
use limiter_core::clock::Micros;
use limiter_core::gate::{Edge, EdgeMode, SignalGate};
use pac::interrupt;

/// Shared with the trigger handlers.
pub static SIGNALS: SignalGate = SignalGate::new();

static GATE: Mutex<RefCell<Option<Output<'static>>>> = Mutex::new(RefCell::new(None));

const ZERO_CROSS_LINE: usize = 0;
const OVERCURRENT_LINE: usize = 7;
const PORT_A: u8 = 0;

/// Hands the gate pin over to the shared slot.
pub fn install_gate(pin: Output<'static>) {
    critical_section::with(|cs| GATE.borrow_ref_mut(cs).replace(pin));
}

/// Drives the gate output from either context.
pub fn drive_gate(on: bool) {
    critical_section::with(|cs| {
        if let Some(pin) = GATE.borrow_ref_mut(cs).as_mut() {
            if on {
                pin.set_high();
            } else {
                pin.set_low();
            }
        }
    });
}

pub fn timestamp() -> Micros {
    // Wraps every ~71 minutes; all consumers use wrapping differences.
    u32::try_from(Instant::now().as_micros() & u64::from(u32::MAX)).unwrap_or(0)
}

/// Routes both lines to port A and leaves them masked.
pub fn configure() {
    let exti = pac::EXTI;
    exti.exticr(ZERO_CROSS_LINE / 4)
        .modify(|w| w.set_exti(ZERO_CROSS_LINE % 4, PORT_A));
    exti.exticr(OVERCURRENT_LINE / 4)
        .modify(|w| w.set_exti(OVERCURRENT_LINE % 4, PORT_A));
    exti.rtsr(0).modify(|w| w.set_line(OVERCURRENT_LINE, true));
    exti.ftsr(0).modify(|w| w.set_line(OVERCURRENT_LINE, false));
    set_edge(EdgeMode::Either);
    set_masked(true);

    unsafe {
        cortex_m::peripheral::NVIC::unmask(embassy_stm32::interrupt::EXTI0_1);
        cortex_m::peripheral::NVIC::unmask(embassy_stm32::interrupt::EXTI4_15);
    }
}

/// Edges latched while masked are dropped before the lines are unmasked.
pub fn set_masked(masked: bool) {
    let exti = pac::EXTI;
    if !masked {
        clear_pending(ZERO_CROSS_LINE);
        clear_pending(OVERCURRENT_LINE);
    }
    exti.imr(0).modify(|w| {
        w.set_line(ZERO_CROSS_LINE, !masked);
        w.set_line(OVERCURRENT_LINE, !masked);
    });
}

pub fn set_edge(mode: EdgeMode) {
    let exti = pac::EXTI;
    exti.rtsr(0)
        .modify(|w| w.set_line(ZERO_CROSS_LINE, mode.accepts(Edge::Rising)));
    exti.ftsr(0)
        .modify(|w| w.set_line(ZERO_CROSS_LINE, mode.accepts(Edge::Falling)));
    clear_pending(ZERO_CROSS_LINE);
}

/// Raises a zero-cross interrupt from software.
pub fn fire_synthetic_zero_cross() {
    pac::EXTI.swier(0).write(|w| w.set_line(ZERO_CROSS_LINE, true));
}

fn clear_pending(line: usize) {
    let exti = pac::EXTI;
    exti.rpr(0).write(|w| w.set_line(line, true));
    exti.fpr(0).write(|w| w.set_line(line, true));
}

#[interrupt]
fn EXTI0_1() {
    clear_pending(ZERO_CROSS_LINE);
    SIGNALS.on_zero_cross(timestamp(), drive_gate);
}

#[interrupt]
fn EXTI4_15() {
    clear_pending(OVERCURRENT_LINE);
    SIGNALS.on_overcurrent(timestamp(), || drive_gate(false));
}
