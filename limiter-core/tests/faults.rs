use core::time::Duration;

use limiter_core::config::LimiterConfig;
use limiter_core::context::SystemMode;
use limiter_core::display::{Region, Style};
use limiter_core::gate::SignalGate;
use limiter_core::menu::{poll, power_up, Listen, OperatorMachine};
use limiter_core::qualifier::FaultCode;
use limiter_core::repl::session::LineBuffer;
use limiter_core::sim::{Frame, LineModel, SimBoard};
use limiter_core::telemetry::TelemetryEventKind;

const CFG: LimiterConfig = LimiterConfig::DEFAULT;

/// Boots past the remote prompt, then presses once more.
fn boot_on(line: LineModel) -> (FaultCode, Listen, bool, Option<Frame>) {
    let gate = SignalGate::new();
    let mut board = SimBoard::new(&gate, CFG).with_line(line);
    board.seed_store(&[1000], 0, 0);
    let mut machine = OperatorMachine::new(&gate, CFG, false);
    let mut lines = LineBuffer::new();

    let mut listen = power_up(&mut machine, &mut board);
    let until = board.elapsed() + Duration::from_secs(4);
    while board.elapsed() < until {
        listen = poll(&mut machine, &mut board, &mut lines, listen);
    }

    // A press after a fault changes nothing.
    board.press_after(Duration::ZERO, Duration::from_millis(1500));
    for _ in 0..20_000 {
        listen = poll(&mut machine, &mut board, &mut lines, listen);
    }

    let title = board.frame(Region::Title).cloned();
    if machine.context().fault().is_fault() {
        assert_eq!(machine.mode(), SystemMode::Fault);
        assert!(
            machine
                .telemetry()
                .oldest_first()
                .any(|record| matches!(record.event, TelemetryEventKind::Fault(_)))
        );
    }
    (machine.context().fault(), listen, board.output_on(), title)
}

#[test]
fn missing_waveform_halts_with_no_zero_cross() {
    let (fault, listen, output, title) = boot_on(LineModel::Flat);
    assert_eq!(fault, FaultCode::NoZeroCross);
    assert_eq!(listen, Listen::Halted);
    assert!(!output);
    let title = title.expect("fault is displayed");
    assert_eq!(title.text.as_str(), "NO ZERO CROSS");
    assert_eq!(title.style, Style::Blink);
}

#[test]
fn missing_falling_edges_halt_with_no_ac_cycles() {
    let (fault, listen, output, title) = boot_on(LineModel::RisingOnly {
        half_period: Duration::from_millis(10),
    });
    assert_eq!(fault, FaultCode::NoAlternatingCycles);
    assert_eq!(listen, Listen::Halted);
    assert!(!output);
    let title = title.expect("fault is displayed");
    assert_eq!(title.text.as_str(), "NO AC CYCLES");
    assert_eq!(title.style, Style::Blink);
}

#[test]
fn short_half_period_halts_as_non_sinusoidal() {
    let (fault, listen, output, title) = boot_on(LineModel::mains(Duration::from_micros(7400)));
    assert_eq!(fault, FaultCode::NonSinusoidal);
    assert_eq!(listen, Listen::Halted);
    assert!(!output);
    let title = title.expect("fault is displayed");
    assert_eq!(title.text.as_str(), "NOT SINUSOIDAL");
    assert_eq!(title.style, Style::Blink);
}

#[test]
fn sixty_hertz_line_qualifies() {
    let (fault, listen, output, _) = boot_on(LineModel::mains(Duration::from_micros(8333)));
    assert_eq!(fault, FaultCode::None);
    assert_eq!(listen, Listen::Button);
    assert!(output);
}
