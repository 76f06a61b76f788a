use core::time::Duration;

use limiter_core::config::LimiterConfig;
use limiter_core::context::SystemMode;
use limiter_core::display::Region;
use limiter_core::gate::SignalGate;
use limiter_core::menu::{poll, power_up, Listen, OperatorMachine};
use limiter_core::repl::session::LineBuffer;
use limiter_core::sim::{SenseModel, SimBoard};
use limiter_core::store::CELL_WIDTH;
use limiter_core::telemetry::TelemetryEventKind;

const CFG: LimiterConfig = LimiterConfig::DEFAULT;
const DEFAULT_CELL: u16 = CELL_WIDTH * 10;
const COUNTERMEASURE_CELL: u16 = DEFAULT_CELL + CELL_WIDTH;

struct Rig<'g> {
    board: SimBoard<'g>,
    machine: OperatorMachine<'g>,
    lines: LineBuffer,
    listen: Listen,
}

impl<'g> Rig<'g> {
    fn new(gate: &'g SignalGate, board: SimBoard<'g>) -> Self {
        Self {
            board,
            machine: OperatorMachine::new(gate, CFG, false),
            lines: LineBuffer::new(),
            listen: Listen::Button,
        }
    }

    fn power_up(&mut self) {
        self.listen = power_up(&mut self.machine, &mut self.board);
    }

    /// Boots with no hold and lets the remote prompt lapse into normal running.
    fn boot_to_run(&mut self) {
        self.power_up();
        assert_eq!(self.listen, Listen::Remote);
        self.run_for(Duration::from_secs(4));
        assert_eq!(self.machine.mode(), SystemMode::Normal);
    }

    fn run_for(&mut self, duration: Duration) {
        let until = self.board.elapsed() + duration;
        while self.board.elapsed() < until {
            self.listen = poll(&mut self.machine, &mut self.board, &mut self.lines, self.listen);
        }
    }

    /// Holds the button for `secs` whole seconds and lets the machine consume it.
    fn press(&mut self, secs: u64) {
        self.board
            .press_after(Duration::ZERO, Duration::from_millis(secs * 1000 + 500));
        self.listen = poll(&mut self.machine, &mut self.board, &mut self.lines, self.listen);
    }
}

#[test]
fn boot_applies_the_default_preset() {
    let gate = SignalGate::new();
    let mut board = SimBoard::new(&gate, CFG);
    board.seed_store(&[0, 0, 2500], 2, 0);
    let mut rig = Rig::new(&gate, board);

    rig.boot_to_run();

    let ctx = rig.machine.context();
    assert_eq!(ctx.current_limit.milliamps(), 2500);
    assert_eq!(ctx.recalled_preset.ordinal(), 3);
    assert_eq!(ctx.default_preset.ordinal(), 3);
    assert_eq!(ctx.line_half_period, Some(Duration::from_millis(10)));
    assert_eq!(rig.board.duty(), Some((7501, 0)));
    assert!(rig.board.output_on());
    assert_eq!(rig.board.shown(Region::Value), Some("2500 mA"));
    assert_eq!(rig.board.shown(Region::Status), Some("P3"));
    assert!(rig.board.store_accessed_with_triggers_masked());
}

#[test]
fn boot_repairs_corrupt_cells() {
    let gate = SignalGate::new();
    let mut board = SimBoard::new(&gate, CFG);
    board.seed_store(&[20_000, 1200], 42, 7);
    let mut rig = Rig::new(&gate, board);

    rig.boot_to_run();

    assert_eq!(rig.board.peek_cell(0), 0);
    assert_eq!(rig.board.peek_cell(CELL_WIDTH), 1200);
    assert_eq!(rig.board.peek_cell(DEFAULT_CELL), 0);
    assert_eq!(rig.board.peek_cell(COUNTERMEASURE_CELL), 0);
    assert_eq!(rig.machine.context().current_limit.milliamps(), 0);
    assert!(
        rig.machine
            .telemetry()
            .oldest_first()
            .any(|record| record.event == TelemetryEventKind::IntegrityRepaired(3))
    );
}

#[test]
fn unreadable_store_falls_back_to_safe_defaults() {
    let gate = SignalGate::new();
    let mut board = SimBoard::new(&gate, CFG);
    board.seed_store(&[4000], 0, 1);
    board.fail_store(true);
    let mut rig = Rig::new(&gate, board);

    rig.boot_to_run();

    let ctx = rig.machine.context();
    assert_eq!(ctx.current_limit.milliamps(), 0);
    assert!(!ctx.countermeasure);
    assert_eq!(rig.board.duty(), Some((10_001, 0)));
    assert!(
        rig.machine
            .telemetry()
            .oldest_first()
            .any(|record| record.event == TelemetryEventKind::StoreFailure)
    );
}

#[test]
fn trips_cut_each_half_cycle_and_show_duty() {
    let gate = SignalGate::new();
    let mut board = SimBoard::new(&gate, CFG).with_sense(SenseModel::load(5000));
    board.seed_store(&[2500], 0, 0);
    let mut rig = Rig::new(&gate, board);

    rig.boot_to_run();
    rig.run_for(Duration::from_millis(100));

    let ctx = rig.machine.context();
    assert_eq!(ctx.duty_percent, 20);
    assert!(rig.machine.telemetry().trip_count() >= 5);
    assert_eq!(rig.board.shown(Region::Detail), Some("20 %"));
}

#[test]
fn trips_during_browse_are_recorded_and_flagged() {
    let gate = SignalGate::new();
    let mut board = SimBoard::new(&gate, CFG).with_sense(SenseModel::load(5000));
    board.seed_store(&[2500], 0, 0);
    let mut rig = Rig::new(&gate, board);
    rig.boot_to_run();

    rig.press(0);
    assert_eq!(rig.machine.mode(), SystemMode::PresetBrowse);
    let before = rig.machine.telemetry().trip_count();
    rig.run_for(Duration::from_millis(200));

    assert!(rig.machine.telemetry().trip_count() >= before + 10);
    assert_eq!(rig.board.shown(Region::Detail), Some("TRIP"));
    assert_eq!(rig.board.shown(Region::Value), Some("2500 mA"));
    assert_eq!(rig.machine.mode(), SystemMode::PresetBrowse);
}

#[test]
fn browse_cycles_then_cancel_restores() {
    let gate = SignalGate::new();
    let mut board = SimBoard::new(&gate, CFG);
    board.seed_store(&[1000, 2000, 3000], 0, 0);
    let mut rig = Rig::new(&gate, board);
    rig.boot_to_run();

    rig.press(0);
    assert_eq!(rig.machine.mode(), SystemMode::PresetBrowse);
    assert_eq!(rig.board.shown(Region::Value), Some("1000 mA"));
    rig.press(1);
    assert_eq!(rig.board.shown(Region::Status), Some("P2"));
    assert_eq!(rig.board.shown(Region::Value), Some("2000 mA"));

    rig.press(7);
    let ctx = rig.machine.context();
    assert_eq!(ctx.recalled_preset.ordinal(), 1);
    assert_eq!(ctx.current_limit.milliamps(), 1000);
    assert_eq!(rig.machine.mode(), SystemMode::Normal);
}

#[test]
fn browse_commit_applies_the_recalled_slot() {
    let gate = SignalGate::new();
    let mut board = SimBoard::new(&gate, CFG);
    board.seed_store(&[1000, 2000, 3000], 0, 0);
    let mut rig = Rig::new(&gate, board);
    rig.boot_to_run();

    rig.press(2);
    rig.press(0);
    rig.press(0);
    rig.press(4);

    let ctx = rig.machine.context();
    assert_eq!(ctx.recalled_preset.ordinal(), 3);
    assert_eq!(ctx.current_limit.milliamps(), 3000);
    assert_eq!(rig.board.duty(), Some((7001, 0)));
    assert_eq!(rig.machine.mode(), SystemMode::Normal);
}

#[test]
fn edit_rejects_overflow_and_commits_digits() {
    let gate = SignalGate::new();
    let mut board = SimBoard::new(&gate, CFG);
    board.seed_store(&[2500], 0, 0);
    let mut rig = Rig::new(&gate, board);
    rig.boot_to_run();

    rig.press(4);
    assert_eq!(rig.machine.mode(), SystemMode::PresetEdit);
    assert_eq!(rig.board.shown(Region::Value), Some("[0]2500 mA"));

    rig.press(1);
    assert_eq!(rig.board.shown(Region::Status), Some("MAX"));
    assert_eq!(rig.board.shown(Region::Value), Some("[0]2500 mA"));

    rig.press(3);
    rig.press(0);
    assert_eq!(rig.board.shown(Region::Value), Some("0[3]500 mA"));

    rig.press(6);
    assert_eq!(rig.machine.context().current_limit.milliamps(), 3500);
    assert_eq!(rig.board.duty(), Some((6501, 0)));
    // Editing does not touch the store until persisted.
    assert_eq!(rig.board.peek_cell(0), 2500);
}

#[test]
fn persist_and_set_default_write_the_recalled_slot() {
    let gate = SignalGate::new();
    let mut board = SimBoard::new(&gate, CFG);
    board.seed_store(&[1000, 2000], 0, 0);
    let mut rig = Rig::new(&gate, board);
    rig.boot_to_run();

    // Recall slot 2, then raise its limit to 2100 and persist it.
    rig.press(0);
    rig.press(0);
    rig.press(4);
    rig.press(4);
    rig.press(3);
    rig.press(3);
    rig.press(0);
    rig.press(6);
    assert_eq!(rig.machine.context().current_limit.milliamps(), 2100);

    rig.press(8);
    assert_eq!(rig.board.peek_cell(CELL_WIDTH), 2100);

    rig.press(10);
    assert_eq!(rig.board.peek_cell(DEFAULT_CELL), 1);
    assert_eq!(rig.machine.context().default_preset.ordinal(), 2);
    assert!(rig.board.store_accessed_with_triggers_masked());
}

#[test]
fn countermeasure_requires_a_confirming_press() {
    let gate = SignalGate::new();
    let mut board = SimBoard::new(&gate, CFG);
    board.seed_store(&[1000, 2000], 0, 1);
    let mut rig = Rig::new(&gate, board);
    rig.boot_to_run();
    assert!(rig.machine.context().countermeasure);
    assert!(rig.board.output_on());

    rig.press(1);
    assert!(!rig.board.output_on());
    assert_eq!(rig.machine.mode(), SystemMode::Normal);

    rig.run_for(Duration::from_millis(300));
    assert!(!rig.board.output_on());
    rig.press(1);
    assert_eq!(rig.machine.mode(), SystemMode::PresetBrowse);
    assert!(!rig.board.output_on());

    rig.press(4);
    assert_eq!(rig.machine.mode(), SystemMode::Normal);
    rig.run_for(Duration::from_millis(30));
    assert!(rig.board.output_on());
}

#[test]
fn countermeasure_timeout_resumes_the_load() {
    let gate = SignalGate::new();
    let mut board = SimBoard::new(&gate, CFG);
    board.seed_store(&[1000], 0, 1);
    let mut rig = Rig::new(&gate, board);
    rig.boot_to_run();

    rig.press(0);
    assert!(!rig.board.output_on());
    rig.run_for(CFG.confirm_window + Duration::from_millis(50));

    assert_eq!(rig.machine.mode(), SystemMode::Normal);
    assert!(rig.board.output_on());
    assert_eq!(rig.machine.context().current_limit.milliamps(), 1000);
}

#[test]
fn boot_toggle_is_not_persisted() {
    let gate = SignalGate::new();
    let mut board = SimBoard::new(&gate, CFG);
    board.seed_store(&[1000], 0, 0);
    board.press_after(Duration::ZERO, Duration::from_millis(3500));
    let mut rig = Rig::new(&gate, board);

    rig.power_up();
    assert_eq!(rig.listen, Listen::Button);
    assert_eq!(rig.machine.mode(), SystemMode::Normal);
    assert!(rig.machine.context().countermeasure);
    assert_eq!(rig.board.peek_cell(COUNTERMEASURE_CELL), 0);
}

#[test]
fn calibration_display_then_return_to_run() {
    let gate = SignalGate::new();
    let mut board = SimBoard::new(&gate, CFG);
    board.seed_store(&[1000], 0, 0);
    board.press_after(Duration::ZERO, Duration::from_millis(10_500));
    let mut rig = Rig::new(&gate, board);

    rig.power_up();
    assert_eq!(rig.machine.mode(), SystemMode::Calibration);
    assert_eq!(rig.board.shown(Region::Title), Some("CALIBRATION"));

    rig.press(1);
    assert_eq!(rig.board.shown(Region::Value), Some("1.000 V"));
    assert_eq!(rig.board.duty(), Some((1, 0)));
    assert!(!rig.board.output_on());

    rig.press(0);
    assert_eq!(rig.machine.mode(), SystemMode::Normal);
    assert_eq!(rig.machine.context().current_limit.milliamps(), 1000);
    assert_eq!(rig.board.duty(), Some((9001, 0)));
}

#[test]
fn calibration_sweep_reports_the_trip_point() {
    let gate = SignalGate::new();
    let mut board =
        SimBoard::new(&gate, CFG).with_sense(SenseModel::Crossover { milliamps: 4200 });
    board.seed_store(&[1000], 0, 0);
    board.press_after(Duration::ZERO, Duration::from_millis(10_500));
    let mut rig = Rig::new(&gate, board);

    rig.power_up();
    rig.press(6);

    assert_eq!(rig.board.shown(Region::Value), Some("4200 mA"));
    assert_eq!(rig.board.max_applied_limit(), 4200);
    assert_eq!(rig.machine.mode(), SystemMode::Calibration);
    assert!(!rig.board.triggers_unmasked());
}

#[test]
fn calibration_toggle_persists_the_countermeasure() {
    let gate = SignalGate::new();
    let mut board = SimBoard::new(&gate, CFG);
    board.seed_store(&[1000], 0, 0);
    board.press_after(Duration::ZERO, Duration::from_millis(10_500));
    let mut rig = Rig::new(&gate, board);

    rig.power_up();
    rig.press(10);

    assert_eq!(rig.board.peek_cell(COUNTERMEASURE_CELL), 1);
    assert!(rig.machine.context().countermeasure);
    assert_eq!(rig.board.shown(Region::Value), Some("BACK EMF ON"));
}
