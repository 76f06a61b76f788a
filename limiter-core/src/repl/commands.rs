//! Remote command executor.
//!
//! Glues parsed commands to the preset store and the current controller. All
//! range validation happens before anything is written, so a rejected command
//! never mutates state.

use core::fmt::{self, Write as _};

use heapless::String;

use crate::board::Board;
use crate::config::LimiterConfig;
use crate::context::{SystemContext, SystemMode};
use crate::controller::{CurrentController, CurrentLimit, SweepOutcome};
use crate::gate::SignalGate;
use crate::store::{ByteStore, PresetSlot, PresetStore, StoreError};
use crate::telemetry::{TelemetryEventKind, TelemetryRecorder};

use super::catalog;
use super::grammar::{self, BackEmfAction, Command, ReadTarget, StoreValue};
use super::RemoteLink;

/// Longest reply line produced by the executor.
pub const REPLY_CAPACITY: usize = 96;

/// Command execution successes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Executed; reply `OK`.
    Done,
    /// Executed and already streamed its own status lines.
    Streamed,
    /// Leave the session after replying `OK`.
    Exit { diagnostics: bool },
}

/// Errors surfaced while executing a command.
#[derive(Debug, PartialEq)]
pub enum CommandError<'a, E> {
    Parse(grammar::ParseError<'a>),
    SlotOutOfRange(u32),
    CurrentOutOfRange(u32),
    UnknownTopic(&'a str),
    Store(StoreError<E>),
}

impl<'a, E> From<grammar::ParseError<'a>> for CommandError<'a, E> {
    fn from(error: grammar::ParseError<'a>) -> Self {
        Self::Parse(error)
    }
}

impl<'a, E> From<StoreError<E>> for CommandError<'a, E> {
    fn from(error: StoreError<E>) -> Self {
        Self::Store(error)
    }
}

impl<'a, E: fmt::Debug> fmt::Display for CommandError<'a, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Parse(err) => err.fmt(f),
            CommandError::SlotOutOfRange(slot) => write!(f, "slot {slot} out of range"),
            CommandError::CurrentOutOfRange(value) => write!(f, "current {value} mA out of range"),
            CommandError::UnknownTopic(topic) => write!(f, "no help for {topic}"),
            CommandError::Store(err) => err.fmt(f),
        }
    }
}

pub type CommandResult<'a, B> = Result<CommandOutcome, CommandError<'a, <B as ByteStore>::Error>>;

/// Borrowed view of the foreground state a command may touch.
pub struct CommandExecutor<'r> {
    pub signals: &'r SignalGate,
    pub cfg: &'r LimiterConfig,
    pub ctx: &'r mut SystemContext,
    pub store: &'r PresetStore,
    pub controller: &'r CurrentController,
    pub telemetry: &'r mut TelemetryRecorder,
}

impl CommandExecutor<'_> {
    /// Parses and runs one line. Status lines are written to `board` as the
    /// command runs; the final `OK`/`ERROR` is left to [`respond`].
    pub fn execute<'a, B: Board>(&mut self, board: &mut B, line: &'a str) -> CommandResult<'a, B> {
        match grammar::parse(line)? {
            Command::Store { slot, value } => self.store_preset(board, slot, value),
            Command::Read(target) => self.read(board, target),
            Command::Calibrate => {
                let report = self
                    .controller
                    .calibrate(self.signals, board, &mut self.ctx.current_limit);
                emit(board, format_args!("{report}"));
                Ok(CommandOutcome::Done)
            }
            Command::CompareTest { milliamps } => {
                let target = self.limit(milliamps)?;
                let outcome = self.controller.compare_test(
                    self.signals,
                    board,
                    &mut self.ctx.current_limit,
                    target,
                );
                self.signals.disable_triggers(board);
                emit(board, format_args!("COMP {outcome}"));
                Ok(CommandOutcome::Done)
            }
            Command::BackEmf(action) => self.back_emf(board, action),
            Command::CurrentSweep => Ok(self.sweep(board)),
            Command::Exit { diagnostics } => Ok(CommandOutcome::Exit { diagnostics }),
            Command::Status => {
                self.status(board);
                Ok(CommandOutcome::Done)
            }
            Command::Help { topic } => help(board, topic),
        }
    }

    fn slot<'a, E>(&self, ordinal: u32) -> Result<PresetSlot, CommandError<'a, E>> {
        PresetSlot::from_ordinal(ordinal, self.cfg).ok_or(CommandError::SlotOutOfRange(ordinal))
    }

    fn limit<'a, E>(&self, milliamps: u32) -> Result<CurrentLimit, CommandError<'a, E>> {
        u16::try_from(milliamps)
            .ok()
            .and_then(|value| CurrentLimit::new(value, self.cfg))
            .ok_or(CommandError::CurrentOutOfRange(milliamps))
    }

    fn store_preset<'a, B: Board>(
        &mut self,
        board: &mut B,
        ordinal: u32,
        value: StoreValue,
    ) -> CommandResult<'a, B> {
        let slot = self.slot(ordinal)?;
        let now = board.now();
        match value {
            StoreValue::Milliamps(milliamps) => {
                let limit = self.limit(milliamps)?;
                self.store.save(self.signals, board, slot, limit)?;
                self.telemetry
                    .record(TelemetryEventKind::PresetSaved(slot), now, limit);
            }
            StoreValue::Default => {
                self.store.set_default(self.signals, board, slot)?;
                self.ctx.default_preset = slot;
                self.telemetry.record(
                    TelemetryEventKind::DefaultChanged(slot),
                    now,
                    self.ctx.current_limit,
                );
            }
        }
        Ok(CommandOutcome::Done)
    }

    fn read<'a, B: Board>(&mut self, board: &mut B, target: ReadTarget) -> CommandResult<'a, B> {
        match target {
            ReadTarget::Slot(ordinal) => {
                let slot = self.slot(ordinal)?;
                let limit = self.store.load(self.signals, board, slot)?;
                emit(board, format_args!("SLOT {slot} {limit}"));
            }
            ReadTarget::All => {
                for slot in PresetSlot::all(self.cfg) {
                    let limit = self.store.load(self.signals, board, slot)?;
                    emit(board, format_args!("SLOT {slot} {limit}"));
                }
            }
        }
        let default = self.store.default_slot(self.signals, board)?;
        emit(board, format_args!("DEFAULT {default}"));
        Ok(CommandOutcome::Done)
    }

    fn back_emf<'a, B: Board>(&mut self, board: &mut B, action: BackEmfAction) -> CommandResult<'a, B> {
        let enabled = match action {
            BackEmfAction::On => true,
            BackEmfAction::Off => false,
            BackEmfAction::Check => {
                let stored = self.store.countermeasure(self.signals, board)?;
                emit(board, format_args!("BACK_EMF {}", on_off(stored)));
                return Ok(CommandOutcome::Done);
            }
        };
        self.store.set_countermeasure(self.signals, board, enabled)?;
        self.ctx.countermeasure = enabled;
        let now = board.now();
        self.telemetry.record(
            TelemetryEventKind::CountermeasureChanged(enabled),
            now,
            self.ctx.current_limit,
        );
        Ok(CommandOutcome::Done)
    }

    fn sweep<B: Board>(&mut self, board: &mut B) -> CommandOutcome {
        emit(board, format_args!("SWEEP START"));
        self.ctx.enter(SystemMode::DiagnosticSweep);
        let outcome = self
            .controller
            .sweep(self.signals, board, &mut self.ctx.current_limit);
        self.signals.disable_triggers(board);
        self.ctx.enter(SystemMode::RemoteSession);
        match outcome {
            SweepOutcome::Tripped(limit) => {
                emit(board, format_args!("SWEEP TRIP {}", limit.milliamps()));
            }
            SweepOutcome::OutOfRange => emit(board, format_args!("SWEEP OUT OF RANGE")),
            SweepOutcome::Cancelled => emit(board, format_args!("SWEEP CANCELLED")),
        }
        CommandOutcome::Streamed
    }

    fn status<B: Board>(&self, board: &mut B) {
        let ctx = &*self.ctx;
        emit(board, format_args!("MODE {}", ctx.mode()));
        emit(board, format_args!("LIMIT {}", ctx.current_limit));
        emit(
            board,
            format_args!(
                "PRESET {} DEFAULT {}",
                ctx.recalled_preset, ctx.default_preset
            ),
        );
        emit(board, format_args!("BACK_EMF {}", on_off(ctx.countermeasure)));
        match ctx.line_half_period {
            Some(half) => emit(board, format_args!("HALF_PERIOD {} us", half.as_micros())),
            None => emit(board, format_args!("HALF_PERIOD -")),
        }
        emit(board, format_args!("DUTY {} %", ctx.duty_percent));
        emit(board, format_args!("TRIPS {}", self.telemetry.trip_count()));
    }
}

fn help<'a, B: Board>(board: &mut B, topic: Option<&'a str>) -> CommandResult<'a, B> {
    match topic {
        Some(name) => {
            let spec = catalog::find(name).ok_or(CommandError::UnknownTopic(name))?;
            emit(board, format_args!("{} - {}", spec.usage, spec.summary));
        }
        None => {
            for spec in catalog::commands() {
                emit(board, format_args!("{}", spec.usage));
            }
        }
    }
    Ok(CommandOutcome::Done)
}

/// Writes the closing reply for a command result.
pub fn respond<L, E>(link: &mut L, result: &Result<CommandOutcome, CommandError<'_, E>>)
where
    L: RemoteLink + ?Sized,
    E: fmt::Debug,
{
    match result {
        Ok(CommandOutcome::Done | CommandOutcome::Exit { .. }) => link.write_line("OK"),
        Ok(CommandOutcome::Streamed) => {}
        Err(err) => emit(link, format_args!("ERROR {err}")),
    }
}

/// Formats one reply line into a bounded buffer. Overlong lines are truncated.
pub fn emit<L: RemoteLink + ?Sized>(link: &mut L, args: fmt::Arguments<'_>) {
    let mut line: String<REPLY_CAPACITY> = String::new();
    let _ = line.write_fmt(args);
    link.write_line(&line);
}

const fn on_off(enabled: bool) -> &'static str {
    if enabled { "ON" } else { "OFF" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SenseModel, SimBoard, SimStoreError};
    use crate::store::CELL_WIDTH;

    const CFG: LimiterConfig = LimiterConfig::DEFAULT;

    struct Fixture {
        ctx: SystemContext,
        store: PresetStore,
        controller: CurrentController,
        telemetry: TelemetryRecorder,
    }

    impl Fixture {
        fn new() -> Self {
            let mut ctx = SystemContext::new();
            ctx.enter(SystemMode::RemoteSession);
            Self {
                ctx,
                store: PresetStore::new(CFG),
                controller: CurrentController::new(CFG),
                telemetry: TelemetryRecorder::new(),
            }
        }

        fn run<'a>(
            &mut self,
            gate: &SignalGate,
            board: &mut SimBoard<'_>,
            line: &'a str,
        ) -> Result<CommandOutcome, CommandError<'a, SimStoreError>> {
            let mut executor = CommandExecutor {
                signals: gate,
                cfg: &CFG,
                ctx: &mut self.ctx,
                store: &self.store,
                controller: &self.controller,
                telemetry: &mut self.telemetry,
            };
            let result = executor.execute(board, line);
            respond(board, &result);
            result
        }
    }

    #[track_caller]
    fn assert_replies(board: &mut SimBoard<'_>, expected: &[&str]) {
        let lines = board.drain_replies();
        let actual: heapless::Vec<&str, 64> = lines.iter().map(|line| line.as_str()).collect();
        assert_eq!(actual.as_slice(), expected);
    }

    #[test]
    fn store_then_read_back() {
        let gate = SignalGate::new();
        let mut board = SimBoard::new(&gate, CFG);
        board.seed_store(&[], 0, 0);
        let mut fixture = Fixture::new();

        assert_eq!(fixture.run(&gate, &mut board, "STORE 4 2500"), Ok(CommandOutcome::Done));
        assert_eq!(fixture.run(&gate, &mut board, "store 4 default"), Ok(CommandOutcome::Done));
        assert_eq!(fixture.ctx.default_preset.ordinal(), 4);
        let _ = board.drain_replies();

        assert_eq!(fixture.run(&gate, &mut board, "READ 4"), Ok(CommandOutcome::Done));
        assert_replies(&mut board, &["SLOT 4 2500 mA", "DEFAULT 4", "OK"]);
        assert_eq!(board.peek_cell(3 * CELL_WIDTH), 2500);
        assert!(board.store_accessed_with_triggers_masked());
    }

    #[test]
    fn out_of_range_slot_is_rejected_without_writing() {
        let gate = SignalGate::new();
        let mut board = SimBoard::new(&gate, CFG);
        board.seed_store(&[100; 10], 0, 0);
        let mut fixture = Fixture::new();

        let result = fixture.run(&gate, &mut board, "STORE 11 5000");
        assert_eq!(result, Err(CommandError::SlotOutOfRange(11)));
        assert_replies(&mut board, &["ERROR slot 11 out of range"]);
        for index in 0..u16::from(CFG.preset_count) {
            assert_eq!(board.peek_cell(index * CELL_WIDTH), 100);
        }
        assert!(fixture.telemetry.is_empty());
    }

    #[test]
    fn out_of_range_current_is_rejected() {
        let gate = SignalGate::new();
        let mut board = SimBoard::new(&gate, CFG);
        board.seed_store(&[], 0, 0);
        let mut fixture = Fixture::new();

        let result = fixture.run(&gate, &mut board, "STORE 1 10001");
        assert_eq!(result, Err(CommandError::CurrentOutOfRange(10_001)));
        assert_eq!(board.peek_cell(0), 0);
        let result = fixture.run(&gate, &mut board, "COMP_TEST 70000");
        assert_eq!(result, Err(CommandError::CurrentOutOfRange(70_000)));
    }

    #[test]
    fn read_all_lists_every_slot() {
        let gate = SignalGate::new();
        let mut board = SimBoard::new(&gate, CFG);
        board.seed_store(&[1000, 2000, 3000], 1, 0);
        let mut fixture = Fixture::new();

        fixture.run(&gate, &mut board, "READ ALL").unwrap();
        let lines = board.drain_replies();
        assert_eq!(lines.len(), usize::from(CFG.preset_count) + 2);
        assert_eq!(lines[0].as_str(), "SLOT 1 1000 mA");
        assert_eq!(lines[2].as_str(), "SLOT 3 3000 mA");
        assert_eq!(lines[9].as_str(), "SLOT 10 0 mA");
        assert_eq!(lines[10].as_str(), "DEFAULT 2");
        assert_eq!(lines[11].as_str(), "OK");
    }

    #[test]
    fn back_emf_persists_and_reports() {
        let gate = SignalGate::new();
        let mut board = SimBoard::new(&gate, CFG);
        board.seed_store(&[], 0, 0);
        let mut fixture = Fixture::new();

        fixture.run(&gate, &mut board, "BACK_EMF ON").unwrap();
        assert!(fixture.ctx.countermeasure);
        let _ = board.drain_replies();
        fixture.run(&gate, &mut board, "BACK_EMF CHECK").unwrap();
        assert_replies(&mut board, &["BACK_EMF ON", "OK"]);
        fixture.run(&gate, &mut board, "BACK_EMF OFF").unwrap();
        assert!(!fixture.ctx.countermeasure);
        assert_eq!(fixture.telemetry.len(), 2);
    }

    #[test]
    fn calibrate_reports_reference_at_maximum() {
        let gate = SignalGate::new();
        let mut board = SimBoard::new(&gate, CFG);
        let mut fixture = Fixture::new();

        fixture.run(&gate, &mut board, "CALIBRATE").unwrap();
        assert_replies(&mut board, &["REF 1.000 V", "OK"]);
        assert_eq!(fixture.ctx.current_limit.milliamps(), CFG.max_current_ma);
        assert!(!board.output_on());
        assert!(!board.triggers_unmasked());
    }

    #[test]
    fn sweep_streams_the_trip_point() {
        let gate = SignalGate::new();
        let mut board =
            SimBoard::new(&gate, CFG).with_sense(SenseModel::Crossover { milliamps: 4200 });
        let mut fixture = Fixture::new();

        assert_eq!(
            fixture.run(&gate, &mut board, "CURRENT_SWEEP"),
            Ok(CommandOutcome::Streamed)
        );
        assert_replies(&mut board, &["SWEEP START", "SWEEP TRIP 4200"]);
        assert_eq!(board.max_applied_limit(), 4200);
        assert_eq!(fixture.ctx.mode(), SystemMode::RemoteSession);
        assert_eq!(fixture.telemetry.trip_count(), 0);
    }

    #[test]
    fn compare_test_reports_the_trip_source() {
        let gate = SignalGate::new();
        let mut board =
            SimBoard::new(&gate, CFG).with_sense(SenseModel::Crossover { milliamps: 3000 });
        let mut fixture = Fixture::new();

        fixture.run(&gate, &mut board, "COMP_TEST 3500").unwrap();
        assert_replies(&mut board, &["COMP TRIP POLL 0 us", "OK"]);
        assert!(!board.triggers_unmasked());
    }

    #[test]
    fn exit_carries_the_diagnostics_choice() {
        let gate = SignalGate::new();
        let mut board = SimBoard::new(&gate, CFG);
        let mut fixture = Fixture::new();

        assert_eq!(
            fixture.run(&gate, &mut board, "EXIT"),
            Ok(CommandOutcome::Exit { diagnostics: false })
        );
        assert_eq!(
            fixture.run(&gate, &mut board, "exit diagnostics"),
            Ok(CommandOutcome::Exit { diagnostics: true })
        );
    }

    #[test]
    fn status_summarizes_the_context() {
        let gate = SignalGate::new();
        let mut board = SimBoard::new(&gate, CFG);
        let mut fixture = Fixture::new();
        fixture.ctx.current_limit = CurrentLimit::new(1500, &CFG).unwrap();
        fixture.ctx.line_half_period = Some(core::time::Duration::from_micros(8333));

        fixture.run(&gate, &mut board, "STATUS").unwrap();
        assert_replies(
            &mut board,
            &[
                "MODE REMOTE",
                "LIMIT 1500 mA",
                "PRESET 1 DEFAULT 1",
                "BACK_EMF OFF",
                "HALF_PERIOD 8333 us",
                "DUTY 0 %",
                "TRIPS 0",
                "OK",
            ]
        );
    }

    #[test]
    fn help_lists_usage_and_rejects_unknown_topics() {
        let gate = SignalGate::new();
        let mut board = SimBoard::new(&gate, CFG);
        let mut fixture = Fixture::new();

        fixture.run(&gate, &mut board, "HELP").unwrap();
        let lines = board.drain_replies();
        assert_eq!(lines.len(), catalog::commands().len() + 1);
        assert!(lines.iter().any(|line| line.as_str() == "CURRENT_SWEEP"));

        let result = fixture.run(&gate, &mut board, "HELP FROB");
        assert_eq!(result, Err(CommandError::UnknownTopic("FROB")));
        assert_replies(&mut board, &["ERROR no help for FROB"]);
    }

    #[test]
    fn store_failures_surface_as_errors() {
        let gate = SignalGate::new();
        let mut board = SimBoard::new(&gate, CFG);
        board.fail_store(true);
        let mut fixture = Fixture::new();

        let result = fixture.run(&gate, &mut board, "READ 1");
        assert!(matches!(result, Err(CommandError::Store(StoreError::Io(_)))));
        assert_eq!(board.drain_replies().len(), 1);
    }
}
