//! Operator and remote state machine.
//!
//! [`OperatorMachine`] owns the [`SystemContext`] and is the only component
//! that changes the current limit or the recalled preset during interactive
//! use. Front-ends feed it one [`Input`] at a time: a measured button hold, a
//! completed remote line, or an idle tick. It answers with the [`Listen`]
//! source the front-end should watch next. [`power_up`] and [`poll`] are that
//! front-end loop for any [`Board`].

mod editor;

pub use editor::{DigitChange, DigitEditor};

use crate::board::Board;
use crate::clock::{elapsed, Micros};
use crate::config::LimiterConfig;
use crate::context::{SystemContext, SystemMode};
use crate::controller::{CurrentController, CurrentLimit, Settle, SweepOutcome};
use crate::display::{Content, DutyMeter, Region, Style};
use crate::gate::{EdgeMode, SignalGate};
use crate::hold::{
    boot_action, browse_action, calibration_action, edit_action, measure_hold, menu_action,
    BootAction, BrowseAction, CalibrationAction, EditAction, HoldSeconds, MenuAction,
};
use crate::qualifier::qualify;
use crate::repl::commands::{self, CommandExecutor, CommandOutcome};
use crate::repl::session::LineBuffer;
use crate::store::{PresetSlot, PresetStore};
use crate::telemetry::{TelemetryEventKind, TelemetryRecorder};

/// One foreground stimulus.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Input<'a> {
    /// A completed button press.
    Press(HoldSeconds),
    /// A completed remote line.
    Line(&'a str),
    /// One poll interval passed without input.
    Idle,
}

/// Input source the front-end should watch next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Listen {
    Button,
    Remote,
    /// Faulted. Nothing is serviced until power is removed.
    Halted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Startup,
    RemotePrompt { since: Micros },
    Session { resume_limit: CurrentLimit },
    CalibrationSelect,
    CalibrationResult { prior: CurrentLimit },
    Run,
    Confirm { since: Micros },
    Browse { prior_slot: PresetSlot, prior_limit: CurrentLimit },
    Edit(DigitEditor),
    ResumeOnZeroCross,
    Halted,
}

pub struct OperatorMachine<'g> {
    signals: &'g SignalGate,
    cfg: LimiterConfig,
    ctx: SystemContext,
    store: PresetStore,
    controller: CurrentController,
    telemetry: TelemetryRecorder,
    meter: DutyMeter,
    phase: Phase,
}

impl<'g> OperatorMachine<'g> {
    /// `diagnostic` selects the load-disabled posture for the whole power cycle.
    #[must_use]
    pub fn new(signals: &'g SignalGate, cfg: LimiterConfig, diagnostic: bool) -> Self {
        let mut ctx = SystemContext::new();
        ctx.diagnostic = diagnostic;
        Self {
            signals,
            cfg,
            ctx,
            store: PresetStore::new(cfg),
            controller: CurrentController::new(cfg),
            telemetry: TelemetryRecorder::new(),
            meter: DutyMeter::new(),
            phase: Phase::Startup,
        }
    }

    #[must_use]
    pub const fn context(&self) -> &SystemContext {
        &self.ctx
    }

    #[must_use]
    pub const fn telemetry(&self) -> &TelemetryRecorder {
        &self.telemetry
    }

    #[must_use]
    pub const fn config(&self) -> &LimiterConfig {
        &self.cfg
    }

    #[must_use]
    pub const fn mode(&self) -> SystemMode {
        self.ctx.mode()
    }

    /// Loads persisted state, applies the default preset and dispatches on the
    /// power-up hold.
    pub fn boot<B: Board>(&mut self, board: &mut B, hold: HoldSeconds) -> Listen {
        self.signals.disable_triggers(board);
        self.signals.request_output(board, false);
        self.load_persisted(board);
        self.controller
            .apply(self.signals, board, self.ctx.current_limit, Settle::Full);

        match boot_action(hold) {
            BootAction::RemotePrompt => {
                board.render(Content::Text("REMOTE?"), Region::Title, Style::Blink);
                board.write_line("SEND ANY LINE FOR REMOTE SESSION");
                self.phase = Phase::RemotePrompt { since: board.now() };
                Listen::Remote
            }
            BootAction::ToggleCountermeasureOnce => {
                self.ctx.countermeasure = !self.ctx.countermeasure;
                self.record(board, TelemetryEventKind::CountermeasureChanged(self.ctx.countermeasure));
                self.start_run(board)
            }
            BootAction::RemoteSession => self.open_session(board),
            BootAction::Calibration => {
                self.ctx.enter(SystemMode::Calibration);
                board.render(Content::Text("CALIBRATION"), Region::Title, Style::Highlight);
                board.render(Content::Text("HOLD TO SELECT"), Region::Status, Style::Normal);
                self.phase = Phase::CalibrationSelect;
                Listen::Button
            }
        }
    }

    /// Advances the machine by one stimulus.
    pub fn handle<B: Board>(&mut self, board: &mut B, input: Input<'_>) -> Listen {
        match (self.phase, input) {
            (Phase::Halted, _) => Listen::Halted,
            (Phase::Startup, _) => self.boot(board, HoldSeconds::default()),
            (Phase::RemotePrompt { .. }, Input::Line(_)) => self.open_session(board),
            (Phase::RemotePrompt { since }, _) => {
                if elapsed(since, board.now()) >= self.cfg.remote_prompt_window {
                    self.start_run(board)
                } else {
                    Listen::Remote
                }
            }
            (Phase::Session { resume_limit }, Input::Line(line)) => {
                self.session_line(board, line, resume_limit)
            }
            (Phase::Session { .. }, _) => Listen::Remote,
            (Phase::CalibrationSelect, Input::Press(hold)) => self.calibration_select(board, hold),
            (Phase::CalibrationResult { prior }, Input::Press(_)) => {
                self.ctx.current_limit = prior;
                self.controller
                    .apply(self.signals, board, prior, Settle::Full);
                self.start_run(board)
            }
            (Phase::Run, Input::Press(hold)) => {
                if self.ctx.countermeasure {
                    self.signals.request_output(board, false);
                    board.render(Content::Text("PRESS TO CONFIRM"), Region::Status, Style::Blink);
                    self.phase = Phase::Confirm { since: board.now() };
                    Listen::Button
                } else {
                    self.enter_menu(board, hold)
                }
            }
            (Phase::Run, _) => {
                self.service_run(board);
                Listen::Button
            }
            (Phase::Confirm { .. }, Input::Press(hold)) => self.enter_menu(board, hold),
            (Phase::Confirm { since }, _) => {
                if elapsed(since, board.now()) >= self.cfg.confirm_window {
                    self.resume_run(board)
                } else {
                    Listen::Button
                }
            }
            (Phase::Browse { prior_slot, prior_limit }, Input::Press(hold)) => {
                self.browse(board, hold, prior_slot, prior_limit)
            }
            (Phase::Edit(editor), Input::Press(hold)) => self.edit(board, hold, editor),
            (Phase::ResumeOnZeroCross, _) => {
                if self.signals.zero_cross.is_raised() {
                    self.meter.reset();
                    self.phase = Phase::Run;
                    self.render_run(board);
                }
                Listen::Button
            }
            (
                Phase::CalibrationSelect
                | Phase::CalibrationResult { .. }
                | Phase::Browse { .. }
                | Phase::Edit(_),
                _,
            ) => {
                self.service_menu(board);
                Listen::Button
            }
        }
    }

    fn load_persisted<B: Board>(&mut self, board: &mut B) {
        let loaded = self
            .store
            .check_integrity(self.signals, board)
            .and_then(|report| {
                let slot = self.store.default_slot(self.signals, board)?;
                let limit = self.store.load(self.signals, board, slot)?;
                let countermeasure = self.store.countermeasure(self.signals, board)?;
                Ok((report, slot, limit, countermeasure))
            });

        match loaded {
            Ok((report, slot, limit, countermeasure)) => {
                if !report.is_clean() {
                    let cells = report.repaired_count()
                        + u32::from(report.default_reset)
                        + u32::from(report.countermeasure_reset);
                    let cells = u8::try_from(cells).unwrap_or(u8::MAX);
                    self.record(board, TelemetryEventKind::IntegrityRepaired(cells));
                }
                self.ctx.default_preset = slot;
                self.ctx.recalled_preset = slot;
                self.ctx.current_limit = limit;
                self.ctx.countermeasure = countermeasure;
            }
            Err(_) => {
                self.ctx.default_preset = PresetSlot::FIRST;
                self.ctx.recalled_preset = PresetSlot::FIRST;
                self.ctx.current_limit = CurrentLimit::ZERO;
                self.ctx.countermeasure = false;
                self.record(board, TelemetryEventKind::StoreFailure);
            }
        }
    }

    fn open_session<B: Board>(&mut self, board: &mut B) -> Listen {
        self.signals.request_output(board, false);
        self.signals.disable_triggers(board);
        self.ctx.enter(SystemMode::RemoteSession);
        self.phase = Phase::Session {
            resume_limit: self.ctx.current_limit,
        };
        self.record(board, TelemetryEventKind::SessionOpened);
        board.render(Content::Text("REMOTE"), Region::Title, Style::Highlight);
        board.write_line("REMOTE READY");
        Listen::Remote
    }

    fn session_line<B: Board>(&mut self, board: &mut B, line: &str, resume_limit: CurrentLimit) -> Listen {
        if line.trim().is_empty() {
            return Listen::Remote;
        }
        let mut executor = CommandExecutor {
            signals: self.signals,
            cfg: &self.cfg,
            ctx: &mut self.ctx,
            store: &self.store,
            controller: &self.controller,
            telemetry: &mut self.telemetry,
        };
        let result = executor.execute(board, line);
        commands::respond(board, &result);

        match result {
            Ok(CommandOutcome::Exit { diagnostics }) => {
                self.record(
                    board,
                    TelemetryEventKind::SessionClosed {
                        diagnostic: diagnostics,
                    },
                );
                if diagnostics {
                    self.ctx.diagnostic = true;
                }
                self.ctx.current_limit = resume_limit;
                self.controller
                    .apply(self.signals, board, resume_limit, Settle::Full);
                self.start_run(board)
            }
            _ => Listen::Remote,
        }
    }

    fn calibration_select<B: Board>(&mut self, board: &mut B, hold: HoldSeconds) -> Listen {
        let prior = self.ctx.current_limit;
        match calibration_action(hold) {
            CalibrationAction::Display => {
                let report = self
                    .controller
                    .calibrate(self.signals, board, &mut self.ctx.current_limit);
                board.render(
                    Content::Millivolts(report.reference_millivolts),
                    Region::Value,
                    Style::Highlight,
                );
                board.render(Content::Milliamps(report.limit.milliamps()), Region::Detail, Style::Normal);
            }
            CalibrationAction::Sweep => {
                self.ctx.enter(SystemMode::DiagnosticSweep);
                board.render(Content::Text("SWEEP"), Region::Title, Style::Highlight);
                let outcome = self
                    .controller
                    .sweep(self.signals, board, &mut self.ctx.current_limit);
                self.signals.disable_triggers(board);
                match outcome {
                    SweepOutcome::Tripped(limit) => {
                        board.render(Content::Milliamps(limit.milliamps()), Region::Value, Style::Highlight);
                    }
                    SweepOutcome::OutOfRange => {
                        board.render(Content::Text("OUT OF RANGE"), Region::Value, Style::Blink);
                    }
                    SweepOutcome::Cancelled => {
                        board.render(Content::Text("CANCELLED"), Region::Value, Style::Normal);
                    }
                }
                self.ctx.enter(SystemMode::Calibration);
            }
            CalibrationAction::ToggleCountermeasure => {
                let enabled = !self.ctx.countermeasure;
                if self.store.set_countermeasure(self.signals, board, enabled).is_ok() {
                    self.ctx.countermeasure = enabled;
                    self.record(board, TelemetryEventKind::CountermeasureChanged(enabled));
                } else {
                    self.record(board, TelemetryEventKind::StoreFailure);
                }
                let text = if self.ctx.countermeasure { "BACK EMF ON" } else { "BACK EMF OFF" };
                board.render(Content::Text(text), Region::Value, Style::Highlight);
            }
        }
        board.render(Content::Text("PRESS TO RUN"), Region::Status, Style::Normal);
        self.phase = Phase::CalibrationResult { prior };
        Listen::Button
    }

    fn start_run<B: Board>(&mut self, board: &mut B) -> Listen {
        if self.ctx.diagnostic {
            self.signals.request_output(board, false);
            board.use_synthetic_edges(self.cfg.nominal_half_period);
            self.ctx.line_half_period = Some(self.cfg.nominal_half_period);
            self.signals.arm_zero_cross(board, EdgeMode::Falling);
            self.signals.enable_triggers(board);
            return self.resume_run(board);
        }

        self.ctx.enter(SystemMode::Qualifying);
        board.render(Content::Text("QUALIFYING"), Region::Title, Style::Normal);
        match qualify(self.signals, board, &self.cfg) {
            Ok(qualification) => {
                self.ctx.line_half_period = Some(qualification.half_period);
                self.record(board, TelemetryEventKind::Qualified);
                self.resume_run(board)
            }
            Err(code) => {
                self.ctx.latch_fault(code);
                self.record(board, TelemetryEventKind::Fault(code));
                board.render(Content::Text(code.message()), Region::Title, Style::Blink);
                self.phase = Phase::Halted;
                Listen::Halted
            }
        }
    }

    fn resume_run<B: Board>(&mut self, board: &mut B) -> Listen {
        self.ctx.enter(SystemMode::Normal);
        self.signals.request_output(board, !self.ctx.diagnostic);
        self.meter.reset();
        self.phase = Phase::Run;
        self.render_run(board);
        Listen::Button
    }

    fn enter_menu<B: Board>(&mut self, board: &mut B, hold: HoldSeconds) -> Listen {
        match menu_action(hold) {
            MenuAction::Browse => {
                self.ctx.enter(SystemMode::PresetBrowse);
                self.phase = Phase::Browse {
                    prior_slot: self.ctx.recalled_preset,
                    prior_limit: self.ctx.current_limit,
                };
                self.render_browse(board);
                Listen::Button
            }
            MenuAction::Edit => {
                self.ctx.enter(SystemMode::PresetEdit);
                let editor = DigitEditor::new(self.ctx.current_limit, &self.cfg);
                board.render(Content::Text("EDIT"), Region::Title, Style::Highlight);
                board.render(editor.content(), Region::Value, Style::Normal);
                self.phase = Phase::Edit(editor);
                Listen::Button
            }
            MenuAction::Persist => {
                let slot = self.ctx.recalled_preset;
                let limit = self.ctx.current_limit;
                if self.store.save(self.signals, board, slot, limit).is_ok() {
                    self.record(board, TelemetryEventKind::PresetSaved(slot));
                    board.render(Content::Slot(slot), Region::Status, Style::Highlight);
                } else {
                    self.store_failed(board);
                }
                self.exit_menu(board)
            }
            MenuAction::SetDefault => {
                let slot = self.ctx.recalled_preset;
                if self.store.set_default(self.signals, board, slot).is_ok() {
                    self.ctx.default_preset = slot;
                    self.record(board, TelemetryEventKind::DefaultChanged(slot));
                    board.render(Content::Text("DEFAULT SET"), Region::Status, Style::Highlight);
                } else {
                    self.store_failed(board);
                }
                self.exit_menu(board)
            }
        }
    }

    fn browse<B: Board>(
        &mut self,
        board: &mut B,
        hold: HoldSeconds,
        prior_slot: PresetSlot,
        prior_limit: CurrentLimit,
    ) -> Listen {
        match browse_action(hold) {
            BrowseAction::Next => {
                self.ctx.recalled_preset = self.ctx.recalled_preset.next(&self.cfg);
                self.render_browse(board);
                Listen::Button
            }
            BrowseAction::Commit => {
                let slot = self.ctx.recalled_preset;
                match self.store.load(self.signals, board, slot) {
                    Ok(limit) => {
                        self.ctx.current_limit = limit;
                        self.controller.apply(self.signals, board, limit, Settle::Full);
                        self.record(board, TelemetryEventKind::PresetCommitted(slot));
                    }
                    Err(_) => {
                        self.ctx.recalled_preset = prior_slot;
                        self.store_failed(board);
                    }
                }
                self.exit_menu(board)
            }
            BrowseAction::Cancel => {
                self.ctx.recalled_preset = prior_slot;
                self.ctx.current_limit = prior_limit;
                self.exit_menu(board)
            }
        }
    }

    fn edit<B: Board>(&mut self, board: &mut B, hold: HoldSeconds, mut editor: DigitEditor) -> Listen {
        match edit_action(hold) {
            EditAction::Increment => {
                if editor.increment() == DigitChange::Rejected {
                    board.render(Content::Text("MAX"), Region::Status, Style::Blink);
                }
            }
            EditAction::NextDigit => editor.advance(),
            EditAction::Commit => {
                let limit = editor.limit(&self.cfg);
                self.ctx.current_limit = limit;
                self.controller.apply(self.signals, board, limit, Settle::Full);
                return self.exit_menu(board);
            }
        }
        board.render(editor.content(), Region::Value, Style::Normal);
        self.phase = Phase::Edit(editor);
        Listen::Button
    }

    fn exit_menu<B: Board>(&mut self, board: &mut B) -> Listen {
        if self.ctx.countermeasure && !self.ctx.diagnostic {
            self.ctx.enter(SystemMode::Normal);
            self.signals.zero_cross.clear();
            self.signals.request_output(board, true);
            board.render(Content::Text("SYNC"), Region::Status, Style::Normal);
            self.phase = Phase::ResumeOnZeroCross;
            Listen::Button
        } else {
            self.resume_run(board)
        }
    }

    fn service_run<B: Board>(&mut self, board: &mut B) {
        let trip = self.signals.overcurrent.raised_at();
        let crossing = self.signals.zero_cross.raised_at();
        if trip.is_some() {
            self.signals.overcurrent.clear();
        }
        if crossing.is_some() {
            self.signals.zero_cross.clear();
        }

        // Timestamps wrap; a trip less than one half period ahead of the
        // crossing belongs to the cycle the crossing closes.
        let half = self.ctx.line_half_period.unwrap_or(self.cfg.nominal_half_period);
        let trip_first = match (trip, crossing) {
            (Some(trip_at), Some(cross_at)) => elapsed(trip_at, cross_at) <= half,
            _ => true,
        };
        if trip_first {
            self.on_trip(board, trip);
            self.on_crossing(board, crossing);
        } else {
            self.on_crossing(board, crossing);
            self.on_trip(board, trip);
        }
    }

    /// Trips while a menu is up are recorded and flagged in the detail
    /// region without leaving the menu. Crossings are dropped; the meter
    /// restarts when the run display comes back.
    fn service_menu<B: Board>(&mut self, board: &mut B) {
        self.signals.zero_cross.clear();
        if self.signals.overcurrent.is_raised() {
            self.signals.overcurrent.clear();
            self.record(board, TelemetryEventKind::Trip);
            board.render(Content::Text("TRIP"), Region::Detail, Style::Blink);
        }
    }

    fn on_trip<B: Board>(&mut self, board: &mut B, trip: Option<Micros>) {
        if let Some(at) = trip {
            self.meter.on_trip(at);
            self.record(board, TelemetryEventKind::Trip);
        }
    }

    fn on_crossing<B: Board>(&mut self, board: &mut B, crossing: Option<Micros>) {
        let Some(at) = crossing else { return };
        let half = self.ctx.line_half_period.unwrap_or(self.cfg.nominal_half_period);
        let Some(percent) = self.meter.on_zero_cross(at, half) else { return };
        let percent = if self.signals.output_requested() { percent } else { 0 };
        if percent != self.ctx.duty_percent {
            self.ctx.duty_percent = percent;
            board.render(Content::Percent(percent), Region::Detail, Style::Normal);
        }
    }

    fn render_run<B: Board>(&self, board: &mut B) {
        let title = if self.ctx.diagnostic { "DIAGNOSTIC" } else { "RUN" };
        board.render(Content::Text(title), Region::Title, Style::Normal);
        board.render(
            Content::Milliamps(self.ctx.current_limit.milliamps()),
            Region::Value,
            Style::Highlight,
        );
        board.render(Content::Slot(self.ctx.recalled_preset), Region::Status, Style::Normal);
        board.render(Content::Percent(self.ctx.duty_percent), Region::Detail, Style::Normal);
    }

    fn render_browse<B: Board>(&mut self, board: &mut B) {
        let slot = self.ctx.recalled_preset;
        board.render(Content::Text("PRESET"), Region::Title, Style::Highlight);
        board.render(Content::Slot(slot), Region::Status, Style::Highlight);
        match self.store.load(self.signals, board, slot) {
            Ok(limit) => board.render(Content::Milliamps(limit.milliamps()), Region::Value, Style::Normal),
            Err(_) => self.store_failed(board),
        }
    }

    fn store_failed<B: Board>(&mut self, board: &mut B) {
        board.render(Content::Text("STORE ERROR"), Region::Status, Style::Blink);
        self.record(board, TelemetryEventKind::StoreFailure);
    }

    fn record<B: Board>(&mut self, board: &mut B, event: TelemetryEventKind) {
        let now = board.now();
        self.telemetry.record(event, now, self.ctx.current_limit);
    }
}

/// Measures the power-up hold and boots the machine.
pub fn power_up<B: Board>(machine: &mut OperatorMachine<'_>, board: &mut B) -> Listen {
    let cfg = *machine.config();
    let hold = if board.pressed() {
        measure_hold(board, cfg.poll_granularity)
    } else {
        HoldSeconds::default()
    };
    machine.boot(board, hold)
}

/// Runs one foreground iteration against the requested input source.
pub fn poll<B: Board>(
    machine: &mut OperatorMachine<'_>,
    board: &mut B,
    lines: &mut LineBuffer,
    listen: Listen,
) -> Listen {
    let cfg = *machine.config();
    match listen {
        Listen::Halted => {
            board.delay(cfg.poll_granularity);
            Listen::Halted
        }
        Listen::Button => {
            if board.pressed() {
                let hold = measure_hold(board, cfg.poll_granularity);
                machine.handle(board, Input::Press(hold))
            } else {
                board.delay(cfg.poll_granularity);
                machine.handle(board, Input::Idle)
            }
        }
        Listen::Remote => {
            while let Some(byte) = board.read_byte() {
                match lines.push(byte) {
                    Some(Ok(line)) => return machine.handle(board, Input::Line(line)),
                    Some(Err(err)) => commands::emit(board, format_args!("ERROR {err}")),
                    None => {}
                }
            }
            board.delay(cfg.poll_granularity);
            machine.handle(board, Input::Idle)
        }
    }
}
