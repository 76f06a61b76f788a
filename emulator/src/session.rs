use std::io::{self, Write};
use std::time::Duration;

use crossterm::style::Stylize;
use limiter_core::config::LimiterConfig;
use limiter_core::display::{Region, Style};
use limiter_core::gate::SignalGate;
use limiter_core::menu::{poll, power_up, Listen, OperatorMachine};
use limiter_core::repl::session::LineBuffer;
use limiter_core::sim::{Frame, LineModel, SenseModel, SimBoard};

pub const HELP_TOPICS: &[(&str, &str)] = &[
    ("press", "press <secs>        - hold the button for whole seconds"),
    ("wait", "wait <ms>           - let simulated time pass"),
    ("send", "send <line>         - send one line over the remote link"),
    ("telemetry", "telemetry           - dump the event history"),
    ("help", "help                - show this list"),
    ("quit", "quit                - leave the emulator"),
];

/// Bench setup chosen on the command line.
#[derive(Clone, Copy, Debug)]
pub struct BenchOptions {
    pub line: LineModel,
    pub sense: SenseModel,
    pub boot_hold: u8,
    pub diagnostic: bool,
    pub presets: [u16; 3],
}

impl Default for BenchOptions {
    fn default() -> Self {
        Self {
            line: LineModel::mains(LimiterConfig::DEFAULT.nominal_half_period),
            sense: SenseModel::Quiet,
            boot_hold: 0,
            diagnostic: false,
            presets: [1000, 2500, 5000],
        }
    }
}

/// One stdin directive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Directive<'a> {
    Press(u8),
    Wait(Duration),
    Send(&'a str),
    Telemetry,
    Help,
    Quit,
}

impl<'a> Directive<'a> {
    pub fn parse(input: &'a str) -> Result<Self, String> {
        let (head, rest) = input
            .split_once(char::is_whitespace)
            .map_or((input, ""), |(head, rest)| (head, rest.trim()));
        match head.to_ascii_lowercase().as_str() {
            "press" => rest
                .parse::<u8>()
                .map(Directive::Press)
                .map_err(|_| format!("press needs whole seconds, got `{rest}`")),
            "wait" => rest
                .parse::<u64>()
                .map(|ms| Directive::Wait(Duration::from_millis(ms)))
                .map_err(|_| format!("wait needs milliseconds, got `{rest}`")),
            "send" => Ok(Directive::Send(rest)),
            "telemetry" => Ok(Directive::Telemetry),
            "help" => Ok(Directive::Help),
            "quit" | "exit" => Ok(Directive::Quit),
            other => Err(format!("unknown directive `{other}`")),
        }
    }
}

pub struct Session<'g> {
    board: SimBoard<'g>,
    machine: OperatorMachine<'g>,
    lines: LineBuffer,
    listen: Listen,
}

impl<'g> Session<'g> {
    /// Seeds the store, applies the boot hold and powers the machine up.
    pub fn start(gate: &'g SignalGate, options: BenchOptions) -> Self {
        let cfg = LimiterConfig::DEFAULT;
        let mut board = SimBoard::new(gate, cfg)
            .with_line(options.line)
            .with_sense(options.sense);
        board.seed_store(&options.presets, 0, 0);
        if options.boot_hold > 0 {
            board.press_after(Duration::ZERO, hold_duration(options.boot_hold));
        }

        let mut machine = OperatorMachine::new(gate, cfg, options.diagnostic);
        let listen = power_up(&mut machine, &mut board);
        Self {
            board,
            machine,
            lines: LineBuffer::new(),
            listen,
        }
    }

    pub fn is_halted(&self) -> bool {
        self.listen == Listen::Halted
    }

    pub fn apply(&mut self, directive: Directive<'_>) {
        match directive {
            Directive::Press(secs) => {
                let hold = hold_duration(secs);
                self.board.press_after(Duration::ZERO, hold);
                self.run_for(hold + self.machine.config().poll_granularity);
            }
            Directive::Wait(duration) => self.run_for(duration),
            Directive::Send(text) => {
                self.board.send_line(text);
                self.step();
            }
            Directive::Telemetry | Directive::Help | Directive::Quit => {}
        }
    }

    fn step(&mut self) {
        self.listen = poll(&mut self.machine, &mut self.board, &mut self.lines, self.listen);
    }

    fn run_for(&mut self, duration: Duration) {
        let until = self.board.elapsed() + duration;
        while self.board.elapsed() < until {
            self.step();
        }
    }

    /// Writes pending display frames and remote replies.
    pub fn flush(&mut self, out: &mut impl Write) -> io::Result<()> {
        let stamp = self.board.elapsed();
        for frame in self.board.drain_frames() {
            writeln!(out, "{:>10.3}s {}", stamp.as_secs_f64(), render_frame(&frame))?;
        }
        for reply in self.board.drain_replies() {
            writeln!(out, "{:>10.3}s < {reply}", stamp.as_secs_f64())?;
        }
        Ok(())
    }

    pub fn write_telemetry(&self, out: &mut impl Write) -> io::Result<()> {
        let telemetry = self.machine.telemetry();
        for record in telemetry.oldest_first() {
            writeln!(out, "{:>10} us {} ({})", record.at, record.event, record.limit)?;
        }
        writeln!(
            out,
            "mode {} trips {} output {}",
            self.machine.mode(),
            telemetry.trip_count(),
            if self.board.output_on() { "on" } else { "off" }
        )
    }
}

fn hold_duration(secs: u8) -> Duration {
    Duration::from_secs(u64::from(secs)) + Duration::from_millis(500)
}

fn render_frame(frame: &Frame) -> String {
    let label = match frame.region {
        Region::Title => "TITLE ",
        Region::Value => "VALUE ",
        Region::Status => "STATUS",
        Region::Detail => "DETAIL",
    };
    let text = frame.text.as_str();
    let styled = match frame.style {
        Style::Normal => text.to_string(),
        Style::Highlight => text.reverse().to_string(),
        Style::Blink => text.slow_blink().to_string(),
    };
    format!("[{label}] {styled}")
}
