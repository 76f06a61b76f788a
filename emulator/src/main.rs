mod session;

use std::env;
use std::io::{self, BufRead, Write};
use std::process;
use std::time::Duration;

use limiter_core::gate::SignalGate;
use limiter_core::sim::{LineModel, SenseModel};
use session::{BenchOptions, Directive, Session, HELP_TOPICS};

const USAGE: &str = "Usage: limiter-emulator [--line <50|60|flat>] [--load <mA>] [--hold <secs>] [--diagnostic]";

fn main() -> io::Result<()> {
    let options = parse_options().unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("{USAGE}");
        process::exit(2);
    });

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    let gate = SignalGate::new();
    let mut session = Session::start(&gate, options);
    let mut line = String::new();

    writeln!(
        writer,
        "Current limiter emulator ready. Type `help` for directives or `quit` to leave."
    )?;
    session.flush(&mut writer)?;

    loop {
        line.clear();
        write!(writer, "> ")?;
        writer.flush()?;

        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            writeln!(writer)?;
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let directive = match Directive::parse(trimmed) {
            Ok(directive) => directive,
            Err(err) => {
                eprintln!("{err}");
                continue;
            }
        };
        match directive {
            Directive::Quit => {
                writeln!(writer, "Session closed.")?;
                break;
            }
            Directive::Help => {
                for (_, usage) in HELP_TOPICS {
                    writeln!(writer, "{usage}")?;
                }
            }
            Directive::Telemetry => session.write_telemetry(&mut writer)?,
            other => {
                session.apply(other);
                session.flush(&mut writer)?;
                if session.is_halted() {
                    eprintln!("halted; restart the emulator to power cycle");
                }
            }
        }
    }

    Ok(())
}

fn parse_options() -> Result<BenchOptions, String> {
    let mut options = BenchOptions::default();
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) => (flag.to_string(), Some(value.to_string())),
            None => (arg, None),
        };
        if flag == "--diagnostic" {
            options.diagnostic = true;
            continue;
        }
        let value = inline
            .or_else(|| args.next())
            .ok_or_else(|| format!("Expected value after {flag}"))?;
        match flag.as_str() {
            "--line" => options.line = parse_line(&value)?,
            "--load" => {
                let milliamps = value
                    .parse()
                    .map_err(|_| format!("Invalid load `{value}`"))?;
                options.sense = SenseModel::load(milliamps);
            }
            "--hold" => {
                options.boot_hold = value
                    .parse()
                    .map_err(|_| format!("Invalid hold `{value}`"))?;
            }
            other => return Err(format!("Unknown option `{other}`")),
        }
    }
    Ok(options)
}

fn parse_line(value: &str) -> Result<LineModel, String> {
    match value {
        "50" => Ok(LineModel::mains(Duration::from_micros(10_000))),
        "60" => Ok(LineModel::mains(Duration::from_micros(8_333))),
        "flat" => Ok(LineModel::Flat),
        other => Err(format!("Unknown line `{other}`")),
    }
}
