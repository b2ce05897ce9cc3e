//! stderr logger for the command-line driver

use std::fmt;

use log::{Level, LevelFilter, Log, Metadata, Record};

/// Print to stderr wrapped in a terminal color escape sequence
macro_rules! eprintln_in_color {
    ($args: expr, $color_code: expr) => {
        eprintln!("\u{1B}[{}m{}\u{1B}[0m", $color_code, $args)
    };
}

fn print_in_color(args: fmt::Arguments, color_code: u8) {
    eprintln_in_color!(args, color_code);
}

struct SimpleLogger;

impl Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let color = match record.level() {
            Level::Error => 31, // Red
            Level::Warn => 93,  // BrightYellow
            Level::Info => 34,  // Blue
            Level::Debug => 32, // Green
            Level::Trace => 90, // BrightBlack
        };
        print_in_color(
            format_args!(
                "[{:>5}][{}:{}] {}",
                record.level(),
                record.file().unwrap_or("?"),
                record.line().unwrap_or(0),
                record.args()
            ),
            color,
        );
    }

    fn flush(&self) {}
}

/// Level named by the `LOG` environment variable, `Warn` when unset
pub fn level_from_env() -> LevelFilter {
    match std::env::var("LOG").as_deref() {
        Ok("ERROR") => LevelFilter::Error,
        Ok("WARN") => LevelFilter::Warn,
        Ok("INFO") => LevelFilter::Info,
        Ok("DEBUG") => LevelFilter::Debug,
        Ok("TRACE") => LevelFilter::Trace,
        Ok("OFF") => LevelFilter::Off,
        _ => LevelFilter::Warn,
    }
}

/// Install the logger; a second call keeps the first logger and only changes the level.
pub fn init(level: LevelFilter) {
    static LOGGER: SimpleLogger = SimpleLogger;
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}
