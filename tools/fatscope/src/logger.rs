use core::fmt::Display;
use std::io::Write;

use log::{Level, LevelFilter, Log};
use owo_colors::OwoColorize;

struct Inner {
    colored: bool,
}

impl Inner {
    fn write_with_color(&mut self, color: Color, string: impl Display) {
        let string: &dyn Display = match (self.colored, color) {
            (false, _) | (_, Color::Default) => &string,
            (_, Color::Gray) => &string.dimmed(),
            (_, Color::BrightRed) => &string.bright_red(),
            (_, Color::BrightYellow) => &string.bright_yellow(),
            (_, Color::BrightBlue) => &string.bright_blue(),
            (_, Color::BrightCyan) => &string.bright_cyan(),
            (_, Color::BrightMagenta) => &string.bright_magenta(),
        };
        // Nowhere left to report a failed write to stderr.
        let _ = write!(std::io::stderr().lock(), "{string}");
    }
}

struct CliLogger {
    inner: spin::Mutex<Inner>,
}

static LOGGER: CliLogger = CliLogger {
    inner: spin::Mutex::new(Inner { colored: true }),
};

impl Log for CliLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut inner = self.inner.lock();
        let level = record.level();
        inner.write_with_color(
            match level {
                Level::Error => Color::BrightRed,
                Level::Warn => Color::BrightYellow,
                Level::Info => Color::BrightBlue,
                Level::Debug => Color::BrightCyan,
                Level::Trace => Color::BrightMagenta,
            },
            format_args!("{level:5} "),
        );
        inner.write_with_color(Color::Gray, format_args!("[{}] ", record.target()));
        inner.write_with_color(Color::Default, record.args());
        inner.write_with_color(Color::Default, "\n");
    }

    fn flush(&self) {}
}

/// Install the stderr logger. `NO_COLOR` in the environment turns colours off.
pub fn init(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    LOGGER.inner.lock().colored = std::env::var_os("NO_COLOR").is_none();
    log::set_max_level(level);
    log::set_logger(&LOGGER)
}

enum Color {
    Default,
    Gray,
    BrightRed,
    BrightYellow,
    BrightBlue,
    BrightCyan,
    BrightMagenta,
}
