//! Console log sink for the demo binary
//!
//! Routes the `log` facade to stdout, one line per record:
//! `[LEVEL] target: message`.

use std::io::Write;

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// Stdout logger.
pub struct Console;

impl Log for Console {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let mut out = std::io::stdout().lock();
        let _ = writeln!(
            out,
            "[{:<5}] {}: {}",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stdout().flush();
    }
}

static CONSOLE: Console = Console;

/// Install the console as the global logger.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&CONSOLE)?;
    log::set_max_level(level);
    Ok(())
}
