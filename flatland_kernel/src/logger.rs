use core::fmt::Write;

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::Mutex;

/// Writes log records line by line to a character device, usually the serial port.
pub struct SerialLogger<W> {
    port: Mutex<W>,
}

impl<W> SerialLogger<W> {
    pub const fn new(port: W) -> Self {
        SerialLogger { port: Mutex::new(port) }
    }
}

impl<W: Write + Send> Log for SerialLogger<W> {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        // a record logged while the port is in use is dropped instead of deadlocking
        if let Some(mut port) = self.port.try_lock() {
            let _ = writeln!(port, "{:5}: {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

/// Install `logger` as the global logger.
pub fn init<W: Write + Send>(logger: &'static SerialLogger<W>, debug: bool) -> Result<(), SetLoggerError> {
    log::set_logger(logger)?;
    log::set_max_level(if debug { LevelFilter::Debug } else { LevelFilter::Info });
    Ok(())
}
