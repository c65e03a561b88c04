//! Kernel logger
//!
//! `log` facade backend shared by every cluster instance. Records are
//! formatted into a fixed stack buffer (no allocation on the logging path)
//! and handed to a console sink installed by the architecture port.

use core::sync::atomic::{AtomicBool, Ordering};
use log::{Level, LevelFilter, Metadata, Record};
use spin::RwLock;

/// Console sink: receives one fully formatted line (newline included)
pub type ConsoleSink = fn(&[u8]);

/// Size of the per-record formatting buffer
const LINE_MAX: usize = 512;

/// Logger that writes `[LEVEL] target: message` lines to the console sink
struct KernelLogger;

static LOGGER: KernelLogger = KernelLogger;
static CONSOLE: RwLock<Option<ConsoleSink>> = RwLock::new(None);
static INSTALLED: AtomicBool = AtomicBool::new(false);

impl log::Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let sink = match *CONSOLE.read() {
            Some(sink) => sink,
            None => return,
        };

        let level_str = match record.level() {
            Level::Error => "ERROR",
            Level::Warn => "WARN ",
            Level::Info => "INFO ",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        };

        let mut buf = [0u8; LINE_MAX];
        let len = format_line(&mut buf, level_str, record.target(), record.args());
        sink(&buf[..len]);
    }

    fn flush(&self) {}
}

/// Format one record into `buf`; the line always ends with `\n`, even
/// when the message had to be cut
fn format_line(buf: &mut [u8; LINE_MAX], level: &str, target: &str, args: &core::fmt::Arguments<'_>) -> usize {
    use core::fmt::Write;
    let pos = {
        let mut writer = BufferWriter {
            buffer: &mut buf[..LINE_MAX - 1],
            pos: 0,
        };
        let _ = core::write!(&mut writer, "[{}] {}: {}", level, target, args);
        writer.pos
    };
    buf[pos] = b'\n';
    pos + 1
}

/// Simple buffer writer for formatting without alloc (truncates)
pub struct BufferWriter<'a> {
    pub buffer: &'a mut [u8],
    pub pos: usize,
}

impl<'a> core::fmt::Write for BufferWriter<'a> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let bytes = s.as_bytes();
        let remaining = self.buffer.len() - self.pos;
        let to_write = bytes.len().min(remaining);

        if to_write > 0 {
            self.buffer[self.pos..self.pos + to_write].copy_from_slice(&bytes[..to_write]);
            self.pos += to_write;
        }

        Ok(())
    }
}

/// Install the kernel logger with the given level.
///
/// Only the first call installs the logger; later calls just change the
/// level, so every cluster may call it from its own boot path.
pub fn init(level: LevelFilter) {
    if !INSTALLED.swap(true, Ordering::AcqRel) {
        // Another logger may already be installed by the host (tests).
        let _ = log::set_logger(&LOGGER);
    }
    log::set_max_level(level);
}

/// Route formatted log lines to `sink`
pub fn set_console(sink: ConsoleSink) {
    *CONSOLE.write() = Some(sink);
}

/// Stop emitting log lines
pub fn clear_console() {
    *CONSOLE.write() = None;
}
