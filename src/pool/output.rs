use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

use log::warn;

/// Line sink shared by all workers.
///
/// Each host is written and flushed under one lock, so lines from
/// concurrent workers never interleave.
#[derive(Debug)]
pub struct Output<W> {
    writer: Mutex<W>,
}

impl<W: Write> Output<W> {
    pub const fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Writes `host` followed by a newline. Write errors are logged, not
    /// returned; a closed pipe must not stop the probing.
    pub fn emit(&self, host: &str) {
        if let Err(e) = self.write_line(host) {
            warn!("Cannot write {host}: {e}");
        }
    }

    fn write_line(&self, host: &str) -> io::Result<()> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(writer, "{host}")?;
        writer.flush()
    }

    /// Returns the writer once every other handle has been dropped.
    pub fn into_inner(self: Arc<Self>) -> Option<W> {
        Arc::try_unwrap(self)
            .ok()
            .map(|output| output.writer.into_inner().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Output<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}
