//! Session transcript file.
//!
//! Every byte exchanged with each modem is appended to one log file, each
//! session preceded by a header naming the port and the local time.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};

/// Section header for one session.
pub fn header(device: &str, at: DateTime<Local>) -> String {
    format!(
        "\r\n========== {} {} ============ \r\n",
        at.format("%Y-%m-%d %H:%M:%S"),
        device
    )
}

/// Append-only transcript sink.
pub struct TranscriptLog<W = File> {
    writer: W,
}

impl TranscriptLog<File> {
    /// Open `path` for appending, creating it if needed.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open transcript {}", path.display()))?;
        Ok(TranscriptLog { writer: file })
    }
}

impl<W: Write + Send> TranscriptLog<W> {
    pub fn new(writer: W) -> Self {
        TranscriptLog { writer }
    }

    /// Start a section for `device` and return the writer for its traffic.
    pub fn begin(&mut self, device: &str) -> io::Result<&mut W> {
        self.writer.write_all(header(device, Local::now()).as_bytes())?;
        Ok(&mut self.writer)
    }

    /// Write a complete section captured elsewhere.
    pub fn append(&mut self, device: &str, traffic: &[u8]) -> io::Result<()> {
        self.begin(device)?.write_all(traffic)?;
        self.writer.flush()
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn header_format() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap();
        assert_eq!(
            header("/dev/ttyUSB0", at),
            "\r\n========== 2024-03-09 14:05:00 /dev/ttyUSB0 ============ \r\n"
        );
    }

    #[test]
    fn sections_are_appended_in_order() {
        let mut log = TranscriptLog::new(Vec::<u8>::new());
        log.append("/dev/ttyUSB0", b"+++OK\r\n").unwrap();
        log.begin("/dev/ttyUSB1").unwrap().write_all(b"+++").unwrap();

        let text = String::from_utf8(log.into_inner()).unwrap();
        let first = text.find("/dev/ttyUSB0 ============").unwrap();
        let second = text.find("/dev/ttyUSB1 ============").unwrap();
        assert!(first < second);
        assert!(text.contains("============ \r\n+++OK\r\n"));
        assert!(text.ends_with("============ \r\n+++"));
    }
}
