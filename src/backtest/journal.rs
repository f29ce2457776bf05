//! Per-strategy journal of orders, fills and daily stats.
//!
//! Lines are stamped with market time rather than wall-clock time, so the
//! journal is kept separate from process logging and written out once the
//! run finishes.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, NaiveDateTime};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Journal {
    time: NaiveDateTime,
    lines: Vec<String>,
}

impl Default for Journal {
    fn default() -> Self {
        Self::new()
    }
}

impl Journal {
    pub fn new() -> Self {
        Self {
            time: DateTime::UNIX_EPOCH.naive_utc(),
            lines: Vec::new(),
        }
    }

    pub fn set_time(&mut self, time: NaiveDateTime) {
        self.time = time;
    }

    pub fn time(&self) -> NaiveDateTime {
        self.time
    }

    pub fn info(&mut self, message: impl AsRef<str>) {
        let line = format!("[{}] {}", self.time, message.as_ref());
        debug!("{}", line);
        self.lines.push(line);
    }

    pub fn error(&mut self, message: impl AsRef<str>) {
        let line = format!("[{}] [ERROR] {}", self.time, message.as_ref());
        debug!("{}", line);
        self.lines.push(line);
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Write the journal to `path`, replacing any previous file.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(path)?);
        for line in &self.lines {
            writeln!(writer, "{}", line)?;
        }
        writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_lines_are_stamped() {
        let mut journal = Journal::new();
        journal.info("before");
        journal.set_time(
            NaiveDate::from_ymd_opt(2025, 7, 1)
                .unwrap()
                .and_hms_opt(9, 30, 0)
                .unwrap(),
        );
        journal.info("Order id=0");
        journal.error("bad fill");

        assert_eq!(journal.lines()[0], "[1970-01-01 00:00:00] before");
        assert_eq!(journal.lines()[1], "[2025-07-01 09:30:00] Order id=0");
        assert_eq!(journal.lines()[2], "[2025-07-01 09:30:00] [ERROR] bad fill");
    }

    #[test]
    fn test_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tmp").join("wheel.log");

        let mut journal = Journal::new();
        journal.info("one");
        journal.info("two");
        journal.save(&path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.ends_with("two\n"));
    }
}
