use chrono::{Local, SecondsFormat};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Append-only log of recoverable playback errors, one tab-separated line
/// per error: timestamp, script name, command index, message.
#[derive(Debug, Clone)]
pub struct ErrorJournal {
    path: PathBuf,
}

impl ErrorJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, script: &str, index: usize, message: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let timestamp = Local::now().to_rfc3339_opts(SecondsFormat::Secs, false);
        let message = message.replace(['\n', '\t'], " ");
        writeln!(file, "{timestamp}\t{script}\t#{index}\t{message}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_are_appended() {
        let dir = tempfile::tempdir().unwrap();
        let journal = ErrorJournal::new(dir.path().join("errors.log"));
        journal.append("login", 3, "Element not found: ok.png").unwrap();
        journal.append("login", 7, "two\nlines").unwrap();

        let text = std::fs::read_to_string(journal.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let columns: Vec<&str> = lines[0].split('\t').collect();
        assert_eq!(columns[1..], ["login", "#3", "Element not found: ok.png"]);
        assert!(lines[1].ends_with("two lines"));
    }
}
