//! Persisted command history
//!
//! Loaded once when the session starts and written back once during shutdown.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::common::{Error, Result};

use super::channel::EXIT;

pub struct History {
    path: PathBuf,
    entries: Mutex<Vec<String>>,
}

impl History {
    /// Load history from `path`; a missing file is an empty history
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(content) => content
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(str::to_string)
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(Error::FileRead {
                    path: path.display().to_string(),
                    error: e.to_string(),
                })
            }
        };
        tracing::debug!(path = %path.display(), "Loaded command history");

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a line, returning whether it was kept
    ///
    /// Blank lines, the `exit` keyword and lines already in the history are
    /// dropped.
    pub fn record(&self, line: &str) -> bool {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() || line.trim() == EXIT {
            return false;
        }

        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.iter().any(|entry| entry == line) {
            return false;
        }
        entries.push(line.to_string());
        true
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Write every entry, one per line; the file exists afterwards even when
    /// there is nothing to write
    pub fn flush(&self) -> Result<()> {
        let entries = self.entries();
        let mut content = entries.join("\n");
        if !content.is_empty() {
            content.push('\n');
        }
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_filters() {
        let dir = tempfile::tempdir().unwrap();
        let history = History::load(dir.path().join("history")).unwrap();

        assert!(history.record("break main.go:10"));
        assert!(!history.record("break main.go:10"));
        assert!(!history.record(""));
        assert!(!history.record("   "));
        assert!(!history.record("exit"));
        assert!(history.record("continue"));
        assert!(!history.record("break main.go:10"));
        assert!(history.record("next"));

        assert_eq!(history.entries(), vec!["break main.go:10", "continue", "next"]);
    }

    #[test]
    fn test_flush_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history");

        let history = History::load(&path).unwrap();
        history.record("break main.go:10");
        history.record("continue");
        history.flush().unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "break main.go:10\ncontinue\n"
        );

        let reloaded = History::load(&path).unwrap();
        assert_eq!(reloaded.entries(), history.entries());
    }

    #[test]
    fn test_flush_creates_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history");

        History::load(&path).unwrap().flush().unwrap();
        assert!(path.exists());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }
}
