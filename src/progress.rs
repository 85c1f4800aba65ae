//! Reindex progress reporting.
//!
//! Reports observable progress during `chx repo reindex` (and the initial
//! scan of `chx watch`) so users see how much of a repository is left.
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

use serde::Serialize;

/// A single progress sample for one repository.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReindexProgress {
    pub repo_id: String,
    /// Files finished so far (indexed, unchanged, skipped, or deleted).
    pub done: u64,
    pub total: u64,
    /// `done * 100 / total`, or 100 for an empty repository. Never decreases.
    pub percent: u8,
}

impl ReindexProgress {
    pub fn new(repo_id: &str, done: u64, total: u64) -> Self {
        let percent = if total == 0 {
            100
        } else {
            ((done.min(total) * 100) / total) as u8
        };
        Self {
            repo_id: repo_id.to_string(),
            done,
            total,
            percent,
        }
    }
}

/// Reports reindex progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: &ReindexProgress);
}

/// Human-friendly progress on stderr: "reindex proj  1,234 / 5,000 files (24%)".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: &ReindexProgress) {
        let line = format!(
            "reindex {}  {} / {} files ({}%)\n",
            event.repo_id,
            format_number(event.done),
            format_number(event.total),
            event.percent
        );
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: &ReindexProgress) {
        let obj = serde_json::json!({
            "event": "progress",
            "repo": event.repo_id,
            "done": event.done,
            "total": event.total,
            "percent": event.percent,
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: &ReindexProgress) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn percent_is_bounded() {
        assert_eq!(ReindexProgress::new("p", 0, 0).percent, 100);
        assert_eq!(ReindexProgress::new("p", 0, 4).percent, 0);
        assert_eq!(ReindexProgress::new("p", 3, 4).percent, 75);
        assert_eq!(ReindexProgress::new("p", 9, 4).percent, 100);
    }
}
