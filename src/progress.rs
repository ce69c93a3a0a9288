//! Indexing progress reporting.
//!
//! Reports observable progress during `notes-rag index` so users see the
//! model download, how many sources are left, and when search is up to date.
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.
//! In-process subscribers use [`Indexer::subscribe`](crate::indexer::Indexer::subscribe)
//! instead.

use std::io::Write;

/// A single progress event for an indexing run.
#[derive(Clone, Debug, PartialEq)]
pub enum IndexProgressEvent {
    /// Embedding model download or load, ratio in `[0, 1]`.
    DownloadingModel { ratio: f32 },
    /// `n` sources processed out of `total`.
    Indexing { n: u64, total: u64 },
    /// Run finished; `indexed` sources were (re)indexed.
    Ready { indexed: u64 },
    /// Run aborted.
    Failed { message: String },
}

/// Reports indexing progress. Implementations write to stderr (human or JSON).
pub trait IndexProgressReporter: Send + Sync {
    fn report(&self, event: &IndexProgressEvent);
}

/// Human-friendly progress on stderr: "index  embedding  12 / 1,340 sources".
pub struct StderrProgress;

impl IndexProgressReporter for StderrProgress {
    fn report(&self, event: &IndexProgressEvent) {
        let line = match event {
            IndexProgressEvent::DownloadingModel { ratio } => {
                format!("index  loading model  {:>3.0}%\n", ratio * 100.0)
            }
            IndexProgressEvent::Indexing { n, total } => format!(
                "index  embedding  {} / {} sources\n",
                format_number(*n),
                format_number(*total)
            ),
            IndexProgressEvent::Ready { indexed } => {
                format!("index  ready  {} sources indexed\n", format_number(*indexed))
            }
            IndexProgressEvent::Failed { message } => format!("index  failed  {}\n", message),
        };
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IndexProgressReporter for JsonProgress {
    fn report(&self, event: &IndexProgressEvent) {
        let obj = match event {
            IndexProgressEvent::DownloadingModel { ratio } => serde_json::json!({
                "event": "progress",
                "phase": "downloading_model",
                "ratio": ratio
            }),
            IndexProgressEvent::Indexing { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "indexing",
                "n": n,
                "total": total
            }),
            IndexProgressEvent::Ready { indexed } => serde_json::json!({
                "event": "ready",
                "indexed": indexed
            }),
            IndexProgressEvent::Failed { message } => serde_json::json!({
                "event": "error",
                "message": message
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IndexProgressReporter for NoProgress {
    fn report(&self, _event: &IndexProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
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

    pub fn reporter(&self) -> Box<dyn IndexProgressReporter> {
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
}
