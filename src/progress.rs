//! Plan-generation progress reporting.
//!
//! Reports what the pipeline is doing (loading, each analysis phase,
//! distribution, chunking, saving) so users see a long run advance.
//! Progress is emitted on **stderr** so stdout stays parseable; it is
//! advisory only and never affects the run.

use std::io::Write;

use serde::Serialize;

/// Stage of a run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanPhase {
    Loading,
    Uploading,
    IndexSearch,
    PageAnalysis,
    Synthesis,
    Validation,
    Distribution,
    Chunking,
    Saving,
    Done,
}

impl PlanPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            PlanPhase::Loading => "loading",
            PlanPhase::Uploading => "uploading",
            PlanPhase::IndexSearch => "index search",
            PlanPhase::PageAnalysis => "page analysis",
            PlanPhase::Synthesis => "synthesis",
            PlanPhase::Validation => "validation",
            PlanPhase::Distribution => "distribution",
            PlanPhase::Chunking => "chunking",
            PlanPhase::Saving => "saving",
            PlanPhase::Done => "done",
        }
    }
}

/// A single progress event.
#[derive(Clone, Debug, Serialize)]
pub struct PlanProgressEvent {
    pub phase: PlanPhase,
    pub message: String,
    /// Overall completion in `[0, 100]`.
    pub percent: u8,
}

impl PlanProgressEvent {
    pub fn new(phase: PlanPhase, percent: u8, message: impl Into<String>) -> Self {
        Self {
            phase,
            message: message.into(),
            percent: percent.min(100),
        }
    }
}

/// Reports plan progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: PlanProgressEvent);
}

/// Human-friendly progress on stderr: "[ 40%] page analysis  pages 13-24 of 40".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: PlanProgressEvent) {
        let line = format!(
            "[{:>3}%] {}  {}\n",
            event.percent,
            event.phase.as_str(),
            event.message
        );
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: PlanProgressEvent) {
        let obj = serde_json::json!({
            "event": "progress",
            "phase": event.phase,
            "percent": event.percent,
            "message": event.message,
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
    fn report(&self, _event: PlanProgressEvent) {}
}

/// Percent for step `done` of `total` inside the band `[from, to]`.
pub fn band_percent(from: u8, to: u8, done: usize, total: usize) -> u8 {
    if total == 0 || to <= from {
        return to;
    }
    let span = (to - from) as usize;
    from + (span * done.min(total) / total) as u8
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

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
