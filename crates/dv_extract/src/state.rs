use std::fmt;
use std::time::Duration;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionStatus {
    Idle,
    Extracting,
    Paused,
    Complete,
    Error,
}

impl ExtractionStatus {
    /// A job may be started from here.
    pub fn can_start(self) -> bool {
        matches!(self, Self::Idle | Self::Complete | Self::Error)
    }
}

impl fmt::Display for ExtractionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Extracting => "extracting",
            Self::Paused => "paused",
            Self::Complete => "complete",
            Self::Error => "error",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub current: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusChange {
    pub status: ExtractionStatus,
    pub message: String,
}

/// Everything a listener can observe about one job, delivered in order on
/// the engine's broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum JobEvent {
    Status(StatusChange),
    Progress(Progress),
}

/// Snapshot of one engine's job.
///
/// `cursor` is the index of the next item to fetch. `progress.current`
/// tracks it, so failed items still move the bar; `stored` and `failed`
/// split the processed count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionState {
    pub status: ExtractionStatus,
    pub message: String,
    pub progress: Progress,
    pub cursor: usize,
    pub delay: Duration,
    pub stored: usize,
    pub failed: usize,
}

pub(crate) const READY_MESSAGE: &str = "Ready to extract";

impl ExtractionState {
    pub(crate) fn idle(delay: Duration) -> Self {
        Self {
            status: ExtractionStatus::Idle,
            message: READY_MESSAGE.to_string(),
            progress: Progress::default(),
            cursor: 0,
            delay,
            stored: 0,
            failed: 0,
        }
    }

    pub fn status_change(&self) -> StatusChange {
        StatusChange {
            status: self.status,
            message: self.message.clone(),
        }
    }
}

/// How a call to `extract` or `resume` ended. Failures are `Err` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed { stored: usize, failed: usize },
    /// Pause observed; `cursor` is where `resume` picks up.
    Paused { cursor: usize },
    /// Stop observed. State was already reset by `stop`.
    Stopped,
    /// `resume` cancelled a pause the running loop had not reached yet.
    Continuing,
}
