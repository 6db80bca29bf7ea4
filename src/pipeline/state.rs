use serde::Serialize;
use std::fmt;

/// Phase of the capture pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Polling the low-res stream for motion
    IdleWatch,
    /// A recording session owns the main stream
    ActiveRecording,
    /// Supervisor has exited
    Stopped,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineState::IdleWatch => "idle_watch",
            PipelineState::ActiveRecording => "active_recording",
            PipelineState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Counters reported when the supervisor exits
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SupervisorReport {
    pub sessions_started: u64,
    pub sessions_completed: u64,
    pub sessions_failed: u64,
    /// Idle phases abandoned after repeated capture failures
    pub idle_aborts: u64,
}
