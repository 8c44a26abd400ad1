use thiserror::Error;

/// Fault classification for the pipeline. Only `Source` and `Fatal` are
/// allowed to change the run state; everything else is absorbed and counted.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid or out-of-sequence command; rejected, state unchanged.
    #[error("config error: {0}")]
    Config(String),
    /// Capture device/file unavailable or read failure beyond retry.
    #[error("source error: {0}")]
    Source(String),
    /// Per-frame detector failure; treated as zero persons.
    #[error("detector error: {0}")]
    Detector(String),
    /// Network publish failure on either output channel.
    #[error("sink error: {0}")]
    Sink(String),
    /// Unanticipated fault caught at the loop boundary.
    #[error("fatal error: {0}")]
    Fatal(String),
}

/// Absorbed-error counters surfaced in the status snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorCounters {
    pub config_errors: u64,
    pub detector_errors: u64,
    pub sink_errors: u64,
}
