//! Error types for the suspend coordinator

use thiserror::Error;

/// Result type for suspend coordinator operations
pub type SleepResult<T> = Result<T, SleepError>;

/// Error types for the suspend coordinator
///
/// Errors local to a single suspend cycle (platform refusal, alarm arming,
/// malformed bus payloads) are recovered by aborting the cycle; errors that
/// invalidate the process (configuration, thread spawn) abort the daemon.
#[derive(Error, Debug)]
pub enum SleepError {
    /// Configuration option missing or malformed
    #[error("configuration error: {0}")]
    Config(String),

    /// Platform suspend/resume primitive failed
    #[error("platform power call failed: {0}")]
    Platform(String),

    /// Sysfs attribute could not be written
    #[error("sysfs write to {path} failed: {source}")]
    Sysfs {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Hardware token could not be read
    #[error("token {name} unreadable: {source}")]
    Token {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// Inbound status payload did not decode
    #[error("malformed status payload: {0}")]
    Decode(#[from] serde_json::Error),

    /// Vote or unsubscribe for a client that never subscribed
    #[error("unknown client {0}")]
    UnknownClient(String),

    /// Wall-clock persistence failed
    #[error("time persistence failed: {0}")]
    TimeSave(std::io::Error),

    /// Control socket or event channel failure
    #[error("ipc transport error: {0}")]
    Transport(std::io::Error),
}

impl SleepError {
    /// Whether the daemon can keep running after this error
    ///
    /// Recoverable errors cost at most one aborted suspend cycle.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, SleepError::Config(_))
    }
}
