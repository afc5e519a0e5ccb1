use thiserror::Error;
use uuid::Uuid;

/// Failures that abort the capture session. Recoverable conditions
/// (partial frames, malformed serial lines, a not-yet-full inference
/// window) are deliberately not represented here; they are counted or
/// reported as normal states and capture continues.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no Bluetooth adapter available")]
    NoAdapter,
    #[error("device not found within {timeout_secs} s scan")]
    DeviceNotFound { timeout_secs: u64 },
    #[error("connection failed: {reason}")]
    ConnectionError { reason: String },
    #[error("notify characteristic {0} not present on device")]
    CharacteristicNotFound(Uuid),
    #[error("link lost: {reason}")]
    LinkLost { reason: String },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CaptureError {
    pub fn connection(err: impl std::fmt::Display) -> Self {
        CaptureError::ConnectionError {
            reason: err.to_string(),
        }
    }
}
