use reqwest::StatusCode;
use thiserror::Error;

/// Failures talking to the meter.
#[derive(Debug, Error)]
pub enum MeterError {
    /// The device could not be reached, or the request timed out.
    #[error("cannot connect to meter: {0}")]
    Connection(#[source] reqwest::Error),

    #[error("meter responded with HTTP {0}")]
    Status(StatusCode),

    #[error("meter returned a malformed payload: {0}")]
    MalformedPayload(#[source] serde_json::Error),

    /// The payload parsed, but does not describe the device we expect.
    #[error("unexpected meter response: {0}")]
    Validation(String),

    #[error("poll interval must be greater than zero")]
    ZeroInterval,
}

/// Coarse error classes, used when deciding what to tell the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connection,
    Protocol,
    Validation,
}

impl MeterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MeterError::Connection(_) => ErrorKind::Connection,
            MeterError::Status(_) | MeterError::MalformedPayload(_) => ErrorKind::Protocol,
            MeterError::Validation(_) | MeterError::ZeroInterval => ErrorKind::Validation,
        }
    }
}

impl From<reqwest::Error> for MeterError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => MeterError::Status(status),
            None => MeterError::Connection(err),
        }
    }
}
