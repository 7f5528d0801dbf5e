use crate::push::{MismatchedDevices, StaleDevices};

/// Failures reported by, or while talking to, the message server.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PushError {
    #[error("Authorization failed")]
    AuthorizationFailed,

    #[error("Not found")]
    NotFound,

    /// 409: the device list we sent to does not match the server's.
    #[error("Mismatched devices: missing {:?}, extra {:?}", .0.missing_devices, .0.extra_devices)]
    MismatchedDevices(MismatchedDevices),

    /// 410: sessions with some devices are stale.
    #[error("Stale devices: {:?}", .0.stale_devices)]
    StaleDevices(StaleDevices),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Expectation failed")]
    ExpectationFailed,

    #[error("Bad response: {0}")]
    NonSuccessfulResponse(u16),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// The request never completed.
    #[error("Network failure: {0}")]
    Network(String),
}

impl PushError {
    /// Classifies an HTTP status and body the way the server means them.
    pub fn from_response(status: u16, body: &[u8]) -> Result<(), PushError> {
        match status {
            200..=299 => Ok(()),
            401 | 403 => Err(PushError::AuthorizationFailed),
            404 => Err(PushError::NotFound),
            409 => Err(PushError::MismatchedDevices(serde_json::from_slice(body)?)),
            410 => Err(PushError::StaleDevices(serde_json::from_slice(body)?)),
            413 => Err(PushError::RateLimited),
            417 => Err(PushError::ExpectationFailed),
            other => Err(PushError::NonSuccessfulResponse(other)),
        }
    }
}

impl From<serde_json::Error> for PushError {
    fn from(value: serde_json::Error) -> Self {
        Self::MalformedResponse(value.to_string())
    }
}
