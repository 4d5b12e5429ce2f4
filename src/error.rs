use thiserror::Error;

/// Crash SOS error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SosError {
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Location unavailable: {0}")]
    LocationUnavailable(String),

    #[error("No emergency contacts configured")]
    NoContacts,

    #[error("Notification failed for {failed} of {attempted} attempts")]
    PartialSendFailure { failed: usize, attempted: usize },

    #[error("Accident record not stored: {0}")]
    StoreFailure(String),

    #[error("An incident is already in progress")]
    IncidentActive,

    #[error("Invalid contact: {0}")]
    InvalidContact(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Engine must be created inside a tokio runtime")]
    NoRuntime,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for engine operations
pub type SosResult<T> = Result<T, SosError>;

impl From<std::io::Error> for SosError {
    fn from(err: std::io::Error) -> Self {
        SosError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for SosError {
    fn from(err: serde_json::Error) -> Self {
        SosError::Io(err.to_string())
    }
}

/// Failure to obtain a position fix
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LocationError {
    #[error("location permission denied")]
    PermissionDenied,

    #[error("no fix available: {0}")]
    Unavailable(String),
}

impl From<LocationError> for SosError {
    fn from(err: LocationError) -> Self {
        match err {
            LocationError::PermissionDenied => SosError::PermissionDenied,
            LocationError::Unavailable(reason) => SosError::LocationUnavailable(reason),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("SMS to {number} failed: {reason}")]
pub struct SendError {
    pub number: String,
    pub reason: String,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("call to {number} failed: {reason}")]
pub struct CallError {
    pub number: String,
    pub reason: String,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("record store error: {0}")]
pub struct StoreError(pub String);

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError(err.to_string())
    }
}

impl From<StoreError> for SosError {
    fn from(err: StoreError) -> Self {
        SosError::StoreFailure(err.0)
    }
}
