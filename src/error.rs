use std::fmt;

use crate::Service;

/// Generic error type for the throttle cache.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A `Result` typedef to use with the [`BoxError`] type
pub type Result<T> = std::result::Result<T, BoxError>;

/// Error type for unknown service names
#[derive(Debug, Default, Copy, Clone)]
pub struct BadService;

impl fmt::Display for BadService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("Unknown throttle service")
    }
}

impl std::error::Error for BadService {}

/// Error type for malformed throttle-control header values
#[derive(Debug, Clone, Copy)]
pub struct ThrottleParseError {
    kind: ThrottleParseErrorKind,
}

/// Different kinds of throttle-control parse failures for better error handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleParseErrorKind {
    /// The leading system status token (`"<word> ("`) is missing
    MissingSystemStatus,
    /// No `<service>=<status>:<limit>` entry was found for this service
    MissingService(Service),
    /// A service limit did not fit in a `u32`
    LimitOutOfRange(Service),
}

impl ThrottleParseError {
    /// Create an error for a header without a leading system status token
    pub fn missing_system_status() -> Self {
        Self { kind: ThrottleParseErrorKind::MissingSystemStatus }
    }

    /// Create an error for a header missing a service entry
    pub fn missing_service(service: Service) -> Self {
        Self { kind: ThrottleParseErrorKind::MissingService(service) }
    }

    /// Create an error for a service limit that overflowed
    pub fn limit_out_of_range(service: Service) -> Self {
        Self { kind: ThrottleParseErrorKind::LimitOutOfRange(service) }
    }

    /// Get the error kind
    pub fn kind(&self) -> &ThrottleParseErrorKind {
        &self.kind
    }
}

impl fmt::Display for ThrottleParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ThrottleParseErrorKind::MissingSystemStatus => {
                write!(
                    f,
                    "Malformed throttle-control header: missing leading system status"
                )
            }
            ThrottleParseErrorKind::MissingService(service) => {
                write!(
                    f,
                    "Malformed throttle-control header: no entry for service \"{service}\""
                )
            }
            ThrottleParseErrorKind::LimitOutOfRange(service) => {
                write!(
                    f,
                    "Malformed throttle-control header: limit for service \"{service}\" out of range"
                )
            }
        }
    }
}

impl std::error::Error for ThrottleParseError {}
