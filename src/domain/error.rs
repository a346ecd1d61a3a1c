//! Input validation errors
//!
//! Rejections for low or borderline confidence are normal outcomes and live
//! in `services::scorer::Decision`; only malformed input is an error.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("subjectId is required")]
    MissingSubject,
    #[error("entryType is required")]
    MissingEntryType,
    #[error("entryType must be \"entry\" or \"exit\", got {0:?}")]
    UnknownEntryType(String),
    #[error("latitude and longitude must be supplied together")]
    PartialCoordinate,
    #[error("coordinate ({latitude}, {longitude}) is out of range")]
    CoordinateOutOfRange { latitude: f64, longitude: f64 },
    #[error("gpsDistanceMeters must be a non-negative number, got {0}")]
    InvalidDistance(f64),
    #[error("speedKmh must be a non-negative number, got {0}")]
    InvalidSpeed(f64),
    #[error("malformed request body: {0}")]
    MalformedBody(String),
    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },
    #[error("subject id in path is not valid percent-encoded UTF-8: {0:?}")]
    InvalidSubjectEncoding(String),
}
