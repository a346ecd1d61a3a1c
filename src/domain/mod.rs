//! Domain models - core presence types
//!
//! - `types` - subjects, entry events, submission payloads
//! - `geo` - distance from a reported coordinate to the space's reference point
//! - `error` - input validation errors

pub mod error;
pub mod geo;
pub mod types;

pub use error::ValidationError;
pub use geo::GeoPoint;
pub use types::{EntryEvent, EntryKind, EntryRequest, SignalScores, SubjectId};
