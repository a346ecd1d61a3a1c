//! IO modules - external system interfaces
//!
//! - `http_api` - HTTP server for submissions, occupancy, and history
//! - `event_log` - Accepted-event persistence (JSONL format)
//! - `prometheus` - Prometheus text exposition served at /metrics

pub mod event_log;
pub mod http_api;
pub mod prometheus;

// Re-export commonly used types
pub use event_log::{EventStore, JsonlEventLog};
pub use http_api::{serve, start_http_server, ApiState};
