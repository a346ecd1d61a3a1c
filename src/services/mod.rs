//! Services - business logic and state management
//!
//! - `scorer` - Signal scoring and accept/reject decision
//! - `occupancy` - Per-space roster and subject history
//! - `evaluator` - Validates, scores, and applies submissions
//! - `persist_worker` - Async event persistence with retry

pub mod evaluator;
pub mod occupancy;
pub mod persist_worker;
pub mod scorer;

// Re-export commonly used types
pub use evaluator::{EntryEvaluator, Submission};
pub use occupancy::{OccupancySnapshot, OccupancyTracker, Transition};
pub use persist_worker::{create_persist_worker, PersistCmd, PersistWorker, RetryPolicy};
pub use scorer::{Assessment, ConfidenceScorer, Decision, ScoringPolicy, SignalInputs};
