//! Per-space occupancy state machine
//!
//! Tracks which subjects are inside one physical space from the stream of
//! accepted entry/exit events. This is the single source of truth for the
//! roster; one tracker exists per space and is injected where needed.
//!
//! Key behaviors:
//! - Entry moves a subject OUTSIDE -> INSIDE, exit moves it back
//! - Entry while inside and exit while outside are no-ops, never errors
//! - An event id already applied is ignored (safe replay)
//! - A replayed event older than the subject's latest applied event goes into
//!   history at its timestamp position but does not change state
//!
//! All mutations take the write lock, so concurrent entries for the same
//! subject collapse into a single transition. Reads share the read lock and
//! never observe a half-applied event.

use crate::domain::types::{EntryEvent, EntryKind, SubjectId};
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;
use uuid::Uuid;

/// Effect of applying one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// OUTSIDE -> INSIDE
    Entered,
    /// INSIDE -> OUTSIDE
    Exited,
    /// Entry for a subject already inside
    AlreadyInside,
    /// Exit for a subject already outside
    AlreadyOutside,
    /// Older than the subject's latest applied event
    Stale,
    /// Event id was applied before
    Duplicate,
}

impl Transition {
    /// True if the roster changed
    #[inline]
    pub fn changed(&self) -> bool {
        matches!(self, Transition::Entered | Transition::Exited)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Entered => "entered",
            Transition::Exited => "exited",
            Transition::AlreadyInside => "already_inside",
            Transition::AlreadyOutside => "already_outside",
            Transition::Stale => "stale",
            Transition::Duplicate => "duplicate",
        }
    }
}

/// Consistent view of the roster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccupancySnapshot {
    pub count: usize,
    /// Subjects inside, sorted
    pub roster: Vec<SubjectId>,
}

#[derive(Debug, Default)]
struct SubjectState {
    inside: bool,
    /// Timestamp of the latest event that decided `inside`
    last_applied: Option<DateTime<Utc>>,
    /// Accepted events, ordered by timestamp
    history: Vec<EntryEvent>,
}

#[derive(Debug, Default)]
struct OccupancyState {
    inside: FxHashSet<SubjectId>,
    subjects: FxHashMap<SubjectId, SubjectState>,
    seen_events: FxHashSet<Uuid>,
}

/// Occupancy tracker for a single space
#[derive(Debug)]
pub struct OccupancyTracker {
    space: String,
    state: RwLock<OccupancyState>,
}

impl OccupancyTracker {
    pub fn new(space: &str) -> Self {
        Self { space: space.to_string(), state: RwLock::new(OccupancyState::default()) }
    }

    pub fn space(&self) -> &str {
        &self.space
    }

    /// Apply an accepted event
    pub fn apply(&self, event: EntryEvent) -> Transition {
        self.apply_with(event, |_, _| {})
    }

    /// Apply an accepted event and run `observe` under the same write lock
    ///
    /// `observe` sees the resulting transition and occupancy count before any
    /// other writer can interleave.
    pub fn apply_with<F>(&self, event: EntryEvent, observe: F) -> Transition
    where
        F: FnOnce(Transition, usize),
    {
        let mut state = self.state.write();
        let transition = Self::apply_locked(&mut state, event);
        observe(transition, state.inside.len());
        transition
    }

    /// Apply a freshly accepted event, stamping it under the write lock
    ///
    /// The timestamp is moved strictly past the subject's latest applied
    /// event, so a live submission always decides state even if the wall
    /// clock stepped back or a concurrent submit won the lock. Returns the
    /// event as stored.
    pub fn apply_live_with<F>(&self, mut event: EntryEvent, observe: F) -> (EntryEvent, Transition)
    where
        F: FnOnce(Transition, usize),
    {
        let mut state = self.state.write();
        let last = state.subjects.get(&event.subject_id).and_then(|s| s.last_applied);
        if let Some(last) = last {
            if event.timestamp <= last {
                event.timestamp = last + TimeDelta::microseconds(1);
            }
        }
        let transition = Self::apply_locked(&mut state, event.clone());
        observe(transition, state.inside.len());
        (event, transition)
    }

    fn apply_locked(state: &mut OccupancyState, event: EntryEvent) -> Transition {
        if !state.seen_events.insert(event.event_id) {
            debug!(event_id = %event.event_id, subject = %event.subject_id, "occupancy_duplicate_event");
            return Transition::Duplicate;
        }

        let subject_id = event.subject_id.clone();
        let kind = event.kind;
        let timestamp = event.timestamp;
        let subject = state.subjects.entry(subject_id.clone()).or_default();

        // Keep history sorted by timestamp; equal timestamps keep arrival order
        let pos = subject.history.partition_point(|e| e.timestamp <= timestamp);
        subject.history.insert(pos, event);

        if subject.last_applied.is_some_and(|last| timestamp < last) {
            return Transition::Stale;
        }
        subject.last_applied = Some(timestamp);

        let transition = match (kind, subject.inside) {
            (EntryKind::Entry, false) => {
                subject.inside = true;
                Transition::Entered
            }
            (EntryKind::Entry, true) => Transition::AlreadyInside,
            (EntryKind::Exit, true) => {
                subject.inside = false;
                Transition::Exited
            }
            (EntryKind::Exit, false) => Transition::AlreadyOutside,
        };

        match transition {
            Transition::Entered => {
                state.inside.insert(subject_id);
            }
            Transition::Exited => {
                state.inside.remove(&subject_id);
            }
            _ => {}
        }
        transition
    }

    /// Number of subjects currently inside
    pub fn current_occupancy(&self) -> usize {
        self.state.read().inside.len()
    }

    /// Count and sorted roster, read under one lock
    pub fn snapshot(&self) -> OccupancySnapshot {
        let state = self.state.read();
        let mut roster: Vec<SubjectId> = state.inside.iter().cloned().collect();
        roster.sort();
        OccupancySnapshot { count: state.inside.len(), roster }
    }

    pub fn is_inside(&self, subject_id: &SubjectId) -> bool {
        self.state.read().inside.contains(subject_id)
    }

    /// Accepted events for a subject, oldest first
    pub fn history_for(&self, subject_id: &SubjectId) -> Vec<EntryEvent> {
        self.state
            .read()
            .subjects
            .get(subject_id)
            .map(|s| s.history.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::SignalScores;
    use chrono::Duration;
    use std::sync::Arc;

    fn event(subject: &str, kind: EntryKind) -> EntryEvent {
        EntryEvent::new(
            "main",
            SubjectId::new(subject),
            kind,
            100,
            true,
            false,
            SignalScores { gps: Some(100), wifi: Some(100), motion: Some(100) },
        )
    }

    #[test]
    fn test_entry_then_exit() {
        let tracker = OccupancyTracker::new("main");
        assert_eq!(tracker.apply(event("alice", EntryKind::Entry)), Transition::Entered);
        assert_eq!(tracker.current_occupancy(), 1);
        assert!(tracker.is_inside(&SubjectId::new("alice")));

        assert_eq!(tracker.apply(event("alice", EntryKind::Exit)), Transition::Exited);
        assert_eq!(tracker.current_occupancy(), 0);
        assert!(!tracker.is_inside(&SubjectId::new("alice")));
    }

    #[test]
    fn test_double_entry_is_idempotent() {
        let tracker = OccupancyTracker::new("main");
        tracker.apply(event("alice", EntryKind::Entry));
        let after_first = tracker.current_occupancy();
        assert_eq!(tracker.apply(event("alice", EntryKind::Entry)), Transition::AlreadyInside);
        assert_eq!(tracker.current_occupancy(), after_first);
    }

    #[test]
    fn test_exit_without_entry_stays_at_zero() {
        let tracker = OccupancyTracker::new("main");
        assert_eq!(tracker.apply(event("ghost", EntryKind::Exit)), Transition::AlreadyOutside);
        assert_eq!(tracker.current_occupancy(), 0);
        // Still recorded: it was an accepted event
        assert_eq!(tracker.history_for(&SubjectId::new("ghost")).len(), 1);
    }

    #[test]
    fn test_duplicate_event_id_ignored() {
        let tracker = OccupancyTracker::new("main");
        let entry = event("alice", EntryKind::Entry);
        assert_eq!(tracker.apply(entry.clone()), Transition::Entered);
        assert_eq!(tracker.apply(entry), Transition::Duplicate);
        assert_eq!(tracker.history_for(&SubjectId::new("alice")).len(), 1);
        assert_eq!(tracker.current_occupancy(), 1);
    }

    #[test]
    fn test_history_appends_in_order() {
        let tracker = OccupancyTracker::new("main");
        let alice = SubjectId::new("alice");
        let e1 = event("alice", EntryKind::Entry);
        let e2 = event("alice", EntryKind::Exit).at(e1.timestamp + Duration::seconds(30));
        let e3 = event("alice", EntryKind::Entry).at(e1.timestamp + Duration::seconds(90));

        tracker.apply(e1.clone());
        tracker.apply(e2.clone());
        let before = tracker.history_for(&alice);
        tracker.apply(e3.clone());
        let after = tracker.history_for(&alice);

        assert_eq!(before, vec![e1.clone(), e2.clone()]);
        assert_eq!(after, vec![e1, e2, e3]);
    }

    #[test]
    fn test_stale_event_recorded_but_does_not_change_state() {
        let tracker = OccupancyTracker::new("main");
        let alice = SubjectId::new("alice");
        let entry = event("alice", EntryKind::Entry);
        let late_exit = event("alice", EntryKind::Exit).at(entry.timestamp - Duration::seconds(5));

        tracker.apply(entry.clone());
        assert_eq!(tracker.apply(late_exit.clone()), Transition::Stale);
        assert!(tracker.is_inside(&alice));

        let history = tracker.history_for(&alice);
        assert_eq!(history, vec![late_exit, entry]);
    }

    #[test]
    fn test_live_exit_behind_clock_still_exits() {
        let tracker = OccupancyTracker::new("main");
        let alice = SubjectId::new("alice");
        let entry = event("alice", EntryKind::Entry);
        let early_exit = event("alice", EntryKind::Exit).at(entry.timestamp - Duration::seconds(2));

        tracker.apply(entry.clone());
        let (stored, transition) = tracker.apply_live_with(early_exit, |_, _| {});

        assert_eq!(transition, Transition::Exited);
        assert!(!tracker.is_inside(&alice));
        assert_eq!(tracker.current_occupancy(), 0);
        assert!(stored.timestamp > entry.timestamp);
        assert_eq!(tracker.history_for(&alice), vec![entry, stored]);
    }

    #[test]
    fn test_live_events_with_equal_timestamps_stay_ordered() {
        let tracker = OccupancyTracker::new("main");
        let entry = event("alice", EntryKind::Entry);
        let exit = event("alice", EntryKind::Exit).at(entry.timestamp);

        let (entry, _) = tracker.apply_live_with(entry, |_, _| {});
        let (exit, transition) = tracker.apply_live_with(exit, |_, count| assert_eq!(count, 0));

        assert_eq!(transition, Transition::Exited);
        assert!(exit.timestamp > entry.timestamp);

        // Replaying in reverse still lands on the live outcome
        let replayed = OccupancyTracker::new("main");
        replayed.apply(exit);
        assert_eq!(replayed.apply(entry), Transition::Stale);
        assert_eq!(replayed.current_occupancy(), 0);
    }

    #[test]
    fn test_snapshot_roster_sorted() {
        let tracker = OccupancyTracker::new("main");
        tracker.apply(event("carol", EntryKind::Entry));
        tracker.apply(event("alice", EntryKind::Entry));
        tracker.apply(event("bob", EntryKind::Entry));
        tracker.apply(event("bob", EntryKind::Exit));

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.count, 2);
        assert_eq!(snapshot.roster, vec![SubjectId::new("alice"), SubjectId::new("carol")]);
    }

    #[test]
    fn test_unknown_subject_has_empty_history() {
        let tracker = OccupancyTracker::new("main");
        assert!(tracker.history_for(&SubjectId::new("nobody")).is_empty());
    }

    #[test]
    fn test_apply_with_observes_count_under_lock() {
        let tracker = OccupancyTracker::new("main");
        let mut seen = None;
        tracker.apply_with(event("alice", EntryKind::Entry), |t, count| seen = Some((t, count)));
        assert_eq!(seen, Some((Transition::Entered, 1)));
    }

    #[test]
    fn test_concurrent_entries_collapse() {
        let tracker = Arc::new(OccupancyTracker::new("main"));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = tracker.clone();
                std::thread::spawn(move || tracker.apply(event("alice", EntryKind::Entry)))
            })
            .collect();

        let transitions: Vec<Transition> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        let entered = transitions.iter().filter(|t| **t == Transition::Entered).count();
        assert_eq!(entered, 1);
        assert_eq!(tracker.current_occupancy(), 1);
        assert_eq!(tracker.history_for(&SubjectId::new("alice")).len(), 8);
    }
}
