//! Entry/exit submission evaluator
//!
//! Validates a raw submission, translates coordinates into a GPS distance,
//! scores it, and on acceptance updates the roster and hands the event to the
//! persistence worker. Rejected submissions never touch the tracker.

use crate::domain::error::ValidationError;
use crate::domain::geo::GeoPoint;
use crate::domain::types::{EntryEvent, EntryKind, EntryRequest, SubjectId};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::services::occupancy::{OccupancyTracker, Transition};
use crate::services::persist_worker::PersistCmd;
use crate::services::scorer::{Assessment, ConfidenceScorer, Decision, SignalInputs};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

/// Result of a well-formed submission
#[derive(Debug, Clone)]
pub enum Submission {
    Accepted { event: EntryEvent, assessment: Assessment, transition: Transition },
    Rejected { assessment: Assessment },
}

impl Submission {
    pub fn assessment(&self) -> &Assessment {
        match self {
            Submission::Accepted { assessment, .. } | Submission::Rejected { assessment } => {
                assessment
            }
        }
    }
}

/// A submission after validation, ready for scoring
#[derive(Debug, Clone)]
struct ValidatedRequest {
    subject_id: SubjectId,
    kind: EntryKind,
    inputs: SignalInputs,
}

/// Evaluates submissions for one space
pub struct EntryEvaluator {
    reference_point: GeoPoint,
    scorer: ConfidenceScorer,
    tracker: Arc<OccupancyTracker>,
    metrics: Arc<Metrics>,
    persist_tx: Option<mpsc::Sender<PersistCmd>>,
}

impl EntryEvaluator {
    pub fn new(
        config: &Config,
        tracker: Arc<OccupancyTracker>,
        metrics: Arc<Metrics>,
        persist_tx: Option<mpsc::Sender<PersistCmd>>,
    ) -> Self {
        Self {
            reference_point: config.reference_point(),
            scorer: ConfidenceScorer::from_config(config),
            tracker,
            metrics,
            persist_tx,
        }
    }

    pub fn tracker(&self) -> &Arc<OccupancyTracker> {
        &self.tracker
    }

    pub fn scorer(&self) -> &ConfidenceScorer {
        &self.scorer
    }

    fn validate(&self, request: &EntryRequest) -> Result<ValidatedRequest, ValidationError> {
        let subject_id = request
            .subject_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(SubjectId::new)
            .ok_or(ValidationError::MissingSubject)?;

        let kind = request
            .entry_type
            .as_deref()
            .ok_or(ValidationError::MissingEntryType)?
            .parse::<EntryKind>()
            .map_err(ValidationError::UnknownEntryType)?;

        let gps_distance_m = match (request.latitude, request.longitude) {
            (Some(latitude), Some(longitude)) => {
                let point = GeoPoint::new(latitude, longitude);
                if !point.is_valid() {
                    return Err(ValidationError::CoordinateOutOfRange { latitude, longitude });
                }
                Some(point.distance_m(&self.reference_point))
            }
            (None, None) => None,
            _ => return Err(ValidationError::PartialCoordinate),
        };

        let inputs = SignalInputs {
            gps_distance_m,
            wifi_ssid: request.wifi_ssid.clone(),
            speed_kmh: request.speed_kmh,
            manual_confirm: request.manual_confirm.unwrap_or(false),
        };
        ConfidenceScorer::validate(&inputs)?;

        Ok(ValidatedRequest { subject_id, kind, inputs })
    }

    /// Evaluate one submission
    ///
    /// The accept decision and the roster update happen in this call; the
    /// event is persisted afterwards by the worker.
    pub fn submit(&self, request: &EntryRequest) -> Result<Submission, ValidationError> {
        self.metrics.record_submission();

        let validated = match self.validate(request) {
            Ok(v) => v,
            Err(e) => {
                self.metrics.record_validation_error();
                debug!(error = %e, "entry_validation_failed");
                return Err(e);
            }
        };

        let assessment = self.scorer.assess(&validated.inputs)?;
        self.metrics.record_confidence(assessment.total);

        if !assessment.accepted() {
            self.metrics
                .record_rejected(assessment.decision == Decision::ManualConfirmationRequired);
            info!(
                subject = %validated.subject_id,
                kind = %validated.kind.as_str(),
                confidence = %assessment.total,
                gps = ?assessment.signals.gps,
                wifi = ?assessment.signals.wifi,
                motion = ?assessment.signals.motion,
                reason = %assessment.decision.as_str(),
                "entry_rejected"
            );
            return Ok(Submission::Rejected { assessment });
        }

        let event = EntryEvent::new(
            self.tracker.space(),
            validated.subject_id,
            validated.kind,
            assessment.total,
            assessment.auto_logged(),
            validated.inputs.manual_confirm,
            assessment.signals,
        );

        let metrics = &self.metrics;
        let (event, transition) = self.tracker.apply_live_with(event, |transition, count| {
            metrics.set_occupancy(count);
            if !transition.changed() {
                metrics.record_occupancy_noop();
            }
        });
        self.metrics.record_accepted(validated.inputs.manual_confirm);

        info!(
            event_id = %event.event_id,
            subject = %event.subject_id,
            kind = %event.kind.as_str(),
            confidence = %event.confidence,
            manual_confirm = %event.manual_confirm,
            transition = %transition.as_str(),
            "entry_accepted"
        );
        if !transition.changed() {
            info!(subject = %event.subject_id, transition = %transition.as_str(), "occupancy_noop");
        }

        self.enqueue_persist(&event);
        Ok(Submission::Accepted { event, assessment, transition })
    }

    /// Hand the event to the persistence worker
    ///
    /// A full channel defers the send to a task that waits for capacity, so a
    /// burst never loses an acknowledged event. Only a closed channel, or no
    /// runtime to wait on, drops it.
    fn enqueue_persist(&self, event: &EntryEvent) {
        let Some(tx) = &self.persist_tx else {
            return;
        };
        match tx.try_send(PersistCmd::new(event.clone())) {
            Ok(()) => {}
            Err(TrySendError::Full(cmd)) => match Handle::try_current() {
                Ok(handle) => {
                    self.metrics.record_persist_deferred();
                    debug!(event_id = %event.event_id, "event_persist_deferred_channel_full");
                    let tx = tx.clone();
                    let metrics = self.metrics.clone();
                    handle.spawn(async move {
                        let event_id = cmd.event.event_id;
                        if tx.send(cmd).await.is_err() {
                            metrics.record_persist_dropped();
                            warn!(event_id = %event_id, "event_persist_dropped_channel_closed");
                        }
                    });
                }
                Err(_) => {
                    self.metrics.record_persist_dropped();
                    warn!(event_id = %event.event_id, "event_persist_dropped_channel_full");
                }
            },
            Err(TrySendError::Closed(_)) => {
                self.metrics.record_persist_dropped();
                warn!(event_id = %event.event_id, "event_persist_dropped_channel_closed");
            }
        }
    }

    /// Re-apply previously persisted events, e.g. from the event log at startup
    ///
    /// Events for other spaces are ignored. Returns how many were applied.
    pub fn restore(&self, events: Vec<EntryEvent>) -> usize {
        let mut applied = 0;
        for event in events {
            if event.space != self.tracker.space() {
                continue;
            }
            if self.tracker.apply(event) != Transition::Duplicate {
                applied += 1;
            }
        }
        self.metrics.set_occupancy(self.tracker.current_occupancy());
        info!(
            space = %self.tracker.space(),
            applied = %applied,
            occupancy = %self.tracker.current_occupancy(),
            "occupancy_restored"
        );
        applied
    }
}
