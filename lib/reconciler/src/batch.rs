//! Batch processing and acknowledgment.
//!
//! One delivered batch becomes one outcome per entry, in input order. A
//! failed entry never stops entries for other keys, but later entries for
//! its own key are held back as `Failed(Blocked)` so that whatever the feed
//! redelivers, each key's changes apply in delivery order. With
//! `max_concurrency > 1` distinct keys may run in parallel, otherwise the
//! whole batch runs strictly in order.
//!
//! When a deadline is given, the cutoff is `deadline - deadline_margin`: no
//! entry starts after it and no service call runs past it. Entries stopped
//! this way are reported as failed so the feed redelivers them.

use crate::error::ReconcileError;
use crate::outcome::{ReconciliationOutcome, SkipReason};
use crate::reconciler::Reconciler;
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use timeslot_core::{BatchId, ReservationKey};
use timeslot_scheduler::TriggerService;
use timeslot_stream::{BatchResponse, ChangeEvent, ChangeKind, Classifier, StreamRecord};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

pub const DEFAULT_DEADLINE_MARGIN: Duration = Duration::from_millis(500);

/// Outcome of one entry together with what identifies it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryReport {
    /// Position in the delivered batch.
    pub index: usize,
    /// Sequence number (or event id) to report on failure.
    pub item_identifier: Option<String>,
    /// Absent when the record could not be classified.
    pub key: Option<ReservationKey>,
    pub kind: Option<ChangeKind>,
    pub outcome: ReconciliationOutcome,
}

/// Outcomes of one batch, in input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub batch_id: BatchId,
    pub entries: Vec<EntryReport>,
}

impl BatchReport {
    pub fn outcomes(&self) -> impl Iterator<Item = &ReconciliationOutcome> {
        self.entries.iter().map(|entry| &entry.outcome)
    }

    #[must_use]
    pub fn applied(&self) -> usize {
        self.outcomes().filter(|o| o.is_applied()).count()
    }

    #[must_use]
    pub fn skipped(&self) -> usize {
        self.outcomes().filter(|o| o.is_skipped()).count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes().filter(|o| o.is_failed()).count()
    }

    /// The partial acknowledgment for the feed.
    ///
    /// Every failed entry is listed. An entry without any identifier is
    /// listed with an empty one, which makes the feed retry the whole batch.
    #[must_use]
    pub fn response(&self) -> BatchResponse {
        BatchResponse::from_failures(
            self.entries
                .iter()
                .filter(|entry| !entry.outcome.is_acknowledged())
                .map(|entry| entry.item_identifier.clone().unwrap_or_default()),
        )
    }
}

/// A classified entry waiting to be reconciled.
struct Pending {
    index: usize,
    event: ChangeEvent,
}

/// Drives a batch through classification and reconciliation.
#[derive(Debug)]
pub struct BatchProcessor<S> {
    reconciler: Reconciler<S>,
    classifier: Classifier,
    max_concurrency: usize,
    deadline_margin: Duration,
}

impl<S: TriggerService> BatchProcessor<S> {
    /// Creates a sequential processor with the default deadline margin.
    pub fn new(reconciler: Reconciler<S>, classifier: Classifier) -> Self {
        Self {
            reconciler,
            classifier,
            max_concurrency: 1,
            deadline_margin: DEFAULT_DEADLINE_MARGIN,
        }
    }

    /// Allows up to `max_concurrency` distinct keys in flight. Zero means one.
    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    #[must_use]
    pub const fn with_deadline_margin(mut self, margin: Duration) -> Self {
        self.deadline_margin = margin;
        self
    }

    #[must_use]
    pub fn reconciler(&self) -> &Reconciler<S> {
        &self.reconciler
    }

    #[must_use]
    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Processes one batch and reports an outcome per record.
    pub async fn process(&self, records: &[StreamRecord], deadline: Option<Instant>) -> BatchReport {
        self.process_batch(BatchId::new(), records, deadline).await
    }

    #[instrument(skip(self, records, deadline), fields(batch_id = %batch_id, records = records.len()))]
    async fn process_batch(
        &self,
        batch_id: BatchId,
        records: &[StreamRecord],
        deadline: Option<Instant>,
    ) -> BatchReport {
        let started = Instant::now();

        let mut entries: Vec<EntryReport> = Vec::with_capacity(records.len());
        let mut pending = Vec::new();
        for (index, record) in records.iter().enumerate() {
            let item_identifier = record.item_identifier().map(str::to_string);
            match self.classifier.classify(record) {
                Ok(event) => {
                    entries.push(EntryReport {
                        index,
                        item_identifier,
                        key: Some(event.key().clone()),
                        kind: Some(event.kind()),
                        // Overwritten once the entry runs
                        outcome: ReconciliationOutcome::Failed(ReconcileError::DeadlineExceeded),
                    });
                    pending.push(Pending { index, event });
                }
                Err(err) => {
                    warn!(
                        index,
                        item = item_identifier.as_deref().unwrap_or("-"),
                        error = %err,
                        "Skipping invalid record"
                    );
                    entries.push(EntryReport {
                        index,
                        item_identifier,
                        key: None,
                        kind: None,
                        outcome: ReconciliationOutcome::Skipped(SkipReason::Invalid(err)),
                    });
                }
            }
        }

        let cutoff = deadline.map(|deadline| {
            deadline
                .checked_sub(self.deadline_margin)
                .unwrap_or_else(Instant::now)
        });
        let lanes = self.lanes(pending);
        let finished: Vec<Vec<(usize, ReconciliationOutcome)>> = futures::stream::iter(lanes)
            .map(|lane| self.run_lane(lane, cutoff))
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        for (index, outcome) in finished.into_iter().flatten() {
            entries[index].outcome = outcome;
        }

        let report = BatchReport { batch_id, entries };
        info!(
            applied = report.applied(),
            skipped = report.skipped(),
            failed = report.failed(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Processed batch"
        );
        report
    }

    /// Splits entries into independently runnable lanes.
    ///
    /// Sequential processing uses a single lane in delivery order. Otherwise
    /// there is one lane per key, ordered by first appearance.
    fn lanes(&self, pending: Vec<Pending>) -> Vec<Vec<Pending>> {
        if self.max_concurrency == 1 {
            return vec![pending];
        }

        let mut lanes: Vec<Vec<Pending>> = Vec::new();
        let mut by_key: HashMap<ReservationKey, usize> = HashMap::new();
        for entry in pending {
            let slot = *by_key
                .entry(entry.event.key().clone())
                .or_insert_with(|| {
                    lanes.push(Vec::new());
                    lanes.len() - 1
                });
            lanes[slot].push(entry);
        }
        lanes
    }

    async fn run_lane(
        &self,
        lane: Vec<Pending>,
        cutoff: Option<Instant>,
    ) -> Vec<(usize, ReconciliationOutcome)> {
        let mut outcomes = Vec::with_capacity(lane.len());
        // First failed entry per key
        let mut failed: HashMap<ReservationKey, usize> = HashMap::new();
        for Pending { index, event } in lane {
            if let Some(&earlier) = failed.get(event.key()) {
                warn!(index, key = %event.key(), earlier, "Holding entry back behind an earlier failure");
                outcomes.push((
                    index,
                    ReconciliationOutcome::Failed(ReconcileError::Blocked { index: earlier }),
                ));
                continue;
            }
            if cutoff.is_some_and(|cutoff| Instant::now() >= cutoff) {
                warn!(index, key = %event.key(), "Deadline near, leaving entry for redelivery");
                outcomes.push((
                    index,
                    ReconciliationOutcome::Failed(ReconcileError::DeadlineExceeded),
                ));
                continue;
            }

            let outcome = self.reconciler.reconcile_before(&event, cutoff).await;
            match &outcome {
                ReconciliationOutcome::Applied => {
                    debug!(index, key = %event.key(), kind = %event.kind(), "Applied");
                }
                ReconciliationOutcome::Skipped(reason) => {
                    warn!(index, key = %event.key(), kind = %event.kind(), %reason, "Skipped");
                }
                ReconciliationOutcome::Failed(err) => {
                    error!(index, key = %event.key(), kind = %event.kind(), error = %err, "Failed");
                    failed.insert(event.key().clone(), index);
                }
            }
            outcomes.push((index, outcome));
        }
        outcomes
    }
}
