//! Delivers change-feed rows to the trigger handlers.
//!
//! Each pass reads unacknowledged changes in sequence order, counts the
//! attempt, routes by collection and acknowledges. Handler failures are
//! logged and acknowledged; only storage failures leave the row pending so
//! it is delivered again on a later pass, up to `MAX_DELIVERY_ATTEMPTS`.

use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use tandem_core::assignment::DailySubtopicAssignment;
use tandem_settings::ScheduleSettings;
use tandem_store::changes::{Collection, DocumentChange};
use tandem_store::pairing::PairingRequest;
use tandem_store::StoreError;

use crate::completion::handle_assignment_change;
use crate::context::EngineContext;
use crate::error::EngineError;
use crate::pairing::handle_pairing_change;

pub const MAX_DELIVERY_ATTEMPTS: u32 = 5;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReport {
    pub delivered: usize,
    /// Handler failed; the change was acknowledged anyway.
    pub failed: usize,
    /// Left pending for redelivery.
    pub deferred: usize,
}

pub struct ChangeDispatcher {
    ctx: EngineContext,
    batch_size: u32,
    poll_interval: Duration,
}

impl ChangeDispatcher {
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            ctx,
            batch_size: 100,
            poll_interval: Duration::from_millis(500),
        }
    }

    pub fn from_settings(ctx: EngineContext, settings: &ScheduleSettings) -> Self {
        Self {
            ctx,
            batch_size: settings.dispatch_batch_size.max(1),
            poll_interval: Duration::from_millis(settings.dispatch_poll_ms.max(1)),
        }
    }

    /// One pass over the pending changes.
    #[instrument(skip(self))]
    pub async fn dispatch_pending(&self) -> Result<DispatchReport, EngineError> {
        let feed = self.ctx.store.changes();
        let mut report = DispatchReport::default();

        for change in feed.pending(self.batch_size)? {
            feed.mark_attempt(change.seq)?;
            let attempt = change.attempts + 1;

            match self.route(&change).await {
                Ok(()) => report.delivered += 1,
                Err(e) if is_transient(&e) && attempt < MAX_DELIVERY_ATTEMPTS => {
                    warn!(
                        seq = change.seq,
                        collection = %change.collection,
                        attempt,
                        error = %e,
                        "change handler hit a storage error, will redeliver"
                    );
                    report.deferred += 1;
                    continue;
                }
                Err(e) => {
                    error!(
                        seq = change.seq,
                        collection = %change.collection,
                        document_id = %change.document_id,
                        attempt,
                        error_kind = e.error_kind(),
                        error = %e,
                        "change handler failed"
                    );
                    report.failed += 1;
                }
            }
            feed.ack(change.seq, self.ctx.now())?;
        }

        if report != DispatchReport::default() {
            debug!(?report, "dispatch pass finished");
        }
        Ok(report)
    }

    async fn route(&self, change: &DocumentChange) -> Result<(), EngineError> {
        match change.collection {
            Collection::PairingRequests => {
                let (before, after) = change.snapshots::<PairingRequest>()?;
                let effect = handle_pairing_change(&self.ctx, before.as_ref(), &after).await?;
                debug!(seq = change.seq, ?effect, "pairing change handled");
            }
            Collection::DailyAssignments => {
                let (before, after) = change.snapshots::<DailySubtopicAssignment>()?;
                let outcome = handle_assignment_change(&self.ctx, before.as_ref(), &after).await?;
                debug!(seq = change.seq, ?outcome, "assignment change handled");
            }
        }
        Ok(())
    }

    /// Poll until `cancel` fires. A failed pass is logged and retried on
    /// the next tick.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(poll_ms = self.poll_interval.as_millis() as u64, "change dispatcher started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.dispatch_pending().await {
                        warn!(error = %e, "dispatch pass failed");
                    }
                }
            }
        }
        info!("change dispatcher stopped");
    }
}

fn is_transient(err: &EngineError) -> bool {
    matches!(err, EngineError::Store(StoreError::Database(_) | StoreError::Io(_)))
}
