//! Creating the next day's unit once the rollover instant has passed.
//!
//! A partnership is considered when it is incomplete, has no open
//! assignment, and the instant its latest assignment scheduled has passed.
//! When the current round is exhausted the round is advanced
//! (compare-and-set) and the selector retried once. A round with nothing
//! left fails the pass; the next pass advances past it. With no uncompleted
//! subtopic left in the catalog the partnership is marked complete.

use chrono::{DateTime, Days, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use tandem_core::assignment::DailySubtopicAssignment;
use tandem_core::catalog::{Catalog, Subtopic};
use tandem_core::ids::PartnershipId;
use tandem_core::notify::PushMessage;
use tandem_core::partnership::PartnerPair;
use tandem_core::schedule::next_assignment_date;
use tandem_core::selector::{select_for_round, select_next_subtopic};
use tandem_core::ProgressionError;

use crate::context::EngineContext;
use crate::error::EngineError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloverReport {
    pub examined: usize,
    pub scheduled: usize,
    pub rounds_advanced: usize,
    pub completed: usize,
    pub not_due: usize,
    pub skipped_open: usize,
    pub failed: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum RolloverAction {
    Scheduled { advanced_round: bool },
    Completed,
    NotDue,
    AlreadyOpen,
}

/// One pass over every incomplete partnership. Per-partnership failures are
/// logged and counted, never propagated.
#[instrument(skip_all)]
pub async fn run_rollover(ctx: &EngineContext) -> Result<RolloverReport, EngineError> {
    let now = ctx.now();
    let catalog = ctx.store.catalog().load()?;
    let mut report = RolloverReport::default();

    for partnership in ctx.store.progress().list_incomplete()? {
        report.examined += 1;
        match roll_partnership(ctx, &catalog, &partnership, now).await {
            Ok(RolloverAction::Scheduled { advanced_round }) => {
                report.scheduled += 1;
                if advanced_round {
                    report.rounds_advanced += 1;
                }
            }
            Ok(RolloverAction::Completed) => report.completed += 1,
            Ok(RolloverAction::NotDue) => report.not_due += 1,
            Ok(RolloverAction::AlreadyOpen) => report.skipped_open += 1,
            Err(e) => {
                report.failed += 1;
                match e.as_progression() {
                    Some(ProgressionError::DataIntegrity(_)) => {
                        error!(
                            partnership_id = %partnership,
                            error = %e,
                            "rollover left partnership without a unit"
                        );
                    }
                    _ => warn!(partnership_id = %partnership, error = %e, "rollover failed"),
                }
            }
        }
    }

    info!(
        examined = report.examined,
        scheduled = report.scheduled,
        completed = report.completed,
        failed = report.failed,
        "rollover pass finished"
    );
    Ok(report)
}

/// Run a pass every `interval` until `cancel` fires. The first pass runs
/// immediately.
pub async fn run_rollover_loop(
    ctx: EngineContext,
    interval: std::time::Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    info!(interval_secs = interval.as_secs(), "rollover loop started");

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = run_rollover(&ctx).await {
                    warn!(error = %e, "rollover pass failed");
                }
            }
        }
    }
    info!("rollover loop stopped");
}

#[instrument(skip(ctx, catalog, now), fields(partnership_id = %partnership))]
async fn roll_partnership(
    ctx: &EngineContext,
    catalog: &Catalog,
    partnership: &PartnershipId,
    now: DateTime<Utc>,
) -> Result<RolloverAction, EngineError> {
    let assignments = ctx.store.assignments();
    if assignments.open_for(partnership)?.is_some() {
        return Ok(RolloverAction::AlreadyOpen);
    }

    let latest = assignments.latest_for(partnership)?;
    if let Some(latest) = &latest {
        let unlock = latest
            .next_scheduled_date
            .or_else(|| latest.date.checked_add_days(Days::new(1)))
            .unwrap_or(latest.date);
        if !ctx.schedule.is_due(unlock, now) {
            debug!(%unlock, "next unit not due yet");
            return Ok(RolloverAction::NotDue);
        }
    }

    let progress_repo = ctx.store.progress();
    let progress = progress_repo.get(partnership)?;

    let (subtopic, advanced_round) = match select_next_subtopic(&progress, catalog) {
        Some(subtopic) => (subtopic, false),
        None if catalog.remaining_subtopics(&progress.completed_subtopics) == 0 => {
            if progress_repo.mark_complete(partnership, now)? {
                info!(completed = progress.completed_subtopics.len(), "curriculum complete");
            }
            return Ok(RolloverAction::Completed);
        }
        None => {
            let next_round = progress.current_round + 1;
            if !progress_repo.advance_round(partnership, progress.current_round, now)? {
                debug!(round = progress.current_round, "round already advanced elsewhere");
                return Ok(RolloverAction::AlreadyOpen);
            }
            info!(round = next_round, "round advanced");
            let subtopic = select_for_round(&progress, catalog, next_round).ok_or_else(|| {
                ProgressionError::DataIntegrity(format!(
                    "round {next_round} has no uncompleted subtopic for {partnership}"
                ))
            })?;
            (subtopic, true)
        }
    };

    let date = next_assignment_date(now.date_naive(), latest.map(|a| a.date));
    let assignment = DailySubtopicAssignment::open(partnership.clone(), date, subtopic.id, now);
    if !assignments.create_if_absent(&assignment)? {
        return Ok(RolloverAction::AlreadyOpen);
    }
    info!(subtopic_id = %subtopic.id, %date, "next unit scheduled");

    announce(ctx, &progress.partners, partnership, subtopic).await;
    Ok(RolloverAction::Scheduled { advanced_round })
}

async fn announce(
    ctx: &EngineContext,
    partners: &PartnerPair,
    partnership: &PartnershipId,
    subtopic: &Subtopic,
) {
    for member in partners.members() {
        let message = PushMessage::new_unit_available(member.clone(), partnership, &subtopic.name);
        ctx.notifier.send_logged(message).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::bootstrap_partnership;
    use crate::context::testing::{harness, p, s, Harness};
    use chrono::{Duration, NaiveDate};
    use tandem_core::ids::{SubtopicId, TopicId};
    use tandem_core::notify::NotificationKind;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    fn pid() -> PartnershipId {
        PartnershipId::from_raw("p-s")
    }

    /// Bootstrap, then finish day 10 with `done` recorded as completed.
    async fn finished_day(done: &[i64]) -> Harness {
        let h = harness();
        bootstrap_partnership(&h.ctx, &p(), &s()).await.unwrap();
        let now = h.ctx.now();
        for id in done {
            h.ctx.store.progress().append_completed(&pid(), SubtopicId(*id), now).unwrap();
        }
        let next = h.ctx.schedule.next_scheduled_date(now);
        h.ctx.store.assignments().mark_both_completed(&pid(), day(10), now, next).unwrap();
        h
    }

    fn unit_messages(h: &Harness) -> usize {
        h.gateway
            .messages()
            .iter()
            .filter(|m| m.kind == NotificationKind::NewUnitAvailable)
            .count()
    }

    #[tokio::test]
    async fn waits_for_the_rollover_instant() {
        let h = finished_day(&[11]).await;
        let report = run_rollover(&h.ctx).await.unwrap();
        assert_eq!(report.not_due, 1);
        assert_eq!(report.scheduled, 0);

        h.clock.advance(Duration::hours(3));
        let report = run_rollover(&h.ctx).await.unwrap();
        assert_eq!(report.scheduled, 1);

        let next = h.ctx.store.assignments().open_for(&pid()).unwrap().unwrap();
        assert_eq!(next.date, day(11));
        assert_eq!(next.subtopic_id, SubtopicId(31));
        assert_eq!(unit_messages(&h), 2);
        assert!(h.gateway.messages().iter().any(|m| m.body.contains("Subtopic 31")));
    }

    #[tokio::test]
    async fn open_assignment_is_left_alone() {
        let h = harness();
        bootstrap_partnership(&h.ctx, &p(), &s()).await.unwrap();
        h.clock.advance(Duration::days(2));
        let report = run_rollover(&h.ctx).await.unwrap();
        assert_eq!(report.skipped_open, 1);
        assert_eq!(h.ctx.store.assignments().list_for(&pid(), 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_round_advances() {
        let h = finished_day(&[11, 31, 21, 91]).await;
        h.clock.advance(Duration::hours(3));
        let report = run_rollover(&h.ctx).await.unwrap();
        assert_eq!(report.rounds_advanced, 1);
        assert_eq!(report.scheduled, 1);

        let progress = h.ctx.store.progress().get(&pid()).unwrap();
        assert_eq!(progress.current_round, 2);
        let next = h.ctx.store.assignments().open_for(&pid()).unwrap().unwrap();
        assert_eq!(next.subtopic_id, SubtopicId(12));
    }

    #[tokio::test]
    async fn finished_curriculum_marks_complete() {
        let h = finished_day(&[11, 31, 21, 91, 12, 32, 22]).await;
        h.clock.advance(Duration::hours(3));
        let report = run_rollover(&h.ctx).await.unwrap();
        assert_eq!(report.completed, 1);
        assert_eq!(unit_messages(&h), 0);

        assert!(h.ctx.store.progress().get(&pid()).unwrap().is_complete);
        let again = run_rollover(&h.ctx).await.unwrap();
        assert_eq!(again.examined, 0);
    }

    #[tokio::test]
    async fn gap_in_rounds_is_crossed_one_round_per_pass() {
        let h = finished_day(&[11, 31, 21, 91, 12, 32, 22]).await;
        h.ctx
            .store
            .catalog()
            .import(
                &[],
                &[Subtopic {
                    id: SubtopicId(14),
                    topic_id: TopicId(1),
                    name: "Subtopic 14".to_string(),
                    order: 4,
                }],
            )
            .unwrap();
        h.clock.advance(Duration::hours(3));

        for round in [2, 3] {
            let report = run_rollover(&h.ctx).await.unwrap();
            assert_eq!(report.failed, 1);
            let progress = h.ctx.store.progress().get(&pid()).unwrap();
            assert_eq!(progress.current_round, round);
            assert!(!progress.is_complete);
            assert!(h.ctx.store.assignments().open_for(&pid()).unwrap().is_none());
        }

        let report = run_rollover(&h.ctx).await.unwrap();
        assert_eq!(report.scheduled, 1);
        assert_eq!(report.rounds_advanced, 1);
        assert_eq!(h.ctx.store.progress().get(&pid()).unwrap().current_round, 4);
        let next = h.ctx.store.assignments().open_for(&pid()).unwrap().unwrap();
        assert_eq!(next.subtopic_id, SubtopicId(14));
        assert_eq!(unit_messages(&h), 2);
    }

    #[tokio::test]
    async fn partnership_without_assignments_is_due_now() {
        let h = finished_day(&[]).await;
        // Simulates a bootstrap that created progress but failed to schedule.
        h.ctx
            .store
            .database()
            .with_conn(|conn| {
                conn.execute("DELETE FROM daily_assignments", [])?;
                Ok(())
            })
            .unwrap();
        let report = run_rollover(&h.ctx).await.unwrap();
        assert_eq!(report.scheduled, 1);
        let next = h.ctx.store.assignments().open_for(&pid()).unwrap().unwrap();
        assert_eq!(next.date, day(10));
        assert_eq!(next.subtopic_id, SubtopicId(11));
    }

    #[tokio::test]
    async fn loop_runs_immediately_and_stops_on_cancel() {
        let h = finished_day(&[11]).await;
        h.clock.advance(Duration::hours(3));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_rollover_loop(
            h.ctx.clone(),
            std::time::Duration::from_secs(3600),
            cancel.clone(),
        ));

        for _ in 0..200 {
            if h.ctx.store.assignments().open_for(&pid()).unwrap().is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        cancel.cancel();
        task.await.unwrap();
        assert!(h.ctx.store.assignments().open_for(&pid()).unwrap().is_some());
    }
}
