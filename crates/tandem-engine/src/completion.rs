//! Reacting to partners finishing the daily unit.
//!
//! `plan_completion` decides from the before/after snapshots alone;
//! `handle_assignment_change` applies the plan. The `both_completed` flip
//! is a guarded write and only the invocation that wins it notifies, so a
//! redelivered change produces no second notification.

use tracing::{debug, info, instrument};

use tandem_core::assignment::DailySubtopicAssignment;
use tandem_core::ids::AccountId;
use tandem_core::notify::PushMessage;
use tandem_core::partnership::PartnerPair;

use crate::context::EngineContext;
use crate::error::EngineError;

/// One `PartnerCompleted` message to send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletionNotice {
    pub recipient: AccountId,
    /// The partner whose completion is being announced.
    pub completer: AccountId,
    pub recipient_completed: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompletionPlan {
    /// Both partners are now done: stamp the assignment and record the
    /// subtopic as completed.
    pub mark_both_completed: bool,
    pub notices: Vec<CompletionNotice>,
}

impl CompletionPlan {
    pub fn is_noop(&self) -> bool {
        !self.mark_both_completed && self.notices.is_empty()
    }
}

/// Decide what an assignment write means.
pub fn plan_completion(
    before: Option<&DailySubtopicAssignment>,
    after: &DailySubtopicAssignment,
    partners: &PartnerPair,
) -> CompletionPlan {
    if after.both_completed {
        return CompletionPlan::default();
    }

    let both_done = after.all_completed(partners.members());
    let mut new_completers: Vec<AccountId> = after
        .new_completers(before)
        .into_iter()
        .filter(|account| partners.contains(account))
        .collect();
    if new_completers.is_empty() {
        if !both_done {
            return CompletionPlan::default();
        }
        // Both done but unstamped: an earlier event was lost. Announce the
        // later of the two completions.
        new_completers.extend(last_completer(after, partners));
    }

    let notices = new_completers
        .into_iter()
        .filter_map(|completer| {
            let recipient = partners.partner_of(&completer)?.clone();
            Some(CompletionNotice {
                recipient,
                completer,
                recipient_completed: both_done,
            })
        })
        .collect();

    CompletionPlan {
        mark_both_completed: both_done,
        notices,
    }
}

fn last_completer(after: &DailySubtopicAssignment, partners: &PartnerPair) -> Option<AccountId> {
    partners
        .members()
        .into_iter()
        .filter_map(|account| after.user_completion.get(account).map(|at| (at, account)))
        .max_by_key(|(at, _)| *at)
        .map(|(_, account)| account.clone())
}

/// Result of handling one assignment change.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompletionOutcome {
    /// This invocation flipped `both_completed`.
    pub both_completed_now: bool,
    pub notified: usize,
}

#[instrument(skip_all, fields(partnership_id = %after.partnership_id, date = %after.date))]
pub async fn handle_assignment_change(
    ctx: &EngineContext,
    before: Option<&DailySubtopicAssignment>,
    after: &DailySubtopicAssignment,
) -> Result<CompletionOutcome, EngineError> {
    let progress = ctx.store.progress().get(&after.partnership_id)?;
    let plan = plan_completion(before, after, &progress.partners);
    if plan.is_noop() {
        debug!("no completion change");
        return Ok(CompletionOutcome::default());
    }

    let assignments = ctx.store.assignments();
    let mut outcome = CompletionOutcome::default();

    if plan.mark_both_completed {
        let now = ctx.now();
        // Set union first: a crash after this but before the stamp is
        // repaired by redelivery.
        ctx.store
            .progress()
            .append_completed(&after.partnership_id, after.subtopic_id, now)?;
        let next = ctx.schedule.next_scheduled_date(now);
        if !assignments.mark_both_completed(&after.partnership_id, after.date, now, next)? {
            debug!("both_completed already set, skipping notifications");
            return Ok(outcome);
        }
        outcome.both_completed_now = true;
        info!(
            subtopic_id = %after.subtopic_id,
            next_scheduled_date = %next,
            "both partners completed"
        );
    } else {
        let current = assignments.get(&after.partnership_id, after.date)?;
        if current.is_some_and(|c| c.both_completed) {
            debug!("stale partial completion, skipping notifications");
            return Ok(outcome);
        }
    }

    let accounts = ctx.store.accounts();
    for notice in plan.notices {
        let completer_name = accounts
            .find(&notice.completer)?
            .map(|profile| profile.display_name)
            .unwrap_or_else(|| "Your partner".to_string());
        let message = PushMessage::partner_completed(
            notice.recipient,
            &completer_name,
            &after.partnership_id,
            after.subtopic_id,
            notice.recipient_completed,
        );
        if ctx.notifier.send_logged(message).await.is_some() {
            outcome.notified += 1;
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::bootstrap_partnership;
    use crate::context::testing::{harness, p, s, Harness};
    use chrono::{Duration, NaiveDate, Utc};
    use tandem_core::ids::{PartnershipId, SubtopicId};
    use tandem_core::notify::NotificationKind;

    fn pair() -> PartnerPair {
        PartnerPair {
            primary: p(),
            secondary: s(),
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    fn assignment(done: &[AccountId]) -> DailySubtopicAssignment {
        let pid = PartnershipId::from_raw("p-s");
        let mut a = DailySubtopicAssignment::open(pid, day(10), SubtopicId(11), Utc::now());
        for account in done {
            a.user_completion.insert(account.clone(), Utc::now());
        }
        a
    }

    #[test]
    fn single_completer_notifies_partner() {
        let plan = plan_completion(Some(&assignment(&[])), &assignment(&[p()]), &pair());
        assert!(!plan.mark_both_completed);
        assert_eq!(
            plan.notices,
            vec![CompletionNotice {
                recipient: s(),
                completer: p(),
                recipient_completed: false,
            }]
        );
    }

    #[test]
    fn second_completer_finishes_the_day() {
        let plan = plan_completion(Some(&assignment(&[p()])), &assignment(&[p(), s()]), &pair());
        assert!(plan.mark_both_completed);
        assert_eq!(plan.notices.len(), 1);
        assert_eq!(plan.notices[0].recipient, p());
        assert!(plan.notices[0].recipient_completed);
    }

    #[test]
    fn simultaneous_completion_notifies_both() {
        let plan = plan_completion(Some(&assignment(&[])), &assignment(&[p(), s()]), &pair());
        assert!(plan.mark_both_completed);
        let recipients: Vec<_> = plan.notices.iter().map(|n| n.recipient.clone()).collect();
        assert_eq!(recipients.len(), 2);
        assert!(recipients.contains(&p()) && recipients.contains(&s()));
        assert!(plan.notices.iter().all(|n| n.recipient_completed));
    }

    #[test]
    fn already_stamped_or_unchanged_is_noop() {
        let mut done = assignment(&[p(), s()]);
        done.both_completed = true;
        assert!(plan_completion(Some(&assignment(&[p()])), &done, &pair()).is_noop());
        assert!(plan_completion(Some(&assignment(&[p()])), &assignment(&[p()]), &pair()).is_noop());
    }

    #[test]
    fn unstamped_both_done_without_new_completers_finishes() {
        let mut both = assignment(&[p(), s()]);
        both.user_completion.insert(s(), Utc::now() + Duration::minutes(5));
        let plan = plan_completion(Some(&both), &both, &pair());
        assert!(plan.mark_both_completed);
        assert_eq!(
            plan.notices,
            vec![CompletionNotice {
                recipient: p(),
                completer: s(),
                recipient_completed: true,
            }]
        );
    }

    #[test]
    fn outsiders_ignored() {
        let plan = plan_completion(None, &assignment(&[AccountId::from_raw("x")]), &pair());
        assert!(plan.is_noop());
    }

    async fn started() -> (Harness, PartnershipId) {
        let h = harness();
        bootstrap_partnership(&h.ctx, &p(), &s()).await.unwrap();
        (h, PartnershipId::from_raw("p-s"))
    }

    #[tokio::test]
    async fn redelivered_both_completed_notifies_once() {
        let (h, pid) = started().await;
        let repo = h.ctx.store.assignments();
        let first = repo.record_completion(&pid, day(10), &p(), h.ctx.now()).unwrap();
        let second = repo.record_completion(&pid, day(10), &s(), h.ctx.now()).unwrap();

        let outcome = handle_assignment_change(&h.ctx, Some(&first), &second).await.unwrap();
        assert!(outcome.both_completed_now);
        assert_eq!(outcome.notified, 1);

        let again = handle_assignment_change(&h.ctx, Some(&first), &second).await.unwrap();
        assert_eq!(again, CompletionOutcome::default());

        let messages = h.gateway.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].recipient, p());
        assert_eq!(
            messages[0].kind,
            NotificationKind::PartnerCompleted {
                recipient_completed: true
            }
        );

        let progress = h.ctx.store.progress().get(&pid).unwrap();
        assert_eq!(progress.completed_subtopics.len(), 1);
        let stored = repo.get(&pid, day(10)).unwrap().unwrap();
        assert!(stored.both_completed);
        // 09:00 completion: the next unit unlocks the same day.
        assert_eq!(stored.next_scheduled_date, Some(day(10)));
    }

    #[tokio::test]
    async fn lost_completion_event_is_repaired_by_a_later_one() {
        let (h, pid) = started().await;
        let repo = h.ctx.store.assignments();
        repo.record_completion(&pid, day(10), &p(), h.ctx.now()).unwrap();
        let both = repo.record_completion(&pid, day(10), &s(), h.ctx.now()).unwrap();

        let outcome = handle_assignment_change(&h.ctx, Some(&both), &both).await.unwrap();
        assert!(outcome.both_completed_now);
        assert_eq!(outcome.notified, 1);

        let stored = repo.get(&pid, day(10)).unwrap().unwrap();
        assert!(stored.both_completed);
        let progress = h.ctx.store.progress().get(&pid).unwrap();
        assert!(progress.completed_subtopics.contains(&SubtopicId(11)));

        let again = handle_assignment_change(&h.ctx, Some(&both), &both).await.unwrap();
        assert_eq!(again, CompletionOutcome::default());
        assert_eq!(h.gateway.messages().len(), 1);
    }

    #[tokio::test]
    async fn afternoon_completion_schedules_tomorrow() {
        let (h, pid) = started().await;
        h.clock.advance(Duration::hours(5));
        let repo = h.ctx.store.assignments();
        let first = repo.record_completion(&pid, day(10), &p(), h.ctx.now()).unwrap();
        let second = repo.record_completion(&pid, day(10), &s(), h.ctx.now()).unwrap();
        handle_assignment_change(&h.ctx, Some(&first), &second).await.unwrap();
        let stored = repo.get(&pid, day(10)).unwrap().unwrap();
        assert_eq!(stored.next_scheduled_date, Some(day(11)));
    }

    #[tokio::test]
    async fn partial_completion_notifies_partner() {
        let (h, pid) = started().await;
        let repo = h.ctx.store.assignments();
        let before = repo.get(&pid, day(10)).unwrap().unwrap();
        let after = repo.record_completion(&pid, day(10), &s(), h.ctx.now()).unwrap();

        let outcome = handle_assignment_change(&h.ctx, Some(&before), &after).await.unwrap();
        assert!(!outcome.both_completed_now);
        let messages = h.gateway.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].recipient, p());
        assert_eq!(
            messages[0].kind,
            NotificationKind::PartnerCompleted {
                recipient_completed: false
            }
        );
        assert!(messages[0].body.contains("User s"));
    }

    #[tokio::test]
    async fn delivery_failure_keeps_the_stamp() {
        let (h, pid) = started().await;
        h.gateway.set_failing(true);
        let repo = h.ctx.store.assignments();
        let first = repo.record_completion(&pid, day(10), &p(), h.ctx.now()).unwrap();
        let second = repo.record_completion(&pid, day(10), &s(), h.ctx.now()).unwrap();

        let outcome = handle_assignment_change(&h.ctx, Some(&first), &second).await.unwrap();
        assert!(outcome.both_completed_now);
        assert_eq!(outcome.notified, 0);
        assert!(repo.get(&pid, day(10)).unwrap().unwrap().both_completed);
    }
}
