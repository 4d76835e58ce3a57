use chrono::Duration;
use serde::Serialize;
use tracing::{info, instrument};

use tandem_core::ids::{AccountId, PartnershipId};
use tandem_core::notify::PushMessage;
use tandem_core::ProgressionError;

use crate::context::EngineContext;
use crate::error::EngineError;
use crate::notifier::Delivery;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderReceipt {
    pub success: bool,
    pub message: String,
}

/// Whole minutes left on a cooldown, rounded up, never below one.
pub fn remaining_minutes(elapsed: Duration, cooldown: Duration) -> i64 {
    let remaining = (cooldown - elapsed).num_seconds().max(0);
    ((remaining + 59) / 60).max(1)
}

/// Nudge `partner` on behalf of `caller`, at most once per cooldown per
/// (caller, partnership).
///
/// Unknown partnerships and partner ids that don't match the caller's
/// partnership both read as `NotFound`. Concurrent calls may both pass the
/// cooldown check.
#[instrument(skip(ctx), fields(account_id = %caller, partnership_id = %partnership))]
pub async fn send_reminder(
    ctx: &EngineContext,
    caller: &AccountId,
    partnership: &PartnershipId,
    partner: &AccountId,
) -> Result<ReminderReceipt, EngineError> {
    let progress = ctx
        .store
        .progress()
        .find(partnership)?
        .ok_or_else(|| ProgressionError::NotFound(format!("partnership {partnership}")))?;
    if progress.partners.partner_of(caller) != Some(partner) {
        let what = format!("partner {partner} in {partnership}");
        return Err(ProgressionError::NotFound(what).into());
    }

    let now = ctx.now();
    let reminders = ctx.store.reminders();
    if let Some(last) = reminders.last_sent(caller, partnership)? {
        let elapsed = now - last;
        if elapsed < ctx.reminder_cooldown {
            return Err(ProgressionError::RateLimited {
                remaining_minutes: remaining_minutes(elapsed, ctx.reminder_cooldown),
            }
            .into());
        }
    }

    let sender = ctx.store.accounts().get(caller)?;
    let delivery = ctx
        .notifier
        .send(PushMessage::reminder(partner.clone(), &sender.display_name, partnership))
        .await?;
    reminders.record(caller, partnership, now)?;

    info!(?delivery, "reminder sent");
    Ok(ReminderReceipt {
        success: true,
        message: match delivery {
            Delivery::Sent => "Reminder sent".to_string(),
            Delivery::NoAddress => {
                "Reminder recorded; your partner has notifications turned off".to_string()
            }
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::bootstrap_partnership;
    use crate::context::testing::{harness, p, s, Harness};
    use tandem_core::notify::NotificationKind;

    async fn started() -> (Harness, PartnershipId) {
        let h = harness();
        bootstrap_partnership(&h.ctx, &p(), &s()).await.unwrap();
        (h, PartnershipId::from_raw("p-s"))
    }

    #[test]
    fn remaining_minutes_rounds_up() {
        let cooldown = Duration::hours(4);
        assert_eq!(remaining_minutes(Duration::hours(3), cooldown), 60);
        assert_eq!(remaining_minutes(Duration::hours(4) - Duration::seconds(30), cooldown), 1);
        assert_eq!(remaining_minutes(Duration::minutes(1) + Duration::seconds(1), cooldown), 239);
        assert_eq!(remaining_minutes(Duration::hours(5), cooldown), 1);
    }

    #[tokio::test]
    async fn second_reminder_within_cooldown_is_rate_limited() {
        let (h, pid) = started().await;
        let receipt = send_reminder(&h.ctx, &p(), &pid, &s()).await.unwrap();
        assert!(receipt.success);

        h.clock.advance(Duration::hours(1));
        let err = send_reminder(&h.ctx, &p(), &pid, &s()).await.unwrap_err();
        assert_eq!(
            err.as_progression(),
            Some(ProgressionError::RateLimited { remaining_minutes: 180 })
        );

        let messages = h.gateway.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind, NotificationKind::Reminder);
        assert_eq!(messages[0].recipient, s());
    }

    #[tokio::test]
    async fn reminder_after_cooldown_succeeds() {
        let (h, pid) = started().await;
        send_reminder(&h.ctx, &p(), &pid, &s()).await.unwrap();
        h.clock.advance(Duration::hours(4) + Duration::seconds(1));
        send_reminder(&h.ctx, &p(), &pid, &s()).await.unwrap();
        assert_eq!(h.gateway.messages().len(), 2);
    }

    #[tokio::test]
    async fn reminder_exactly_at_cooldown_succeeds() {
        let (h, pid) = started().await;
        send_reminder(&h.ctx, &p(), &pid, &s()).await.unwrap();

        h.clock.advance(Duration::hours(4) - Duration::seconds(1));
        let err = send_reminder(&h.ctx, &p(), &pid, &s()).await.unwrap_err();
        assert_eq!(
            err.as_progression(),
            Some(ProgressionError::RateLimited { remaining_minutes: 1 })
        );

        h.clock.advance(Duration::seconds(1));
        send_reminder(&h.ctx, &p(), &pid, &s()).await.unwrap();
        assert_eq!(h.gateway.messages().len(), 2);
    }

    #[tokio::test]
    async fn cooldown_is_per_sender() {
        let (h, pid) = started().await;
        send_reminder(&h.ctx, &p(), &pid, &s()).await.unwrap();
        send_reminder(&h.ctx, &s(), &pid, &p()).await.unwrap();
        assert_eq!(h.gateway.messages().len(), 2);
    }

    #[tokio::test]
    async fn wrong_partner_or_partnership_not_found() {
        let (h, pid) = started().await;
        let outsider = AccountId::from_raw("x");
        for (caller, partnership, partner) in [
            (p(), pid.clone(), outsider.clone()),
            (outsider.clone(), pid.clone(), s()),
            (p(), PartnershipId::from_raw("p-x"), s()),
            (p(), pid.clone(), p()),
        ] {
            let err = send_reminder(&h.ctx, &caller, &partnership, &partner).await.unwrap_err();
            assert!(matches!(err.as_progression(), Some(ProgressionError::NotFound(_))));
        }
        assert!(h.gateway.messages().is_empty());
    }

    #[tokio::test]
    async fn failed_delivery_does_not_start_cooldown() {
        let (h, pid) = started().await;
        h.gateway.set_failing(true);
        let err = send_reminder(&h.ctx, &p(), &pid, &s()).await.unwrap_err();
        assert!(matches!(err.as_progression(), Some(ProgressionError::TransientDelivery(_))));

        h.gateway.set_failing(false);
        send_reminder(&h.ctx, &p(), &pid, &s()).await.unwrap();
    }

    #[tokio::test]
    async fn missing_address_still_counts() {
        let (h, pid) = started().await;
        h.ctx.store.accounts().set_push_token(&s(), None, h.ctx.now()).unwrap();
        let receipt = send_reminder(&h.ctx, &p(), &pid, &s()).await.unwrap();
        assert!(receipt.message.contains("turned off"));
        assert!(send_reminder(&h.ctx, &p(), &pid, &s()).await.is_err());
    }
}
