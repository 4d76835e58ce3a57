//! First-unit scheduling when two accounts pair (or re-pair).

use chrono::NaiveDate;
use tracing::{info, instrument, warn};

use tandem_core::assignment::DailySubtopicAssignment;
use tandem_core::ids::{AccountId, PartnershipId, SubtopicId};
use tandem_core::merge::merge_topic_priorities;
use tandem_core::partnership::PartnerPair;
use tandem_core::progress::PartnershipProgress;
use tandem_core::schedule::next_assignment_date;
use tandem_core::selector::select_next_subtopic;
use tandem_core::ProgressionError;

use crate::context::EngineContext;
use crate::error::EngineError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// New progress plus its first assignment.
    Started {
        partnership_id: PartnershipId,
        subtopic_id: SubtopicId,
        date: NaiveDate,
    },
    /// Existing progress had nothing open; a new assignment was created.
    Rescheduled {
        partnership_id: PartnershipId,
        subtopic_id: SubtopicId,
        date: NaiveDate,
    },
    /// An assignment is already open; nothing written.
    AlreadyOpen { partnership_id: PartnershipId },
    /// The partnership finished the curriculum.
    AlreadyComplete { partnership_id: PartnershipId },
}

impl BootstrapOutcome {
    pub fn partnership_id(&self) -> &PartnershipId {
        match self {
            Self::Started { partnership_id, .. }
            | Self::Rescheduled { partnership_id, .. }
            | Self::AlreadyOpen { partnership_id }
            | Self::AlreadyComplete { partnership_id } => partnership_id,
        }
    }
}

/// Create or resume the progression for two accounts.
///
/// Safe to call any number of times: progress is created only if absent,
/// and an assignment only when none is open.
#[instrument(skip(ctx), fields(account_id = %a, partner = %b))]
pub async fn bootstrap_partnership(
    ctx: &EngineContext,
    a: &AccountId,
    b: &AccountId,
) -> Result<BootstrapOutcome, EngineError> {
    let accounts = ctx.store.accounts();
    let profile_a = accounts.get(a)?;
    let profile_b = accounts.get(b)?;
    let pair = PartnerPair::from_partners(&profile_a.partner()?, &profile_b.partner()?)?;
    let key = pair.key();
    let now = ctx.now();

    let catalog = ctx.store.catalog().load()?;
    let progress_repo = ctx.store.progress();

    let (progress, created) = match progress_repo.find(&key)? {
        Some(existing) => (existing, false),
        None => {
            let order = merge_topic_priorities(
                &catalog,
                &profile_a.topic_ranking,
                &profile_b.topic_ranking,
            );
            progress_repo.create_if_absent(&PartnershipProgress::start(pair, order, now))?
        }
    };

    if progress.is_complete {
        info!(partnership_id = %key, "partnership already complete, nothing to schedule");
        return Ok(BootstrapOutcome::AlreadyComplete { partnership_id: key });
    }

    let assignments = ctx.store.assignments();
    if !created && assignments.open_for(&key)?.is_some() {
        info!(partnership_id = %key, "assignment already open");
        return Ok(BootstrapOutcome::AlreadyOpen { partnership_id: key });
    }

    let Some(subtopic) = select_next_subtopic(&progress, &catalog) else {
        warn!(
            partnership_id = %key,
            round = progress.current_round,
            "no eligible subtopic at bootstrap"
        );
        return Err(ProgressionError::DataIntegrity(format!(
            "no eligible subtopic for {key} in round {}",
            progress.current_round
        ))
        .into());
    };

    let latest = assignments.latest_for(&key)?.map(|a| a.date);
    let date = next_assignment_date(now.date_naive(), latest);
    let assignment = DailySubtopicAssignment::open(key.clone(), date, subtopic.id, now);
    if !assignments.create_if_absent(&assignment)? {
        // A concurrent bootstrap took the slot first.
        return Ok(BootstrapOutcome::AlreadyOpen { partnership_id: key });
    }

    info!(
        partnership_id = %key,
        subtopic_id = %subtopic.id,
        %date,
        created,
        "assignment scheduled"
    );
    Ok(if created {
        BootstrapOutcome::Started {
            partnership_id: key,
            subtopic_id: subtopic.id,
            date,
        }
    } else {
        BootstrapOutcome::Rescheduled {
            partnership_id: key,
            subtopic_id: subtopic.id,
            date,
        }
    })
}
