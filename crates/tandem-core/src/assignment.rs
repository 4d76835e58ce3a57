use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AccountId, PartnershipId, SubtopicId};

/// Where an assignment sits in its per-day lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionState {
    NotStarted,
    PartiallyDone,
    BothDone,
}

/// The unit a partnership works on for one day.
///
/// Keyed by (partnership, date). Once `both_completed` flips it is history
/// and no longer accepts completion writes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailySubtopicAssignment {
    pub partnership_id: PartnershipId,
    pub date: NaiveDate,
    pub subtopic_id: SubtopicId,
    #[serde(default)]
    pub user_completion: BTreeMap<AccountId, DateTime<Utc>>,
    #[serde(default)]
    pub both_completed: bool,
    pub both_completed_at: Option<DateTime<Utc>>,
    pub next_scheduled_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DailySubtopicAssignment {
    pub fn open(
        partnership_id: PartnershipId,
        date: NaiveDate,
        subtopic_id: SubtopicId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            partnership_id,
            date,
            subtopic_id,
            user_completion: BTreeMap::new(),
            both_completed: false,
            both_completed_at: None,
            next_scheduled_date: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_completed(&self, account: &AccountId) -> bool {
        self.user_completion.contains_key(account)
    }

    /// Derived from the flag and the completion map.
    pub fn state(&self) -> CompletionState {
        if self.both_completed {
            return CompletionState::BothDone;
        }
        // Both ids recorded but not yet stamped still counts as partial.
        if self.user_completion.is_empty() {
            CompletionState::NotStarted
        } else {
            CompletionState::PartiallyDone
        }
    }

    /// True once every given member has a completion entry.
    pub fn all_completed<'a>(&self, members: impl IntoIterator<Item = &'a AccountId>) -> bool {
        members.into_iter().all(|m| self.has_completed(m))
    }

    /// Accounts present in `self` but not in `before`.
    pub fn new_completers(&self, before: Option<&Self>) -> Vec<AccountId> {
        self.user_completion
            .keys()
            .filter(|account| before.map_or(true, |b| !b.has_completed(account)))
            .cloned()
            .collect()
    }
}
