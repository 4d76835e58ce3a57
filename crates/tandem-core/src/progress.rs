use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AccountId, PartnershipId, SubtopicId, TopicId};
use crate::partnership::PartnerPair;

pub const FIRST_ROUND: u32 = 1;

/// A partnership's walk through the shared curriculum.
///
/// `combined_topic_order` is fixed at creation; `completed_subtopics` only
/// grows.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartnershipProgress {
    pub partnership_id: PartnershipId,
    pub partners: PartnerPair,
    pub combined_topic_order: Vec<TopicId>,
    pub current_round: u32,
    pub completed_subtopics: BTreeSet<SubtopicId>,
    pub is_complete: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PartnershipProgress {
    /// Fresh progress at round 1 with nothing completed.
    pub fn start(
        partners: PartnerPair,
        combined_topic_order: Vec<TopicId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            partnership_id: partners.key(),
            partners,
            combined_topic_order,
            current_round: FIRST_ROUND,
            completed_subtopics: BTreeSet::new(),
            is_complete: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_completed(&self, subtopic: SubtopicId) -> bool {
        self.completed_subtopics.contains(&subtopic)
    }

    pub fn is_member(&self, account: &AccountId) -> bool {
        self.partners.contains(account)
    }
}
