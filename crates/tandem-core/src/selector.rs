use crate::catalog::{Catalog, Subtopic};
use crate::progress::PartnershipProgress;

/// Pick the next curriculum unit for a partnership.
///
/// Walks `combined_topic_order` and returns the first subtopic whose `order`
/// equals `current_round` and that has not been completed. `None` means the
/// round is exhausted; deciding what happens next belongs to the caller.
pub fn select_next_subtopic<'c>(
    progress: &PartnershipProgress,
    catalog: &'c Catalog,
) -> Option<&'c Subtopic> {
    select_for_round(progress, catalog, progress.current_round)
}

/// Same as [`select_next_subtopic`] but for an explicit round, for use right
/// after the round has been advanced.
pub fn select_for_round<'c>(
    progress: &PartnershipProgress,
    catalog: &'c Catalog,
    round: u32,
) -> Option<&'c Subtopic> {
    progress.combined_topic_order.iter().find_map(|topic| {
        catalog
            .subtopics_of(*topic)
            .iter()
            .find(|s| s.order == round && !progress.has_completed(s.id))
    })
}
