//! Merge two personal topic rankings into one shared order.

use std::collections::HashMap;

use crate::catalog::Catalog;
use crate::ids::TopicId;

/// Combine two accounts' rankings into the partnership's topic order.
///
/// Each rankable topic scores `(N - rank_a) + (N - rank_b)`, where `N` is the
/// number of rankable topics, a rank is the topic's 0-based position in that
/// account's list and an unranked side contributes 0. Topics are sorted by
/// score, highest first, ties keeping catalog order. Non-rankable topics
/// follow in display order.
///
/// Ids that are unknown or not rankable are ignored; a repeated id counts
/// at its first position.
pub fn merge_topic_priorities(
    catalog: &Catalog,
    ranking_a: &[TopicId],
    ranking_b: &[TopicId],
) -> Vec<TopicId> {
    let rankable: Vec<TopicId> = catalog.rankable_topics().map(|t| t.id).collect();
    let n = rankable.len() as i64;

    let ranks_a = rank_positions(ranking_a, &rankable);
    let ranks_b = rank_positions(ranking_b, &rankable);
    let side_score = |ranks: &HashMap<TopicId, i64>, topic: &TopicId| {
        ranks.get(topic).map_or(0, |rank| (n - rank).max(0))
    };

    let mut scored: Vec<(i64, TopicId)> = rankable
        .iter()
        .map(|topic| (side_score(&ranks_a, topic) + side_score(&ranks_b, topic), *topic))
        .collect();
    // sort_by is stable, so equal scores keep catalog order
    scored.sort_by(|a, b| b.0.cmp(&a.0));

    scored
        .into_iter()
        .map(|(_, topic)| topic)
        .chain(catalog.non_rankable_topics().map(|t| t.id))
        .collect()
}

/// 0-based rank of each rankable topic in a personal ranking.
fn rank_positions(ranking: &[TopicId], rankable: &[TopicId]) -> HashMap<TopicId, i64> {
    let mut ranks = HashMap::with_capacity(ranking.len());
    for topic in ranking.iter().filter(|t| rankable.contains(t)) {
        let next = ranks.len() as i64;
        ranks.entry(*topic).or_insert(next);
    }
    ranks
}
