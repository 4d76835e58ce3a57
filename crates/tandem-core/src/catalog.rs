use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::ids::{SubtopicId, TopicId};

/// Static reference data: a conversation topic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
    pub id: TopicId,
    pub name: String,
    pub display_order: i64,
    pub is_rankable: bool,
}

/// Smallest curriculum unit. `order` is also the round index within its topic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subtopic {
    pub id: SubtopicId,
    pub topic_id: TopicId,
    pub name: String,
    pub order: u32,
}

/// In-memory snapshot of the topic/subtopic catalog.
///
/// Topics are kept in display order (ties by id) and each topic's subtopics
/// sorted by `order`, so callers can iterate without re-sorting.
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    topics: Vec<Topic>,
    subtopics: BTreeMap<TopicId, Vec<Subtopic>>,
}

impl Catalog {
    pub fn new(mut topics: Vec<Topic>, subtopics: Vec<Subtopic>) -> Self {
        topics.sort_by_key(|t| (t.display_order, t.id));

        let mut by_topic: BTreeMap<TopicId, Vec<Subtopic>> = BTreeMap::new();
        for sub in subtopics {
            by_topic.entry(sub.topic_id).or_default().push(sub);
        }
        for subs in by_topic.values_mut() {
            subs.sort_by_key(|s| (s.order, s.id));
        }

        Self {
            topics,
            subtopics: by_topic,
        }
    }

    /// All topics in static display order.
    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    pub fn rankable_topics(&self) -> impl Iterator<Item = &Topic> {
        self.topics.iter().filter(|t| t.is_rankable)
    }

    pub fn non_rankable_topics(&self) -> impl Iterator<Item = &Topic> {
        self.topics.iter().filter(|t| !t.is_rankable)
    }

    pub fn topic(&self, id: TopicId) -> Option<&Topic> {
        self.topics.iter().find(|t| t.id == id)
    }

    /// Subtopics of a topic, sorted by `order`. Empty for unknown topics.
    pub fn subtopics_of(&self, topic: TopicId) -> &[Subtopic] {
        self.subtopics.get(&topic).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn subtopic(&self, id: SubtopicId) -> Option<&Subtopic> {
        self.subtopics.values().flatten().find(|s| s.id == id)
    }

    /// Number of subtopics not yet in `completed`.
    pub fn remaining_subtopics(&self, completed: &BTreeSet<SubtopicId>) -> usize {
        self.subtopics
            .values()
            .flatten()
            .filter(|s| !completed.contains(&s.id))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn topic(id: i64, display_order: i64, is_rankable: bool) -> Topic {
        Topic {
            id: TopicId(id),
            name: format!("topic {id}"),
            display_order,
            is_rankable,
        }
    }

    pub fn subtopic(id: i64, topic_id: i64, order: u32) -> Subtopic {
        Subtopic {
            id: SubtopicId(id),
            topic_id: TopicId(topic_id),
            name: format!("subtopic {id}"),
            order,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::{subtopic, topic};
    use super::*;

    #[test]
    fn topics_sorted_by_display_order() {
        let catalog = Catalog::new(
            vec![topic(2, 20, true), topic(1, 10, true), topic(3, 5, false)],
            vec![],
        );
        let ids: Vec<_> = catalog.topics().iter().map(|t| t.id.0).collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    #[test]
    fn subtopics_sorted_by_order() {
        let catalog = Catalog::new(
            vec![topic(1, 1, true)],
            vec![subtopic(12, 1, 2), subtopic(11, 1, 1), subtopic(13, 1, 3)],
        );
        let orders: Vec<_> = catalog.subtopics_of(TopicId(1)).iter().map(|s| s.order).collect();
        assert_eq!(orders, vec![1, 2, 3]);
        assert!(catalog.subtopics_of(TopicId(99)).is_empty());
    }

    #[test]
    fn rankable_split() {
        let catalog = Catalog::new(vec![topic(1, 1, true), topic(2, 2, false)], vec![]);
        assert_eq!(catalog.rankable_topics().count(), 1);
        assert_eq!(catalog.non_rankable_topics().next().unwrap().id, TopicId(2));
    }

    #[test]
    fn remaining_excludes_completed() {
        let catalog = Catalog::new(
            vec![topic(1, 1, true)],
            vec![subtopic(11, 1, 1), subtopic(12, 1, 2)],
        );
        let completed: BTreeSet<_> = [SubtopicId(11)].into_iter().collect();
        assert_eq!(catalog.remaining_subtopics(&completed), 1);
        assert_eq!(catalog.subtopic(SubtopicId(12)).unwrap().order, 2);
    }
}
