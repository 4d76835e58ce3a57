use tandem_core::catalog::{Catalog, Subtopic, Topic};
use tandem_core::ids::{SubtopicId, TopicId};
use tracing::{info, instrument};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Static topic/subtopic reference data.
pub struct CatalogRepo {
    db: Database,
}

impl CatalogRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Snapshot the whole catalog for the merge and the selector.
    #[instrument(skip(self))]
    pub fn load(&self) -> Result<Catalog, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, name, display_order, is_rankable FROM topics")?;
            let mut rows = stmt.query([])?;
            let mut topics = Vec::new();
            while let Some(row) = rows.next()? {
                topics.push(Topic {
                    id: TopicId(row_helpers::get(row, 0, "topics", "id")?),
                    name: row_helpers::get(row, 1, "topics", "name")?,
                    display_order: row_helpers::get(row, 2, "topics", "display_order")?,
                    is_rankable: row_helpers::get(row, 3, "topics", "is_rankable")?,
                });
            }

            let mut stmt = conn.prepare("SELECT id, topic_id, name, round_order FROM subtopics")?;
            let mut rows = stmt.query([])?;
            let mut subtopics = Vec::new();
            while let Some(row) = rows.next()? {
                subtopics.push(Subtopic {
                    id: SubtopicId(row_helpers::get(row, 0, "subtopics", "id")?),
                    topic_id: TopicId(row_helpers::get(row, 1, "subtopics", "topic_id")?),
                    name: row_helpers::get(row, 2, "subtopics", "name")?,
                    order: row_helpers::get(row, 3, "subtopics", "round_order")?,
                });
            }

            Ok(Catalog::new(topics, subtopics))
        })
    }

    /// Insert or replace topics and subtopics in one transaction.
    #[instrument(skip_all, fields(topics = topics.len(), subtopics = subtopics.len()))]
    pub fn import(&self, topics: &[Topic], subtopics: &[Subtopic]) -> Result<(), StoreError> {
        self.db.with_tx(|conn| {
            for topic in topics {
                conn.execute(
                    "INSERT INTO topics (id, name, display_order, is_rankable)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(id) DO UPDATE SET
                        name = excluded.name,
                        display_order = excluded.display_order,
                        is_rankable = excluded.is_rankable",
                    rusqlite::params![
                        topic.id.0,
                        topic.name,
                        topic.display_order,
                        topic.is_rankable
                    ],
                )?;
            }
            for subtopic in subtopics {
                conn.execute(
                    "INSERT INTO subtopics (id, topic_id, name, round_order) VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(id) DO UPDATE SET
                        topic_id = excluded.topic_id,
                        name = excluded.name,
                        round_order = excluded.round_order",
                    rusqlite::params![
                        subtopic.id.0,
                        subtopic.topic_id.0,
                        subtopic.name,
                        subtopic.order
                    ],
                )?;
            }
            Ok(())
        })?;
        info!("catalog imported");
        Ok(())
    }
}
