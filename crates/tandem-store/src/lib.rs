//! SQLite persistence for partnerships, daily assignments and the change
//! feed that drives the trigger-style handlers.

pub mod accounts;
pub mod assignments;
pub mod catalog;
pub mod changes;
pub mod database;
pub mod error;
pub mod pairing;
pub mod progress;
pub mod reminders;
pub mod row_helpers;
pub mod schema;

pub use database::Database;
pub use error::StoreError;

/// Every repository over one shared connection.
#[derive(Clone)]
pub struct Store {
    db: Database,
}

impl Store {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn accounts(&self) -> accounts::AccountRepo {
        accounts::AccountRepo::new(self.db.clone())
    }

    pub fn assignments(&self) -> assignments::AssignmentRepo {
        assignments::AssignmentRepo::new(self.db.clone())
    }

    pub fn catalog(&self) -> catalog::CatalogRepo {
        catalog::CatalogRepo::new(self.db.clone())
    }

    pub fn changes(&self) -> changes::ChangeFeedRepo {
        changes::ChangeFeedRepo::new(self.db.clone())
    }

    pub fn pairing(&self) -> pairing::PairingRepo {
        pairing::PairingRepo::new(self.db.clone())
    }

    pub fn progress(&self) -> progress::ProgressRepo {
        progress::ProgressRepo::new(self.db.clone())
    }

    pub fn reminders(&self) -> reminders::ReminderRepo {
        reminders::ReminderRepo::new(self.db.clone())
    }
}
