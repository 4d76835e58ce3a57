//! Domain model and pure scheduling rules for paired progression.
//!
//! Nothing in this crate touches storage or the network: the merge, key
//! derivation, selection and rollover arithmetic are plain functions over
//! the types defined here, so the engine can run them against whatever
//! snapshot the store hands back.

pub mod assignment;
pub mod catalog;
pub mod clock;
pub mod errors;
pub mod ids;
pub mod merge;
pub mod notify;
pub mod partnership;
pub mod progress;
pub mod schedule;
pub mod selector;

pub use errors::ProgressionError;
