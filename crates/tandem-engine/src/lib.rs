//! Trigger and callable handlers for paired progression.
//!
//! Trigger handlers (`pairing`, `completion`) are driven by the change feed
//! through [`dispatcher::ChangeDispatcher`] and never surface errors to a
//! caller. Callable operations (`reminder`, `pairing::request_pairing`,
//! `pairing::respond_to_pairing`) return typed errors. `rollover` runs on an
//! interval.

pub mod bootstrap;
pub mod completion;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod gateway;
pub mod notifier;
pub mod pairing;
pub mod reminder;
pub mod rollover;

pub use context::EngineContext;
pub use dispatcher::ChangeDispatcher;
pub use error::EngineError;
pub use gateway::{gateway_from_settings, GatewayError, NotificationGateway};
pub use notifier::{Delivery, Notifier};
