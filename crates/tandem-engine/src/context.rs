use std::sync::Arc;

use chrono::Duration;

use tandem_core::clock::{Clock, SystemClock};
use tandem_core::schedule::RolloverSchedule;
use tandem_settings::ScheduleSettings;
use tandem_store::Store;

use crate::gateway::NotificationGateway;
use crate::notifier::Notifier;

/// Shared dependencies of every handler.
#[derive(Clone)]
pub struct EngineContext {
    pub store: Store,
    pub notifier: Notifier,
    pub clock: Arc<dyn Clock>,
    pub schedule: RolloverSchedule,
    pub reminder_cooldown: Duration,
}

impl EngineContext {
    pub fn new(store: Store, gateway: Arc<dyn NotificationGateway>, clock: Arc<dyn Clock>) -> Self {
        Self {
            notifier: Notifier::new(store.clone(), gateway),
            store,
            clock,
            schedule: RolloverSchedule::default(),
            reminder_cooldown: Duration::hours(4),
        }
    }

    /// Production wiring: system clock plus the configured timings.
    pub fn from_settings(
        store: Store,
        gateway: Arc<dyn NotificationGateway>,
        settings: &ScheduleSettings,
    ) -> Self {
        Self::new(store, gateway, Arc::new(SystemClock)).with_schedule(settings)
    }

    pub fn with_schedule(mut self, settings: &ScheduleSettings) -> Self {
        self.schedule = RolloverSchedule::new(settings.rollover_hour_utc);
        let cooldown_secs = i64::try_from(settings.reminder_cooldown_secs).unwrap_or(i64::MAX);
        self.reminder_cooldown = Duration::seconds(cooldown_secs);
        self
    }

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::LogGateway;
    use tandem_store::Database;

    #[test]
    fn schedule_settings_applied() {
        let store = Store::new(Database::in_memory().unwrap());
        let settings = ScheduleSettings {
            rollover_hour_utc: 6,
            reminder_cooldown_secs: 60,
            ..ScheduleSettings::default()
        };
        let ctx = EngineContext::from_settings(store, Arc::new(LogGateway), &settings);
        assert_eq!(ctx.schedule.hour_utc(), 6);
        assert_eq!(ctx.reminder_cooldown, Duration::minutes(1));
    }
}
