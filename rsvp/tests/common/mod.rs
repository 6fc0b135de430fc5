//! Fixtures shared by the session integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use chrono::Duration;
use screening_core::environment::Clock;
use screening_rsvp::fakes::InMemoryServices;
use screening_rsvp::{EngineConfig, Event, EventId, EventSession, Money, UserId};
use screening_testing::{test_clock, test_epoch};
use std::sync::Arc;

/// Screening one week after the test epoch, 12 of 40 seats taken.
pub fn screening(price: u64, pay_what_you_can: bool, min_price: Option<u64>) -> Event {
    Event {
        id: EventId::new(),
        title: "Stalker".to_string(),
        date: test_epoch() + Duration::days(7),
        location: "Basement cinema".to_string(),
        max_capacity: 40,
        attendee_count: 12,
        price: Money::from_minor_units(price),
        pay_what_you_can,
        min_price: min_price.map(Money::from_minor_units),
    }
}

pub fn free_event() -> Event {
    screening(0, false, None)
}

pub fn paid_event(price: u64) -> Event {
    screening(price, false, None)
}

/// One viewer with in-memory collaborators.
pub struct Harness {
    pub viewer: UserId,
    pub services: InMemoryServices,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(test_clock()))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let viewer = UserId::new();
        Self {
            viewer,
            services: InMemoryServices::new(viewer, clock),
        }
    }

    /// Publish `event` and open a loaded session on it.
    pub async fn open(&self, event: &Event) -> EventSession {
        self.open_with(event, &EngineConfig::default()).await
    }

    pub async fn open_with(&self, event: &Event, config: &EngineConfig) -> EventSession {
        self.services.backend.add_event(event.clone());
        let session = EventSession::open(self.viewer, self.services.environment(), config).await;
        session.load(event.id).await.unwrap();
        session
    }
}

pub fn settle_timeout() -> std::time::Duration {
    std::time::Duration::from_secs(2)
}
