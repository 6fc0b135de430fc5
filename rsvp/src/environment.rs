//! Collaborators the engine drives, injected behind traits.
//!
//! Production wires these to the HTTP APIs and the provider SDK; tests and
//! the demo use the in-memory versions in [`crate::fakes`].

use crate::error::{ApiError, ProviderError};
use crate::types::{
    Event, EventId, Money, PaymentIntent, PaymentRecord, RsvpReceipt, RsvpStatus,
    TerminalPaymentStatus, UserId,
};
use crate::validation::{CreateIntentRequest, RefundRequest, SyncIntentRequest};
use async_trait::async_trait;
use screening_core::environment::Clock;
use serde::Serialize;
use std::sync::Arc;

/// Event API: snapshot reads and RSVP writes.
#[async_trait]
pub trait EventApi: Send + Sync {
    /// `GET event(id)`
    async fn fetch_event(&self, event_id: EventId) -> Result<Event, ApiError>;

    /// The viewer's current status, `none` if they never responded
    async fn fetch_rsvp(&self, event_id: EventId, user: UserId) -> Result<RsvpStatus, ApiError>;

    /// `POST rsvp(eventId, status)`
    async fn set_rsvp(
        &self,
        event_id: EventId,
        user: UserId,
        status: RsvpStatus,
    ) -> Result<RsvpReceipt, ApiError>;
}

/// Client-side payment provider SDK.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Obtain a client-confirmable handle for one charge.
    ///
    /// The returned intent is `pending` or `requires_action`.
    async fn create_payment_intent(
        &self,
        request: CreateIntentRequest,
    ) -> Result<PaymentIntent, ProviderError>;

    /// Drive client-side confirmation to a terminal status.
    ///
    /// May wait on the user (authentication challenges); the engine bounds
    /// this call with a timeout.
    async fn confirm_payment(
        &self,
        intent: &PaymentIntent,
    ) -> Result<TerminalPaymentStatus, ProviderError>;
}

/// Server-side payment endpoints.
#[async_trait]
pub trait PaymentServer: Send + Sync {
    /// Ask the server to check the provider and upsert the matching record.
    async fn sync_payment_intent(
        &self,
        request: SyncIntentRequest,
    ) -> Result<PaymentRecord, ApiError>;

    /// Every payment record of `user`
    async fn payment_history(&self, user: UserId) -> Result<Vec<PaymentRecord>, ApiError>;

    /// Refund a charged intent
    async fn request_refund(&self, request: RefundRequest) -> Result<PaymentRecord, ApiError>;
}

/// Persisted per-user preferences.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// Whether the test-mode payment advisory was already dismissed
    async fn test_mode_notice_seen(&self, user: UserId) -> bool;

    /// Remember that the advisory was dismissed
    async fn mark_test_mode_notice_seen(&self, user: UserId) -> Result<(), ApiError>;
}

/// One-shot UI side effects fired after a terminal success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SideEffect {
    /// "You're going!" style confirmation
    SuccessToast {
        /// Event title
        title: String,
        /// Status now held
        status: RsvpStatus,
    },
    /// Celebration animation
    Confetti,
    /// Offer to add the event to the device calendar
    CalendarPrompt {
        /// Event to add
        event: Event,
    },
    /// A payment completed on the client
    PaymentSucceeded {
        /// Event paid for
        event_id: EventId,
        /// Amount charged
        amount: Money,
    },
    /// A charge succeeded but the seat could not be granted
    PaymentOrphaned {
        /// Event paid for
        event_id: EventId,
        /// Provider intent id
        intent_id: String,
        /// Amount charged
        amount: Money,
        /// Why the RSVP failed
        reason: String,
    },
}

/// Receives [`SideEffect`]s. Failures are logged and never undo anything.
#[async_trait]
pub trait SideEffectSink: Send + Sync {
    /// Deliver one side effect
    async fn deliver(&self, effect: SideEffect) -> Result<(), String>;
}

/// Everything the session reducer needs from the outside world.
#[derive(Clone)]
pub struct SessionEnvironment {
    /// Event API
    pub events: Arc<dyn EventApi>,
    /// Payment provider SDK
    pub provider: Arc<dyn PaymentProvider>,
    /// Payment sync, history and refund endpoints
    pub payments: Arc<dyn PaymentServer>,
    /// Persisted preferences
    pub preferences: Arc<dyn PreferenceStore>,
    /// Toasts, confetti, calendar
    pub sink: Arc<dyn SideEffectSink>,
    /// Time source for the start-time check
    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SessionEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEnvironment")
            .field("now", &self.clock.now())
            .finish_non_exhaustive()
    }
}
