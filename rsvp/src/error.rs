//! Error types for the RSVP engine and its collaborators.

use crate::types::{EventId, Money, RsvpStatus};
use crate::validation::ValidationError;
use thiserror::Error;

/// User-visible failures of engine operations.
///
/// Every variant leaves the session in a previously valid state: RSVP
/// failures roll back, payment failures discard the intent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The event has started; all RSVP changes are refused
    #[error("Event has already started")]
    EventClosed,

    /// A conflicting operation is in flight
    #[error("Another RSVP or payment operation is already in progress")]
    OperationInProgress,

    /// The server refused `going` because the event is full
    #[error("Event is at full capacity")]
    CapacityFull,

    /// The provider could not create a payment intent
    #[error("Payment could not be created: {0}")]
    PaymentCreation(String),

    /// Client-side confirmation ended in a non-success state
    #[error("Payment was not completed: {0}")]
    PaymentConfirmation(String),

    /// Best-effort reconciliation call failed
    #[error("Payment sync failed: {0}")]
    SyncFailure(String),

    /// No snapshot has been loaded yet
    #[error("Event has not been loaded")]
    EventNotLoaded,

    /// The event does not exist
    #[error("Event not found: {event_id}")]
    NotFound {
        /// Requested event
        event_id: EventId,
    },

    /// Transport failure talking to the event API
    #[error("Network error: {0}")]
    Network(String),

    /// Any other server-side rejection
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// The requested status is not a valid target
    #[error("Cannot change RSVP from {from} to {to}")]
    InvalidTransition {
        /// Current status
        from: RsvpStatus,
        /// Requested status
        to: RsvpStatus,
    },

    /// Pay-what-you-can amount under the event minimum
    #[error("Amount {amount} is below the minimum of {minimum}")]
    AmountBelowMinimum {
        /// Submitted amount
        amount: Money,
        /// Event minimum
        minimum: Money,
    },

    /// Request shape rejected at the boundary
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A payment step was called outside the matching phase
    #[error("No payment is waiting for this step")]
    NoPaymentPending,

    /// The session is closed or gave up waiting
    #[error("Session unavailable: {0}")]
    Store(String),
}

impl EngineError {
    /// Whether trying again may succeed.
    ///
    /// Capacity and closed-event failures are races against other users or
    /// the clock, not transient faults.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Network(_)
                | Self::PaymentCreation(_)
                | Self::PaymentConfirmation(_)
                | Self::SyncFailure(_)
        )
    }
}

impl From<screening_runtime::StoreError> for EngineError {
    fn from(error: screening_runtime::StoreError) -> Self {
        Self::Store(error.to_string())
    }
}

/// Errors returned by the event and payment-server APIs
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Unknown event
    #[error("Event not found: {0}")]
    NotFound(EventId),

    /// Server-side start-time check
    #[error("Event has already started")]
    EventClosed,

    /// No seats left
    #[error("Event is at full capacity")]
    CapacityFull,

    /// Transport failure
    #[error("Network error: {0}")]
    Network(String),

    /// Anything else the server refused
    #[error("Rejected: {0}")]
    Rejected(String),
}

impl From<ApiError> for EngineError {
    fn from(error: ApiError) -> Self {
        match error {
            ApiError::NotFound(event_id) => Self::NotFound { event_id },
            ApiError::EventClosed => Self::EventClosed,
            ApiError::CapacityFull => Self::CapacityFull,
            ApiError::Network(message) => Self::Network(message),
            ApiError::Rejected(message) => Self::Rejected(message),
        }
    }
}

/// Errors returned by the payment provider SDK
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Card declined
    #[error("Card declined: {0}")]
    Declined(String),

    /// Transport failure
    #[error("Provider unreachable: {0}")]
    Network(String),

    /// Request refused by the provider
    #[error("Provider rejected request: {0}")]
    Rejected(String),
}
