//! Actions understood by the event session reducer.
//!
//! Commands carry the [`CorrelationId`] of the caller waiting on them. Every
//! command eventually produces exactly one [`SessionAction::Settled`] with the
//! same id, which is how [`EventSession`](crate::session::EventSession) turns
//! the action stream back into request/response calls.

use crate::error::EngineError;
use crate::types::{
    CorrelationId, Event, EventId, IntentStatus, Money, PaymentIntent, PaymentRecord,
    ProviderIntentId, RsvpReceipt, RsvpStatus,
};
use screening_core::effect::Effect;

/// Commands and I/O results for one event session.
#[derive(Debug, Clone)]
pub enum SessionAction {
    // ========== Commands ==========
    /// Fetch the event, the viewer's RSVP and payment history
    Load {
        /// Caller
        correlation_id: CorrelationId,
        /// Event to open
        event_id: EventId,
    },

    /// Re-fetch the event snapshot
    Refresh {
        /// Caller
        correlation_id: CorrelationId,
    },

    /// User-initiated RSVP change
    RequestStatus {
        /// Caller
        correlation_id: CorrelationId,
        /// Requested status
        status: RsvpStatus,
    },

    /// Pay-what-you-can amount chosen by the user
    SubmitAmount {
        /// Caller
        correlation_id: CorrelationId,
        /// Chosen amount
        amount: Money,
    },

    /// Test-mode advisory dismissed
    AcknowledgeTestModeNotice {
        /// Caller
        correlation_id: CorrelationId,
    },

    /// Confirm the intent awaiting confirmation
    ConfirmPayment {
        /// Caller
        correlation_id: CorrelationId,
    },

    /// Abandon the payment flow
    CancelPayment {
        /// Caller
        correlation_id: CorrelationId,
    },

    /// Ask the server to reconcile a payment intent.
    ///
    /// Internal syncs after a confirmed payment carry no correlation id and
    /// their failures are swallowed.
    ScheduleSync {
        /// Caller, if anyone waits
        correlation_id: Option<CorrelationId>,
        /// Intent to sync; the latest paid intent for the event when absent
        intent_id: Option<ProviderIntentId>,
    },

    // ========== Snapshot results ==========
    /// Cold-start fetch completed
    Loaded {
        /// Caller
        correlation_id: CorrelationId,
        /// Snapshot read number
        sequence: u64,
        /// Event snapshot
        event: Event,
        /// Viewer's server-side status
        status: RsvpStatus,
        /// Viewer's payment records
        history: Vec<PaymentRecord>,
    },

    /// Cold-start fetch failed
    LoadFailed {
        /// Caller
        correlation_id: CorrelationId,
        /// Event that could not be loaded
        event_id: EventId,
        /// Why
        error: EngineError,
    },

    /// Event re-fetched
    SnapshotRefreshed {
        /// Why it was fetched
        cause: RefreshCause,
        /// Snapshot read number
        sequence: u64,
        /// Fresh snapshot
        event: Event,
    },

    /// Event re-fetch failed
    RefreshFailed {
        /// Why it was fetched
        cause: RefreshCause,
        /// Why it failed
        error: EngineError,
    },

    // ========== RSVP results ==========
    /// Server accepted the RSVP mutation
    MutationSucceeded {
        /// Caller
        correlation_id: CorrelationId,
        /// Server acknowledgement
        receipt: RsvpReceipt,
    },

    /// Server refused the RSVP mutation or it never arrived
    MutationFailed {
        /// Caller
        correlation_id: CorrelationId,
        /// Why
        error: EngineError,
    },

    // ========== Payment results ==========
    /// Provider returned a confirmable intent
    IntentCreated {
        /// Caller
        correlation_id: CorrelationId,
        /// New intent
        intent: PaymentIntent,
    },

    /// Provider could not create an intent
    IntentCreationFailed {
        /// Caller
        correlation_id: CorrelationId,
        /// Why
        error: EngineError,
    },

    /// Client-side confirmation reached `succeeded`
    PaymentConfirmed {
        /// Caller
        correlation_id: CorrelationId,
        /// The charged intent
        intent: PaymentIntent,
    },

    /// Confirmation ended failed, canceled or timed out
    PaymentConfirmationFailed {
        /// Caller
        correlation_id: CorrelationId,
        /// Intent that did not go through
        intent_id: ProviderIntentId,
        /// Terminal status recorded for it
        status: IntentStatus,
        /// Why
        error: EngineError,
    },

    // ========== Reconciliation results ==========
    /// Server returned the reconciled record
    SyncCompleted {
        /// Caller, if anyone waits
        correlation_id: Option<CorrelationId>,
        /// Intent synced
        intent_id: ProviderIntentId,
        /// Server record
        record: PaymentRecord,
    },

    /// Sync call failed
    SyncFailed {
        /// Caller, if anyone waits
        correlation_id: Option<CorrelationId>,
        /// Intent synced
        intent_id: ProviderIntentId,
        /// Why
        error: EngineError,
    },

    /// Refund of an orphaned payment accepted
    RefundIssued {
        /// Refunded intent
        intent_id: ProviderIntentId,
        /// Server record after the refund
        record: PaymentRecord,
    },

    /// Refund of an orphaned payment failed
    RefundFailed {
        /// Intent
        intent_id: ProviderIntentId,
        /// Why
        error: EngineError,
    },

    // ========== Outcome ==========
    /// Final result of the command with `correlation_id`
    Settled {
        /// Caller
        correlation_id: CorrelationId,
        /// Result handed back to the caller
        outcome: Result<SessionOutcome, EngineError>,
    },
}

impl SessionAction {
    /// True if this is the outcome of `correlation_id`.
    #[must_use]
    pub fn settles(&self, correlation_id: CorrelationId) -> bool {
        matches!(self, Self::Settled { correlation_id: id, .. } if *id == correlation_id)
    }
}

/// Why a snapshot was re-fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshCause {
    /// Explicit `refresh()`
    Requested(CorrelationId),
    /// Refresh-after-write following a committed RSVP
    AfterWrite {
        /// The RSVP command
        correlation_id: CorrelationId,
        /// Committed status
        status: RsvpStatus,
    },
}

/// Successful result of a session command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// `load` or `refresh`
    Event(Event),
    /// RSVP and payment steps
    Rsvp(RsvpOutcome),
    /// Manual sync
    Synced(PaymentRecord),
}

/// Where an RSVP request ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RsvpOutcome {
    /// The server recorded this status
    Confirmed(RsvpStatus),
    /// Nothing changed; the viewer already held this status or backed out of payment
    Unchanged(RsvpStatus),
    /// `going` is waiting on the payment flow
    PaymentRequired(PaymentStep),
}

/// The next thing the payment flow needs from the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentStep {
    /// Choose a pay-what-you-can amount
    EnterAmount {
        /// Lowest accepted amount
        minimum: Money,
        /// Default amount
        suggested: Money,
    },
    /// Dismiss the one-time test-mode advisory
    AcknowledgeTestMode {
        /// Amount about to be charged
        amount: Money,
    },
    /// Confirm this intent with the provider
    Confirm(PaymentIntent),
}

/// Effect that settles `correlation_id` with `outcome`.
pub(crate) fn settle(
    correlation_id: CorrelationId,
    outcome: Result<SessionOutcome, EngineError>,
) -> Effect<SessionAction> {
    Effect::future(async move {
        Some(SessionAction::Settled {
            correlation_id,
            outcome,
        })
    })
}

/// Settle with an RSVP outcome.
pub(crate) fn settle_rsvp(
    correlation_id: CorrelationId,
    outcome: Result<RsvpOutcome, EngineError>,
) -> Effect<SessionAction> {
    settle(correlation_id, outcome.map(SessionOutcome::Rsvp))
}
