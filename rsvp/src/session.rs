//! Async facade over the session store.
//!
//! Each operation sends one command and waits for the `Settled` action
//! carrying its correlation id, so UI code can call the engine as plain
//! request/response methods.

use crate::actions::{PaymentStep, RsvpOutcome, SessionAction, SessionOutcome};
use crate::config::EngineConfig;
use crate::environment::SessionEnvironment;
use crate::error::EngineError;
use crate::reconciliation::{OrphanedPayment, ReconciliationStatus};
use crate::reducer::EventSessionReducer;
use crate::state::{PaymentSettings, SessionState};
use crate::types::{
    CorrelationId, Event, EventId, Money, PaymentRecord, PricingMode, RsvpStatus, UserId,
};
use screening_runtime::Store;
use std::time::Duration;

type SessionStore = Store<SessionState, SessionAction, SessionEnvironment, EventSessionReducer>;

/// One screen-level session for one event.
///
/// Cloning is cheap; clones share the same state.
#[derive(Clone)]
pub struct EventSession {
    store: SessionStore,
    outcome_timeout: Duration,
    payment_timeout: Duration,
}

impl EventSession {
    /// Open a session for `viewer`.
    ///
    /// Reads the persisted test-mode advisory flag once; later changes go
    /// through [`acknowledge_test_mode_notice`](Self::acknowledge_test_mode_notice).
    pub async fn open(viewer: UserId, env: SessionEnvironment, config: &EngineConfig) -> Self {
        let notice_seen = env.preferences.test_mode_notice_seen(viewer).await;
        let settings = PaymentSettings::new(&config.payments, notice_seen);
        let store = Store::with_broadcast_capacity(
            SessionState::new(viewer, settings),
            EventSessionReducer::new(),
            env,
            config.broadcast_capacity,
        );
        tracing::debug!(%viewer, notice_seen, "Event session opened");

        Self {
            store,
            outcome_timeout: config.outcome_timeout,
            payment_timeout: config.payment_outcome_timeout(),
        }
    }

    // ========== Event snapshot ==========

    /// Fetch the event, the viewer's RSVP and payment history.
    ///
    /// # Errors
    ///
    /// [`EngineError::NotFound`] or [`EngineError::Network`]; the previous
    /// snapshot, if any, is kept.
    pub async fn load(&self, event_id: EventId) -> Result<Event, EngineError> {
        self.dispatch(|correlation_id| SessionAction::Load {
            correlation_id,
            event_id,
        })
        .await
        .and_then(expect_event)
    }

    /// Re-fetch and replace the event snapshot.
    ///
    /// # Errors
    ///
    /// [`EngineError::EventNotLoaded`] before `load`, or the fetch error.
    pub async fn refresh(&self) -> Result<Event, EngineError> {
        self.dispatch(|correlation_id| SessionAction::Refresh { correlation_id })
            .await
            .and_then(expect_event)
    }

    // ========== RSVP ==========

    /// Request an RSVP change.
    ///
    /// Resolves once the server confirmed the change, or with the payment
    /// step a paid `going` is waiting on.
    ///
    /// # Errors
    ///
    /// `EventClosed`, `OperationInProgress`, `CapacityFull` and the other
    /// [`EngineError`] variants; on a failed mutation the status is rolled back.
    pub async fn request_status(&self, status: RsvpStatus) -> Result<RsvpOutcome, EngineError> {
        self.dispatch_payment(|correlation_id| SessionAction::RequestStatus {
            correlation_id,
            status,
        })
        .await
        .and_then(expect_rsvp)
    }

    // ========== Payment ==========

    /// Submit a pay-what-you-can amount.
    ///
    /// # Errors
    ///
    /// [`EngineError::AmountBelowMinimum`] without calling the provider, or
    /// [`EngineError::PaymentCreation`].
    pub async fn submit_amount(&self, amount: Money) -> Result<RsvpOutcome, EngineError> {
        self.dispatch_payment(|correlation_id| SessionAction::SubmitAmount {
            correlation_id,
            amount,
        })
        .await
        .and_then(expect_rsvp)
    }

    /// Dismiss the test-mode advisory and continue with the payment.
    ///
    /// # Errors
    ///
    /// [`EngineError::NoPaymentPending`] when no advisory is shown.
    pub async fn acknowledge_test_mode_notice(&self) -> Result<RsvpOutcome, EngineError> {
        self.dispatch_payment(|correlation_id| {
            SessionAction::AcknowledgeTestModeNotice { correlation_id }
        })
            .await
            .and_then(expect_rsvp)
    }

    /// Confirm the pending intent and, on success, RSVP `going`.
    ///
    /// # Errors
    ///
    /// [`EngineError::PaymentConfirmation`] leaves the RSVP untouched. An
    /// RSVP failure after a successful charge rolls back and queues the
    /// charge as orphaned.
    pub async fn confirm_payment(&self) -> Result<RsvpOutcome, EngineError> {
        self.dispatch_payment(|correlation_id| SessionAction::ConfirmPayment { correlation_id })
            .await
            .and_then(expect_rsvp)
    }

    /// Abandon the payment flow.
    ///
    /// # Errors
    ///
    /// [`EngineError::OperationInProgress`] while the provider is working.
    pub async fn cancel_payment(&self) -> Result<RsvpOutcome, EngineError> {
        self.dispatch(|correlation_id| SessionAction::CancelPayment { correlation_id })
            .await
            .and_then(expect_rsvp)
    }

    // ========== Reconciliation ==========

    /// Ask the server to reconcile the latest charge for this event.
    ///
    /// Safe to repeat; the server upserts by provider intent id.
    ///
    /// # Errors
    ///
    /// [`EngineError::SyncFailure`], or [`EngineError::NoPaymentPending`]
    /// when there is no charge to sync.
    pub async fn schedule_sync(&self) -> Result<PaymentRecord, EngineError> {
        let outcome = self
            .dispatch(|correlation_id| SessionAction::ScheduleSync {
                correlation_id: Some(correlation_id),
                intent_id: None,
            })
            .await?;
        match outcome {
            SessionOutcome::Synced(record) => Ok(record),
            other => Err(unexpected(&other)),
        }
    }

    // ========== Reads ==========

    /// Locally observed status, optimistic while a mutation is in flight
    pub async fn status(&self) -> RsvpStatus {
        self.store.state(|s| s.rsvp.status).await
    }

    /// Cached event snapshot
    pub async fn event(&self) -> Option<Event> {
        self.store.state(|s| s.snapshot.clone()).await
    }

    /// Pricing of the cached event
    pub async fn pricing(&self) -> Option<PricingMode> {
        self.store.state(SessionState::pricing).await
    }

    /// What the payment flow is waiting for
    pub async fn payment_step(&self) -> Option<PaymentStep> {
        self.store.state(|s| s.payment.phase.step()).await
    }

    /// Whether RSVP or payment I/O is in flight; controls should be disabled
    pub async fn is_busy(&self) -> bool {
        self.store.state(SessionState::is_busy).await
    }

    /// Reconciliation view of the cached event
    pub async fn reconciliation(&self) -> ReconciliationStatus {
        self.store.state(SessionState::reconciliation_status).await
    }

    /// Payment records known to this session
    pub async fn payment_records(&self) -> Vec<PaymentRecord> {
        self.store.state(|s| s.reconciliation.records.clone()).await
    }

    /// Charges whose RSVP could not be granted
    pub async fn orphaned_payments(&self) -> Vec<OrphanedPayment> {
        self.store.state(|s| s.reconciliation.orphaned.clone()).await
    }

    /// Snapshot of the whole session state
    pub async fn snapshot(&self) -> SessionState {
        self.store.state(SessionState::clone).await
    }

    // ========== Lifecycle ==========

    /// Wait for background work (syncs, refunds, side effects) to finish.
    ///
    /// # Errors
    ///
    /// [`EngineError::Store`] if work is still running after `timeout`.
    pub async fn settle(&self, timeout: Duration) -> Result<(), EngineError> {
        self.store.wait_for_idle(timeout).await.map_err(EngineError::from)
    }

    /// Tear the session down.
    ///
    /// Calls already sent still reach the server, but their results are
    /// discarded instead of applied.
    pub fn close(&self) {
        self.store.initiate_shutdown();
    }

    /// True after [`close`](Self::close)
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.store.is_shut_down()
    }

    async fn dispatch<F>(&self, command: F) -> Result<SessionOutcome, EngineError>
    where
        F: FnOnce(CorrelationId) -> SessionAction,
    {
        self.dispatch_within(self.outcome_timeout, command).await
    }

    /// Dispatch a command whose outcome may wait on provider confirmation.
    async fn dispatch_payment<F>(&self, command: F) -> Result<SessionOutcome, EngineError>
    where
        F: FnOnce(CorrelationId) -> SessionAction,
    {
        self.dispatch_within(self.payment_timeout, command).await
    }

    async fn dispatch_within<F>(
        &self,
        timeout: Duration,
        command: F,
    ) -> Result<SessionOutcome, EngineError>
    where
        F: FnOnce(CorrelationId) -> SessionAction,
    {
        let correlation_id = CorrelationId::new();
        let settled = self
            .store
            .send_and_wait_for(
                command(correlation_id),
                |action| action.settles(correlation_id),
                timeout,
            )
            .await?;

        match settled {
            SessionAction::Settled { outcome, .. } => outcome,
            other => Err(EngineError::Store(format!("unexpected action {other:?}"))),
        }
    }
}

impl std::fmt::Debug for EventSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSession")
            .field("outcome_timeout", &self.outcome_timeout)
            .field("payment_timeout", &self.payment_timeout)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

fn expect_event(outcome: SessionOutcome) -> Result<Event, EngineError> {
    match outcome {
        SessionOutcome::Event(event) => Ok(event),
        other => Err(unexpected(&other)),
    }
}

fn expect_rsvp(outcome: SessionOutcome) -> Result<RsvpOutcome, EngineError> {
    match outcome {
        SessionOutcome::Rsvp(outcome) => Ok(outcome),
        other => Err(unexpected(&other)),
    }
}

fn unexpected(outcome: &SessionOutcome) -> EngineError {
    EngineError::Store(format!("unexpected outcome {outcome:?}"))
}
