//! The event session reducer.
//!
//! Routes each action to the component that owns it: the snapshot store,
//! the RSVP coordinator, the payment orchestrator or reconciliation.

use crate::actions::SessionAction;
use crate::environment::SessionEnvironment;
use crate::state::SessionState;
use crate::{coordinator, payment, reconciliation, snapshot};
use screening_core::effect::Effect;
use screening_core::reducer::Reducer;
use screening_core::SmallVec;

/// Effects returned by the session reducer and its components.
pub type Effects = SmallVec<[Effect<SessionAction>; 4]>;

/// Reducer for one screen-level event session.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventSessionReducer;

impl EventSessionReducer {
    /// Create a new reducer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Reducer for EventSessionReducer {
    type State = SessionState;
    type Action = SessionAction;
    type Environment = SessionEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            // ========== Event snapshot ==========
            SessionAction::Load {
                correlation_id,
                event_id,
            } => snapshot::load(state, correlation_id, event_id, env),
            SessionAction::Loaded {
                correlation_id,
                sequence,
                event,
                status,
                history,
            } => snapshot::on_loaded(state, correlation_id, sequence, event, status, history),
            SessionAction::LoadFailed {
                correlation_id,
                event_id,
                error,
            } => snapshot::on_load_failed(state, correlation_id, event_id, error),
            SessionAction::Refresh { correlation_id } => {
                snapshot::refresh(state, correlation_id, env)
            },
            SessionAction::SnapshotRefreshed {
                cause,
                sequence,
                event,
            } => snapshot::on_refreshed(state, cause, sequence, event),
            SessionAction::RefreshFailed { cause, error } => {
                snapshot::on_refresh_failed(state, cause, error)
            },

            // ========== RSVP coordinator ==========
            SessionAction::RequestStatus {
                correlation_id,
                status,
            } => coordinator::request_status(state, correlation_id, status, env),
            SessionAction::MutationSucceeded {
                correlation_id,
                receipt,
            } => coordinator::on_mutation_succeeded(state, correlation_id, receipt, env),
            SessionAction::MutationFailed {
                correlation_id,
                error,
            } => coordinator::on_mutation_failed(state, correlation_id, error, env),

            // ========== Payment orchestrator ==========
            SessionAction::SubmitAmount {
                correlation_id,
                amount,
            } => payment::submit_amount(state, correlation_id, amount, env),
            SessionAction::AcknowledgeTestModeNotice { correlation_id } => {
                payment::acknowledge_test_mode_notice(state, correlation_id, env)
            },
            SessionAction::ConfirmPayment { correlation_id } => {
                payment::confirm_payment(state, correlation_id, env)
            },
            SessionAction::CancelPayment { correlation_id } => {
                payment::cancel_payment(state, correlation_id)
            },
            SessionAction::IntentCreated {
                correlation_id,
                intent,
            } => payment::on_intent_created(state, correlation_id, intent),
            SessionAction::IntentCreationFailed {
                correlation_id,
                error,
            } => payment::on_intent_creation_failed(state, correlation_id, error),
            SessionAction::PaymentConfirmed {
                correlation_id,
                intent,
            } => payment::on_payment_confirmed(state, correlation_id, intent, env),
            SessionAction::PaymentConfirmationFailed {
                correlation_id,
                intent_id,
                status,
                error,
            } => payment::on_payment_confirmation_failed(
                state,
                correlation_id,
                &intent_id,
                status,
                error,
            ),

            // ========== Reconciliation ==========
            SessionAction::ScheduleSync {
                correlation_id,
                intent_id,
            } => reconciliation::schedule_sync(state, correlation_id, intent_id, env),
            SessionAction::SyncCompleted {
                correlation_id,
                intent_id,
                record,
            } => reconciliation::on_sync_completed(state, correlation_id, &intent_id, record),
            SessionAction::SyncFailed {
                correlation_id,
                intent_id,
                error,
            } => reconciliation::on_sync_failed(state, correlation_id, &intent_id, error),
            SessionAction::RefundIssued { intent_id, record } => {
                reconciliation::on_refund_issued(state, &intent_id, record)
            },
            SessionAction::RefundFailed { intent_id, error } => {
                reconciliation::on_refund_failed(state, &intent_id, &error)
            },

            // Observed by callers through the store broadcast
            SessionAction::Settled { .. } => SmallVec::new(),
        }
    }
}
