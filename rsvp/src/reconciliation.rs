//! Reconciliation sync and the orphaned-payment queue.
//!
//! After the client sees a charge succeed, one explicit sync asks the server
//! to check the provider and upsert its record, covering a late or lost
//! webhook. Sync failures are logged and left for the webhook or the next
//! load to resolve.

use crate::actions::{SessionAction, SessionOutcome, settle};
use crate::config::OrphanPolicy;
use crate::coordinator;
use crate::environment::{SessionEnvironment, SideEffect};
use crate::error::EngineError;
use crate::reducer::Effects;
use crate::state::SessionState;
use crate::types::{
    CorrelationId, EventId, Money, PaymentRecord, PricingMode, ProviderIntentId, RsvpStatus,
};
use crate::validation::{RefundReason, RefundRequest, SyncIntentRequest};
use chrono::{DateTime, Utc};
use screening_core::effect::Effect;
use screening_core::{SmallVec, smallvec};
use std::sync::Arc;

/// Whether the local RSVP and the server's payment records agree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconciliationStatus {
    /// Nothing to reconcile: free event, or not `going`
    NotRequired,
    /// A sync is in flight
    Pending,
    /// A succeeded record backs the `going` RSVP
    Reconciled,
    /// `going` on a paid event with no succeeded record
    Unreconciled,
}

/// Refund progress of an orphaned payment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefundState {
    /// Left for an administrator
    NotRequested,
    /// Refund call in flight
    Requested,
    /// Server accepted the refund
    Issued,
    /// Refund call failed
    Failed(String),
}

/// A charge that succeeded while the RSVP it paid for was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanedPayment {
    /// Event paid for
    pub event_id: EventId,
    /// Charged intent
    pub intent_id: ProviderIntentId,
    /// Amount charged
    pub amount: Money,
    /// Why the RSVP failed
    pub reason: EngineError,
    /// When the session noticed
    pub detected_at: DateTime<Utc>,
    /// Compensation progress
    pub refund: RefundState,
}

impl SessionState {
    /// Reconciliation view of the loaded event.
    #[must_use]
    pub fn reconciliation_status(&self) -> ReconciliationStatus {
        let (Some(event_id), Some(pricing)) = (self.event_id, self.pricing()) else {
            return ReconciliationStatus::NotRequired;
        };
        if pricing == PricingMode::Free || self.rsvp.status != RsvpStatus::Going {
            return ReconciliationStatus::NotRequired;
        }
        if self.reconciliation.records.iter().any(|r| r.unlocks(event_id)) {
            ReconciliationStatus::Reconciled
        } else if self.reconciliation.syncing.is_empty() {
            ReconciliationStatus::Unreconciled
        } else {
            ReconciliationStatus::Pending
        }
    }
}

/// Ask the server to reconcile `intent_id`, or the latest charge for the
/// loaded event when none is given.
pub(crate) fn schedule_sync(
    state: &mut SessionState,
    correlation_id: Option<CorrelationId>,
    intent_id: Option<ProviderIntentId>,
    env: &SessionEnvironment,
) -> Effects {
    let intent_id = intent_id.or_else(|| {
        state
            .event_id
            .and_then(|event_id| state.reconciliation.latest_intent_for(event_id))
    });
    let Some(intent_id) = intent_id else {
        return fail_early(correlation_id, EngineError::NoPaymentPending);
    };
    let request = match SyncIntentRequest::new(intent_id.as_str()) {
        Ok(request) => request,
        Err(error) => return fail_early(correlation_id, error.into()),
    };

    state.reconciliation.syncing.push(intent_id.clone());
    tracing::debug!(%intent_id, manual = correlation_id.is_some(), "Scheduling payment sync");

    let payments = Arc::clone(&env.payments);
    smallvec![Effect::future(async move {
        match payments.sync_payment_intent(request).await {
            Ok(record) => Some(SessionAction::SyncCompleted {
                correlation_id,
                intent_id,
                record,
            }),
            Err(error) => Some(SessionAction::SyncFailed {
                correlation_id,
                intent_id,
                error: EngineError::SyncFailure(error.to_string()),
            }),
        }
    })]
}

fn fail_early(correlation_id: Option<CorrelationId>, error: EngineError) -> Effects {
    match correlation_id {
        Some(correlation_id) => smallvec![settle(correlation_id, Err(error))],
        None => {
            tracing::warn!(%error, "Payment sync not scheduled");
            SmallVec::new()
        },
    }
}

pub(crate) fn on_sync_completed(
    state: &mut SessionState,
    correlation_id: Option<CorrelationId>,
    intent_id: &ProviderIntentId,
    record: PaymentRecord,
) -> Effects {
    state.reconciliation.finish_sync(intent_id);
    state.reconciliation.last_sync_error = None;
    metrics::counter!("payment.sync", "outcome" => "completed").increment(1);
    tracing::info!(%intent_id, status = ?record.status, "Payment sync completed");
    state.reconciliation.upsert(record.clone());

    match correlation_id {
        Some(correlation_id) => {
            smallvec![settle(correlation_id, Ok(SessionOutcome::Synced(record)))]
        },
        None => SmallVec::new(),
    }
}

/// Surfaced only to a caller that asked for the sync explicitly.
pub(crate) fn on_sync_failed(
    state: &mut SessionState,
    correlation_id: Option<CorrelationId>,
    intent_id: &ProviderIntentId,
    error: EngineError,
) -> Effects {
    state.reconciliation.finish_sync(intent_id);
    state.reconciliation.last_sync_error = Some(error.clone());
    metrics::counter!("payment.sync", "outcome" => "failed").increment(1);
    tracing::warn!(%intent_id, %error, "Payment sync failed, leaving it to the webhook");

    match correlation_id {
        Some(correlation_id) => smallvec![settle(correlation_id, Err(error))],
        None => SmallVec::new(),
    }
}

/// Queue a charge whose RSVP was refused, tell the sink, and refund it if
/// configured to. The RSVP is never retried automatically.
pub(crate) fn record_orphan(
    state: &mut SessionState,
    intent_id: ProviderIntentId,
    amount: Money,
    reason: &EngineError,
    env: &SessionEnvironment,
) -> Effects {
    let Some(event_id) = state.event_id else {
        return SmallVec::new();
    };
    let refund_policy = state.payment.settings.orphan_policy == OrphanPolicy::Refund;

    metrics::counter!("payment.orphaned").increment(1);
    tracing::error!(
        %event_id,
        %intent_id,
        amount = amount.minor_units(),
        %reason,
        refund = refund_policy,
        "Payment succeeded but RSVP was refused"
    );

    let mut effects: Effects = smallvec![coordinator::deliver(
        env,
        vec![SideEffect::PaymentOrphaned {
            event_id,
            intent_id: intent_id.to_string(),
            amount,
            reason: reason.to_string(),
        }],
    )];

    let refund = if refund_policy {
        match RefundRequest::with_reason(intent_id.as_str(), RefundReason::RequestedByCustomer) {
            Ok(request) => {
                effects.push(request_refund(request, env));
                RefundState::Requested
            },
            Err(error) => RefundState::Failed(error.to_string()),
        }
    } else {
        RefundState::NotRequested
    };

    state.reconciliation.orphaned.push(OrphanedPayment {
        event_id,
        intent_id,
        amount,
        reason: reason.clone(),
        detected_at: env.clock.now(),
        refund,
    });
    effects
}

fn request_refund(request: RefundRequest, env: &SessionEnvironment) -> Effect<SessionAction> {
    let payments = Arc::clone(&env.payments);
    Effect::future(async move {
        let intent_id = request.provider_intent_id().clone();
        match payments.request_refund(request).await {
            Ok(record) => Some(SessionAction::RefundIssued { intent_id, record }),
            Err(error) => Some(SessionAction::RefundFailed {
                intent_id,
                error: error.into(),
            }),
        }
    })
}

pub(crate) fn on_refund_issued(
    state: &mut SessionState,
    intent_id: &ProviderIntentId,
    record: PaymentRecord,
) -> Effects {
    tracing::info!(%intent_id, "Orphaned payment refunded");
    set_refund_state(state, intent_id, RefundState::Issued);
    state
        .reconciliation
        .paid_intents
        .retain(|intent| &intent.id != intent_id);
    state.reconciliation.upsert(record);
    SmallVec::new()
}

pub(crate) fn on_refund_failed(
    state: &mut SessionState,
    intent_id: &ProviderIntentId,
    error: &EngineError,
) -> Effects {
    tracing::error!(%intent_id, %error, "Refund of orphaned payment failed");
    set_refund_state(state, intent_id, RefundState::Failed(error.to_string()));
    SmallVec::new()
}

fn set_refund_state(state: &mut SessionState, intent_id: &ProviderIntentId, refund: RefundState) {
    if let Some(orphan) = state
        .reconciliation
        .orphaned
        .iter_mut()
        .rev()
        .find(|orphan| &orphan.intent_id == intent_id)
    {
        orphan.refund = refund;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::coordinator::MutationOrigin;
    use crate::reducer::EventSessionReducer;
    use crate::test_support::{free_event, loaded, paid_event, services};
    use crate::types::RecordStatus;
    use screening_testing::{ReducerTest, assertions, test_epoch};
    use uuid::Uuid;

    fn succeeded_record(event_id: EventId, intent: &str) -> PaymentRecord {
        PaymentRecord {
            id: Uuid::new_v4(),
            event_id,
            provider_intent_id: ProviderIntentId::new(intent),
            amount: Money::from_minor_units(500),
            status: RecordStatus::Succeeded,
            created_at: test_epoch(),
        }
    }

    /// State right after a payment-unlocked `going` was sent.
    fn paying(event: &crate::types::Event, correlation_id: CorrelationId) -> SessionState {
        let mut state = loaded(event, RsvpStatus::Interested);
        let update = coordinator::OptimisticUpdate::begin(
            &mut state.rsvp.status,
            RsvpStatus::Going,
            correlation_id,
            MutationOrigin::Payment {
                intent_id: ProviderIntentId::new("pi_orphan"),
                amount: Money::from_minor_units(500),
            },
        );
        state.rsvp.in_flight = Some(update);
        state
    }

    #[test]
    fn view_distinguishes_reconciled_from_unreconciled() {
        let event = paid_event(500);
        let mut state = loaded(&event, RsvpStatus::Going);
        assert_eq!(state.reconciliation_status(), ReconciliationStatus::Unreconciled);

        state.reconciliation.syncing.push(ProviderIntentId::new("pi_1"));
        assert_eq!(state.reconciliation_status(), ReconciliationStatus::Pending);

        state.reconciliation.upsert(succeeded_record(event.id, "pi_1"));
        assert_eq!(state.reconciliation_status(), ReconciliationStatus::Reconciled);

        state.rsvp.status = RsvpStatus::NotGoing;
        assert_eq!(state.reconciliation_status(), ReconciliationStatus::NotRequired);

        let free = loaded(&free_event(), RsvpStatus::Going);
        assert_eq!(free.reconciliation_status(), ReconciliationStatus::NotRequired);
    }

    #[test]
    fn internal_sync_failure_is_swallowed() {
        let (_services, env) = services();
        let event = paid_event(500);
        let mut state = loaded(&event, RsvpStatus::Going);
        state.reconciliation.syncing.push(ProviderIntentId::new("pi_1"));

        ReducerTest::new(EventSessionReducer::new())
            .with_env(env)
            .given_state(state)
            .when_action(SessionAction::SyncFailed {
                correlation_id: None,
                intent_id: ProviderIntentId::new("pi_1"),
                error: EngineError::SyncFailure("503".into()),
            })
            .then_state(|state| {
                assert!(state.reconciliation.syncing.is_empty());
                assert_eq!(state.rsvp.status, RsvpStatus::Going);
                assert!(state.reconciliation.last_sync_error.is_some());
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn manual_sync_without_a_charge_is_refused() {
        let (_services, env) = services();
        let event = paid_event(500);

        ReducerTest::new(EventSessionReducer::new())
            .with_env(env)
            .given_state(loaded(&event, RsvpStatus::None))
            .when_action(SessionAction::ScheduleSync {
                correlation_id: Some(CorrelationId::new()),
                intent_id: None,
            })
            .then_state(|state| assert!(state.reconciliation.syncing.is_empty()))
            .then_effects(|effects| assertions::assert_future_count(effects, 1))
            .run();
    }

    #[test]
    fn refused_paid_rsvp_is_queued_as_orphan() {
        let (_services, env) = services();
        let event = paid_event(500);
        let correlation_id = CorrelationId::new();

        ReducerTest::new(EventSessionReducer::new())
            .with_env(env)
            .given_state(paying(&event, correlation_id))
            .when_action(SessionAction::MutationFailed {
                correlation_id,
                error: EngineError::CapacityFull,
            })
            .then_state(|state| {
                assert_eq!(state.rsvp.status, RsvpStatus::Interested);
                let [orphan] = state.reconciliation.orphaned.as_slice() else {
                    unreachable!("expected one orphaned payment");
                };
                assert_eq!(orphan.reason, EngineError::CapacityFull);
                assert_eq!(orphan.refund, RefundState::NotRequested);
            })
            // sink delivery and the settled error
            .then_effects(|effects| assertions::assert_future_count(effects, 2))
            .run();
    }

    #[test]
    fn refund_policy_requests_a_refund() {
        let (_services, env) = services();
        let event = paid_event(500);
        let correlation_id = CorrelationId::new();
        let mut state = paying(&event, correlation_id);
        state.payment.settings.orphan_policy = OrphanPolicy::Refund;

        ReducerTest::new(EventSessionReducer::new())
            .with_env(env)
            .given_state(state)
            .when_action(SessionAction::MutationFailed {
                correlation_id,
                error: EngineError::CapacityFull,
            })
            .then_state(|state| {
                assert_eq!(state.reconciliation.orphaned[0].refund, RefundState::Requested);
            })
            .then_effects(|effects| assertions::assert_future_count(effects, 3))
            .run();
    }
}
