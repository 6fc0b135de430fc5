//! RSVP state coordinator: optimistic mutations with rollback.

use crate::actions::{RefreshCause, RsvpOutcome, SessionAction, settle_rsvp};
use crate::environment::{SessionEnvironment, SideEffect};
use crate::error::EngineError;
use crate::reducer::Effects;
use crate::state::SessionState;
use crate::types::{CorrelationId, Money, ProviderIntentId, RsvpReceipt, RsvpStatus};
use crate::{payment, reconciliation, snapshot};
use screening_core::effect::Effect;
use screening_core::{SmallVec, smallvec};
use std::sync::Arc;

/// What unlocked a mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOrigin {
    /// The user asked for the status directly
    Direct,
    /// A confirmed payment unlocked `going`
    Payment {
        /// Charged intent
        intent_id: ProviderIntentId,
        /// Amount charged
        amount: Money,
    },
}

/// One optimistic RSVP change.
///
/// `begin` records the prior status and applies the target, then exactly
/// one of `commit` or `revert` consumes the update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimisticUpdate {
    correlation_id: CorrelationId,
    prior: RsvpStatus,
    target: RsvpStatus,
    origin: MutationOrigin,
}

impl OptimisticUpdate {
    /// Snapshot `status`, then flip it to `target`.
    pub fn begin(
        status: &mut RsvpStatus,
        target: RsvpStatus,
        correlation_id: CorrelationId,
        origin: MutationOrigin,
    ) -> Self {
        let prior = *status;
        *status = target;
        Self {
            correlation_id,
            prior,
            target,
            origin,
        }
    }

    /// Keep the change, adopting whatever the server recorded.
    pub fn commit(self, status: &mut RsvpStatus, confirmed: RsvpStatus) -> RsvpStatus {
        *status = confirmed;
        confirmed
    }

    /// Restore the prior status.
    pub fn revert(self, status: &mut RsvpStatus) -> MutationOrigin {
        *status = self.prior;
        self.origin
    }

    /// Command this update belongs to
    #[must_use]
    pub const fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Status before the update
    #[must_use]
    pub const fn prior(&self) -> RsvpStatus {
        self.prior
    }

    /// Status applied optimistically
    #[must_use]
    pub const fn target(&self) -> RsvpStatus {
        self.target
    }

    /// What unlocked it
    #[must_use]
    pub const fn origin(&self) -> &MutationOrigin {
        &self.origin
    }
}

/// Entry point for every user-initiated RSVP change.
pub(crate) fn request_status(
    state: &mut SessionState,
    correlation_id: CorrelationId,
    target: RsvpStatus,
    env: &SessionEnvironment,
) -> Effects {
    let Some(pricing) = state.pricing() else {
        return smallvec![settle_rsvp(correlation_id, Err(EngineError::EventNotLoaded))];
    };
    if target == RsvpStatus::None {
        let error = EngineError::InvalidTransition {
            from: state.rsvp.status,
            to: target,
        };
        return smallvec![settle_rsvp(correlation_id, Err(error))];
    }
    if state.is_closed(env.clock.now()) {
        tracing::debug!(%target, "RSVP refused: event has started");
        return smallvec![settle_rsvp(correlation_id, Err(EngineError::EventClosed))];
    }
    if state.is_busy() {
        tracing::debug!(%target, "RSVP refused: operation in progress");
        return smallvec![settle_rsvp(correlation_id, Err(EngineError::OperationInProgress))];
    }

    if state.payment.phase.abandon() {
        tracing::debug!(%target, "Abandoned waiting payment flow");
    }

    if target == state.rsvp.status {
        return smallvec![settle_rsvp(correlation_id, Ok(RsvpOutcome::Unchanged(target)))];
    }

    if target == RsvpStatus::Going && pricing.requires_payment() && !state.is_paid() {
        return payment::start(state, correlation_id, pricing, env);
    }

    begin_mutation(state, correlation_id, target, MutationOrigin::Direct, env)
}

/// Apply `target` optimistically and send the mutation.
pub(crate) fn begin_mutation(
    state: &mut SessionState,
    correlation_id: CorrelationId,
    target: RsvpStatus,
    origin: MutationOrigin,
    env: &SessionEnvironment,
) -> Effects {
    let Some(event_id) = state.event_id else {
        return smallvec![settle_rsvp(correlation_id, Err(EngineError::EventNotLoaded))];
    };

    let update = OptimisticUpdate::begin(&mut state.rsvp.status, target, correlation_id, origin);
    tracing::debug!(
        %event_id,
        prior = %update.prior(),
        %target,
        %correlation_id,
        "Applied optimistic RSVP"
    );
    state.rsvp.in_flight = Some(update);
    state.rsvp.last_error = None;

    let events = Arc::clone(&env.events);
    let viewer = state.viewer;
    smallvec![Effect::future(async move {
        match events.set_rsvp(event_id, viewer, target).await {
            Ok(receipt) => Some(SessionAction::MutationSucceeded {
                correlation_id,
                receipt,
            }),
            Err(error) => Some(SessionAction::MutationFailed {
                correlation_id,
                error: error.into(),
            }),
        }
    })]
}

pub(crate) fn on_mutation_succeeded(
    state: &mut SessionState,
    correlation_id: CorrelationId,
    receipt: RsvpReceipt,
    env: &SessionEnvironment,
) -> Effects {
    let Some(update) = state
        .rsvp
        .in_flight
        .take_if(|update| update.correlation_id() == correlation_id)
    else {
        tracing::debug!(%correlation_id, "Ignoring result of unknown mutation");
        return SmallVec::new();
    };

    let status = update.commit(&mut state.rsvp.status, receipt.status);
    metrics::counter!("rsvp.mutations", "outcome" => "committed").increment(1);
    tracing::info!(
        event_id = ?state.event_id,
        %status,
        attendee_count = receipt.attendee_count,
        "RSVP committed"
    );

    let mut effects: Effects = SmallVec::new();
    if let Some(event) = state.snapshot.clone() {
        let mut delivered = vec![SideEffect::SuccessToast {
            title: event.title.clone(),
            status,
        }];
        if status == RsvpStatus::Going {
            delivered.push(SideEffect::Confetti);
            delivered.push(SideEffect::CalendarPrompt { event });
        }
        effects.push(deliver(env, delivered));
    }

    match state.event_id {
        Some(event_id) => effects.push(snapshot::fetch(
            state,
            event_id,
            RefreshCause::AfterWrite {
                correlation_id,
                status,
            },
            env,
        )),
        None => effects.push(settle_rsvp(correlation_id, Ok(RsvpOutcome::Confirmed(status)))),
    }
    effects
}

pub(crate) fn on_mutation_failed(
    state: &mut SessionState,
    correlation_id: CorrelationId,
    error: EngineError,
    env: &SessionEnvironment,
) -> Effects {
    let Some(update) = state
        .rsvp
        .in_flight
        .take_if(|update| update.correlation_id() == correlation_id)
    else {
        tracing::debug!(%correlation_id, "Ignoring failure of unknown mutation");
        return SmallVec::new();
    };

    let target = update.target();
    let origin = update.revert(&mut state.rsvp.status);
    state.rsvp.last_error = Some(error.clone());
    metrics::counter!("rsvp.mutations", "outcome" => "rolled_back").increment(1);
    tracing::warn!(
        event_id = ?state.event_id,
        %target,
        restored = %state.rsvp.status,
        %error,
        "RSVP rolled back"
    );

    let mut effects: Effects = SmallVec::new();
    if let MutationOrigin::Payment { intent_id, amount } = origin {
        effects.extend(reconciliation::record_orphan(state, intent_id, amount, &error, env));
    }
    effects.push(settle_rsvp(correlation_id, Err(error)));
    effects
}

/// Deliver side effects in order; failures are logged only.
pub(crate) fn deliver(env: &SessionEnvironment, effects: Vec<SideEffect>) -> Effect<SessionAction> {
    let sink = Arc::clone(&env.sink);
    Effect::fire_and_forget(async move {
        for effect in effects {
            if let Err(error) = sink.deliver(effect).await {
                tracing::warn!(%error, "Side effect delivery failed");
            }
        }
    })
}
