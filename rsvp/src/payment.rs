//! Payment request orchestrator.
//!
//! Decides what a deferred `going` needs (an amount, the test-mode advisory,
//! a confirmed intent), talks to the provider, and on success hands control
//! back to the coordinator's payment-unlocked path.

use crate::actions::{PaymentStep, RsvpOutcome, SessionAction, settle_rsvp};
use crate::coordinator::{self, MutationOrigin};
use crate::environment::{SessionEnvironment, SideEffect};
use crate::error::EngineError;
use crate::reconciliation;
use crate::reducer::Effects;
use crate::state::SessionState;
use crate::types::{
    CorrelationId, IntentStatus, Money, PaymentIntent, PricingMode, ProviderIntentId, RsvpStatus,
    TerminalPaymentStatus,
};
use crate::validation::{CreateIntentRequest, ValidationError};
use screening_core::effect::Effect;
use screening_core::{SmallVec, smallvec};
use std::sync::Arc;

/// Where the payment flow for a deferred `going` stands.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PaymentPhase {
    /// No flow
    #[default]
    Idle,
    /// Waiting for a pay-what-you-can amount
    AwaitingAmount {
        /// Lowest accepted amount
        minimum: Money,
        /// Default amount
        suggested: Money,
    },
    /// Waiting for the test-mode advisory to be dismissed
    AwaitingNoticeAck {
        /// Amount about to be charged
        amount: Money,
    },
    /// Provider is creating an intent
    CreatingIntent {
        /// Command waiting on it
        correlation_id: CorrelationId,
        /// Requested amount
        amount: Money,
    },
    /// Intent created, waiting for the user to confirm
    AwaitingConfirmation {
        /// Intent to confirm
        intent: PaymentIntent,
    },
    /// Provider is confirming the intent
    Confirming {
        /// Command waiting on it
        correlation_id: CorrelationId,
        /// Intent being confirmed
        intent: PaymentIntent,
    },
}

impl PaymentPhase {
    /// No flow is active
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Provider I/O is in flight
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        matches!(self, Self::CreatingIntent { .. } | Self::Confirming { .. })
    }

    /// The flow is parked on user input
    #[must_use]
    pub const fn is_waiting(&self) -> bool {
        matches!(
            self,
            Self::AwaitingAmount { .. }
                | Self::AwaitingNoticeAck { .. }
                | Self::AwaitingConfirmation { .. }
        )
    }

    /// The step the user is being asked for, if any
    #[must_use]
    pub fn step(&self) -> Option<PaymentStep> {
        match self {
            Self::AwaitingAmount { minimum, suggested } => Some(PaymentStep::EnterAmount {
                minimum: *minimum,
                suggested: *suggested,
            }),
            Self::AwaitingNoticeAck { amount } => {
                Some(PaymentStep::AcknowledgeTestMode { amount: *amount })
            },
            Self::AwaitingConfirmation { intent } => Some(PaymentStep::Confirm(intent.clone())),
            _ => None,
        }
    }

    /// Drop a flow parked on user input. Busy flows are left alone.
    pub fn abandon(&mut self) -> bool {
        if self.is_waiting() {
            *self = Self::Idle;
            true
        } else {
            false
        }
    }
}

/// What the event needs before `going` can be requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountRequirement {
    /// Nothing to pay
    None,
    /// This exact amount
    Fixed(Money),
    /// An amount the user picks
    UserInput {
        /// Lowest accepted amount
        minimum: Money,
        /// Default amount
        suggested: Money,
    },
}

/// Amount to charge for `pricing`. Pay-what-you-can never proceeds without
/// an amount from the user.
#[must_use]
pub const fn determine_amount(pricing: PricingMode) -> AmountRequirement {
    match pricing {
        PricingMode::Free => AmountRequirement::None,
        PricingMode::Fixed(price) => AmountRequirement::Fixed(price),
        PricingMode::PayWhatYouCan { minimum, suggested } => {
            AmountRequirement::UserInput { minimum, suggested }
        },
    }
}

/// Check a user-submitted amount against `pricing`.
///
/// # Errors
///
/// - [`EngineError::AmountBelowMinimum`] under the pay-what-you-can minimum
/// - [`EngineError::Validation`] for a zero amount
/// - [`EngineError::Rejected`] for any amount other than a fixed price
/// - [`EngineError::NoPaymentPending`] for free events
pub fn validate_amount(pricing: PricingMode, amount: Money) -> Result<Money, EngineError> {
    match determine_amount(pricing) {
        AmountRequirement::None => Err(EngineError::NoPaymentPending),
        AmountRequirement::Fixed(price) if amount == price => Ok(amount),
        AmountRequirement::Fixed(price) => {
            Err(EngineError::Rejected(format!("this event has a fixed price of {price}")))
        },
        AmountRequirement::UserInput { minimum, .. } if amount < minimum => {
            Err(EngineError::AmountBelowMinimum { amount, minimum })
        },
        AmountRequirement::UserInput { .. } if amount.is_zero() => {
            Err(ValidationError::NonPositiveAmount.into())
        },
        AmountRequirement::UserInput { .. } => Ok(amount),
    }
}

/// Begin the flow for a deferred `going`.
pub(crate) fn start(
    state: &mut SessionState,
    correlation_id: CorrelationId,
    pricing: PricingMode,
    env: &SessionEnvironment,
) -> Effects {
    match determine_amount(pricing) {
        AmountRequirement::None => {
            smallvec![settle_rsvp(correlation_id, Err(EngineError::NoPaymentPending))]
        },
        AmountRequirement::Fixed(amount) => proceed_with_amount(state, correlation_id, amount, env),
        AmountRequirement::UserInput { minimum, suggested } => {
            state.payment.phase = PaymentPhase::AwaitingAmount { minimum, suggested };
            smallvec![settle_rsvp(
                correlation_id,
                Ok(RsvpOutcome::PaymentRequired(PaymentStep::EnterAmount { minimum, suggested }))
            )]
        },
    }
}

fn proceed_with_amount(
    state: &mut SessionState,
    correlation_id: CorrelationId,
    amount: Money,
    env: &SessionEnvironment,
) -> Effects {
    if state.payment.settings.needs_notice() {
        state.payment.phase = PaymentPhase::AwaitingNoticeAck { amount };
        return smallvec![settle_rsvp(
            correlation_id,
            Ok(RsvpOutcome::PaymentRequired(PaymentStep::AcknowledgeTestMode { amount }))
        )];
    }
    create_intent(state, correlation_id, amount, env)
}

fn create_intent(
    state: &mut SessionState,
    correlation_id: CorrelationId,
    amount: Money,
    env: &SessionEnvironment,
) -> Effects {
    let Some(event_id) = state.event_id else {
        return smallvec![settle_rsvp(correlation_id, Err(EngineError::EventNotLoaded))];
    };
    let request = match CreateIntentRequest::for_event(event_id, amount) {
        Ok(request) => request,
        Err(error) => {
            state.payment.phase = PaymentPhase::Idle;
            return smallvec![settle_rsvp(correlation_id, Err(error.into()))];
        },
    };

    state.payment.phase = PaymentPhase::CreatingIntent {
        correlation_id,
        amount,
    };

    let provider = Arc::clone(&env.provider);
    smallvec![Effect::future(async move {
        match provider.create_payment_intent(request).await {
            Ok(intent) => {
                metrics::counter!("payment.intents.created").increment(1);
                tracing::debug!(
                    %event_id,
                    intent_id = %intent.id,
                    amount = intent.amount.minor_units(),
                    "Payment intent created"
                );
                Some(SessionAction::IntentCreated {
                    correlation_id,
                    intent,
                })
            },
            Err(error) => {
                tracing::warn!(%event_id, %error, "Payment intent creation failed");
                Some(SessionAction::IntentCreationFailed {
                    correlation_id,
                    error: EngineError::PaymentCreation(error.to_string()),
                })
            },
        }
    })]
}

pub(crate) fn submit_amount(
    state: &mut SessionState,
    correlation_id: CorrelationId,
    amount: Money,
    env: &SessionEnvironment,
) -> Effects {
    if let Err(error) = check_step(state, env) {
        return smallvec![settle_rsvp(correlation_id, Err(error))];
    }
    let Some(pricing) = state.pricing() else {
        return smallvec![settle_rsvp(correlation_id, Err(EngineError::EventNotLoaded))];
    };

    // A rejected amount leaves the flow where it was so the user can retry.
    let amount = match validate_amount(pricing, amount) {
        Ok(amount) => amount,
        Err(error) => {
            tracing::debug!(amount = amount.minor_units(), %error, "Amount rejected");
            return smallvec![settle_rsvp(correlation_id, Err(error))];
        },
    };

    if let PaymentPhase::AwaitingConfirmation { intent } = &state.payment.phase {
        tracing::debug!(intent_id = %intent.id, "Superseding payment intent with new amount");
    }
    proceed_with_amount(state, correlation_id, amount, env)
}

pub(crate) fn acknowledge_test_mode_notice(
    state: &mut SessionState,
    correlation_id: CorrelationId,
    env: &SessionEnvironment,
) -> Effects {
    if let Err(error) = check_step(state, env) {
        return smallvec![settle_rsvp(correlation_id, Err(error))];
    }
    let PaymentPhase::AwaitingNoticeAck { amount } = state.payment.phase else {
        return smallvec![settle_rsvp(correlation_id, Err(EngineError::NoPaymentPending))];
    };

    state.payment.settings.notice_seen = true;
    let preferences = Arc::clone(&env.preferences);
    let viewer = state.viewer;
    let persist = Effect::fire_and_forget(async move {
        if let Err(error) = preferences.mark_test_mode_notice_seen(viewer).await {
            tracing::warn!(%error, "Failed to persist test-mode notice preference");
        }
    });

    let mut effects = create_intent(state, correlation_id, amount, env);
    effects.push(persist);
    effects
}

pub(crate) fn confirm_payment(
    state: &mut SessionState,
    correlation_id: CorrelationId,
    env: &SessionEnvironment,
) -> Effects {
    if let Err(error) = check_step(state, env) {
        return smallvec![settle_rsvp(correlation_id, Err(error))];
    }
    let PaymentPhase::AwaitingConfirmation { intent } = &state.payment.phase else {
        return smallvec![settle_rsvp(correlation_id, Err(EngineError::NoPaymentPending))];
    };
    let intent = intent.clone();

    state.payment.phase = PaymentPhase::Confirming {
        correlation_id,
        intent: intent.clone(),
    };

    let provider = Arc::clone(&env.provider);
    let timeout = state.payment.settings.confirmation_timeout;
    smallvec![Effect::future(async move {
        let result = tokio::time::timeout(timeout, provider.confirm_payment(&intent)).await;
        let failure = match result {
            Ok(Ok(TerminalPaymentStatus::Succeeded)) => {
                metrics::counter!("payment.confirmations", "status" => "succeeded").increment(1);
                let intent = PaymentIntent {
                    status: IntentStatus::Succeeded,
                    ..intent
                };
                return Some(SessionAction::PaymentConfirmed {
                    correlation_id,
                    intent,
                });
            },
            Ok(Ok(TerminalPaymentStatus::Failed)) => {
                (IntentStatus::Failed, "payment failed".to_string())
            },
            Ok(Ok(TerminalPaymentStatus::Canceled)) => {
                (IntentStatus::Canceled, "payment canceled".to_string())
            },
            Ok(Err(error)) => (IntentStatus::Failed, error.to_string()),
            Err(_) => (IntentStatus::Failed, "confirmation timed out".to_string()),
        };

        let (status, reason) = failure;
        let label = if status == IntentStatus::Canceled { "canceled" } else { "failed" };
        metrics::counter!("payment.confirmations", "status" => label).increment(1);
        tracing::warn!(intent_id = %intent.id, %reason, "Payment not completed");
        Some(SessionAction::PaymentConfirmationFailed {
            correlation_id,
            intent_id: intent.id,
            status,
            error: EngineError::PaymentConfirmation(reason),
        })
    })]
}

pub(crate) fn cancel_payment(
    state: &mut SessionState,
    correlation_id: CorrelationId,
) -> Effects {
    if state.payment.phase.is_busy() {
        return smallvec![settle_rsvp(correlation_id, Err(EngineError::OperationInProgress))];
    }
    if !state.payment.phase.abandon() {
        return smallvec![settle_rsvp(correlation_id, Err(EngineError::NoPaymentPending))];
    }
    tracing::debug!(event_id = ?state.event_id, "Payment flow canceled");
    smallvec![settle_rsvp(correlation_id, Ok(RsvpOutcome::Unchanged(state.rsvp.status)))]
}

pub(crate) fn on_intent_created(
    state: &mut SessionState,
    correlation_id: CorrelationId,
    intent: PaymentIntent,
) -> Effects {
    if !matches!(
        state.payment.phase,
        PaymentPhase::CreatingIntent { correlation_id: pending, .. } if pending == correlation_id
    ) {
        tracing::debug!(intent_id = %intent.id, "Discarding intent for an abandoned flow");
        return smallvec![settle_rsvp(correlation_id, Err(EngineError::NoPaymentPending))];
    }

    state.payment.phase = PaymentPhase::AwaitingConfirmation {
        intent: intent.clone(),
    };
    smallvec![settle_rsvp(
        correlation_id,
        Ok(RsvpOutcome::PaymentRequired(PaymentStep::Confirm(intent)))
    )]
}

pub(crate) fn on_intent_creation_failed(
    state: &mut SessionState,
    correlation_id: CorrelationId,
    error: EngineError,
) -> Effects {
    if matches!(
        state.payment.phase,
        PaymentPhase::CreatingIntent { correlation_id: pending, .. } if pending == correlation_id
    ) {
        state.payment.phase = PaymentPhase::Idle;
    }
    smallvec![settle_rsvp(correlation_id, Err(error))]
}

/// A charge went through: unlock `going` and schedule reconciliation.
pub(crate) fn on_payment_confirmed(
    state: &mut SessionState,
    correlation_id: CorrelationId,
    intent: PaymentIntent,
    env: &SessionEnvironment,
) -> Effects {
    state.payment.phase = PaymentPhase::Idle;
    state.reconciliation.paid_intents.push(intent.clone());
    tracing::info!(
        event_id = %intent.event_id,
        intent_id = %intent.id,
        amount = intent.amount.minor_units(),
        "Payment confirmed"
    );

    let mut effects: Effects = SmallVec::new();
    effects.push(coordinator::deliver(
        env,
        vec![SideEffect::PaymentSucceeded {
            event_id: intent.event_id,
            amount: intent.amount,
        }],
    ));
    effects.extend(reconciliation::schedule_sync(state, None, Some(intent.id.clone()), env));

    let intent_id: ProviderIntentId = intent.id;
    if state.is_closed(env.clock.now()) {
        let error = EngineError::EventClosed;
        effects.extend(reconciliation::record_orphan(state, intent_id, intent.amount, &error, env));
        effects.push(settle_rsvp(correlation_id, Err(error)));
        return effects;
    }

    effects.extend(coordinator::begin_mutation(
        state,
        correlation_id,
        RsvpStatus::Going,
        MutationOrigin::Payment {
            intent_id,
            amount: intent.amount,
        },
        env,
    ));
    effects
}

pub(crate) fn on_payment_confirmation_failed(
    state: &mut SessionState,
    correlation_id: CorrelationId,
    intent_id: &ProviderIntentId,
    status: IntentStatus,
    error: EngineError,
) -> Effects {
    if matches!(
        state.payment.phase,
        PaymentPhase::Confirming { correlation_id: pending, .. } if pending == correlation_id
    ) {
        state.payment.phase = PaymentPhase::Idle;
    }
    tracing::debug!(%intent_id, ?status, "Payment intent discarded");
    smallvec![settle_rsvp(correlation_id, Err(error))]
}

/// Shared preconditions of the payment steps. An event that has started
/// ends the flow.
fn check_step(state: &mut SessionState, env: &SessionEnvironment) -> Result<(), EngineError> {
    if state.snapshot.is_none() {
        return Err(EngineError::EventNotLoaded);
    }
    if state.payment.phase.is_busy() {
        return Err(EngineError::OperationInProgress);
    }
    if !state.payment.phase.is_waiting() {
        return Err(EngineError::NoPaymentPending);
    }
    if state.is_closed(env.clock.now()) {
        state.payment.phase.abandon();
        return Err(EngineError::EventClosed);
    }
    Ok(())
}
