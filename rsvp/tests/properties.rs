//! Property tests for the RSVP and payment laws.

#![allow(clippy::unwrap_used)]

mod common;

use common::{free_event, screening};
use proptest::prelude::*;
use proptest::sample::select;
use screening_rsvp::coordinator::{MutationOrigin, OptimisticUpdate};
use screening_rsvp::fakes::InMemoryServices;
use screening_rsvp::payment::validate_amount;
use screening_rsvp::state::PaymentSettings;
use screening_rsvp::{
    CorrelationId, EngineError, Event, EventSessionReducer, Money, PricingMode, RsvpStatus,
    SessionAction, SessionEnvironment, SessionState, UserId,
};
use screening_testing::{ReducerTest, test_clock};
use std::sync::Arc;

fn status() -> impl Strategy<Value = RsvpStatus> {
    select(RsvpStatus::ALL.to_vec())
}

fn environment() -> SessionEnvironment {
    InMemoryServices::new(UserId::new(), Arc::new(test_clock())).environment()
}

fn loaded(event: &Event, status: RsvpStatus) -> SessionState {
    let mut state = SessionState::new(UserId::new(), PaymentSettings::default());
    state.event_id = Some(event.id);
    state.snapshot = Some(event.clone());
    state.rsvp.status = status;
    state
}

proptest! {
    #[test]
    fn revert_restores_the_prior_status(prior in status(), target in status()) {
        let mut current = prior;
        let origin = MutationOrigin::Direct;
        let update = OptimisticUpdate::begin(&mut current, target, CorrelationId::new(), origin);
        prop_assert_eq!(current, target);

        update.revert(&mut current);
        prop_assert_eq!(current, prior);
    }

    #[test]
    fn failed_mutation_leaves_the_prior_status(prior in status(), target in status()) {
        let correlation_id = CorrelationId::new();

        ReducerTest::new(EventSessionReducer::new())
            .with_env(environment())
            .given_state(loaded(&free_event(), prior))
            .when_action(SessionAction::RequestStatus { correlation_id, status: target })
            .when_action(SessionAction::MutationFailed {
                correlation_id,
                error: EngineError::Network("connection reset".into()),
            })
            .then_state(move |state| {
                assert_eq!(state.rsvp.status, prior);
                assert!(state.rsvp.in_flight.is_none());
            })
            .run();
    }

    #[test]
    fn free_events_never_enter_the_payment_flow(prior in status(), target in status()) {
        ReducerTest::new(EventSessionReducer::new())
            .with_env(environment())
            .given_state(loaded(&free_event(), prior))
            .when_action(SessionAction::RequestStatus {
                correlation_id: CorrelationId::new(),
                status: target,
            })
            .then_state(|state| assert!(state.payment.phase.is_idle()))
            .run();
    }

    #[test]
    fn pay_what_you_can_enforces_the_minimum(
        price in 1u64..10_000,
        min_ratio in 0u64..=100,
        amount in 0u64..20_000,
    ) {
        let min_price = price * min_ratio / 100;
        let pricing = PricingMode::from_event(&screening(price, true, Some(min_price)));
        let result = validate_amount(pricing, Money::from_minor_units(amount));

        prop_assert_eq!(result.is_ok(), amount >= min_price.max(1));
        if amount < min_price {
            let below_minimum = matches!(result, Err(EngineError::AmountBelowMinimum { .. }));
            prop_assert!(below_minimum);
        }
    }

    #[test]
    fn fixed_price_accepts_only_the_price(price in 1u64..10_000, amount in 0u64..20_000) {
        let pricing = PricingMode::from_event(&screening(price, false, None));
        let result = validate_amount(pricing, Money::from_minor_units(amount));

        prop_assert_eq!(result.is_ok(), amount == price);
    }
}
