//! End-to-end RSVP flows through `EventSession` against the in-memory backend.

#![allow(clippy::unwrap_used, clippy::panic)]

mod common;

use chrono::Duration;
use common::{Harness, free_event, paid_event, screening, settle_timeout};
use screening_rsvp::fakes::ConfirmationBehavior;
use screening_rsvp::{
    EngineConfig, EngineError, EventId, Money, PaymentStep, RecordStatus, ReconciliationStatus,
    RsvpOutcome, RsvpStatus, SideEffect,
};
use screening_testing::{ManualClock, test_epoch};
use std::sync::Arc;

fn confirm_step(outcome: RsvpOutcome) -> screening_rsvp::PaymentIntent {
    match outcome {
        RsvpOutcome::PaymentRequired(PaymentStep::Confirm(intent)) => intent,
        other => panic!("expected a confirmable intent, got {other:?}"),
    }
}

#[tokio::test]
async fn free_event_going_without_payment() {
    let harness = Harness::new();
    let event = free_event();
    let session = harness.open(&event).await;

    let outcome = session.request_status(RsvpStatus::Going).await.unwrap();

    assert_eq!(outcome, RsvpOutcome::Confirmed(RsvpStatus::Going));
    assert_eq!(session.status().await, RsvpStatus::Going);
    assert_eq!(session.event().await.unwrap().attendee_count, 13);
    assert_eq!(harness.services.backend.rsvp_of(event.id, harness.viewer), RsvpStatus::Going);
    assert_eq!(harness.services.provider.create_calls(), 0);
    assert_eq!(session.reconciliation().await, ReconciliationStatus::NotRequired);

    session.settle(settle_timeout()).await.unwrap();
    let delivered = harness.services.sink.delivered();
    assert!(matches!(
        delivered.as_slice(),
        [
            SideEffect::SuccessToast { status: RsvpStatus::Going, .. },
            SideEffect::Confetti,
            SideEffect::CalendarPrompt { .. },
        ]
    ));
}

#[tokio::test]
async fn interested_toasts_without_celebration() {
    let harness = Harness::new();
    let session = harness.open(&free_event()).await;

    session.request_status(RsvpStatus::Interested).await.unwrap();
    session.settle(settle_timeout()).await.unwrap();

    assert!(matches!(
        harness.services.sink.delivered().as_slice(),
        [SideEffect::SuccessToast { status: RsvpStatus::Interested, .. }]
    ));
}

#[tokio::test]
async fn repeating_the_current_status_is_a_no_op() {
    let harness = Harness::new();
    let event = free_event();
    harness.services.backend.seed_rsvp(event.id, harness.viewer, RsvpStatus::Interested);
    let session = harness.open(&event).await;

    let outcome = session.request_status(RsvpStatus::Interested).await.unwrap();

    assert_eq!(outcome, RsvpOutcome::Unchanged(RsvpStatus::Interested));
    assert_eq!(harness.services.backend.mutation_calls(), 0);
}

#[tokio::test]
async fn fixed_price_charge_then_rsvp_then_sync() {
    let harness = Harness::new();
    let event = paid_event(500);
    let session = harness.open(&event).await;

    let intent = confirm_step(session.request_status(RsvpStatus::Going).await.unwrap());
    assert_eq!(intent.amount, Money::from_minor_units(500));
    assert_eq!(session.status().await, RsvpStatus::None);

    let outcome = session.confirm_payment().await.unwrap();
    assert_eq!(outcome, RsvpOutcome::Confirmed(RsvpStatus::Going));

    session.settle(settle_timeout()).await.unwrap();
    let records = harness.services.backend.records_for(&intent.id);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, RecordStatus::Succeeded);
    assert_eq!(session.reconciliation().await, ReconciliationStatus::Reconciled);
    assert!(
        harness
            .services
            .sink
            .delivered()
            .iter()
            .any(|effect| matches!(
                effect,
                SideEffect::PaymentSucceeded { amount, .. } if amount.minor_units() == 500
            ))
    );
}

#[tokio::test]
async fn pay_what_you_can_rejects_amount_below_minimum() {
    let harness = Harness::new();
    let event = screening(1000, true, Some(200));
    let session = harness.open(&event).await;

    let outcome = session.request_status(RsvpStatus::Going).await.unwrap();
    assert_eq!(
        outcome,
        RsvpOutcome::PaymentRequired(PaymentStep::EnterAmount {
            minimum: Money::from_minor_units(200),
            suggested: Money::from_minor_units(1000),
        })
    );

    let error = session.submit_amount(Money::from_minor_units(150)).await.unwrap_err();
    assert_eq!(
        error,
        EngineError::AmountBelowMinimum {
            amount: Money::from_minor_units(150),
            minimum: Money::from_minor_units(200),
        }
    );
    assert_eq!(harness.services.provider.create_calls(), 0);

    let intent = confirm_step(session.submit_amount(Money::from_minor_units(300)).await.unwrap());
    assert_eq!(intent.amount, Money::from_minor_units(300));
    assert_eq!(harness.services.provider.create_calls(), 1);
}

#[tokio::test]
async fn full_event_charge_is_queued_as_orphaned() {
    let harness = Harness::new();
    let mut event = paid_event(800);
    event.attendee_count = event.max_capacity;
    let session = harness.open(&event).await;

    let intent = confirm_step(session.request_status(RsvpStatus::Going).await.unwrap());
    let error = session.confirm_payment().await.unwrap_err();

    assert_eq!(error, EngineError::CapacityFull);
    assert_eq!(session.status().await, RsvpStatus::None);

    session.settle(settle_timeout()).await.unwrap();
    let orphans = session.orphaned_payments().await;
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].intent_id, intent.id);
    assert_eq!(orphans[0].reason, EngineError::CapacityFull);
    assert_eq!(orphans[0].refund, screening_rsvp::RefundState::NotRequested);

    let records = harness.services.backend.records_for(&intent.id);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, RecordStatus::Succeeded);
    assert_eq!(harness.services.backend.refund_calls(), 0);
    assert!(
        harness
            .services
            .sink
            .delivered()
            .iter()
            .any(|effect| matches!(effect, SideEffect::PaymentOrphaned { .. }))
    );
}

#[tokio::test]
async fn orphaned_charge_unlocks_a_later_retry_without_charging_again() {
    let harness = Harness::new();
    let mut event = paid_event(800);
    event.attendee_count = event.max_capacity;
    let session = harness.open(&event).await;

    session.request_status(RsvpStatus::Going).await.unwrap();
    session.confirm_payment().await.unwrap_err();
    session.settle(settle_timeout()).await.unwrap();

    event.attendee_count = event.max_capacity - 1;
    harness.services.backend.add_event(event);
    let outcome = session.request_status(RsvpStatus::Going).await.unwrap();

    assert_eq!(outcome, RsvpOutcome::Confirmed(RsvpStatus::Going));
    assert_eq!(harness.services.provider.create_calls(), 1);
}

#[tokio::test]
async fn declined_card_leaves_rsvp_untouched() {
    let harness = Harness::new();
    let session = harness.open(&paid_event(500)).await;
    harness.services.provider.set_confirmation(ConfirmationBehavior::Fail);

    session.request_status(RsvpStatus::Going).await.unwrap();
    let error = session.confirm_payment().await.unwrap_err();

    assert!(matches!(error, EngineError::PaymentConfirmation(_)));
    assert_eq!(session.status().await, RsvpStatus::None);
    assert_eq!(session.payment_step().await, None);
    assert_eq!(harness.services.backend.mutation_calls(), 0);
}

#[tokio::test]
async fn hanging_confirmation_times_out_as_failed() {
    let harness = Harness::new();
    let mut config = EngineConfig::default();
    config.payments.confirmation_timeout = std::time::Duration::from_millis(50);
    let session = harness.open_with(&paid_event(500), &config).await;
    harness.services.provider.set_confirmation(ConfirmationBehavior::Hang);

    session.request_status(RsvpStatus::Going).await.unwrap();
    let error = session.confirm_payment().await.unwrap_err();

    assert_eq!(error, EngineError::PaymentConfirmation("confirmation timed out".to_string()));
    assert!(!session.is_busy().await);
    assert_eq!(session.status().await, RsvpStatus::None);
}

#[tokio::test]
async fn slow_confirmation_outlasts_the_outcome_timeout() {
    let harness = Harness::new();
    let mut config = EngineConfig {
        outcome_timeout: std::time::Duration::from_millis(100),
        ..EngineConfig::default()
    };
    config.payments.confirmation_timeout = std::time::Duration::from_secs(1);
    let event = paid_event(500);
    let session = harness.open_with(&event, &config).await;
    harness
        .services
        .provider
        .set_confirmation(ConfirmationBehavior::SucceedAfter(
            std::time::Duration::from_millis(300),
        ));

    session.request_status(RsvpStatus::Going).await.unwrap();
    let outcome = session.confirm_payment().await.unwrap();

    assert_eq!(outcome, RsvpOutcome::Confirmed(RsvpStatus::Going));
    assert_eq!(session.status().await, RsvpStatus::Going);
    assert_eq!(
        harness.services.backend.rsvp_of(event.id, harness.viewer),
        RsvpStatus::Going
    );
}

#[tokio::test]
async fn cancel_abandons_the_flow() {
    let harness = Harness::new();
    let session = harness.open(&paid_event(500)).await;

    session.request_status(RsvpStatus::Going).await.unwrap();
    let outcome = session.cancel_payment().await.unwrap();

    assert_eq!(outcome, RsvpOutcome::Unchanged(RsvpStatus::None));
    assert_eq!(session.payment_step().await, None);
    assert_eq!(session.confirm_payment().await.unwrap_err(), EngineError::NoPaymentPending);
}

#[tokio::test]
async fn started_event_refuses_rsvp_changes() {
    let clock = Arc::new(ManualClock::new(test_epoch()));
    let harness = Harness::with_clock(clock.clone());
    let session = harness.open(&free_event()).await;

    clock.advance(Duration::days(8));
    let error = session.request_status(RsvpStatus::Going).await.unwrap_err();

    assert_eq!(error, EngineError::EventClosed);
    assert_eq!(session.status().await, RsvpStatus::None);
    assert_eq!(harness.services.backend.mutation_calls(), 0);
}

#[tokio::test]
async fn event_starting_mid_flow_ends_it_before_charging() {
    let clock = Arc::new(ManualClock::new(test_epoch()));
    let harness = Harness::with_clock(clock.clone());
    let session = harness.open(&paid_event(500)).await;

    session.request_status(RsvpStatus::Going).await.unwrap();
    clock.advance(Duration::days(7));
    let error = session.confirm_payment().await.unwrap_err();

    assert_eq!(error, EngineError::EventClosed);
    assert_eq!(session.payment_step().await, None);
    assert_eq!(harness.services.provider.confirm_calls(), 0);
}

#[tokio::test]
async fn test_mode_notice_is_shown_once_per_viewer() {
    let harness = Harness::new();
    let mut config = EngineConfig::default();
    config.payments.test_mode = true;

    let first = harness.open_with(&paid_event(500), &config).await;
    let outcome = first.request_status(RsvpStatus::Going).await.unwrap();
    assert_eq!(
        outcome,
        RsvpOutcome::PaymentRequired(PaymentStep::AcknowledgeTestMode {
            amount: Money::from_minor_units(500),
        })
    );
    assert_eq!(harness.services.provider.create_calls(), 0);

    confirm_step(first.acknowledge_test_mode_notice().await.unwrap());
    first.settle(settle_timeout()).await.unwrap();
    first.close();

    let second = harness.open_with(&paid_event(700), &config).await;
    let intent = confirm_step(second.request_status(RsvpStatus::Going).await.unwrap());
    assert_eq!(intent.amount, Money::from_minor_units(700));
}

#[tokio::test]
async fn concurrent_requests_send_one_mutation() {
    let harness = Harness::new();
    harness
        .services
        .backend
        .set_mutation_latency(std::time::Duration::from_millis(50));
    let session = harness.open(&free_event()).await;

    let (first, second) = tokio::join!(
        session.request_status(RsvpStatus::Going),
        session.request_status(RsvpStatus::Interested),
    );

    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .any(|r| matches!(r, Err(EngineError::OperationInProgress)))
    );
    assert_eq!(harness.services.backend.mutation_calls(), 1);
}

#[tokio::test]
async fn failed_mutation_rolls_back_to_prior_status() {
    let harness = Harness::new();
    let event = free_event();
    harness.services.backend.seed_rsvp(event.id, harness.viewer, RsvpStatus::Interested);
    let session = harness.open(&event).await;
    harness
        .services
        .backend
        .fail_next_mutation(screening_rsvp::ApiError::Network("connection reset".into()));

    let error = session.request_status(RsvpStatus::Going).await.unwrap_err();

    assert_eq!(error, EngineError::Network("connection reset".into()));
    assert_eq!(session.status().await, RsvpStatus::Interested);
    assert_eq!(session.snapshot().await.rsvp.last_error, Some(error));
}

#[tokio::test]
async fn load_errors_keep_the_cached_snapshot() {
    let harness = Harness::new();
    let event = free_event();
    let session = harness.open(&event).await;

    harness
        .services
        .backend
        .fail_next_fetch(screening_rsvp::ApiError::Network("timeout".into()));
    assert!(session.refresh().await.is_err());
    assert_eq!(session.event().await, Some(event));

    let missing = EventId::new();
    assert_eq!(
        session.load(missing).await.unwrap_err(),
        EngineError::NotFound { event_id: missing }
    );
}

#[tokio::test]
async fn failed_switch_keeps_the_open_event_usable() {
    let harness = Harness::new();
    let event = free_event();
    let session = harness.open(&event).await;

    let missing = EventId::new();
    assert_eq!(
        session.load(missing).await.unwrap_err(),
        EngineError::NotFound { event_id: missing }
    );
    assert_eq!(session.event().await.map(|event| event.id), Some(event.id));

    let outcome = session.request_status(RsvpStatus::Going).await.unwrap();
    assert_eq!(outcome, RsvpOutcome::Confirmed(RsvpStatus::Going));
    assert_eq!(
        harness.services.backend.rsvp_of(event.id, harness.viewer),
        RsvpStatus::Going
    );
}

#[tokio::test]
async fn switching_events_rebinds_the_session() {
    let harness = Harness::new();
    let first = free_event();
    let second = paid_event(700);
    harness.services.backend.add_event(second.clone());
    let session = harness.open(&first).await;
    session.request_status(RsvpStatus::Interested).await.unwrap();

    let loaded = session.load(second.id).await.unwrap();

    assert_eq!(loaded.id, second.id);
    assert_eq!(session.event().await.map(|event| event.id), Some(second.id));
    assert_eq!(session.status().await, RsvpStatus::None);
}

#[tokio::test]
async fn reload_picks_up_payment_history() {
    let harness = Harness::new();
    let event = paid_event(500);
    let session = harness.open(&event).await;
    session.request_status(RsvpStatus::Going).await.unwrap();
    session.confirm_payment().await.unwrap();
    session.settle(settle_timeout()).await.unwrap();
    session.close();

    let reopened = harness.open(&event).await;

    assert_eq!(reopened.status().await, RsvpStatus::Going);
    assert_eq!(reopened.reconciliation().await, ReconciliationStatus::Reconciled);
    assert_eq!(reopened.payment_records().await.len(), 1);
}
