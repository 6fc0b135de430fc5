//! Event snapshot store: cold-start load and refresh.
//!
//! A snapshot is only ever replaced as a whole, so capacity and attendee
//! count always come from one server read. Failed fetches leave the last
//! good snapshot in place.

use crate::actions::{RefreshCause, RsvpOutcome, SessionAction, SessionOutcome, settle};
use crate::environment::SessionEnvironment;
use crate::error::EngineError;
use crate::reducer::Effects;
use crate::state::{RsvpState, SessionState};
use crate::types::{CorrelationId, Event, EventId, PaymentRecord, RsvpStatus};
use screening_core::effect::Effect;
use screening_core::smallvec;
use std::sync::Arc;

pub(crate) fn load(
    state: &mut SessionState,
    correlation_id: CorrelationId,
    event_id: EventId,
    env: &SessionEnvironment,
) -> Effects {
    let switching = state.event_id.is_some_and(|current| current != event_id);
    if switching && state.is_busy() {
        return smallvec![settle(correlation_id, Err(EngineError::OperationInProgress))];
    }

    // The current binding stays until the new event has actually arrived.
    state.pending_load = Some(event_id);
    let sequence = state.snapshot_version.issue();

    let events = Arc::clone(&env.events);
    let payments = Arc::clone(&env.payments);
    let viewer = state.viewer;
    smallvec![Effect::future(async move {
        let (event, status, history) = tokio::join!(
            events.fetch_event(event_id),
            events.fetch_rsvp(event_id, viewer),
            payments.payment_history(viewer),
        );
        match (event, status, history) {
            (Ok(event), Ok(status), Ok(history)) => Some(SessionAction::Loaded {
                correlation_id,
                sequence,
                event,
                status,
                history,
            }),
            (Err(error), _, _) | (_, Err(error), _) | (_, _, Err(error)) => {
                Some(SessionAction::LoadFailed {
                    correlation_id,
                    event_id,
                    error: error.into(),
                })
            },
        }
    })]
}

pub(crate) fn on_loaded(
    state: &mut SessionState,
    correlation_id: CorrelationId,
    sequence: u64,
    event: Event,
    status: RsvpStatus,
    history: Vec<PaymentRecord>,
) -> Effects {
    let requested = state.pending_load == Some(event.id);
    if !requested && state.event_id != Some(event.id) {
        tracing::debug!(event_id = %event.id, "Discarding superseded load");
        return smallvec![settle(correlation_id, Ok(SessionOutcome::Event(event)))];
    }
    if requested {
        state.pending_load = None;
    }

    if state.event_id != Some(event.id) {
        if state.is_busy() {
            tracing::debug!(event_id = %event.id, "Not switching events while I/O is in flight");
            return smallvec![settle(correlation_id, Err(EngineError::OperationInProgress))];
        }
        state.payment.phase.abandon();
        state.rsvp = RsvpState::default();
        state.event_id = Some(event.id);
        state.snapshot = None;
        state.snapshot_version.rebind(sequence);
    }

    // An in-flight mutation owns the status until it commits or reverts.
    if state.rsvp.in_flight.is_none() {
        state.rsvp.status = status;
    }
    for record in history.into_iter().filter(|record| record.event_id == event.id) {
        state.reconciliation.upsert(record);
    }
    tracing::debug!(
        event_id = %event.id,
        attendee_count = event.attendee_count,
        %status,
        "Event loaded"
    );
    if state.snapshot.is_none() || state.snapshot_version.accept(sequence) {
        state.snapshot = Some(event.clone());
    }

    smallvec![settle(correlation_id, Ok(SessionOutcome::Event(event)))]
}

pub(crate) fn on_load_failed(
    state: &mut SessionState,
    correlation_id: CorrelationId,
    event_id: EventId,
    error: EngineError,
) -> Effects {
    if state.pending_load == Some(event_id) {
        state.pending_load = None;
    }
    tracing::warn!(
        %event_id,
        bound = ?state.event_id,
        %error,
        cached = state.snapshot.is_some(),
        "Event load failed"
    );
    smallvec![settle(correlation_id, Err(error))]
}

pub(crate) fn refresh(
    state: &mut SessionState,
    correlation_id: CorrelationId,
    env: &SessionEnvironment,
) -> Effects {
    match state.event_id {
        Some(event_id) => {
            let cause = RefreshCause::Requested(correlation_id);
            smallvec![fetch(state, event_id, cause, env)]
        },
        None => smallvec![settle(correlation_id, Err(EngineError::EventNotLoaded))],
    }
}

/// Re-fetch the event for `cause`.
pub(crate) fn fetch(
    state: &mut SessionState,
    event_id: EventId,
    cause: RefreshCause,
    env: &SessionEnvironment,
) -> Effect<SessionAction> {
    let sequence = state.snapshot_version.issue();
    let events = Arc::clone(&env.events);
    Effect::future(async move {
        match events.fetch_event(event_id).await {
            Ok(event) => Some(SessionAction::SnapshotRefreshed {
                cause,
                sequence,
                event,
            }),
            Err(error) => Some(SessionAction::RefreshFailed {
                cause,
                error: error.into(),
            }),
        }
    })
}

/// Replace the snapshot unless a later read has already been applied.
pub(crate) fn on_refreshed(
    state: &mut SessionState,
    cause: RefreshCause,
    sequence: u64,
    event: Event,
) -> Effects {
    if state.event_id == Some(event.id) {
        if state.snapshot_version.accept(sequence) {
            state.snapshot = Some(event.clone());
        } else {
            tracing::debug!(event_id = %event.id, sequence, "Ignoring out-of-order snapshot");
        }
    }
    let event = state.snapshot.clone().unwrap_or(event);

    match cause {
        RefreshCause::Requested(correlation_id) => {
            smallvec![settle(correlation_id, Ok(SessionOutcome::Event(event)))]
        },
        RefreshCause::AfterWrite {
            correlation_id,
            status,
        } => smallvec![settle(
            correlation_id,
            Ok(SessionOutcome::Rsvp(RsvpOutcome::Confirmed(status)))
        )],
    }
}

/// The cached snapshot stays; a failed refresh-after-write does not undo
/// the committed RSVP.
pub(crate) fn on_refresh_failed(
    state: &SessionState,
    cause: RefreshCause,
    error: EngineError,
) -> Effects {
    tracing::warn!(
        event_id = ?state.event_id,
        %error,
        "Snapshot refresh failed, keeping cached event"
    );

    match cause {
        RefreshCause::Requested(correlation_id) => smallvec![settle(correlation_id, Err(error))],
        RefreshCause::AfterWrite {
            correlation_id,
            status,
        } => smallvec![settle(
            correlation_id,
            Ok(SessionOutcome::Rsvp(RsvpOutcome::Confirmed(status)))
        )],
    }
}
