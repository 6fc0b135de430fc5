//! In-memory collaborators for tests and the demo.
//!
//! [`FakeBackend`] plays the event API and the payment server, with a
//! provider-side ledger that [`FakePaymentProvider`] writes to. Webhooks are
//! not delivered unless asked for, so reconciliation has something to do.

use crate::environment::{
    EventApi, PaymentProvider, PaymentServer, PreferenceStore, SessionEnvironment, SideEffect,
    SideEffectSink,
};
use crate::error::{ApiError, ProviderError};
use crate::types::{
    Event, EventId, IntentStatus, Money, PaymentIntent, PaymentRecord, ProviderIntentId,
    RecordStatus, RsvpReceipt, RsvpStatus, TerminalPaymentStatus, UserId,
};
use crate::validation::{CreateIntentRequest, RefundRequest, SyncIntentRequest};
use async_trait::async_trait;
use screening_core::environment::Clock;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use uuid::Uuid;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Provider-side view of one intent
#[derive(Debug, Clone)]
struct LedgerEntry {
    customer: UserId,
    event_id: EventId,
    amount: Money,
    status: IntentStatus,
}

#[derive(Debug, Default)]
struct BackendState {
    events: HashMap<EventId, Event>,
    rsvps: HashMap<(EventId, UserId), RsvpStatus>,
    ledger: HashMap<ProviderIntentId, LedgerEntry>,
    records: Vec<(UserId, PaymentRecord)>,
    mutation_failures: VecDeque<ApiError>,
    fetch_failures: VecDeque<ApiError>,
    sync_failures: VecDeque<ApiError>,
    mutation_latency: Duration,
    mutation_calls: usize,
    sync_calls: usize,
    refund_calls: usize,
}

/// Event API and payment server backed by maps.
pub struct FakeBackend {
    state: Mutex<BackendState>,
    clock: Arc<dyn Clock>,
}

impl FakeBackend {
    /// Empty backend checking start times against `clock`
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(BackendState::default()),
            clock,
        }
    }

    /// Publish or replace an event
    pub fn add_event(&self, event: Event) {
        lock(&self.state).events.insert(event.id, event);
    }

    /// Seed a status for `user` without counting a mutation
    pub fn seed_rsvp(&self, event_id: EventId, user: UserId, status: RsvpStatus) {
        lock(&self.state).rsvps.insert((event_id, user), status);
    }

    /// Fail the next RSVP mutation with `error`
    pub fn fail_next_mutation(&self, error: ApiError) {
        lock(&self.state).mutation_failures.push_back(error);
    }

    /// Fail the next event read with `error`
    pub fn fail_next_fetch(&self, error: ApiError) {
        lock(&self.state).fetch_failures.push_back(error);
    }

    /// Fail the next sync call with `error`
    pub fn fail_next_sync(&self, error: ApiError) {
        lock(&self.state).sync_failures.push_back(error);
    }

    /// Delay every RSVP mutation by `latency`
    pub fn set_mutation_latency(&self, latency: Duration) {
        lock(&self.state).mutation_latency = latency;
    }

    /// Current server copy of the event
    #[must_use]
    pub fn event(&self, event_id: EventId) -> Option<Event> {
        lock(&self.state).events.get(&event_id).cloned()
    }

    /// Server-side status of `user`
    #[must_use]
    pub fn rsvp_of(&self, event_id: EventId, user: UserId) -> RsvpStatus {
        lock(&self.state)
            .rsvps
            .get(&(event_id, user))
            .copied()
            .unwrap_or_default()
    }

    /// RSVP mutations received
    #[must_use]
    pub fn mutation_calls(&self) -> usize {
        lock(&self.state).mutation_calls
    }

    /// Sync calls received
    #[must_use]
    pub fn sync_calls(&self) -> usize {
        lock(&self.state).sync_calls
    }

    /// Refund calls received
    #[must_use]
    pub fn refund_calls(&self) -> usize {
        lock(&self.state).refund_calls
    }

    /// Server records for `intent_id`
    #[must_use]
    pub fn records_for(&self, intent_id: &ProviderIntentId) -> Vec<PaymentRecord> {
        lock(&self.state)
            .records
            .iter()
            .filter(|(_, record)| &record.provider_intent_id == intent_id)
            .map(|(_, record)| record.clone())
            .collect()
    }

    /// Every server record
    #[must_use]
    pub fn records(&self) -> Vec<PaymentRecord> {
        lock(&self.state).records.iter().map(|(_, record)| record.clone()).collect()
    }

    /// Provider webhook: materialize the record for a settled intent.
    pub fn deliver_webhook(&self, intent_id: &ProviderIntentId) -> Option<PaymentRecord> {
        let now = self.clock.now();
        let mut state = lock(&self.state);
        let entry = state.ledger.get(intent_id)?.clone();
        Some(upsert_record(&mut state, intent_id, &entry, now))
    }

    fn record_intent(&self, intent_id: ProviderIntentId, entry: LedgerEntry) {
        lock(&self.state).ledger.insert(intent_id, entry);
    }

    fn settle_intent(&self, intent_id: &ProviderIntentId, status: IntentStatus) {
        if let Some(entry) = lock(&self.state).ledger.get_mut(intent_id) {
            entry.status = status;
        }
    }

    fn price_of(&self, event_id: EventId) -> Option<Money> {
        lock(&self.state).events.get(&event_id).map(|event| event.price)
    }
}

/// Upsert keyed by provider intent id; refunded records stay refunded.
fn upsert_record(
    state: &mut BackendState,
    intent_id: &ProviderIntentId,
    entry: &LedgerEntry,
    now: chrono::DateTime<chrono::Utc>,
) -> PaymentRecord {
    let status = match entry.status {
        IntentStatus::Succeeded => RecordStatus::Succeeded,
        IntentStatus::Failed | IntentStatus::Canceled => RecordStatus::Failed,
        IntentStatus::Pending | IntentStatus::RequiresAction => RecordStatus::Pending,
    };

    if let Some((_, record)) = state
        .records
        .iter_mut()
        .find(|(_, record)| &record.provider_intent_id == intent_id)
    {
        if record.status != RecordStatus::Refunded {
            record.status = status;
        }
        return record.clone();
    }

    let record = PaymentRecord {
        id: Uuid::new_v4(),
        event_id: entry.event_id,
        provider_intent_id: intent_id.clone(),
        amount: entry.amount,
        status,
        created_at: now,
    };
    state.records.push((entry.customer, record.clone()));
    record
}

#[async_trait]
impl EventApi for FakeBackend {
    async fn fetch_event(&self, event_id: EventId) -> Result<Event, ApiError> {
        let mut state = lock(&self.state);
        if let Some(error) = state.fetch_failures.pop_front() {
            return Err(error);
        }
        state.events.get(&event_id).cloned().ok_or(ApiError::NotFound(event_id))
    }

    async fn fetch_rsvp(&self, event_id: EventId, user: UserId) -> Result<RsvpStatus, ApiError> {
        Ok(self.rsvp_of(event_id, user))
    }

    async fn set_rsvp(
        &self,
        event_id: EventId,
        user: UserId,
        status: RsvpStatus,
    ) -> Result<RsvpReceipt, ApiError> {
        let latency = {
            let mut state = lock(&self.state);
            state.mutation_calls += 1;
            state.mutation_latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let now = self.clock.now();
        let mut state = lock(&self.state);
        if let Some(error) = state.mutation_failures.pop_front() {
            return Err(error);
        }
        let prior = state.rsvps.get(&(event_id, user)).copied().unwrap_or_default();
        let event = state.events.get_mut(&event_id).ok_or(ApiError::NotFound(event_id))?;
        if event.has_started(now) {
            return Err(ApiError::EventClosed);
        }

        match (prior == RsvpStatus::Going, status == RsvpStatus::Going) {
            (false, true) if event.attendee_count >= event.max_capacity => {
                return Err(ApiError::CapacityFull);
            },
            (false, true) => event.attendee_count += 1,
            (true, false) => event.attendee_count = event.attendee_count.saturating_sub(1),
            _ => {},
        }
        let attendee_count = event.attendee_count;
        state.rsvps.insert((event_id, user), status);

        Ok(RsvpReceipt {
            status,
            attendee_count,
        })
    }
}

#[async_trait]
impl PaymentServer for FakeBackend {
    async fn sync_payment_intent(
        &self,
        request: SyncIntentRequest,
    ) -> Result<PaymentRecord, ApiError> {
        let now = self.clock.now();
        let mut state = lock(&self.state);
        state.sync_calls += 1;
        if let Some(error) = state.sync_failures.pop_front() {
            return Err(error);
        }
        let intent_id = request.provider_intent_id();
        let entry = state
            .ledger
            .get(intent_id)
            .cloned()
            .ok_or_else(|| ApiError::Rejected(format!("unknown payment intent {intent_id}")))?;
        Ok(upsert_record(&mut state, intent_id, &entry, now))
    }

    async fn payment_history(&self, user: UserId) -> Result<Vec<PaymentRecord>, ApiError> {
        Ok(lock(&self.state)
            .records
            .iter()
            .filter(|(owner, _)| *owner == user)
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn request_refund(&self, request: RefundRequest) -> Result<PaymentRecord, ApiError> {
        let now = self.clock.now();
        let mut state = lock(&self.state);
        state.refund_calls += 1;
        let intent_id = request.provider_intent_id();
        let entry = state
            .ledger
            .get(intent_id)
            .cloned()
            .ok_or_else(|| ApiError::Rejected(format!("unknown payment intent {intent_id}")))?;
        if entry.status != IntentStatus::Succeeded {
            return Err(ApiError::Rejected(format!("payment intent {intent_id} was not charged")));
        }
        let mut record = upsert_record(&mut state, intent_id, &entry, now);
        if let Some((_, stored)) = state
            .records
            .iter_mut()
            .find(|(_, stored)| stored.id == record.id)
        {
            stored.status = RecordStatus::Refunded;
        }
        record.status = RecordStatus::Refunded;
        tracing::debug!(%intent_id, reason = %request.reason(), "Fake refund issued");
        Ok(record)
    }
}

/// How [`FakePaymentProvider::confirm_payment`] ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfirmationBehavior {
    /// Charge succeeds
    #[default]
    Succeed,
    /// Charge succeeds after a slow authentication step
    SucceedAfter(Duration),
    /// Card declined
    Fail,
    /// Customer abandons the sheet
    Cancel,
    /// Never returns, as an abandoned authentication challenge
    Hang,
}

#[derive(Debug, Default)]
struct ProviderControls {
    creation_failure: Option<ProviderError>,
    behavior: ConfirmationBehavior,
    deliver_webhooks: bool,
    create_calls: usize,
    confirm_calls: usize,
    created: Vec<PaymentIntent>,
}

/// Provider SDK writing to the [`FakeBackend`] ledger.
pub struct FakePaymentProvider {
    backend: Arc<FakeBackend>,
    customer: UserId,
    controls: Mutex<ProviderControls>,
}

impl FakePaymentProvider {
    /// Provider acting for `customer`
    #[must_use]
    pub fn new(backend: Arc<FakeBackend>, customer: UserId) -> Self {
        Self {
            backend,
            customer,
            controls: Mutex::new(ProviderControls::default()),
        }
    }

    /// Fail every intent creation with `error` until cleared
    pub fn fail_creation(&self, error: Option<ProviderError>) {
        lock(&self.controls).creation_failure = error;
    }

    /// Choose how confirmation ends
    pub fn set_confirmation(&self, behavior: ConfirmationBehavior) {
        lock(&self.controls).behavior = behavior;
    }

    /// Deliver the webhook as soon as a charge succeeds
    pub fn deliver_webhooks(&self, enabled: bool) {
        lock(&self.controls).deliver_webhooks = enabled;
    }

    /// Intent creations requested
    #[must_use]
    pub fn create_calls(&self) -> usize {
        lock(&self.controls).create_calls
    }

    /// Confirmations requested
    #[must_use]
    pub fn confirm_calls(&self) -> usize {
        lock(&self.controls).confirm_calls
    }

    /// Every intent created so far
    #[must_use]
    pub fn created_intents(&self) -> Vec<PaymentIntent> {
        lock(&self.controls).created.clone()
    }
}

#[async_trait]
impl PaymentProvider for FakePaymentProvider {
    async fn create_payment_intent(
        &self,
        request: CreateIntentRequest,
    ) -> Result<PaymentIntent, ProviderError> {
        {
            let mut controls = lock(&self.controls);
            controls.create_calls += 1;
            if let Some(error) = controls.creation_failure.clone() {
                return Err(error);
            }
        }

        let event_id = request.event_id();
        let amount = request
            .amount()
            .or_else(|| self.backend.price_of(event_id))
            .ok_or_else(|| ProviderError::Rejected(format!("no amount for event {event_id}")))?;
        let id = ProviderIntentId::new(format!("pi_{}", Uuid::new_v4().simple()));
        let intent = PaymentIntent {
            client_secret: format!("{id}_secret"),
            id: id.clone(),
            event_id,
            amount,
            status: IntentStatus::Pending,
        };

        self.backend.record_intent(
            id,
            LedgerEntry {
                customer: self.customer,
                event_id,
                amount,
                status: IntentStatus::Pending,
            },
        );
        lock(&self.controls).created.push(intent.clone());
        Ok(intent)
    }

    async fn confirm_payment(
        &self,
        intent: &PaymentIntent,
    ) -> Result<TerminalPaymentStatus, ProviderError> {
        let (behavior, deliver_webhooks) = {
            let mut controls = lock(&self.controls);
            controls.confirm_calls += 1;
            (controls.behavior, controls.deliver_webhooks)
        };

        let status = match behavior {
            ConfirmationBehavior::Succeed => TerminalPaymentStatus::Succeeded,
            ConfirmationBehavior::SucceedAfter(delay) => {
                tokio::time::sleep(delay).await;
                TerminalPaymentStatus::Succeeded
            },
            ConfirmationBehavior::Fail => TerminalPaymentStatus::Failed,
            ConfirmationBehavior::Cancel => TerminalPaymentStatus::Canceled,
            ConfirmationBehavior::Hang => std::future::pending().await,
        };
        self.backend.settle_intent(&intent.id, status.into());
        if deliver_webhooks && status == TerminalPaymentStatus::Succeeded {
            self.backend.deliver_webhook(&intent.id);
        }
        Ok(status)
    }
}

/// Sink that records every delivered side effect.
#[derive(Debug, Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<SideEffect>>,
    failing: Mutex<bool>,
}

impl RecordingSink {
    /// Empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every delivery fail
    pub fn set_failing(&self, failing: bool) {
        *lock(&self.failing) = failing;
    }

    /// Side effects delivered so far, in order
    #[must_use]
    pub fn delivered(&self) -> Vec<SideEffect> {
        lock(&self.delivered).clone()
    }
}

#[async_trait]
impl SideEffectSink for RecordingSink {
    async fn deliver(&self, effect: SideEffect) -> Result<(), String> {
        if *lock(&self.failing) {
            return Err("sink unavailable".to_string());
        }
        lock(&self.delivered).push(effect);
        Ok(())
    }
}

/// Preferences held in memory.
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    notice_seen: Mutex<HashSet<UserId>>,
}

impl MemoryPreferences {
    /// No preferences recorded
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PreferenceStore for MemoryPreferences {
    async fn test_mode_notice_seen(&self, user: UserId) -> bool {
        lock(&self.notice_seen).contains(&user)
    }

    async fn mark_test_mode_notice_seen(&self, user: UserId) -> Result<(), ApiError> {
        lock(&self.notice_seen).insert(user);
        Ok(())
    }
}

/// The whole set of in-memory collaborators for one viewer.
#[derive(Clone)]
pub struct InMemoryServices {
    /// Event API and payment server
    pub backend: Arc<FakeBackend>,
    /// Provider SDK
    pub provider: Arc<FakePaymentProvider>,
    /// Side-effect sink
    pub sink: Arc<RecordingSink>,
    /// Preferences
    pub preferences: Arc<MemoryPreferences>,
    /// Shared time source
    pub clock: Arc<dyn Clock>,
}

impl InMemoryServices {
    /// Collaborators for `viewer`, all reading time from `clock`
    #[must_use]
    pub fn new(viewer: UserId, clock: Arc<dyn Clock>) -> Self {
        let backend = Arc::new(FakeBackend::new(Arc::clone(&clock)));
        Self {
            provider: Arc::new(FakePaymentProvider::new(Arc::clone(&backend), viewer)),
            backend,
            sink: Arc::new(RecordingSink::new()),
            preferences: Arc::new(MemoryPreferences::new()),
            clock,
        }
    }

    /// Environment wired to these collaborators
    #[must_use]
    pub fn environment(&self) -> SessionEnvironment {
        SessionEnvironment {
            events: self.backend.clone(),
            provider: self.provider.clone(),
            payments: self.backend.clone(),
            preferences: self.preferences.clone(),
            sink: self.sink.clone(),
            clock: Arc::clone(&self.clock),
        }
    }
}
