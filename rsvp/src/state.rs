//! State owned by one screen-level event session.

use crate::config::{OrphanPolicy, PaymentConfig};
use crate::coordinator::OptimisticUpdate;
use crate::error::EngineError;
use crate::payment::PaymentPhase;
use crate::reconciliation::OrphanedPayment;
use crate::types::{
    Event, EventId, PaymentIntent, PaymentRecord, PricingMode, ProviderIntentId, RecordStatus,
    RsvpStatus, UserId,
};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Everything one event screen knows.
///
/// Nothing here is shared with other sessions; the server is the only
/// source of truth they have in common.
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Signed-in user
    pub viewer: UserId,
    /// Event this session is bound to, set by the first `load`
    pub event_id: Option<EventId>,
    /// Last consistent server read of the event
    pub snapshot: Option<Event>,
    /// Event requested by the latest `load` still in flight
    pub pending_load: Option<EventId>,
    /// Orders snapshot reads
    pub snapshot_version: SnapshotVersion,
    /// RSVP coordinator state
    pub rsvp: RsvpState,
    /// Payment orchestrator state
    pub payment: PaymentState,
    /// Reconciliation state
    pub reconciliation: ReconciliationState,
}

impl SessionState {
    /// Fresh session for `viewer`.
    #[must_use]
    pub fn new(viewer: UserId, settings: PaymentSettings) -> Self {
        Self {
            viewer,
            event_id: None,
            snapshot: None,
            pending_load: None,
            snapshot_version: SnapshotVersion::default(),
            rsvp: RsvpState::default(),
            payment: PaymentState {
                phase: PaymentPhase::Idle,
                settings,
            },
            reconciliation: ReconciliationState::default(),
        }
    }

    /// Pricing of the loaded event
    #[must_use]
    pub fn pricing(&self) -> Option<PricingMode> {
        self.snapshot.as_ref().map(Event::pricing)
    }

    /// True once the loaded event has started
    #[must_use]
    pub fn is_closed(&self, now: DateTime<Utc>) -> bool {
        self.snapshot.as_ref().is_some_and(|event| event.has_started(now))
    }

    /// Whether the viewer already paid for the loaded event.
    ///
    /// Either the server holds a succeeded record, or this session watched a
    /// charge succeed that has not been refunded since.
    #[must_use]
    pub fn is_paid(&self) -> bool {
        let Some(event_id) = self.event_id else {
            return false;
        };
        self.reconciliation.records.iter().any(|r| r.unlocks(event_id))
            || self
                .reconciliation
                .paid_intents
                .iter()
                .any(|intent| intent.event_id == event_id)
    }

    /// Whether any RSVP or payment I/O is outstanding
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        self.rsvp.in_flight.is_some() || self.payment.phase.is_busy()
    }
}

/// Sequence numbers for snapshot reads.
///
/// Every fetch takes a number when it is issued; a response is applied only
/// if no later read has been applied already.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotVersion {
    issued: u64,
    applied: u64,
}

impl SnapshotVersion {
    /// Number for a new read
    pub const fn issue(&mut self) -> u64 {
        self.issued += 1;
        self.issued
    }

    /// Record `sequence` as applied unless a later read already was.
    pub const fn accept(&mut self, sequence: u64) -> bool {
        if sequence > self.applied {
            self.applied = sequence;
            true
        } else {
            false
        }
    }

    /// Start over for a newly bound event, whose first read is `sequence`.
    pub const fn rebind(&mut self, sequence: u64) {
        self.applied = sequence;
    }

    /// Latest applied read
    #[must_use]
    pub const fn applied(&self) -> u64 {
        self.applied
    }
}

/// RSVP coordinator state
#[derive(Debug, Clone, Default)]
pub struct RsvpState {
    /// Locally observed status, optimistic while a mutation is in flight
    pub status: RsvpStatus,
    /// The one mutation allowed in flight
    pub in_flight: Option<OptimisticUpdate>,
    /// Failure of the last mutation, cleared by the next one
    pub last_error: Option<EngineError>,
}

/// Payment orchestrator state
#[derive(Debug, Clone)]
pub struct PaymentState {
    /// Where the current flow is
    pub phase: PaymentPhase,
    /// Settings and persisted preferences
    pub settings: PaymentSettings,
}

/// Payment configuration plus the viewer's persisted preference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentSettings {
    /// Provider runs in test mode
    pub test_mode: bool,
    /// Viewer already dismissed the test-mode advisory
    pub notice_seen: bool,
    /// Bound on client-side confirmation
    pub confirmation_timeout: Duration,
    /// Compensation for orphaned payments
    pub orphan_policy: OrphanPolicy,
}

impl PaymentSettings {
    /// Combine configuration with the persisted advisory flag.
    #[must_use]
    pub const fn new(config: &PaymentConfig, notice_seen: bool) -> Self {
        Self {
            test_mode: config.test_mode,
            notice_seen,
            confirmation_timeout: config.confirmation_timeout,
            orphan_policy: config.orphan_policy,
        }
    }

    /// Whether the advisory must be shown before creating an intent
    #[must_use]
    pub const fn needs_notice(&self) -> bool {
        self.test_mode && !self.notice_seen
    }
}

impl Default for PaymentSettings {
    fn default() -> Self {
        Self::new(&PaymentConfig::default(), false)
    }
}

/// Reconciliation state
#[derive(Debug, Clone, Default)]
pub struct ReconciliationState {
    /// Server payment records known to this session
    pub records: Vec<PaymentRecord>,
    /// Charges this session saw succeed on the client
    pub paid_intents: Vec<PaymentIntent>,
    /// Sync calls in flight, one entry per call
    pub syncing: Vec<ProviderIntentId>,
    /// Charges whose RSVP could not be granted (admin queue)
    pub orphaned: Vec<OrphanedPayment>,
    /// Last swallowed sync failure
    pub last_sync_error: Option<EngineError>,
}

impl ReconciliationState {
    /// Insert or replace the record for the same provider intent.
    ///
    /// A refunded record is never downgraded by a late sync result.
    pub fn upsert(&mut self, record: PaymentRecord) {
        match self
            .records
            .iter_mut()
            .find(|existing| existing.provider_intent_id == record.provider_intent_id)
        {
            Some(existing)
                if existing.status == RecordStatus::Refunded
                    && record.status != RecordStatus::Refunded => {},
            Some(existing) => *existing = record,
            None => self.records.push(record),
        }
    }

    /// Most recent charge for `event_id`, client-observed first.
    #[must_use]
    pub fn latest_intent_for(&self, event_id: EventId) -> Option<ProviderIntentId> {
        self.paid_intents
            .iter()
            .rev()
            .find(|intent| intent.event_id == event_id)
            .map(|intent| intent.id.clone())
            .or_else(|| {
                self.records
                    .iter()
                    .filter(|record| record.event_id == event_id)
                    .max_by_key(|record| record.created_at)
                    .map(|record| record.provider_intent_id.clone())
            })
    }

    pub(crate) fn finish_sync(&mut self, intent_id: &ProviderIntentId) {
        if let Some(position) = self.syncing.iter().position(|id| id == intent_id) {
            self.syncing.remove(position);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Money;
    use screening_testing::test_epoch;
    use uuid::Uuid;

    fn record(intent: &str, status: RecordStatus) -> PaymentRecord {
        PaymentRecord {
            id: Uuid::new_v4(),
            event_id: EventId::new(),
            provider_intent_id: ProviderIntentId::new(intent),
            amount: Money::from_minor_units(500),
            status,
            created_at: test_epoch(),
        }
    }

    #[test]
    fn snapshot_reads_apply_in_issue_order() {
        let mut version = SnapshotVersion::default();
        let first = version.issue();
        let second = version.issue();

        assert!(version.accept(second));
        assert!(!version.accept(first));
        assert!(!version.accept(second));
        assert_eq!(version.applied(), second);

        version.rebind(first);
        assert!(version.accept(second));
    }

    #[test]
    fn upsert_replaces_by_intent_id() {
        let mut state = ReconciliationState::default();
        state.upsert(record("pi_1", RecordStatus::Pending));
        state.upsert(record("pi_1", RecordStatus::Succeeded));
        state.upsert(record("pi_2", RecordStatus::Failed));

        assert_eq!(state.records.len(), 2);
        assert_eq!(state.records[0].status, RecordStatus::Succeeded);
    }

    #[test]
    fn refunded_records_are_not_downgraded() {
        let mut state = ReconciliationState::default();
        state.upsert(record("pi_1", RecordStatus::Refunded));
        state.upsert(record("pi_1", RecordStatus::Succeeded));

        assert_eq!(state.records.len(), 1);
        assert_eq!(state.records[0].status, RecordStatus::Refunded);
    }

    #[test]
    fn notice_is_only_needed_in_test_mode() {
        let mut settings = PaymentSettings::default();
        assert!(!settings.needs_notice());
        settings.test_mode = true;
        assert!(settings.needs_notice());
        settings.notice_seen = true;
        assert!(!settings.needs_notice());
    }

    #[test]
    fn finish_sync_removes_one_entry() {
        let mut state = ReconciliationState::default();
        let id = ProviderIntentId::new("pi_1");
        state.syncing = vec![id.clone(), id.clone()];
        state.finish_sync(&id);
        assert_eq!(state.syncing.len(), 1);
    }
}
