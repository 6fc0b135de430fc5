//! Domain types for screening events, RSVPs and payments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a screening event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(Uuid);

impl EventId {
    /// Generates a new random `EventId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an `EventId` from an existing UUID
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EventId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// The signed-in viewer, as issued by the identity provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(Uuid);

impl UserId {
    /// Generates a new random `UserId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a `UserId` from an existing UUID
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correlates a user-initiated command with the outcome it settles into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generate a new correlation ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The payment provider's identifier for one payment intent (e.g. `pi_3Nx...`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderIntentId(String);

impl ProviderIntentId {
    /// Wraps a provider identifier
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderIntentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Money
// ============================================================================

/// An amount in minor currency units (cents)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Money(u64);

impl Money {
    /// Zero
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from minor units
    #[must_use]
    pub const fn from_minor_units(units: u64) -> Self {
        Self(units)
    }

    /// Returns the amount in minor units
    #[must_use]
    pub const fn minor_units(&self) -> u64 {
        self.0
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// ============================================================================
// Event
// ============================================================================

/// A screening event as last read from the server.
///
/// Externally owned; the engine only ever replaces its copy wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Event ID
    pub id: EventId,
    /// Title shown to attendees
    pub title: String,
    /// Start time; RSVPs close once it is reached
    pub date: DateTime<Utc>,
    /// Venue
    pub location: String,
    /// Maximum number of `going` attendees
    pub max_capacity: u32,
    /// Current number of `going` attendees
    pub attendee_count: u32,
    /// Price in minor units, 0 = free. A suggestion when `pay_what_you_can`.
    pub price: Money,
    /// Pay-what-you-can pricing
    pub pay_what_you_can: bool,
    /// Lowest accepted amount for pay-what-you-can events
    pub min_price: Option<Money>,
}

impl Event {
    /// Pricing as a single tagged value; see [`PricingMode`].
    #[must_use]
    pub fn pricing(&self) -> PricingMode {
        PricingMode::from_event(self)
    }

    /// True once the event has started.
    #[must_use]
    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        now >= self.date
    }

    /// Seats still available according to this snapshot.
    #[must_use]
    pub const fn spots_left(&self) -> u32 {
        self.max_capacity.saturating_sub(self.attendee_count)
    }
}

/// How attendance is priced, derived once per snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PricingMode {
    /// No payment required
    Free,
    /// The attendee pays exactly this amount
    Fixed(Money),
    /// The attendee picks an amount of at least `minimum`
    PayWhatYouCan {
        /// Lowest accepted amount
        minimum: Money,
        /// Amount offered as the default
        suggested: Money,
    },
}

impl PricingMode {
    /// Classify an event.
    ///
    /// A zero price is free even when the pay-what-you-can flag is set, and a
    /// minimum above the suggested price is clamped to the suggested price.
    #[must_use]
    pub fn from_event(event: &Event) -> Self {
        if event.price.is_zero() {
            Self::Free
        } else if event.pay_what_you_can {
            let minimum = event.min_price.unwrap_or(Money::ZERO).min(event.price);
            Self::PayWhatYouCan {
                minimum,
                suggested: event.price,
            }
        } else {
            Self::Fixed(event.price)
        }
    }

    /// Whether `going` has to be unlocked by a payment
    #[must_use]
    pub const fn requires_payment(&self) -> bool {
        !matches!(self, Self::Free)
    }
}

// ============================================================================
// RSVP
// ============================================================================

/// The viewer's attendance intent for one event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RsvpStatus {
    /// No RSVP recorded yet
    #[default]
    None,
    /// Interested
    Interested,
    /// Going
    Going,
    /// Not going
    NotGoing,
}

impl RsvpStatus {
    /// All statuses, in declaration order
    pub const ALL: [Self; 4] = [Self::None, Self::Interested, Self::Going, Self::NotGoing];

    /// Wire name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Interested => "interested",
            Self::Going => "going",
            Self::NotGoing => "not_going",
        }
    }
}

impl fmt::Display for RsvpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server acknowledgement of an RSVP mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsvpReceipt {
    /// Status the server recorded
    pub status: RsvpStatus,
    /// Attendee count after the write
    pub attendee_count: u32,
}

// ============================================================================
// Payments
// ============================================================================

/// Lifecycle of a client-held payment intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    /// Created, not yet confirmed
    Pending,
    /// Needs further customer action (e.g. 3-D Secure)
    RequiresAction,
    /// Charged
    Succeeded,
    /// Declined or timed out
    Failed,
    /// Abandoned by the customer
    Canceled,
}

impl IntentStatus {
    /// Succeeded, failed and canceled are terminal
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

/// Terminal result of client-side confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalPaymentStatus {
    /// Charged
    Succeeded,
    /// Declined, errored or timed out
    Failed,
    /// Abandoned by the customer
    Canceled,
}

impl From<TerminalPaymentStatus> for IntentStatus {
    fn from(status: TerminalPaymentStatus) -> Self {
        match status {
            TerminalPaymentStatus::Succeeded => Self::Succeeded,
            TerminalPaymentStatus::Failed => Self::Failed,
            TerminalPaymentStatus::Canceled => Self::Canceled,
        }
    }
}

impl fmt::Display for TerminalPaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        })
    }
}

/// One attempted charge. Created fresh for every attempt and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    /// Provider identifier
    pub id: ProviderIntentId,
    /// Event being paid for
    pub event_id: EventId,
    /// Amount to charge
    pub amount: Money,
    /// Current status
    pub status: IntentStatus,
    /// Secret the provider SDK needs to confirm the intent on the client
    pub client_secret: String,
}

/// Status of a server-side payment record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Provider has not settled yet
    Pending,
    /// Charged
    Succeeded,
    /// Refunded after charging
    Refunded,
    /// Charge failed
    Failed,
}

/// Durable server record of a payment, materialized by the provider webhook
/// or by an explicit sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    /// Record ID
    pub id: Uuid,
    /// Event paid for
    pub event_id: EventId,
    /// Provider intent this record mirrors
    pub provider_intent_id: ProviderIntentId,
    /// Amount charged
    pub amount: Money,
    /// Current status
    pub status: RecordStatus,
    /// When the server created the record
    pub created_at: DateTime<Utc>,
}

impl PaymentRecord {
    /// True for a succeeded record of `event_id`
    #[must_use]
    pub fn unlocks(&self, event_id: EventId) -> bool {
        self.event_id == event_id && self.status == RecordStatus::Succeeded
    }
}
