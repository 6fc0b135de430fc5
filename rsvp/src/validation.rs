//! Request-shape checks for the payment endpoints.
//!
//! The builders here are the only way to construct the requests the payment
//! collaborators accept, so a malformed request never reaches the network.

use crate::types::{EventId, Money, ProviderIntentId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A request failed boundary validation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// `event_id` is not a UUID
    #[error("Invalid event id: {0}")]
    InvalidEventId(String),

    /// `amount` was present but not positive
    #[error("Amount must be a positive integer")]
    NonPositiveAmount,

    /// Provider intent id is blank
    #[error("Provider intent id must not be empty")]
    EmptyIntentId,

    /// Refund reason outside the accepted set
    #[error("Invalid refund reason: {0}")]
    InvalidRefundReason(String),
}

/// Body of `createPaymentIntent`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateIntentRequest {
    event_id: EventId,
    amount: Option<Money>,
}

impl CreateIntentRequest {
    /// Parse a request from untyped input, such as a server handler's
    /// query string or a deserialized payload.
    ///
    /// `amount` may be omitted, in which case the server charges the event
    /// price; when present it must be positive. Typed callers inside the
    /// engine use [`for_event`](Self::for_event).
    ///
    /// # Errors
    ///
    /// [`ValidationError::InvalidEventId`] or [`ValidationError::NonPositiveAmount`].
    pub fn new(event_id: &str, amount: Option<u64>) -> Result<Self, ValidationError> {
        let event_id = event_id
            .parse::<EventId>()
            .map_err(|_| ValidationError::InvalidEventId(event_id.to_string()))?;
        if amount == Some(0) {
            return Err(ValidationError::NonPositiveAmount);
        }
        Ok(Self {
            event_id,
            amount: amount.map(Money::from_minor_units),
        })
    }

    /// Typed variant of [`new`](Self::new).
    ///
    /// # Errors
    ///
    /// [`ValidationError::NonPositiveAmount`] for a zero amount.
    pub fn for_event(event_id: EventId, amount: Money) -> Result<Self, ValidationError> {
        if amount.is_zero() {
            return Err(ValidationError::NonPositiveAmount);
        }
        Ok(Self {
            event_id,
            amount: Some(amount),
        })
    }

    /// Event being paid for
    #[must_use]
    pub const fn event_id(&self) -> EventId {
        self.event_id
    }

    /// Requested amount, if any
    #[must_use]
    pub const fn amount(&self) -> Option<Money> {
        self.amount
    }
}

/// Body of `syncPaymentIntent`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncIntentRequest {
    provider_intent_id: ProviderIntentId,
}

impl SyncIntentRequest {
    /// # Errors
    ///
    /// [`ValidationError::EmptyIntentId`] if the id is blank.
    pub fn new(provider_intent_id: &str) -> Result<Self, ValidationError> {
        let trimmed = provider_intent_id.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyIntentId);
        }
        Ok(Self {
            provider_intent_id: ProviderIntentId::new(trimmed),
        })
    }

    /// Intent to reconcile
    #[must_use]
    pub const fn provider_intent_id(&self) -> &ProviderIntentId {
        &self.provider_intent_id
    }
}

/// Accepted refund reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundReason {
    /// Charged twice
    Duplicate,
    /// Suspected fraud
    Fraudulent,
    /// Customer asked for it, or the seat could not be granted
    RequestedByCustomer,
}

impl RefundReason {
    /// Wire name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Duplicate => "duplicate",
            Self::Fraudulent => "fraudulent",
            Self::RequestedByCustomer => "requested_by_customer",
        }
    }
}

impl fmt::Display for RefundReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RefundReason {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "duplicate" => Ok(Self::Duplicate),
            "fraudulent" => Ok(Self::Fraudulent),
            "requested_by_customer" => Ok(Self::RequestedByCustomer),
            other => Err(ValidationError::InvalidRefundReason(other.to_string())),
        }
    }
}

/// Body of a refund request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefundRequest {
    provider_intent_id: ProviderIntentId,
    reason: RefundReason,
}

impl RefundRequest {
    /// Parse a refund request from untyped input, such as an admin tool
    /// working off the orphaned-payment queue.
    ///
    /// The engine itself builds typed requests with
    /// [`with_reason`](Self::with_reason).
    ///
    /// # Errors
    ///
    /// [`ValidationError::EmptyIntentId`] or [`ValidationError::InvalidRefundReason`].
    pub fn new(provider_intent_id: &str, reason: &str) -> Result<Self, ValidationError> {
        Self::with_reason(provider_intent_id, reason.parse()?)
    }

    /// Typed variant of [`new`](Self::new).
    ///
    /// # Errors
    ///
    /// [`ValidationError::EmptyIntentId`] if the id is blank.
    pub fn with_reason(
        provider_intent_id: &str,
        reason: RefundReason,
    ) -> Result<Self, ValidationError> {
        let sync = SyncIntentRequest::new(provider_intent_id)?;
        Ok(Self {
            provider_intent_id: sync.provider_intent_id,
            reason,
        })
    }

    /// Intent to refund
    #[must_use]
    pub const fn provider_intent_id(&self) -> &ProviderIntentId {
        &self.provider_intent_id
    }

    /// Why
    #[must_use]
    pub const fn reason(&self) -> RefundReason {
        self.reason
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn create_intent_requires_uuid_event_id() {
        let err = CreateIntentRequest::new("not-a-uuid", Some(500)).unwrap_err();
        assert_eq!(err, ValidationError::InvalidEventId("not-a-uuid".into()));

        let id = EventId::new();
        let request = CreateIntentRequest::new(&id.to_string(), Some(500)).unwrap();
        assert_eq!(request.event_id(), id);
        assert_eq!(request.amount(), Some(Money::from_minor_units(500)));
    }

    #[test]
    fn create_intent_amount_is_optional_but_positive() {
        let id = EventId::new().to_string();
        assert_eq!(CreateIntentRequest::new(&id, None).unwrap().amount(), None);
        assert_eq!(
            CreateIntentRequest::new(&id, Some(0)).unwrap_err(),
            ValidationError::NonPositiveAmount
        );
        assert_eq!(
            CreateIntentRequest::for_event(EventId::new(), Money::ZERO).unwrap_err(),
            ValidationError::NonPositiveAmount
        );
    }

    #[test]
    fn sync_rejects_blank_intent_ids() {
        assert_eq!(SyncIntentRequest::new("").unwrap_err(), ValidationError::EmptyIntentId);
        assert_eq!(SyncIntentRequest::new("   ").unwrap_err(), ValidationError::EmptyIntentId);
        assert_eq!(
            SyncIntentRequest::new(" pi_123 ").unwrap().provider_intent_id().as_str(),
            "pi_123"
        );
    }

    #[test]
    fn refund_reason_is_restricted() {
        let request = RefundRequest::new("pi_123", "requested_by_customer").unwrap();
        assert_eq!(request.reason(), RefundReason::RequestedByCustomer);
        assert_eq!("duplicate".parse::<RefundReason>().unwrap(), RefundReason::Duplicate);
        assert_eq!(
            RefundRequest::new("pi_123", "changed_my_mind").unwrap_err(),
            ValidationError::InvalidRefundReason("changed_my_mind".into())
        );
    }
}
