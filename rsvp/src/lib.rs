//! # Screening RSVP
//!
//! The client-side RSVP and payment reconciliation engine for screening
//! events. It turns a viewer's attendance intent into a confirmed RSVP,
//! involves the payment provider when the event costs money, and reconciles
//! the local optimistic state with the server when the payment webhook is
//! late or lost.
//!
//! # Architecture
//!
//! ```text
//!   UI ──► EventSession ──► Store ──► EventSessionReducer
//!                                         │
//!           ┌──────────────┬──────────────┼──────────────┐
//!           ▼              ▼              ▼              ▼
//!       snapshot      coordinator      payment     reconciliation
//!      (Event API)   (optimistic RSVP) (provider)  (sync, orphans)
//! ```
//!
//! All components share one [`SessionState`](state::SessionState) per event
//! screen. Network calls happen only inside effects, whose results come
//! back as actions.
//!
//! ## Flow for a paid `going`
//!
//! ```text
//! request_status(going) ─► EnterAmount? ─► AcknowledgeTestMode? ─► Confirm(intent)
//! confirm_payment() ─► optimistic going ─► server confirms ─► refresh
//!                   └─► sync with server (webhook fallback)
//! ```
//!
//! # Example
//!
//! ```ignore
//! let session = EventSession::open(viewer, env, &EngineConfig::from_env()).await;
//! session.load(event_id).await?;
//!
//! match session.request_status(RsvpStatus::Going).await? {
//!     RsvpOutcome::Confirmed(status) => println!("now {status}"),
//!     RsvpOutcome::PaymentRequired(step) => show_payment_sheet(step),
//!     RsvpOutcome::Unchanged(_) => {},
//! }
//! ```

#![forbid(unsafe_code)]

pub mod actions;
pub mod config;
pub mod coordinator;
pub mod environment;
pub mod error;
pub mod fakes;
pub mod payment;
pub mod reconciliation;
pub mod reducer;
pub mod session;
pub mod snapshot;
pub mod state;
pub mod types;
pub mod validation;

pub use actions::{PaymentStep, RsvpOutcome, SessionAction, SessionOutcome};
pub use config::{EngineConfig, OrphanPolicy, PaymentConfig};
pub use environment::{
    EventApi, PaymentProvider, PaymentServer, PreferenceStore, SessionEnvironment, SideEffect,
    SideEffectSink,
};
pub use error::{ApiError, EngineError, ProviderError};
pub use reconciliation::{OrphanedPayment, ReconciliationStatus, RefundState};
pub use reducer::EventSessionReducer;
pub use session::EventSession;
pub use state::SessionState;
pub use types::{
    CorrelationId, Event, EventId, IntentStatus, Money, PaymentIntent, PaymentRecord, PricingMode,
    ProviderIntentId, RecordStatus, RsvpStatus, UserId,
};
