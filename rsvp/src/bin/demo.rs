//! RSVP engine demo
//!
//! Walks through the four core flows against in-memory collaborators:
//!
//! - A: free event, `going` without a payment call
//! - B: fixed-price event, charge then RSVP then reconciliation
//! - C: pay-what-you-can event, amount below the minimum rejected
//! - D: full event, charge succeeds but the RSVP is refused
//!
//! # Usage
//!
//! ```bash
//! RUST_LOG=screening_rsvp=debug cargo run --bin rsvp-demo
//! ```

use chrono::{Duration, Utc};
use screening_core::environment::SystemClock;
use screening_rsvp::fakes::InMemoryServices;
use screening_rsvp::{
    EngineConfig, EngineError, Event, EventId, EventSession, Money, PaymentStep, RsvpOutcome,
    RsvpStatus, UserId,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn screening(title: &str, price: u64, pay_what_you_can: bool, min_price: Option<u64>) -> Event {
    Event {
        id: EventId::new(),
        title: title.to_string(),
        date: Utc::now() + Duration::days(7),
        location: "Community hall".to_string(),
        max_capacity: 40,
        attendee_count: 12,
        price: Money::from_minor_units(price),
        pay_what_you_can,
        min_price: min_price.map(Money::from_minor_units),
    }
}

struct Demo {
    services: InMemoryServices,
    viewer: UserId,
    config: EngineConfig,
}

impl Demo {
    async fn session_for(&self, event: &Event) -> anyhow::Result<EventSession> {
        self.services.backend.add_event(event.clone());
        let session =
            EventSession::open(self.viewer, self.services.environment(), &self.config).await;
        let loaded = session.load(event.id).await?;
        println!(
            "Loaded '{}' (price {}, {} spots left)",
            loaded.title,
            loaded.price,
            loaded.spots_left()
        );
        Ok(session)
    }

    async fn free_event(&self) -> anyhow::Result<()> {
        println!("\n=== A: free event ===");
        let event = screening("Metropolis", 0, false, None);
        let session = self.session_for(&event).await?;

        let outcome = session.request_status(RsvpStatus::Going).await?;
        println!(">>> going: {outcome:?}");
        if let Some(event) = session.event().await {
            println!("Attendees now {}", event.attendee_count);
        }
        println!("Provider calls: {}", self.services.provider.create_calls());
        session.close();
        Ok(())
    }

    async fn fixed_price(&self) -> anyhow::Result<()> {
        println!("\n=== B: fixed-price event ===");
        let event = screening("Nosferatu", 500, false, None);
        let session = self.session_for(&event).await?;

        let outcome = session.request_status(RsvpStatus::Going).await?;
        println!(">>> going: {outcome:?}");
        if let RsvpOutcome::PaymentRequired(PaymentStep::AcknowledgeTestMode { amount }) = outcome {
            println!("Test mode advisory for {amount}, dismissing");
            session.acknowledge_test_mode_notice().await?;
        }

        let outcome = session.confirm_payment().await?;
        println!(">>> confirm: {outcome:?}");
        session.settle(std::time::Duration::from_secs(5)).await?;
        println!("Reconciliation: {:?}", session.reconciliation().await);
        for record in session.payment_records().await {
            println!(
                "Record {} for {}: {:?}",
                record.provider_intent_id, record.amount, record.status
            );
        }
        session.close();
        Ok(())
    }

    async fn pay_what_you_can(&self) -> anyhow::Result<()> {
        println!("\n=== C: pay what you can ===");
        let event = screening("The General", 1000, true, Some(200));
        let session = self.session_for(&event).await?;

        let outcome = session.request_status(RsvpStatus::Going).await?;
        println!(">>> going: {outcome:?}");

        match session.submit_amount(Money::from_minor_units(150)).await {
            Err(error) => println!(">>> 1.50 refused: {error}"),
            Ok(outcome) => println!(">>> 1.50 accepted?! {outcome:?}"),
        }
        let outcome = session.submit_amount(Money::from_minor_units(300)).await?;
        println!(">>> 3.00: {outcome:?}");

        session.cancel_payment().await?;
        println!("Flow canceled, status {}", session.status().await);
        session.close();
        Ok(())
    }

    async fn full_house(&self) -> anyhow::Result<()> {
        println!("\n=== D: paid event at capacity ===");
        let mut event = screening("Sunrise", 800, false, None);
        event.attendee_count = event.max_capacity;
        let session = self.session_for(&event).await?;

        session.request_status(RsvpStatus::Going).await?;
        match session.confirm_payment().await {
            Err(EngineError::CapacityFull) => {
                println!(">>> confirm: capacity full, RSVP rolled back");
            },
            other => println!(">>> confirm: {other:?}"),
        }
        session.settle(std::time::Duration::from_secs(5)).await?;

        println!("Status {}", session.status().await);
        for orphan in session.orphaned_payments().await {
            println!(
                "Orphaned charge {} of {} ({}), refund {:?}",
                orphan.intent_id, orphan.amount, orphan.reason, orphan.refund
            );
        }
        session.close();
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "screening_rsvp=info,screening_runtime=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = EngineConfig::from_env();
    tracing::info!(
        test_mode = config.payments.test_mode,
        orphan_policy = ?config.payments.orphan_policy,
        "Configuration loaded"
    );

    let viewer = UserId::new();
    let demo = Demo {
        services: InMemoryServices::new(viewer, Arc::new(SystemClock)),
        viewer,
        config,
    };

    demo.free_event().await?;
    demo.fixed_price().await?;
    demo.pay_what_you_can().await?;
    demo.full_house().await?;

    println!("\n=== Side effects delivered ===");
    for effect in demo.services.sink.delivered() {
        println!("  {effect:?}");
    }
    Ok(())
}
