//! # Screening Runtime
//!
//! The [`Store`] is the imperative shell around a reducer:
//!
//! 1. `send(action)` takes the state write lock and runs the reducer
//! 2. the returned effects are spawned on the tokio runtime
//! 3. every action an effect produces is sent back through the reducer
//! 4. once applied, that action is broadcast to observers
//!
//! Observers therefore never see an action before the state reflects it,
//! which is what lets a caller `send_and_wait_for` an outcome and then read
//! the state without racing the reducer.
//!
//! ## Example
//!
//! ```ignore
//! let store = Store::new(SessionState::default(), EventSessionReducer::new(), env);
//!
//! let outcome = store
//!     .send_and_wait_for(action, |a| a.settles(correlation_id), Duration::from_secs(30))
//!     .await?;
//!
//! let status = store.state(|s| s.rsvp.status).await;
//! ```

use futures::future::BoxFuture;
use screening_core::{effect::Effect, reducer::Reducer};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, broadcast, watch};

/// Error types for the Store runtime
pub mod error {
    use thiserror::Error;

    /// Errors that can occur during Store operations
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum StoreError {
        /// The store has been shut down and no longer accepts actions.
        ///
        /// Results of effects that complete after shutdown are discarded
        /// with this error rather than applied.
        #[error("Store is shutting down")]
        ShutdownInProgress,

        /// Shutdown gave up while effects were still running
        #[error("Shutdown timed out with {0} effects still running")]
        ShutdownTimeout(usize),

        /// No matching action arrived before the deadline
        #[error("Timeout waiting for action")]
        Timeout,

        /// The action broadcast channel closed
        #[error("Action broadcast channel closed")]
        ChannelClosed,
    }
}

pub use error::StoreError;

/// Handle returned by [`Store::send`] for waiting on the effects that one
/// action spawned directly.
///
/// Follow-up effects spawned by feedback actions are not tracked here; use
/// [`Store::wait_for_idle`] to wait for the whole cascade.
#[derive(Clone)]
pub struct EffectHandle {
    pending: Arc<AtomicUsize>,
    completion: watch::Receiver<()>,
}

impl EffectHandle {
    fn new() -> (Self, EffectTracking) {
        let pending = Arc::new(AtomicUsize::new(0));
        let (notifier, completion) = watch::channel(());
        (
            Self {
                pending: Arc::clone(&pending),
                completion,
            },
            EffectTracking { pending, notifier },
        )
    }

    /// Wait until every directly spawned effect has finished.
    pub async fn wait(&mut self) {
        while self.pending.load(Ordering::SeqCst) > 0 {
            if self.completion.changed().await.is_err() {
                break;
            }
        }
    }

    /// [`wait`](Self::wait) with a deadline.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Timeout`] if the effects are still running when
    /// `timeout` elapses.
    pub async fn wait_with_timeout(&mut self, timeout: Duration) -> Result<(), StoreError> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| StoreError::Timeout)
    }
}

impl std::fmt::Debug for EffectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectHandle")
            .field("pending_effects", &self.pending.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Counter shared between an [`EffectHandle`] and the effects it tracks.
#[derive(Clone)]
struct EffectTracking {
    pending: Arc<AtomicUsize>,
    notifier: watch::Sender<()>,
}

impl EffectTracking {
    fn increment(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _ = self.notifier.send(());
        }
    }
}

/// Decrements both the handle counter and the store-wide counter on drop,
/// so a panicking effect cannot leave a waiter hanging.
struct EffectGuard {
    tracking: EffectTracking,
    store_pending: Arc<AtomicUsize>,
}

impl Drop for EffectGuard {
    fn drop(&mut self) {
        self.tracking.decrement();
        self.store_pending.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Runtime coordinator for one reducer instance.
///
/// Cloning a store is cheap and every clone shares the same state.
pub struct Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    state: Arc<RwLock<S>>,
    reducer: Arc<R>,
    environment: Arc<E>,
    shutdown: Arc<AtomicBool>,
    pending_effects: Arc<AtomicUsize>,
    action_broadcast: broadcast::Sender<A>,
}

impl<S, A, E, R> Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E> + Send + Sync + 'static,
    A: Send + Clone + 'static,
    S: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Create a store with the default broadcast capacity (16).
    #[must_use]
    pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
        Self::with_broadcast_capacity(initial_state, reducer, environment, 16)
    }

    /// Create a store whose action broadcast buffers `capacity` actions.
    ///
    /// Observers that fall further behind than `capacity` skip actions.
    #[must_use]
    pub fn with_broadcast_capacity(
        initial_state: S,
        reducer: R,
        environment: E,
        capacity: usize,
    ) -> Self {
        let (action_broadcast, _) = broadcast::channel(capacity.max(1));

        Self {
            state: Arc::new(RwLock::new(initial_state)),
            reducer: Arc::new(reducer),
            environment: Arc::new(environment),
            shutdown: Arc::new(AtomicBool::new(false)),
            pending_effects: Arc::new(AtomicUsize::new(0)),
            action_broadcast,
        }
    }

    /// Reduce `action` and start executing the effects it returns.
    ///
    /// Returns once the reducer has run and the effects are spawned, not when
    /// the effects finish. Concurrent sends serialize on the state lock.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownInProgress`] after
    /// [`initiate_shutdown`](Self::initiate_shutdown).
    #[tracing::instrument(skip(self, action), name = "store_send")]
    pub async fn send(&self, action: A) -> Result<EffectHandle, StoreError> {
        if self.shutdown.load(Ordering::Acquire) {
            tracing::debug!("Rejected action: store is shutting down");
            metrics::counter!("store.shutdown.rejected_actions").increment(1);
            return Err(StoreError::ShutdownInProgress);
        }

        metrics::counter!("store.commands.total").increment(1);
        let (handle, tracking) = EffectHandle::new();

        let effects = {
            let mut state = self.state.write().await;
            self.reducer.reduce(&mut *state, action, &self.environment)
        };

        tracing::trace!("Reducer returned {} effects", effects.len());
        for effect in effects {
            self.execute(effect, &tracking);
        }

        Ok(handle)
    }

    /// Send `action`, then wait for the first applied action matching `predicate`.
    ///
    /// Only actions produced by effects are observed, never `action` itself.
    /// The subscription is taken before sending so a fast effect cannot be missed.
    ///
    /// # Errors
    ///
    /// - [`StoreError::ShutdownInProgress`] if the store is shutting down
    /// - [`StoreError::Timeout`] if nothing matched within `timeout`
    /// - [`StoreError::ChannelClosed`] if the broadcast channel closed
    pub async fn send_and_wait_for<F>(
        &self,
        action: A,
        predicate: F,
        timeout: Duration,
    ) -> Result<A, StoreError>
    where
        F: Fn(&A) -> bool,
    {
        let mut rx = self.action_broadcast.subscribe();
        self.send(action).await?;

        tokio::time::timeout(timeout, async {
            loop {
                match rx.recv().await {
                    Ok(action) if predicate(&action) => return Ok(action),
                    Ok(_) => {},
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Action observer lagged");
                    },
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(StoreError::ChannelClosed);
                    },
                }
            }
        })
        .await
        .map_err(|_| StoreError::Timeout)?
    }

    /// Receive every action applied from an effect result.
    #[must_use]
    pub fn subscribe_actions(&self) -> broadcast::Receiver<A> {
        self.action_broadcast.subscribe()
    }

    /// Read the state through a closure.
    pub async fn state<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&S) -> T,
    {
        let state = self.state.read().await;
        f(&*state)
    }

    /// Number of effects currently running.
    #[must_use]
    pub fn pending_effects(&self) -> usize {
        self.pending_effects.load(Ordering::Acquire)
    }

    /// Wait until no effect is running, including effects spawned by feedback actions.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Timeout`] if effects are still running after `timeout`.
    pub async fn wait_for_idle(&self, timeout: Duration) -> Result<(), StoreError> {
        let poll_interval = Duration::from_millis(5);
        tokio::time::timeout(timeout, async {
            while self.pending_effects() > 0 {
                tokio::time::sleep(poll_interval).await;
            }
        })
        .await
        .map_err(|_| StoreError::Timeout)
    }

    /// Stop accepting actions. Effects already running keep running, but the
    /// actions they produce are discarded instead of applied.
    pub fn initiate_shutdown(&self) {
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            tracing::debug!(
                pending_effects = self.pending_effects(),
                "Store shutdown initiated"
            );
            metrics::counter!("store.shutdown.initiated").increment(1);
        }
    }

    /// True once [`initiate_shutdown`](Self::initiate_shutdown) has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Initiate shutdown and wait for running effects to finish.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownTimeout`] if effects are still running after `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError> {
        self.initiate_shutdown();
        self.wait_for_idle(timeout)
            .await
            .map_err(|_| StoreError::ShutdownTimeout(self.pending_effects()))
    }

    fn execute(&self, effect: Effect<A>, tracking: &EffectTracking) {
        match effect {
            Effect::None => {
                metrics::counter!("store.effects.executed", "type" => "none").increment(1);
            },
            Effect::Parallel(effects) => {
                metrics::counter!("store.effects.executed", "type" => "parallel").increment(1);
                for effect in effects {
                    self.execute(effect, tracking);
                }
            },
            Effect::Future(fut) => {
                metrics::counter!("store.effects.executed", "type" => "future").increment(1);
                tracking.increment();
                self.pending_effects.fetch_add(1, Ordering::SeqCst);
                let guard = EffectGuard {
                    tracking: tracking.clone(),
                    store_pending: Arc::clone(&self.pending_effects),
                };

                let store = self.clone();
                tokio::spawn(store.run_future(fut, guard));
            },
        }
    }

    async fn run_future(self, fut: BoxFuture<'static, Option<A>>, guard: EffectGuard) {
        let _guard = guard;

        let Some(action) = fut.await else {
            tracing::trace!("Effect completed with no action");
            return;
        };

        // Apply first, then broadcast, so observers read a state that already
        // reflects the action.
        match self.send(action.clone()).await {
            Ok(_) => {
                let _ = self.action_broadcast.send(action);
            },
            Err(StoreError::ShutdownInProgress) => {
                tracing::debug!("Discarded effect result after shutdown");
            },
            Err(error) => {
                tracing::warn!(%error, "Failed to feed effect result back into the store");
            },
        }
    }
}

impl<S, A, E, R> Clone for Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            reducer: Arc::clone(&self.reducer),
            environment: Arc::clone(&self.environment),
            shutdown: Arc::clone(&self.shutdown),
            pending_effects: Arc::clone(&self.pending_effects),
            action_broadcast: self.action_broadcast.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use screening_core::{SmallVec, smallvec};

    #[derive(Debug, Default)]
    struct SeatState {
        taken: u32,
        confirmations: u32,
    }

    #[derive(Debug, Clone, PartialEq)]
    enum SeatAction {
        Take,
        Confirmed,
        TakeThenWait(Duration),
    }

    struct SeatReducer;

    impl Reducer for SeatReducer {
        type State = SeatState;
        type Action = SeatAction;
        type Environment = ();

        fn reduce(
            &self,
            state: &mut SeatState,
            action: SeatAction,
            _env: &(),
        ) -> SmallVec<[Effect<SeatAction>; 4]> {
            match action {
                SeatAction::Take => {
                    state.taken += 1;
                    smallvec![Effect::future(async { Some(SeatAction::Confirmed) })]
                },
                SeatAction::TakeThenWait(delay) => {
                    state.taken += 1;
                    smallvec![Effect::future(async move {
                        tokio::time::sleep(delay).await;
                        Some(SeatAction::Confirmed)
                    })]
                },
                SeatAction::Confirmed => {
                    state.confirmations += 1;
                    smallvec![Effect::None]
                },
            }
        }
    }

    #[tokio::test]
    async fn feedback_action_is_applied_before_broadcast() {
        let store = Store::new(SeatState::default(), SeatReducer, ());

        let action = store
            .send_and_wait_for(
                SeatAction::Take,
                |a| *a == SeatAction::Confirmed,
                Duration::from_secs(1),
            )
            .await
            .unwrap();

        assert_eq!(action, SeatAction::Confirmed);
        assert_eq!(store.state(|s| s.confirmations).await, 1);
    }

    #[tokio::test]
    async fn handle_waits_for_direct_effects() {
        let store = Store::new(SeatState::default(), SeatReducer, ());

        let mut handle = store
            .send(SeatAction::TakeThenWait(Duration::from_millis(20)))
            .await
            .unwrap();
        handle.wait_with_timeout(Duration::from_secs(1)).await.unwrap();
        store.wait_for_idle(Duration::from_secs(1)).await.unwrap();

        assert_eq!(store.state(|s| (s.taken, s.confirmations)).await, (1, 1));
    }

    #[tokio::test]
    async fn results_arriving_after_shutdown_are_discarded() {
        let store = Store::new(SeatState::default(), SeatReducer, ());

        store
            .send(SeatAction::TakeThenWait(Duration::from_millis(20)))
            .await
            .unwrap();
        store.initiate_shutdown();
        store.wait_for_idle(Duration::from_secs(1)).await.unwrap();

        assert_eq!(store.state(|s| (s.taken, s.confirmations)).await, (1, 0));
        assert_eq!(
            store.send(SeatAction::Take).await.unwrap_err(),
            StoreError::ShutdownInProgress
        );
    }

    #[tokio::test]
    async fn waiting_times_out_when_nothing_matches() {
        let store = Store::new(SeatState::default(), SeatReducer, ());

        let result = store
            .send_and_wait_for(
                SeatAction::Confirmed,
                |a| *a == SeatAction::Take,
                Duration::from_millis(20),
            )
            .await;

        assert_eq!(result.unwrap_err(), StoreError::Timeout);
    }
}
