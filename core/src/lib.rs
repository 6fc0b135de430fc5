//! # Screening Core
//!
//! The building blocks every feature of the RSVP engine is written against.
//!
//! - **State**: owned, cloneable data for one screen-level session
//! - **Action**: every input to a reducer, user commands and I/O results alike
//! - **Reducer**: `(State, Action, Environment) → (State, Effects)`, synchronous and pure
//! - **Effect**: a description of I/O to perform; the runtime executes it and
//!   feeds the resulting action back into the reducer
//! - **Environment**: collaborators injected behind traits
//!
//! Reducers never touch the network. A reducer that needs a server round-trip
//! returns an [`Effect::Future`](effect::Effect::Future) whose output is the
//! follow-up action (for example `MutationSucceeded` or `MutationFailed`).
//!
//! ## Example
//!
//! ```
//! use screening_core::{effect::Effect, reducer::Reducer, smallvec, SmallVec};
//!
//! #[derive(Clone, Debug, Default)]
//! struct AttendeeState {
//!     count: u32,
//! }
//!
//! #[derive(Clone, Debug)]
//! enum AttendeeAction {
//!     Joined,
//!     Left,
//! }
//!
//! struct AttendeeReducer;
//!
//! impl Reducer for AttendeeReducer {
//!     type State = AttendeeState;
//!     type Action = AttendeeAction;
//!     type Environment = ();
//!
//!     fn reduce(
//!         &self,
//!         state: &mut AttendeeState,
//!         action: AttendeeAction,
//!         _env: &(),
//!     ) -> SmallVec<[Effect<AttendeeAction>; 4]> {
//!         match action {
//!             AttendeeAction::Joined => state.count += 1,
//!             AttendeeAction::Left => state.count = state.count.saturating_sub(1),
//!         }
//!         smallvec![Effect::None]
//!     }
//! }
//!
//! let mut state = AttendeeState::default();
//! let _ = AttendeeReducer.reduce(&mut state, AttendeeAction::Joined, &());
//! assert_eq!(state.count, 1);
//! ```

pub use smallvec::{SmallVec, smallvec};

/// The reducer trait: all business logic lives here.
pub mod reducer {
    use super::SmallVec;
    use super::effect::Effect;

    /// Business logic for one feature.
    ///
    /// `reduce` validates the action, mutates the state in place and returns
    /// the effects the runtime should execute. It must not block, sleep or
    /// perform I/O; anything asynchronous belongs in an [`Effect`].
    pub trait Reducer {
        /// The state this reducer owns
        type State;

        /// Commands and events this reducer understands
        type Action;

        /// Injected collaborators
        type Environment;

        /// Reduce one action into a state change plus effects.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]>;
    }
}

/// Side-effect descriptions returned by reducers.
pub mod effect {
    use futures::future::BoxFuture;
    use std::future::Future;

    /// A side effect for the runtime to execute.
    ///
    /// Effects are values. Returning one from a reducer does nothing until
    /// the store picks it up, which keeps reducers testable without a runtime.
    pub enum Effect<Action> {
        /// Nothing to do
        None,

        /// Run every effect concurrently
        Parallel(Vec<Effect<Action>>),

        /// Run an async computation; `Some(action)` is fed back into the reducer
        Future(BoxFuture<'static, Option<Action>>),
    }

    impl<Action> Effect<Action> {
        /// Wrap an async block as an [`Effect::Future`].
        pub fn future<F>(fut: F) -> Self
        where
            F: Future<Output = Option<Action>> + Send + 'static,
        {
            Self::Future(Box::pin(fut))
        }

        /// Wrap an async block that produces no follow-up action.
        pub fn fire_and_forget<F>(fut: F) -> Self
        where
            F: Future<Output = ()> + Send + 'static,
        {
            Self::Future(Box::pin(async move {
                fut.await;
                None
            }))
        }

        /// Run effects concurrently.
        #[must_use]
        pub const fn merge(effects: Vec<Effect<Action>>) -> Self {
            Self::Parallel(effects)
        }

        /// True for [`Effect::None`] and for a `Parallel` holding only no-ops.
        #[must_use]
        pub fn is_none(&self) -> bool {
            match self {
                Self::None => true,
                Self::Parallel(effects) => effects.iter().all(Self::is_none),
                Self::Future(_) => false,
            }
        }

        /// Number of futures this effect will spawn.
        #[must_use]
        pub fn future_count(&self) -> usize {
            match self {
                Self::None => 0,
                Self::Parallel(effects) => effects.iter().map(Self::future_count).sum(),
                Self::Future(_) => 1,
            }
        }
    }

    impl<Action> std::fmt::Debug for Effect<Action> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Self::None => write!(f, "Effect::None"),
                Self::Parallel(effects) => {
                    f.debug_tuple("Effect::Parallel").field(effects).finish()
                },
                Self::Future(_) => write!(f, "Effect::Future(<future>)"),
            }
        }
    }
}

/// Dependency injection traits shared by every feature.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Source of the current time.
    ///
    /// The RSVP coordinator compares `now()` against the event start, so tests
    /// inject a fixed or manually advanced clock instead of the wall clock.
    pub trait Clock: Send + Sync {
        /// Current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall clock.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::effect::Effect;

    #[test]
    fn nested_no_ops_are_none() {
        let nested = Effect::merge(vec![Effect::None]);
        let effect: Effect<()> = Effect::merge(vec![Effect::None, nested]);
        assert!(effect.is_none());
        assert_eq!(effect.future_count(), 0);
    }

    #[test]
    fn futures_are_counted_through_parallel() {
        let effect: Effect<u8> = Effect::merge(vec![
            Effect::future(async { Some(1) }),
            Effect::None,
            Effect::merge(vec![Effect::fire_and_forget(async {})]),
        ]);
        assert!(!effect.is_none());
        assert_eq!(effect.future_count(), 2);
    }

    #[tokio::test]
    async fn fire_and_forget_yields_no_action() {
        let Effect::Future(fut) = Effect::<u8>::fire_and_forget(async {}) else {
            unreachable!("fire_and_forget always builds a future");
        };
        assert_eq!(fut.await, None);
    }
}
