//! Situflow Core -- lifecycle and transition orchestration for hierarchical
//! application states ("situations").
//!
//! A situation is a screen, modal, or gameplay mode with an ordered
//! lifecycle. Situations form a tree inside a [`container::SituationContainer`];
//! exactly one root-to-leaf chain is running at a time, and the container
//! moves between chains with one transition at a time.
//!
//! # Frame Pipeline
//!
//! The host calls [`container::SituationContainer::update`] once per frame:
//!
//! 1. **Preload** -- Poll queued preload runs.
//! 2. **Transition** -- Poll the in-flight protocol once. Each phase body of
//!    the prev/next chains is polled at most once.
//! 3. **Frame hooks** -- `update` on the running chain, or on the loaded
//!    situations of the transition (plus active effects) while one is in
//!    flight.
//!
//! `late_update` and `fixed_update` only run the frame hooks.
//!
//! # Request Pattern
//!
//! Requests are validated immediately and either rejected with an error
//! handle or recorded; the work happens on later updates:
//!
//! ```rust,ignore
//! let handle = container.transition(settings, TransitionRequest::new());
//! while !handle.is_done() {
//!     container.update(dt);
//! }
//! handle.check()?;
//! ```
//!
//! # Key Types
//!
//! - [`container::SituationContainer`] -- Owns the situation tree and drives
//!   transitions and preloads.
//! - [`situation::Situation`] -- Per-situation lifecycle state machine.
//! - [`behavior::SituationBehavior`] -- Phase bodies supplied by the host.
//! - [`protocol::TransitionProtocol`] -- Phase ordering: [`protocol::OutIn`]
//!   and [`protocol::CrossFade`].
//! - [`transition::TransitionHandle`] -- Observer of one transition.
//! - [`scope::Scope`] -- Cleanup actions tied to a lifecycle segment.
//! - [`services::ServiceScope`] -- Service registry chained to the parent.

pub mod behavior;
pub mod config;
pub mod container;
pub mod effect;
pub mod error;
pub mod id;
pub mod protocol;
pub mod query;
pub mod scope;
pub mod services;
pub mod situation;
pub mod transition;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
