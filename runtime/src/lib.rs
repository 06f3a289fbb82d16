//! # Eventline Runtime
//!
//! Background plumbing for the Eventline lifecycle engine:
//!
//! - [`ticker::PeriodicTask`]: drives the consistency sweep, deletion
//!   processor, and reconciliation job on fixed intervals with an explicit
//!   skip-on-overlap policy
//! - [`retry`]: exponential backoff for transient store failures
//! - [`timeout::with_timeout`]: bounded store-call deadlines
//! - [`metrics`]: metric names and registration via the `metrics` facade
//!
//! None of this crate contains domain logic; the engine services in
//! `eventline-engine` stay pure "read, decide, write" sequences and are
//! scheduled and hardened from here.

pub mod metrics;
pub mod retry;
pub mod ticker;
pub mod timeout;

pub use retry::{RetryPolicy, retry_with_backoff, retry_with_predicate, transient_store_error};
pub use ticker::PeriodicTask;
pub use timeout::with_timeout;
