//! # Eventline Core
//!
//! Core traits and types for the Eventline lifecycle & consistency engine.
//!
//! The platform's presentation layer is out of scope here; this crate holds
//! the parts with real invariants:
//!
//! - **Record store abstraction**: a document store with single-record
//!   atomicity, no transactions, no referential integrity
//!   ([`store::RecordStore`])
//! - **Typed entity DTOs**: the one serialization contract per entity
//!   ([`records`])
//! - **Error taxonomy**: `NotFound`, `AlreadyRegistered`, `InvalidState`,
//!   `ValidationError`, `Forbidden`, `Conflict` ([`error::EngineError`])
//! - **Injected dependencies**: [`environment::Clock`],
//!   [`audit::AuditSink`], and the actor/role model ([`actor`])
//!
//! The engine services themselves live in `eventline-engine`; background
//! scheduling lives in `eventline-runtime`; mocks and fixtures live in
//! `eventline-testing`.

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod actor;
pub mod audit;
pub mod environment;
pub mod error;
pub mod ids;
pub mod records;
pub mod store;

pub use actor::{Actor, Role};
pub use audit::{AuditError, AuditEvent, AuditSink, NoopAuditSink};
pub use environment::{Clock, SystemClock};
pub use error::EngineError;
pub use ids::{EventId, OrgId, RegistrationId, RequestId, UserId};
pub use store::{Collection, Document, FieldEquals, RecordStore, RecordStoreError};
