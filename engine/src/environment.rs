//! Shared environment for every engine service.
//!
//! Bundles the injected collaborators (record store, clock, audit sink)
//! behind typed accessors so the services read as "load, decide, save"
//! sequences. Every store call goes through the bounded timeout from
//! `eventline-runtime`.

use chrono::{DateTime, Utc};
use eventline_core::audit::{AuditEvent, AuditSink};
use eventline_core::environment::Clock;
use eventline_core::error::EngineError;
use eventline_core::records::Record;
use eventline_core::store::{
    Collection, Document, FieldEquals, RecordStore, RecordStoreError, from_document, to_document,
};
use eventline_runtime::with_timeout;
use std::sync::Arc;
use std::time::Duration;

/// Default bound on a single store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Injected dependencies shared by the engine services.
#[derive(Clone)]
pub struct EngineEnvironment {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
    store_timeout: Duration,
}

impl EngineEnvironment {
    /// Creates a new `EngineEnvironment` with the default store timeout.
    #[must_use]
    pub fn new(
        store: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            store,
            clock,
            audit,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Override the per-call store timeout.
    #[must_use]
    pub const fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// The injected clock.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Current time from the injected clock. User-facing operations read it
    /// here; background passes receive `now` from their driver instead.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Load one typed record. Absence is `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Propagates store and deserialization failures.
    pub async fn load<T: Record>(&self, id: &str) -> Result<Option<T>, EngineError> {
        let document = with_timeout(
            self.store_timeout,
            self.store.get(T::COLLECTION, id.to_string()),
        )
        .await?;
        Ok(document.map(from_document).transpose()?)
    }

    /// Create or fully replace one typed record.
    ///
    /// # Errors
    ///
    /// Propagates store and serialization failures.
    pub async fn save<T: Record>(&self, record: &T) -> Result<(), EngineError> {
        let document = to_document(record)?;
        with_timeout(
            self.store_timeout,
            self.store.put(T::COLLECTION, record.record_id(), document),
        )
        .await?;
        Ok(())
    }

    /// Merge a partial document into an existing record.
    ///
    /// # Errors
    ///
    /// `NotFound` when the record is absent; propagates store failures.
    pub async fn patch(
        &self,
        collection: Collection,
        id: String,
        patch: Document,
    ) -> Result<(), EngineError> {
        with_timeout(self.store_timeout, self.store.update(collection, id, patch)).await?;
        Ok(())
    }

    /// Delete one record. Deleting an absent record is a no-op.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn remove(&self, collection: Collection, id: String) -> Result<(), EngineError> {
        with_timeout(self.store_timeout, self.store.delete(collection, id)).await?;
        Ok(())
    }

    /// Query raw documents.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn find_raw(
        &self,
        collection: Collection,
        conditions: Vec<FieldEquals>,
    ) -> Result<Vec<(String, Document)>, EngineError> {
        let rows = with_timeout(self.store_timeout, self.store.query(collection, conditions))
            .await?;
        Ok(rows)
    }

    /// Query typed records. Documents that no longer deserialize are skipped
    /// with a warning rather than failing the whole query; the model
    /// tolerates stray data the same way it tolerates dangling references.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn find<T: Record>(
        &self,
        conditions: Vec<FieldEquals>,
    ) -> Result<Vec<T>, EngineError> {
        let rows = self.find_raw(T::COLLECTION, conditions).await?;
        let mut records = Vec::with_capacity(rows.len());
        for (id, document) in rows {
            match from_document::<T>(document) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(
                        collection = %T::COLLECTION,
                        record_id = %id,
                        error = %e,
                        "skipping undecodable document"
                    );
                }
            }
        }
        Ok(records)
    }

    /// Emit an audit event, best-effort. Sink failures are logged and never
    /// fail the operation that produced the event.
    pub async fn emit(&self, event: AuditEvent) {
        if let Err(e) = self.audit.emit(event.clone()).await {
            tracing::warn!(error = %e, ?event, "audit sink rejected event");
        }
    }
}

/// Serialize a single field value for a patch document.
///
/// # Errors
///
/// Returns `Serialization` when the value cannot be converted.
pub fn field_value<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, EngineError> {
    serde_json::to_value(value)
        .map_err(|e| EngineError::Store(RecordStoreError::Serialization(e.to_string())))
}
