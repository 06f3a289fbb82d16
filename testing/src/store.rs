//! In-memory record store for fast, deterministic tests.
//!
//! Implements the full [`RecordStore`] contract over hash maps, plus
//! test-only inspection helpers and an injectable per-collection failure
//! mode so cascade-failure and retry paths can be exercised without a
//! flaky backend.

use eventline_core::records::Record;
use eventline_core::store::{
    Collection, Document, FieldEquals, RecordStore, RecordStoreError, from_document, to_document,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{PoisonError, RwLock};

type Collections = HashMap<Collection, BTreeMap<String, Document>>;

/// In-memory [`RecordStore`] with failure injection.
///
/// Documents are kept in insertion-key order (`BTreeMap`) so `query`
/// results are deterministic across runs.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    collections: RwLock<Collections>,
    failing: RwLock<HashSet<Collection>>,
    failing_records: RwLock<HashSet<(Collection, String)>>,
}

impl InMemoryRecordStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call against `collection` fail with a backend error
    /// (`true`) or restore normal behavior (`false`).
    pub fn set_failing(&self, collection: Collection, failing: bool) {
        let mut set = self
            .failing
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if failing {
            set.insert(collection);
        } else {
            set.remove(&collection);
        }
    }

    /// Make every call addressing one specific record fail (`true`) or
    /// restore normal behavior (`false`). Collection-level queries are
    /// unaffected, which lets a test fail exactly one item of a batch.
    pub fn set_failing_record(&self, collection: Collection, id: &str, failing: bool) {
        let mut set = self
            .failing_records
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if failing {
            set.insert((collection, id.to_string()));
        } else {
            set.remove(&(collection, id.to_string()));
        }
    }

    fn check_failure(&self, collection: Collection) -> Result<(), RecordStoreError> {
        let failing = self
            .failing
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if failing.contains(&collection) {
            return Err(RecordStoreError::Backend(format!(
                "injected failure for collection {collection}"
            )));
        }
        Ok(())
    }

    fn check_record_failure(&self, collection: Collection, id: &str) -> Result<(), RecordStoreError> {
        self.check_failure(collection)?;
        let failing = self
            .failing_records
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if failing.contains(&(collection, id.to_string())) {
            return Err(RecordStoreError::Backend(format!(
                "injected failure for record {collection}/{id}"
            )));
        }
        Ok(())
    }

    /// Seed a typed record, bypassing failure injection.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the record cannot be converted.
    pub fn seed<T: Record>(&self, record: &T) -> Result<(), RecordStoreError> {
        let document = to_document(record)?;
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        collections
            .entry(T::COLLECTION)
            .or_default()
            .insert(record.record_id(), document);
        Ok(())
    }

    /// Read a typed record back out, bypassing failure injection.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the stored document no longer matches the
    /// record shape.
    pub fn peek<T: Record>(&self, id: &str) -> Result<Option<T>, RecordStoreError> {
        let collections = self
            .collections
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        collections
            .get(&T::COLLECTION)
            .and_then(|records| records.get(id).cloned())
            .map(from_document)
            .transpose()
    }

    /// Number of documents in a collection.
    #[must_use]
    pub fn count(&self, collection: Collection) -> usize {
        let collections = self
            .collections
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        collections.get(&collection).map_or(0, BTreeMap::len)
    }

    /// Whether a document exists.
    #[must_use]
    pub fn contains(&self, collection: Collection, id: &str) -> bool {
        let collections = self
            .collections
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        collections
            .get(&collection)
            .is_some_and(|records| records.contains_key(id))
    }

    /// Snapshot every `(id, document)` pair in a collection.
    #[must_use]
    pub fn dump(&self, collection: Collection) -> Vec<(String, Document)> {
        let collections = self
            .collections
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        collections
            .get(&collection)
            .map(|records| {
                records
                    .iter()
                    .map(|(id, doc)| (id.clone(), doc.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl RecordStore for InMemoryRecordStore {
    fn get(
        &self,
        collection: Collection,
        id: String,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Document>, RecordStoreError>> + Send + '_>> {
        Box::pin(async move {
            self.check_record_failure(collection, &id)?;
            let collections = self
                .collections
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            Ok(collections
                .get(&collection)
                .and_then(|records| records.get(&id).cloned()))
        })
    }

    fn put(
        &self,
        collection: Collection,
        id: String,
        document: Document,
    ) -> Pin<Box<dyn Future<Output = Result<(), RecordStoreError>> + Send + '_>> {
        Box::pin(async move {
            self.check_record_failure(collection, &id)?;
            let mut collections = self
                .collections
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            collections.entry(collection).or_default().insert(id, document);
            Ok(())
        })
    }

    fn update(
        &self,
        collection: Collection,
        id: String,
        patch: Document,
    ) -> Pin<Box<dyn Future<Output = Result<(), RecordStoreError>> + Send + '_>> {
        Box::pin(async move {
            self.check_record_failure(collection, &id)?;
            let mut collections = self
                .collections
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let record = collections
                .get_mut(&collection)
                .and_then(|records| records.get_mut(&id))
                .ok_or(RecordStoreError::NotFound { collection, id })?;
            for (field, value) in patch {
                record.insert(field, value);
            }
            Ok(())
        })
    }

    fn delete(
        &self,
        collection: Collection,
        id: String,
    ) -> Pin<Box<dyn Future<Output = Result<(), RecordStoreError>> + Send + '_>> {
        Box::pin(async move {
            self.check_record_failure(collection, &id)?;
            let mut collections = self
                .collections
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(records) = collections.get_mut(&collection) {
                records.remove(&id);
            }
            Ok(())
        })
    }

    fn query(
        &self,
        collection: Collection,
        conditions: Vec<FieldEquals>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<(String, Document)>, RecordStoreError>> + Send + '_>>
    {
        Box::pin(async move {
            self.check_failure(collection)?;
            let collections = self
                .collections
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            let Some(records) = collections.get(&collection) else {
                return Ok(Vec::new());
            };
            Ok(records
                .iter()
                .filter(|(_, doc)| {
                    conditions
                        .iter()
                        .all(|cond| doc.get(&cond.field) == Some(&cond.value))
                })
                .map(|(id, doc)| (id.clone(), doc.clone()))
                .collect())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(pairs: &[(&str, serde_json::Value)]) -> Document {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn get_absent_is_none() {
        let store = InMemoryRecordStore::new();
        let result = store.get(Collection::Events, "missing".to_string()).await;
        assert!(result.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = InMemoryRecordStore::new();
        store
            .put(
                Collection::Events,
                "e1".to_string(),
                doc(&[("name", json!("expo"))]),
            )
            .await
            .unwrap();
        let fetched = store
            .get(Collection::Events, "e1".to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.get("name").unwrap(), "expo");
    }

    #[tokio::test]
    async fn update_merges_top_level_fields() {
        let store = InMemoryRecordStore::new();
        store
            .put(
                Collection::Events,
                "e1".to_string(),
                doc(&[("name", json!("expo")), ("status", json!("draft"))]),
            )
            .await
            .unwrap();
        store
            .update(
                Collection::Events,
                "e1".to_string(),
                doc(&[("status", json!("published"))]),
            )
            .await
            .unwrap();

        let fetched = store
            .get(Collection::Events, "e1".to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.get("name").unwrap(), "expo");
        assert_eq!(fetched.get("status").unwrap(), "published");
    }

    #[tokio::test]
    async fn update_absent_is_not_found() {
        let store = InMemoryRecordStore::new();
        let err = store
            .update(Collection::Events, "nope".to_string(), Document::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RecordStoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn delete_absent_is_a_no_op() {
        let store = InMemoryRecordStore::new();
        assert!(
            store
                .delete(Collection::Registrations, "gone".to_string())
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn query_filters_by_all_conditions() {
        let store = InMemoryRecordStore::new();
        store
            .put(
                Collection::Registrations,
                "r1".to_string(),
                doc(&[("event_id", json!("e1")), ("status", json!("registered"))]),
            )
            .await
            .unwrap();
        store
            .put(
                Collection::Registrations,
                "r2".to_string(),
                doc(&[("event_id", json!("e1")), ("status", json!("waitlisted"))]),
            )
            .await
            .unwrap();
        store
            .put(
                Collection::Registrations,
                "r3".to_string(),
                doc(&[("event_id", json!("e2")), ("status", json!("registered"))]),
            )
            .await
            .unwrap();

        let matches = store
            .query(
                Collection::Registrations,
                vec![
                    FieldEquals::new("event_id", "e1"),
                    FieldEquals::new("status", "registered"),
                ],
            )
            .await
            .unwrap();

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].0, "r1");
    }

    #[tokio::test]
    async fn injected_failures_surface_as_backend_errors() {
        let store = InMemoryRecordStore::new();
        store.set_failing(Collection::Users, true);

        let err = store
            .get(Collection::Users, "u1".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, RecordStoreError::Backend(_)));

        // other collections are unaffected
        assert!(
            store
                .get(Collection::Events, "e1".to_string())
                .await
                .is_ok()
        );

        store.set_failing(Collection::Users, false);
        assert!(store.get(Collection::Users, "u1".to_string()).await.is_ok());
    }
}
