//! In-memory implementation of the Store trait.
//!
//! Same semantics as SQLite without persistence. Used by tests and by
//! short-lived tools.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use arcanum_core::{Envelope, Identifier, ObjectType};
use async_trait::async_trait;

use crate::error::{Result, StoreError};
use crate::traits::{HeadSwap, InsertResult, Store};

/// In-memory store. Thread-safe via RwLock.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    objects: HashMap<Identifier, Envelope>,
    /// Insertion order, for `list_by_type`.
    order: Vec<Identifier>,
    heads: HashMap<String, Identifier>,
}

impl MemoryStoreInner {
    fn insert(&mut self, envelope: &Envelope) -> InsertResult {
        if self.objects.contains_key(&envelope.id) {
            return InsertResult::AlreadyExists;
        }
        self.objects.insert(envelope.id, envelope.clone());
        self.order.push(envelope.id);
        InsertResult::Inserted
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn put(&self, envelope: &Envelope) -> Result<InsertResult> {
        Ok(self.write()?.insert(envelope))
    }

    async fn put_batch(&self, envelopes: &[Envelope]) -> Result<Vec<InsertResult>> {
        let mut inner = self.write()?;
        Ok(envelopes.iter().map(|env| inner.insert(env)).collect())
    }

    async fn get(&self, id: &Identifier) -> Result<Option<Envelope>> {
        Ok(self.read()?.objects.get(id).cloned())
    }

    async fn contains(&self, id: &Identifier) -> Result<bool> {
        Ok(self.read()?.objects.contains_key(id))
    }

    async fn list_by_type(&self, object_type: ObjectType) -> Result<Vec<Envelope>> {
        let inner = self.read()?;
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.objects.get(id))
            .filter(|env| env.object_type() == object_type)
            .cloned()
            .collect())
    }

    async fn keyring_head(&self, scope: &str) -> Result<Option<Identifier>> {
        Ok(self.read()?.heads.get(scope).copied())
    }

    async fn swap_keyring_head(
        &self,
        scope: &str,
        expected: Option<Identifier>,
        new: Identifier,
        envelopes: &[Envelope],
    ) -> Result<HeadSwap> {
        let mut inner = self.write()?;
        let actual = inner.heads.get(scope).copied();
        if actual != expected {
            return Ok(HeadSwap::Stale { actual });
        }
        for envelope in envelopes {
            inner.insert(envelope);
        }
        inner.heads.insert(scope.to_string(), new);
        Ok(HeadSwap::Swapped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arcanum_core::{Org, Project, SigningKeypair};

    fn org_envelope(name: &str) -> Envelope {
        Envelope::seal(Org::new(name), &SigningKeypair::from_seed(&[7; 32]), None).unwrap()
    }

    #[tokio::test]
    async fn test_put_get_idempotent() {
        let store = MemoryStore::new();
        let env = org_envelope("acme");

        assert_eq!(store.put(&env).await.unwrap(), InsertResult::Inserted);
        assert_eq!(store.put(&env).await.unwrap(), InsertResult::AlreadyExists);
        assert_eq!(store.get(&env.id).await.unwrap(), Some(env.clone()));
        assert!(store.contains(&env.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_by_type_in_insertion_order() {
        let store = MemoryStore::new();
        let a = org_envelope("a");
        let b = org_envelope("b");
        let project = Envelope::seal(
            Project::new("web", a.id),
            &SigningKeypair::from_seed(&[7; 32]),
            None,
        )
        .unwrap();
        for env in [&b, &project, &a] {
            store.put(env).await.unwrap();
        }

        let orgs = store.list_by_type(ObjectType::Org).await.unwrap();
        assert_eq!(orgs, vec![b, a]);
    }

    #[tokio::test]
    async fn test_put_batch_reports_each_insert() {
        let store = MemoryStore::new();
        let a = org_envelope("a");
        let b = org_envelope("b");
        store.put(&a).await.unwrap();

        let results = store.put_batch(&[a.clone(), b.clone()]).await.unwrap();
        assert_eq!(results, vec![InsertResult::AlreadyExists, InsertResult::Inserted]);
        assert_eq!(store.list_by_type(ObjectType::Org).await.unwrap(), vec![a, b]);
    }

    #[tokio::test]
    async fn test_swap_keyring_head() {
        let store = MemoryStore::new();
        let first = org_envelope("first");
        let second = org_envelope("second");

        let swap = store
            .swap_keyring_head("scope", None, first.id, std::slice::from_ref(&first))
            .await
            .unwrap();
        assert_eq!(swap, HeadSwap::Swapped);

        let stale = store
            .swap_keyring_head("scope", None, second.id, std::slice::from_ref(&second))
            .await
            .unwrap();
        assert_eq!(stale, HeadSwap::Stale { actual: Some(first.id) });
        assert!(!store.contains(&second.id).await.unwrap());
        assert_eq!(store.keyring_head("scope").await.unwrap(), Some(first.id));
    }
}
