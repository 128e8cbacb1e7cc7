//! Record store abstraction
//!
//! The engine treats persistence as an external keyed document store. The
//! contract:
//! - `get` / `query_all` return owned snapshots
//! - `create` assigns the id
//! - `update` applies a [`CasePatch`] atomically through [`Case::apply`],
//!   optionally only if the stored revision still matches

use crate::case::{Case, CaseId, CasePatch, NewCase, Revision};
use crate::error::StoreError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt;

/// Keyed case document store
#[async_trait]
pub trait RecordStore: Send + Sync + fmt::Debug {
    /// Fetch one case
    async fn get(&self, id: CaseId) -> Result<Case, StoreError>;

    /// Fetch every case
    async fn query_all(&self) -> Result<Vec<Case>, StoreError>;

    /// Insert a new case in step-0 state
    async fn create(&self, new: NewCase) -> Result<Case, StoreError>;

    /// Apply a patch and return the updated case
    ///
    /// With `expected = Some(rev)` the write only happens if the stored
    /// revision is still `rev`; otherwise `StoreError::Conflict`.
    async fn update(
        &self,
        id: CaseId,
        patch: CasePatch,
        expected: Option<Revision>,
    ) -> Result<Case, StoreError>;
}

/// In-memory store
///
/// Each update holds the shard lock for its case while checking the
/// revision and applying the patch, which makes conditional writes atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    cases: DashMap<CaseId, Case>,
}

impl MemoryStore {
    /// Create empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create store holding `cases`
    #[must_use]
    pub fn from_cases(cases: impl IntoIterator<Item = Case>) -> Self {
        let store = Self::new();
        for case in cases {
            store.insert(case);
        }
        store
    }

    /// Insert or replace a case as-is
    pub fn insert(&self, case: Case) {
        self.cases.insert(case.id, case);
    }

    /// Drop a case, returning it if present
    pub fn remove(&self, id: CaseId) -> Option<Case> {
        self.cases.remove(&id).map(|(_, case)| case)
    }

    /// All cases, oldest first
    #[must_use]
    pub fn snapshot(&self) -> Vec<Case> {
        let mut cases: Vec<Case> = self.cases.iter().map(|e| e.value().clone()).collect();
        cases.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        cases
    }

    /// Number of cases
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.cases.len()
    }

    /// Whether the store is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    /// Synchronous form of [`RecordStore::update`]
    ///
    /// # Errors
    /// - `StoreError::NotFound` for an unknown id
    /// - `StoreError::Conflict` on revision mismatch
    /// - `StoreError::Rejected` if the patch breaks an invariant
    pub fn apply(
        &self,
        id: CaseId,
        patch: &CasePatch,
        expected: Option<Revision>,
    ) -> Result<Case, StoreError> {
        let mut entry = self.cases.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if let Some(expected) = expected {
            if entry.revision != expected {
                return Err(StoreError::Conflict {
                    case_id: id,
                    expected,
                    actual: entry.revision,
                });
            }
        }
        entry.apply(patch).map_err(StoreError::Rejected)?;
        Ok(entry.clone())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get(&self, id: CaseId) -> Result<Case, StoreError> {
        self.cases
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(StoreError::NotFound(id))
    }

    async fn query_all(&self) -> Result<Vec<Case>, StoreError> {
        Ok(self.snapshot())
    }

    async fn create(&self, new: NewCase) -> Result<Case, StoreError> {
        let case = new.into_case(CaseId::new());
        self.insert(case.clone());
        Ok(case)
    }

    async fn update(
        &self,
        id: CaseId,
        patch: CasePatch,
        expected: Option<Revision>,
    ) -> Result<Case, StoreError> {
        self.apply(id, &patch, expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::Step;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn new_case() -> NewCase {
        NewCase {
            rma_number: "RMA-20240101-1000".into(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            details: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn create_then_get() {
        let store = MemoryStore::new();
        let created = store.create(new_case()).await.unwrap();
        let fetched = store.get(created.id).await.unwrap();
        assert_eq!(created, fetched);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn get_unknown_is_not_found() {
        let store = MemoryStore::new();
        let id = CaseId::new();
        assert_eq!(store.get(id).await.unwrap_err(), StoreError::NotFound(id));
    }

    #[tokio::test]
    async fn conditional_update_detects_stale_revision() {
        let store = MemoryStore::new();
        let case = store.create(new_case()).await.unwrap();
        let now = Utc::now();

        let first = store
            .update(case.id, CasePatch::new(now).mark_done(Step::Received), Some(case.revision))
            .await
            .unwrap();
        assert_eq!(first.revision, Revision(1));

        let stale = store
            .update(case.id, CasePatch::new(now), Some(case.revision))
            .await
            .unwrap_err();
        assert!(matches!(stale, StoreError::Conflict { actual: Revision(1), .. }));
    }

    #[tokio::test]
    async fn rejected_patch_is_not_stored() {
        let store = MemoryStore::new();
        let case = store.create(new_case()).await.unwrap();
        let err = store
            .update(case.id, CasePatch::new(Utc::now()).mark_done(Step::Dispatched), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));
        assert_eq!(store.get(case.id).await.unwrap(), case);
    }
}
