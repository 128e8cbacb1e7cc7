//! JSON file record store
//!
//! Keeps every case in memory and rewrites the whole file after each
//! mutation. Writes go to a temporary sibling first and are renamed into
//! place, so a crash leaves either the old or the new file.

use async_trait::async_trait;
use rma_core::{Case, CaseId, CasePatch, MemoryStore, NewCase, RecordStore, Revision, StoreError};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// File-backed record store
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    cases: MemoryStore,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open the store at `path`, starting empty if the file does not exist
    ///
    /// # Errors
    /// `StoreError::Unavailable` if the file exists but cannot be read or
    /// parsed
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let cases: Vec<Case> = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                StoreError::Unavailable(format!("corrupt data file {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(StoreError::Unavailable(format!(
                    "cannot read {}: {e}",
                    path.display()
                )))
            }
        };
        info!(path = %path.display(), cases = cases.len(), "Opened case file");

        Ok(Self {
            path,
            cases: MemoryStore::from_cases(cases),
            write_lock: Mutex::new(()),
        })
    }

    /// Data file location
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self) -> Result<(), StoreError> {
        let unavailable = |e: std::io::Error| {
            StoreError::Unavailable(format!("cannot write {}: {e}", self.path.display()))
        };

        let json = serde_json::to_vec_pretty(&self.cases.snapshot())
            .map_err(|e| StoreError::Unavailable(format!("cannot encode cases: {e}")))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(unavailable)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await.map_err(unavailable)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(unavailable)?;
        debug!(path = %self.path.display(), cases = self.cases.len(), "Case file written");
        Ok(())
    }
}

#[async_trait]
impl RecordStore for JsonFileStore {
    async fn get(&self, id: CaseId) -> Result<Case, StoreError> {
        self.cases.get(id).await
    }

    async fn query_all(&self) -> Result<Vec<Case>, StoreError> {
        self.cases.query_all().await
    }

    async fn create(&self, new: NewCase) -> Result<Case, StoreError> {
        let _guard = self.write_lock.lock().await;
        let case = new.into_case(CaseId::new());
        self.cases.insert(case.clone());
        if let Err(e) = self.persist().await {
            self.cases.remove(case.id);
            return Err(e);
        }
        Ok(case)
    }

    async fn update(
        &self,
        id: CaseId,
        patch: CasePatch,
        expected: Option<Revision>,
    ) -> Result<Case, StoreError> {
        let _guard = self.write_lock.lock().await;
        let previous = self.cases.get(id).await?;
        let updated = self.cases.apply(id, &patch, expected)?;
        if let Err(e) = self.persist().await {
            self.cases.insert(previous);
            return Err(e);
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rma_core::Step;
    use std::collections::BTreeMap;

    fn new_case() -> NewCase {
        NewCase {
            rma_number: "RMA-20240101-4242".into(),
            created_at: Utc::now(),
            details: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("cases.json")).await.unwrap();
        assert!(store.query_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cases.json");
        std::fs::write(&path, b"{ not json").unwrap();
        let err = JsonFileStore::open(&path).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_conflict_is_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("cases.json")).await.unwrap();
        let case = store.create(new_case()).await.unwrap();
        store
            .update(case.id, CasePatch::new(Utc::now()).mark_done(Step::Received), None)
            .await
            .unwrap();

        let err = store
            .update(case.id, CasePatch::new(Utc::now()), Some(case.revision))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }
}
