//! In-memory [`BlobStore`] and [`DocumentStore`] for tests and dry runs.
//!
//! Uses `HashMap` behind `std::sync::RwLock`.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::assembly::Project;
use crate::cache::content_hash;

use super::{BlobStore, DocumentStore, ProjectSummary, StoredBlob};

struct StoredBytes {
    name: String,
    bytes: Vec<u8>,
}

/// Content-addressed blob store; ids are the first 32 hex chars of SHA-256.
#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<String, StoredBytes>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names of all stored blobs, sorted.
    pub fn names(&self) -> Vec<String> {
        let blobs = self.blobs.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = blobs.values().map(|b| b.name.clone()).collect();
        names.sort();
        names
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn upload(&self, bytes: Vec<u8>, name: &str) -> Result<StoredBlob> {
        let mut id = content_hash(&bytes);
        id.truncate(32);
        let byte_size = bytes.len() as u64;
        let mut blobs = self.blobs.write().unwrap_or_else(PoisonError::into_inner);
        blobs.entry(id.clone()).or_insert_with(|| StoredBytes {
            name: name.to_string(),
            bytes,
        });
        Ok(StoredBlob {
            view_url: format!("memory://{}", id),
            id,
            name: name.to_string(),
            byte_size,
        })
    }

    async fn download(&self, id: &str) -> Result<Vec<u8>> {
        let blobs = self.blobs.read().unwrap_or_else(PoisonError::into_inner);
        blobs
            .get(id)
            .map(|b| b.bytes.clone())
            .ok_or_else(|| anyhow!("blob not found: {}", id))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut blobs = self.blobs.write().unwrap_or_else(PoisonError::into_inner);
        blobs.remove(id);
        Ok(())
    }
}

/// Project store keeping whole projects; saving replaces by id.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    projects: RwLock<HashMap<String, Project>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn save_project_with_topics(&self, project: &Project) -> Result<String> {
        let mut projects = self.projects.write().unwrap_or_else(PoisonError::into_inner);
        projects.insert(project.id.clone(), project.clone());
        Ok(project.id.clone())
    }

    async fn get_project(&self, id: &str) -> Result<Option<Project>> {
        let projects = self.projects.read().unwrap_or_else(PoisonError::into_inner);
        Ok(projects.get(id).cloned())
    }

    async fn list_projects(&self) -> Result<Vec<ProjectSummary>> {
        let projects = self.projects.read().unwrap_or_else(PoisonError::into_inner);
        let mut rows: Vec<ProjectSummary> = projects.values().map(ProjectSummary::from).collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn delete_project(&self, id: &str) -> Result<bool> {
        let mut projects = self.projects.write().unwrap_or_else(PoisonError::into_inner);
        Ok(projects.remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_blob_roundtrip_and_dedup() {
        let store = InMemoryBlobStore::new();
        let a = store.upload(b"%PDF-a".to_vec(), "a.pdf").await.unwrap();
        let again = store.upload(b"%PDF-a".to_vec(), "copy.pdf").await.unwrap();
        assert_eq!(a.id, again.id);
        assert_eq!(a.id.len(), 32);
        assert_eq!(store.len(), 1);
        assert_eq!(store.download(&a.id).await.unwrap(), b"%PDF-a");

        store.delete(&a.id).await.unwrap();
        assert!(store.download(&a.id).await.is_err());
        store.delete("missing").await.unwrap();
    }

    #[tokio::test]
    async fn test_document_store_lifecycle() {
        let store = InMemoryDocumentStore::new();
        let project = Project {
            id: "p1".into(),
            name: "Plan".into(),
            exam_name: "Exam".into(),
            total_days: 2,
            created_at: chrono::Utc::now(),
            topics: Vec::new(),
            daily_plan: BTreeMap::from([(1, Vec::new()), (2, Vec::new())]),
            unassigned: Vec::new(),
        };
        assert_eq!(store.save_project_with_topics(&project).await.unwrap(), "p1");
        assert_eq!(store.get_project("p1").await.unwrap(), Some(project));
        assert_eq!(store.list_projects().await.unwrap().len(), 1);
        assert!(store.delete_project("p1").await.unwrap());
        assert!(!store.delete_project("p1").await.unwrap());
        assert!(store.get_project("p1").await.unwrap().is_none());
    }
}
