//! Storage abstractions for uploaded files, chunks and projects.
//!
//! Two traits split the concerns:
//!
//! | Trait | Holds | Implementations |
//! |-------|-------|-----------------|
//! | [`BlobStore`] | raw PDF bytes (originals and chunks) | [`memory::InMemoryBlobStore`], `FsBlobStore` (app) |
//! | [`DocumentStore`] | [`Project`] with its topics | [`memory::InMemoryDocumentStore`], `SqliteDocumentStore` (app) |
//!
//! Implementations must be `Send + Sync`; the orchestrator shares them
//! across tasks behind `Arc`.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::assembly::Project;

/// Handle returned by [`BlobStore::upload`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredBlob {
    /// Opaque id, the only way to reference the blob afterwards.
    pub id: String,
    pub name: String,
    pub byte_size: u64,
    pub view_url: String,
}

/// Lightweight row for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSummary {
    pub id: String,
    pub name: String,
    pub exam_name: String,
    pub total_days: u32,
    pub topic_count: usize,
    pub created_at: DateTime<Utc>,
}

impl From<&Project> for ProjectSummary {
    fn from(p: &Project) -> Self {
        Self {
            id: p.id.clone(),
            name: p.name.clone(),
            exam_name: p.exam_name.clone(),
            total_days: p.total_days,
            topic_count: p.topics.len(),
            created_at: p.created_at,
        }
    }
}

/// Byte storage for original uploads and extracted chunks.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(&self, bytes: Vec<u8>, name: &str) -> Result<StoredBlob>;

    /// Fails when the id is unknown.
    async fn download(&self, id: &str) -> Result<Vec<u8>>;

    /// Deleting an unknown id is not an error.
    async fn delete(&self, id: &str) -> Result<()>;
}

/// Persistence for assembled projects.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Store the project and all its topics atomically. Returns the project id.
    async fn save_project_with_topics(&self, project: &Project) -> Result<String>;

    async fn get_project(&self, id: &str) -> Result<Option<Project>>;

    /// Newest first.
    async fn list_projects(&self) -> Result<Vec<ProjectSummary>>;

    /// Remove the project and its topics. Returns whether it existed.
    async fn delete_project(&self, id: &str) -> Result<bool>;
}
