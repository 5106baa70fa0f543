//! Project deletion with blob cleanup.
//!
//! Blobs are content-addressed, so two projects cut from the same PDF
//! share chunk and original ids. Deleting a project therefore removes only
//! the blobs no remaining project references. Originals that no topic
//! source ever referenced are not tracked by any project and stay in the
//! blob store; re-uploading the same file reuses them.

use std::collections::HashSet;

use anyhow::Result;
use tracing::{debug, info};

use study_planner_core::store::{BlobStore, DocumentStore};

/// Outcome of [`purge_project`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurgeSummary {
    pub blobs_deleted: usize,
    pub blobs_kept: usize,
}

/// Delete project `id` and every blob only it referenced.
///
/// Returns `None` when the project does not exist. Rows are deleted before
/// blobs, so a failure half way leaves unreferenced blobs, never a project
/// pointing at missing bytes.
pub async fn purge_project(
    documents: &dyn DocumentStore,
    blobs: &dyn BlobStore,
    id: &str,
) -> Result<Option<PurgeSummary>> {
    let Some(project) = documents.get_project(id).await? else {
        return Ok(None);
    };
    let owned: Vec<String> = project.blob_ids().into_iter().map(String::from).collect();
    if !documents.delete_project(id).await? {
        return Ok(None);
    }

    let mut still_used: HashSet<String> = HashSet::new();
    for summary in documents.list_projects().await? {
        if let Some(other) = documents.get_project(&summary.id).await? {
            still_used.extend(other.blob_ids().into_iter().map(String::from));
        }
    }

    let mut summary = PurgeSummary {
        blobs_deleted: 0,
        blobs_kept: 0,
    };
    for blob_id in &owned {
        if still_used.contains(blob_id) {
            debug!(blob = %blob_id, "blob shared with another project; kept");
            summary.blobs_kept += 1;
        } else {
            blobs.delete(blob_id).await?;
            summary.blobs_deleted += 1;
        }
    }
    info!(
        project = %id,
        deleted = summary.blobs_deleted,
        kept = summary.blobs_kept,
        "project purged"
    );
    Ok(Some(summary))
}
