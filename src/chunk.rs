//! Page-subset PDF extraction ("chunks").
//!
//! [`extract_chunk`] keeps the requested pages of a source PDF and drops
//! everything else:
//!
//! 1. filter pages to `1..=page_count`, sort, de-duplicate;
//! 2. delete every other page, prune unreferenced objects, renumber;
//! 3. strip the trailer `/ID` and `/Info` so identical requests produce
//!    byte-identical files;
//! 4. save to memory and re-open to verify the page count.
//!
//! [`materialize`] runs that on the blocking pool, names the result and
//! uploads it. Failures become [`TopicSource::ErrorChunk`] so one bad file
//! never aborts a run.

use std::sync::Arc;

use lopdf::Document;
use tracing::{debug, warn};
use uuid::Uuid;

use study_planner_core::assembly::TopicSource;
use study_planner_core::chunk::{chunk_file_name, normalize_page_list, ChunkCreationError};
use study_planner_core::store::BlobStore;

/// Build a PDF holding exactly `pages` (1-based) of `source`, in ascending order.
pub fn extract_chunk(source: &[u8], pages: &[i64]) -> Result<Vec<u8>, ChunkCreationError> {
    let mut doc =
        Document::load_mem(source).map_err(|e| ChunkCreationError::InvalidPdf(e.to_string()))?;
    let all: Vec<u32> = doc.get_pages().keys().copied().collect();

    let keep = normalize_page_list(pages, all.len() as u32);
    if keep.is_empty() {
        return Err(ChunkCreationError::NoPages);
    }

    let drop: Vec<u32> = all
        .into_iter()
        .filter(|p| keep.binary_search(p).is_err())
        .collect();
    if !drop.is_empty() {
        doc.delete_pages(&drop);
    }
    doc.prune_objects();
    doc.renumber_objects();
    doc.trailer.remove(b"ID");
    doc.trailer.remove(b"Info");

    let mut out = Vec::new();
    doc.save_to(&mut out)
        .map_err(|e| ChunkCreationError::InvalidPdf(e.to_string()))?;

    let actual = Document::load_mem(&out)
        .map_err(|e| ChunkCreationError::InvalidPdf(e.to_string()))?
        .get_pages()
        .len();
    if actual != keep.len() {
        return Err(ChunkCreationError::PageCountMismatch {
            expected: keep.len(),
            actual,
        });
    }
    Ok(out)
}

/// What to cut and from where.
#[derive(Debug, Clone)]
pub struct ChunkJob {
    pub file_index: usize,
    pub original_name: String,
    pub source: Arc<Vec<u8>>,
    pub title: String,
    /// Ascending, unique local pages.
    pub pages: Vec<u32>,
}

/// Extract, name and upload one chunk. Never fails: errors become
/// [`TopicSource::ErrorChunk`].
pub async fn materialize(blobs: Arc<dyn BlobStore>, job: ChunkJob) -> TopicSource {
    let (Some(&first), Some(&last)) = (job.pages.first(), job.pages.last()) else {
        return error_chunk(&job, &ChunkCreationError::NoPages.to_string());
    };
    let name = chunk_file_name(&job.original_name, &job.title, first, last);

    let source = job.source.clone();
    let requested: Vec<i64> = job.pages.iter().map(|&p| i64::from(p)).collect();
    let extracted = tokio::task::spawn_blocking(move || extract_chunk(&source, &requested)).await;

    let bytes = match extracted {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) => {
            warn!(file = %job.original_name, topic = %job.title, error = %e, "chunk creation failed");
            return error_chunk(&job, &e.to_string());
        }
        Err(e) => {
            warn!(file = %job.original_name, topic = %job.title, error = %e, "chunk task aborted");
            return error_chunk(&job, &format!("chunk task aborted: {}", e));
        }
    };

    match blobs.upload(bytes, &name).await {
        Ok(stored) => {
            debug!(chunk = %name, blob = %stored.id, "chunk uploaded");
            TopicSource::Chunk {
                chunk_id: Uuid::new_v4().to_string(),
                blob_id: stored.id,
                name,
                file_index: job.file_index,
                page_start: first,
                page_end: last,
            }
        }
        Err(e) => {
            warn!(chunk = %name, error = %e, "chunk upload failed");
            error_chunk(&job, &format!("upload failed: {:#}", e))
        }
    }
}

fn error_chunk(job: &ChunkJob, message: &str) -> TopicSource {
    TopicSource::ErrorChunk {
        file_index: job.file_index,
        name: job.original_name.clone(),
        message: message.to_string(),
    }
}
