//! End-to-end plan generation.
//!
//! ```text
//! files ─▶ load ─▶ upload originals ─▶ analysis pipeline ─▶ distribute
//!                                                              │
//!          save ◀─ assemble ◀─ chunk (bounded) ◀─ reconcile ◀──┘
//! ```
//!
//! Everything runs on one tokio flow. Originals are uploaded concurrently
//! and all finish before the first chunk is cut. Chunking is bounded by
//! `chunking.concurrency`; results are keyed by topic and re-sorted, so
//! the stored project never depends on task completion order.
//!
//! Expected non-page outcomes (review topics, unresolvable titles, failed
//! chunks) become topic sources; only AI, distribution, assembly and
//! persistence failures abort the run.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use study_planner_core::assembly::{assemble, AssemblyInput, Project, TopicSource};
use study_planner_core::cache::{CacheStats, PhaseCache};
use study_planner_core::distribution::DistributionPlan;
use study_planner_core::reconcile::{reconcile_topic, Reconciliation, TopicIndex};
use study_planner_core::store::{BlobStore, DocumentStore, StoredBlob};
use study_planner_core::{PageIndex, SynthesizedTopic};

use crate::ai::{AiModel, AiPhaseRunner};
use crate::chunk::{materialize, ChunkJob};
use crate::config::Config;
use crate::distribute::distribute;
use crate::error::PlanError;
use crate::extract::{load_pdf, page_index_for, LoadedSource};
use crate::pipeline::{AnalysisInput, ContentAnalysisPipeline};
use crate::progress::{band_percent, PlanPhase, PlanProgressEvent, ProgressReporter};

/// An uploaded file, in upload order.
#[derive(Debug, Clone)]
pub struct InputFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct PlanRequest {
    /// Project name; defaults to the exam name.
    pub name: Option<String>,
    pub exam_name: String,
    pub total_days: u32,
    pub user_notes: Option<String>,
    pub files: Vec<InputFile>,
}

/// External collaborators of a run.
#[derive(Clone)]
pub struct PlanServices {
    pub model: Arc<dyn AiModel>,
    pub blobs: Arc<dyn BlobStore>,
    pub documents: Arc<dyn DocumentStore>,
    /// Shared across runs; identical phase requests are answered from here.
    pub cache: Arc<PhaseCache>,
    pub progress: Arc<dyn ProgressReporter>,
    pub cancel: CancellationToken,
}

/// What a finished run reports back.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSummary {
    pub project_id: String,
    pub project: Project,
    pub quality_score: f64,
    pub chunks: usize,
    pub error_chunks: usize,
    pub fallbacks: usize,
    pub failed_pages: usize,
    pub warnings: Vec<String>,
    pub cache: CacheStats,
}

/// Run the whole pipeline and persist the resulting project.
pub async fn generate_plan(
    config: &Config,
    services: &PlanServices,
    request: PlanRequest,
) -> Result<PlanSummary, PlanError> {
    check_request(&request)?;
    let report = |phase, percent, message: String| {
        services
            .progress
            .report(PlanProgressEvent::new(phase, percent, message));
    };

    // ============ Load ============

    checkpoint(&services.cancel)?;
    let file_count = request.files.len();
    let mut sources = Vec::with_capacity(file_count);
    for (index, file) in request.files.into_iter().enumerate() {
        report(
            PlanPhase::Loading,
            band_percent(0, 5, index, file_count),
            format!("reading {}", file.name),
        );
        let name = file.name.clone();
        let loaded = tokio::task::spawn_blocking(move || load_pdf(index, &file.name, file.bytes))
            .await
            .map_err(|e| PlanError::Task(format!("loading {}: {}", name, e)))?
            .map_err(|e| PlanError::Load {
                name: name.clone(),
                message: e.to_string(),
            })?;
        sources.push(loaded);
    }
    let index = Arc::new(page_index_for(&sources));
    let failed_pages = index.failed_pages().count();
    info!(
        files = sources.len(),
        pages = index.total_markers(),
        failed_pages,
        "sources loaded"
    );

    // ============ Upload originals ============

    checkpoint(&services.cancel)?;
    report(
        PlanPhase::Uploading,
        5,
        format!("storing {} original file(s)", sources.len()),
    );
    let originals = upload_originals(services.blobs.clone(), &sources).await?;

    // ============ Analyze ============

    let runner = Arc::new(AiPhaseRunner::new(
        services.model.clone(),
        services.cache.clone(),
        &config.ai,
    ));
    let pipeline = ContentAnalysisPipeline::new(
        runner.clone(),
        config.analysis.clone(),
        services.progress.clone(),
        services.cancel.clone(),
    );
    let outcome = pipeline
        .run(&AnalysisInput {
            exam_name: &request.exam_name,
            user_notes: request.user_notes.as_deref(),
            sources: &sources,
            index: index.clone(),
        })
        .await?;
    let topics = &outcome.report.topics;

    // ============ Distribute ============

    checkpoint(&services.cancel)?;
    report(
        PlanPhase::Distribution,
        72,
        format!("placing {} topics over {} days", topics.len(), request.total_days),
    );
    let ai_runner = config.uses_ai_distribution().then(|| runner.as_ref());
    let plan = distribute(
        ai_runner,
        &config.distribution,
        &request.exam_name,
        topics,
        request.total_days,
        request.user_notes.as_deref(),
    )
    .await?;

    // ============ Reconcile and chunk ============

    checkpoint(&services.cancel)?;
    let topic_index = TopicIndex::from_topics(topics, &index);
    let mut resolver = SourceResolver {
        topics,
        plan: &plan,
        topic_index: &topic_index,
        index: &index,
        sources: &sources,
        originals: &originals,
        resolved: HashMap::new(),
        jobs: Vec::new(),
        fallbacks: 0,
    };
    for key in plan
        .days
        .iter()
        .flat_map(|d| d.topic_ids.iter())
        .chain(&plan.unassigned)
    {
        resolver.resolve(key);
    }
    let SourceResolver {
        mut resolved,
        jobs,
        fallbacks,
        ..
    } = resolver;

    let job_count = jobs.len();
    report(PlanPhase::Chunking, 78, format!("cutting {} chunks", job_count));
    let chunked = run_chunk_jobs(
        services.blobs.clone(),
        jobs,
        config.chunking.concurrency,
        &services.cancel,
        services.progress.as_ref(),
    )
    .await?;
    for (key, mut parts) in chunked {
        parts.sort_by_key(|(position, _)| *position);
        resolved
            .entry(key)
            .or_default()
            .extend(parts.into_iter().map(|(_, source)| source));
    }

    let (chunks, error_chunks) = resolved.values().flatten().fold((0, 0), |(ok, err), s| match s {
        TopicSource::Chunk { .. } => (ok + 1, err),
        TopicSource::ErrorChunk { .. } => (ok, err + 1),
        _ => (ok, err),
    });
    if error_chunks > 0 {
        warn!(error_chunks, "some chunks could not be created");
    }

    // ============ Assemble and save ============

    checkpoint(&services.cancel)?;
    let name = request
        .name
        .as_deref()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or(&request.exam_name);
    let project = assemble(AssemblyInput {
        name,
        exam_name: &request.exam_name,
        total_days: request.total_days,
        topics,
        plan: &plan,
        sources: &resolved,
    })?;

    report(PlanPhase::Saving, 95, format!("saving project {}", project.id));
    let project_id = services
        .documents
        .save_project_with_topics(&project)
        .await
        .map_err(PlanError::persistence)?;

    let mut warnings = outcome.warnings();
    if failed_pages > 0 {
        warnings.push(format!("{} pages had no extractable text", failed_pages));
    }
    let cache = services.cache.stats();
    info!(
        project = %project_id,
        topics = project.topics.len(),
        chunks,
        error_chunks,
        fallbacks,
        cache_hits = cache.hits,
        "plan generated"
    );
    report(PlanPhase::Done, 100, format!("project {} ready", project_id));

    Ok(PlanSummary {
        project_id,
        quality_score: outcome.report.quality_score,
        project,
        chunks,
        error_chunks,
        fallbacks,
        failed_pages,
        warnings,
        cache,
    })
}

fn check_request(request: &PlanRequest) -> Result<(), PlanError> {
    if request.total_days == 0 {
        return Err(PlanError::InvalidRequest(
            "total days must be at least 1".to_string(),
        ));
    }
    if request.files.is_empty() {
        return Err(PlanError::InvalidRequest(
            "at least one PDF is required".to_string(),
        ));
    }
    if request.exam_name.trim().is_empty() {
        return Err(PlanError::InvalidRequest(
            "exam name must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn checkpoint(cancel: &CancellationToken) -> Result<(), PlanError> {
    if cancel.is_cancelled() {
        return Err(PlanError::Cancelled);
    }
    Ok(())
}

/// Upload every original concurrently; results are indexed by file.
async fn upload_originals(
    blobs: Arc<dyn BlobStore>,
    sources: &[LoadedSource],
) -> Result<Vec<StoredBlob>, PlanError> {
    let mut tasks = JoinSet::new();
    for source in sources {
        let blobs = blobs.clone();
        let index = source.document.index;
        let name = source.document.name.clone();
        let bytes = source.bytes.as_ref().clone();
        tasks.spawn(async move { (index, blobs.upload(bytes, &name).await) });
    }

    let mut stored: Vec<Option<StoredBlob>> = vec![None; sources.len()];
    while let Some(joined) = tasks.join_next().await {
        let (index, result) =
            joined.map_err(|e| PlanError::Task(format!("original upload: {}", e)))?;
        let blob = result.map_err(PlanError::persistence)?;
        if let Some(slot) = stored.get_mut(index) {
            *slot = Some(blob);
        }
    }
    stored
        .into_iter()
        .enumerate()
        .map(|(i, blob)| {
            blob.ok_or_else(|| PlanError::Persistence(format!("original file {} was not stored", i)))
        })
        .collect()
}

/// A chunk job tagged with the topic key and its position among the
/// topic's sources.
struct KeyedJob {
    key: String,
    position: usize,
    job: ChunkJob,
}

/// Turns distributed topic keys into sources or pending chunk jobs.
struct SourceResolver<'a> {
    topics: &'a [SynthesizedTopic],
    plan: &'a DistributionPlan,
    topic_index: &'a TopicIndex,
    index: &'a PageIndex,
    sources: &'a [LoadedSource],
    originals: &'a [StoredBlob],
    resolved: HashMap<String, Vec<TopicSource>>,
    jobs: Vec<KeyedJob>,
    fallbacks: usize,
}

impl SourceResolver<'_> {
    fn resolve(&mut self, key: &str) {
        if self.resolved.contains_key(key) || self.jobs.iter().any(|j| j.key == key) {
            return;
        }
        let (plan, topics) = (self.plan, self.topics);
        let topic = topics.iter().find(|t| t.id == key);
        // Review status comes from the plan, not from the title.
        let (title, reconciliation) = match (plan.review(key), topic) {
            (Some(review), _) => (review.title.as_str(), Reconciliation::Review),
            (None, Some(topic)) => (
                topic.title.as_str(),
                reconcile_topic(&topic.id, self.topic_index, self.index),
            ),
            (None, None) => {
                warn!(key, "distributed topic is unknown; left without sources");
                return;
            }
        };

        match reconciliation {
            Reconciliation::Review => {
                self.resolved.insert(
                    key.to_string(),
                    vec![TopicSource::Note {
                        text: format!("{}: go back over the topics studied so far.", title),
                    }],
                );
            }
            Reconciliation::Resolved(groups) if !groups.is_empty() => {
                for (position, group) in groups.into_iter().enumerate() {
                    let Some(source) = self.sources.get(group.file_index) else {
                        continue;
                    };
                    self.jobs.push(KeyedJob {
                        key: key.to_string(),
                        position,
                        job: ChunkJob {
                            file_index: group.file_index,
                            original_name: source.document.name.clone(),
                            source: source.bytes.clone(),
                            title: title.to_string(),
                            pages: group.pages,
                        },
                    });
                }
            }
            _ => {
                self.fallbacks += 1;
                let files: BTreeSet<usize> = topic
                    .map(|t| t.page_ranges.iter().map(|r| r.file_index).collect())
                    .unwrap_or_default();
                let originals = self
                    .originals
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| files.is_empty() || files.contains(i))
                    .map(|(i, blob)| TopicSource::OriginalFile {
                        blob_id: blob.id.clone(),
                        name: blob.name.clone(),
                        file_index: i,
                    })
                    .collect();
                self.resolved.insert(key.to_string(), originals);
            }
        }
    }
}

/// Run chunk jobs with at most `concurrency` in flight.
async fn run_chunk_jobs(
    blobs: Arc<dyn BlobStore>,
    jobs: Vec<KeyedJob>,
    concurrency: usize,
    cancel: &CancellationToken,
    progress: &dyn ProgressReporter,
) -> Result<HashMap<String, Vec<(usize, TopicSource)>>, PlanError> {
    let total = jobs.len();
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for KeyedJob { key, position, job } in jobs {
        let blobs = blobs.clone();
        let semaphore = semaphore.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok()?;
            if cancel.is_cancelled() {
                return None;
            }
            Some((key, position, materialize(blobs, job).await))
        });
    }

    let mut out: HashMap<String, Vec<(usize, TopicSource)>> = HashMap::new();
    let mut done = 0;
    while let Some(joined) = tasks.join_next().await {
        let finished = joined.map_err(|e| PlanError::Task(format!("chunk task: {}", e)))?;
        let Some((key, position, source)) = finished else {
            continue;
        };
        done += 1;
        progress.report(PlanProgressEvent::new(
            PlanPhase::Chunking,
            band_percent(78, 95, done, total),
            format!("{} ({})", key, source.kind()),
        ));
        out.entry(key).or_default().push((position, source));
    }

    checkpoint(cancel)?;
    Ok(out)
}
