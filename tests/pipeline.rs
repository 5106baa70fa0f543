mod common;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use common::{numbered_pdf, page_count, PhaseRouter};
use study_planner::config::Config;
use study_planner::error::PlanError;
use study_planner::generate::{generate_plan, InputFile, PlanRequest, PlanServices};
use study_planner::progress::{NoProgress, PlanPhase, PlanProgressEvent, ProgressReporter};
use study_planner::purge::{purge_project, PurgeSummary};
use study_planner_core::assembly::{Project, Topic, TopicSource};
use study_planner_core::cache::PhaseCache;
use study_planner_core::store::memory::{InMemoryBlobStore, InMemoryDocumentStore};
use study_planner_core::store::{BlobStore, DocumentStore, StoredBlob};

fn test_config() -> Config {
    let mut config = Config::minimal();
    config.ai.provider = "gemini".to_string();
    config.ai.model = Some("test".to_string());
    config.ai.max_retries = 0;
    config.ai.retry_backoff_ms = 0;
    config.analysis.pages_per_batch = 12;
    config.analysis.concurrency = 2;
    config
}

fn page_analyses(total: u32) -> Value {
    let pages: Vec<Value> = (1..=total)
        .map(|m| {
            json!({
                "pageMarker": m,
                "topicsCovered": [format!("concept {}", m)],
                "importance": "high",
                "difficulty": "intermediate",
                "conceptDensity": "medium",
                "estimatedStudyTimeMinutes": 6
            })
        })
        .collect();
    json!({
        "pageAnalyses": pages,
        "globalStructure": {"subject": "Law", "summary": "Civil law", "mainThemes": ["contracts", "torts"]}
    })
}

/// Replies for a single 20-page file split into Contracts (1-10) and Torts (11-20).
fn law_replies(daily_plan: Value) -> Vec<(&'static str, Value)> {
    split_replies("Contracts", "Torts", daily_plan)
}

/// Replies for a single 20-page file split into `first` (1-10) and
/// `second` (11-20), synthesized as `topic-1` and `topic-2`.
fn split_replies(first: &str, second: &str, daily_plan: Value) -> Vec<(&'static str, Value)> {
    vec![
        (
            "index_search",
            json!({"tableOfContents": [
                {"title": first, "startMarkerGuess": 1},
                {"title": second, "startMarkerGuess": 11}
            ]}),
        ),
        ("page_analysis", page_analyses(20)),
        (
            "topic_synthesis",
            json!({"topics": [
                {"title": first, "description": "Formation and breach", "startMarker": 1, "endMarker": 10,
                 "priority": "high", "difficulty": "intermediate", "estimatedHours": 2, "keyConcepts": ["offer"]},
                {"title": second, "description": "Liability", "startMarker": 11, "endMarker": 20,
                 "priority": "medium", "difficulty": "advanced", "estimatedHours": 2, "keyConcepts": ["negligence"]}
            ]}),
        ),
        ("validation", json!({"optimizedTopics": []})),
        ("distribution", daily_plan),
    ]
}

fn chunk_span(topic: &Topic) -> (usize, u32, u32) {
    match topic.sources.as_slice() {
        [TopicSource::Chunk {
            file_index,
            page_start,
            page_end,
            ..
        }] => (*file_index, *page_start, *page_end),
        other => panic!("expected one chunk for {}, got {:?}", topic.title, other),
    }
}

struct Harness {
    model: Arc<PhaseRouter>,
    blobs: Arc<InMemoryBlobStore>,
    documents: Arc<InMemoryDocumentStore>,
    services: PlanServices,
}

fn harness(replies: &[(&str, Value)]) -> Harness {
    let model = PhaseRouter::new(replies);
    let blobs = Arc::new(InMemoryBlobStore::new());
    let documents = Arc::new(InMemoryDocumentStore::new());
    let services = PlanServices {
        model: model.clone(),
        blobs: blobs.clone(),
        documents: documents.clone(),
        cache: Arc::new(PhaseCache::new()),
        progress: Arc::new(NoProgress),
        cancel: CancellationToken::new(),
    };
    Harness {
        model,
        blobs,
        documents,
        services,
    }
}

fn request(days: u32, files: Vec<(&str, Vec<u8>)>) -> PlanRequest {
    PlanRequest {
        name: None,
        exam_name: "Private Law".to_string(),
        total_days: days,
        user_notes: None,
        files: files
            .into_iter()
            .map(|(name, bytes)| InputFile {
                name: name.to_string(),
                bytes,
            })
            .collect(),
    }
}

fn topic<'a>(project: &'a Project, title: &str) -> &'a Topic {
    project
        .topics
        .iter()
        .find(|t| t.title == title)
        .unwrap_or_else(|| panic!("topic {} missing", title))
}

#[tokio::test]
async fn test_twenty_pages_over_five_days() {
    let plan = json!({"dailyPlan": [
        {"day": 1, "topics": ["topic-1"]},
        {"day": 2, "topics": [{"id": "topic-2", "title": "Torts"}]},
        {"day": 5, "topics": [{"title": "Ripasso generale"}]}
    ]});
    let h = harness(&law_replies(plan));
    let summary = generate_plan(
        &test_config(),
        &h.services,
        request(5, vec![("Civil.pdf", numbered_pdf(20))]),
    )
    .await
    .unwrap();

    let project = &summary.project;
    assert_eq!(project.name, "Private Law");
    assert_eq!(project.daily_plan.len(), 5);
    assert!(project.unassigned.is_empty());

    let contracts = topic(project, "Contracts");
    assert_eq!((contracts.day, contracts.order_in_day), (Some(1), Some(0)));
    assert_eq!(contracts.sources.len(), 1);
    match &contracts.sources[0] {
        TopicSource::Chunk {
            blob_id,
            name,
            file_index,
            page_start,
            page_end,
            ..
        } => {
            assert_eq!((*file_index, *page_start, *page_end), (0, 1, 10));
            assert_eq!(name, "Civil_Contracts_p1-10.pdf");
            let bytes = h.blobs.download(blob_id).await.unwrap();
            assert_eq!(page_count(&bytes), 10);
        }
        other => panic!("expected chunk, got {:?}", other),
    }

    let torts = topic(project, "Torts");
    assert_eq!(torts.day, Some(2));
    assert!(matches!(
        torts.sources.as_slice(),
        [TopicSource::Chunk { page_start: 11, page_end: 20, .. }]
    ));

    let review = topic(project, "Ripasso generale");
    assert!(review.is_review);
    assert_eq!(review.day, Some(5));
    assert!(matches!(review.sources.as_slice(), [TopicSource::Note { .. }]));

    assert_eq!(summary.chunks, 2);
    assert_eq!(summary.error_chunks, 0);
    assert_eq!(summary.fallbacks, 0);
    // original + two chunks
    assert_eq!(h.blobs.len(), 3);

    let stored = h.documents.get_project(&summary.project_id).await.unwrap();
    assert_eq!(stored.as_ref(), Some(project));
}

#[tokio::test]
async fn test_single_file_is_attached_to_index_search() {
    let plan = json!({"dailyPlan": [{"day": 1, "topics": ["topic-1", "topic-2"]}]});
    let h = harness(&law_replies(plan));
    generate_plan(
        &test_config(),
        &h.services,
        request(1, vec![("Civil.pdf", numbered_pdf(20))]),
    )
    .await
    .unwrap();

    let requests = h.model.requests();
    let index = requests.iter().find(|r| r.phase == "index_search").unwrap();
    assert_eq!(
        index.attachment.as_ref().map(|a| a.mime_type.as_str()),
        Some("application/pdf")
    );
    assert!(requests
        .iter()
        .filter(|r| r.phase != "index_search")
        .all(|r| r.attachment.is_none()));
    assert_eq!(h.model.calls("page_analysis"), 2);
}

#[tokio::test]
async fn test_second_run_is_served_from_cache() {
    let plan = json!({"dailyPlan": [{"day": 1, "topics": ["topic-1"]}, {"day": 2, "topics": ["topic-2"]}]});
    let h = harness(&law_replies(plan));
    let config = test_config();

    let first = generate_plan(&config, &h.services, request(2, vec![("Civil.pdf", numbered_pdf(20))]))
        .await
        .unwrap();
    let calls = h.model.requests().len();
    assert_eq!(calls, 6);

    let second = generate_plan(&config, &h.services, request(2, vec![("Civil.pdf", numbered_pdf(20))]))
        .await
        .unwrap();
    assert_eq!(h.model.requests().len(), calls);
    assert_ne!(first.project_id, second.project_id);
    assert_eq!(second.cache.hits, 6);
    assert_eq!(h.documents.list_projects().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_unplaced_topic_is_unassigned() {
    let plan = json!({"dailyPlan": [{"day": 1, "topics": ["topic-1"]}]});
    let h = harness(&law_replies(plan));
    let summary = generate_plan(
        &test_config(),
        &h.services,
        request(3, vec![("Civil.pdf", numbered_pdf(20))]),
    )
    .await
    .unwrap();

    let project = &summary.project;
    assert_eq!(project.unassigned.len(), 1);
    let torts = topic(project, "Torts");
    assert_eq!(torts.day, None);
    assert_eq!(project.unassigned[0], torts.id);
    assert!(project.topics_for_day(2).is_empty());
    assert!(project.topics_for_day(3).is_empty());
}

#[tokio::test]
async fn test_balanced_mode_across_two_files() {
    let replies = vec![
        ("index_search", json!({"tableOfContents": [{"title": "Obligations", "startMarkerGuess": 1}]})),
        ("page_analysis", page_analyses(8)),
        (
            "topic_synthesis",
            json!({"topics": [
                {"title": "Obligations", "startMarker": 1, "endMarker": 6, "estimatedHours": 2},
                {"title": "Property", "startMarker": 7, "endMarker": 8, "estimatedHours": 2}
            ]}),
        ),
        ("validation", json!({"optimizedTopics": []})),
    ];
    let h = harness(&replies);
    let mut config = test_config();
    config.distribution.mode = "balanced".to_string();
    config.distribution.review_days = 1;

    let summary = generate_plan(
        &config,
        &h.services,
        request(3, vec![("a.pdf", numbered_pdf(4)), ("b.pdf", numbered_pdf(4))]),
    )
    .await
    .unwrap();

    assert_eq!(h.model.calls("distribution"), 0);
    let index = h
        .model
        .requests()
        .into_iter()
        .find(|r| r.phase == "index_search")
        .unwrap();
    assert!(index.attachment.is_none());

    let project = &summary.project;
    let obligations = topic(project, "Obligations");
    assert_eq!(obligations.day, Some(1));
    let spans: Vec<(usize, u32, u32)> = obligations
        .sources
        .iter()
        .map(|s| match s {
            TopicSource::Chunk {
                file_index,
                page_start,
                page_end,
                ..
            } => (*file_index, *page_start, *page_end),
            other => panic!("expected chunk, got {:?}", other),
        })
        .collect();
    assert_eq!(spans, vec![(0, 1, 4), (1, 1, 2)]);

    assert_eq!(topic(project, "Property").day, Some(2));
    let reviews: Vec<&Topic> = project.topics_for_day(3);
    assert_eq!(reviews.len(), 1);
    assert!(reviews[0].is_review);
}

#[tokio::test]
async fn test_phase_failure_aborts_without_saving() {
    let mut replies = law_replies(json!({"dailyPlan": []}));
    replies.retain(|(phase, _)| *phase != "topic_synthesis");
    let h = harness(&replies);

    let err = generate_plan(
        &test_config(),
        &h.services,
        request(2, vec![("Civil.pdf", numbered_pdf(20))]),
    )
    .await
    .unwrap_err();
    match err {
        PlanError::AiPhase(e) => assert_eq!(e.phase, "topic_synthesis"),
        other => panic!("expected AI phase error, got {:?}", other),
    }
    assert!(h.documents.list_projects().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_distribution_without_any_placement_is_fatal() {
    let plan = json!({"dailyPlan": [{"day": 1, "topics": ["nonexistent"]}]});
    let h = harness(&law_replies(plan));
    let err = generate_plan(
        &test_config(),
        &h.services,
        request(2, vec![("Civil.pdf", numbered_pdf(20))]),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, PlanError::Distribution(_)));
}

#[tokio::test]
async fn test_request_validation_and_load_errors() {
    let h = harness(&[]);
    let config = test_config();

    let err = generate_plan(&config, &h.services, request(0, vec![("a.pdf", numbered_pdf(1))]))
        .await
        .unwrap_err();
    assert!(matches!(err, PlanError::InvalidRequest(_)));

    let err = generate_plan(&config, &h.services, request(2, vec![]))
        .await
        .unwrap_err();
    assert!(matches!(err, PlanError::InvalidRequest(_)));

    let err = generate_plan(&config, &h.services, request(2, vec![("notes.pdf", b"plain text".to_vec())]))
        .await
        .unwrap_err();
    match err {
        PlanError::Load { name, .. } => assert_eq!(name, "notes.pdf"),
        other => panic!("expected load error, got {:?}", other),
    }
    assert!(h.model.requests().is_empty());
}

#[tokio::test]
async fn test_cancelled_run_makes_no_calls() {
    let h = harness(&law_replies(json!({"dailyPlan": []})));
    h.services.cancel.cancel();
    let err = generate_plan(
        &test_config(),
        &h.services,
        request(2, vec![("Civil.pdf", numbered_pdf(20))]),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, PlanError::Cancelled));
    assert!(h.model.requests().is_empty());
    assert!(h.blobs.is_empty());
}

#[tokio::test]
async fn test_repeated_titles_keep_their_own_pages() {
    let plan = json!({"dailyPlan": [
        {"day": 1, "topics": ["topic-1"]},
        {"day": 2, "topics": ["topic-2"]}
    ]});
    let h = harness(&split_replies("Introduzione", "Introduzione", plan));
    let summary = generate_plan(
        &test_config(),
        &h.services,
        request(2, vec![("Civil.pdf", numbered_pdf(20))]),
    )
    .await
    .unwrap();

    let project = &summary.project;
    let day_one = project.topics_for_day(1);
    let day_two = project.topics_for_day(2);
    assert_eq!(chunk_span(day_one[0]), (0, 1, 10));
    assert_eq!(chunk_span(day_two[0]), (0, 11, 20));
    assert_eq!(summary.chunks, 2);
    assert_eq!(summary.fallbacks, 0);
}

#[tokio::test]
async fn test_review_word_in_content_title_still_gets_pages() {
    let plan = json!({"dailyPlan": [
        {"day": 1, "topics": ["topic-1"]},
        {"day": 2, "topics": ["topic-2"]},
        {"day": 3, "topics": [{"title": "Ripasso generale"}]}
    ]});
    let h = harness(&split_replies("Basics", "Peer review process", plan));
    let summary = generate_plan(
        &test_config(),
        &h.services,
        request(3, vec![("Civil.pdf", numbered_pdf(20))]),
    )
    .await
    .unwrap();

    let project = &summary.project;
    let peer = topic(project, "Peer review process");
    assert!(!peer.is_review);
    assert_eq!(chunk_span(peer), (0, 11, 20));
    assert!(topic(project, "Ripasso generale").is_review);
    assert_eq!(summary.chunks, 2);
}

/// Blob store that refuses uploads whose name contains `refuse`.
struct RefusingBlobStore {
    inner: InMemoryBlobStore,
    refuse: &'static str,
}

#[async_trait]
impl BlobStore for RefusingBlobStore {
    async fn upload(&self, bytes: Vec<u8>, name: &str) -> anyhow::Result<StoredBlob> {
        if name.contains(self.refuse) {
            anyhow::bail!("disk full");
        }
        self.inner.upload(bytes, name).await
    }

    async fn download(&self, id: &str) -> anyhow::Result<Vec<u8>> {
        self.inner.download(id).await
    }

    async fn delete(&self, id: &str) -> anyhow::Result<()> {
        self.inner.delete(id).await
    }
}

#[tokio::test]
async fn test_failed_chunk_upload_becomes_error_chunk() {
    let plan = json!({"dailyPlan": [{"day": 1, "topics": ["topic-1", "topic-2"]}]});
    let mut h = harness(&law_replies(plan));
    h.services.blobs = Arc::new(RefusingBlobStore {
        inner: InMemoryBlobStore::new(),
        refuse: "Torts",
    });

    let summary = generate_plan(
        &test_config(),
        &h.services,
        request(1, vec![("Civil.pdf", numbered_pdf(20))]),
    )
    .await
    .unwrap();

    assert_eq!((summary.chunks, summary.error_chunks), (1, 1));
    let project = &summary.project;
    assert_eq!(chunk_span(topic(project, "Contracts")), (0, 1, 10));
    match topic(project, "Torts").sources.as_slice() {
        [TopicSource::ErrorChunk {
            file_index,
            name,
            message,
        }] => {
            assert_eq!(*file_index, 0);
            assert_eq!(name, "Civil.pdf");
            assert!(message.contains("disk full"), "{}", message);
        }
        other => panic!("expected error chunk, got {:?}", other),
    }
    assert!(h
        .documents
        .get_project(&summary.project_id)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_failed_original_upload_aborts_run() {
    let plan = json!({"dailyPlan": [{"day": 1, "topics": ["topic-1"]}]});
    let mut h = harness(&law_replies(plan));
    h.services.blobs = Arc::new(RefusingBlobStore {
        inner: InMemoryBlobStore::new(),
        refuse: "Civil.pdf",
    });

    let err = generate_plan(
        &test_config(),
        &h.services,
        request(1, vec![("Civil.pdf", numbered_pdf(20))]),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, PlanError::Persistence(_)), "{:?}", err);
    assert!(h.model.requests().is_empty());
}

#[tokio::test]
async fn test_purge_keeps_blobs_shared_with_other_projects() {
    let plan = json!({"dailyPlan": [{"day": 1, "topics": ["topic-1", "topic-2"]}]});
    let h = harness(&law_replies(plan));
    let config = test_config();
    let first = generate_plan(&config, &h.services, request(1, vec![("Civil.pdf", numbered_pdf(20))]))
        .await
        .unwrap();
    let second = generate_plan(&config, &h.services, request(1, vec![("Civil.pdf", numbered_pdf(20))]))
        .await
        .unwrap();
    // one original plus two chunks, shared by content
    assert_eq!(h.blobs.len(), 3);

    let purged = purge_project(h.documents.as_ref(), h.blobs.as_ref(), &first.project_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(purged, PurgeSummary { blobs_deleted: 0, blobs_kept: 2 });
    assert_eq!(h.blobs.len(), 3);

    let purged = purge_project(h.documents.as_ref(), h.blobs.as_ref(), &second.project_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(purged, PurgeSummary { blobs_deleted: 2, blobs_kept: 0 });
    // the unreferenced original stays
    assert_eq!(h.blobs.len(), 1);
    assert!(h.documents.list_projects().await.unwrap().is_empty());

    let missing = purge_project(h.documents.as_ref(), h.blobs.as_ref(), &first.project_id)
        .await
        .unwrap();
    assert!(missing.is_none());
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<PlanProgressEvent>>,
}

impl ProgressReporter for Recorder {
    fn report(&self, event: PlanProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[tokio::test]
async fn test_progress_reaches_done() {
    let plan = json!({"dailyPlan": [{"day": 1, "topics": ["topic-1", "topic-2"]}]});
    let mut h = harness(&law_replies(plan));
    let recorder = Arc::new(Recorder::default());
    h.services.progress = recorder.clone();

    generate_plan(
        &test_config(),
        &h.services,
        request(1, vec![("Civil.pdf", numbered_pdf(20))]),
    )
    .await
    .unwrap();

    let events = recorder.events.lock().unwrap();
    let percents: Vec<u8> = events.iter().map(|e| e.percent).collect();
    assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{:?}", percents);
    let last = events.last().unwrap();
    assert_eq!((last.phase, last.percent), (PlanPhase::Done, 100));
    assert!(events.iter().any(|e| e.phase == PlanPhase::PageAnalysis));
    assert!(events.iter().any(|e| e.phase == PlanPhase::Chunking));
}
