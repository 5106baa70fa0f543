//! The four-phase content analysis pipeline.
//!
//! ```text
//!  sources + page index
//!        │
//!        ▼
//!  1. index search ──────▶ table of contents (coarse TOC)
//!        │
//!        ▼
//!  2. page analysis ─────▶ one analysis per marker   (batched, bounded)
//!        │
//!        ▼
//!  3. topic synthesis ───▶ repaired topics with page ranges
//!        │
//!        ▼
//!  4. validation ────────▶ clamped, merged, scored, optimized topics
//! ```
//!
//! Phases run strictly in order and each consumes the previous output.
//! Only phase 2 fans out: batches run under a [`Semaphore`] and are
//! collected from a [`JoinSet`], then merged by marker so arrival order
//! never matters. The cancellation token is checked before every phase
//! and before every batch.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use study_planner_core::analysis::{
    apply_optimizations, decode_index_search, decode_page_batch, decode_synthesis,
    empty_synthesis, merge_page_analyses, plan_batches, validate_topics, BatchAnalysis,
    PageAnalysisResult, SynthesisResult, TocEntry, ValidationReport, PHASE_INDEX_SEARCH,
    PHASE_PAGE_ANALYSIS, PHASE_SYNTHESIS, PHASE_VALIDATION,
};
use study_planner_core::PageIndex;

use crate::ai::{AiPhaseRunner, Attachment, PhaseCall};
use crate::config::AnalysisConfig;
use crate::error::PlanError;
use crate::extract::LoadedSource;
use crate::progress::{band_percent, PlanPhase, PlanProgressEvent, ProgressReporter};
use crate::prompts;

/// Characters per page sent to index search when no PDF is attached.
const TOC_CHARS_PER_PAGE: usize = 400;

/// Everything the pipeline reads.
pub struct AnalysisInput<'a> {
    pub exam_name: &'a str,
    pub user_notes: Option<&'a str>,
    pub sources: &'a [LoadedSource],
    pub index: Arc<PageIndex>,
}

/// Output of all four phases.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub table_of_contents: Vec<TocEntry>,
    pub analyses: PageAnalysisResult,
    pub synthesis: SynthesisResult,
    pub report: ValidationReport,
}

impl AnalysisOutcome {
    /// Warnings of every phase, in phase order.
    pub fn warnings(&self) -> Vec<String> {
        self.analyses
            .warnings
            .iter()
            .chain(&self.synthesis.warnings)
            .chain(&self.report.warnings)
            .cloned()
            .collect()
    }
}

pub struct ContentAnalysisPipeline {
    runner: Arc<AiPhaseRunner>,
    config: AnalysisConfig,
    progress: Arc<dyn ProgressReporter>,
    cancel: CancellationToken,
}

impl ContentAnalysisPipeline {
    pub fn new(
        runner: Arc<AiPhaseRunner>,
        config: AnalysisConfig,
        progress: Arc<dyn ProgressReporter>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            runner,
            config,
            progress,
            cancel,
        }
    }

    /// Run index search, page analysis, synthesis and validation.
    pub async fn run(&self, input: &AnalysisInput<'_>) -> Result<AnalysisOutcome, PlanError> {
        let (table_of_contents, analyses) = if input.index.is_empty() {
            warn!("no pages to analyze");
            (Vec::new(), PageAnalysisResult::default())
        } else {
            let toc = self.index_search(input).await?;
            let analyses = self.analyze_pages(input, &toc).await?;
            (toc, analyses)
        };

        let synthesis = self.synthesize(input, &analyses).await?;
        let report = self.validate(input, &synthesis, &analyses).await?;

        info!(
            toc_entries = table_of_contents.len(),
            pages = analyses.pages.len(),
            topics = report.validated_count,
            quality = report.quality_score,
            "content analysis finished"
        );
        Ok(AnalysisOutcome {
            table_of_contents,
            analyses,
            synthesis,
            report,
        })
    }

    fn checkpoint(&self) -> Result<(), PlanError> {
        if self.cancel.is_cancelled() {
            return Err(PlanError::Cancelled);
        }
        Ok(())
    }

    fn report(&self, phase: PlanPhase, percent: u8, message: impl Into<String>) {
        self.progress
            .report(PlanProgressEvent::new(phase, percent, message));
    }

    // ============ Phase 1 ============

    async fn index_search(&self, input: &AnalysisInput<'_>) -> Result<Vec<TocEntry>, PlanError> {
        self.checkpoint()?;
        let total = input.index.total_markers();
        self.report(
            PlanPhase::IndexSearch,
            10,
            format!("looking for the table of contents in {} pages", total),
        );

        let attachment = match input.sources {
            [single] if self.config.attach_pdf && self.runner.model().accepts_files() => {
                Some(Attachment::pdf(&single.document.name, single.bytes.clone()))
            }
            _ => None,
        };
        let context = match attachment {
            Some(_) => String::new(),
            None => input.index.render_pages(1..=total, TOC_CHARS_PER_PAGE),
        };
        let prompt = prompts::index_search(input.exam_name, total, attachment.is_some());

        let value = self
            .runner
            .run(PhaseCall {
                phase: PHASE_INDEX_SEARCH,
                prompt: &prompt,
                context: &context,
                attachment: attachment.as_ref(),
                expected_keys: &["tableOfContents"],
                schema_hint: Some(prompts::INDEX_SCHEMA),
            })
            .await?;
        let toc = decode_index_search(&value, total)
            .map_err(|e| PlanError::schema(PHASE_INDEX_SEARCH, e))?;
        info!(entries = toc.len(), attached = attachment.is_some(), "table of contents found");
        Ok(toc)
    }

    // ============ Phase 2 ============

    async fn analyze_pages(
        &self,
        input: &AnalysisInput<'_>,
        toc: &[TocEntry],
    ) -> Result<PageAnalysisResult, PlanError> {
        self.checkpoint()?;
        let total = input.index.total_markers();
        let batches = plan_batches(total, self.config.pages_per_batch);
        let batch_count = batches.len();
        self.report(
            PlanPhase::PageAnalysis,
            15,
            format!("{} pages in {} batches", total, batch_count),
        );

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let toc = Arc::new(toc.to_vec());
        let mut tasks: JoinSet<Result<BatchAnalysis, PlanError>> = JoinSet::new();

        for (position, range) in batches.into_iter().enumerate() {
            let runner = self.runner.clone();
            let index = input.index.clone();
            let semaphore = semaphore.clone();
            let cancel = self.cancel.clone();
            let toc = toc.clone();
            let exam_name = input.exam_name.to_string();
            let max_chars = self.config.max_chars_per_page;

            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| PlanError::Cancelled)?;
                if cancel.is_cancelled() {
                    return Err(PlanError::Cancelled);
                }
                let (first, last) = (*range.start(), *range.end());
                let prompt = prompts::page_analysis(&exam_name, &toc, first, last, position == 0);
                let context = index.render_pages(range.clone(), max_chars);
                let value = runner
                    .run(PhaseCall {
                        phase: PHASE_PAGE_ANALYSIS,
                        prompt: &prompt,
                        context: &context,
                        attachment: None,
                        expected_keys: &["pageAnalyses"],
                        schema_hint: Some(prompts::PAGE_ANALYSIS_SCHEMA),
                    })
                    .await?;
                decode_page_batch(&value, range, &index)
                    .map_err(|e| PlanError::schema(PHASE_PAGE_ANALYSIS, e))
            });
        }

        let mut finished = Vec::with_capacity(batch_count);
        while let Some(joined) = tasks.join_next().await {
            let batch = match joined {
                Ok(Ok(batch)) => batch,
                Ok(Err(e)) => {
                    tasks.abort_all();
                    return Err(e);
                }
                Err(e) => {
                    tasks.abort_all();
                    return Err(PlanError::Task(format!("page analysis batch: {}", e)));
                }
            };
            self.report(
                PlanPhase::PageAnalysis,
                band_percent(15, 55, finished.len() + 1, batch_count),
                format!(
                    "pages {}-{} of {}",
                    batch.range.start(),
                    batch.range.end(),
                    total
                ),
            );
            finished.push(batch);
        }

        Ok(merge_page_analyses(finished, &input.index))
    }

    // ============ Phase 3 ============

    async fn synthesize(
        &self,
        input: &AnalysisInput<'_>,
        analyses: &PageAnalysisResult,
    ) -> Result<SynthesisResult, PlanError> {
        self.checkpoint()?;
        if analyses.pages.is_empty() {
            return Ok(empty_synthesis());
        }
        self.report(PlanPhase::Synthesis, 55, "grouping pages into topics");

        let prompt = prompts::synthesis(input.exam_name, &analyses.global_structure, input.user_notes);
        let context = prompts::analyses_context(analyses);
        let value = self
            .runner
            .run(PhaseCall {
                phase: PHASE_SYNTHESIS,
                prompt: &prompt,
                context: &context,
                attachment: None,
                expected_keys: &["topics"],
                schema_hint: Some(prompts::SYNTHESIS_SCHEMA),
            })
            .await?;
        let synthesis = decode_synthesis(&value, analyses, &input.index)
            .map_err(|e| PlanError::schema(PHASE_SYNTHESIS, e))?;
        if !synthesis.warnings.is_empty() {
            warn!(repairs = synthesis.warnings.len(), "synthesized topics were repaired");
        }
        Ok(synthesis)
    }

    // ============ Phase 4 ============

    async fn validate(
        &self,
        input: &AnalysisInput<'_>,
        synthesis: &SynthesisResult,
        analyses: &PageAnalysisResult,
    ) -> Result<ValidationReport, PlanError> {
        self.checkpoint()?;
        if synthesis.topics.is_empty() {
            return Ok(ValidationReport::empty());
        }
        self.report(
            PlanPhase::Validation,
            65,
            format!("validating {} topics", synthesis.topics.len()),
        );

        let mut report = validate_topics(synthesis.topics.clone(), analyses, &input.index);
        if report.topics.is_empty() {
            warn!("validation left no topics");
            return Ok(report);
        }
        let prompt = prompts::validation(input.exam_name);
        let context = prompts::topics_context(&report.topics);
        let value = self
            .runner
            .run(PhaseCall {
                phase: PHASE_VALIDATION,
                prompt: &prompt,
                context: &context,
                attachment: None,
                expected_keys: &["optimizedTopics"],
                schema_hint: Some(prompts::VALIDATION_SCHEMA),
            })
            .await?;
        let changed = apply_optimizations(&mut report, &value, analyses, &input.index)
            .map_err(|e| PlanError::schema(PHASE_VALIDATION, e))?;
        info!(changed, "topic texts optimized");
        Ok(report)
    }
}
