//! Schemas and repair rules for the four content-analysis phases.
//!
//! The application crate talks to the model; this module turns the parsed
//! JSON of each phase into typed, validated output:
//!
//! | Phase | Expected key | Decoder |
//! |-------|--------------|---------|
//! | 1. Index search | `tableOfContents` | [`decode_index_search`] |
//! | 2. Page analysis | `pageAnalyses` (+ `globalStructure`) | [`decode_page_batch`], [`merge_page_analyses`] |
//! | 3. Topic synthesis | `topics` | [`decode_synthesis`] |
//! | 4. Validation | `optimizedTopics` | [`validate_topics`], [`apply_optimizations`] |
//!
//! Decoders are lenient about field spelling and value vocabulary but
//! strict about the invariants downstream stages rely on: one analysis per
//! page in marker order, no page owned by two synthesized topics, no
//! analyzed page left without a topic, and page ranges that exist in the
//! [`PageIndex`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{
    Difficulty, GlobalMarker, Level, PageRange, SynthesizedTopic,
};
use crate::page_index::{PageEntry, PageIndex};

pub const PHASE_INDEX_SEARCH: &str = "index_search";
pub const PHASE_PAGE_ANALYSIS: &str = "page_analysis";
pub const PHASE_SYNTHESIS: &str = "topic_synthesis";
pub const PHASE_VALIDATION: &str = "validation";

/// Default per-page study time when the model gives none.
const DEFAULT_PAGE_MINUTES: f64 = 5.0;
/// Upper bound accepted for a single page's study time.
const MAX_PAGE_MINUTES: f64 = 240.0;
/// Key concepts derived from page analyses when synthesis lists none.
const MAX_DERIVED_CONCEPTS: usize = 8;

/// A parsed response does not have the shape a phase requires.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("response is not a JSON object")]
    NotAnObject,
    #[error("missing expected key `{0}`")]
    MissingKey(String),
    #[error("`{key}` must be {expected}")]
    WrongType { key: String, expected: &'static str },
    #[error("synthesis returned no topic with a usable title and page range")]
    NoUsableTopics,
}

/// Check that `value` is an object carrying every key in `keys`.
pub fn check_expected_keys(value: &Value, keys: &[&str]) -> Result<(), SchemaError> {
    let obj = value.as_object().ok_or(SchemaError::NotAnObject)?;
    for key in keys {
        match obj.get(*key) {
            Some(v) if !v.is_null() => {}
            _ => return Err(SchemaError::MissingKey((*key).to_string())),
        }
    }
    Ok(())
}

fn array<'a>(value: &'a Value, key: &str) -> Result<&'a Vec<Value>, SchemaError> {
    value
        .get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| SchemaError::WrongType {
            key: key.to_string(),
            expected: "an array",
        })
}

fn field<'a>(obj: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|k| obj.get(*k))
        .filter(|v| !v.is_null())
}

fn text_field(obj: &Value, keys: &[&str]) -> Option<String> {
    let s = match field(obj, keys)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

fn number_field(obj: &Value, keys: &[&str]) -> Option<f64> {
    match field(obj, keys)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite())
}

fn marker_field(obj: &Value, keys: &[&str]) -> Option<i64> {
    number_field(obj, keys).map(|n| n.round() as i64)
}

fn list_field(obj: &Value, keys: &[&str]) -> Vec<String> {
    match field(obj, keys) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

fn clamp_marker(raw: i64, min: GlobalMarker, max: GlobalMarker) -> GlobalMarker {
    raw.clamp(min as i64, max as i64) as GlobalMarker
}

// ═══════════════════════════════════════════════════════════════════════
// Phase 1: index search
// ═══════════════════════════════════════════════════════════════════════

/// One coarse table-of-contents entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TocEntry {
    pub title: String,
    pub start_marker_guess: GlobalMarker,
}

/// Decode `tableOfContents` into entries sorted by marker.
///
/// Entries without a title are dropped. Missing markers inherit the
/// previous entry's guess; all guesses are clamped to `[1, total_markers]`.
pub fn decode_index_search(
    value: &Value,
    total_markers: GlobalMarker,
) -> Result<Vec<TocEntry>, SchemaError> {
    let items = array(value, "tableOfContents")?;
    let max = total_markers.max(1);
    let mut entries = Vec::with_capacity(items.len());
    let mut previous: GlobalMarker = 1;

    for item in items {
        let Some(title) = text_field(item, &["title", "name", "heading"]) else {
            debug!("dropping table-of-contents entry without title");
            continue;
        };
        let guess = marker_field(
            item,
            &["startMarkerGuess", "startMarker", "startPage", "page"],
        )
        .map(|m| clamp_marker(m, 1, max))
        .unwrap_or(previous);
        previous = guess;
        entries.push(TocEntry {
            title,
            start_marker_guess: guess,
        });
    }

    entries.sort_by_key(|e| e.start_marker_guess);
    Ok(entries)
}

// ═══════════════════════════════════════════════════════════════════════
// Phase 2: page-by-page analysis
// ═══════════════════════════════════════════════════════════════════════

/// AI-derived metadata for one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageAnalysis {
    pub marker: GlobalMarker,
    pub file_index: usize,
    pub page_number: u32,
    pub topics_covered: Vec<String>,
    pub importance: Level,
    pub difficulty: Difficulty,
    pub concept_density: Level,
    pub estimated_study_time_minutes: f64,
}

impl PageAnalysis {
    /// Neutral analysis used for pages the model skipped.
    pub fn neutral(entry: &PageEntry) -> Self {
        Self {
            marker: entry.marker,
            file_index: entry.file_index,
            page_number: entry.local_page,
            topics_covered: Vec::new(),
            importance: Level::Medium,
            difficulty: Difficulty::Intermediate,
            concept_density: Level::Medium,
            estimated_study_time_minutes: DEFAULT_PAGE_MINUTES,
        }
    }
}

/// Document-level summary returned alongside the first analysis batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GlobalStructure {
    pub subject: String,
    pub summary: String,
    pub main_themes: Vec<String>,
}

/// Decoded output of one analysis batch.
#[derive(Debug, Clone)]
pub struct BatchAnalysis {
    pub range: RangeInclusive<GlobalMarker>,
    pub pages: Vec<PageAnalysis>,
    pub global_structure: Option<GlobalStructure>,
    pub warnings: Vec<String>,
}

/// Phase 2 output: exactly one analysis per marker, in marker order.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageAnalysisResult {
    pub pages: Vec<PageAnalysis>,
    pub global_structure: GlobalStructure,
    pub warnings: Vec<String>,
}

impl PageAnalysisResult {
    pub fn get(&self, marker: GlobalMarker) -> Option<&PageAnalysis> {
        self.pages
            .binary_search_by_key(&marker, |p| p.marker)
            .ok()
            .map(|i| &self.pages[i])
    }
}

/// Split `1..=total_markers` into consecutive batches.
pub fn plan_batches(total_markers: GlobalMarker, pages_per_batch: usize) -> Vec<RangeInclusive<GlobalMarker>> {
    let size = pages_per_batch.max(1) as GlobalMarker;
    let mut batches = Vec::new();
    let mut start = 1;
    while start <= total_markers {
        let end = (start + size - 1).min(total_markers);
        batches.push(start..=end);
        start = end + 1;
    }
    batches
}

/// Decode one `pageAnalyses` batch. Entries outside `range` are discarded.
pub fn decode_page_batch(
    value: &Value,
    range: RangeInclusive<GlobalMarker>,
    index: &PageIndex,
) -> Result<BatchAnalysis, SchemaError> {
    let items = array(value, "pageAnalyses")?;
    let mut pages = Vec::with_capacity(items.len());
    let mut warnings = Vec::new();

    for item in items {
        let Some(raw_marker) = marker_field(item, &["pageMarker", "marker", "page"]) else {
            warnings.push("page analysis without pageMarker discarded".to_string());
            continue;
        };
        let in_range = raw_marker >= *range.start() as i64 && raw_marker <= *range.end() as i64;
        let entry = if in_range {
            index.lookup(raw_marker as GlobalMarker)
        } else {
            None
        };
        let Some(entry) = entry else {
            warnings.push(format!(
                "page {} outside batch {}-{} discarded",
                raw_marker,
                range.start(),
                range.end()
            ));
            continue;
        };

        let minutes = number_field(item, &["estimatedStudyTimeMinutes", "studyMinutes", "minutes"])
            .map(|m| m.clamp(0.0, MAX_PAGE_MINUTES))
            .unwrap_or(DEFAULT_PAGE_MINUTES);

        pages.push(PageAnalysis {
            marker: entry.marker,
            file_index: entry.file_index,
            page_number: entry.local_page,
            topics_covered: list_field(item, &["topicsCovered", "topics"]),
            importance: text_field(item, &["importance"])
                .map(Level::from)
                .unwrap_or_default(),
            difficulty: text_field(item, &["difficulty"])
                .map(Difficulty::from)
                .unwrap_or_default(),
            concept_density: text_field(item, &["conceptDensity", "density"])
                .map(Level::from)
                .unwrap_or_default(),
            estimated_study_time_minutes: minutes,
        });
    }

    let global_structure = value.get("globalStructure").filter(|v| v.is_object()).map(|g| {
        GlobalStructure {
            subject: text_field(g, &["subject", "title"]).unwrap_or_default(),
            summary: text_field(g, &["summary", "description"]).unwrap_or_default(),
            main_themes: list_field(g, &["mainThemes", "themes"]),
        }
    });

    Ok(BatchAnalysis {
        range,
        pages,
        global_structure,
        warnings,
    })
}

/// Concatenate batches in marker order with no duplicate or missing page.
///
/// Batches may arrive in any order. Duplicates keep the first analysis
/// seen in marker order; pages the model skipped get a neutral analysis.
pub fn merge_page_analyses(mut batches: Vec<BatchAnalysis>, index: &PageIndex) -> PageAnalysisResult {
    batches.sort_by_key(|b| *b.range.start());

    let mut by_marker: BTreeMap<GlobalMarker, PageAnalysis> = BTreeMap::new();
    let mut global_structure = None;
    let mut warnings = Vec::new();

    for batch in batches {
        warnings.extend(batch.warnings);
        if global_structure.is_none() {
            global_structure = batch.global_structure;
        }
        for page in batch.pages {
            let marker = page.marker;
            if by_marker.contains_key(&marker) {
                warnings.push(format!("duplicate analysis for page {} ignored", marker));
                continue;
            }
            by_marker.insert(marker, page);
        }
    }

    let mut missing = 0usize;
    for entry in index.entries() {
        by_marker
            .entry(entry.marker)
            .or_insert_with(|| {
                missing += 1;
                PageAnalysis::neutral(entry)
            });
    }
    if missing > 0 {
        warn!(missing, "model skipped pages; neutral analysis substituted");
        warnings.push(format!("{} pages had no analysis; neutral values used", missing));
    }

    PageAnalysisResult {
        pages: by_marker.into_values().collect(),
        global_structure: global_structure.unwrap_or_default(),
        warnings,
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Phase 3: topic synthesis
// ═══════════════════════════════════════════════════════════════════════

/// Phase 3 output.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisResult {
    pub topics: Vec<SynthesizedTopic>,
    /// Set when synthesis had nothing to work with.
    pub empty_reason: Option<String>,
    pub warnings: Vec<String>,
}

/// The explicit result for a request with zero analyzed pages.
pub fn empty_synthesis() -> SynthesisResult {
    SynthesisResult {
        topics: Vec::new(),
        empty_reason: Some("no analyzed pages".to_string()),
        warnings: Vec::new(),
    }
}

struct Candidate {
    title: String,
    description: String,
    start: GlobalMarker,
    end: GlobalMarker,
    priority: Level,
    difficulty: Difficulty,
    hours: Option<f64>,
    concepts: Vec<String>,
}

/// Convert ascending markers into per-file contiguous local ranges.
pub fn markers_to_ranges(markers: &[GlobalMarker], index: &PageIndex) -> Vec<PageRange> {
    let mut ranges: Vec<PageRange> = Vec::new();
    for entry in markers.iter().filter_map(|m| index.lookup(*m)) {
        match ranges.last_mut() {
            Some(last)
                if last.file_index == entry.file_index
                    && last.end_local_page + 1 == entry.local_page =>
            {
                last.end_local_page = entry.local_page;
            }
            _ => ranges.push(PageRange::new(
                entry.file_index,
                entry.local_page,
                entry.local_page,
            )),
        }
    }
    ranges
}

fn round_quarter(hours: f64) -> f64 {
    ((hours * 4.0).round() / 4.0).max(0.25)
}

/// Decode and repair the `topics` proposed by the model.
///
/// Repairs, each reported as a warning: ranges are clamped to analyzed
/// markers; a page claimed by several topics stays with the earliest
/// topic; an unclaimed page joins the topic owning the nearest preceding
/// page (or the following one for a leading gap); topics left with no
/// page are dropped.
pub fn decode_synthesis(
    value: &Value,
    analyses: &PageAnalysisResult,
    index: &PageIndex,
) -> Result<SynthesisResult, SchemaError> {
    let analyzed: BTreeSet<GlobalMarker> = analyses.pages.iter().map(|p| p.marker).collect();
    let (Some(&min), Some(&max)) = (analyzed.first(), analyzed.last()) else {
        return Ok(empty_synthesis());
    };

    let items = array(value, "topics")?;
    let mut warnings = Vec::new();
    let mut candidates = Vec::with_capacity(items.len());

    for item in items {
        let Some(title) = text_field(item, &["title", "name"]) else {
            warnings.push("topic without title dropped".to_string());
            continue;
        };
        let Some(start) = marker_field(item, &["startMarker", "startPage", "start"]) else {
            warnings.push(format!("topic '{}' has no start marker; dropped", title));
            continue;
        };
        let end = marker_field(item, &["endMarker", "endPage", "end"]).unwrap_or(start);
        let (mut start, mut end) = (clamp_marker(start, min, max), clamp_marker(end, min, max));
        if start > end {
            std::mem::swap(&mut start, &mut end);
        }
        candidates.push(Candidate {
            description: text_field(item, &["description", "summary"]).unwrap_or_default(),
            start,
            end,
            priority: text_field(item, &["priority", "importance"])
                .map(Level::from)
                .unwrap_or_default(),
            difficulty: text_field(item, &["difficulty"])
                .map(Difficulty::from)
                .unwrap_or_default(),
            hours: number_field(item, &["estimatedHours", "hours"]).filter(|h| *h > 0.0),
            concepts: list_field(item, &["keyConcepts", "concepts"]),
            title,
        });
    }

    if candidates.is_empty() {
        return Err(SchemaError::NoUsableTopics);
    }
    candidates.sort_by_key(|c| c.start);

    let mut owner: BTreeMap<GlobalMarker, usize> = BTreeMap::new();
    let mut overlapping = 0usize;
    for (i, c) in candidates.iter().enumerate() {
        for m in c.start..=c.end {
            if !analyzed.contains(&m) {
                continue;
            }
            if owner.contains_key(&m) {
                overlapping += 1;
            } else {
                owner.insert(m, i);
            }
        }
    }
    if overlapping > 0 {
        warnings.push(format!(
            "{} pages claimed by more than one topic kept by the earliest",
            overlapping
        ));
    }

    let unowned: Vec<GlobalMarker> = analyzed
        .iter()
        .filter(|m| !owner.contains_key(m))
        .copied()
        .collect();
    let mut gap_fills = 0usize;
    for m in unowned {
        let target = owner
            .range(..m)
            .next_back()
            .or_else(|| owner.range(m..).next())
            .map(|(_, &i)| i);
        if let Some(i) = target {
            owner.insert(m, i);
            gap_fills += 1;
        }
    }
    if gap_fills > 0 {
        warnings.push(format!("{} unassigned pages attached to neighbouring topics", gap_fills));
    }

    let mut owned: Vec<Vec<GlobalMarker>> = vec![Vec::new(); candidates.len()];
    for (m, i) in owner {
        owned[i].push(m);
    }

    let mut topics = Vec::with_capacity(candidates.len());
    for (candidate, markers) in candidates.into_iter().zip(owned) {
        if markers.is_empty() {
            warnings.push(format!("topic '{}' lost all pages; dropped", candidate.title));
            continue;
        }
        let page_analyses: Vec<&PageAnalysis> =
            markers.iter().filter_map(|m| analyses.get(*m)).collect();

        let estimated_hours = candidate.hours.unwrap_or_else(|| {
            let minutes: f64 = page_analyses
                .iter()
                .map(|p| p.estimated_study_time_minutes)
                .sum();
            round_quarter(minutes / 60.0)
        });

        let key_concepts = if candidate.concepts.is_empty() {
            let mut seen = BTreeSet::new();
            page_analyses
                .iter()
                .flat_map(|p| p.topics_covered.iter())
                .filter(|t| seen.insert(t.to_lowercase()))
                .take(MAX_DERIVED_CONCEPTS)
                .cloned()
                .collect()
        } else {
            candidate.concepts
        };

        topics.push(SynthesizedTopic {
            id: format!("topic-{}", topics.len() + 1),
            title: candidate.title,
            description: candidate.description,
            page_ranges: markers_to_ranges(&markers, index),
            total_pages: markers.len() as u32,
            priority: candidate.priority,
            difficulty: candidate.difficulty,
            estimated_hours,
            key_concepts,
            quality_score: 0.0,
        });
    }

    for w in &warnings {
        debug!(warning = %w, "synthesis repair");
    }

    Ok(SynthesisResult {
        topics,
        empty_reason: None,
        warnings,
    })
}

// ═══════════════════════════════════════════════════════════════════════
// Phase 4: validation & optimization
// ═══════════════════════════════════════════════════════════════════════

/// Phase 4 output: corrected topics plus aggregate statistics.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub topics: Vec<SynthesizedTopic>,
    pub original_count: usize,
    pub validated_count: usize,
    /// Mean topic quality score.
    pub quality_score: f64,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    /// The short-circuit report for an empty synthesis.
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Sort ranges and merge those that overlap or touch within the same file.
pub fn merge_ranges(mut ranges: Vec<PageRange>) -> Vec<PageRange> {
    ranges.sort();
    let mut merged: Vec<PageRange> = Vec::with_capacity(ranges.len());
    for r in ranges {
        match merged.last_mut() {
            Some(last)
                if last.file_index == r.file_index
                    && r.start_local_page <= last.end_local_page + 1 =>
            {
                last.end_local_page = last.end_local_page.max(r.end_local_page);
            }
            _ => merged.push(r),
        }
    }
    merged
}

fn size_factor(pages: u32) -> f64 {
    let pages = pages as f64;
    if pages < 8.0 {
        pages / 8.0
    } else if pages <= 25.0 {
        1.0
    } else {
        (1.0 - (pages - 25.0) / 25.0).max(0.0)
    }
}

/// Quality score in `[0, 1]`.
///
/// Weighted by description completeness (0.25), concept count (0.20),
/// page count against the 8–25 page sweet spot (0.25) and mean page
/// importance/density from phase 2 (0.30).
pub fn quality_score(topic: &SynthesizedTopic, analyses: &PageAnalysisResult, index: &PageIndex) -> f64 {
    let description = (topic.description.chars().count() as f64 / 120.0).min(1.0);
    let concepts = (topic.key_concepts.len() as f64 / 5.0).min(1.0);
    let size = size_factor(topic.total_pages);

    let weights: Vec<f64> = topic
        .pages()
        .filter_map(|(file, page)| index.marker_for(file, page))
        .filter_map(|m| analyses.get(m))
        .map(|a| (a.importance.weight() + a.concept_density.weight()) / 2.0)
        .collect();
    let content = if weights.is_empty() {
        0.5
    } else {
        weights.iter().sum::<f64>() / weights.len() as f64
    };

    (0.25 * description + 0.20 * concepts + 0.25 * size + 0.30 * content).clamp(0.0, 1.0)
}

fn rescore(report: &mut ValidationReport, analyses: &PageAnalysisResult, index: &PageIndex) {
    for topic in &mut report.topics {
        topic.quality_score = quality_score(topic, analyses, index);
    }
    report.validated_count = report.topics.len();
    report.quality_score = if report.topics.is_empty() {
        0.0
    } else {
        report.topics.iter().map(|t| t.quality_score).sum::<f64>() / report.topics.len() as f64
    };
}

/// Clamp, merge and score topics; report cross-topic issues as warnings.
pub fn validate_topics(
    topics: Vec<SynthesizedTopic>,
    analyses: &PageAnalysisResult,
    index: &PageIndex,
) -> ValidationReport {
    let original_count = topics.len();
    let mut warnings = Vec::new();
    let mut validated = Vec::with_capacity(topics.len());

    for mut topic in topics {
        let mut ranges = Vec::with_capacity(topic.page_ranges.len());
        for r in &topic.page_ranges {
            let Some(file) = index.file(r.file_index) else {
                warnings.push(format!(
                    "topic '{}' references unknown file {}; range dropped",
                    topic.title, r.file_index
                ));
                continue;
            };
            let (lo, hi) = if r.start_local_page <= r.end_local_page {
                (r.start_local_page, r.end_local_page)
            } else {
                (r.end_local_page, r.start_local_page)
            };
            let (start, end) = (lo.max(1), hi.min(file.page_count));
            if start > end {
                warnings.push(format!(
                    "topic '{}' range {}-{} outside '{}'; dropped",
                    topic.title, lo, hi, file.name
                ));
                continue;
            }
            if (start, end) != (r.start_local_page, r.end_local_page) {
                warnings.push(format!(
                    "topic '{}' range {}-{} clamped to {}-{}",
                    topic.title, r.start_local_page, r.end_local_page, start, end
                ));
            }
            ranges.push(PageRange::new(r.file_index, start, end));
        }

        let ranges = merge_ranges(ranges);
        if ranges.is_empty() {
            warnings.push(format!("topic '{}' has no valid pages; removed", topic.title));
            continue;
        }
        topic.total_pages = ranges.iter().map(PageRange::len).sum();
        topic.page_ranges = ranges;
        validated.push(topic);
    }

    let mut first_owner: HashMap<(usize, u32), usize> = HashMap::new();
    let mut overlaps: BTreeMap<(usize, usize), u32> = BTreeMap::new();
    for (i, topic) in validated.iter().enumerate() {
        for page in topic.pages() {
            match first_owner.get(&page) {
                Some(&j) => *overlaps.entry((j, i)).or_insert(0) += 1,
                None => {
                    first_owner.insert(page, i);
                }
            }
        }
    }
    for ((a, b), count) in overlaps {
        warnings.push(format!(
            "topics '{}' and '{}' overlap on {} pages",
            validated[a].title, validated[b].title, count
        ));
    }

    let uncovered = analyses
        .pages
        .iter()
        .filter(|p| !first_owner.contains_key(&(p.file_index, p.page_number)))
        .count();
    if uncovered > 0 {
        warnings.push(format!("{} analyzed pages are not covered by any topic", uncovered));
    }

    for w in &warnings {
        warn!(warning = %w, "topic validation");
    }

    let mut report = ValidationReport {
        topics: validated,
        original_count,
        validated_count: 0,
        quality_score: 0.0,
        warnings,
    };
    rescore(&mut report, analyses, index);
    report
}

/// Apply `optimizedTopics` text improvements, then rescore.
///
/// Entries are matched by topic id and may change title, description and
/// key concepts only. Returns the number of topics changed.
pub fn apply_optimizations(
    report: &mut ValidationReport,
    value: &Value,
    analyses: &PageAnalysisResult,
    index: &PageIndex,
) -> Result<usize, SchemaError> {
    let items = array(value, "optimizedTopics")?;
    let mut changed = 0usize;

    for item in items {
        let Some(id) = text_field(item, &["id", "topicId"]) else {
            continue;
        };
        let Some(topic) = report.topics.iter_mut().find(|t| t.id == id) else {
            report
                .warnings
                .push(format!("optimization for unknown topic '{}' ignored", id));
            continue;
        };
        let mut touched = false;
        if let Some(title) = text_field(item, &["title"]) {
            touched |= title != topic.title;
            topic.title = title;
        }
        if let Some(description) = text_field(item, &["description"]) {
            touched |= description != topic.description;
            topic.description = description;
        }
        let concepts = list_field(item, &["keyConcepts", "concepts"]);
        if !concepts.is_empty() {
            touched |= concepts != topic.key_concepts;
            topic.key_concepts = concepts;
        }
        if touched {
            changed += 1;
        }
    }

    rescore(report, analyses, index);
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceDocument;
    use crate::page_index::build_page_index;
    use serde_json::json;

    fn index_of(pages: &[u32]) -> PageIndex {
        let files: Vec<SourceDocument> = pages
            .iter()
            .enumerate()
            .map(|(i, &n)| SourceDocument {
                index: i,
                name: format!("f{}.pdf", i),
                byte_size: 0,
                page_count: n,
            })
            .collect();
        build_page_index(&files, |_, p| Ok(format!("text {}", p)))
    }

    fn neutral_analyses(index: &PageIndex) -> PageAnalysisResult {
        merge_page_analyses(Vec::new(), index)
    }

    #[test]
    fn test_expected_keys_are_checked() {
        assert!(check_expected_keys(&json!({"topics": []}), &["topics"]).is_ok());
        assert_eq!(
            check_expected_keys(&json!({"x": 1}), &["topics"]),
            Err(SchemaError::MissingKey("topics".to_string()))
        );
        assert_eq!(
            check_expected_keys(&json!([1]), &["topics"]),
            Err(SchemaError::NotAnObject)
        );
        assert!(check_expected_keys(&json!({"topics": null}), &["topics"]).is_err());
    }

    #[test]
    fn test_index_search_sorts_and_clamps() {
        let value = json!({"tableOfContents": [
            {"title": "Second", "startMarkerGuess": 12},
            {"title": "First", "startPage": "1"},
            {"title": "", "startMarkerGuess": 3},
            {"title": "Beyond", "startMarkerGuess": 999}
        ]});
        let toc = decode_index_search(&value, 20).unwrap();
        let titles: Vec<&str> = toc.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["First", "Second", "Beyond"]);
        assert_eq!(toc[2].start_marker_guess, 20);
    }

    #[test]
    fn test_batches_cover_all_markers() {
        assert_eq!(plan_batches(25, 10), vec![1..=10, 11..=20, 21..=25]);
        assert!(plan_batches(0, 10).is_empty());
        assert_eq!(plan_batches(3, 0), vec![1..=1, 2..=2, 3..=3]);
    }

    #[test]
    fn test_batch_decode_discards_out_of_range_and_maps_locations() {
        let index = index_of(&[3, 3]);
        let value = json!({"pageAnalyses": [
            {"pageMarker": 4, "importance": "high", "topicsCovered": ["a"], "estimatedStudyTimeMinutes": 12},
            {"pageMarker": 1, "importance": "low"},
            {"importance": "low"}
        ], "globalStructure": {"subject": "Law", "mainThemes": ["x", "y"]}});
        let batch = decode_page_batch(&value, 4..=6, &index).unwrap();
        assert_eq!(batch.pages.len(), 1);
        assert_eq!(batch.pages[0].file_index, 1);
        assert_eq!(batch.pages[0].page_number, 1);
        assert_eq!(batch.pages[0].importance, Level::High);
        assert_eq!(batch.pages[0].estimated_study_time_minutes, 12.0);
        assert_eq!(batch.warnings.len(), 2);
        assert_eq!(batch.global_structure.unwrap().main_themes, vec!["x", "y"]);
    }

    #[test]
    fn test_merge_orders_dedups_and_fills() {
        let index = index_of(&[5]);
        let late = decode_page_batch(
            &json!({"pageAnalyses": [{"pageMarker": 4}, {"pageMarker": 5}]}),
            4..=5,
            &index,
        )
        .unwrap();
        let early = decode_page_batch(
            &json!({"pageAnalyses": [{"pageMarker": 2, "importance": "high"}, {"pageMarker": 2}, {"pageMarker": 1}]}),
            1..=3,
            &index,
        )
        .unwrap();
        let merged = merge_page_analyses(vec![late, early], &index);
        let markers: Vec<u32> = merged.pages.iter().map(|p| p.marker).collect();
        assert_eq!(markers, vec![1, 2, 3, 4, 5]);
        assert_eq!(merged.get(2).unwrap().importance, Level::High);
        assert!(merged.warnings.iter().any(|w| w.contains("duplicate")));
        assert!(merged.warnings.iter().any(|w| w.contains("1 pages had no analysis")));
    }

    #[test]
    fn test_synthesis_with_no_pages_is_explicitly_empty() {
        let index = index_of(&[]);
        let analyses = neutral_analyses(&index);
        let result = decode_synthesis(&json!({}), &analyses, &index).unwrap();
        assert!(result.topics.is_empty());
        assert!(result.empty_reason.is_some());
    }

    #[test]
    fn test_synthesis_two_topics_cover_twenty_pages() {
        let index = index_of(&[20]);
        let analyses = neutral_analyses(&index);
        let value = json!({"topics": [
            {"title": "A", "startMarker": 1, "endMarker": 10, "keyConcepts": ["x"]},
            {"title": "B", "startMarker": 11, "endMarker": 20}
        ]});
        let result = decode_synthesis(&value, &analyses, &index).unwrap();
        assert_eq!(result.topics.len(), 2);
        assert_eq!(result.topics[0].page_ranges, vec![PageRange::new(0, 1, 10)]);
        assert_eq!(result.topics[1].page_ranges, vec![PageRange::new(0, 11, 20)]);
        assert_eq!(result.topics[0].id, "topic-1");
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_synthesis_repairs_overlap_and_gaps() {
        let index = index_of(&[6, 4]);
        let analyses = neutral_analyses(&index);
        let value = json!({"topics": [
            {"title": "B", "startMarker": 5, "endMarker": 8},
            {"title": "A", "startMarker": 3, "endMarker": 6},
            {"title": "Swallowed", "startMarker": 5, "endMarker": 5}
        ]});
        let result = decode_synthesis(&value, &analyses, &index).unwrap();
        let titles: Vec<&str> = result.topics.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["A", "B"]);

        let a = &result.topics[0];
        let b = &result.topics[1];
        // A owns the leading gap (1-2) and 3-6; B keeps 7-8 and the trailing gap 9-10.
        assert_eq!(a.page_ranges, vec![PageRange::new(0, 1, 6)]);
        assert_eq!(
            b.page_ranges,
            vec![PageRange::new(1, 1, 4)]
        );
        let mut seen = BTreeSet::new();
        for t in &result.topics {
            for p in t.pages() {
                assert!(seen.insert(p), "page {:?} owned twice", p);
            }
        }
        assert_eq!(seen.len(), 10);
        assert!(result.warnings.iter().any(|w| w.contains("Swallowed")));
    }

    #[test]
    fn test_synthesis_without_usable_topics_is_a_schema_error() {
        let index = index_of(&[4]);
        let analyses = neutral_analyses(&index);
        let value = json!({"topics": [{"description": "no title"}]});
        assert_eq!(
            decode_synthesis(&value, &analyses, &index).unwrap_err(),
            SchemaError::NoUsableTopics
        );
    }

    fn topic(id: &str, title: &str, ranges: Vec<PageRange>) -> SynthesizedTopic {
        SynthesizedTopic {
            id: id.to_string(),
            title: title.to_string(),
            description: String::new(),
            total_pages: ranges.iter().map(PageRange::len).sum(),
            page_ranges: ranges,
            priority: Level::Medium,
            difficulty: Difficulty::Intermediate,
            estimated_hours: 1.0,
            key_concepts: Vec::new(),
            quality_score: 0.0,
        }
    }

    #[test]
    fn test_validation_clamps_merges_and_warns() {
        let index = index_of(&[10]);
        let analyses = neutral_analyses(&index);
        let topics = vec![
            topic("t1", "One", vec![PageRange::new(0, 1, 3), PageRange::new(0, 4, 6)]),
            topic("t2", "Two", vec![PageRange::new(0, 6, 15)]),
            topic("t3", "Ghost", vec![PageRange::new(7, 1, 2)]),
        ];
        let report = validate_topics(topics, &analyses, &index);
        assert_eq!(report.original_count, 3);
        assert_eq!(report.validated_count, 2);
        assert_eq!(report.topics[0].page_ranges, vec![PageRange::new(0, 1, 6)]);
        assert_eq!(report.topics[1].page_ranges, vec![PageRange::new(0, 6, 10)]);
        assert_eq!(report.topics[1].total_pages, 5);
        assert!(report.warnings.iter().any(|w| w.contains("overlap on 1 pages")));
        assert!(report.warnings.iter().any(|w| w.contains("clamped")));
        assert!(report.quality_score > 0.0 && report.quality_score <= 1.0);
    }

    #[test]
    fn test_quality_prefers_sweet_spot_and_rich_descriptions() {
        let index = index_of(&[60]);
        let analyses = neutral_analyses(&index);
        let mut rich = topic("a", "Rich", vec![PageRange::new(0, 1, 12)]);
        rich.description = "d".repeat(150);
        rich.key_concepts = vec!["a".into(), "b".into(), "c".into(), "d".into(), "e".into()];
        let thin = topic("b", "Thin", vec![PageRange::new(0, 13, 60)]);
        let rich_score = quality_score(&rich, &analyses, &index);
        let thin_score = quality_score(&thin, &analyses, &index);
        assert!(rich_score > thin_score);
        assert!(rich_score <= 1.0);
        assert!((0.0..=1.0).contains(&thin_score));
    }

    #[test]
    fn test_optimizations_change_text_only() {
        let index = index_of(&[10]);
        let analyses = neutral_analyses(&index);
        let mut report = validate_topics(
            vec![topic("topic-1", "Old", vec![PageRange::new(0, 1, 10)])],
            &analyses,
            &index,
        );
        let before = report.quality_score;
        let value = json!({"optimizedTopics": [
            {"id": "topic-1", "title": "New", "description": "A thorough description of the topic", "keyConcepts": ["k1", "k2"], "startMarker": 5},
            {"id": "missing", "title": "X"}
        ]});
        let changed = apply_optimizations(&mut report, &value, &analyses, &index).unwrap();
        assert_eq!(changed, 1);
        assert_eq!(report.topics[0].title, "New");
        assert_eq!(report.topics[0].page_ranges, vec![PageRange::new(0, 1, 10)]);
        assert!(report.quality_score > before);
    }
}
