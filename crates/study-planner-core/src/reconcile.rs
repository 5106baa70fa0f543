//! Map a distributed topic back to concrete pages.
//!
//! Distribution works on topic keys; chunking needs `(file, pages)`. The
//! [`TopicIndex`] lists validated topics by start marker. A topic spans
//! from its start marker to the marker before the next topic's start (or
//! the last marker), and that span is resolved through the [`PageIndex`]
//! into per-file page lists.
//!
//! Synthesized topics are looked up by id with [`reconcile_topic`]. Titles
//! are not unique (two files may each open with an "Introduction") and a
//! content title may contain a review word, so neither is used for them.
//! [`reconcile`] matches on normalized title and serves keys that are not
//! synthesized ids.
//!
//! Expected non-page outcomes are variants, not errors:
//!
//! ```text
//! title ──▶ review marker? ──yes──▶ Review
//!              │ no
//!              ▼
//!           indexed with a start? ──no──▶ Fallback { reason }
//!              │ yes
//!              ▼
//!           Resolved(sources by file)
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;
use tracing::warn;

use crate::distribution::is_review_title;
use crate::models::{normalize_title, GlobalMarker, SynthesizedTopic};
use crate::page_index::PageIndex;

/// One row of the topic index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicIndexEntry {
    /// Synthesized topic id; `None` for rows built from titles only.
    pub id: Option<String>,
    pub title: String,
    /// Signed so that model-supplied or missing starts can be represented.
    pub start_marker: Option<i64>,
}

/// Ordered `[ {title, start_marker} ]`, matched on normalized title.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TopicIndex {
    entries: Vec<TopicIndexEntry>,
}

impl TopicIndex {
    /// Build from rows as given. Rows are sorted by start marker; rows
    /// without a start sort last.
    pub fn new(mut entries: Vec<TopicIndexEntry>) -> Self {
        entries.sort_by_key(|e| e.start_marker.unwrap_or(i64::MAX));
        Self { entries }
    }

    /// Index validated topics by the marker of their first page.
    pub fn from_topics(topics: &[SynthesizedTopic], pages: &PageIndex) -> Self {
        Self::new(
            topics
                .iter()
                .map(|t| TopicIndexEntry {
                    id: Some(t.id.clone()),
                    title: t.title.clone(),
                    start_marker: t
                        .pages()
                        .filter_map(|(f, p)| pages.marker_for(f, p))
                        .min()
                        .map(i64::from),
                })
                .collect(),
        )
    }

    pub fn entries(&self) -> &[TopicIndexEntry] {
        &self.entries
    }

    fn position(&self, title: &str) -> Option<usize> {
        let wanted = normalize_title(title);
        self.entries
            .iter()
            .position(|e| normalize_title(&e.title) == wanted)
    }

    fn position_of_id(&self, id: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.id.as_deref() == Some(id))
    }
}

/// Pages of one source file belonging to a topic, ascending and unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciledSource {
    pub file_index: usize,
    pub pages: Vec<u32>,
}

impl ReconciledSource {
    pub fn first_page(&self) -> Option<u32> {
        self.pages.first().copied()
    }

    pub fn last_page(&self) -> Option<u32> {
        self.pages.last().copied()
    }
}

/// Why a title could not be resolved to pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    NotIndexed,
    MissingStart,
    StartOutOfRange { start: i64, total: GlobalMarker },
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::NotIndexed => write!(f, "title not found in topic index"),
            FallbackReason::MissingStart => write!(f, "topic has no positive start marker"),
            FallbackReason::StartOutOfRange { start, total } => {
                write!(f, "start marker {} beyond last marker {}", start, total)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// Concrete pages, ordered by file index.
    Resolved(Vec<ReconciledSource>),
    /// Use whole original files instead.
    Fallback { reason: FallbackReason },
    /// Review topic: a single note, no pages.
    Review,
}

/// Resolve a title to page sources. Pure and idempotent.
///
/// Review-marker titles never get pages. The first row whose normalized
/// title matches wins.
pub fn reconcile(title: &str, topics: &TopicIndex, pages: &PageIndex) -> Reconciliation {
    if is_review_title(title) {
        return Reconciliation::Review;
    }
    match topics.position(title) {
        Some(pos) => resolve_span(title, pos, topics, pages),
        None => fallback(title, FallbackReason::NotIndexed),
    }
}

/// Resolve the synthesized topic `id` to page sources.
///
/// The title plays no part: duplicate titles keep their own spans and a
/// title containing a review word is still paged.
pub fn reconcile_topic(id: &str, topics: &TopicIndex, pages: &PageIndex) -> Reconciliation {
    match topics.position_of_id(id) {
        Some(pos) => resolve_span(id, pos, topics, pages),
        None => fallback(id, FallbackReason::NotIndexed),
    }
}

fn fallback(key: &str, reason: FallbackReason) -> Reconciliation {
    warn!(key, %reason, "reconciliation falling back to whole files");
    Reconciliation::Fallback { reason }
}

fn resolve_span(key: &str, pos: usize, topics: &TopicIndex, pages: &PageIndex) -> Reconciliation {
    let start = match topics.entries[pos].start_marker {
        Some(s) if s > 0 => s,
        _ => return fallback(key, FallbackReason::MissingStart),
    };
    let total = pages.total_markers();
    if start > i64::from(total) {
        return fallback(key, FallbackReason::StartOutOfRange { start, total });
    }

    let end = match topics.entries.get(pos + 1).and_then(|e| e.start_marker) {
        Some(next) if next > start => next - 1,
        _ => i64::from(total),
    };
    let end = end.clamp(start, i64::from(total));

    let mut by_file: BTreeMap<usize, BTreeSet<u32>> = BTreeMap::new();
    for marker in start..=end {
        if let Some(entry) = pages.lookup(marker as GlobalMarker) {
            by_file
                .entry(entry.file_index)
                .or_default()
                .insert(entry.local_page);
        }
    }

    Reconciliation::Resolved(
        by_file
            .into_iter()
            .map(|(file_index, pages)| ReconciledSource {
                file_index,
                pages: pages.into_iter().collect(),
            })
            .collect(),
    )
}
