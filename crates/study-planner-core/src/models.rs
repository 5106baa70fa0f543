//! Core data models shared by every pipeline stage.
//!
//! AI responses use loose vocabularies for levels ("High", "alta",
//! "hard", ...). The enums here deserialize from any string and fall back
//! to the middle value, so a single odd field never rejects a whole page
//! or topic.

use serde::{Deserialize, Serialize};

/// A run-scoped sequential page address across all uploaded files (1-based).
pub type GlobalMarker = u32;

/// An uploaded source file. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDocument {
    /// Position in upload order (0-based).
    pub index: usize,
    pub name: String,
    pub byte_size: u64,
    pub page_count: u32,
}

impl SourceDocument {
    /// File name without directories and without the `.pdf` extension.
    pub fn base_name(&self) -> &str {
        file_base_name(&self.name)
    }
}

/// Last path component of `name` with its extension removed. Dot files
/// keep their name.
pub fn file_base_name(name: &str) -> &str {
    let file = name.rsplit(['/', '\\']).next().unwrap_or(name);
    match file.rfind('.') {
        Some(pos) if pos > 0 => &file[..pos],
        _ => file,
    }
}

/// Three-step scale used for importance, concept density and priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Level {
    Low,
    #[default]
    Medium,
    High,
}

impl Level {
    /// Numeric weight used by the quality score.
    pub fn weight(self) -> f64 {
        match self {
            Level::Low => 0.33,
            Level::Medium => 0.67,
            Level::High => 1.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Level::Low => "low",
            Level::Medium => "medium",
            Level::High => "high",
        }
    }
}

impl From<String> for Level {
    fn from(s: String) -> Self {
        match s.trim().to_lowercase().as_str() {
            "low" | "bassa" | "basso" | "minor" => Level::Low,
            "high" | "alta" | "alto" | "critical" | "very high" => Level::High,
            _ => Level::Medium,
        }
    }
}

/// Difficulty of a page or topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Difficulty {
    Beginner,
    #[default]
    Intermediate,
    Advanced,
}

impl Difficulty {
    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Beginner => "beginner",
            Difficulty::Intermediate => "intermediate",
            Difficulty::Advanced => "advanced",
        }
    }
}

impl From<String> for Difficulty {
    fn from(s: String) -> Self {
        match s.trim().to_lowercase().as_str() {
            "beginner" | "easy" | "basic" | "principiante" | "facile" | "base" => {
                Difficulty::Beginner
            }
            "advanced" | "hard" | "expert" | "avanzato" | "difficile" => Difficulty::Advanced,
            _ => Difficulty::Intermediate,
        }
    }
}

/// A contiguous run of local pages inside one source file (inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRange {
    pub file_index: usize,
    pub start_local_page: u32,
    pub end_local_page: u32,
}

impl PageRange {
    pub fn new(file_index: usize, start_local_page: u32, end_local_page: u32) -> Self {
        Self {
            file_index,
            start_local_page,
            end_local_page,
        }
    }

    /// Number of pages covered; zero for an inverted range.
    pub fn len(&self) -> u32 {
        if self.end_local_page < self.start_local_page {
            0
        } else {
            self.end_local_page - self.start_local_page + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pages(&self) -> impl Iterator<Item = u32> {
        self.start_local_page..=self.end_local_page
    }

    pub fn overlaps(&self, other: &PageRange) -> bool {
        self.file_index == other.file_index
            && self.start_local_page <= other.end_local_page
            && other.start_local_page <= self.end_local_page
    }
}

/// A topic produced by synthesis and refined by validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesizedTopic {
    pub id: String,
    pub title: String,
    pub description: String,
    pub page_ranges: Vec<PageRange>,
    pub total_pages: u32,
    pub priority: Level,
    pub difficulty: Difficulty,
    pub estimated_hours: f64,
    pub key_concepts: Vec<String>,
    /// In `[0, 1]`; zero until validation scores the topic.
    pub quality_score: f64,
}

impl SynthesizedTopic {
    /// Iterate every `(file_index, local_page)` the topic covers.
    pub fn pages(&self) -> impl Iterator<Item = (usize, u32)> + '_ {
        self.page_ranges
            .iter()
            .flat_map(|r| r.pages().map(move |p| (r.file_index, p)))
    }
}

/// Normalize a title for matching: lowercase, whitespace collapsed,
/// surrounding punctuation trimmed.
pub fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase()
}
