//! Global page addressing across all uploaded files.
//!
//! Every page of every source file receives a *global marker*: files are
//! visited in upload order and pages in local order, so marker `1` is the
//! first page of the first file and the last marker equals the sum of all
//! page counts. The [`PageIndex`] is built once per run and never mutated.
//!
//! Text extraction is injected as a closure so this module stays free of
//! any PDF dependency. A page whose extraction fails still consumes a
//! marker and stores a placeholder text, keeping marker arithmetic stable.
//!
//! ```rust
//! use study_planner_core::{build_page_index, SourceDocument};
//!
//! let files = vec![
//!     SourceDocument { index: 0, name: "a.pdf".into(), byte_size: 0, page_count: 2 },
//!     SourceDocument { index: 1, name: "b.pdf".into(), byte_size: 0, page_count: 3 },
//! ];
//! let index = build_page_index(&files, |_, page| Ok(format!("page {page}")));
//! assert_eq!(index.total_markers(), 5);
//! assert_eq!(index.marker_for(1, 1), Some(3));
//! ```

use std::collections::HashMap;
use std::ops::RangeInclusive;

use tracing::warn;

use crate::models::{GlobalMarker, SourceDocument};

/// One addressed page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageEntry {
    pub marker: GlobalMarker,
    pub file_index: usize,
    pub local_page: u32,
    /// Extracted text, or a placeholder when extraction failed.
    pub text: String,
    pub extraction_error: Option<String>,
}

/// Bijection between global markers and `(file_index, local_page)`.
#[derive(Debug, Clone, Default)]
pub struct PageIndex {
    files: Vec<SourceDocument>,
    entries: Vec<PageEntry>,
    by_location: HashMap<(usize, u32), GlobalMarker>,
    full_text: String,
}

/// Placeholder stored in place of a page's text when extraction fails.
pub fn extraction_placeholder(file_name: &str, local_page: u32) -> String {
    format!("[page {} of {}: text extraction failed]", local_page, file_name)
}

/// Build the marker index over `files` in upload order.
///
/// `extract_page` is called once per `(file, local_page)`, pages 1-based.
/// Failures are logged and recorded, never propagated.
pub fn build_page_index<F>(files: &[SourceDocument], mut extract_page: F) -> PageIndex
where
    F: FnMut(&SourceDocument, u32) -> Result<String, String>,
{
    let total: usize = files.iter().map(|f| f.page_count as usize).sum();
    let mut entries = Vec::with_capacity(total);
    let mut by_location = HashMap::with_capacity(total);
    let mut full_text = String::new();
    let mut next_marker: GlobalMarker = 1;

    for file in files {
        for local_page in 1..=file.page_count {
            let (text, extraction_error) = match extract_page(file, local_page) {
                Ok(text) => (text, None),
                Err(e) => {
                    warn!(
                        file = %file.name,
                        page = local_page,
                        error = %e,
                        "page text extraction failed; storing placeholder"
                    );
                    (extraction_placeholder(&file.name, local_page), Some(e))
                }
            };

            full_text.push_str(&text);
            full_text.push_str("\n\n");

            by_location.insert((file.index, local_page), next_marker);
            entries.push(PageEntry {
                marker: next_marker,
                file_index: file.index,
                local_page,
                text,
                extraction_error,
            });
            next_marker += 1;
        }
    }

    PageIndex {
        files: files.to_vec(),
        entries,
        by_location,
        full_text,
    }
}

impl PageIndex {
    /// Number of markers; equals the sum of all page counts.
    pub fn total_markers(&self) -> u32 {
        self.entries.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn files(&self) -> &[SourceDocument] {
        &self.files
    }

    pub fn file(&self, file_index: usize) -> Option<&SourceDocument> {
        self.files.iter().find(|f| f.index == file_index)
    }

    pub fn entries(&self) -> &[PageEntry] {
        &self.entries
    }

    /// All page texts joined by paragraph breaks, in marker order.
    pub fn full_text(&self) -> &str {
        &self.full_text
    }

    pub fn lookup(&self, marker: GlobalMarker) -> Option<&PageEntry> {
        if marker == 0 {
            return None;
        }
        self.entries.get(marker as usize - 1)
    }

    /// Inverse lookup: the marker addressing `local_page` of `file_index`.
    pub fn marker_for(&self, file_index: usize, local_page: u32) -> Option<GlobalMarker> {
        self.by_location.get(&(file_index, local_page)).copied()
    }

    /// The marker span occupied by one file, if it has any pages.
    pub fn markers_for_file(&self, file_index: usize) -> Option<RangeInclusive<GlobalMarker>> {
        let file = self.file(file_index)?;
        let first = self.marker_for(file_index, 1)?;
        Some(first..=first + file.page_count - 1)
    }

    /// Pages whose text could not be extracted.
    pub fn failed_pages(&self) -> impl Iterator<Item = &PageEntry> {
        self.entries.iter().filter(|e| e.extraction_error.is_some())
    }

    /// Render a marker window for prompts, one labelled block per page.
    ///
    /// Page text is truncated to `max_chars_per_page` characters.
    pub fn render_pages(
        &self,
        markers: RangeInclusive<GlobalMarker>,
        max_chars_per_page: usize,
    ) -> String {
        let mut out = String::new();
        for marker in markers {
            let Some(entry) = self.lookup(marker) else {
                continue;
            };
            let file_name = self
                .file(entry.file_index)
                .map(|f| f.name.as_str())
                .unwrap_or("?");
            out.push_str(&format!(
                "--- PAGE {} (file {} \"{}\", page {}) ---\n",
                marker, entry.file_index, file_name, entry.local_page
            ));
            let text: String = entry.text.chars().take(max_chars_per_page).collect();
            out.push_str(text.trim());
            out.push_str("\n\n");
        }
        out
    }
}
