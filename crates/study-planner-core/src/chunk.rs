//! Chunk naming and page-list rules.
//!
//! A chunk is a standalone PDF holding one topic's pages from one source
//! file. The PDF surgery itself lives in the application crate (it needs
//! `lopdf`); this module owns the parts that must agree everywhere:
//!
//! - which pages a request really asks for ([`normalize_page_list`]),
//! - what the chunk is called ([`chunk_file_name`]),
//! - how failures are classified ([`ChunkCreationError`]).
//!
//! # Naming
//!
//! `{originalBaseName}_{titleSlug}_p{first}-{last}.pdf`, where the slug
//! keeps ASCII alphanumerics, collapses every other run to `_`, and is cut
//! to 15 characters.
//!
//! ```rust
//! use study_planner_core::chunk::chunk_file_name;
//!
//! let name = chunk_file_name("Diritto.pdf", "Obbligazioni e contratti", 3, 9);
//! assert_eq!(name, "Diritto_Obbligazioni_e_p3-9.pdf");
//! ```

use std::collections::BTreeSet;

use thiserror::Error;

use crate::models::file_base_name;

const SLUG_MAX_CHARS: usize = 15;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChunkCreationError {
    #[error("no valid pages requested")]
    NoPages,
    #[error("source is not a readable PDF: {0}")]
    InvalidPdf(String),
    #[error("chunk has {actual} pages, expected {expected}")]
    PageCountMismatch { expected: usize, actual: usize },
}

/// Drop non-positive and out-of-range pages, then sort and de-duplicate.
pub fn normalize_page_list(pages: &[i64], page_count: u32) -> Vec<u32> {
    pages
        .iter()
        .filter(|&&p| p >= 1 && p <= i64::from(page_count))
        .map(|&p| p as u32)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Filesystem-safe, length-limited slug of a topic title.
pub fn title_slug(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_sep = false;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.push(c);
        } else {
            pending_sep = true;
        }
    }
    let slug: String = slug.chars().take(SLUG_MAX_CHARS).collect();
    let slug = slug.trim_end_matches('_');
    if slug.is_empty() {
        "topic".to_string()
    } else {
        slug.to_string()
    }
}

/// `{originalBaseName}_{titleSlug}_p{first}-{last}.pdf`
pub fn chunk_file_name(original_name: &str, title: &str, first: u32, last: u32) -> String {
    format!(
        "{}_{}_p{}-{}.pdf",
        file_base_name(original_name),
        title_slug(title),
        first,
        last
    )
}

/// Parse a page list such as `"1,3-5,9"` (used by the CLI).
///
/// Reversed ranges are accepted (`"5-3"` means 3, 4, 5). Ranges are cut to
/// `1..=page_count` so a huge range costs nothing; single pages are kept
/// as given and filtered by [`normalize_page_list`].
pub fn parse_page_spec(spec: &str, page_count: u32) -> Result<Vec<i64>, String> {
    let mut pages = Vec::new();
    for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((a, b)) => {
                let a: i64 = a.trim().parse().map_err(|_| format!("bad page '{}'", a))?;
                let b: i64 = b.trim().parse().map_err(|_| format!("bad page '{}'", b))?;
                let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
                pages.extend(lo.max(1)..=hi.min(i64::from(page_count)));
            }
            None => pages.push(part.parse().map_err(|_| format!("bad page '{}'", part))?),
        }
    }
    Ok(pages)
}
