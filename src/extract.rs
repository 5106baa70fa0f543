//! PDF loading and per-page text extraction.
//!
//! Every uploaded file is parsed once with `lopdf` for its page tree. Text
//! comes from `pdf-extract` when its page-split output has exactly one
//! entry per page (it keeps layout better); otherwise each page is read
//! individually through `lopdf`. A page that yields no text is recorded as
//! a per-page error and later stored as a placeholder in the page index.
//!
//! A file that is not a PDF at all is a load error: there is nothing to
//! address.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use lopdf::Document;
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

use study_planner_core::{build_page_index, PageIndex, SourceDocument};

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("not a readable PDF: {0}")]
    Pdf(String),
    #[error("PDF has no pages")]
    Empty,
}

/// An uploaded file with its bytes and extracted page texts.
#[derive(Debug, Clone)]
pub struct LoadedSource {
    pub document: SourceDocument,
    pub bytes: Arc<Vec<u8>>,
    /// One entry per page, page 1 first.
    pub pages: Vec<Result<String, String>>,
}

/// Parse a PDF held in memory and extract the text of every page.
pub fn load_pdf(index: usize, name: &str, bytes: Vec<u8>) -> Result<LoadedSource, ExtractError> {
    let doc = Document::load_mem(&bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;
    let page_numbers: Vec<u32> = doc.get_pages().keys().copied().collect();
    if page_numbers.is_empty() {
        return Err(ExtractError::Empty);
    }

    let pages = match pdf_extract::extract_text_from_mem_by_pages(&bytes) {
        Ok(texts) if texts.len() == page_numbers.len() => {
            debug!(file = name, pages = texts.len(), "text extracted with pdf-extract");
            texts
                .into_iter()
                .zip(&page_numbers)
                .map(|(text, &n)| {
                    if text.trim().is_empty() {
                        lopdf_page_text(&doc, n)
                    } else {
                        Ok(text)
                    }
                })
                .collect()
        }
        other => {
            if let Err(e) = &other {
                debug!(file = name, error = %e, "pdf-extract failed; reading pages with lopdf");
            }
            page_numbers
                .iter()
                .map(|&n| lopdf_page_text(&doc, n))
                .collect()
        }
    };

    let document = SourceDocument {
        index,
        name: name.to_string(),
        byte_size: bytes.len() as u64,
        page_count: page_numbers.len() as u32,
    };
    Ok(LoadedSource {
        document,
        bytes: Arc::new(bytes),
        pages,
    })
}

fn lopdf_page_text(doc: &Document, page: u32) -> Result<String, String> {
    match doc.extract_text(&[page]) {
        Ok(text) if !text.trim().is_empty() => Ok(text),
        Ok(_) => Err("page has no extractable text".to_string()),
        Err(e) => Err(e.to_string()),
    }
}

/// Build the global page index over loaded sources, in their order.
pub fn page_index_for(sources: &[LoadedSource]) -> PageIndex {
    let documents: Vec<SourceDocument> = sources.iter().map(|s| s.document.clone()).collect();
    build_page_index(&documents, |doc, page| {
        sources
            .get(doc.index)
            .and_then(|s| s.pages.get(page as usize - 1))
            .cloned()
            .unwrap_or_else(|| Err("page missing from extraction".to_string()))
    })
}

fn pdf_globset() -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    builder.add(Glob::new("*.pdf")?);
    builder.add(Glob::new("*.PDF")?);
    Ok(builder.build()?)
}

/// Expand CLI inputs: files are kept as given, directories are walked for
/// `*.pdf`. Directory contents are sorted by path for a stable upload order.
pub fn collect_pdf_paths(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let pdfs = pdf_globset()?;
    let mut out = Vec::new();
    for input in inputs {
        if input.is_file() {
            out.push(input.clone());
            continue;
        }
        if !input.is_dir() {
            bail!("Input does not exist: {}", input.display());
        }
        let mut found = Vec::new();
        for entry in WalkDir::new(input) {
            let entry = entry?;
            if entry.file_type().is_file() && pdfs.is_match(entry.file_name()) {
                found.push(entry.into_path());
            }
        }
        found.sort();
        info!(dir = %input.display(), files = found.len(), "collected PDFs");
        out.extend(found);
    }
    Ok(out)
}

/// Display name of a path: its file name, or the whole path as a fallback.
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
