//! # Study Planner Core
//!
//! Pure logic for Study Planner: global page addressing, AI phase schemas
//! and their repair rules, day distribution, page-range reconciliation,
//! chunk naming, project assembly, and the blob/document store traits.
//!
//! This crate contains no tokio runtime, HTTP client, PDF parser, or
//! filesystem I/O. Everything here is deterministic and testable in
//! isolation; the `study-planner` crate wires it to real collaborators.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Source documents, page ranges, levels, synthesized topics |
//! | [`page_index`] | Global page marker index over all uploaded files |
//! | [`json_repair`] | Best-effort repair of model JSON output |
//! | [`cache`] | Fingerprint-keyed AI response cache |
//! | [`analysis`] | Phase schemas: index search, page analysis, synthesis, validation |
//! | [`distribution`] | Day assignment normalization and balanced distribution |
//! | [`reconcile`] | Topic → per-file page groups, whole-file fallback |
//! | [`chunk`] | Chunk page filtering and deterministic file naming |
//! | [`assembly`] | Project and topic records handed to the document store |
//! | [`store`] | Blob and document store traits plus in-memory backends |

pub mod analysis;
pub mod assembly;
pub mod cache;
pub mod chunk;
pub mod distribution;
pub mod json_repair;
pub mod models;
pub mod page_index;
pub mod reconcile;
pub mod store;

pub use models::{Difficulty, GlobalMarker, Level, PageRange, SourceDocument, SynthesizedTopic};
pub use page_index::{build_page_index, PageEntry, PageIndex};
