//! # Study Planner
//!
//! Turns PDF course material and a number of study days into a
//! page-accurate study plan: topics bound to exact page ranges, spread
//! over days, each backed by a small PDF excerpt ("chunk").
//!
//! Pure logic (page addressing, phase decoding and repair, distribution,
//! reconciliation, assembly, store traits) lives in `study-planner-core`.
//! This crate adds everything with I/O: PDF parsing, AI providers, the
//! async pipeline, storage backends and the CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌──────────────────┐   ┌────────────┐
//! │  PDFs    │──▶│ Page index │──▶│ 4-phase analysis │──▶│ Distribute │
//! └──────────┘   └────────────┘   │ (AI + repair)    │   └─────┬──────┘
//!                                 └──────────────────┘         │
//!                ┌──────────┐   ┌──────────┐   ┌───────────┐   │
//!                │  SQLite  │◀──│ Assemble │◀──│ Reconcile │◀──┘
//!                │ + blobs  │   └──────────┘   │ + chunk   │
//!                └──────────┘                  └───────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Run-level error types |
//! | [`extract`] | PDF loading and per-page text |
//! | [`ai`] | Model providers and the phase runner |
//! | [`prompts`] | Prompt text and response shapes per phase |
//! | [`pipeline`] | The four analysis phases |
//! | [`distribute`] | Day distribution |
//! | [`chunk`] | Page-subset PDF extraction |
//! | [`generate`] | End-to-end orchestration |
//! | [`purge`] | Project deletion with shared-blob cleanup |
//! | [`progress`] | Progress reporting on stderr |
//! | [`blob_fs`] | Filesystem blob store |
//! | [`sqlite_store`] | SQLite project store |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod ai;
pub mod blob_fs;
pub mod chunk;
pub mod config;
pub mod db;
pub mod distribute;
pub mod error;
pub mod extract;
pub mod generate;
pub mod migrate;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod purge;
pub mod sqlite_store;

#[cfg(test)]
mod testing;
