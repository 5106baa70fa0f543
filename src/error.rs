//! Error types for a plan-generation run.
//!
//! | Kind | Type | Fatal |
//! |------|------|-------|
//! | Page extraction | placeholder in the page index | no |
//! | AI phase | [`PlanError::AiPhase`] | yes |
//! | Distribution | [`PlanError::Distribution`] | yes |
//! | Reconciliation | whole-file fallback, not an error | no |
//! | Chunk creation | `TopicSource::ErrorChunk` | no |
//! | Persistence | [`PlanError::Persistence`] | yes |
//! | Load / cancel | [`PlanError::Load`], [`PlanError::Cancelled`] | yes |

use study_planner_core::analysis::SchemaError;
use study_planner_core::assembly::AssemblyError;
use study_planner_core::distribution::DistributionError;
use study_planner_core::json_repair::JsonRepairError;
use thiserror::Error;

/// Failure of a single model invocation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AiModelError {
    /// Rate limit, server error or network failure; worth retrying.
    #[error("transient model error: {0}")]
    Retryable(String),
    /// Rejected request or disabled provider; retrying cannot help.
    #[error("model error: {0}")]
    Fatal(String),
}

impl AiModelError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, AiModelError::Retryable(_))
    }
}

/// Why a phase produced no usable JSON.
#[derive(Debug, Error)]
pub enum AiFailure {
    #[error(transparent)]
    Model(#[from] AiModelError),
    #[error(transparent)]
    Malformed(#[from] JsonRepairError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

#[derive(Debug, Error)]
#[error("AI phase `{phase}` failed after {attempts} attempt(s): {cause}")]
pub struct AiPhaseError {
    pub phase: String,
    pub attempts: u32,
    pub cause: AiFailure,
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("failed to load '{name}': {message}")]
    Load { name: String, message: String },
    #[error(transparent)]
    AiPhase(#[from] AiPhaseError),
    #[error("distribution failed: {0}")]
    Distribution(#[from] DistributionError),
    #[error("assembly failed: {0}")]
    Assembly(#[from] AssemblyError),
    #[error("persistence failed: {0}")]
    Persistence(String),
    #[error("background task failed: {0}")]
    Task(String),
    #[error("run cancelled")]
    Cancelled,
}

impl PlanError {
    pub fn persistence(err: anyhow::Error) -> Self {
        PlanError::Persistence(format!("{:#}", err))
    }

    /// A phase response parsed but did not decode.
    pub fn schema(phase: &str, err: SchemaError) -> Self {
        PlanError::AiPhase(AiPhaseError {
            phase: phase.to_string(),
            attempts: 1,
            cause: AiFailure::Schema(err),
        })
    }
}
