//! Day distribution: model-driven or balanced.
//!
//! Both modes end in the same [`DistributionPlan`] shape with exactly
//! `total_days` days; the model response is normalized by the core before
//! anything downstream sees it.

use tracing::info;

use study_planner_core::distribution::{
    balanced_distribution, normalize_distribution, DistributionPlan, PHASE_DISTRIBUTION,
};
use study_planner_core::SynthesizedTopic;

use crate::ai::{AiPhaseRunner, PhaseCall};
use crate::config::DistributionConfig;
use crate::error::PlanError;
use crate::prompts;

/// Assign topics to days.
///
/// `runner` is `None` in balanced mode; an empty topic list never calls
/// the model.
pub async fn distribute(
    runner: Option<&AiPhaseRunner>,
    config: &DistributionConfig,
    exam_name: &str,
    topics: &[SynthesizedTopic],
    total_days: u32,
    user_notes: Option<&str>,
) -> Result<DistributionPlan, PlanError> {
    let plan = match runner {
        Some(runner) if !topics.is_empty() => {
            let prompt = prompts::distribution(exam_name, total_days, config.review_days, user_notes);
            let context = prompts::topics_context(topics);
            let value = runner
                .run(PhaseCall {
                    phase: PHASE_DISTRIBUTION,
                    prompt: &prompt,
                    context: &context,
                    attachment: None,
                    expected_keys: &["dailyPlan"],
                    schema_hint: Some(prompts::DISTRIBUTION_SCHEMA),
                })
                .await?;
            normalize_distribution(&value, topics, total_days)?
        }
        _ => balanced_distribution(topics, total_days, config.review_days)?,
    };

    info!(
        days = plan.days.len(),
        unassigned = plan.unassigned.len(),
        reviews = plan.review_topics.len(),
        "topics distributed"
    );
    Ok(plan)
}
