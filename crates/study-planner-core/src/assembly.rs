//! Fold distribution, sources and topics into the persisted [`Project`].

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::distribution::DistributionPlan;
use crate::models::{Difficulty, Level, SynthesizedTopic};

/// Where a topic's study material comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TopicSource {
    /// An extracted page subset stored as its own PDF.
    Chunk {
        chunk_id: String,
        blob_id: String,
        name: String,
        file_index: usize,
        page_start: u32,
        page_end: u32,
    },
    /// Chunk creation failed for this file; no blob exists.
    ErrorChunk {
        file_index: usize,
        name: String,
        message: String,
    },
    /// Free text; used for review topics.
    Note { text: String },
    /// The whole uploaded file, used when pages could not be resolved.
    OriginalFile {
        blob_id: String,
        name: String,
        file_index: usize,
    },
}

impl TopicSource {
    pub fn kind(&self) -> &'static str {
        match self {
            TopicSource::Chunk { .. } => "chunk",
            TopicSource::ErrorChunk { .. } => "error_chunk",
            TopicSource::Note { .. } => "note",
            TopicSource::OriginalFile { .. } => "original_file",
        }
    }

    pub fn blob_id(&self) -> Option<&str> {
        match self {
            TopicSource::Chunk { blob_id, .. } | TopicSource::OriginalFile { blob_id, .. } => {
                Some(blob_id)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
    pub id: String,
    pub title: String,
    pub description: String,
    /// `None` for unassigned topics.
    pub day: Option<u32>,
    pub order_in_day: Option<u32>,
    pub priority: Level,
    pub difficulty: Difficulty,
    pub estimated_hours: f64,
    pub key_concepts: Vec<String>,
    pub is_review: bool,
    pub sources: Vec<TopicSource>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub exam_name: String,
    pub total_days: u32,
    pub created_at: DateTime<Utc>,
    pub topics: Vec<Topic>,
    /// Every day `1..=total_days`, in study order.
    pub daily_plan: BTreeMap<u32, Vec<String>>,
    pub unassigned: Vec<String>,
}

impl Project {
    pub fn topic(&self, id: &str) -> Option<&Topic> {
        self.topics.iter().find(|t| t.id == id)
    }

    pub fn topics_for_day(&self, day: u32) -> Vec<&Topic> {
        self.daily_plan
            .get(&day)
            .map(|ids| ids.iter().filter_map(|id| self.topic(id)).collect())
            .unwrap_or_default()
    }

    /// Blob ids referenced by any topic source.
    pub fn blob_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .topics
            .iter()
            .flat_map(|t| t.sources.iter().filter_map(TopicSource::blob_id))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AssemblyError {
    #[error("no sources for placed topic '{0}'")]
    MissingSources(String),
    #[error("distribution references unknown topic '{0}'")]
    UnknownTopic(String),
}

/// Everything needed to build a [`Project`].
///
/// `sources` is keyed by synthesized topic id or review topic id.
pub struct AssemblyInput<'a> {
    pub name: &'a str,
    pub exam_name: &'a str,
    pub total_days: u32,
    pub topics: &'a [SynthesizedTopic],
    pub plan: &'a DistributionPlan,
    pub sources: &'a HashMap<String, Vec<TopicSource>>,
}

/// Build the project. Every placed topic must have a source entry.
pub fn assemble(input: AssemblyInput<'_>) -> Result<Project, AssemblyError> {
    let by_id: HashMap<&str, &SynthesizedTopic> =
        input.topics.iter().map(|t| (t.id.as_str(), t)).collect();

    let mut topics = Vec::new();
    let mut daily_plan = BTreeMap::new();

    for day in 1..=input.total_days {
        let placed = input
            .plan
            .days
            .iter()
            .find(|d| d.day == day)
            .map(|d| d.topic_ids.as_slice())
            .unwrap_or_default();

        let mut ids = Vec::with_capacity(placed.len());
        for (order, key) in placed.iter().enumerate() {
            let sources = input
                .sources
                .get(key)
                .cloned()
                .ok_or_else(|| AssemblyError::MissingSources(key.clone()))?;
            let id = Uuid::new_v4().to_string();

            let topic = if let Some(review) = input.plan.review(key) {
                Topic {
                    id: id.clone(),
                    title: review.title.clone(),
                    description: String::new(),
                    day: Some(day),
                    order_in_day: Some(order as u32),
                    priority: Level::Medium,
                    difficulty: Difficulty::Intermediate,
                    estimated_hours: 0.0,
                    key_concepts: Vec::new(),
                    is_review: true,
                    sources,
                }
            } else {
                let t = by_id
                    .get(key.as_str())
                    .ok_or_else(|| AssemblyError::UnknownTopic(key.clone()))?;
                from_synthesized(id.clone(), t, Some((day, order as u32)), sources)
            };
            topics.push(topic);
            ids.push(id);
        }
        daily_plan.insert(day, ids);
    }

    let mut unassigned = Vec::with_capacity(input.plan.unassigned.len());
    for key in &input.plan.unassigned {
        let t = by_id
            .get(key.as_str())
            .ok_or_else(|| AssemblyError::UnknownTopic(key.clone()))?;
        let id = Uuid::new_v4().to_string();
        let sources = input.sources.get(key).cloned().unwrap_or_default();
        topics.push(from_synthesized(id.clone(), t, None, sources));
        unassigned.push(id);
    }

    Ok(Project {
        id: Uuid::new_v4().to_string(),
        name: input.name.to_string(),
        exam_name: input.exam_name.to_string(),
        total_days: input.total_days,
        created_at: Utc::now(),
        topics,
        daily_plan,
        unassigned,
    })
}

fn from_synthesized(
    id: String,
    t: &SynthesizedTopic,
    placement: Option<(u32, u32)>,
    sources: Vec<TopicSource>,
) -> Topic {
    Topic {
        id,
        title: t.title.clone(),
        description: t.description.clone(),
        day: placement.map(|(d, _)| d),
        order_in_day: placement.map(|(_, o)| o),
        priority: t.priority,
        difficulty: t.difficulty,
        estimated_hours: t.estimated_hours,
        key_concepts: t.key_concepts.clone(),
        is_review: false,
        sources,
    }
}
