//! Day-by-day distribution of topics.
//!
//! Two producers feed the same normalizer:
//!
//! - **AI mode**: the model returns a `dailyPlan` array which
//!   [`normalize_distribution`] cleans up.
//! - **Balanced mode**: [`balanced_distribution`] fills study days greedily
//!   by estimated hours and reserves the final days for review.
//!
//! Either way the result has exactly `total_days` entries, every topic
//! appears at most once, and topics never placed are reported in
//! [`DistributionPlan::unassigned`].

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{normalize_title, SynthesizedTopic};

pub const PHASE_DISTRIBUTION: &str = "distribution";

/// Title used for review days in balanced mode.
pub const GENERAL_REVIEW_TITLE: &str = "Ripasso generale";

static REVIEW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(ripasso|review|revision|simulazione|simulation|mock exam|esercitazione finale)\b")
        .expect("review pattern is a valid regex")
});

/// Whether a title denotes review/exam-simulation work rather than content.
pub fn is_review_title(title: &str) -> bool {
    REVIEW_RE.is_match(title)
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DistributionError {
    #[error("total days must be at least 1")]
    NoDays,
    #[error("response has no `dailyPlan` array")]
    MissingDailyPlan,
    #[error("no day references any of the {0} topics")]
    NothingPlaced(usize),
}

/// Topics scheduled on one day, in study order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayAssignment {
    pub day: u32,
    pub topic_ids: Vec<String>,
}

/// A review entry created during distribution. Has no page sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewTopic {
    pub id: String,
    pub title: String,
    pub day: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionPlan {
    /// Exactly `total_days` entries, day `1..=total_days`. Empty days are rest days.
    pub days: Vec<DayAssignment>,
    pub unassigned: Vec<String>,
    pub review_topics: Vec<ReviewTopic>,
}

impl DistributionPlan {
    pub fn review(&self, id: &str) -> Option<&ReviewTopic> {
        self.review_topics.iter().find(|r| r.id == id)
    }

    /// Day and position of a topic, if placed.
    pub fn placement(&self, id: &str) -> Option<(u32, usize)> {
        self.days.iter().find_map(|d| {
            d.topic_ids
                .iter()
                .position(|t| t == id)
                .map(|pos| (d.day, pos))
        })
    }
}

struct PlanBuilder<'a> {
    topics: &'a [SynthesizedTopic],
    days: Vec<DayAssignment>,
    placed: HashSet<String>,
    review_topics: Vec<ReviewTopic>,
}

impl<'a> PlanBuilder<'a> {
    fn new(topics: &'a [SynthesizedTopic], total_days: u32) -> Self {
        Self {
            topics,
            days: (1..=total_days)
                .map(|day| DayAssignment {
                    day,
                    topic_ids: Vec::new(),
                })
                .collect(),
            placed: HashSet::new(),
            review_topics: Vec::new(),
        }
    }

    fn find(&self, id: Option<&str>, title: Option<&str>) -> Option<&'a SynthesizedTopic> {
        if let Some(id) = id {
            if let Some(t) = self.topics.iter().find(|t| t.id == id) {
                return Some(t);
            }
        }
        // Titles repeat across files; prefer a namesake not yet placed.
        let wanted = normalize_title(title.or(id)?);
        let mut namesakes = self
            .topics
            .iter()
            .filter(|t| normalize_title(&t.title) == wanted);
        let first = namesakes.clone().next();
        namesakes.find(|t| !self.placed.contains(&t.id)).or(first)
    }

    fn place(&mut self, day: u32, id: &str) -> bool {
        if !self.placed.insert(id.to_string()) {
            return false;
        }
        self.days[day as usize - 1].topic_ids.push(id.to_string());
        true
    }

    fn add_review(&mut self, day: u32, title: &str) {
        let id = format!("review-{}-{}", day, self.review_topics.len() + 1);
        self.review_topics.push(ReviewTopic {
            id: id.clone(),
            title: title.to_string(),
            day,
        });
        self.days[day as usize - 1].topic_ids.push(id);
    }

    fn finish(self) -> DistributionPlan {
        let unassigned = self
            .topics
            .iter()
            .filter(|t| !self.placed.contains(&t.id))
            .map(|t| t.id.clone())
            .collect();
        DistributionPlan {
            days: self.days,
            unassigned,
            review_topics: self.review_topics,
        }
    }
}

fn item_refs(item: &Value) -> (Option<&str>, Option<&str>) {
    match item {
        Value::String(s) => (Some(s.trim()), None),
        Value::Object(_) => (
            item.get("id")
                .or_else(|| item.get("topicId"))
                .and_then(Value::as_str)
                .map(str::trim),
            item.get("title")
                .or_else(|| item.get("name"))
                .and_then(Value::as_str)
                .map(str::trim),
        ),
        _ => (None, None),
    }
}

fn day_number(entry: &Value) -> Option<i64> {
    match entry.get("day")? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Normalize a model-produced `dailyPlan` against the synthesized topics.
///
/// Each day entry is `{ "day": n, "topics": [...] }` where topics are ids,
/// titles, or `{ "id", "title" }` objects. Days outside `[1, total_days]`
/// are dropped; unknown references are dropped unless they name a review
/// activity; a topic is placed at most once.
pub fn normalize_distribution(
    value: &Value,
    topics: &[SynthesizedTopic],
    total_days: u32,
) -> Result<DistributionPlan, DistributionError> {
    if total_days == 0 {
        return Err(DistributionError::NoDays);
    }
    let entries = value
        .get("dailyPlan")
        .and_then(Value::as_array)
        .ok_or(DistributionError::MissingDailyPlan)?;

    let mut builder = PlanBuilder::new(topics, total_days);
    let mut placed_any = false;

    for entry in entries {
        let Some(day) = day_number(entry).filter(|d| (1..=total_days as i64).contains(d)) else {
            debug!(entry = %entry, "dropping day outside plan");
            continue;
        };
        let day = day as u32;
        let items = entry
            .get("topics")
            .or_else(|| entry.get("topicIds"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for item in items {
            let (id, title) = item_refs(item);
            match builder.find(id, title) {
                Some(topic) => {
                    if builder.place(day, &topic.id) {
                        placed_any = true;
                    } else {
                        debug!(topic = %topic.id, day, "topic already placed; skipping repeat");
                    }
                }
                None => {
                    let label = title.or(id).unwrap_or_default();
                    if is_review_title(label) {
                        builder.add_review(day, label);
                    } else {
                        warn!(reference = %label, day, "distribution references unknown topic");
                    }
                }
            }
        }
    }

    if !topics.is_empty() && !placed_any {
        return Err(DistributionError::NothingPlaced(topics.len()));
    }
    Ok(builder.finish())
}

/// Deterministic local distribution.
///
/// Topics keep their order and fill study days toward an even share of the
/// total estimated hours. The last `review_days` days (at most
/// `total_days - 1`) each receive a general review topic.
pub fn balanced_distribution(
    topics: &[SynthesizedTopic],
    total_days: u32,
    review_days: u32,
) -> Result<DistributionPlan, DistributionError> {
    if total_days == 0 {
        return Err(DistributionError::NoDays);
    }
    let mut builder = PlanBuilder::new(topics, total_days);
    if topics.is_empty() {
        return Ok(builder.finish());
    }

    let review_days = review_days.min(total_days - 1);
    let study_days = total_days - review_days;
    let hours = |t: &SynthesizedTopic| t.estimated_hours.max(0.25);
    let target = topics.iter().map(hours).sum::<f64>() / study_days as f64;

    let mut day = 1;
    let mut filled = 0.0;
    for topic in topics {
        builder.place(day, &topic.id);
        filled += hours(topic);
        if filled >= target - f64::EPSILON && day < study_days {
            day += 1;
            filled = 0.0;
        }
    }

    for day in study_days + 1..=total_days {
        builder.add_review(day, GENERAL_REVIEW_TITLE);
    }
    Ok(builder.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Difficulty, Level};
    use serde_json::json;

    fn topic(id: &str, title: &str, hours: f64) -> SynthesizedTopic {
        SynthesizedTopic {
            id: id.to_string(),
            title: title.to_string(),
            description: String::new(),
            page_ranges: Vec::new(),
            total_pages: 0,
            priority: Level::Medium,
            difficulty: Difficulty::Intermediate,
            estimated_hours: hours,
            key_concepts: Vec::new(),
            quality_score: 0.0,
        }
    }

    fn assert_partition(plan: &DistributionPlan, topics: &[SynthesizedTopic]) {
        let mut seen = HashSet::new();
        for day in &plan.days {
            for id in &day.topic_ids {
                if plan.review(id).is_none() {
                    assert!(seen.insert(id.clone()), "{} placed twice", id);
                }
            }
        }
        for id in &plan.unassigned {
            assert!(seen.insert(id.clone()), "{} both placed and unassigned", id);
        }
        assert_eq!(seen.len(), topics.len());
    }

    #[test]
    fn test_review_titles() {
        assert!(is_review_title("Ripasso generale"));
        assert!(is_review_title("Final REVIEW"));
        assert!(is_review_title("Mock exam #2"));
        assert!(is_review_title("Esercitazione finale"));
        assert!(!is_review_title("Reviewing contracts")); // word boundary
        assert!(!is_review_title("Diritto privato"));
    }

    #[test]
    fn test_normalize_drops_bad_days_and_duplicates() {
        let topics = vec![topic("topic-1", "A", 1.0), topic("topic-2", "B", 1.0), topic("topic-3", "C", 1.0)];
        let value = json!({"dailyPlan": [
            {"day": 1, "topics": ["topic-1", {"id": "topic-2"}]},
            {"day": 2, "topics": ["topic-1", "Unknown thing", "Ripasso finale"]},
            {"day": 9, "topics": ["topic-3"]},
            {"day": "0", "topics": ["topic-3"]}
        ]});
        let plan = normalize_distribution(&value, &topics, 3).unwrap();
        assert_eq!(plan.days.len(), 3);
        assert_eq!(plan.days[0].topic_ids, vec!["topic-1", "topic-2"]);
        assert_eq!(plan.days[1].topic_ids.len(), 1);
        assert_eq!(plan.review_topics.len(), 1);
        assert_eq!(plan.review_topics[0].day, 2);
        assert!(plan.days[2].topic_ids.is_empty());
        assert_eq!(plan.unassigned, vec!["topic-3"]);
        assert_partition(&plan, &topics);
        assert_eq!(plan.placement("topic-2"), Some((1, 1)));
    }

    #[test]
    fn test_normalize_matches_titles() {
        let topics = vec![topic("topic-1", "Contratti", 1.0)];
        let value = json!({"dailyPlan": [{"day": 1, "topics": [{"title": "  contratti "}]}]});
        let plan = normalize_distribution(&value, &topics, 1).unwrap();
        assert_eq!(plan.days[0].topic_ids, vec!["topic-1"]);
    }

    #[test]
    fn test_normalize_repeated_title_places_each_namesake() {
        let topics = vec![topic("topic-1", "Introduzione", 1.0), topic("topic-2", "Introduzione", 1.0)];
        let value = json!({"dailyPlan": [
            {"day": 1, "topics": ["Introduzione"]},
            {"day": 2, "topics": ["Introduzione"]}
        ]});
        let plan = normalize_distribution(&value, &topics, 2).unwrap();
        assert_eq!(plan.days[0].topic_ids, vec!["topic-1"]);
        assert_eq!(plan.days[1].topic_ids, vec!["topic-2"]);
        assert!(plan.unassigned.is_empty());
    }

    #[test]
    fn test_normalize_errors() {
        let topics = vec![topic("topic-1", "A", 1.0)];
        assert_eq!(
            normalize_distribution(&json!({"plan": []}), &topics, 3),
            Err(DistributionError::MissingDailyPlan)
        );
        assert_eq!(
            normalize_distribution(&json!({"dailyPlan": [{"day": 1, "topics": ["nope"]}]}), &topics, 3),
            Err(DistributionError::NothingPlaced(1))
        );
        assert_eq!(
            normalize_distribution(&json!({"dailyPlan": []}), &topics, 0),
            Err(DistributionError::NoDays)
        );
    }

    #[test]
    fn test_balanced_spreads_and_reserves_review() {
        let topics: Vec<_> = (1..=6)
            .map(|i| topic(&format!("topic-{}", i), &format!("T{}", i), 2.0))
            .collect();
        let plan = balanced_distribution(&topics, 5, 2).unwrap();
        assert_eq!(plan.days.len(), 5);
        assert!(plan.unassigned.is_empty());
        assert_eq!(plan.days[0].topic_ids, vec!["topic-1", "topic-2"]);
        assert_eq!(plan.days[2].topic_ids, vec!["topic-5", "topic-6"]);
        assert_eq!(plan.review_topics.len(), 2);
        assert_eq!(plan.review_topics[1].day, 5);
        assert_eq!(plan.review_topics[0].title, GENERAL_REVIEW_TITLE);
        assert_partition(&plan, &topics);
    }

    #[test]
    fn test_balanced_single_day_has_no_review() {
        let topics = vec![topic("topic-1", "A", 1.0), topic("topic-2", "B", 3.0)];
        let plan = balanced_distribution(&topics, 1, 3).unwrap();
        assert_eq!(plan.days[0].topic_ids, vec!["topic-1", "topic-2"]);
        assert!(plan.review_topics.is_empty());
    }

    #[test]
    fn test_balanced_without_topics() {
        let plan = balanced_distribution(&[], 4, 1).unwrap();
        assert_eq!(plan.days.len(), 4);
        assert!(plan.days.iter().all(|d| d.topic_ids.is_empty()));
    }
}
