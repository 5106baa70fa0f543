//! Prompt text for every model phase.
//!
//! Each builder returns the instruction part only; the runner appends the
//! context (page text or prior-phase JSON) and fingerprints both. Schema
//! hints are passed as system instructions where the provider supports
//! them.

use serde_json::json;

use study_planner_core::analysis::{GlobalStructure, PageAnalysisResult, TocEntry};
use study_planner_core::SynthesizedTopic;

pub const INDEX_SCHEMA: &str =
    r#"{"tableOfContents":[{"title":string,"startMarkerGuess":number}]}"#;
pub const PAGE_ANALYSIS_SCHEMA: &str = r#"{"pageAnalyses":[{"pageMarker":number,"topicsCovered":[string],"importance":"low|medium|high","difficulty":"beginner|intermediate|advanced","conceptDensity":"low|medium|high","estimatedStudyTimeMinutes":number}],"globalStructure":{"subject":string,"summary":string,"mainThemes":[string]}}"#;
pub const SYNTHESIS_SCHEMA: &str = r#"{"topics":[{"title":string,"description":string,"startMarker":number,"endMarker":number,"priority":"low|medium|high","difficulty":"beginner|intermediate|advanced","estimatedHours":number,"keyConcepts":[string]}]}"#;
pub const VALIDATION_SCHEMA: &str =
    r#"{"optimizedTopics":[{"id":string,"title":string,"description":string,"keyConcepts":[string]}]}"#;
pub const DISTRIBUTION_SCHEMA: &str =
    r#"{"dailyPlan":[{"day":number,"topics":[{"id":string,"title":string}]}]}"#;

fn schema_line(schema: &str) -> String {
    format!("Respond with JSON only, exactly in this shape: {}", schema)
}

pub fn index_search(exam_name: &str, total_markers: u32, with_attachment: bool) -> String {
    let material = if with_attachment {
        "the attached PDF"
    } else {
        "the page excerpts below"
    };
    format!(
        "You are preparing a study plan for the exam \"{exam}\".\n\
         Read {material} and reconstruct its table of contents: the main chapters \
         or sections in reading order.\n\
         Pages are addressed by PAGE markers from 1 to {total}. For every entry give \
         the marker where it starts.\n{schema}",
        exam = exam_name,
        material = material,
        total = total_markers,
        schema = schema_line(INDEX_SCHEMA),
    )
}

pub fn page_analysis(exam_name: &str, toc: &[TocEntry], first: u32, last: u32, first_batch: bool) -> String {
    let toc_lines: Vec<String> = toc
        .iter()
        .map(|e| format!("- {} (from page {})", e.title, e.start_marker_guess))
        .collect();
    let global = if first_batch {
        " Also return a globalStructure describing the whole material."
    } else {
        ""
    };
    format!(
        "Exam: \"{exam}\".\nKnown table of contents:\n{toc}\n\n\
         Analyze every page from PAGE {first} to PAGE {last}, one entry per page, \
         using the PAGE marker as pageMarker. Rate importance for the exam, \
         difficulty, concept density and minutes of study needed.{global}\n{schema}",
        exam = exam_name,
        toc = if toc_lines.is_empty() {
            "(none found)".to_string()
        } else {
            toc_lines.join("\n")
        },
        first = first,
        last = last,
        global = global,
        schema = schema_line(PAGE_ANALYSIS_SCHEMA),
    )
}

/// Compact JSON of page analyses used as synthesis context.
pub fn analyses_context(analyses: &PageAnalysisResult) -> String {
    let pages: Vec<_> = analyses
        .pages
        .iter()
        .map(|p| {
            json!({
                "m": p.marker,
                "t": p.topics_covered,
                "i": p.importance.as_str(),
                "d": p.difficulty.as_str(),
                "c": p.concept_density.as_str(),
                "min": p.estimated_study_time_minutes,
            })
        })
        .collect();
    json!({ "pages": pages }).to_string()
}

pub fn synthesis(exam_name: &str, structure: &GlobalStructure, user_notes: Option<&str>) -> String {
    let themes = if structure.main_themes.is_empty() {
        String::new()
    } else {
        format!("Main themes: {}.\n", structure.main_themes.join(", "))
    };
    let notes = user_notes
        .filter(|n| !n.trim().is_empty())
        .map(|n| format!("Student notes: {}\n", n.trim()))
        .unwrap_or_default();
    format!(
        "Exam: \"{exam}\". Subject: {subject}.\n{themes}{notes}\
         Group the analyzed pages below (m = page marker) into coherent study topics. \
         Each topic covers one contiguous marker range; ranges must not overlap and \
         together should cover every page. Prefer topics of 8 to 25 pages.\n{schema}",
        exam = exam_name,
        subject = if structure.subject.is_empty() {
            "unknown"
        } else {
            structure.subject.as_str()
        },
        themes = themes,
        notes = notes,
        schema = schema_line(SYNTHESIS_SCHEMA),
    )
}

/// Topic list used as context for validation and distribution.
pub fn topics_context(topics: &[SynthesizedTopic]) -> String {
    let rows: Vec<_> = topics
        .iter()
        .map(|t| {
            json!({
                "id": t.id,
                "title": t.title,
                "description": t.description,
                "keyConcepts": t.key_concepts,
                "totalPages": t.total_pages,
                "priority": t.priority.as_str(),
                "difficulty": t.difficulty.as_str(),
                "estimatedHours": t.estimated_hours,
            })
        })
        .collect();
    json!({ "topics": rows }).to_string()
}

pub fn validation(exam_name: &str) -> String {
    format!(
        "Exam: \"{exam}\". Improve the study topics below: give each a clear title, \
         a description of two or three sentences and up to five key concepts. \
         Keep every id. Do not add, merge or remove topics.\n{schema}",
        exam = exam_name,
        schema = schema_line(VALIDATION_SCHEMA),
    )
}

pub fn distribution(exam_name: &str, total_days: u32, review_days: u32, user_notes: Option<&str>) -> String {
    let notes = user_notes
        .filter(|n| !n.trim().is_empty())
        .map(|n| format!("Student notes: {}\n", n.trim()))
        .unwrap_or_default();
    format!(
        "Exam: \"{exam}\". Distribute the topics below over exactly {days} study days \
         (day 1 to day {days}). Keep the topic order where possible and balance the \
         estimated hours. Reserve the last {review} day(s) for review: list them with a \
         topic titled \"Ripasso generale\". Reference topics by id.\n{notes}{schema}",
        exam = exam_name,
        days = total_days,
        review = review_days,
        notes = notes,
        schema = schema_line(DISTRIBUTION_SCHEMA),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompts_name_their_keys() {
        assert!(index_search("Law", 40, true).contains("tableOfContents"));
        assert!(index_search("Law", 40, false).contains("page excerpts"));
        assert!(page_analysis("Law", &[], 1, 12, true).contains("globalStructure"));
        assert!(!page_analysis("Law", &[], 13, 24, false).contains("Also return"));
        assert!(synthesis("Law", &GlobalStructure::default(), Some("focus on torts")).contains("torts"));
        assert!(validation("Law").contains("optimizedTopics"));
        assert!(distribution("Law", 5, 1, None).contains("exactly 5 study days"));
    }
}
