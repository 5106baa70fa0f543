//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};

use study_planner::ai::{AiModel, AiRequest};
use study_planner::error::AiModelError;

/// A PDF with one page per entry, each showing its text in Helvetica.
pub fn pdf_with_pages(texts: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });
    let mut kids: Vec<Object> = Vec::new();
    for text in texts {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![100.into(), 700.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Resources" => resources_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }
    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

/// `n` pages reading "Page 1", "Page 2", ...
pub fn numbered_pdf(n: usize) -> Vec<u8> {
    let texts: Vec<String> = (1..=n).map(|i| format!("Page {}", i)).collect();
    let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
    pdf_with_pages(&refs)
}

pub fn page_count(bytes: &[u8]) -> usize {
    Document::load_mem(bytes).unwrap().get_pages().len()
}

/// Answers each phase with a fixed response and records every request.
pub struct PhaseRouter {
    replies: HashMap<String, String>,
    accepts_files: bool,
    seen: Mutex<Vec<AiRequest>>,
}

impl PhaseRouter {
    pub fn new(replies: &[(&str, serde_json::Value)]) -> Arc<Self> {
        Arc::new(Self {
            replies: replies
                .iter()
                .map(|(phase, value)| (phase.to_string(), value.to_string()))
                .collect(),
            accepts_files: true,
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self, phase: &str) -> usize {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.phase == phase)
            .count()
    }

    pub fn requests(&self) -> Vec<AiRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl AiModel for PhaseRouter {
    fn name(&self) -> &str {
        "phase-router"
    }

    fn accepts_files(&self) -> bool {
        self.accepts_files
    }

    async fn invoke(&self, request: &AiRequest) -> Result<String, AiModelError> {
        self.seen.lock().unwrap().push(request.clone());
        self.replies
            .get(&request.phase)
            .cloned()
            .ok_or_else(|| AiModelError::Fatal(format!("no reply for phase {}", request.phase)))
    }
}
