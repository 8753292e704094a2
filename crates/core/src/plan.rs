//! Lesson Planning
//!
//! Materialises the complete section/paragraph structure of the study content
//! into an ordered `LessonPlan` before a session starts. The planner has no
//! prior knowledge of how many sections or paragraphs exist: sections are
//! assumed to be numbered contiguously from 1, and the first missing section
//! ends discovery.

use crate::content::ContentAccessor;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// One topical unit of study content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Section {
    /// 1-based section id.
    pub id: u32,
    /// Paragraphs in storage order.
    pub paragraphs: Vec<String>,
}

/// Position inside a plan for progressive-disclosure teaching.
///
/// Initialised to the start of the plan and currently never advanced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanCursor {
    pub section: usize,
    pub milestone: usize,
}

/// The ordered materialisation of all discovered study content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LessonPlan {
    sections: Vec<Section>,
    cursor: PlanCursor,
}

impl LessonPlan {
    pub fn new(sections: Vec<Section>) -> Self {
        Self {
            sections,
            cursor: PlanCursor::default(),
        }
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    pub fn paragraph_count(&self) -> usize {
        self.sections.iter().map(|s| s.paragraphs.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn cursor(&self) -> PlanCursor {
        self.cursor
    }

    /// Every paragraph of every section, in plan order.
    pub fn paragraphs(&self) -> impl Iterator<Item = &str> {
        self.sections
            .iter()
            .flat_map(|s| s.paragraphs.iter().map(String::as_str))
    }
}

/// Builds the lesson plan by walking the content accessor exhaustively.
///
/// For each section id starting at 1, paragraph 0 is fetched; a failure of
/// either kind ends discovery. Otherwise paragraphs are enumerated until the
/// first failure, which only ends that section. When the accessor can list
/// its sections, ids absent from the listing end discovery without a read.
/// When it can read whole sections, each section costs a single read, and an
/// empty or unreadable section ends discovery. Content errors never escape
/// this function.
pub async fn build_plan(accessor: &dyn ContentAccessor) -> LessonPlan {
    let listed: Option<BTreeSet<u32>> = accessor
        .list_sections()
        .await
        .map(|ids| ids.into_iter().collect());

    let mut sections = Vec::new();
    for id in 1u32.. {
        if let Some(listed) = &listed {
            if !listed.contains(&id) {
                debug!(section = id, "Section not listed, ending discovery");
                break;
            }
        }

        let paragraphs = match accessor.read_section(id).await {
            Some(Ok(paragraphs)) if !paragraphs.is_empty() => paragraphs,
            Some(Ok(_)) => {
                debug!(section = id, "Section is empty, ending discovery");
                break;
            }
            Some(Err(e)) => {
                debug!(section = id, error = %e, "Section unreadable, ending discovery");
                break;
            }
            None => match fetch_paragraphs(accessor, id).await {
                Some(paragraphs) => paragraphs,
                None => break,
            },
        };
        sections.push(Section { id, paragraphs });
    }

    let plan = LessonPlan::new(sections);
    info!(
        sections = plan.section_count(),
        paragraphs = plan.paragraph_count(),
        "Lesson plan ready"
    );
    plan
}

/// Fetches a section paragraph by paragraph. `None` when its first paragraph
/// cannot be read.
async fn fetch_paragraphs(accessor: &dyn ContentAccessor, id: u32) -> Option<Vec<String>> {
    let first = match accessor.fetch(id, 0).await {
        Ok(paragraph) => paragraph,
        Err(e) => {
            debug!(section = id, error = %e, "First paragraph unavailable, ending discovery");
            return None;
        }
    };

    let mut paragraphs = vec![first];
    for index in 1usize.. {
        match accessor.fetch(id, index).await {
            Ok(paragraph) => paragraphs.push(paragraph),
            Err(e) => {
                debug!(section = id, paragraph = index, error = %e, "End of section");
                break;
            }
        }
    }
    Some(paragraphs)
}
