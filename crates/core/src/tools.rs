//! Study Material Tool Service
//!
//! Exposes the content store to the conversational model through the Model
//! Context Protocol (MCP), so the model can look up material on demand during
//! a conversation, independently of the instruction string it was built with.

use crate::content::{CONTENT_READ_ERROR, ContentAccessor, PARAGRAPH_NOT_FOUND};
use rmcp::{
    ServerHandler,
    handler::server::{router::tool::ToolRouter, tool::Parameters},
    model::{ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Arguments of the `studyMaterial` tool.
#[derive(Deserialize, JsonSchema, Debug)]
pub struct StudyMaterialArgs {
    /// The section number, as a string.
    #[schemars(description = "The section number")]
    pub section: String,
    /// The 0-based paragraph index within the section. Any JSON number is
    /// accepted; values that are not a valid index find no paragraph.
    #[schemars(description = "The paragraph you want to fetch")]
    pub paragraph: f64,
}

/// MCP service exposing the `studyMaterial` tool.
pub struct StudyMaterialService {
    content: Arc<dyn ContentAccessor>,
    tool_router: ToolRouter<Self>,
}

#[tool_handler]
impl ServerHandler for StudyMaterialService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

#[tool_router]
impl StudyMaterialService {
    pub fn new(content: Arc<dyn ContentAccessor>) -> Self {
        Self {
            content,
            tool_router: Self::tool_router(),
        }
    }

    /// Returns the paragraph text, or one of the two content sentinels.
    #[tool(
        name = "studyMaterial",
        description = "Get the study material of a particular section and paragraph."
    )]
    pub async fn study_material(
        &self,
        args: Parameters<StudyMaterialArgs>,
    ) -> Result<String, String> {
        info!(args = ?args.0, "Executing tool 'studyMaterial'");
        Ok(self.lookup(&args.0.section, args.0.paragraph).await)
    }
}

impl StudyMaterialService {
    /// Resolves a lookup to the text handed back to the model.
    pub async fn lookup(&self, section: &str, paragraph: f64) -> String {
        let Some(section) = section.trim().parse::<u32>().ok().filter(|s| *s > 0) else {
            debug!(section, "Section key does not name a section resource");
            return CONTENT_READ_ERROR.to_string();
        };
        let Some(paragraph) = paragraph_index(paragraph) else {
            debug!(section, paragraph, "Paragraph is not a valid index");
            return PARAGRAPH_NOT_FOUND.to_string();
        };
        match self.content.fetch(section, paragraph).await {
            Ok(text) => text,
            Err(e) => e.sentinel().to_string(),
        }
    }
}

/// Converts a requested paragraph number into an index, if it is one.
fn paragraph_index(paragraph: f64) -> Option<usize> {
    (paragraph.is_finite() && paragraph >= 0.0 && paragraph.fract() == 0.0)
        .then_some(paragraph as usize)
}
