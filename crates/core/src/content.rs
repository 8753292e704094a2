//! Study Content Access
//!
//! This module provides read access to the study material a tutoring session
//! teaches from. Content is addressed by a 1-based section id and a 0-based
//! paragraph index; a section is stored as one UTF-8 resource named
//! `section<N>` whose paragraphs are separated by a blank line.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

/// Separator between two paragraphs inside a section resource.
pub const PARAGRAPH_DELIMITER: &str = "\n\n";

/// Text returned by the `studyMaterial` tool when a paragraph index is out of range.
pub const PARAGRAPH_NOT_FOUND: &str = "Paragraph not found";

/// Text returned by the `studyMaterial` tool when a section cannot be read at all.
pub const CONTENT_READ_ERROR: &str = "Error reading content";

/// Reasons a paragraph could not be produced.
///
/// Both variants end an enumeration in the lesson planner; they are kept apart
/// so that callers can attribute the failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContentError {
    /// The section exists but has no paragraph at the requested index.
    #[error("section {section} has no paragraph {paragraph}")]
    NotFound { section: u32, paragraph: usize },
    /// The section resource is missing, unreadable or not valid UTF-8.
    #[error("failed to read section {section}: {reason}")]
    ReadError { section: u32, reason: String },
}

impl ContentError {
    /// The wire sentinel exposed to the conversational model for this failure.
    pub fn sentinel(&self) -> &'static str {
        match self {
            ContentError::NotFound { .. } => PARAGRAPH_NOT_FOUND,
            ContentError::ReadError { .. } => CONTENT_READ_ERROR,
        }
    }
}

/// The outcome of a single paragraph lookup.
pub type ParagraphResult = Result<String, ContentError>;

/// Read access to sectioned study content.
///
/// Implementations perform a single read attempt per call; there is no retry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContentAccessor: Send + Sync {
    /// Fetches one paragraph of one section.
    async fn fetch(&self, section: u32, paragraph: usize) -> ParagraphResult;

    /// Lists the section ids present in storage, when the store can enumerate
    /// itself. `None` means the caller has to discover sections one id at a time.
    async fn list_sections(&self) -> Option<Vec<u32>> {
        None
    }

    /// Reads every paragraph of a section in one go, when the store supports
    /// it. `None` means the caller has to fetch paragraphs one at a time.
    async fn read_section(&self, _section: u32) -> Option<Result<Vec<String>, ContentError>> {
        None
    }
}

/// Splits a section resource into its paragraphs.
///
/// Line endings are normalised and every paragraph is non-empty: runs of
/// blank lines count as a single separator, and line breaks at either end of
/// the resource or of a paragraph are dropped.
pub fn split_paragraphs(raw: &str) -> Vec<String> {
    raw.replace("\r\n", "\n")
        .split(PARAGRAPH_DELIMITER)
        .map(|p| p.trim_matches('\n'))
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parses a `section<N>` resource name into its section id.
pub fn parse_section_name(name: &str) -> Option<u32> {
    let id: u32 = name.strip_prefix("section")?.parse().ok()?;
    (id > 0).then_some(id)
}

/// A `ContentAccessor` backed by a directory of `section<N>` files.
#[derive(Debug, Clone)]
pub struct FsContentStore {
    root: PathBuf,
}

impl FsContentStore {
    /// Creates a store reading from `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory this store reads from.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn section_path(&self, section: u32) -> PathBuf {
        self.root.join(format!("section{section}"))
    }

    /// Reads and splits one section resource.
    async fn load(&self, section: u32) -> Result<Vec<String>, ContentError> {
        let path = self.section_path(section);
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => Ok(split_paragraphs(&raw)),
            Err(e) => {
                error!(path = %path.display(), error = %e, "Error reading content");
                Err(ContentError::ReadError {
                    section,
                    reason: e.to_string(),
                })
            }
        }
    }
}

#[async_trait]
impl ContentAccessor for FsContentStore {
    async fn fetch(&self, section: u32, paragraph: usize) -> ParagraphResult {
        let mut paragraphs = self.load(section).await?;
        if paragraph < paragraphs.len() {
            debug!(section, paragraph, "Fetched paragraph");
            Ok(paragraphs.swap_remove(paragraph))
        } else {
            Err(ContentError::NotFound { section, paragraph })
        }
    }

    async fn list_sections(&self) -> Option<Vec<u32>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) => {
                debug!(root = %self.root.display(), error = %e, "Content directory cannot be listed");
                return None;
            }
        };

        let mut ids = Vec::new();
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    if let Some(id) = entry.file_name().to_str().and_then(parse_section_name) {
                        ids.push(id);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(error = %e, "Listing interrupted, discovering sections by id");
                    return None;
                }
            }
        }
        ids.sort_unstable();
        Some(ids)
    }

    async fn read_section(&self, section: u32) -> Option<Result<Vec<String>, ContentError>> {
        Some(self.load(section).await)
    }
}

/// An in-memory `ContentAccessor` for development and testing.
///
/// Sections are stored already split into paragraphs. A section that was never
/// inserted behaves like a missing file and yields `ReadError`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryContentStore {
    sections: HashMap<u32, Vec<String>>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a section.
    pub fn with_section<I, S>(mut self, section: u32, paragraphs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sections
            .insert(section, paragraphs.into_iter().map(Into::into).collect());
        self
    }
}

#[async_trait]
impl ContentAccessor for InMemoryContentStore {
    async fn fetch(&self, section: u32, paragraph: usize) -> ParagraphResult {
        let paragraphs = self
            .sections
            .get(&section)
            .ok_or_else(|| ContentError::ReadError {
                section,
                reason: format!("no resource named section{section}"),
            })?;
        paragraphs
            .get(paragraph)
            .cloned()
            .ok_or(ContentError::NotFound { section, paragraph })
    }
}
