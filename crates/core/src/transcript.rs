//! Session transcripts for later review.

use crate::mode::SessionMode;
use anyhow::{Context, Result};
use chrono::Local;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::{fs, io::AsyncWriteExt, sync::Mutex};
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    Agent,
    User,
    System,
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Speaker::Agent => "Agent",
            Speaker::User => "User",
            Speaker::System => "System",
        })
    }
}

/// An append-only transcript file for one session.
#[derive(Debug)]
pub struct TranscriptWriter {
    path: PathBuf,
    file: Mutex<fs::File>,
}

impl TranscriptWriter {
    /// Creates `<dir>/<room>/transcript_<timestamp>.txt` and writes its header.
    pub async fn create(dir: &Path, room: &str, mode: SessionMode) -> Result<Self> {
        let room_dir = dir.join(sanitize(room));
        fs::create_dir_all(&room_dir)
            .await
            .with_context(|| format!("Failed to create {}", room_dir.display()))?;

        let now = Local::now();
        let path = room_dir.join(format!("transcript_{}.txt", now.format("%Y%m%d_%H%M%S")));
        let mut file = fs::File::create(&path)
            .await
            .with_context(|| format!("Failed to create {}", path.display()))?;

        let header = format!(
            "Transcript for room: {}\nMode: {}\nDate: {}\n{}\n\n",
            room,
            mode,
            now.format("%Y-%m-%d %H:%M:%S"),
            "-".repeat(50)
        );
        file.write_all(header.as_bytes()).await?;
        file.flush().await?;

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one timestamped line. Failures are logged, never returned.
    pub async fn record(&self, speaker: Speaker, text: &str) {
        let line = format!("[{}] {}: {}\n", Local::now().format("%H:%M:%S"), speaker, text);
        let mut file = self.file.lock().await;
        let written = async {
            file.write_all(line.as_bytes()).await?;
            file.flush().await
        }
        .await;
        if let Err(e) = written {
            error!(path = %self.path.display(), error = %e, "Failed to save transcript");
        }
    }
}

/// Keeps a room name usable as a single path component.
fn sanitize(room: &str) -> String {
    let cleaned: String = room
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "room".to_string(),
        _ => cleaned,
    }
}
