use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// The session token the CLI signed in with, and the server it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedSession {
    pub server: String,
    pub token: String,
}

pub struct SessionFile {
    file_path: PathBuf,
}

impl SessionFile {
    /// `<config dir>/sketchpad/session.json`
    pub fn new() -> Result<Self> {
        let config_dir = dirs::config_dir().context("Cannot determine config directory")?;
        Ok(Self {
            file_path: config_dir.join("sketchpad").join("session.json"),
        })
    }

    /// Create with custom path (for testing)
    pub fn with_path(file_path: PathBuf) -> Self {
        Self { file_path }
    }

    /// The saved token when it was issued by `server`.
    pub async fn load(&self, server: &str) -> Result<Option<String>> {
        if !self.file_path.exists() {
            return Ok(None);
        }
        let contents = tokio::fs::read_to_string(&self.file_path)
            .await
            .with_context(|| format!("Failed to read {}", self.file_path.display()))?;
        let saved: SavedSession = serde_json::from_str(&contents)
            .with_context(|| format!("Corrupt session file {}", self.file_path.display()))?;
        Ok((saved.server == server).then_some(saved.token))
    }

    pub async fn save(&self, session: &SavedSession) -> Result<()> {
        if let Some(parent) = self.file_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(session)?;

        // Write atomically using temp file + rename
        let temp_path = self.file_path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, json).await?;
        tokio::fs::rename(&temp_path, &self.file_path).await?;
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.file_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
