use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::errors::TileGridResult;

pub const QUESTION: &str = "question.json";
pub const GRID_OBJECTS: &str = "grid_objects.json";
pub const GRID_CHOICE: &str = "grid_choice.json";
pub const GRID_VERIFY: &str = "grid_verify.json";

/// One line of `events.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub ts: i64,
    pub round: u32,
    pub artifact: String,
    pub path: String,
}

/// Write-only per-session artifact store:
/// `<root>/<session>/round_<n>/<artifact>` plus `<root>/<session>/events.jsonl`.
/// Nothing in the solver reads these back.
pub struct SessionAudit {
    pub session_id: String,
    dir: PathBuf,
}

impl SessionAudit {
    pub fn new(root: &Path) -> Self {
        let session_id = uuid::Uuid::new_v4().to_string();
        let dir = root.join(&session_id);
        Self { session_id, dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist one artifact. Failures are logged and otherwise ignored.
    pub fn record<T: Serialize>(&self, round: u32, artifact: &str, payload: &T) {
        match self.write(round, artifact, payload) {
            Ok(path) => tracing::debug!(path = %path.display(), "audit artifact written"),
            Err(e) => tracing::warn!(round, artifact, error = %e, "audit write failed"),
        }
    }

    fn write<T: Serialize>(&self, round: u32, artifact: &str, payload: &T) -> TileGridResult<PathBuf> {
        let round_dir = self.dir.join(format!("round_{round}"));
        std::fs::create_dir_all(&round_dir)?;
        let path = round_dir.join(artifact);
        std::fs::write(&path, serde_json::to_string_pretty(payload)?)?;

        let event = AuditEvent {
            ts: chrono::Utc::now().timestamp_millis(),
            round,
            artifact: artifact.to_string(),
            path: path.display().to_string(),
        };
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join("events.jsonl"))?;
        writeln!(file, "{}", serde_json::to_string(&event)?)?;
        Ok(path)
    }
}
