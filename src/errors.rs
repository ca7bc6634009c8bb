use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TileGridError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// Reference image (template) absent or unreadable. Fatal for the current attempt.
    #[error("Asset missing: {}", .0.display())]
    AssetMissing(PathBuf),

    /// Match score below the threshold required to act on it.
    #[error("Low confidence match for '{name}': score {score:.3} < {threshold:.3}")]
    LowConfidenceMatch {
        name: String,
        score: f64,
        threshold: f64,
    },

    /// The vision capability returned something we could not interpret.
    #[error("Classifier format error: {0}")]
    ClassifierFormat(String),

    #[error("Panel '{panel}' not found within {waited_ms} ms (best score {best_score:.3})")]
    PanelTimeout {
        panel: String,
        waited_ms: u64,
        best_score: f64,
    },

    #[error("Invalid region {width}x{height}")]
    InvalidRegion { width: u32, height: u32 },

    #[error("Perception error: {0}")]
    Perception(String),

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("Vision provider error: {0}")]
    Vision(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl TileGridError {
    /// Only a missing asset or an expired panel wait may abort a round outright.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TileGridError::AssetMissing(_) | TileGridError::PanelTimeout { .. }
        )
    }
}

impl serde::Serialize for TileGridError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type TileGridResult<T> = Result<T, TileGridError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_asset_and_timeout_are_fatal() {
        assert!(TileGridError::AssetMissing(PathBuf::from("png/grid.png")).is_fatal());
        assert!(TileGridError::PanelTimeout {
            panel: "grid".into(),
            waited_ms: 10,
            best_score: 0.1,
        }
        .is_fatal());
        assert!(!TileGridError::ClassifierFormat("no json".into()).is_fatal());
        assert!(!TileGridError::InvalidRegion { width: 0, height: 4 }.is_fatal());
        assert!(!TileGridError::LowConfidenceMatch {
            name: "next.png".into(),
            score: 0.2,
            threshold: 0.68,
        }
        .is_fatal());
    }

    #[test]
    fn serializes_as_display_string() {
        let err = TileGridError::Config("missing [llm]".into());
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, "\"Configuration error: missing [llm]\"");
    }
}
