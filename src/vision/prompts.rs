use std::collections::HashMap;
use std::path::Path;

use crate::errors::TileGridResult;

pub const QUESTION_EXTRACTION: &str = "question_extraction";
pub const GRID_TILE_LABEL: &str = "grid_tile_label";
pub const GRID_SELECTION: &str = "grid_selection";
pub const VERIFY_SELECTION: &str = "verify_selection";
pub const LOCATE_POINT: &str = "locate_point";

const KEYS: [&str; 5] = [
    QUESTION_EXTRACTION,
    GRID_TILE_LABEL,
    GRID_SELECTION,
    VERIFY_SELECTION,
    LOCATE_POINT,
];

const DEFAULT_QUESTION_EXTRACTION: &str = "\
The image is the task panel of a visual puzzle: instruction text plus an example picture.
Read the text, look at the example and work out which objects or creatures must be selected.

Return STRICT JSON:
{
  \"task_text\": \"<the instruction text on one line>\",
  \"selection_criteria\": \"<short rule: who or what to select>\",
  \"positive_keywords\": [\"...\"],
  \"negative_keywords\": [\"...\"],
  \"example_container\": \"<what the example object is, 1-3 words>\",
  \"example_container_for_creature\": \"<which creatures the example object is a home or shelter for>\",
  \"target_creature_category\": \"<bird / mammal / insect / fish / reptile / vehicle / clothing / container / any / unknown>\",
  \"exclude_creature_category\": \"<who must NOT be selected if stated, else empty>\"
}
Do not invent anything; rely only on the text and the picture.";

const DEFAULT_GRID_TILE_LABEL: &str = "\
Name what the picture shows, VERY briefly (1-2 words, a noun in the nominative).
Return strict JSON: {\"label\": \"<word>\", \"conf\": <0..1>}.
If unsure return label \"\" and conf 0.";

const DEFAULT_GRID_SELECTION: &str = "\
You are solving a visual puzzle. The first image is the task panel, followed by the grid tiles.
Select ALL matching tiles and return JSON {\"indexes\": [<int>, ...], \"reason\": \"...\"}.
Task: {task_text}
Rule: {selection_criteria}
Tile index order: {index_order}";

const DEFAULT_VERIFY_SELECTION: &str = "\
The image shows the 3x3 grid after clicking.
Return strict JSON {\"correct_indexes\": [<int>], \"selected_indexes\": [<int>], \"ok\": <bool>, \"reason\": \"<short>\"}.
correct_indexes are the tiles that should be selected for the task, selected_indexes the ones visibly highlighted.
Task: {task_text}
Tile index order: {index_order}";

const DEFAULT_LOCATE_POINT: &str = "\
You are a visual automation assistant. The image is a screenshot.
Find the object described by the user.
Return strict JSON {\"x\": <int>, \"y\": <int>}: the centre of that object in pixels.
If the object is not found return {\"x\": -1, \"y\": -1}.
Object: {query}";

/// Prompt texts by key, with built-in defaults and optional file overrides.
///
/// Texts may contain `{name}` placeholders that `render` fills in.
#[derive(Debug, Clone)]
pub struct PromptSet {
    prompts: HashMap<String, String>,
}

impl Default for PromptSet {
    fn default() -> Self {
        let prompts = [
            (QUESTION_EXTRACTION, DEFAULT_QUESTION_EXTRACTION),
            (GRID_TILE_LABEL, DEFAULT_GRID_TILE_LABEL),
            (GRID_SELECTION, DEFAULT_GRID_SELECTION),
            (VERIFY_SELECTION, DEFAULT_VERIFY_SELECTION),
            (LOCATE_POINT, DEFAULT_LOCATE_POINT),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Self { prompts }
    }
}

impl PromptSet {
    /// Defaults overridden by the string entries of a JSON object file.
    pub fn load(path: &Path) -> TileGridResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let overrides: HashMap<String, serde_json::Value> = serde_json::from_str(&content)?;
        let mut set = Self::default();
        for (key, value) in overrides {
            let Some(text) = value.as_str() else {
                tracing::warn!(key = %key, "prompt override is not a string, ignored");
                continue;
            };
            if !KEYS.contains(&key.as_str()) {
                tracing::warn!(key = %key, "unknown prompt key, ignored");
                continue;
            }
            set.prompts.insert(key, text.to_string());
        }
        tracing::info!(path = %path.display(), "prompt overrides loaded");
        Ok(set)
    }

    /// `load` for an optional path; a missing or unreadable file falls back to defaults.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "cannot read prompt overrides, using defaults");
            Self::default()
        })
    }

    pub fn get(&self, key: &str) -> &str {
        self.prompts.get(key).map(String::as_str).unwrap_or("")
    }

    /// Prompt text with every `{name}` placeholder replaced.
    pub fn render(&self, key: &str, vars: &[(&str, &str)]) -> String {
        vars.iter().fold(self.get(key).to_string(), |text, (name, value)| {
            text.replace(&format!("{{{name}}}"), value)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_key() {
        let set = PromptSet::default();
        for key in KEYS {
            assert!(!set.get(key).is_empty(), "{key}");
        }
        assert_eq!(set.get("nope"), "");
    }

    #[test]
    fn render_fills_placeholders() {
        let text = PromptSet::default().render(
            GRID_SELECTION,
            &[("task_text", "pick birds"), ("selection_criteria", "birds"), ("index_order", "[0, 1]")],
        );
        assert!(text.contains("Task: pick birds"));
        assert!(text.contains("Tile index order: [0, 1]"));
        assert!(!text.contains("{task_text}"));
        // JSON braces in the template survive rendering.
        assert!(text.contains("{\"indexes\""));
    }

    #[test]
    fn file_overrides_known_string_keys_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompts.json");
        std::fs::write(
            &path,
            r#"{"grid_tile_label": "label {x}", "verify_selection": 3, "other": "ignored"}"#,
        )
        .unwrap();
        let set = PromptSet::load(&path).unwrap();
        assert_eq!(set.get(GRID_TILE_LABEL), "label {x}");
        assert_eq!(set.get(VERIFY_SELECTION), PromptSet::default().get(VERIFY_SELECTION));
        assert_eq!(set.get("other"), "");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let set = PromptSet::load_or_default(Some(Path::new("/definitely/not/here.json")));
        assert_eq!(set.get(LOCATE_POINT), PromptSet::default().get(LOCATE_POINT));
    }
}
