use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{TileGridError, TileGridResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub llm: LlmConfig,
    #[serde(default)]
    pub thresholds: ThresholdsConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub solver: SolverConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    pub active_provider: String,
    pub providers: HashMap<String, ProviderEntry>,
    /// Optional override for the vision role. Falls back to the active provider.
    #[serde(default)]
    pub vision: Option<RoleEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub display_name: String,
    /// Full chat-completions endpoint URL.
    pub api_base: String,
    /// Default model for this provider.
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Optional API key stored in config.toml (env var TILEGRID_<ID>_API_KEY wins).
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleEntry {
    /// Must match a key under [llm.providers.*].
    pub provider: String,
    pub model: String,
    pub temperature: Option<f64>,
}

fn default_temperature() -> f64 {
    0.1
}

/// Score gates. All values are NCC scores or confidences in [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdsConfig {
    #[serde(default = "default_question_panel")]
    pub question_panel: f64,
    #[serde(default = "default_grid_panel")]
    pub grid_panel: f64,
    /// Best-effort floor accepted for the grid panel once the wait expires.
    #[serde(default = "default_grid_panel_relaxed")]
    pub grid_panel_relaxed: f64,
    /// Minimum tile detection score for a click to be issued.
    #[serde(default = "default_object_click")]
    pub object_click: f64,
    #[serde(default = "default_label_confidence")]
    pub label_confidence: f64,
    #[serde(default = "default_button_min")]
    pub button_min: f64,
}

fn default_question_panel() -> f64 {
    0.30
}
fn default_grid_panel() -> f64 {
    0.22
}
fn default_grid_panel_relaxed() -> f64 {
    0.18
}
fn default_object_click() -> f64 {
    0.68
}
fn default_label_confidence() -> f64 {
    0.50
}
fn default_button_min() -> f64 {
    0.45
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            question_panel: default_question_panel(),
            grid_panel: default_grid_panel(),
            grid_panel_relaxed: default_grid_panel_relaxed(),
            object_click: default_object_click(),
            label_confidence: default_label_confidence(),
            button_min: default_button_min(),
        }
    }
}

impl ThresholdsConfig {
    /// NEXT/DONE buttons are accepted somewhat below the tile click gate.
    pub fn button_threshold(&self) -> f64 {
        self.button_min.max(self.object_click * 0.7)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_panel_wait_ms")]
    pub panel_wait_ms: u64,
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    #[serde(default = "default_click_pause_ms")]
    pub click_pause_ms: u64,
    #[serde(default = "default_verify_pause_ms")]
    pub verify_pause_ms: u64,
    #[serde(default = "default_round_pause_ms")]
    pub round_pause_ms: u64,
}

fn default_panel_wait_ms() -> u64 {
    35_000
}
fn default_retry_interval_ms() -> u64 {
    1_000
}
fn default_click_pause_ms() -> u64 {
    180
}
fn default_verify_pause_ms() -> u64 {
    400
}
fn default_round_pause_ms() -> u64 {
    500
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            panel_wait_ms: default_panel_wait_ms(),
            retry_interval_ms: default_retry_interval_ms(),
            click_pause_ms: default_click_pause_ms(),
            verify_pause_ms: default_verify_pause_ms(),
            round_pause_ms: default_round_pause_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    #[serde(default = "default_rounds")]
    pub rounds: u32,
    #[serde(default = "default_max_fix_rounds")]
    pub max_fix_rounds: u32,
    #[serde(default = "default_scales")]
    pub scales: Vec<f64>,
}

fn default_rounds() -> u32 {
    3
}
fn default_max_fix_rounds() -> u32 {
    2
}
pub fn default_scales() -> Vec<f64> {
    vec![0.85, 0.9, 0.95, 1.0, 1.05, 1.1, 1.15]
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            rounds: default_rounds(),
            max_fix_rounds: default_max_fix_rounds(),
            scales: default_scales(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory holding the reference templates (checkbox.png, grid_template.png, ...).
    #[serde(default = "default_assets_dir")]
    pub assets_dir: PathBuf,
    /// Root for per-session audit artifacts. Defaults to the platform data dir.
    #[serde(default)]
    pub artifacts_dir: Option<PathBuf>,
    /// Replacement for the embedded taxonomy asset.
    #[serde(default)]
    pub taxonomy_file: Option<PathBuf>,
    /// JSON object of prompt overrides keyed by prompt name.
    #[serde(default)]
    pub prompts_file: Option<PathBuf>,
}

fn default_assets_dir() -> PathBuf {
    PathBuf::from("png")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            assets_dir: default_assets_dir(),
            artifacts_dir: None,
            taxonomy_file: None,
            prompts_file: None,
        }
    }
}

impl PathsConfig {
    /// `<data_local_dir>/TileGrid/sessions`, falling back to `./sessions`.
    pub fn resolved_artifacts_dir(&self) -> PathBuf {
        if let Some(dir) = &self.artifacts_dir {
            return dir.clone();
        }
        dirs::data_local_dir()
            .map(|d| d.join("TileGrid").join("sessions"))
            .unwrap_or_else(|| PathBuf::from("sessions"))
    }
}

fn resolve_config_path() -> TileGridResult<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    Err(TileGridError::Config(
        "config.toml not found next to executable or in working directory".into(),
    ))
}

pub fn parse_config(content: &str) -> TileGridResult<AppConfig> {
    let config: AppConfig = toml::from_str(content)?;
    if config.solver.scales.is_empty() || config.solver.scales.iter().any(|s| *s <= 0.0) {
        return Err(TileGridError::Config(
            "solver.scales must be a non-empty list of positive factors".into(),
        ));
    }
    Ok(config)
}

pub fn load_config() -> TileGridResult<AppConfig> {
    let path = resolve_config_path()?;
    let content = std::fs::read_to_string(&path)?;
    let config = parse_config(&content)?;
    tracing::info!(path = %path.display(), provider = %config.llm.active_provider, "config loaded");
    Ok(config)
}
