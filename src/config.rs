//! Project-level configuration loaded from `salvo.yaml`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::SalvoError;

fn default_adapter() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_judge_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_scenarios_dir() -> String {
    "scenarios".to_string()
}

fn default_storage_dir() -> String {
    ".salvo".to_string()
}

fn default_k() -> u32 {
    3
}

fn default_judge_max_tokens() -> u32 {
    1024
}

fn default_judge_threshold() -> f64 {
    0.8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingMode {
    Full,
    MetadataOnly,
}

impl Default for RecordingMode {
    fn default() -> Self {
        RecordingMode::Full
    }
}

/// Trace recording behavior: mode plus custom redaction patterns that extend
/// (never replace) the built-in set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordingConfig {
    #[serde(default)]
    pub mode: RecordingMode,
    #[serde(default)]
    pub custom_patterns: Vec<String>,
}

/// Defaults for judge assertions. Per-assertion overrides take precedence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JudgeConfig {
    #[serde(default = "default_adapter")]
    pub adapter: String,
    #[serde(default = "default_judge_model")]
    pub model: String,
    #[serde(default = "default_k")]
    pub k: u32,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_judge_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_judge_threshold")]
    pub default_threshold: f64,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            adapter: default_adapter(),
            model: default_judge_model(),
            k: default_k(),
            temperature: 0.0,
            max_tokens: default_judge_max_tokens(),
            default_threshold: default_judge_threshold(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    #[serde(default = "default_adapter")]
    pub default_adapter: String,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_scenarios_dir")]
    pub scenarios_dir: String,
    #[serde(default = "default_storage_dir")]
    pub storage_dir: String,
    #[serde(default)]
    pub ci_mode: bool,
    #[serde(default)]
    pub judge: JudgeConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            default_adapter: default_adapter(),
            default_model: default_model(),
            scenarios_dir: default_scenarios_dir(),
            storage_dir: default_storage_dir(),
            ci_mode: false,
            judge: JudgeConfig::default(),
            recording: RecordingConfig::default(),
        }
    }
}

impl ProjectConfig {
    /// Load from `salvo.yaml` under `project_root`, falling back to defaults
    /// when the file is absent or empty.
    pub fn load(project_root: &Path) -> Result<Self, SalvoError> {
        let path = project_root.join("salvo.yaml");
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)?;
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: ProjectConfig = serde_yaml::from_str(&raw)?;
        if config.judge.k == 0 || config.judge.k % 2 == 0 {
            return Err(SalvoError::ScenarioInvalid(format!(
                "judge.k must be odd and positive, got {}",
                config.judge.k
            )));
        }
        Ok(config)
    }
}

/// Walk up from `start` looking for `salvo.yaml` or the storage directory.
/// Falls back to `start` itself when neither is found.
pub fn find_project_root(start: &Path) -> PathBuf {
    let mut current = if start.is_file() {
        start.parent().unwrap_or(Path::new(".")).to_path_buf()
    } else {
        start.to_path_buf()
    };

    loop {
        if current.join("salvo.yaml").exists() || current.join(".salvo").exists() {
            return current;
        }
        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }

    if start.is_file() {
        start.parent().unwrap_or(Path::new(".")).to_path_buf()
    } else {
        start.to_path_buf()
    }
}
