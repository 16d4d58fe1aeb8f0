//! Engine configuration (TOML).

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Engine configuration, intended to be edited by humans. Missing fields
/// fall back to defaults that match the original workflow contract
/// (`session_workspace`, `script.py`, `final_output.json`, 3 repairs).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Shared working directory for one run.
    pub workspace_dir: String,

    /// Interpreter that runs candidate scripts.
    pub interpreter: String,

    /// Provision a per-run virtual environment under the workspace instead of
    /// installing into the host interpreter.
    pub isolate_env: bool,

    /// Repair attempts after the initial generation (total candidates are
    /// `1 + max_repair_attempts`).
    pub max_repair_attempts: u32,

    /// Wall-clock budget for one candidate execution, in seconds.
    pub script_timeout_secs: u64,

    /// Wall-clock budget for one collaborator invocation, in seconds.
    pub agent_timeout_secs: u64,

    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Package registry queried for unknown imports.
    pub registry_base_url: String,

    /// Candidate script filename inside the workspace.
    pub script_filename: String,

    /// Designated final-result artifact (must contain valid JSON).
    pub final_artifact: String,

    pub generator: CollaboratorConfig,
    pub debugger: CollaboratorConfig,
    pub vision: CollaboratorConfig,
}

/// Command to execute for one collaborator role (e.g. `["my-codegen"]`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CollaboratorConfig {
    pub command: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workspace_dir: "session_workspace".to_string(),
            interpreter: "python3".to_string(),
            isolate_env: true,
            max_repair_attempts: 3,
            script_timeout_secs: 10 * 60,
            agent_timeout_secs: 10 * 60,
            output_limit_bytes: 100_000,
            registry_base_url: "https://pypi.org".to_string(),
            script_filename: "script.py".to_string(),
            final_artifact: "final_output.json".to_string(),
            generator: CollaboratorConfig::default(),
            debugger: CollaboratorConfig::default(),
            vision: CollaboratorConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workspace_dir.trim().is_empty() {
            return Err(anyhow!("workspace_dir must be non-empty"));
        }
        if self.interpreter.trim().is_empty() {
            return Err(anyhow!("interpreter must be non-empty"));
        }
        if self.script_timeout_secs == 0 {
            return Err(anyhow!("script_timeout_secs must be > 0"));
        }
        if self.agent_timeout_secs == 0 {
            return Err(anyhow!("agent_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.script_filename.trim().is_empty() || self.final_artifact.trim().is_empty() {
            return Err(anyhow!("script_filename and final_artifact must be non-empty"));
        }
        Ok(())
    }

    pub fn script_timeout(&self) -> Duration {
        Duration::from_secs(self.script_timeout_secs)
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }
}

/// Load config from a TOML file. A missing file yields defaults.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        let cfg = EngineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, buf).with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, EngineConfig::default());
        assert_eq!(cfg.max_repair_attempts, 3);
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("engine.toml");
        let cfg = EngineConfig {
            interpreter: "python3.12".to_string(),
            generator: CollaboratorConfig {
                command: vec!["my-codegen".to_string()],
            },
            ..EngineConfig::default()
        };

        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let cfg = EngineConfig {
            script_timeout_secs: 0,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("engine.toml");
        fs::write(&path, "max_repair_attempts = 1\n").expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_repair_attempts, 1);
        assert_eq!(cfg.final_artifact, "final_output.json");
    }
}
