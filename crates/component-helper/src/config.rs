//! Harness configuration
//!
//! Settings come from an optional TOML file and are then overridden by
//! `ATMOS_HARNESS_*` environment variables, so a CI job can toggle phases
//! without editing the checked-in file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{HarnessError, HarnessResult};

/// Environment variable naming an alternative config file
pub const CONFIG_PATH_ENV: &str = "ATMOS_HARNESS_CONFIG";

/// Default config file location, relative to the project root
pub const DEFAULT_CONFIG_PATH: &str = "test/harness.toml";

const ENV_PREFIX: &str = "ATMOS_HARNESS_";

/// Top-level harness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Path to the atmos binary
    pub atmos_binary: PathBuf,

    /// Fixed identifier appended to `attributes`; random when unset
    pub random_identifier: Option<String>,

    /// Directory where run state is persisted between invocations
    pub state_dir: PathBuf,

    /// Phase toggles
    pub skip: SkipFlags,

    /// Per-operation time limits
    pub timeouts: Timeouts,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            atmos_binary: PathBuf::from("atmos"),
            random_identifier: None,
            state_dir: PathBuf::from("test/.state"),
            skip: SkipFlags::default(),
            timeouts: Timeouts::default(),
        }
    }
}

/// Phases of a run that can be switched off, mostly for iterating locally
/// against infrastructure left behind by an earlier run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SkipFlags {
    pub setup: bool,
    pub teardown: bool,
    pub deploy_dependencies: bool,
    pub destroy_dependencies: bool,
    pub deploy_component: bool,
    pub destroy_component: bool,
    pub drift_test: bool,
    pub enabled_flag_test: bool,
}

/// Time limits in seconds for each class of external call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub deploy_secs: u64,
    pub destroy_secs: u64,
    pub plan_secs: u64,
    pub output_secs: u64,
    pub vendor_secs: u64,
    pub api_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            deploy_secs: 30 * 60,
            destroy_secs: 30 * 60,
            plan_secs: 10 * 60,
            output_secs: 5 * 60,
            vendor_secs: 10 * 60,
            api_secs: 2 * 60,
        }
    }
}

/// Class of external operation, used to pick a time limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Deploy,
    Destroy,
    Plan,
    Output,
    Vendor,
    Api,
}

impl Timeouts {
    pub fn limit(&self, op: Operation) -> Duration {
        let secs = match op {
            Operation::Deploy => self.deploy_secs,
            Operation::Destroy => self.destroy_secs,
            Operation::Plan => self.plan_secs,
            Operation::Output => self.output_secs,
            Operation::Vendor => self.vendor_secs,
            Operation::Api => self.api_secs,
        };
        Duration::from_secs(secs)
    }
}

impl HarnessConfig {
    /// Load configuration for a project root.
    ///
    /// Reads `$ATMOS_HARNESS_CONFIG` or `test/harness.toml` under `root` when
    /// present, falls back to defaults otherwise, then applies environment
    /// overrides.
    pub fn load(root: &Path) -> HarnessResult<Self> {
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| root.join(DEFAULT_CONFIG_PATH));

        let mut config = Self::from_file(&path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from a TOML file, or defaults if it does not exist
    pub fn from_file(path: &Path) -> HarnessResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Self::from_toml(&content)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml(content: &str) -> HarnessResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `ATMOS_HARNESS_*` overrides using the given lookup
    pub fn apply_env<F>(&mut self, lookup: F) -> HarnessResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |name: &str, slot: &mut bool| -> HarnessResult<()> {
            let key = format!("{ENV_PREFIX}{name}");
            if let Some(value) = lookup(&key) {
                *slot = parse_bool(&key, &value)?;
            }
            Ok(())
        };

        flag("SKIP_SETUP", &mut self.skip.setup)?;
        flag("SKIP_TEARDOWN", &mut self.skip.teardown)?;
        flag("SKIP_DEPLOY_DEPENDENCIES", &mut self.skip.deploy_dependencies)?;
        flag("SKIP_DESTROY_DEPENDENCIES", &mut self.skip.destroy_dependencies)?;
        flag("SKIP_DEPLOY_COMPONENT", &mut self.skip.deploy_component)?;
        flag("SKIP_DESTROY_COMPONENT", &mut self.skip.destroy_component)?;
        flag("SKIP_DRIFT_TEST", &mut self.skip.drift_test)?;
        flag("SKIP_ENABLED_FLAG_TEST", &mut self.skip.enabled_flag_test)?;

        if let Some(id) = lookup(&format!("{ENV_PREFIX}RANDOM_IDENTIFIER")) {
            if !id.is_empty() {
                self.random_identifier = Some(id);
            }
        }
        if let Some(bin) = lookup(&format!("{ENV_PREFIX}ATMOS_BINARY")) {
            self.atmos_binary = PathBuf::from(bin);
        }

        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> HarnessResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(HarnessError::InvalidConfig(format!(
            "{key} must be a boolean, got '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_when_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = HarnessConfig::from_file(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.atmos_binary, PathBuf::from("atmos"));
        assert!(!config.skip.teardown);
        assert_eq!(config.timeouts.limit(Operation::Api), Duration::from_secs(120));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = HarnessConfig::from_toml(
            r#"
random_identifier = "abc123"

[skip]
drift_test = true

[timeouts]
deploy_secs = 60
"#,
        )
        .unwrap();

        assert_eq!(config.random_identifier.as_deref(), Some("abc123"));
        assert!(config.skip.drift_test);
        assert!(!config.skip.setup);
        assert_eq!(config.timeouts.limit(Operation::Deploy), Duration::from_secs(60));
        assert_eq!(config.timeouts.destroy_secs, 30 * 60);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("ATMOS_HARNESS_SKIP_TEARDOWN", "true"),
            ("ATMOS_HARNESS_SKIP_DRIFT_TEST", "1"),
            ("ATMOS_HARNESS_RANDOM_IDENTIFIER", "zz9"),
            ("ATMOS_HARNESS_ATMOS_BINARY", "/opt/bin/atmos"),
        ]
        .into_iter()
        .collect();

        let mut config = HarnessConfig::default();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert!(config.skip.teardown);
        assert!(config.skip.drift_test);
        assert!(!config.skip.setup);
        assert_eq!(config.random_identifier.as_deref(), Some("zz9"));
        assert_eq!(config.atmos_binary, PathBuf::from("/opt/bin/atmos"));
    }

    #[test]
    fn test_env_rejects_garbage_bool() {
        let mut config = HarnessConfig::default();
        let err = config
            .apply_env(|k| (k == "ATMOS_HARNESS_SKIP_SETUP").then(|| "maybe".to_string()))
            .unwrap_err();
        assert!(matches!(err, HarnessError::InvalidConfig(_)));
    }
}
