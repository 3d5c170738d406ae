//! Test fixture: working directory, run identifier, suite construction
//!
//! `set_up` copies the fixture tree (atmos.yaml, stacks, vendored
//! components) into a temporary directory and places the component under
//! test at `<terraform base path>/<target>`, where the base path comes from
//! `components.terraform.base_path` in atmos.yaml. Every atmos call of the
//! run uses that directory as its base path.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::atmos::{AtmosCli, Orchestrator};
use crate::bucket::S3BucketCleaner;
use crate::config::HarnessConfig;
use crate::context::CallContext;
use crate::error::{HarnessError, HarnessResult};
use crate::suite::{Suite, SuiteEnv};

const STATE_FILE: &str = "fixture-state.json";
const DEFAULT_TERRAFORM_BASE: &str = "components/terraform";

/// The parts of `atmos.yaml` the fixture reads
#[derive(Debug, Default, Deserialize)]
struct AtmosYaml {
    #[serde(default)]
    components: AtmosComponents,
}

#[derive(Debug, Default, Deserialize)]
struct AtmosComponents {
    #[serde(default)]
    terraform: TerraformSettings,
}

#[derive(Debug, Deserialize)]
struct TerraformSettings {
    #[serde(default = "default_terraform_base")]
    base_path: String,
}

impl Default for TerraformSettings {
    fn default() -> Self {
        Self {
            base_path: default_terraform_base(),
        }
    }
}

fn default_terraform_base() -> String {
    DEFAULT_TERRAFORM_BASE.to_string()
}

/// Options applied to every atmos invocation of the run
#[derive(Debug, Clone)]
pub struct AtmosOptions {
    /// Extra environment for child processes
    pub env: BTreeMap<String, String>,

    /// Run `atmos vendor pull` when the fixture has a `vendor.yaml`
    pub vendor_pull: bool,

    /// Directory name the component source is copied to
    pub component_target: String,
}

impl Default for AtmosOptions {
    fn default() -> Self {
        Self {
            env: BTreeMap::new(),
            vendor_pull: true,
            component_target: "target".to_string(),
        }
    }
}

/// Persisted so a later run with setup skipped can find the same
/// working directory and resource names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureState {
    pub random_identifier: String,
    pub workdir: PathBuf,
    pub created_at: DateTime<Utc>,
}

enum WorkDir {
    Temp(TempDir),
    Kept(PathBuf),
}

impl WorkDir {
    fn path(&self) -> &Path {
        match self {
            WorkDir::Temp(dir) => dir.path(),
            WorkDir::Kept(path) => path,
        }
    }
}

pub struct Fixture {
    root: PathBuf,
    region: String,
    fixtures_dir: PathBuf,
    config: HarnessConfig,
    random_identifier: String,
    options: AtmosOptions,
    workdir: Option<WorkDir>,
    ctx: CallContext,
}

impl Fixture {
    /// `root` is the component repository; `fixtures_dir` is relative to it
    pub fn new(root: impl Into<PathBuf>, region: &str, fixtures_dir: impl Into<PathBuf>) -> HarnessResult<Self> {
        let root = root.into();
        let config = HarnessConfig::load(&root)?;
        Ok(Self::with_config(root, region, fixtures_dir, config))
    }

    pub fn with_config(
        root: impl Into<PathBuf>,
        region: &str,
        fixtures_dir: impl Into<PathBuf>,
        config: HarnessConfig,
    ) -> Self {
        let random_identifier = config
            .random_identifier
            .clone()
            .unwrap_or_else(generate_identifier);
        let ctx = CallContext::new(config.timeouts.clone());
        Self {
            root: root.into(),
            region: region.to_string(),
            fixtures_dir: fixtures_dir.into(),
            config,
            random_identifier,
            options: AtmosOptions::default(),
            workdir: None,
            ctx,
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn random_identifier(&self) -> &str {
        &self.random_identifier
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Root context; cancelling it aborts every in-flight call of the run
    pub fn context(&self) -> &CallContext {
        &self.ctx
    }

    pub fn workdir(&self) -> Option<&Path> {
        self.workdir.as_ref().map(WorkDir::path)
    }

    fn state_path(&self) -> PathBuf {
        self.root.join(&self.config.state_dir).join(STATE_FILE)
    }

    /// Prepare the working directory
    pub async fn set_up(&mut self, options: AtmosOptions) -> HarnessResult<()> {
        self.options = options;

        if self.config.skip.setup {
            let state = self.load_state()?;
            info!(
                "Skipping setup, reusing {} (run id {})",
                state.workdir.display(),
                state.random_identifier
            );
            self.random_identifier = state.random_identifier;
            self.workdir = Some(WorkDir::Kept(state.workdir));
            return Ok(());
        }

        let fixtures = self.root.join(&self.fixtures_dir);
        if !fixtures.is_dir() {
            return Err(HarnessError::Setup(format!(
                "fixtures directory not found: {}",
                fixtures.display()
            )));
        }

        let tmp = tempfile::Builder::new().prefix("atmos-test-").tempdir()?;
        info!("Setting up fixture in {} (run id {})", tmp.path().display(), self.random_identifier);

        let copied = copy_tree(&fixtures, tmp.path())?;
        let source = self.root.join("src");
        if source.is_dir() {
            let dest = terraform_base_path(tmp.path())?.join(&self.options.component_target);
            copy_tree(&source, &dest)?;
        } else {
            warn!("No component source at {}", source.display());
        }
        info!("Copied {} fixture file(s)", copied);

        self.workdir = Some(WorkDir::Temp(tmp));
        self.save_state()?;

        if self.options.vendor_pull && self.workdir_path()?.join("vendor.yaml").exists() {
            self.orchestrator()?.vendor_pull(&self.ctx).await?;
        }
        Ok(())
    }

    fn workdir_path(&self) -> HarnessResult<&Path> {
        self.workdir().ok_or(HarnessError::NotSetUp)
    }

    /// Orchestrator bound to this fixture's working directory
    pub fn orchestrator(&self) -> HarnessResult<AtmosCli> {
        let mut cli = AtmosCli::new(&self.config.atmos_binary, self.workdir_path()?);
        if std::env::var_os("AWS_REGION").is_none() {
            cli = cli.with_env("AWS_REGION", &self.region);
        }
        for (key, value) in &self.options.env {
            cli = cli.with_env(key, value);
        }
        Ok(cli)
    }

    /// Build a suite that deploys through this fixture
    pub async fn suite(&self, name: &str) -> HarnessResult<Suite> {
        let env = SuiteEnv::new(
            Arc::new(self.orchestrator()?),
            self.ctx.child(),
            &self.region,
            &self.random_identifier,
        )
        .with_bucket_cleaner(Arc::new(S3BucketCleaner::from_env(&self.region).await))
        .with_skip(self.config.skip.clone());
        Ok(Suite::new(name, env))
    }

    /// Release the working directory. With teardown skipped the directory
    /// and state file are kept for the next run.
    pub async fn tear_down(&mut self) -> HarnessResult<()> {
        let Some(workdir) = self.workdir.take() else {
            return Ok(());
        };

        if self.config.skip.teardown {
            let kept = match workdir {
                WorkDir::Temp(tmp) => tmp.keep(),
                WorkDir::Kept(path) => path,
            };
            info!("Skipping teardown, keeping {}", kept.display());
            return Ok(());
        }

        match workdir {
            WorkDir::Temp(tmp) => tmp.close()?,
            WorkDir::Kept(path) => {
                if path.exists() {
                    std::fs::remove_dir_all(&path)?;
                }
            }
        }
        let state = self.state_path();
        if state.exists() {
            std::fs::remove_file(state)?;
        }
        info!("Fixture torn down");
        Ok(())
    }

    fn save_state(&self) -> HarnessResult<()> {
        let state = FixtureState {
            random_identifier: self.random_identifier.clone(),
            workdir: self.workdir_path()?.to_path_buf(),
            created_at: Utc::now(),
        };
        let path = self.state_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, serde_json::to_string_pretty(&state)?)?;
        Ok(())
    }

    fn load_state(&self) -> HarnessResult<FixtureState> {
        let path = self.state_path();
        if !path.exists() {
            return Err(HarnessError::Setup(format!(
                "setup skipped but no previous run state at {}",
                path.display()
            )));
        }
        Ok(serde_json::from_str(&std::fs::read_to_string(&path)?)?)
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        // TempDir removes itself; this only reports a missed tear_down.
        if self.workdir.is_some() && !self.config.skip.teardown {
            warn!("Fixture dropped without tear_down");
        }
    }
}

/// Six lowercase alphanumerics, short enough for AWS name limits
fn generate_identifier() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    // Resource names must not start with a digit.
    let mut chars: Vec<char> = id.chars().take(6).collect();
    if chars[0].is_ascii_digit() {
        chars[0] = (b'a' + (chars[0] as u8 - b'0')) as char;
    }
    chars.into_iter().collect()
}

/// Terraform component directory configured in `<workdir>/atmos.yaml`
fn terraform_base_path(workdir: &Path) -> HarnessResult<PathBuf> {
    let path = workdir.join("atmos.yaml");
    if !path.exists() {
        return Ok(workdir.join(DEFAULT_TERRAFORM_BASE));
    }
    let parsed: AtmosYaml = serde_yaml::from_str(&std::fs::read_to_string(&path)?)?;
    Ok(workdir.join(parsed.components.terraform.base_path))
}

/// Copy `src` into `dest`, skipping terraform working state.
/// Returns the number of files copied.
fn copy_tree(src: &Path, dest: &Path) -> HarnessResult<usize> {
    let mut copied = 0;
    let walker = WalkDir::new(src).into_iter().filter_entry(|e| {
        let name = e.file_name().to_string_lossy();
        name != ".terraform" && !name.ends_with(".tfstate") && !name.ends_with(".tfstate.backup")
    });

    for entry in walker {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| HarnessError::Setup(e.to_string()))?;
        let target = dest.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}
