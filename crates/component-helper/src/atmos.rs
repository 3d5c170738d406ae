//! Atmos orchestration: deploy, destroy, read outputs, plan
//!
//! Every call shells out to the `atmos` CLI. The [`Orchestrator`] trait is the
//! seam the suite runner talks to, so the lifecycle can be exercised without
//! real infrastructure.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::Operation;
use crate::context::CallContext;
use crate::error::{HarnessError, HarnessResult};

/// Terraform variable overrides passed to a component
pub type Vars = BTreeMap<String, Value>;

/// A component instance: which component, in which stack, with which overrides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentRef {
    pub component: String,
    pub stack: String,
    #[serde(default)]
    pub vars: Vars,
}

impl ComponentRef {
    pub fn new(component: impl Into<String>, stack: impl Into<String>, vars: Vars) -> Self {
        Self {
            component: component.into(),
            stack: stack.into(),
            vars,
        }
    }

    /// Copy of this reference with one variable replaced
    pub fn with_var(&self, key: &str, value: Value) -> Self {
        let mut next = self.clone();
        next.vars.insert(key.to_string(), value);
        next
    }

    /// Append `identifier` to the `attributes` list so resource names are
    /// unique per run. Existing attributes are kept.
    pub fn with_attribute(&self, identifier: &str) -> Self {
        let mut attributes = match self.vars.get("attributes") {
            Some(Value::Array(items)) => items.clone(),
            Some(other) => vec![other.clone()],
            None => Vec::new(),
        };
        let id = Value::String(identifier.to_string());
        if !attributes.contains(&id) {
            attributes.push(id);
        }
        self.with_var("attributes", Value::Array(attributes))
    }
}

impl fmt::Display for ComponentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (stack {})", self.component, self.stack)
    }
}

/// Outputs of an applied component, keyed by output name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Outputs(BTreeMap<String, Value>);

impl Outputs {
    pub fn new(values: BTreeMap<String, Value>) -> Self {
        Self(values)
    }

    /// Output rendered as a string. String outputs are returned verbatim,
    /// everything else as compact JSON.
    pub fn get(&self, key: &str) -> Option<String> {
        self.0.get(key).map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    pub fn raw(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Parse the stdout of `terraform output -json`.
    ///
    /// atmos may print init chatter before the JSON document, so everything
    /// before the first line opening an object is skipped.
    pub fn parse(stdout: &str) -> HarnessResult<Self> {
        let start = stdout
            .lines()
            .scan(0usize, |offset, line| {
                let at = *offset;
                *offset += line.len() + 1;
                Some((at, line))
            })
            .find(|(_, line)| line.trim_start().starts_with('{'))
            .map(|(at, _)| at);

        let Some(start) = start else {
            return Ok(Self::default());
        };
        let end = stdout
            .rfind('}')
            .map(|i| i + 1)
            .filter(|&end| end > start)
            .unwrap_or(stdout.len());
        let doc: BTreeMap<String, TerraformOutput> = serde_json::from_str(&stdout[start..end])?;

        Ok(Self(
            doc.into_iter()
                .map(|(key, output)| (key, output.value))
                .collect(),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct TerraformOutput {
    value: Value,
}

/// Parsed result of `terraform plan -detailed-exitcode`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub exit_code: i32,
    pub to_add: u32,
    pub to_change: u32,
    pub to_destroy: u32,
}

fn plan_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"Plan: (\d+) to add, (\d+) to change, (\d+) to destroy")
            .expect("plan summary pattern is valid")
    })
}

impl PlanSummary {
    /// Build a summary from the plan's exit code and stdout
    pub fn parse(exit_code: i32, stdout: &str) -> Self {
        let mut summary = Self {
            exit_code,
            ..Self::default()
        };
        if let Some(caps) = plan_line().captures(stdout) {
            let n = |i: usize| caps[i].parse().unwrap_or(0);
            summary.to_add = n(1);
            summary.to_change = n(2);
            summary.to_destroy = n(3);
        }
        summary
    }

    /// Exit code 2 means the plan is non-empty
    pub fn has_changes(&self) -> bool {
        self.exit_code == 2 || self.total() > 0
    }

    pub fn total(&self) -> u32 {
        self.to_add + self.to_change + self.to_destroy
    }
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to add, {} to change, {} to destroy (exit code {})",
            self.to_add, self.to_change, self.to_destroy, self.exit_code
        )
    }
}

/// Operations the harness needs from the infrastructure tool
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Apply the component; blocks until the apply finishes
    async fn deploy(&self, ctx: &CallContext, target: &ComponentRef) -> HarnessResult<()>;

    /// Destroy the component
    async fn destroy(&self, ctx: &CallContext, target: &ComponentRef) -> HarnessResult<()>;

    /// Read all outputs of an applied component
    async fn outputs(&self, ctx: &CallContext, target: &ComponentRef) -> HarnessResult<Outputs>;

    /// Plan the component and report pending changes
    async fn plan(&self, ctx: &CallContext, target: &ComponentRef) -> HarnessResult<PlanSummary>;

    /// Pull vendored components into the working directory
    async fn vendor_pull(&self, ctx: &CallContext) -> HarnessResult<()>;
}

/// `atmos terraform` subcommands the harness runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subcommand {
    Deploy,
    Destroy,
    Plan,
    Output,
}

impl Subcommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Subcommand::Deploy => "deploy",
            Subcommand::Destroy => "destroy",
            Subcommand::Plan => "plan",
            Subcommand::Output => "output",
        }
    }

    /// Flags placed before any `-var` overrides
    fn flags(&self) -> &'static [&'static str] {
        match self {
            Subcommand::Deploy => &["-no-color"],
            Subcommand::Destroy => &["-auto-approve", "-no-color"],
            Subcommand::Plan => &["-detailed-exitcode", "-input=false", "-no-color"],
            Subcommand::Output => &["-json", "-no-color"],
        }
    }

    fn takes_vars(&self) -> bool {
        !matches!(self, Subcommand::Output)
    }

    fn operation(&self) -> Operation {
        match self {
            Subcommand::Deploy => Operation::Deploy,
            Subcommand::Destroy => Operation::Destroy,
            Subcommand::Plan => Operation::Plan,
            Subcommand::Output => Operation::Output,
        }
    }
}

/// Captured result of one subprocess
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// [`Orchestrator`] backed by the `atmos` CLI
#[derive(Debug, Clone)]
pub struct AtmosCli {
    binary: PathBuf,
    base_path: PathBuf,
    env: Vec<(String, String)>,
}

impl AtmosCli {
    /// `base_path` is the directory holding `atmos.yaml`, stacks and components
    pub fn new(binary: impl Into<PathBuf>, base_path: impl Into<PathBuf>) -> Self {
        let base_path = base_path.into();
        let base = base_path.to_string_lossy().to_string();
        Self {
            binary: binary.into(),
            env: vec![
                ("ATMOS_BASE_PATH".to_string(), base.clone()),
                ("ATMOS_CLI_CONFIG_PATH".to_string(), base),
                ("TF_IN_AUTOMATION".to_string(), "1".to_string()),
            ],
            base_path,
        }
    }

    /// Add an environment variable for every child process
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Arguments for `atmos terraform <subcommand>` against `target`.
    ///
    /// Variable overrides go only to subcommands that evaluate the
    /// configuration; `terraform output` rejects `-var`.
    pub fn terraform_args(subcommand: Subcommand, target: &ComponentRef) -> Vec<String> {
        let mut args = vec![
            "terraform".to_string(),
            subcommand.as_str().to_string(),
            target.component.clone(),
            "-s".to_string(),
            target.stack.clone(),
        ];
        args.extend(subcommand.flags().iter().map(|s| s.to_string()));
        if subcommand.takes_vars() {
            for (key, value) in &target.vars {
                args.push("-var".to_string());
                args.push(format!("{key}={}", render_var(value)));
            }
        }
        args
    }

    async fn run(&self, ctx: &CallContext, op: Operation, args: Vec<String>) -> HarnessResult<CommandOutput> {
        let label = format!("atmos {}", args.join(" "));
        debug!("Running: {}", label);

        let mut cmd = Command::new(&self.binary);
        cmd.args(&args)
            .current_dir(&self.base_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        let binary = self.binary.display().to_string();
        ctx.bounded(op, &label, async move {
            let start = Instant::now();
            let output = cmd.output().await.map_err(|source| HarnessError::Spawn {
                binary,
                source,
            })?;
            Ok(CommandOutput {
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                duration: start.elapsed(),
            })
        })
        .await
    }

    async fn run_checked(&self, ctx: &CallContext, subcommand: Subcommand, target: &ComponentRef) -> HarnessResult<CommandOutput> {
        let output = self
            .run(ctx, subcommand.operation(), Self::terraform_args(subcommand, target))
            .await?;
        if !output.success() {
            return Err(command_failed(subcommand.as_str(), target, &output));
        }
        Ok(output)
    }
}

#[async_trait]
impl Orchestrator for AtmosCli {
    async fn deploy(&self, ctx: &CallContext, target: &ComponentRef) -> HarnessResult<()> {
        info!("Deploying {}", target);
        let output = self
            .run_checked(ctx, Subcommand::Deploy, target)
            .await?;
        info!("Deployed {} in {:?}", target, output.duration);
        Ok(())
    }

    async fn destroy(&self, ctx: &CallContext, target: &ComponentRef) -> HarnessResult<()> {
        info!("Destroying {}", target);
        let output = self
            .run_checked(ctx, Subcommand::Destroy, target)
            .await?;
        info!("Destroyed {} in {:?}", target, output.duration);
        Ok(())
    }

    async fn outputs(&self, ctx: &CallContext, target: &ComponentRef) -> HarnessResult<Outputs> {
        let output = self
            .run_checked(ctx, Subcommand::Output, target)
            .await?;
        Outputs::parse(&output.stdout)
    }

    async fn plan(&self, ctx: &CallContext, target: &ComponentRef) -> HarnessResult<PlanSummary> {
        info!("Planning {}", target);
        let output = self
            .run(ctx, Operation::Plan, Self::terraform_args(Subcommand::Plan, target))
            .await?;
        match output.code {
            Some(code @ (0 | 2)) => Ok(PlanSummary::parse(code, &output.stdout)),
            _ => Err(command_failed("plan", target, &output)),
        }
    }

    async fn vendor_pull(&self, ctx: &CallContext) -> HarnessResult<()> {
        info!("Pulling vendored components into {}", self.base_path.display());
        let output = self
            .run(ctx, Operation::Vendor, vec!["vendor".to_string(), "pull".to_string()])
            .await?;
        if !output.success() {
            return Err(HarnessError::CommandFailed {
                command: "vendor pull".to_string(),
                component: "*".to_string(),
                stack: "*".to_string(),
                code: output.code,
                stderr: output.stderr,
            });
        }
        Ok(())
    }
}

fn command_failed(subcommand: &str, target: &ComponentRef, output: &CommandOutput) -> HarnessError {
    HarnessError::CommandFailed {
        command: format!("terraform {subcommand}"),
        component: target.component.clone(),
        stack: target.stack.clone(),
        code: output.code,
        stderr: output.stderr.trim().to_string(),
    }
}

/// Strings pass through untouched; lists, maps, numbers and bools use their
/// JSON form, which terraform accepts as HCL on the command line.
fn render_var(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
