//! Error types for component tests

use std::time::Duration;

use thiserror::Error;

use crate::atmos::PlanSummary;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Fixture setup failed: {0}")]
    Setup(String),

    #[error("Fixture is not set up; call set_up() first")]
    NotSetUp,

    #[error("{command} failed for {component} in stack {stack} (exit code {code:?}): {stderr}")]
    CommandFailed {
        command: String,
        component: String,
        stack: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Failed to spawn {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Output '{key}' not found for {component} in stack {stack}")]
    MissingOutput {
        component: String,
        stack: String,
        key: String,
    },

    #[error("Drift detected for {component} in stack {stack}: {summary}")]
    Drift {
        component: String,
        stack: String,
        summary: PlanSummary,
    },

    #[error("Component {component} in stack {stack} still plans resources while disabled: {summary}")]
    EnabledFlag {
        component: String,
        stack: String,
        summary: PlanSummary,
    },

    #[error("Failed to empty bucket {bucket}: {reason}")]
    BucketCleanup { bucket: String, reason: String },

    #[error("Cloud API error: {0}")]
    CloudApi(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Operation timed out after {0:?}: {1}")]
    Timeout(Duration, String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

pub type HarnessResult<T> = Result<T, HarnessError>;
