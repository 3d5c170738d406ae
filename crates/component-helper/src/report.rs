//! Case and suite results

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::case::CaseContext;
use crate::error::HarnessResult;
use crate::lifecycle::CaseState;

/// Result of running a single case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseReport {
    pub name: String,
    pub state: CaseState,
    pub success: bool,
    pub skipped: bool,
    #[serde(default)]
    pub skip_reason: Option<String>,
    pub duration_ms: u64,
    /// Non-fatal check failures, in the order they were recorded
    pub failures: Vec<String>,
    /// Fatal error or panic that ended the body early
    pub error: Option<String>,
    pub cleanup_errors: Vec<String>,
}

impl CaseReport {
    pub fn skipped(name: &str, reason: String) -> Self {
        Self {
            name: name.to_string(),
            state: CaseState::Skipped,
            success: true,
            skipped: true,
            skip_reason: Some(reason),
            duration_ms: 0,
            failures: Vec::new(),
            error: None,
            cleanup_errors: Vec::new(),
        }
    }

    pub fn failed(name: &str, duration_ms: u64, error: String) -> Self {
        Self {
            name: name.to_string(),
            state: CaseState::Failed,
            success: false,
            skipped: false,
            skip_reason: None,
            duration_ms,
            failures: Vec::new(),
            error: Some(error),
            cleanup_errors: Vec::new(),
        }
    }

    pub(crate) fn from_context(ctx: &CaseContext, error: Option<String>, cleanup_errors: Vec<String>) -> Self {
        let failures = ctx.failures();
        let success = error.is_none() && failures.is_empty() && cleanup_errors.is_empty();
        Self {
            name: ctx.name().to_string(),
            state: ctx.state(),
            success,
            skipped: false,
            skip_reason: None,
            duration_ms: ctx.elapsed_ms(),
            failures,
            error,
            cleanup_errors,
        }
    }

    /// One-line description of why the case failed
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if let Some(e) = &self.error {
            parts.push(e.clone());
        }
        if !self.failures.is_empty() {
            parts.push(format!("{} check(s) failed: {}", self.failures.len(), self.failures.join("; ")));
        }
        if !self.cleanup_errors.is_empty() {
            parts.push(format!("cleanup: {}", self.cleanup_errors.join("; ")));
        }
        if parts.is_empty() {
            "ok".to_string()
        } else {
            parts.join(" | ")
        }
    }
}

/// Result of running a suite
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteReport {
    pub suite: String,
    pub random_identifier: String,
    pub started_at: DateTime<Utc>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub setup_error: Option<String>,
    pub teardown_errors: Vec<String>,
    pub cases: Vec<CaseReport>,
}

impl SuiteReport {
    pub fn new(
        suite: String,
        random_identifier: String,
        started_at: DateTime<Utc>,
        duration_ms: u64,
        setup_error: Option<String>,
        teardown_errors: Vec<String>,
        cases: Vec<CaseReport>,
    ) -> Self {
        let skipped = cases.iter().filter(|c| c.skipped).count();
        let failed = cases.iter().filter(|c| !c.success).count();
        Self {
            suite,
            random_identifier,
            started_at,
            total: cases.len(),
            passed: cases.len() - skipped - failed,
            failed,
            skipped,
            duration_ms,
            setup_error,
            teardown_errors,
            cases,
        }
    }

    /// True when every case passed or was skipped and setup/teardown were clean
    pub fn success(&self) -> bool {
        self.failed == 0 && self.setup_error.is_none() && self.teardown_errors.is_empty()
    }

    pub fn case(&self, name: &str) -> Option<&CaseReport> {
        self.cases.iter().find(|c| c.name == name)
    }

    pub fn log_summary(&self) {
        info!(
            "Suite '{}': {} passed, {} failed, {} skipped ({} ms)",
            self.suite, self.passed, self.failed, self.skipped, self.duration_ms
        );
        if let Some(e) = &self.setup_error {
            error!("Suite '{}' setup failed: {}", self.suite, e);
        }
        for e in &self.teardown_errors {
            error!("Suite '{}' teardown: {}", self.suite, e);
        }
    }

    /// Write the report as `<dir>/<suite>-results.json`
    pub fn write_json(&self, dir: &Path) -> HarnessResult<PathBuf> {
        std::fs::create_dir_all(dir)?;

        let path = dir.join(format!("{}-results.json", self.suite));
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}
