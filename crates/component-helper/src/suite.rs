//! Suite runner: dependencies, parallel cases, ordered teardown
//!
//! ```text
//! deploy dependencies (in order)
//!   └── cases run as sibling tasks, each holding a consumer lease
//!         body → cleanup registry drained (destroy, newest first)
//! wait for all leases
//! for each dependency (reverse order): empty bucket → destroy
//! ```

use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use tracing::{error, info, warn};

use crate::atmos::{ComponentRef, Orchestrator, Vars};
use crate::bucket::BucketCleaner;
use crate::case::CaseContext;
use crate::config::SkipFlags;
use crate::context::CallContext;
use crate::dependency::{ConsumerLease, ConsumerTracker, Dependency};
use crate::error::{HarnessError, HarnessResult};
use crate::report::{CaseReport, SuiteReport};

/// Everything a suite needs from its fixture
pub struct SuiteEnv {
    pub orchestrator: Arc<dyn Orchestrator>,
    pub bucket_cleaner: Option<Arc<dyn BucketCleaner>>,
    pub ctx: CallContext,
    pub region: String,
    pub random_identifier: String,
    pub skip: SkipFlags,
}

impl SuiteEnv {
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        ctx: CallContext,
        region: impl Into<String>,
        random_identifier: impl Into<String>,
    ) -> Self {
        Self {
            orchestrator,
            bucket_cleaner: None,
            ctx,
            region: region.into(),
            random_identifier: random_identifier.into(),
            skip: SkipFlags::default(),
        }
    }

    pub fn with_bucket_cleaner(mut self, cleaner: Arc<dyn BucketCleaner>) -> Self {
        self.bucket_cleaner = Some(cleaner);
        self
    }

    pub fn with_skip(mut self, skip: SkipFlags) -> Self {
        self.skip = skip;
        self
    }
}

type CaseBody = Box<dyn FnOnce(CaseContext) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// A registered test case
pub struct TestCase {
    name: String,
    body: Option<CaseBody>,
    skip_reason: Option<String>,
}

impl TestCase {
    /// Report the case as skipped without running its body
    pub fn skip(&mut self, reason: impl Into<String>) -> &mut Self {
        self.skip_reason = Some(reason.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A named group of cases sharing the same dependencies
pub struct Suite {
    name: String,
    env: Arc<SuiteEnv>,
    dependencies: Vec<Dependency>,
    cases: Vec<TestCase>,
    filter: Option<String>,
}

impl Suite {
    pub fn new(name: impl Into<String>, env: SuiteEnv) -> Self {
        Self {
            name: name.into(),
            env: Arc::new(env),
            dependencies: Vec::new(),
            cases: Vec::new(),
            filter: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a component deployed before any case and destroyed after all
    pub fn add_dependency(&mut self, component: &str, stack: &str, vars: Vars) -> &mut Dependency {
        self.dependencies.push(Dependency::new(component, stack, vars));
        let last = self.dependencies.len() - 1;
        &mut self.dependencies[last]
    }

    /// Register a case body
    pub fn test<F, Fut>(&mut self, name: &str, body: F) -> &mut TestCase
    where
        F: FnOnce(CaseContext) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.cases.push(TestCase {
            name: name.to_string(),
            body: Some(Box::new(move |ctx| body(ctx).boxed())),
            skip_reason: None,
        });
        let last = self.cases.len() - 1;
        &mut self.cases[last]
    }

    /// Only run cases whose name contains `pattern`; the rest are skipped
    pub fn filter(&mut self, pattern: impl Into<String>) -> &mut Self {
        self.filter = Some(pattern.into());
        self
    }

    /// Deploy dependencies, run every case concurrently, then tear the
    /// dependencies down once the last case has released them.
    pub async fn run(self) -> SuiteReport {
        let started_at = Utc::now();
        let start = Instant::now();
        let Suite {
            name,
            env,
            dependencies,
            cases,
            filter,
        } = self;

        info!("Suite '{}' ({} case(s), run id {})", name, cases.len(), env.random_identifier);

        let dependencies: Vec<Dependency> = dependencies
            .into_iter()
            .map(|mut dep| {
                dep.target = dep.target.with_attribute(&env.random_identifier);
                dep
            })
            .collect();

        let (deployed, setup_error) = deploy_dependencies(&env, &dependencies).await;

        let tracker = ConsumerTracker::new();
        let mut handles = Vec::with_capacity(cases.len());
        for mut case in cases {
            if let Some(pattern) = &filter {
                if case.skip_reason.is_none() && !case.name.contains(pattern.as_str()) {
                    case.skip_reason = Some(format!("filtered out by '{pattern}'"));
                }
            }
            let lease = tracker.acquire(&case.name);
            let env = env.clone();
            let blocked = setup_error.clone();
            handles.push((
                case.name.clone(),
                tokio::spawn(run_case(env, case, lease, blocked)),
            ));
        }

        let outcomes = join_all(
            handles
                .into_iter()
                .map(|(case_name, handle)| async move { (case_name, handle.await) }),
        )
        .await;

        let mut results = Vec::with_capacity(outcomes.len());
        for (case_name, outcome) in outcomes {
            match outcome {
                Ok(report) => results.push(report),
                Err(e) => {
                    error!("Case '{}' task failed: {}", case_name, e);
                    results.push(CaseReport::failed(&case_name, 0, format!("case task failed: {e}")));
                }
            }
        }

        tracker.wait_idle().await;

        let teardown_errors = teardown_dependencies(&env, &deployed).await;

        let report = SuiteReport::new(
            name,
            env.random_identifier.clone(),
            started_at,
            start.elapsed().as_millis() as u64,
            setup_error,
            teardown_errors,
            results,
        );
        report.log_summary();
        report
    }
}

async fn deploy_dependencies(env: &SuiteEnv, dependencies: &[Dependency]) -> (Vec<Dependency>, Option<String>) {
    let mut deployed = Vec::new();

    for dep in dependencies {
        if env.skip.deploy_dependencies {
            info!("Skipping deploy of dependency {}", dep.target);
            deployed.push(dep.clone());
            continue;
        }
        // Registered before the apply so a partial apply is still torn down.
        deployed.push(dep.clone());
        if let Err(e) = env.orchestrator.deploy(&env.ctx, &dep.target).await {
            error!("Dependency {} failed to deploy: {}", dep.target, e);
            return (deployed, Some(format!("dependency {} failed to deploy: {e}", dep.target)));
        }
    }

    (deployed, None)
}

async fn run_case(
    env: Arc<SuiteEnv>,
    mut case: TestCase,
    lease: ConsumerLease,
    blocked: Option<String>,
) -> CaseReport {
    let _lease = lease;
    let name = case.name.clone();

    if let Some(reason) = case.skip_reason.take() {
        warn!("[{}] Skipped: {}", name, reason);
        return CaseReport::skipped(&name, reason);
    }
    if let Some(reason) = blocked {
        return CaseReport::failed(&name, 0, reason);
    }
    let Some(body) = case.body.take() else {
        return CaseReport::failed(&name, 0, "case has no body".to_string());
    };

    info!("[{}] Starting", name);
    let ctx = CaseContext::new(&name, env);

    // A nested task isolates panics from failed assertions in the body.
    let outcome = tokio::spawn(body(ctx.clone())).await;
    let error = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(format!("{e:#}")),
        Err(join) if join.is_panic() => Some(format!("panicked: {}", panic_message(join.into_panic()))),
        Err(join) => Some(format!("case task cancelled: {join}")),
    };
    if error.is_some() {
        ctx.mark_failed();
    }

    let cleanup_errors = ctx.run_cleanup().await;
    let report = CaseReport::from_context(&ctx, error, cleanup_errors);
    if report.success {
        info!("✓ {} ({} ms)", report.name, report.duration_ms);
    } else {
        error!("✗ {} - {}", report.name, report.summary());
    }
    report
}

async fn teardown_dependencies(env: &SuiteEnv, deployed: &[Dependency]) -> Vec<String> {
    let mut errors = Vec::new();
    if env.skip.destroy_dependencies {
        info!("Skipping destroy of {} dependency(ies)", deployed.len());
        return errors;
    }

    // Teardown ignores the suite token so a cancelled run still cleans up.
    let ctx = CallContext::new(env.ctx.timeouts().clone());
    for dep in deployed.iter().rev() {
        if let Some(key) = &dep.empty_bucket_output {
            if let Err(e) = empty_dependency_bucket(env, &ctx, &dep.target, key).await {
                error!("Not destroying {}: {}", dep.target, e);
                errors.push(e.to_string());
                continue;
            }
        }
        if let Err(e) = env.orchestrator.destroy(&ctx, &dep.target).await {
            error!("Dependency {} failed to destroy: {}", dep.target, e);
            errors.push(e.to_string());
        }
    }
    errors
}

async fn empty_dependency_bucket(
    env: &SuiteEnv,
    ctx: &CallContext,
    target: &ComponentRef,
    key: &str,
) -> HarnessResult<()> {
    let cleaner = env.bucket_cleaner.as_ref().ok_or_else(|| HarnessError::BucketCleanup {
        bucket: format!("output {key} of {target}"),
        reason: "no bucket cleaner configured".to_string(),
    })?;

    let outputs = env.orchestrator.outputs(ctx, target).await?;
    // No output means the bucket was never created; the destroy still runs
    // for whatever a partial apply left behind.
    let Some(bucket) = outputs.get(key) else {
        warn!("{} has no output '{}', nothing to empty", target, key);
        return Ok(());
    };

    cleaner.empty_bucket(ctx, &bucket).await?;
    Ok(())
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}
