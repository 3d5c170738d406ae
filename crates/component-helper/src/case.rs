//! Per-case context handed to test bodies
//!
//! A [`CaseContext`] deploys components, reads their outputs, records
//! non-fatal assertion failures and keeps a cleanup registry. The suite
//! runner drains the registry after the body returns, errors or panics.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::atmos::{ComponentRef, Outputs, PlanSummary, Vars};
use crate::context::CallContext;
use crate::error::{HarnessError, HarnessResult};
use crate::lifecycle::CaseState;
use crate::suite::SuiteEnv;

/// A deployed component and the outputs captured right after apply
#[derive(Debug, Clone)]
pub struct Deployment {
    pub target: ComponentRef,
    pub outputs: Outputs,
}

impl Deployment {
    /// Output `key` as a string; a missing key is a contract mismatch
    pub fn output(&self, key: &str) -> HarnessResult<String> {
        self.outputs
            .get(key)
            .ok_or_else(|| HarnessError::MissingOutput {
                component: self.target.component.clone(),
                stack: self.target.stack.clone(),
                key: key.to_string(),
            })
    }
}

struct CaseInner {
    name: String,
    env: Arc<SuiteEnv>,
    ctx: CallContext,
    started: Instant,
    state: Mutex<CaseState>,
    cleanup: Mutex<Vec<ComponentRef>>,
    failures: Mutex<Vec<String>>,
}

/// Handle passed to each test body. Cheap to clone.
#[derive(Clone)]
pub struct CaseContext {
    inner: Arc<CaseInner>,
}

impl CaseContext {
    pub(crate) fn new(name: &str, env: Arc<SuiteEnv>) -> Self {
        let ctx = env.ctx.child();
        Self {
            inner: Arc::new(CaseInner {
                name: name.to_string(),
                env,
                ctx,
                started: Instant::now(),
                state: Mutex::new(CaseState::NotDeployed),
                cleanup: Mutex::new(Vec::new()),
                failures: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn region(&self) -> &str {
        &self.inner.env.region
    }

    pub fn random_identifier(&self) -> &str {
        &self.inner.env.random_identifier
    }

    /// Context to thread through cloud API calls made by the body
    pub fn call_context(&self) -> &CallContext {
        &self.inner.ctx
    }

    pub fn state(&self) -> CaseState {
        *self.inner.state.lock()
    }

    pub(crate) fn elapsed_ms(&self) -> u64 {
        self.inner.started.elapsed().as_millis() as u64
    }

    fn transition(&self, next: CaseState) -> HarnessResult<()> {
        self.inner.state.lock().transition(next)
    }

    /// Best-effort move used around verification; an illegal move is ignored
    fn advance(&self, next: CaseState) {
        let mut state = self.inner.state.lock();
        if *state != next && state.can_transition_to(next) {
            *state = next;
        }
    }

    pub(crate) fn mark_failed(&self) {
        let mut state = self.inner.state.lock();
        if !state.is_terminal() {
            *state = CaseState::Failed;
        }
    }

    /// Deploy `component` in `stack` and capture its outputs.
    ///
    /// The destroy is registered before the apply starts so a partially
    /// applied component is still cleaned up.
    pub async fn deploy(&self, component: &str, stack: &str, vars: Vars) -> HarnessResult<Deployment> {
        let env = &self.inner.env;
        let target = ComponentRef::new(component, stack, vars).with_attribute(&env.random_identifier);

        self.transition(CaseState::Deploying)?;
        if !env.skip.destroy_component {
            self.inner.cleanup.lock().push(target.clone());
        }

        let result = async {
            if env.skip.deploy_component {
                info!("[{}] Skipping deploy of {}", self.name(), target);
            } else {
                env.orchestrator.deploy(&self.inner.ctx, &target).await?;
            }
            env.orchestrator.outputs(&self.inner.ctx, &target).await
        }
        .await;

        match result {
            Ok(outputs) => {
                self.transition(CaseState::Deployed)?;
                Ok(Deployment { target, outputs })
            }
            Err(e) => {
                error!("[{}] Deploy of {} failed: {}", self.name(), target, e);
                self.mark_failed();
                Err(e)
            }
        }
    }

    /// Output `key` of `deployment`
    pub fn output(&self, deployment: &Deployment, key: &str) -> HarnessResult<String> {
        self.advance(CaseState::Verifying);
        deployment.output(key)
    }

    /// Destroy now rather than at the end of the case
    pub async fn destroy(&self, deployment: &Deployment) -> HarnessResult<()> {
        self.inner.cleanup.lock().retain(|t| t != &deployment.target);
        if self.inner.env.skip.destroy_component {
            info!("[{}] Skipping destroy of {}", self.name(), deployment.target);
            return Ok(());
        }

        self.transition(CaseState::Destroying)?;
        match self
            .inner
            .env
            .orchestrator
            .destroy(&self.inner.ctx, &deployment.target)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => {
                self.mark_failed();
                Err(e)
            }
        }
    }

    /// Re-plan a deployed component and fail if anything would change
    pub async fn drift_test(&self, deployment: &Deployment) -> HarnessResult<PlanSummary> {
        if self.inner.env.skip.drift_test {
            info!("[{}] Skipping drift test for {}", self.name(), deployment.target);
            return Ok(PlanSummary::default());
        }

        self.transition(CaseState::DriftChecking)?;
        let summary = self
            .inner
            .env
            .orchestrator
            .plan(&self.inner.ctx, &deployment.target)
            .await?;

        if summary.has_changes() {
            return Err(HarnessError::Drift {
                component: deployment.target.component.clone(),
                stack: deployment.target.stack.clone(),
                summary,
            });
        }
        info!("[{}] No drift for {}", self.name(), deployment.target);
        Ok(summary)
    }

    /// Plan `component` with `enabled = false` and require an empty plan
    pub async fn verify_enabled_flag(&self, component: &str, stack: &str, vars: Vars) -> HarnessResult<PlanSummary> {
        let env = &self.inner.env;
        if env.skip.enabled_flag_test {
            info!("[{}] Skipping enabled flag test for {}", self.name(), component);
            return Ok(PlanSummary::default());
        }

        let target = ComponentRef::new(component, stack, vars)
            .with_attribute(&env.random_identifier)
            .with_var("enabled", Value::Bool(false));

        self.transition(CaseState::Verifying)?;
        let summary = env.orchestrator.plan(&self.inner.ctx, &target).await?;
        if summary.has_changes() {
            return Err(HarnessError::EnabledFlag {
                component: target.component,
                stack: target.stack,
                summary,
            });
        }
        info!("[{}] {} plans no resources while disabled", self.name(), target);
        Ok(summary)
    }

    /// Record a failure if `condition` is false and keep going
    pub fn check(&self, condition: bool, message: impl Into<String>) -> bool {
        self.advance(CaseState::Verifying);
        if !condition {
            let message = message.into();
            warn!("[{}] Check failed: {}", self.name(), message);
            self.inner.failures.lock().push(message);
        }
        condition
    }

    /// Record a failure if `expected != actual` and keep going
    pub fn check_eq<T>(&self, what: &str, expected: T, actual: T) -> bool
    where
        T: PartialEq + Debug,
    {
        let equal = expected == actual;
        self.check(
            equal,
            format!("{what}: expected {expected:?}, got {actual:?}"),
        )
    }

    pub fn failures(&self) -> Vec<String> {
        self.inner.failures.lock().clone()
    }

    /// Destroy everything still registered, newest first. Errors are
    /// collected so one failed destroy does not strand the others.
    pub(crate) async fn run_cleanup(&self) -> Vec<String> {
        let pending: Vec<ComponentRef> = std::mem::take(&mut *self.inner.cleanup.lock());
        let mut errors = Vec::new();

        if !pending.is_empty() {
            self.advance(CaseState::Destroying);
        }

        for target in pending.into_iter().rev() {
            // Cleanup runs even when the case was cancelled.
            let ctx = CallContext::new(self.inner.ctx.timeouts().clone());
            if let Err(e) = self.inner.env.orchestrator.destroy(&ctx, &target).await {
                error!("[{}] Cleanup destroy of {} failed: {}", self.name(), target, e);
                errors.push(e.to_string());
            }
        }

        if errors.is_empty() {
            self.advance(CaseState::Destroyed);
        } else {
            self.mark_failed();
        }
        errors
    }
}
