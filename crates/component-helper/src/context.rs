//! Cancellation and deadlines for external calls

use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::{Operation, Timeouts};
use crate::error::{HarnessError, HarnessResult};

/// Carried through every atmos subprocess and cloud API call.
///
/// Cancelling the token (or a parent's token) aborts the in-flight call;
/// subprocesses are spawned with `kill_on_drop`, so abandoning the future
/// also kills the child.
#[derive(Debug, Clone)]
pub struct CallContext {
    token: CancellationToken,
    timeouts: Timeouts,
}

impl CallContext {
    pub fn new(timeouts: Timeouts) -> Self {
        Self {
            token: CancellationToken::new(),
            timeouts,
        }
    }

    /// Derive a context that is cancelled together with this one
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            timeouts: self.timeouts.clone(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    /// Run `fut` under this context's cancellation and the time limit for `op`
    pub async fn bounded<T, F>(&self, op: Operation, label: &str, fut: F) -> HarnessResult<T>
    where
        F: Future<Output = HarnessResult<T>>,
    {
        if self.token.is_cancelled() {
            return Err(HarnessError::Cancelled(label.to_string()));
        }

        let limit = self.timeouts.limit(op);
        tokio::select! {
            biased;
            _ = self.token.cancelled() => {
                warn!("Cancelled: {}", label);
                Err(HarnessError::Cancelled(label.to_string()))
            }
            res = tokio::time::timeout(limit, fut) => match res {
                Ok(inner) => inner,
                Err(_) => {
                    warn!("Timed out after {:?}: {}", limit, label);
                    Err(HarnessError::Timeout(limit, label.to_string()))
                }
            },
        }
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new(Timeouts::default())
    }
}
