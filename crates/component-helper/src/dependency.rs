//! Suite-level dependencies and the consumer tracker guarding them

use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use crate::atmos::{ComponentRef, Vars};

/// A component deployed once before every case and destroyed after all of them
#[derive(Debug, Clone)]
pub struct Dependency {
    pub target: ComponentRef,

    /// Output naming a bucket that must be emptied before destroy
    pub empty_bucket_output: Option<String>,
}

impl Dependency {
    pub fn new(component: impl Into<String>, stack: impl Into<String>, vars: Vars) -> Self {
        Self {
            target: ComponentRef::new(component, stack, vars),
            empty_bucket_output: None,
        }
    }

    /// Empty the bucket named by output `key` before this dependency is destroyed
    pub fn empty_bucket_from(&mut self, key: impl Into<String>) -> &mut Self {
        self.empty_bucket_output = Some(key.into());
        self
    }
}

/// Counts cases still using the suite's dependencies.
///
/// Each running case holds a [`ConsumerLease`]; teardown waits on
/// [`ConsumerTracker::wait_idle`] so dependencies are only mutated once the
/// last consumer has finished its own cleanup.
#[derive(Debug, Clone)]
pub struct ConsumerTracker {
    active: Arc<watch::Sender<usize>>,
}

impl ConsumerTracker {
    pub fn new() -> Self {
        let (active, _) = watch::channel(0);
        Self {
            active: Arc::new(active),
        }
    }

    pub fn acquire(&self, name: &str) -> ConsumerLease {
        self.active.send_modify(|n| *n += 1);
        debug!("Lease acquired by {} ({} active)", name, self.active());
        ConsumerLease {
            active: self.active.clone(),
            name: name.to_string(),
        }
    }

    pub fn active(&self) -> usize {
        *self.active.borrow()
    }

    /// Resolve once no leases are outstanding
    pub async fn wait_idle(&self) {
        let mut rx = self.active.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

impl Default for ConsumerTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Released on drop, including when the holder unwinds
#[derive(Debug)]
pub struct ConsumerLease {
    active: Arc<watch::Sender<usize>>,
    name: String,
}

impl Drop for ConsumerLease {
    fn drop(&mut self) {
        self.active.send_modify(|n| *n = n.saturating_sub(1));
        debug!("Lease released by {} ({} active)", self.name, *self.active.borrow());
    }
}
