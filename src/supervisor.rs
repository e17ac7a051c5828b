//! Service task supervision.
//!
//! Tracks every background service task (accept loops, UDP serve loops) in
//! one owning construct. The entry point hands a `&mut Supervisor` to each
//! service launcher and then blocks on `wait()` until every task has ended,
//! which in normal operation is never.

use std::future::Future;

use tokio::task::JoinSet;
use tracing::{error, warn};

/// Owns the set of running service tasks.
///
/// Replaces an ambient global wait-counter: tasks are registered through
/// `spawn`, the outstanding count is observable through `len`, and the join
/// logic lives here rather than at the call sites.
#[derive(Default)]
pub struct Supervisor {
    tasks: JoinSet<&'static str>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register and start a named service task.
    pub fn spawn<F>(&mut self, service: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(async move {
            task.await;
            service
        });
    }

    /// Number of service tasks still running.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Block until every service task has ended.
    ///
    /// Service tasks are accept loops without a normal termination condition,
    /// so a task ending is worth a log line either way.
    pub async fn wait(mut self) {
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(service) => warn!(service, "service task ended"),
                Err(e) => error!(error = %e, "service task panicked"),
            }
        }
    }
}
