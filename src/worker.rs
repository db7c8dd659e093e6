//! Queue consumer
//!
//! Claims the oldest PENDING audit and runs it under a hard wall-clock limit,
//! warning in the audit trail once the soft limit passes. One audit at a
//! time; the queue is polled when empty.

use crate::audit::AuditPipeline;
use crate::models::{Audit, LogLevel};
use crate::store::AuditStore;
use anyhow::Result;
use std::time::Duration;

/// Wall-clock limits for one audit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeLimits {
    pub soft: Duration,
    pub hard: Duration,
}

pub const TIME_LIMIT_EXCEEDED: &str = "time limit exceeded";

pub struct Worker<'a> {
    pipeline: AuditPipeline<'a>,
    store: &'a AuditStore,
    limits: TimeLimits,
    poll_interval: Duration,
}

impl<'a> Worker<'a> {
    pub fn new(
        pipeline: AuditPipeline<'a>,
        store: &'a AuditStore,
        limits: TimeLimits,
        poll_interval: Duration,
    ) -> Self {
        Self {
            pipeline,
            store,
            limits,
            poll_interval,
        }
    }

    /// Run one audit under the time limits.
    ///
    /// When the hard limit fires the pipeline future is dropped, which also
    /// drops (and deletes) its workspace, and the audit is marked FAILED.
    pub async fn run_audit(&self, audit_id: i64) -> Result<Option<Audit>> {
        {
            let run = self.pipeline.process_repository_audit(audit_id);
            tokio::pin!(run);
            let soft = tokio::time::sleep(self.limits.soft);
            tokio::pin!(soft);
            let hard = tokio::time::sleep(self.limits.hard);
            tokio::pin!(hard);
            let mut warned = false;

            loop {
                tokio::select! {
                    result = &mut run => return result,
                    _ = &mut soft, if !warned => {
                        warned = true;
                        let message = format!(
                            "Soft time limit of {}s exceeded; audit will be stopped at {}s",
                            self.limits.soft.as_secs(),
                            self.limits.hard.as_secs()
                        );
                        tracing::warn!(audit_id, "{}", message);
                        if let Err(e) =
                            self.store.append_log(audit_id, LogLevel::Warning, &message)
                        {
                            tracing::warn!(audit_id, "Failed to append log: {}", e);
                        }
                    }
                    _ = &mut hard => break,
                }
            }
            // the pipeline future (and its workspace) is dropped here
        }

        tracing::error!(audit_id, "Hard time limit of {}s exceeded", self.limits.hard.as_secs());
        self.pipeline.fail_audit(audit_id, TIME_LIMIT_EXCEEDED)?;
        self.store.get_audit(audit_id)
    }

    /// Process the oldest pending audit, if any. Returns whether one ran.
    pub async fn run_once(&self) -> Result<bool> {
        let Some(audit_id) = self.store.next_pending()? else {
            return Ok(false);
        };

        tracing::info!(audit_id, "Picked up audit");
        match self.run_audit(audit_id).await? {
            Some(audit) => tracing::info!(audit_id, status = %audit.status, "Audit finished"),
            None => tracing::warn!(audit_id, "Audit disappeared while running"),
        }
        Ok(true)
    }

    /// Poll until interrupted with Ctrl-C
    pub async fn run(&self) -> Result<()> {
        tracing::info!(
            "Worker started (poll every {}s, time limit {}s)",
            self.poll_interval.as_secs(),
            self.limits.hard.as_secs()
        );

        loop {
            let idle = match self.run_once().await {
                Ok(ran) => !ran,
                Err(e) => {
                    tracing::error!("Worker iteration failed: {:#}", e);
                    true
                }
            };
            if !idle {
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutting down worker");
                    return Ok(());
                }
            }
        }
    }
}
