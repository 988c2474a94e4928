//! One-shot task driving a single acquisition attempt.
//!
//! Phases: resource wait, executing, completing (teardown), terminal write.
//! The worker owns its `WorkerRegistration` and `ResourceToken`; both are
//! released on every exit path, the token first.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::{AcquisitionAction, ActionError, TeardownAction, TeardownError, TeardownTimeoutPolicy};
use crate::activity::{ActivityEvent, ActivityHandle};
use crate::arbiter::{ArbiterError, ResourceArbiter};
use crate::deadline::DeadlineSignal;
use crate::metrics;
use crate::registry::{ActiveWorkerRegistry, WorkerRegistration};
use crate::state::{FailureReason, FinalOutcome, ItemStatus, StateStore};

/// Time limits for one attempt.
#[derive(Debug, Clone, Copy)]
pub struct AttemptLimits {
    pub resource_timeout: Duration,
    pub teardown_timeout: Duration,
    pub teardown_policy: TeardownTimeoutPolicy,
}

/// What an attempt ended with.
#[derive(Debug, Clone)]
pub struct AttemptReport {
    pub item_id: String,
    pub attempt_id: u64,
    pub outcome: FinalOutcome,
    /// False if the store rejected the write because the attempt was
    /// superseded (force-cleared and reset) while running.
    pub recorded: bool,
    pub duration: Duration,
}

/// Collaborators shared by every worker.
#[derive(Clone)]
pub struct WorkerContext {
    pub store: Arc<StateStore>,
    pub registry: ActiveWorkerRegistry,
    pub arbiter: ResourceArbiter,
    pub action: Arc<dyn AcquisitionAction>,
    pub teardown: Arc<dyn TeardownAction>,
    pub activity: Option<ActivityHandle>,
}

pub struct AcquisitionWorker {
    ctx: WorkerContext,
    registration: WorkerRegistration,
    limits: AttemptLimits,
}

impl AcquisitionWorker {
    /// The caller has already registered the worker and moved the item to
    /// `Attempting` under `registration.attempt_id()`.
    pub fn new(ctx: WorkerContext, registration: WorkerRegistration, limits: AttemptLimits) -> Self {
        Self {
            ctx,
            registration,
            limits,
        }
    }

    pub async fn run(self) -> AttemptReport {
        let started = Instant::now();
        let item_id = self.registration.item_id().to_string();
        let attempt_id = self.registration.attempt_id();
        let deadline = self.registration.deadline().clone();
        let holder = format!("{}#{}", item_id, attempt_id);

        debug!(item_id = %item_id, attempt_id, "Waiting for resource");

        let acquired = tokio::select! {
            result = self.ctx.arbiter.acquire(&holder, self.limits.resource_timeout) => result,
            _ = deadline.expired() => Err(ArbiterError::Timeout {
                waited: started.elapsed(),
                holder: self.ctx.arbiter.holder().map(|h| h.holder),
            }),
        };

        let token = match acquired {
            Ok(token) => token,
            Err(e) => {
                let reason = match e {
                    ArbiterError::Timeout { .. } => FailureReason::ResourceTimeout,
                    ArbiterError::Retired(_) => FailureReason::ResourceUnavailable,
                };
                let detail = if deadline.is_forced() {
                    "attempt aborted while waiting for the resource".to_string()
                } else {
                    e.to_string()
                };
                warn!(item_id = %item_id, attempt_id, reason = %reason, "Resource not acquired: {}", detail);

                let outcome = FinalOutcome::failed(reason, detail);
                let recorded = self.record(&item_id, attempt_id, ItemStatus::Attempting, &outcome);
                return self.finish(item_id, attempt_id, outcome, recorded, started);
            }
        };

        info!(item_id = %item_id, attempt_id, action = self.ctx.action.name(), "Executing acquisition");

        let action_result = tokio::select! {
            result = self.ctx.action.execute(&item_id, &token, &deadline) => result,
            _ = deadline.expired() => Err(ActionError::Timeout),
        };

        let mut outcome = match action_result {
            Ok(result) => result.into_final(),
            Err(e) => {
                let detail = if deadline.is_forced() {
                    "attempt aborted before the action finished".to_string()
                } else {
                    e.to_string()
                };
                FinalOutcome::failed(e.reason(), detail)
            }
        };

        // Completing: the store transition and the registry phase change are
        // back-to-back so no observer sees one without the other.
        let teardown_deadline = DeadlineSignal::after(self.limits.teardown_timeout);
        deadline.reset(teardown_deadline.deadline());
        let completing_until = teardown_deadline.wall_clock();

        let entered = self.ctx.store.compare_and_transition_attempt(
            &item_id,
            attempt_id,
            &[ItemStatus::Attempting],
            ItemStatus::Completing,
            |s| s.attempt_deadline = Some(completing_until),
        );
        let current = match entered {
            Ok(t) if t.is_applied() => {
                self.ctx.registry.mark_completing(&self.registration);
                true
            }
            Ok(_) => {
                self.superseded(&item_id, attempt_id, &outcome);
                false
            }
            Err(e) => {
                error!(item_id = %item_id, attempt_id, error = %e, "Failed to record completing state");
                false
            }
        };

        debug!(item_id = %item_id, attempt_id, teardown = self.ctx.teardown.name(), "Tearing down");

        let teardown_result = tokio::time::timeout(
            self.limits.teardown_timeout,
            self.ctx.teardown.execute(&token, &teardown_deadline),
        )
        .await;

        match teardown_result {
            Ok(Ok(())) => {}
            Ok(Err(TeardownError::Failed(msg))) => {
                warn!(item_id = %item_id, attempt_id, "Teardown failed: {}", msg);
            }
            Ok(Err(TeardownError::Timeout)) | Err(_) => {
                error!(
                    item_id = %item_id,
                    attempt_id,
                    timeout_ms = self.limits.teardown_timeout.as_millis() as u64,
                    "Teardown exceeded its hard timeout, force-releasing resource"
                );
                outcome = with_teardown_timeout(outcome);
                if self.limits.teardown_policy == TeardownTimeoutPolicy::Quarantine {
                    let reason = format!("teardown of attempt {} for item {} hung", attempt_id, item_id);
                    self.ctx.arbiter.retire(reason.clone());
                    metrics::RESOURCE_RETIRED.set(1);
                    self.emit(ActivityEvent::ResourceRetired { reason });
                }
            }
        }

        let recorded = current && self.record(&item_id, attempt_id, ItemStatus::Completing, &outcome);

        drop(token);
        self.finish(item_id, attempt_id, outcome, recorded, started)
    }

    /// Terminal write guarded by the attempt id.
    fn record(&self, item_id: &str, attempt_id: u64, from: ItemStatus, outcome: &FinalOutcome) -> bool {
        let final_outcome = outcome.clone();
        match self.ctx.store.compare_and_transition_attempt(
            item_id,
            attempt_id,
            &[from],
            outcome.outcome,
            move |s| s.final_outcome = Some(final_outcome),
        ) {
            Ok(t) if t.is_applied() => true,
            Ok(_) => {
                self.superseded(item_id, attempt_id, outcome);
                false
            }
            Err(e) => {
                error!(item_id = %item_id, attempt_id, error = %e, "Failed to record attempt outcome");
                false
            }
        }
    }

    /// The item moved on to a newer attempt. The result is kept in the log
    /// and activity trail since the store will not take it.
    fn superseded(&self, item_id: &str, attempt_id: u64, outcome: &FinalOutcome) {
        warn!(
            item_id = %item_id,
            attempt_id,
            outcome = %outcome.outcome,
            order_number = outcome.order_number.as_deref().unwrap_or("none"),
            "Attempt superseded, result not recorded"
        );
        metrics::STALE_WRITES.inc();
        self.emit(ActivityEvent::AttemptSuperseded {
            item_id: item_id.to_string(),
            attempt_id,
            outcome: outcome.outcome.as_str().to_string(),
            order_number: outcome.order_number.clone(),
        });
    }

    fn finish(
        &self,
        item_id: String,
        attempt_id: u64,
        outcome: FinalOutcome,
        recorded: bool,
        started: Instant,
    ) -> AttemptReport {
        let duration = started.elapsed();

        if recorded {
            let reason = outcome.reason.map(|r| r.as_str()).unwrap_or("none");
            metrics::ATTEMPTS_FINISHED
                .with_label_values(&[outcome.outcome.as_str(), reason])
                .inc();

            info!(
                item_id = %item_id,
                attempt_id,
                outcome = %outcome.outcome,
                reason = %reason,
                duration_ms = duration.as_millis() as u64,
                "Attempt finished"
            );

            self.emit(ActivityEvent::AttemptFinished {
                item_id: item_id.clone(),
                attempt_id,
                outcome: outcome.outcome.as_str().to_string(),
                reason: outcome.reason.map(|r| r.as_str().to_string()),
                order_number: outcome.order_number.clone(),
                teardown_timed_out: outcome.teardown_timed_out,
                duration_ms: duration.as_millis() as u64,
            });
        }

        AttemptReport {
            item_id,
            attempt_id,
            outcome,
            recorded,
            duration,
        }
    }

    fn emit(&self, event: ActivityEvent) {
        if let Some(activity) = &self.ctx.activity {
            activity.try_emit(event);
        }
    }
}

/// A purchase survives a hung teardown (flagged); anything else becomes
/// `Failed(teardown_timeout)`.
fn with_teardown_timeout(outcome: FinalOutcome) -> FinalOutcome {
    if outcome.is_purchased() {
        FinalOutcome {
            teardown_timed_out: true,
            ..outcome
        }
    } else {
        let detail = match outcome.detail {
            Some(prev) => format!("teardown timed out after: {}", prev),
            None => "teardown timed out".to_string(),
        };
        FinalOutcome {
            teardown_timed_out: true,
            ..FinalOutcome::failed(FailureReason::TeardownTimeout, detail)
        }
    }
}
