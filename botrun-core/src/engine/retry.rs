use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::DefaultsSection;
use crate::driver::Driver;

use super::context::Context;
use super::pacing::PaceRange;
use super::step::{StepInstance, StepOutcome};

/// Attempt budget and pacing for one step.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, never below one.
    pub retry_count: u32,
    /// Fixed delay after a failed attempt that will be retried.
    pub retry_delay: Duration,
    /// Random pause before every attempt.
    pub pacing: PaceRange,
}

impl RetryPolicy {
    pub fn new(retry_count: u32, retry_delay: Duration, pacing: PaceRange) -> Self {
        Self {
            retry_count: retry_count.max(1),
            retry_delay,
            pacing,
        }
    }

    pub fn from_defaults(defaults: &DefaultsSection) -> Self {
        Self::new(
            defaults.retry_count,
            Duration::from_secs(defaults.retry_delay_seconds),
            PaceRange::new(defaults.wait_lower, defaults.wait_upper),
        )
    }

    /// No pacing and no delay between attempts.
    pub fn immediate(retry_count: u32) -> Self {
        Self::new(retry_count, Duration::ZERO, PaceRange::none())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_defaults(&DefaultsSection::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    Pending,
    Running,
    Retrying,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone)]
pub struct SupervisedRun {
    pub outcome: StepOutcome,
    pub attempts: u32,
    pub elapsed: Duration,
    pub transitions: Vec<AttemptState>,
}

/// Drives one step through its attempts.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetrySupervisor;

impl RetrySupervisor {
    pub fn new() -> Self {
        Self
    }

    pub async fn run(
        &self,
        instance: &StepInstance,
        driver: &dyn Driver,
        ctx: &mut Context,
    ) -> SupervisedRun {
        let policy = instance.policy();
        let started = Instant::now();
        let mut state = AttemptState::Pending;
        let mut transitions = vec![state];
        let mut attempts = 0u32;
        let mut last_failure = String::new();

        loop {
            state = match state {
                AttemptState::Pending | AttemptState::Retrying => {
                    attempts += 1;
                    let waited = policy.pacing.pause().await;
                    debug!(
                        step = instance.name(),
                        attempt = attempts,
                        max_attempts = policy.retry_count,
                        waited_ms = waited.as_millis() as u64,
                        "Starting attempt"
                    );
                    AttemptState::Running
                }
                AttemptState::Running => {
                    let attempt_started = Instant::now();
                    let outcome = attempt(instance, driver, ctx).await;
                    let duration_ms = attempt_started.elapsed().as_millis() as u64;
                    match outcome {
                        StepOutcome::Success => {
                            info!(
                                step = instance.name(),
                                attempt = attempts,
                                duration_ms,
                                "Step attempt succeeded"
                            );
                            AttemptState::Succeeded
                        }
                        StepOutcome::Failure(reason) => {
                            warn!(
                                step = instance.name(),
                                attempt = attempts,
                                max_attempts = policy.retry_count,
                                duration_ms,
                                error = %reason,
                                "Step attempt failed"
                            );
                            last_failure = reason;
                            if attempts < policy.retry_count {
                                if !policy.retry_delay.is_zero() {
                                    sleep(policy.retry_delay).await;
                                }
                                AttemptState::Retrying
                            } else {
                                AttemptState::Failed
                            }
                        }
                    }
                }
                AttemptState::Succeeded | AttemptState::Failed => break,
            };
            transitions.push(state);
        }

        let outcome = if state == AttemptState::Succeeded {
            StepOutcome::Success
        } else {
            StepOutcome::Failure(last_failure)
        };
        SupervisedRun {
            outcome,
            attempts,
            elapsed: started.elapsed(),
            transitions,
        }
    }
}

/// One attempt with errors and panics folded into a failure outcome.
async fn attempt(instance: &StepInstance, driver: &dyn Driver, ctx: &mut Context) -> StepOutcome {
    match AssertUnwindSafe(instance.step().execute(driver, ctx))
        .catch_unwind()
        .await
    {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(err)) => StepOutcome::Failure(err.to_string()),
        Err(payload) => StepOutcome::Failure(format!("step panicked: {}", panic_message(&*payload))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
