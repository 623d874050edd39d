use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::time::timeout;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::driver::{Driver, DriverFactory};

use super::context::Context;
use super::error::EngineError;
use super::metrics::{MetricsRecorder, RunMetrics, StepMetrics};
use super::notify::{Notifier, RunNotification};
use super::retry::RetrySupervisor;
use super::step::{StepInstance, StepOutcome};

/// Upper bound on notifier delivery once the run has finished.
pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything a finished run leaves behind.
#[derive(Debug)]
pub struct RunOutput {
    pub success: bool,
    pub metrics: RunMetrics,
    pub context: Context,
}

/// Runs an ordered step list against one driver, halting on the first
/// failed step.
pub struct Orchestrator {
    bot_name: String,
    factory: Arc<dyn DriverFactory>,
    steps: Vec<StepInstance>,
    notifier: Option<Arc<dyn Notifier>>,
    supervisor: RetrySupervisor,
    correlation_id: Option<Uuid>,
    notify_timeout: Duration,
}

impl Orchestrator {
    pub fn new(bot_name: impl Into<String>, factory: Arc<dyn DriverFactory>) -> Self {
        Self {
            bot_name: bot_name.into(),
            factory,
            steps: Vec::new(),
            notifier: None,
            supervisor: RetrySupervisor::new(),
            correlation_id: None,
            notify_timeout: DEFAULT_NOTIFY_TIMEOUT,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_optional_notifier(mut self, notifier: Option<Arc<dyn Notifier>>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Pins the correlation id instead of generating one per run.
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_notify_timeout(mut self, limit: Duration) -> Self {
        self.notify_timeout = limit;
        self
    }

    pub fn add_step(mut self, step: StepInstance) -> Self {
        self.steps.push(step);
        self
    }

    pub fn add_steps(mut self, steps: impl IntoIterator<Item = StepInstance>) -> Self {
        self.steps.extend(steps);
        self
    }

    pub fn bot_name(&self) -> &str {
        &self.bot_name
    }

    pub fn steps(&self) -> &[StepInstance] {
        &self.steps
    }

    pub async fn run(&self) -> bool {
        self.execute().await.success
    }

    /// Runs once with a fresh Context and metrics record.
    pub async fn execute(&self) -> RunOutput {
        let correlation_id = self.correlation_id.unwrap_or_else(Uuid::new_v4);
        let span = info_span!("run", bot = %self.bot_name, correlation_id = %correlation_id);
        self.execute_with_id(correlation_id).instrument(span).await
    }

    async fn execute_with_id(&self, correlation_id: Uuid) -> RunOutput {
        let mut context = Context::new();
        let mut recorder = MetricsRecorder::start(&self.bot_name, correlation_id);
        info!(total_steps = self.steps.len(), "Starting run");

        let success = match self.factory.acquire().await {
            Ok(driver) => {
                let outcome = AssertUnwindSafe(self.run_steps(
                    driver.as_ref(),
                    &mut context,
                    &mut recorder,
                ))
                .catch_unwind()
                .await;
                if let Err(err) = driver.close().await {
                    warn!(error = %err, "Failed to release driver");
                }
                match outcome {
                    Ok(success) => success,
                    Err(_) => {
                        error!("Run aborted by an unexpected fault");
                        recorder.abort("unexpected fault while executing steps");
                        false
                    }
                }
            }
            Err(err) => {
                let err = EngineError::DriverAcquisition(err);
                error!(error = %err, "Run aborted before any step executed");
                recorder.abort(err.to_string());
                false
            }
        };

        let metrics = recorder.finish(success);
        info!(
            success = metrics.overall_success,
            total_steps = metrics.total_steps,
            failed_steps = metrics.failed_steps,
            skipped_steps = metrics.skipped_steps,
            success_rate = metrics.success_rate,
            duration_seconds = metrics.duration_seconds,
            "Run finished"
        );
        self.notify(&metrics).await;

        RunOutput {
            success: metrics.overall_success,
            metrics,
            context,
        }
    }

    async fn run_steps(
        &self,
        driver: &dyn Driver,
        context: &mut Context,
        recorder: &mut MetricsRecorder,
    ) -> bool {
        let total = self.steps.len();
        for (index, instance) in self.steps.iter().enumerate() {
            let position = index + 1;
            if !instance.is_enabled() {
                info!(
                    step = instance.name(),
                    kind = instance.kind(),
                    position,
                    total,
                    "Skipping disabled step"
                );
                recorder.record(StepMetrics::skipped(instance));
                continue;
            }

            info!(
                step = instance.name(),
                kind = instance.kind(),
                position,
                total,
                description = %instance.describe(),
                "Executing step"
            );
            let run = self.supervisor.run(instance, driver, context).await;
            let report = context.drain_bridge();
            recorder.record(StepMetrics::from_run(instance, &run, &report));

            if let StepOutcome::Failure(reason) = &run.outcome {
                error!(
                    step = instance.name(),
                    attempts = run.attempts,
                    error = %reason,
                    "Step failed, halting run"
                );
                return false;
            }
        }
        true
    }

    async fn notify(&self, metrics: &RunMetrics) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        let notification = RunNotification::from_metrics(metrics);
        match timeout(self.notify_timeout, notifier.notify(&notification)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "Notifier failed; run outcome unchanged"),
            Err(_) => warn!(
                timeout_seconds = self.notify_timeout.as_secs_f64(),
                "Notifier timed out; run outcome unchanged"
            ),
        }
    }
}
