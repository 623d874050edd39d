use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::bridge::BridgeReport;
use super::retry::SupervisedRun;
use super::step::{StepInstance, StepOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepMetrics {
    pub name: String,
    pub kind: String,
    pub status: StepStatus,
    pub duration_seconds: f64,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub progress: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
}

impl StepMetrics {
    pub fn skipped(instance: &StepInstance) -> Self {
        Self {
            name: instance.name().to_string(),
            kind: instance.kind().to_string(),
            status: StepStatus::Skipped,
            duration_seconds: 0.0,
            attempts: 0,
            error_message: None,
            progress: 0,
            files: Vec::new(),
        }
    }

    pub fn from_run(instance: &StepInstance, run: &SupervisedRun, report: &BridgeReport) -> Self {
        let (status, error_message) = match &run.outcome {
            StepOutcome::Success => (StepStatus::Succeeded, None),
            StepOutcome::Failure(reason) => (StepStatus::Failed, Some(reason.clone())),
        };
        Self {
            name: instance.name().to_string(),
            kind: instance.kind().to_string(),
            status,
            duration_seconds: run.elapsed.as_secs_f64(),
            attempts: run.attempts,
            error_message,
            progress: report.progress,
            files: report
                .files
                .iter()
                .map(|artifact| artifact.path.to_string_lossy().into_owned())
                .collect(),
        }
    }
}

/// Collects step records while a run is in flight.
#[derive(Debug)]
pub struct MetricsRecorder {
    bot_name: String,
    correlation_id: Uuid,
    start_time: DateTime<Utc>,
    clock: Instant,
    steps: Vec<StepMetrics>,
    abort_reason: Option<String>,
}

impl MetricsRecorder {
    pub fn start(bot_name: impl Into<String>, correlation_id: Uuid) -> Self {
        Self {
            bot_name: bot_name.into(),
            correlation_id,
            start_time: Utc::now(),
            clock: Instant::now(),
            steps: Vec::new(),
            abort_reason: None,
        }
    }

    pub fn record(&mut self, step: StepMetrics) {
        self.steps.push(step);
    }

    /// Notes a run-level fault that happened outside any step.
    pub fn abort(&mut self, reason: impl Into<String>) {
        self.abort_reason = Some(reason.into());
    }

    pub fn steps(&self) -> &[StepMetrics] {
        &self.steps
    }

    /// Seals the record. The returned metrics are never modified again.
    pub fn finish(self, overall_success: bool) -> RunMetrics {
        let count = |status: StepStatus| -> usize {
            self.steps.iter().filter(|step| step.status == status).count()
        };
        let succeeded_steps = count(StepStatus::Succeeded);
        let failed_steps = count(StepStatus::Failed);
        let skipped_steps = count(StepStatus::Skipped);
        let total_steps = succeeded_steps + failed_steps;
        let success_rate = if total_steps == 0 {
            0.0
        } else {
            (succeeded_steps as f64 / total_steps as f64) * 100.0
        };
        RunMetrics {
            bot_name: self.bot_name,
            correlation_id: self.correlation_id,
            start_time: self.start_time,
            end_time: Utc::now(),
            duration_seconds: self.clock.elapsed().as_secs_f64(),
            overall_success: overall_success && self.abort_reason.is_none(),
            total_steps,
            succeeded_steps,
            failed_steps,
            skipped_steps,
            success_rate,
            abort_reason: self.abort_reason,
            steps: self.steps,
        }
    }
}

/// Final, read-only record of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub bot_name: String,
    pub correlation_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: f64,
    pub overall_success: bool,
    /// Steps that reached execution.
    pub total_steps: usize,
    pub succeeded_steps: usize,
    pub failed_steps: usize,
    pub skipped_steps: usize,
    pub success_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
    pub steps: Vec<StepMetrics>,
}

impl RunMetrics {
    pub fn failed_step(&self) -> Option<&StepMetrics> {
        self.steps
            .iter()
            .find(|step| step.status == StepStatus::Failed)
    }

    pub fn total_progress(&self) -> u64 {
        self.steps
            .iter()
            .fold(0u64, |acc, step| acc.saturating_add(step.progress))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(name: &str, status: StepStatus) -> StepMetrics {
        StepMetrics {
            name: name.into(),
            kind: "navigate".into(),
            status,
            duration_seconds: 0.1,
            attempts: 1,
            error_message: None,
            progress: 2,
            files: Vec::new(),
        }
    }

    #[test]
    fn success_rate_covers_executed_steps_only() {
        let mut recorder = MetricsRecorder::start("bot", Uuid::new_v4());
        recorder.record(step("a", StepStatus::Succeeded));
        recorder.record(step("b", StepStatus::Skipped));
        recorder.record(step("c", StepStatus::Succeeded));
        let metrics = recorder.finish(true);
        assert_eq!(metrics.total_steps, 2);
        assert_eq!(metrics.skipped_steps, 1);
        assert_eq!(metrics.success_rate, 100.0);
        assert_eq!(metrics.total_progress(), 6);
        assert!(metrics.start_time <= metrics.end_time);
    }

    #[test]
    fn failed_step_is_reported() {
        let mut recorder = MetricsRecorder::start("bot", Uuid::new_v4());
        recorder.record(step("a", StepStatus::Succeeded));
        recorder.record(step("b", StepStatus::Failed));
        let metrics = recorder.finish(false);
        assert_eq!(metrics.failed_steps, 1);
        assert_eq!(metrics.success_rate, 50.0);
        assert_eq!(metrics.failed_step().map(|s| s.name.as_str()), Some("b"));
    }

    #[test]
    fn empty_run_has_zero_rate() {
        let metrics = MetricsRecorder::start("bot", Uuid::new_v4()).finish(true);
        assert_eq!(metrics.total_steps, 0);
        assert_eq!(metrics.success_rate, 0.0);
        assert!(metrics.overall_success);
    }

    #[test]
    fn abort_forces_failure() {
        let mut recorder = MetricsRecorder::start("bot", Uuid::new_v4());
        recorder.abort("driver could not be acquired");
        let metrics = recorder.finish(true);
        assert!(!metrics.overall_success);
        assert_eq!(
            metrics.abort_reason.as_deref(),
            Some("driver could not be acquired")
        );
    }

    #[test]
    fn status_serializes_in_snake_case() {
        let json = serde_json::to_string(&StepStatus::Skipped).unwrap();
        assert_eq!(json, "\"skipped\"");
    }
}
