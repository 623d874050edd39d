//! Step execution: the step contract, retry supervision, run metrics and
//! the orchestrator that ties them to one driver session.

mod bridge;
mod context;
mod error;
mod metrics;
mod notify;
mod orchestrator;
mod pacing;
mod registry;
mod retry;
mod step;

pub use bridge::{
    BridgeEvent, BridgeHandle, BridgeReport, CallbackBridge, DelegatedScript, FileArtifact,
    ProgressEvent,
};
pub use context::{Context, ContextSnapshot, PRODUCED_FILES_KEY};
pub use error::{EngineError, EngineResult};
pub use metrics::{MetricsRecorder, RunMetrics, StepMetrics, StepStatus};
pub use notify::{
    notifier_from_config, LogNotifier, Notifier, NotifyError, RunNotification,
    SlackWebhookNotifier,
};
pub use orchestrator::{Orchestrator, RunOutput, DEFAULT_NOTIFY_TIMEOUT};
pub use pacing::{PaceRange, MAX_WAIT_SECONDS};
pub use registry::{BuildContext, StepConstructor, StepRegistry};
pub use retry::{AttemptState, RetryPolicy, RetrySupervisor, SupervisedRun};
pub use step::{Step, StepInstance, StepOutcome, StepSpec};
