pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod steps;
pub mod vars;
pub mod workflow;

pub use config::{
    load_runner_config, BrowserSection, DefaultsSection, HumanSection, LogFormat,
    LoggingSection, NotifierKind, NotifierSection, RunnerConfig, VariablesSection,
};
pub use driver::{
    BrowserError, BrowserResult, ChromiumDriver, ChromiumLauncher, DialogKind, Driver,
    DriverFactory, ElementSnapshot, JsDialog, Locator, LocatorStrategy,
};
pub use engine::{
    BridgeHandle, Context, DelegatedScript, EngineError, EngineResult, Notifier, Orchestrator,
    RetryPolicy, RunMetrics, RunOutput, Step, StepInstance, StepMetrics, StepOutcome,
    StepRegistry, StepSpec, StepStatus,
};
pub use error::{ConfigError, Result};
pub use vars::{ResolveMode, VariableError, VariableResolver, Variables};
pub use workflow::{load_workflow, BotSection, PreparedWorkflow, WorkflowDocument};
