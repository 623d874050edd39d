use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use botrun_core::engine::{notifier_from_config, NotifyError};
use botrun_core::vars::process_environment;
use botrun_core::{
    load_runner_config, load_workflow, ChromiumLauncher, DriverFactory, EngineError, LogFormat,
    RunMetrics, RunnerConfig, StepRegistry, StepStatus,
};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

pub type Result<T> = std::result::Result<T, AppError>;

const DEFAULT_CONFIG: &str = "configs/botrun.toml";
const DEFAULT_FILTER: &str = "botrun_core=info,botrunctl=info,warn";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] botrun_core::ConfigError),
    #[error("workflow error: {0}")]
    Engine(#[from] EngineError),
    #[error("notifier error: {0}")]
    Notify(#[from] NotifyError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("logging setup failed: {0}")]
    Logging(String),
    #[error("run of {bot} failed: {reason}")]
    RunFailed { bot: String, reason: String },
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Browser automation workflow runner", long_about = None)]
pub struct Cli {
    /// Caminho do botrun.toml (padrão: configs/botrun.toml, se existir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Formato de saída
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    pub format: OutputFormat,
    /// Ativa logs de depuração
    #[arg(long, short, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Executa um workflow no navegador
    Run {
        /// Arquivo do workflow (.yaml, .yml ou .json)
        workflow: PathBuf,
        /// Força o navegador em modo headless
        #[arg(long)]
        headless: bool,
    },
    /// Valida um workflow sem abrir o navegador
    Validate {
        /// Arquivo do workflow (.yaml, .yml ou .json)
        workflow: PathBuf,
    },
    /// Lista os tipos de passo registrados
    Kinds,
    /// Gera script de autocompletar para o shell
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

pub fn run(cli: Cli) -> Result<()> {
    if let Commands::Completions { shell } = &cli.command {
        let mut command = Cli::command();
        clap_complete::generate(*shell, &mut command, "botrunctl", &mut io::stdout());
        return Ok(());
    }

    let config = resolve_config(cli.config.as_deref())?;
    init_logging(&config, cli.verbose)?;
    let registry = StepRegistry::with_builtins();

    match &cli.command {
        Commands::Run { workflow, headless } => {
            let metrics = run_workflow(&registry, config, workflow, *headless)?;
            render(&metrics, cli.format)?;
            if !metrics.overall_success {
                let reason = metrics
                    .abort_reason
                    .clone()
                    .or_else(|| {
                        metrics
                            .failed_step()
                            .map(|step| format!("step {} failed", step.name))
                    })
                    .unwrap_or_else(|| "unknown failure".to_string());
                return Err(AppError::RunFailed {
                    bot: metrics.bot_name.clone(),
                    reason,
                });
            }
        }
        Commands::Validate { workflow } => {
            let report = validate_workflow(&registry, &config, workflow)?;
            render(&report, cli.format)?;
        }
        Commands::Kinds => {
            render(&KindsReport::from_registry(&registry), cli.format)?;
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}

/// An explicit path must exist; the default path is optional.
fn resolve_config(path: Option<&Path>) -> Result<RunnerConfig> {
    match path {
        Some(path) => Ok(load_runner_config(path)?),
        None if Path::new(DEFAULT_CONFIG).exists() => Ok(load_runner_config(DEFAULT_CONFIG)?),
        None => Ok(RunnerConfig::default()),
    }
}

fn init_logging(config: &RunnerConfig, verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("botrun_core=debug,botrunctl=debug,info")
    } else {
        let fallback = config
            .logging
            .filter
            .clone()
            .unwrap_or_else(|| DEFAULT_FILTER.to_string());
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr);
    let installed = match config.logging.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|err| AppError::Logging(err.to_string()))
}

fn run_workflow(
    registry: &StepRegistry,
    mut config: RunnerConfig,
    path: &Path,
    force_headless: bool,
) -> Result<RunMetrics> {
    let document = load_workflow(path)?;
    if let Some(headless) = document.bot.headless {
        config.browser.headless = headless;
    }
    if force_headless {
        config.browser.headless = true;
    }
    let notifier = notifier_from_config(&config.notifier)?;
    let prepared = document.prepare(registry, &config, &process_environment())?;
    info!(
        bot = %prepared.bot.name,
        steps = prepared.steps.len(),
        headless = config.browser.headless,
        "workflow prepared"
    );

    let factory: Arc<dyn DriverFactory> =
        Arc::new(ChromiumLauncher::new(config.browser, config.human));
    let orchestrator = prepared.into_orchestrator(factory, notifier);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let output = runtime.block_on(orchestrator.execute());
    debug!(values = output.context.values().len(), "final context");
    Ok(output.metrics)
}

fn validate_workflow(
    registry: &StepRegistry,
    config: &RunnerConfig,
    path: &Path,
) -> Result<ValidationReport> {
    let document = load_workflow(path)?;
    let prepared = document.prepare(registry, config, &process_environment())?;
    let steps = prepared
        .steps
        .iter()
        .map(|instance| {
            let policy = instance.policy();
            let (wait_lower, wait_upper) = policy.pacing.bounds();
            StepSummary {
                name: instance.name().to_string(),
                kind: instance.kind().to_string(),
                enabled: instance.is_enabled(),
                retry_count: policy.retry_count,
                retry_delay_seconds: policy.retry_delay.as_secs_f64(),
                wait_lower,
                wait_upper,
                description: instance.describe(),
            }
        })
        .collect();
    Ok(ValidationReport {
        workflow: path.display().to_string(),
        bot: prepared.bot.name,
        variables: prepared.variables.resolved().keys().cloned().collect(),
        steps,
    })
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

impl DisplayFallback for RunMetrics {
    fn display(&self) -> String {
        let verdict = if self.overall_success { "ok" } else { "falhou" };
        let mut lines = vec![
            format!(
                "Bot: {} ({verdict}, id {})",
                self.bot_name, self.correlation_id
            ),
            format!(
                "Passos: {} executados, {} ok, {} falhos, {} ignorados ({:.1}%)",
                self.total_steps,
                self.succeeded_steps,
                self.failed_steps,
                self.skipped_steps,
                self.success_rate
            ),
            format!("Duração: {:.2} s", self.duration_seconds),
        ];
        if let Some(reason) = &self.abort_reason {
            lines.push(format!("Abortado: {reason}"));
        }
        for step in &self.steps {
            let mut line = format!(
                "  - {} [{}] {} ({} tentativas, {:.2} s)",
                step.name,
                step.kind,
                step.status.as_str(),
                step.attempts,
                step.duration_seconds
            );
            if step.status == StepStatus::Failed {
                if let Some(error) = &step.error_message {
                    line.push_str(&format!(": {error}"));
                }
            }
            lines.push(line);
            for file in &step.files {
                lines.push(format!("      arquivo: {file}"));
            }
        }
        let progress = self.total_progress();
        if progress > 0 {
            lines.push(format!("Progresso reportado: {progress}"));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct ValidationReport {
    pub workflow: String,
    pub bot: String,
    pub variables: Vec<String>,
    pub steps: Vec<StepSummary>,
}

#[derive(Debug, Serialize)]
pub struct StepSummary {
    pub name: String,
    pub kind: String,
    pub enabled: bool,
    pub retry_count: u32,
    pub retry_delay_seconds: f64,
    pub wait_lower: f64,
    pub wait_upper: f64,
    pub description: String,
}

impl DisplayFallback for ValidationReport {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "Workflow {} válido (bot: {}, {} variáveis)",
            self.workflow,
            self.bot,
            self.variables.len()
        )];
        for (index, step) in self.steps.iter().enumerate() {
            let state = if step.enabled { "" } else { " [desativado]" };
            lines.push(format!(
                "  {}. {} [{}]{state} tentativas={} espera={:.1}-{:.1}s",
                index + 1,
                step.name,
                step.kind,
                step.retry_count,
                step.wait_lower,
                step.wait_upper
            ));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct KindsReport {
    pub kinds: Vec<String>,
    pub aliases: Vec<AliasEntry>,
    pub scripts: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct AliasEntry {
    pub alias: String,
    pub kind: String,
}

impl KindsReport {
    fn from_registry(registry: &StepRegistry) -> Self {
        let mut aliases: Vec<AliasEntry> = registry
            .aliases()
            .map(|(alias, kind)| AliasEntry {
                alias: alias.to_string(),
                kind: kind.to_string(),
            })
            .collect();
        aliases.sort_by(|a, b| a.alias.cmp(&b.alias));
        Self {
            kinds: registry.kinds(),
            aliases,
            scripts: registry.scripts(),
        }
    }
}

impl DisplayFallback for KindsReport {
    fn display(&self) -> String {
        let mut lines = vec!["Tipos de passo:".to_string()];
        for kind in &self.kinds {
            let aliases: Vec<&str> = self
                .aliases
                .iter()
                .filter(|entry| &entry.kind == kind)
                .map(|entry| entry.alias.as_str())
                .collect();
            if aliases.is_empty() {
                lines.push(format!("  - {kind}"));
            } else {
                lines.push(format!("  - {kind} (aliases: {})", aliases.join(", ")));
            }
        }
        if !self.scripts.is_empty() {
            lines.push(format!("Scripts: {}", self.scripts.join(", ")));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn workspace_file(relative: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join(relative)
    }

    #[test]
    fn cli_parses_run_with_global_flags() {
        let cli = Cli::try_parse_from([
            "botrunctl",
            "run",
            "workflows/example.yaml",
            "--headless",
            "--format",
            "json",
            "--verbose",
        ])
        .unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        assert!(cli.verbose);
        match cli.command {
            Commands::Run { workflow, headless } => {
                assert_eq!(workflow, PathBuf::from("workflows/example.yaml"));
                assert!(headless);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn validate_lists_every_step_of_the_example() {
        let config = load_runner_config(workspace_file("configs/botrun.toml")).unwrap();
        let registry = StepRegistry::with_builtins();
        let report =
            validate_workflow(&registry, &config, &workspace_file("workflows/example.yaml"))
                .unwrap();
        assert!(!report.steps.is_empty());
        assert!(report
            .steps
            .iter()
            .any(|step| step.kind == "authenticate"));
        let text = report.display();
        assert!(text.contains("válido"));
        assert!(text.contains("1. "));
    }

    #[test]
    fn validate_rejects_unknown_kind() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.yaml");
        fs::write(
            &path,
            "bot:\n  name: broken\nsteps:\n  - type: teleport\n    name: jump\n",
        )
        .unwrap();
        let registry = StepRegistry::with_builtins();
        let err = validate_workflow(&registry, &RunnerConfig::default(), &path).unwrap_err();
        assert!(matches!(
            err,
            AppError::Engine(EngineError::UnknownStepKind { .. })
        ));
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        let err = resolve_config(Some(Path::new("/nope/botrun.toml"))).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn kinds_report_groups_aliases() {
        let report = KindsReport::from_registry(&StepRegistry::with_builtins());
        assert!(report.kinds.iter().any(|kind| kind == "navigate"));
        let text = report.display();
        assert!(text.contains("navigate (aliases: open)"));
        assert!(text.contains("extract (aliases: peruse, scrape)"));
    }

    #[test]
    fn failed_run_summary_names_the_failing_step() {
        let metrics: RunMetrics = serde_json::from_value(serde_json::json!({
            "bot_name": "portal-bot",
            "correlation_id": "6f1c2c1e-6a8e-4d5f-9f0e-0a7b3f1d2c4e",
            "start_time": "2026-01-01T00:00:00Z",
            "end_time": "2026-01-01T00:00:05Z",
            "duration_seconds": 5.0,
            "overall_success": false,
            "total_steps": 2,
            "succeeded_steps": 1,
            "failed_steps": 1,
            "skipped_steps": 0,
            "success_rate": 50.0,
            "steps": [
                {"name": "open", "kind": "navigate", "status": "succeeded",
                 "duration_seconds": 1.0, "attempts": 1},
                {"name": "press", "kind": "click", "status": "failed",
                 "duration_seconds": 4.0, "attempts": 2,
                 "error_message": "element #go not present after 10s"}
            ]
        }))
        .unwrap();
        let text = metrics.display();
        assert!(text.contains("falhou"));
        assert!(text.contains("press [click] failed (2 tentativas"));
        assert!(text.contains("element #go not present"));
    }
}
