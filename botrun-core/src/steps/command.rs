use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::driver::{BrowserError, BrowserResult, Driver};
use crate::engine::{
    BridgeHandle, BuildContext, DelegatedScript, EngineResult, RetryPolicy, Step, StepSpec,
};

use super::script::ScriptStep;
use super::seconds_or;

const DEFAULT_COMMAND_TIMEOUT_SECONDS: u64 = 600;
/// Environment variable carrying the step's JSON config to the program.
pub const CONFIG_ENV_VAR: &str = "BOTRUN_SCRIPT_CONFIG";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CommandParams {
    program: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    #[serde(default)]
    working_dir: Option<PathBuf>,
    #[serde(default)]
    timeout_seconds: Option<u64>,
    #[serde(default)]
    config: Value,
}

/// An external program run as a delegated script.
///
/// Stdout lines `::progress <n>` and `::file <path>` are forwarded to the
/// callback bridge; anything else is logged at debug level.
#[derive(Debug, Clone)]
pub struct CommandScript {
    program: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    working_dir: Option<PathBuf>,
    timeout: Duration,
}

impl CommandScript {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
            timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECONDS),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

pub(super) fn build(spec: &StepSpec, build: &BuildContext<'_>) -> EngineResult<Box<dyn Step>> {
    let params: CommandParams = build.params(spec)?;
    if params.program.trim().is_empty() {
        return Err(build.invalid("program must not be empty"));
    }
    let mut script = CommandScript::new(params.program.clone())
        .args(params.args)
        .timeout(seconds_or(
            params.timeout_seconds,
            DEFAULT_COMMAND_TIMEOUT_SECONDS,
        ));
    script.env = params.env;
    script.working_dir = params.working_dir;
    // External programs are not assumed to be idempotent.
    let step = ScriptStep::new(
        format!("command {}", params.program),
        Arc::new(script),
        params.config,
    )
    .with_policy(RetryPolicy::new(
        1,
        Duration::from_secs(build.defaults().retry_delay_seconds),
        build.pacing(),
    ));
    Ok(Box::new(step))
}

#[async_trait]
impl DelegatedScript for CommandScript {
    async fn run(
        &self,
        _driver: &dyn Driver,
        config: &Value,
        bridge: BridgeHandle,
    ) -> BrowserResult<()> {
        let mut command = Command::new(&self.program);
        command
            .kill_on_drop(true)
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if !config.is_null() {
            command.env(CONFIG_ENV_VAR, config.to_string());
        }
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BrowserError::Script("stdout was not captured".into()))?;
        let stderr = child.stderr.take();

        let waited = timeout(self.timeout, async {
            let relay = async {
                let mut lines = BufReader::new(stdout).lines();
                while let Some(line) = lines.next_line().await? {
                    relay_line(&line, &bridge);
                }
                Ok::<(), std::io::Error>(())
            };
            let collect = async {
                let mut text = String::new();
                if let Some(mut stderr) = stderr {
                    stderr.read_to_string(&mut text).await?;
                }
                Ok::<String, std::io::Error>(text)
            };
            let (relayed, stderr_text) = tokio::join!(relay, collect);
            relayed?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, stderr_text?))
        })
        .await;

        match waited {
            Ok(Ok((status, _))) if status.success() => Ok(()),
            Ok(Ok((status, stderr_text))) => Err(BrowserError::Script(format!(
                "{} exited with {status}: {}",
                self.program,
                stderr_text.trim()
            ))),
            Ok(Err(err)) => Err(BrowserError::Io(err)),
            Err(_) => {
                if let Err(err) = child.kill().await {
                    warn!(program = %self.program, error = %err, "failed to kill timed out command");
                }
                Err(BrowserError::Timeout(format!(
                    "{} after {}s",
                    self.program,
                    self.timeout.as_secs()
                )))
            }
        }
    }
}

fn relay_line(line: &str, bridge: &BridgeHandle) {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix("::progress") {
        match rest.trim().parse::<u64>() {
            Ok(delta) => bridge.report_progress(delta),
            Err(_) => warn!(line, "ignoring malformed progress line"),
        }
    } else if let Some(rest) = line.strip_prefix("::file") {
        let path = rest.trim();
        if path.is_empty() {
            warn!(line, "ignoring file line without a path");
        } else {
            bridge.report_file(path);
        }
    } else if !line.is_empty() {
        debug!(output = line, "command output");
    }
}
