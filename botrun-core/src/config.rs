use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};
use crate::vars::ResolveMode;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub browser: BrowserSection,
    pub human: HumanSection,
    pub defaults: DefaultsSection,
    pub variables: VariablesSection,
    pub notifier: NotifierSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserSection {
    pub executable_path: Option<String>,
    pub headless: bool,
    pub sandbox: bool,
    pub disable_gpu: bool,
    pub request_timeout_seconds: Option<u64>,
    pub user_agents: Vec<String>,
    pub resolutions: Vec<[u32; 2]>,
    pub jitter_pixels: u32,
    pub lang: Option<String>,
    pub extra_args: Vec<String>,
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            executable_path: None,
            headless: true,
            sandbox: true,
            disable_gpu: false,
            request_timeout_seconds: Some(30),
            user_agents: Vec::new(),
            resolutions: vec![[1400, 850]],
            jitter_pixels: 48,
            lang: None,
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HumanSection {
    pub typing_delay_ms: [u32; 2],
    pub typo_chance: f64,
    pub typo_correction_ms: [u32; 2],
    pub click_hesitation_ms: [u32; 2],
    pub mouse_speed_px_s: [u32; 2],
    pub mouse_jitter_px: u32,
}

impl Default for HumanSection {
    fn default() -> Self {
        Self {
            typing_delay_ms: [120, 450],
            typo_chance: 0.04,
            typo_correction_ms: [300, 800],
            click_hesitation_ms: [80, 260],
            mouse_speed_px_s: [600, 1400],
            mouse_jitter_px: 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DefaultsSection {
    pub retry_count: u32,
    pub retry_delay_seconds: u64,
    pub wait_lower: f64,
    pub wait_upper: f64,
    pub element_timeout_seconds: u64,
    pub verification_timeout_seconds: u64,
    pub download_dir: Option<PathBuf>,
    pub download_timeout_seconds: u64,
    pub batch_pause_lower: f64,
    pub batch_pause_upper: f64,
}

impl Default for DefaultsSection {
    fn default() -> Self {
        Self {
            retry_count: 3,
            retry_delay_seconds: 2,
            wait_lower: 1.1,
            wait_upper: 10.0,
            element_timeout_seconds: 10,
            verification_timeout_seconds: 30,
            download_dir: None,
            download_timeout_seconds: 180,
            batch_pause_lower: 2.0,
            batch_pause_upper: 5.0,
        }
    }
}

impl DefaultsSection {
    /// Explicit directory, else the user's Downloads folder.
    pub fn download_dir(&self) -> PathBuf {
        self.download_dir
            .clone()
            .or_else(dirs::download_dir)
            .unwrap_or_else(|| PathBuf::from("downloads"))
    }

    pub fn element_timeout(&self) -> Duration {
        Duration::from_secs(self.element_timeout_seconds)
    }

    /// Zero pacing and zero retry delay; used by tests and dry runs.
    pub fn immediate() -> Self {
        Self {
            retry_delay_seconds: 0,
            wait_lower: 0.0,
            wait_upper: 0.0,
            batch_pause_lower: 0.0,
            batch_pause_upper: 0.0,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VariablesSection {
    pub strict: bool,
}

impl VariablesSection {
    pub fn mode(&self) -> ResolveMode {
        if self.strict {
            ResolveMode::Strict
        } else {
            ResolveMode::Lenient
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifierKind {
    #[default]
    None,
    Log,
    SlackWebhook,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotifierSection {
    pub kind: NotifierKind,
    pub webhook_url: Option<String>,
    pub channel: Option<String>,
    pub username: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for NotifierSection {
    fn default() -> Self {
        Self {
            kind: NotifierKind::None,
            webhook_url: None,
            channel: None,
            username: None,
            timeout_seconds: 10,
        }
    }
}

impl NotifierSection {
    /// Per-request bound for webhook delivery; never zero.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.max(1))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub format: LogFormat,
    pub filter: Option<String>,
}

pub fn load_runner_config<P: AsRef<Path>>(path: P) -> Result<RunnerConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
