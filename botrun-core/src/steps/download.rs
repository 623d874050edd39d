use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::time::{sleep, Instant};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::driver::{BrowserResult, Driver, Locator, LocatorStrategy};
use crate::engine::{BuildContext, Context, EngineResult, PaceRange, Step, StepOutcome, StepSpec};

use super::{default_true, locator, seconds_or};

const PARTIAL_SUFFIXES: [&str; 4] = [".crdownload", ".part", ".tmp", ".download"];
const POLL_INTERVAL: Duration = Duration::from_millis(500);
const BATCH_TIMEOUT_SECONDS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub filename: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub directory: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug)]
enum FetchResult {
    Completed(DownloadRecord),
    Unverified,
    Failed(String),
}

/// Clicks a trigger and waits for a new finished file in the directory.
#[derive(Debug, Clone)]
struct Downloader {
    directory: PathBuf,
    pattern: Option<Pattern>,
    timeout: Duration,
    element_timeout: Duration,
    verify: bool,
}

impl Downloader {
    async fn fetch(&self, driver: &dyn Driver, trigger: &Locator) -> BrowserResult<FetchResult> {
        driver.prepare_downloads(&self.directory).await?;
        let before = snapshot(&self.directory);
        if !driver.wait_for(trigger, self.element_timeout).await? {
            return Ok(FetchResult::Failed(format!(
                "download trigger {trigger} not found"
            )));
        }
        driver.click(trigger).await?;
        if !self.verify {
            return Ok(FetchResult::Unverified);
        }

        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(path) = self.finished_file(&before) {
                return Ok(FetchResult::Completed(record(&self.directory, path).await?));
            }
            if Instant::now() >= deadline {
                return Ok(FetchResult::Failed(format!(
                    "no finished download in {} after {}s",
                    self.directory.display(),
                    self.timeout.as_secs()
                )));
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Newest non-empty file that was not present before the click.
    fn finished_file(&self, before: &HashSet<PathBuf>) -> Option<PathBuf> {
        snapshot(&self.directory)
            .into_iter()
            .filter(|path| !before.contains(path))
            .filter(|path| !is_partial(path))
            .filter(|path| self.matches(path))
            .filter_map(|path| {
                let metadata = std::fs::metadata(&path).ok()?;
                if metadata.len() == 0 {
                    return None;
                }
                let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                Some((modified, path))
            })
            .max()
            .map(|(_, path)| path)
    }

    fn matches(&self, path: &Path) -> bool {
        match (&self.pattern, path.file_name()) {
            (None, _) => true,
            (Some(pattern), Some(name)) => pattern.matches(&name.to_string_lossy()),
            (Some(_), None) => false,
        }
    }
}

fn snapshot(directory: &Path) -> HashSet<PathBuf> {
    WalkDir::new(directory)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect()
}

fn is_partial(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    PARTIAL_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

async fn record(directory: &Path, path: PathBuf) -> BrowserResult<DownloadRecord> {
    let bytes = tokio::fs::read(&path).await?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(DownloadRecord {
        filename,
        size_bytes: bytes.len() as u64,
        sha256: Some(hex::encode(Sha256::digest(&bytes))),
        directory: directory.to_path_buf(),
        path,
        completed_at: Utc::now(),
    })
}

fn store(ctx: &mut Context, record: &DownloadRecord) {
    let value = serde_json::to_value(record).unwrap_or(Value::Null);
    ctx.set("last_download", value.clone());
    ctx.push("downloads", value);
    let count = ctx
        .get("downloads")
        .and_then(Value::as_array)
        .map(Vec::len)
        .unwrap_or(0);
    ctx.set("download_count", count);
}

#[derive(Debug, Deserialize)]
struct DownloadOptions {
    #[serde(default)]
    by: LocatorStrategy,
    #[serde(default)]
    download_dir: Option<PathBuf>,
    #[serde(default, alias = "expected_filename")]
    file_pattern: Option<String>,
    #[serde(default)]
    timeout_seconds: Option<u64>,
    #[serde(default = "default_true")]
    verify_download: bool,
    #[serde(default)]
    element_timeout_seconds: Option<u64>,
}

impl DownloadOptions {
    fn downloader(&self, build: &BuildContext<'_>, default_timeout: u64) -> EngineResult<Downloader> {
        let pattern = self
            .file_pattern
            .as_deref()
            .map(|raw| {
                Pattern::new(raw)
                    .map_err(|err| build.invalid(format!("invalid file_pattern '{raw}': {err}")))
            })
            .transpose()?;
        let defaults = build.defaults();
        Ok(Downloader {
            directory: self
                .download_dir
                .clone()
                .unwrap_or_else(|| defaults.download_dir()),
            pattern,
            timeout: seconds_or(self.timeout_seconds, default_timeout),
            element_timeout: seconds_or(
                self.element_timeout_seconds,
                defaults.element_timeout_seconds,
            ),
            verify: self.verify_download,
        })
    }
}

#[derive(Debug, Deserialize)]
struct SingleParams {
    #[serde(alias = "selector", alias = "download_selector")]
    locator: String,
    #[serde(flatten)]
    options: DownloadOptions,
}

#[derive(Debug, Deserialize)]
struct BatchParams {
    #[serde(alias = "selectors", alias = "download_selectors")]
    locators: Vec<String>,
    #[serde(default)]
    pause_lower: Option<f64>,
    #[serde(default)]
    pause_upper: Option<f64>,
    #[serde(flatten)]
    options: DownloadOptions,
}

/// Fetches one file. A completed download is not repeated on retry.
#[derive(Debug, Clone)]
pub struct FetchFileStep {
    name: String,
    trigger: Locator,
    downloader: Downloader,
}

pub(super) fn build_single(spec: &StepSpec, build: &BuildContext<'_>) -> EngineResult<Box<dyn Step>> {
    let params: SingleParams = build.params(spec)?;
    let trigger = locator(build, "locator", params.options.by, &params.locator)?;
    let downloader = params
        .options
        .downloader(build, build.defaults().download_timeout_seconds)?;
    Ok(Box::new(FetchFileStep {
        name: build.name().to_string(),
        trigger,
        downloader,
    }))
}

#[async_trait]
impl Step for FetchFileStep {
    fn describe(&self) -> String {
        format!(
            "download via {} into {}",
            self.trigger,
            self.downloader.directory.display()
        )
    }

    async fn execute(&self, driver: &dyn Driver, ctx: &mut Context) -> BrowserResult<StepOutcome> {
        let completed_flag = format!("{}.completed", self.name);
        if ctx.flag(&completed_flag) {
            info!(step = %self.name, "download already completed, skipping");
            return Ok(StepOutcome::Success);
        }
        match self.downloader.fetch(driver, &self.trigger).await? {
            FetchResult::Completed(record) => {
                info!(
                    file = %record.filename,
                    size_bytes = record.size_bytes,
                    "download completed"
                );
                store(ctx, &record);
                ctx.set(completed_flag, true);
                Ok(StepOutcome::Success)
            }
            FetchResult::Unverified => {
                ctx.set(completed_flag, true);
                Ok(StepOutcome::Success)
            }
            FetchResult::Failed(reason) => Ok(StepOutcome::Failure(reason)),
        }
    }
}

/// Fetches several files in order, pausing between triggers. Succeeds when
/// at least one file arrived.
#[derive(Debug, Clone)]
pub struct FetchFilesBatchStep {
    name: String,
    triggers: Vec<Locator>,
    downloader: Downloader,
    pause: PaceRange,
}

pub(super) fn build_batch(spec: &StepSpec, build: &BuildContext<'_>) -> EngineResult<Box<dyn Step>> {
    let params: BatchParams = build.params(spec)?;
    if params.locators.is_empty() {
        return Err(build.invalid("locators must list at least one trigger"));
    }
    let triggers = params
        .locators
        .iter()
        .map(|value| locator(build, "locators", params.options.by, value))
        .collect::<EngineResult<Vec<_>>>()?;
    let downloader = params.options.downloader(build, BATCH_TIMEOUT_SECONDS)?;
    let defaults = build.defaults();
    let pause = PaceRange::validated(
        params.pause_lower.unwrap_or(defaults.batch_pause_lower),
        params.pause_upper.unwrap_or(defaults.batch_pause_upper),
        "pause",
    )
    .map_err(|message| build.invalid(message))?;
    Ok(Box::new(FetchFilesBatchStep {
        name: build.name().to_string(),
        triggers,
        downloader,
        pause,
    }))
}

#[async_trait]
impl Step for FetchFilesBatchStep {
    fn describe(&self) -> String {
        format!(
            "download {} files into {}",
            self.triggers.len(),
            self.downloader.directory.display()
        )
    }

    async fn execute(&self, driver: &dyn Driver, ctx: &mut Context) -> BrowserResult<StepOutcome> {
        let done_key = format!("{}.fetched", self.name);
        let mut done: Vec<usize> = ctx.get_as(&done_key).unwrap_or_default();
        let mut failures = Vec::new();
        let mut attempted = false;

        for (index, trigger) in self.triggers.iter().enumerate() {
            if done.contains(&index) {
                continue;
            }
            if attempted {
                self.pause.pause().await;
            }
            attempted = true;
            match self.downloader.fetch(driver, trigger).await {
                Ok(FetchResult::Completed(record)) => {
                    info!(file = %record.filename, index, "batch download completed");
                    store(ctx, &record);
                    done.push(index);
                }
                Ok(FetchResult::Unverified) => done.push(index),
                Ok(FetchResult::Failed(reason)) => {
                    warn!(trigger = %trigger, error = %reason, "batch download failed");
                    failures.push(reason);
                }
                Err(err) => {
                    warn!(trigger = %trigger, error = %err, "batch download failed");
                    failures.push(err.to_string());
                }
            }
            ctx.set(done_key.clone(), serde_json::json!(done));
        }

        if done.is_empty() {
            return Ok(StepOutcome::failure(format!(
                "no file downloaded: {}",
                failures.join("; ")
            )));
        }
        info!(
            fetched = done.len(),
            requested = self.triggers.len(),
            "batch finished"
        );
        Ok(StepOutcome::Success)
    }
}
