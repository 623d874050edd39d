#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use botrun_core::engine::{NotifyError, RunNotification};
use botrun_core::{
    BrowserError, BrowserResult, Context, DefaultsSection, Driver, DriverFactory,
    ElementSnapshot, JsDialog, Locator, Notifier, Step, StepInstance, StepOutcome, StepRegistry, StepSpec,
};

#[derive(Debug, Default)]
pub struct MockState {
    pub calls: Vec<String>,
    pub current_url: Option<String>,
    pub page_source: String,
    pub elements: HashMap<String, Vec<ElementSnapshot>>,
    pub after_reload: HashMap<String, Vec<ElementSnapshot>>,
    pub reveal_on_click: HashMap<String, String>,
    pub downloads: HashMap<String, (String, Vec<u8>)>,
    pub download_dir: Option<PathBuf>,
    pub cookies: HashMap<String, String>,
    pub typed: Vec<(String, String)>,
    pub clicks: Vec<String>,
    pub dialog: Option<JsDialog>,
    pub handled_dialogs: Vec<(bool, Option<String>)>,
    pub closed: u32,
}

/// In-memory driver keyed by locator value.
#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    pub state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn with_present(self, locator: &str) -> Self {
        self.with_elements(locator, vec![ElementSnapshot::default()])
    }

    pub fn with_elements(self, locator: &str, elements: Vec<ElementSnapshot>) -> Self {
        self.state().elements.insert(locator.to_string(), elements);
        self
    }

    pub fn with_present_after_reload(self, locator: &str) -> Self {
        self.state()
            .after_reload
            .insert(locator.to_string(), vec![ElementSnapshot::default()]);
        self
    }

    /// Clicking `trigger` makes `revealed` match.
    pub fn with_reveal(self, trigger: &str, revealed: &str) -> Self {
        self.state()
            .reveal_on_click
            .insert(trigger.to_string(), revealed.to_string());
        self
    }

    /// Clicking `trigger` writes `filename` into the prepared download dir.
    pub fn with_download(self, trigger: &str, filename: &str, bytes: &[u8]) -> Self {
        self.state().downloads.insert(
            trigger.to_string(),
            (filename.to_string(), bytes.to_vec()),
        );
        self.with_present(trigger)
    }

    pub fn with_cookie(self, name: &str, value: &str) -> Self {
        self.state()
            .cookies
            .insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_page_source(self, source: &str) -> Self {
        self.state().page_source = source.to_string();
        self
    }

    pub fn with_dialog(self, dialog: JsDialog) -> Self {
        self.state().dialog = Some(dialog);
        self
    }

    pub fn open_dialog(&self) -> Option<JsDialog> {
        self.state().dialog.clone()
    }

    /// `(accepted, prompt_text)` for every dialog closed so far.
    pub fn handled_dialogs(&self) -> Vec<(bool, Option<String>)> {
        self.state().handled_dialogs.clone()
    }

    pub fn closed(&self) -> u32 {
        self.state().closed
    }

    pub fn clicks(&self) -> Vec<String> {
        self.state().clicks.clone()
    }

    pub fn typed(&self) -> Vec<(String, String)> {
        self.state().typed.clone()
    }
}

#[async_trait]
impl Driver for MockDriver {
    async fn navigate(&self, url: &str) -> BrowserResult<()> {
        let mut state = self.state();
        state.calls.push(format!("navigate {url}"));
        state.current_url = Some(url.to_string());
        Ok(())
    }

    async fn current_url(&self) -> BrowserResult<Option<String>> {
        Ok(self.state().current_url.clone())
    }

    async fn reload(&self) -> BrowserResult<()> {
        let mut state = self.state();
        state.calls.push("reload".to_string());
        let revealed: Vec<_> = state.after_reload.drain().collect();
        state.elements.extend(revealed);
        Ok(())
    }

    async fn page_source(&self) -> BrowserResult<String> {
        Ok(self.state().page_source.clone())
    }

    async fn find_all(&self, locator: &Locator) -> BrowserResult<Vec<ElementSnapshot>> {
        Ok(self
            .state()
            .elements
            .get(&locator.value)
            .cloned()
            .unwrap_or_default())
    }

    async fn click(&self, locator: &Locator) -> BrowserResult<()> {
        let mut state = self.state();
        if !state.elements.contains_key(&locator.value) {
            return Err(BrowserError::ElementNotFound(locator.to_string()));
        }
        state.clicks.push(locator.value.clone());
        if let Some(revealed) = state.reveal_on_click.get(&locator.value).cloned() {
            state
                .elements
                .insert(revealed, vec![ElementSnapshot::default()]);
        }
        if let Some((filename, bytes)) = state.downloads.get(&locator.value).cloned() {
            if let Some(dir) = &state.download_dir {
                std::fs::write(dir.join(filename), bytes)?;
            }
        }
        Ok(())
    }

    async fn type_text(&self, locator: &Locator, text: &str) -> BrowserResult<()> {
        let mut state = self.state();
        if !state.elements.contains_key(&locator.value) {
            return Err(BrowserError::ElementNotFound(locator.to_string()));
        }
        state.typed.push((locator.value.clone(), text.to_string()));
        Ok(())
    }

    async fn wait_for(&self, locator: &Locator, _timeout: Duration) -> BrowserResult<bool> {
        Ok(self
            .state()
            .elements
            .get(&locator.value)
            .map(|found| !found.is_empty())
            .unwrap_or(false))
    }

    async fn cookies(&self) -> BrowserResult<HashMap<String, String>> {
        Ok(self.state().cookies.clone())
    }

    async fn prepare_downloads(&self, dir: &Path) -> BrowserResult<()> {
        std::fs::create_dir_all(dir)?;
        self.state().download_dir = Some(dir.to_path_buf());
        Ok(())
    }

    async fn dialog(&self) -> BrowserResult<Option<JsDialog>> {
        Ok(self.state().dialog.clone())
    }

    async fn handle_dialog(&self, accept: bool, prompt_text: Option<&str>) -> BrowserResult<()> {
        let mut state = self.state();
        if state.dialog.take().is_none() {
            return Err(BrowserError::Unexpected("no dialog is open".into()));
        }
        state
            .handled_dialogs
            .push((accept, prompt_text.map(str::to_string)));
        Ok(())
    }

    async fn close(&self) -> BrowserResult<()> {
        self.state().closed += 1;
        Ok(())
    }
}

pub struct MockFactory {
    driver: MockDriver,
    fail: bool,
}

impl MockFactory {
    pub fn new(driver: MockDriver) -> Arc<Self> {
        Arc::new(Self {
            driver,
            fail: false,
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            driver: MockDriver::new(),
            fail: true,
        })
    }
}

#[async_trait]
impl DriverFactory for MockFactory {
    async fn acquire(&self) -> BrowserResult<Box<dyn Driver>> {
        if self.fail {
            return Err(BrowserError::Launch("no chromium in test sandbox".into()));
        }
        Ok(Box::new(self.driver.clone()))
    }
}

/// Plays back a fixed list of outcomes, then keeps succeeding.
pub struct ScriptedStep {
    outcomes: Mutex<VecDeque<BrowserResult<StepOutcome>>>,
    pub calls: Arc<AtomicU32>,
}

impl ScriptedStep {
    pub fn new(outcomes: Vec<BrowserResult<StepOutcome>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn succeeding() -> Self {
        Self::new(Vec::new())
    }

    pub fn failing_times(times: usize) -> Self {
        Self::new(
            (0..times)
                .map(|n| Ok(StepOutcome::failure(format!("attempt {} rejected", n + 1))))
                .collect(),
        )
    }

    pub fn always_failing() -> Self {
        Self::failing_times(64)
    }
}

#[async_trait]
impl Step for ScriptedStep {
    fn describe(&self) -> String {
        "scripted".to_string()
    }

    async fn execute(&self, _driver: &dyn Driver, ctx: &mut Context) -> BrowserResult<StepOutcome> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        ctx.set("scripted_calls", call);
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(StepOutcome::Success))
    }
}

pub struct PanickingStep;

#[async_trait]
impl Step for PanickingStep {
    fn describe(&self) -> String {
        "panics".to_string()
    }

    async fn execute(&self, _driver: &dyn Driver, _ctx: &mut Context) -> BrowserResult<StepOutcome> {
        panic!("selector engine exploded");
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub received: Mutex<Vec<RunNotification>>,
    pub fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            received: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn titles(&self) -> Vec<String> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .map(|n| n.title.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &RunNotification) -> Result<(), NotifyError> {
        self.received.lock().unwrap().push(notification.clone());
        if self.fail {
            return Err(NotifyError::Rejected(500));
        }
        Ok(())
    }
}

/// Accepts the notification and never returns.
pub struct HangingNotifier;

#[async_trait]
impl Notifier for HangingNotifier {
    async fn notify(&self, _notification: &RunNotification) -> Result<(), NotifyError> {
        futures::future::pending::<()>().await;
        Ok(())
    }
}

pub fn instance(name: &str, step: impl Step + 'static, retries: u32) -> StepInstance {
    StepInstance::new(name, "scripted", Box::new(step))
        .with_policy(botrun_core::RetryPolicy::immediate(retries))
}

pub fn build(spec: StepSpec) -> StepInstance {
    StepRegistry::with_builtins()
        .instantiate(&spec, &DefaultsSection::immediate())
        .expect("step should build")
}
