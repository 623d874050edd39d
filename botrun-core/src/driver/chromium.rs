use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::{
    DialogType, EventJavascriptDialogClosed, EventJavascriptDialogOpening,
    HandleJavaScriptDialogParams, NavigateParams,
};
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::element::Element;
use chromiumoxide::handler::viewport::Viewport as ChromiumViewport;
use chromiumoxide::page::Page;
use futures::StreamExt;
use rand::{seq::SliceRandom, Rng};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::{BrowserSection, HumanSection};

use super::error::{BrowserError, BrowserResult};
use super::human::HumanPacer;
use super::locator::{Locator, Query};
use super::{DialogKind, Driver, DriverFactory, ElementSnapshot, JsDialog};

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_4) AppleWebKit/605.1.15 (KHTML, like Gecko)";
const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
struct ViewportSpec {
    width: u32,
    height: u32,
}

#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    config: Arc<BrowserSection>,
    human: HumanSection,
}

impl ChromiumLauncher {
    pub fn new(config: BrowserSection, human: HumanSection) -> Self {
        Self {
            config: Arc::new(config),
            human,
        }
    }

    pub fn config(&self) -> &BrowserSection {
        &self.config
    }

    pub async fn launch(&self) -> BrowserResult<ChromiumDriver> {
        let viewport = self.select_viewport();
        let user_agent = self.select_user_agent();
        let chromium_config = self.build_chromium_config(&viewport, &user_agent)?;
        info!(
            ua = %user_agent,
            width = viewport.width,
            height = viewport.height,
            headless = self.config.headless,
            "Launching Chromium instance"
        );

        let (mut browser, mut handler) = Browser::launch(chromium_config)
            .await
            .map_err(|err| BrowserError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "Chromium handler reported error");
                }
            }
        });

        let dialog = Arc::new(AsyncMutex::new(None));
        let opened = match self.open_page(&browser, &user_agent).await {
            Ok(page) => watch_dialogs(&page, dialog.clone())
                .await
                .map(|watcher| (page, watcher)),
            Err(err) => Err(err),
        };
        let (page, dialog_task) = match opened {
            Ok(opened) => opened,
            Err(err) => {
                if let Err(close_err) = browser.close().await {
                    warn!(error = %close_err, "Failed to close browser after page setup error");
                }
                handler_task.abort();
                return Err(err);
            }
        };

        Ok(ChromiumDriver {
            browser: AsyncMutex::new(browser),
            page,
            handler_task: AsyncMutex::new(Some(handler_task)),
            dialog,
            dialog_task: AsyncMutex::new(Some(dialog_task)),
            pacer: AsyncMutex::new(HumanPacer::new(self.human.clone())),
            closed: AtomicBool::new(false),
        })
    }

    async fn open_page(&self, browser: &Browser, user_agent: &str) -> BrowserResult<Page> {
        let page = browser
            .new_page(CreateTargetParams::new("about:blank"))
            .await?;
        let mut params_builder =
            SetUserAgentOverrideParams::builder().user_agent(user_agent.to_string());
        if let Some(lang) = &self.config.lang {
            params_builder = params_builder.accept_language(lang.clone());
        }
        let params = params_builder
            .build()
            .map_err(BrowserError::Configuration)?;
        page.set_user_agent(params).await?;
        Ok(page)
    }

    fn select_viewport(&self) -> ViewportSpec {
        let mut rng = rand::thread_rng();
        let base = self
            .config
            .resolutions
            .choose(&mut rng)
            .cloned()
            .unwrap_or([1400, 850]);
        let jitter = self.config.jitter_pixels as i32;
        let width = (base[0] as i32 + rng.gen_range(-jitter..=jitter)).clamp(800, 2560) as u32;
        let height = (base[1] as i32 + rng.gen_range(-jitter..=jitter)).clamp(600, 1600) as u32;
        ViewportSpec { width, height }
    }

    fn select_user_agent(&self) -> String {
        let mut rng = rand::thread_rng();
        self.config
            .user_agents
            .choose(&mut rng)
            .cloned()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    fn build_chromium_config(
        &self,
        viewport: &ViewportSpec,
        user_agent: &str,
    ) -> BrowserResult<ChromiumConfig> {
        let mut builder = ChromiumConfig::builder().viewport(ChromiumViewport {
            width: viewport.width,
            height: viewport.height,
            device_scale_factor: None,
            emulating_mobile: false,
            is_landscape: viewport.width >= viewport.height,
            has_touch: false,
        });

        if let Some(executable) = &self.config.executable_path {
            builder = builder.chrome_executable(executable);
        }
        if !self.config.headless {
            builder = builder.with_head();
        }
        if !self.config.sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(timeout) = self.config.request_timeout_seconds {
            builder = builder.request_timeout(Duration::from_secs(timeout));
        }

        let mut args = vec![
            format!("--user-agent={user_agent}"),
            format!("--window-size={},{}", viewport.width, viewport.height),
            "--disable-features=AutomationControlled".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--no-first-run".to_string(),
            "--password-store=basic".to_string(),
        ];
        if self.config.disable_gpu {
            args.push("--disable-gpu".into());
        }
        if let Some(lang) = &self.config.lang {
            args.push(format!("--lang={lang}"));
        }
        args.extend(self.config.extra_args.iter().cloned());

        builder = builder.args(args);
        builder.build().map_err(BrowserError::Configuration)
    }
}

#[async_trait]
impl DriverFactory for ChromiumLauncher {
    async fn acquire(&self) -> BrowserResult<Box<dyn Driver>> {
        let driver = self.launch().await?;
        Ok(Box::new(driver))
    }
}

/// One Chromium process with a single page, driven through CDP.
#[derive(Debug)]
pub struct ChromiumDriver {
    browser: AsyncMutex<Browser>,
    page: Page,
    handler_task: AsyncMutex<Option<JoinHandle<()>>>,
    dialog: Arc<AsyncMutex<Option<JsDialog>>>,
    dialog_task: AsyncMutex<Option<JoinHandle<()>>>,
    pacer: AsyncMutex<HumanPacer>,
    closed: AtomicBool,
}

impl ChromiumDriver {
    pub fn page(&self) -> &Page {
        &self.page
    }

    async fn elements(&self, locator: &Locator) -> BrowserResult<Vec<Element>> {
        let found = match locator.query() {
            Query::Css(selector) => self.page.find_elements(selector).await,
            Query::XPath(path) => self.page.find_xpaths(path).await,
        };
        // CDP reports "no node" as an error; callers treat that as zero matches.
        match found {
            Ok(elements) => Ok(elements),
            Err(err) => {
                debug!(locator = %locator, error = %err, "locator lookup returned no nodes");
                Ok(Vec::new())
            }
        }
    }

    async fn first_element(&self, locator: &Locator) -> BrowserResult<Element> {
        self.elements(locator)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BrowserError::ElementNotFound(locator.to_string()))
    }
}

/// Tracks the page's open JavaScript dialog from CDP events.
async fn watch_dialogs(
    page: &Page,
    slot: Arc<AsyncMutex<Option<JsDialog>>>,
) -> BrowserResult<JoinHandle<()>> {
    let mut opened = page
        .event_listener::<EventJavascriptDialogOpening>()
        .await?;
    let mut closed = page.event_listener::<EventJavascriptDialogClosed>().await?;
    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(event) = opened.next() => {
                    debug!(message = %event.message, "javascript dialog opened");
                    *slot.lock().await = Some(JsDialog {
                        kind: dialog_kind(&event.r#type),
                        message: event.message.clone(),
                        default_prompt: event.default_prompt.clone(),
                    });
                }
                Some(_) = closed.next() => {
                    *slot.lock().await = None;
                }
                else => break,
            }
        }
    }))
}

fn dialog_kind(kind: &DialogType) -> DialogKind {
    match kind {
        DialogType::Alert => DialogKind::Alert,
        DialogType::Confirm => DialogKind::Confirm,
        DialogType::Prompt => DialogKind::Prompt,
        DialogType::Beforeunload => DialogKind::BeforeUnload,
    }
}

#[async_trait]
impl Driver for ChromiumDriver {
    async fn navigate(&self, url: &str) -> BrowserResult<()> {
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(BrowserError::Configuration)?;
        self.page.goto(params).await?;
        self.page.wait_for_navigation().await?;
        Ok(())
    }

    async fn current_url(&self) -> BrowserResult<Option<String>> {
        Ok(self.page.url().await?)
    }

    async fn reload(&self) -> BrowserResult<()> {
        self.page.reload().await?;
        self.page.wait_for_navigation().await?;
        Ok(())
    }

    async fn page_source(&self) -> BrowserResult<String> {
        Ok(self.page.content().await?)
    }

    async fn find_all(&self, locator: &Locator) -> BrowserResult<Vec<ElementSnapshot>> {
        let elements = self.elements(locator).await?;
        let mut snapshots = Vec::with_capacity(elements.len());
        for element in elements {
            let text = element.inner_text().await?;
            let flat = element.attributes().await?;
            let attributes: BTreeMap<String, String> = flat
                .chunks(2)
                .filter_map(|pair| match pair {
                    [name, value] => Some((name.clone(), value.clone())),
                    _ => None,
                })
                .collect();
            snapshots.push(ElementSnapshot { text, attributes });
        }
        Ok(snapshots)
    }

    async fn click(&self, locator: &Locator) -> BrowserResult<()> {
        let element = self.first_element(locator).await?;
        element.scroll_into_view().await?;
        let mut pacer = self.pacer.lock().await;
        pacer.click_element(&self.page, &element).await
    }

    async fn type_text(&self, locator: &Locator, text: &str) -> BrowserResult<()> {
        let element = self.first_element(locator).await?;
        let mut pacer = self.pacer.lock().await;
        pacer.type_text(&element, text).await
    }

    async fn wait_for(&self, locator: &Locator, timeout: Duration) -> BrowserResult<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.elements(locator).await?.is_empty() {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn cookies(&self) -> BrowserResult<HashMap<String, String>> {
        let cookies = self.page.get_cookies().await?;
        Ok(cookies
            .into_iter()
            .map(|cookie| (cookie.name, cookie.value))
            .collect())
    }

    async fn dialog(&self) -> BrowserResult<Option<JsDialog>> {
        Ok(self.dialog.lock().await.clone())
    }

    async fn handle_dialog(&self, accept: bool, prompt_text: Option<&str>) -> BrowserResult<()> {
        let mut params = HandleJavaScriptDialogParams::new(accept);
        params.prompt_text = prompt_text.map(str::to_string);
        self.page.execute(params).await?;
        *self.dialog.lock().await = None;
        Ok(())
    }

    async fn prepare_downloads(&self, dir: &Path) -> BrowserResult<()> {
        tokio::fs::create_dir_all(dir).await?;
        let params = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(dir.to_string_lossy().into_owned())
            .build()
            .map_err(BrowserError::Configuration)?;
        self.page.execute(params).await?;
        Ok(())
    }

    async fn close(&self) -> BrowserResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Shutting down Chromium instance");
        if let Some(watcher) = self.dialog_task.lock().await.take() {
            watcher.abort();
        }
        if let Err(err) = self.browser.lock().await.close().await {
            warn!(error = %err, "Failed to close browser gracefully");
        }
        if let Some(handle) = self.handler_task.lock().await.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "Browser handler join error");
            }
        }
        Ok(())
    }
}

impl Drop for ChromiumDriver {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) {
            warn!("ChromiumDriver dropped without explicit close");
        }
    }
}
