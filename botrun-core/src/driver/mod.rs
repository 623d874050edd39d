//! The browser-control capability the engine drives.
//!
//! The engine only ever talks to a [`Driver`]; [`ChromiumLauncher`] is the
//! production [`DriverFactory`], tests supply their own.

mod chromium;
mod error;
mod human;
mod locator;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

pub use chromium::{ChromiumDriver, ChromiumLauncher};
pub use error::{BrowserError, BrowserResult};
pub use human::HumanPacer;
pub use locator::{Locator, LocatorStrategy, Query};

/// Point-in-time view of a matched element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ElementSnapshot {
    pub text: Option<String>,
    pub attributes: BTreeMap<String, String>,
}

impl ElementSnapshot {
    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            attributes: BTreeMap::new(),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogKind {
    Alert,
    Confirm,
    Prompt,
    BeforeUnload,
}

/// A JavaScript dialog (`alert`, `confirm`, `prompt`) blocking the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JsDialog {
    pub kind: DialogKind,
    pub message: String,
    pub default_prompt: Option<String>,
}

impl JsDialog {
    pub fn new(kind: DialogKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            default_prompt: None,
        }
    }
}

#[async_trait]
pub trait Driver: Send + Sync {
    async fn navigate(&self, url: &str) -> BrowserResult<()>;
    async fn current_url(&self) -> BrowserResult<Option<String>>;
    async fn reload(&self) -> BrowserResult<()>;
    async fn page_source(&self) -> BrowserResult<String>;
    async fn find_all(&self, locator: &Locator) -> BrowserResult<Vec<ElementSnapshot>>;
    async fn click(&self, locator: &Locator) -> BrowserResult<()>;
    async fn type_text(&self, locator: &Locator, text: &str) -> BrowserResult<()>;
    /// Polls for `locator` until it matches or `timeout` elapses.
    async fn wait_for(&self, locator: &Locator, timeout: Duration) -> BrowserResult<bool>;
    async fn cookies(&self) -> BrowserResult<HashMap<String, String>>;
    /// The dialog currently open on the page, without waiting.
    async fn dialog(&self) -> BrowserResult<Option<JsDialog>>;
    /// Closes the open dialog. `prompt_text` is entered before accepting a
    /// prompt and ignored otherwise.
    async fn handle_dialog(&self, accept: bool, prompt_text: Option<&str>) -> BrowserResult<()>;
    /// Directs subsequent browser downloads into `dir`.
    async fn prepare_downloads(&self, dir: &Path) -> BrowserResult<()>;
    async fn close(&self) -> BrowserResult<()>;
}

#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn acquire(&self) -> BrowserResult<Box<dyn Driver>>;
}
