//! Progress and file reporting for delegated scripts.
//!
//! A script gets a cloneable [`BridgeHandle`]; sends never block and are
//! drained by the orchestrator once the owning step concludes. Draining
//! rotates the channel, so a handle is only good for the step it was
//! issued to: anything sent through it afterwards is dropped.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::driver::{BrowserResult, Driver};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub delta: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileArtifact {
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    Progress(ProgressEvent),
    File(FileArtifact),
}

#[derive(Debug, Clone)]
pub struct BridgeHandle {
    tx: UnboundedSender<BridgeEvent>,
}

impl BridgeHandle {
    pub fn report_progress(&self, delta: u64) {
        self.send(BridgeEvent::Progress(ProgressEvent { delta }));
    }

    pub fn report_file(&self, path: impl AsRef<Path>) {
        self.send(BridgeEvent::File(FileArtifact {
            path: path.as_ref().to_path_buf(),
        }));
    }

    fn send(&self, event: BridgeEvent) {
        if self.tx.send(event).is_err() {
            debug!("bridge event dropped, owning step already concluded");
        }
    }
}

/// What a step reported through the bridge while it ran.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeReport {
    pub progress: u64,
    pub files: Vec<FileArtifact>,
}

#[derive(Debug)]
pub struct CallbackBridge {
    tx: UnboundedSender<BridgeEvent>,
    rx: UnboundedReceiver<BridgeEvent>,
}

impl Default for CallbackBridge {
    fn default() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }
}

impl CallbackBridge {
    pub fn handle(&self) -> BridgeHandle {
        BridgeHandle {
            tx: self.tx.clone(),
        }
    }

    /// Collects everything reported so far and starts a fresh channel.
    /// Handles issued before the drain stop delivering.
    pub fn drain(&mut self) -> BridgeReport {
        let (tx, rx) = mpsc::unbounded_channel();
        self.tx = tx;
        let mut previous = std::mem::replace(&mut self.rx, rx);
        previous.close();
        let mut report = BridgeReport::default();
        loop {
            match previous.try_recv() {
                Ok(BridgeEvent::Progress(event)) => {
                    report.progress = report.progress.saturating_add(event.delta);
                }
                Ok(BridgeEvent::File(artifact)) => report.files.push(artifact),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        report
    }
}

/// Caller-authored automation that is not a native step.
#[async_trait]
pub trait DelegatedScript: Send + Sync {
    async fn run(&self, driver: &dyn Driver, config: &Value, bridge: BridgeHandle)
        -> BrowserResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_sums_progress_and_keeps_file_order() {
        let mut bridge = CallbackBridge::default();
        let handle = bridge.handle();
        handle.report_progress(1);
        handle.report_file("/tmp/a.csv");
        handle.report_progress(2);
        handle.report_file("/tmp/b.csv");

        let report = bridge.drain();
        assert_eq!(report.progress, 3);
        assert_eq!(
            report.files,
            vec![
                FileArtifact {
                    path: "/tmp/a.csv".into()
                },
                FileArtifact {
                    path: "/tmp/b.csv".into()
                },
            ]
        );
        assert_eq!(bridge.drain(), BridgeReport::default());
    }

    #[test]
    fn handle_kept_past_its_step_is_not_credited_to_the_next() {
        let mut bridge = CallbackBridge::default();
        let first = bridge.handle();
        first.report_progress(5);
        assert_eq!(bridge.drain().progress, 5);

        let second = bridge.handle();
        first.report_progress(40);
        first.report_file("/tmp/late.csv");
        second.report_progress(1);

        let report = bridge.drain();
        assert_eq!(report.progress, 1);
        assert!(report.files.is_empty());
    }

    #[test]
    fn silent_script_reports_nothing() {
        let mut bridge = CallbackBridge::default();
        let _handle = bridge.handle();
        assert_eq!(bridge.drain(), BridgeReport::default());
    }
}
