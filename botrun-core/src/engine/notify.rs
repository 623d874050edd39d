use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::{NotifierKind, NotifierSection};

use super::metrics::{RunMetrics, StepStatus};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("webhook rejected notification with status {0}")]
    Rejected(u16),
    #[error("webhook did not answer within {0:?}")]
    Timeout(Duration),
    #[error("notifier misconfigured: {0}")]
    Configuration(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct RunNotification {
    pub title: String,
    pub message: String,
    pub succeeded: bool,
    pub metrics: RunMetrics,
}

impl RunNotification {
    pub fn from_metrics(metrics: &RunMetrics) -> Self {
        let verdict = if metrics.overall_success {
            "succeeded"
        } else {
            "failed"
        };
        let mut lines = vec![format!(
            "{} of {} steps succeeded ({:.2}%) in {:.1}s",
            metrics.succeeded_steps,
            metrics.total_steps,
            metrics.success_rate,
            metrics.duration_seconds
        )];
        for step in &metrics.steps {
            let mut line = format!("- {} [{}]", step.name, step.status.as_str());
            if step.status == StepStatus::Failed {
                if let Some(error) = &step.error_message {
                    line.push_str(&format!(": {error}"));
                }
            }
            lines.push(line);
        }
        if let Some(reason) = &metrics.abort_reason {
            lines.push(format!("aborted: {reason}"));
        }
        Self {
            title: format!("{} {verdict}", metrics.bot_name),
            message: lines.join("\n"),
            succeeded: metrics.overall_success,
            metrics: metrics.clone(),
        }
    }
}

/// Receives the outcome of every run, success or failure.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &RunNotification) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &RunNotification) -> Result<(), NotifyError> {
        if notification.succeeded {
            info!(title = %notification.title, "{}", notification.message);
        } else {
            warn!(title = %notification.title, "{}", notification.message);
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct SlackPayload<'a> {
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,
}

pub struct SlackWebhookNotifier {
    client: reqwest::Client,
    webhook_url: String,
    channel: Option<String>,
    username: Option<String>,
    deadline: Duration,
}

impl SlackWebhookNotifier {
    /// `deadline` bounds the whole delivery, connect included.
    pub fn new(webhook_url: impl Into<String>, deadline: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .connect_timeout(deadline)
            .timeout(deadline)
            .build()?;
        Ok(Self {
            client,
            webhook_url: webhook_url.into(),
            channel: None,
            username: None,
            deadline,
        })
    }

    pub fn with_channel(mut self, channel: Option<String>) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_username(mut self, username: Option<String>) -> Self {
        self.username = username;
        self
    }
}

#[async_trait]
impl Notifier for SlackWebhookNotifier {
    async fn notify(&self, notification: &RunNotification) -> Result<(), NotifyError> {
        let payload = SlackPayload {
            text: format!("*{}*\n{}", notification.title, notification.message),
            channel: self.channel.as_deref(),
            username: self.username.as_deref(),
        };
        let request = self.client.post(&self.webhook_url).json(&payload).send();
        let response = match timeout(self.deadline, request).await {
            Ok(response) => response?,
            Err(_) => return Err(NotifyError::Timeout(self.deadline)),
        };
        if !response.status().is_success() {
            return Err(NotifyError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Builds the notifier named by the `[notifier]` section, if any.
pub fn notifier_from_config(
    section: &NotifierSection,
) -> Result<Option<Arc<dyn Notifier>>, NotifyError> {
    match section.kind {
        NotifierKind::None => Ok(None),
        NotifierKind::Log => Ok(Some(Arc::new(LogNotifier))),
        NotifierKind::SlackWebhook => {
            let url = section.webhook_url.clone().ok_or_else(|| {
                NotifyError::Configuration("slack_webhook requires webhook_url".into())
            })?;
            let notifier = SlackWebhookNotifier::new(url, section.timeout())?
                .with_channel(section.channel.clone())
                .with_username(section.username.clone());
            Ok(Some(Arc::new(notifier)))
        }
    }
}
