use std::sync::Arc;

use anyhow::Context;
use axum::async_trait;
use serde_json::json;
use tracing::{error, info};

use crate::config::MailConfig;

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html: &str) -> anyhow::Result<()>;
}

/// Delivers mail through an HTTP relay that accepts a JSON envelope.
pub struct HttpMailer {
    client: reqwest::Client,
    endpoint: String,
    from: String,
}

impl HttpMailer {
    pub fn new(cfg: &MailConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: cfg.endpoint.clone(),
            from: cfg.from.clone(),
        }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, to: &str, subject: &str, html: &str) -> anyhow::Result<()> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&json!({
                "from": self.from,
                "to": to,
                "subject": subject,
                "html": html,
            }))
            .send()
            .await
            .context("mail relay request")?;

        if !resp.status().is_success() {
            anyhow::bail!("mail relay returned {}", resp.status());
        }
        Ok(())
    }
}

/// Fire-and-forget delivery: failures are logged, never surfaced to the caller.
pub fn dispatch(mailer: Arc<dyn Mailer>, to: String, subject: String, html: String) {
    tokio::spawn(async move {
        match mailer.send(&to, &subject, &html).await {
            Ok(()) => info!(%to, %subject, "mail dispatched"),
            Err(e) => error!(error = %e, %to, %subject, "mail dispatch failed"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingMailer(AtomicUsize);

    #[async_trait]
    impl Mailer for CountingMailer {
        async fn send(&self, _to: &str, _subject: &str, _html: &str) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn dispatch_runs_detached() {
        let mailer = Arc::new(CountingMailer(AtomicUsize::new(0)));
        dispatch(
            mailer.clone(),
            "a@x.com".into(),
            "Verify Account".into(),
            "<a href=\"#\">verify</a>".into(),
        );
        // give the spawned task a chance to run
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(mailer.0.load(Ordering::SeqCst), 1);
    }

    struct FailingMailer;

    #[async_trait]
    impl Mailer for FailingMailer {
        async fn send(&self, _to: &str, _subject: &str, _html: &str) -> anyhow::Result<()> {
            anyhow::bail!("relay down")
        }
    }

    #[tokio::test]
    async fn dispatch_swallows_errors() {
        // must not panic or propagate
        dispatch(
            Arc::new(FailingMailer),
            "a@x.com".into(),
            "Reset Password".into(),
            "body".into(),
        );
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}
