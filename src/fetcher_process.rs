//! [`Fetcher`] backed by a long-lived helper process.
//!
//! The helper (typically a small browser-automation script) is started with
//! stdin/stdout piped and receives one JSON request per line:
//!
//! | Request | Reply |
//! |---------|-------|
//! | `{"op":"fetch","url":"..."}` | `{"ok":true,"title":..,"artist":..,"content":..,"tuning":..}` |
//! | `{"op":"rotate","user_agent":"..."}` | `{"ok":true}` |
//! | `{"op":"close"}` | none |
//!
//! Failures are reported as `{"ok":false,"error":"..."}`. The helper's stderr
//! is inherited so its own diagnostics reach the terminal. The user agent and
//! headed/headless preference are passed via `TABVAULT_USER_AGENT` and
//! `TABVAULT_HEADED`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::FetcherConfig;
use crate::error::BackupError;
use crate::fetcher::Fetcher;
use crate::models::FetchedTab;

const CLOSE_GRACE: Duration = Duration::from_secs(5);

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum Request<'a> {
    Fetch { url: &'a str },
    Rotate { user_agent: &'a str },
    Close,
}

#[derive(Deserialize)]
struct Reply {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    tab: FetchedTab,
}

struct Helper {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

pub struct ProcessFetcher {
    command: Vec<String>,
    timeout: Duration,
    headed: bool,
    user_agents: Vec<String>,
    helper: Option<Helper>,
}

impl ProcessFetcher {
    pub fn new(config: &FetcherConfig) -> Result<Self> {
        if config.command.is_empty() {
            bail!("fetcher.command is not configured; set it to the helper program that extracts tab pages");
        }
        Ok(Self {
            command: config.command.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            headed: config.headed,
            user_agents: config.user_agents.clone(),
            helper: None,
        })
    }

    fn pick_user_agent(&self) -> String {
        self.user_agents
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_default()
    }

    fn spawn(&self) -> Result<Helper> {
        let user_agent = self.pick_user_agent();
        let mut child = Command::new(&self.command[0])
            .args(&self.command[1..])
            .env("TABVAULT_USER_AGENT", &user_agent)
            .env("TABVAULT_HEADED", if self.headed { "1" } else { "0" })
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start fetcher helper: {}", self.command[0]))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow::anyhow!("fetcher helper has no stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("fetcher helper has no stdout"))?;

        info!(helper = %self.command[0], "Started fetcher helper");
        Ok(Helper {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        })
    }

    fn ensure_helper(&mut self) -> Result<&mut Helper> {
        if self.helper.is_none() {
            self.helper = Some(self.spawn()?);
        }
        self.helper
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("fetcher helper unavailable"))
    }

    async fn request(&mut self, request: &Request<'_>) -> Result<Reply> {
        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        let timeout = self.timeout;

        let helper = self.ensure_helper()?;
        let exchange = async {
            helper.stdin.write_all(line.as_bytes()).await?;
            helper.stdin.flush().await?;
            helper.stdout.next_line().await
        };

        let outcome = tokio::time::timeout(timeout, exchange).await;
        let reply_line = match outcome {
            Ok(Ok(Some(reply))) => reply,
            Ok(Ok(None)) => {
                self.helper = None;
                bail!("fetcher helper exited unexpectedly");
            }
            Ok(Err(e)) => {
                self.helper = None;
                return Err(e).context("fetcher helper I/O failed");
            }
            Err(_) => {
                // Unknown protocol state after a timeout; start over next time.
                self.kill().await;
                bail!("fetcher helper timed out after {:?}", timeout);
            }
        };

        serde_json::from_str(&reply_line)
            .with_context(|| format!("Malformed reply from fetcher helper: {}", reply_line))
    }

    async fn kill(&mut self) {
        if let Some(mut helper) = self.helper.take() {
            let _ = helper.child.start_kill();
            let _ = helper.child.wait().await;
        }
    }
}

#[async_trait]
impl Fetcher for ProcessFetcher {
    async fn fetch(&mut self, url: &Url) -> Result<FetchedTab> {
        debug!(%url, "Fetching");
        let reply = self.request(&Request::Fetch { url: url.as_str() }).await?;
        if !reply.ok {
            let message = reply.error.unwrap_or_else(|| "unknown error".to_string());
            return Err(BackupError::Fetch(message).into());
        }
        Ok(reply.tab)
    }

    async fn rotate(&mut self) -> Result<()> {
        if self.helper.is_none() {
            return Ok(());
        }
        let user_agent = self.pick_user_agent();
        let reply = self
            .request(&Request::Rotate {
                user_agent: &user_agent,
            })
            .await?;
        if !reply.ok {
            bail!(
                "rotation failed: {}",
                reply.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }
        Ok(())
    }

    async fn rebuild(&mut self) -> Result<()> {
        self.kill().await;
        self.helper = Some(self.spawn()?);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let Some(mut helper) = self.helper.take() else {
            return Ok(());
        };
        let mut line = serde_json::to_string(&Request::Close)?;
        line.push('\n');
        let _ = helper.stdin.write_all(line.as_bytes()).await;
        let _ = helper.stdin.shutdown().await;
        match tokio::time::timeout(CLOSE_GRACE, helper.child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                warn!("Fetcher helper did not exit, killing it");
                let _ = helper.child.start_kill();
                let _ = helper.child.wait().await;
            }
        }
        Ok(())
    }
}
