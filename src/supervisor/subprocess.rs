//! Subprocess backend: launches the bot's `launch_spec` as a child in its
//! own process group, captures stdout/stderr, and supervises it with a
//! dedicated task per child (stopping one never blocks another).

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{error, info, warn};

use super::BotAdapter;
use crate::error::{CoreError, Result};
use crate::types::{BotDescriptor, BotStatus};

const GRACEFUL_STOP_WAIT: Duration = Duration::from_secs(5);

struct ChildHandle {
    child: Mutex<Child>,
    stderr_tail: Arc<Mutex<String>>,
}

pub struct SubprocessAdapter {
    children: DashMap<String, ChildHandle>,
}

impl SubprocessAdapter {
    pub fn new() -> Self {
        Self {
            children: DashMap::new(),
        }
    }
}

impl Default for SubprocessAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BotAdapter for SubprocessAdapter {
    async fn start(&self, descriptor: &mut BotDescriptor, config: Option<serde_json::Value>) -> Result<()> {
        if descriptor.status == BotStatus::Running && self.children.contains_key(&descriptor.bot_id) {
            info!(bot_id = %descriptor.bot_id, "start requested for already-running bot, no-op");
            return Ok(());
        }

        let mut parts = descriptor.launch_spec.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| CoreError::config(format!("empty launch_spec for bot {}", descriptor.bot_id)))?;

        let mut cmd = Command::new(program);
        cmd.args(parts).stdout(Stdio::piped()).stderr(Stdio::piped());

        if let Some(config) = config {
            if let Some(map) = config.as_object() {
                let envs: HashMap<String, String> = map
                    .iter()
                    .map(|(k, v)| (k.to_uppercase(), v.to_string()))
                    .collect();
                cmd.envs(envs);
            }
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| CoreError::transient("subprocess spawn", format!("{}: {e}", descriptor.bot_id)))?;

        descriptor.pid = child.id();
        descriptor.status = BotStatus::Running;
        descriptor.started_at = Some(chrono::Utc::now());
        descriptor.last_activity = chrono::Utc::now();

        let stderr_tail = Arc::new(Mutex::new(String::new()));
        if let Some(stderr) = child.stderr.take() {
            let tail = stderr_tail.clone();
            let bot_id = descriptor.bot_id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(bot_id = %bot_id, stderr = %line, "bot stderr");
                    let mut tail = tail.lock();
                    tail.push_str(&line);
                    tail.push('\n');
                }
            });
        }

        info!(bot_id = %descriptor.bot_id, pid = ?descriptor.pid, "bot started");
        self.children.insert(
            descriptor.bot_id.clone(),
            ChildHandle {
                child: Mutex::new(child),
                stderr_tail,
            },
        );
        Ok(())
    }

    async fn stop(&self, descriptor: &mut BotDescriptor) -> Result<()> {
        let Some((_, handle)) = self.children.remove(&descriptor.bot_id) else {
            return Ok(());
        };

        let pid = descriptor.pid;
        #[cfg(unix)]
        if let Some(pid) = pid {
            unsafe {
                libc::kill(-(pid as i32), libc::SIGTERM);
            }
        }

        let mut child = handle.child.into_inner();
        let waited = timeout(GRACEFUL_STOP_WAIT, child.wait()).await;
        if waited.is_err() {
            warn!(bot_id = %descriptor.bot_id, "graceful stop timed out, force killing");
            let _ = child.kill().await;
        }

        descriptor.status = BotStatus::Stopped;
        descriptor.pid = None;
        info!(bot_id = %descriptor.bot_id, "bot stopped");
        Ok(())
    }

    async fn poll(&self, descriptor: &BotDescriptor) -> Result<super::PollOutcome> {
        use super::PollOutcome;

        let Some(handle) = self.children.get(&descriptor.bot_id) else {
            return Ok(PollOutcome::ExitedClean);
        };
        let outcome = {
            let mut child = handle.child.lock();
            match child.try_wait() {
                Ok(None) => Ok(PollOutcome::Alive),
                Ok(Some(status)) => {
                    if status.success() {
                        Ok(PollOutcome::ExitedClean)
                    } else {
                        let tail = handle.stderr_tail.lock().clone();
                        error!(bot_id = %descriptor.bot_id, ?status, stderr = %tail, "bot exited with error");
                        Ok(PollOutcome::ExitedWithError(if tail.is_empty() {
                            format!("process exited with {status}")
                        } else {
                            tail
                        }))
                    }
                }
                Err(e) => Err(CoreError::transient("subprocess poll", e.to_string())),
            }
        };
        drop(handle);
        if !matches!(outcome, Ok(PollOutcome::Alive)) {
            self.children.remove(&descriptor.bot_id);
        }
        outcome
    }
}
