//! In-process backend: drives a registered entry point on a tokio task
//! instead of a child process. An explicit registry of async closures
//! keyed by bot name, probed by entry-point name priority.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::{BotAdapter, ENTRY_POINT_PRIORITY};
use crate::error::{CoreError, Result};
use crate::types::{BotDescriptor, BotStatus};

type EntryPoint = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// One registered in-process bot: its available entry points, keyed by
/// name (`run`, `monitor`, `execute`, `main`).
#[derive(Clone, Default)]
pub struct EntryPointTable {
    entries: std::collections::HashMap<String, EntryPoint>,
}

impl EntryPointTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, name: &str, entry: EntryPoint) -> Self {
        self.entries.insert(name.to_string(), entry);
        self
    }

    fn resolve(&self) -> Option<(&str, EntryPoint)> {
        for name in ENTRY_POINT_PRIORITY {
            if let Some(entry) = self.entries.get(*name) {
                return Some((name, entry.clone()));
            }
        }
        None
    }
}

pub struct InProcessAdapter {
    registry: DashMap<String, EntryPointTable>,
    handles: DashMap<String, JoinHandle<()>>,
}

impl InProcessAdapter {
    pub fn new() -> Self {
        Self {
            registry: DashMap::new(),
            handles: DashMap::new(),
        }
    }

    pub fn register_bot(&self, bot_id: impl Into<String>, table: EntryPointTable) {
        self.registry.insert(bot_id.into(), table);
    }
}

impl Default for InProcessAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BotAdapter for InProcessAdapter {
    async fn start(&self, descriptor: &mut BotDescriptor, _config: Option<serde_json::Value>) -> Result<()> {
        if descriptor.status == BotStatus::Running && self.handles.contains_key(&descriptor.bot_id) {
            info!(bot_id = %descriptor.bot_id, "start requested for already-running bot, no-op");
            return Ok(());
        }

        let table = self
            .registry
            .get(&descriptor.bot_id)
            .ok_or_else(|| CoreError::config(format!("no in-process entry points registered for {}", descriptor.bot_id)))?;

        let Some((name, entry)) = table.resolve() else {
            return Err(CoreError::config(format!(
                "bot {} has no recognized entry point among {:?}",
                descriptor.bot_id, ENTRY_POINT_PRIORITY
            )));
        };

        info!(bot_id = %descriptor.bot_id, entry_point = name, "starting in-process bot");
        let bot_id = descriptor.bot_id.clone();
        let handle = tokio::spawn(async move {
            entry().await;
            info!(bot_id = %bot_id, "in-process bot entry point returned");
        });

        self.handles.insert(descriptor.bot_id.clone(), handle);
        descriptor.status = BotStatus::Running;
        descriptor.started_at = Some(chrono::Utc::now());
        descriptor.last_activity = chrono::Utc::now();
        descriptor.pid = None;
        Ok(())
    }

    async fn stop(&self, descriptor: &mut BotDescriptor) -> Result<()> {
        if let Some((_, handle)) = self.handles.remove(&descriptor.bot_id) {
            handle.abort();
        } else {
            warn!(bot_id = %descriptor.bot_id, "stop called on a bot with no running task");
        }
        descriptor.status = BotStatus::Stopped;
        Ok(())
    }

    async fn poll(&self, descriptor: &BotDescriptor) -> Result<super::PollOutcome> {
        use super::PollOutcome;

        let Some(finished) = self.handles.remove_if(&descriptor.bot_id, |_, h| h.is_finished()) else {
            return Ok(if self.handles.contains_key(&descriptor.bot_id) {
                PollOutcome::Alive
            } else {
                PollOutcome::ExitedClean
            });
        };
        match finished.1.await {
            Ok(()) => Ok(PollOutcome::ExitedClean),
            Err(e) => Ok(PollOutcome::ExitedWithError(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BotDescriptor;

    fn descriptor() -> BotDescriptor {
        BotDescriptor::new("b1", "test-bot", "in_process")
    }

    #[tokio::test]
    async fn second_start_on_a_running_bot_does_not_spawn_again() {
        let adapter = InProcessAdapter::new();
        let entry: EntryPoint = Arc::new(|| Box::pin(futures_idle()) as Pin<Box<dyn Future<Output = ()> + Send>>);
        adapter.register_bot("b1", EntryPointTable::new().register("run", entry));
        let mut descriptor = descriptor();

        adapter.start(&mut descriptor, None).await.unwrap();
        let first_handle_count = adapter.handles.len();

        adapter.start(&mut descriptor, None).await.unwrap();
        assert_eq!(adapter.handles.len(), first_handle_count);
    }

    async fn futures_idle() {
        tokio::time::sleep(std::time::Duration::from_secs(60)).await;
    }
}
