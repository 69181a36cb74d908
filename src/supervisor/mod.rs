//! Worker Supervisor: spawns each external bot as a child in its own
//! process group, monitors liveness, and stops it with a two-phase
//! cancellation.

pub mod inprocess;
pub mod subprocess;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::BotDescriptor;

pub use inprocess::InProcessAdapter;
pub use subprocess::SubprocessAdapter;

/// Outcome of one liveness check against a running bot.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Alive,
    ExitedClean,
    ExitedWithError(String),
}

/// A fixed interface with two concrete backends rather than introspecting
/// a loaded module.
#[async_trait]
pub trait BotAdapter: Send + Sync {
    async fn start(&self, descriptor: &mut BotDescriptor, config: Option<serde_json::Value>) -> Result<()>;
    async fn stop(&self, descriptor: &mut BotDescriptor) -> Result<()>;
    /// Checks whether the backend still considers the bot alive, and if
    /// not, whether it exited cleanly or with an error worth recording.
    async fn poll(&self, descriptor: &BotDescriptor) -> Result<PollOutcome>;
}

/// Entry-point method names probed, in priority order, for in-process
/// bots that don't expose a single canonical "run" method.
pub const ENTRY_POINT_PRIORITY: &[&str] = &["run", "monitor", "execute", "main"];
