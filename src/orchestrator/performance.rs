//! Per-bot rolling performance stats: `success_rate` and
//! `avg_execution_time` are incremental means over `tasks_completed`.

use dashmap::DashMap;

use crate::types::BotPerformance;

pub struct BotPerformanceTracker {
    stats: DashMap<String, BotPerformance>,
}

impl BotPerformanceTracker {
    pub fn new() -> Self {
        Self {
            stats: DashMap::new(),
        }
    }

    pub fn get(&self, bot_id: &str) -> Option<BotPerformance> {
        self.stats.get(bot_id).map(|s| s.clone())
    }

    pub fn success_rate(&self, bot_id: &str) -> Option<f64> {
        self.stats.get(bot_id).map(|s| s.success_rate)
    }

    pub fn bot_ids(&self) -> Vec<String> {
        self.stats.iter().map(|e| e.key().clone()).collect()
    }

    /// `success_rate = ((old_rate * (n-1)) + (1 if success else 0)) / n`;
    /// `avg_execution_time` is updated the same way.
    pub fn record_completion(&self, bot_id: &str, success: bool, execution_time_ms: f64) {
        let mut stats = self.stats.entry(bot_id.to_string()).or_default();
        let n = stats.tasks_completed as f64 + 1.0;
        let success_value = if success { 1.0 } else { 0.0 };
        stats.success_rate = ((stats.success_rate * (n - 1.0)) + success_value) / n;
        stats.avg_execution_time_ms = ((stats.avg_execution_time_ms * (n - 1.0)) + execution_time_ms) / n;
        stats.tasks_completed += 1;
    }

    pub fn record_mode_change(&self, bot_id: &str) {
        let mut stats = self.stats.entry(bot_id.to_string()).or_default();
        stats.mode_changes += 1;
    }

    #[cfg(test)]
    pub fn set_success_rate_for_test(&self, bot_id: &str, rate: f64) {
        let mut stats = self.stats.entry(bot_id.to_string()).or_default();
        stats.success_rate = rate;
        if stats.tasks_completed < 5 {
            stats.tasks_completed = 5;
        }
    }
}

impl Default for BotPerformanceTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_rate_is_an_incremental_mean() {
        let tracker = BotPerformanceTracker::new();
        tracker.record_completion("b1", true, 100.0);
        tracker.record_completion("b1", false, 200.0);
        let stats = tracker.get("b1").unwrap();
        assert_eq!(stats.tasks_completed, 2);
        assert!((stats.success_rate - 0.5).abs() < 1e-9);
        assert!((stats.avg_execution_time_ms - 150.0).abs() < 1e-9);
    }
}
