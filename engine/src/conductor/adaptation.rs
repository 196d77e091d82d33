//! Adaptation Engine
//!
//! Subscribes to terminal outcome records, folds them into the learned
//! pattern index and writes a per-goal summary once the goal stops.

use crate::memory::{
    AdaptationSummary, MemoryStore, OutcomeRecord, OutcomeStatus, PatternKey, ShapeStat,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Shapes listed at each end of a summary
const SUMMARY_SHAPES: usize = 3;

/// Receives every terminal outcome the orchestrator produces.
///
/// `record` is awaited by the coordinator, one outcome at a time in
/// completion order. `learn` runs afterwards for each accepted record and
/// may run concurrently with other `learn` calls.
#[async_trait]
pub trait OutcomeObserver: Send + Sync {
    /// Append to the outcome log; `false` means the record was a replay
    async fn record(&self, record: &OutcomeRecord) -> Result<bool>;

    async fn learn(&self, record: OutcomeRecord) -> Result<()>;
}

pub struct AdaptationEngine {
    memory: Arc<MemoryStore>,
}

impl AdaptationEngine {
    pub fn new(memory: Arc<MemoryStore>) -> Self {
        Self { memory }
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    /// Record an outcome and update its pattern.
    ///
    /// Returns `false` for a replayed record, which changes nothing. Skipped
    /// outcomes are logged but do not move any success rate.
    pub async fn absorb(&self, record: OutcomeRecord) -> Result<bool> {
        if !self.append(&record).await? {
            return Ok(false);
        }
        self.learn(record).await?;
        Ok(true)
    }

    pub async fn append(&self, record: &OutcomeRecord) -> Result<bool> {
        self.memory.append_outcome(record.clone()).await
    }

    /// Fold an already appended record into its learned pattern
    pub async fn learn(&self, record: OutcomeRecord) -> Result<()> {
        let success = match record.status {
            OutcomeStatus::Succeeded => true,
            OutcomeStatus::Failed => false,
            OutcomeStatus::Skipped => return Ok(()),
        };

        if let Some(key) = record.pattern_key() {
            let pattern = self.memory.update_pattern(key, success).await?;
            debug!(
                "Task {} updated pattern {}: rate {:.2} over {} sample(s)",
                record.task_id, pattern.key, pattern.success_rate, pattern.sample_count
            );
        }
        Ok(())
    }

    /// Most and least successful shapes of one goal, persisted through memory
    pub async fn summarize(&self, goal_id: &str) -> Result<AdaptationSummary> {
        let outcomes = self.memory.outcomes_for_goal(goal_id).await;

        let mut stats: BTreeMap<PatternKey, ShapeStat> = BTreeMap::new();
        let (mut succeeded, mut failed, mut skipped) = (0, 0, 0);
        for record in &outcomes {
            match record.status {
                OutcomeStatus::Succeeded => succeeded += 1,
                OutcomeStatus::Failed => failed += 1,
                OutcomeStatus::Skipped => {
                    skipped += 1;
                    continue;
                }
            }
            let Some(key) = record.pattern_key() else {
                continue;
            };
            let stat = stats.entry(key.clone()).or_insert_with(|| ShapeStat {
                key,
                successes: 0,
                failures: 0,
            });
            if record.status == OutcomeStatus::Succeeded {
                stat.successes += 1;
            } else {
                stat.failures += 1;
            }
        }

        let mut ranked: Vec<ShapeStat> = stats.into_values().collect();
        ranked.sort_by(|a, b| {
            b.success_rate()
                .total_cmp(&a.success_rate())
                .then((b.successes + b.failures).cmp(&(a.successes + a.failures)))
                .then(a.key.cmp(&b.key))
        });

        let most_successful: Vec<ShapeStat> = ranked
            .iter()
            .filter(|s| s.successes > 0)
            .take(SUMMARY_SHAPES)
            .cloned()
            .collect();
        let least_successful: Vec<ShapeStat> = ranked
            .iter()
            .rev()
            .filter(|s| s.failures > 0)
            .take(SUMMARY_SHAPES)
            .cloned()
            .collect();

        let summary = AdaptationSummary {
            goal_id: goal_id.to_string(),
            generated_at: Utc::now(),
            outcomes: outcomes.len(),
            succeeded,
            failed,
            skipped,
            most_successful,
            least_successful,
        };

        self.memory.save_summary(summary.clone()).await?;
        Ok(summary)
    }
}

#[async_trait]
impl OutcomeObserver for AdaptationEngine {
    async fn record(&self, record: &OutcomeRecord) -> Result<bool> {
        self.append(record).await
    }

    async fn learn(&self, record: OutcomeRecord) -> Result<()> {
        AdaptationEngine::learn(self, record).await
    }
}
