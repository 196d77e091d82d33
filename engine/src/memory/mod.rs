//! Memory store
//!
//! Process-wide, append-only log of outcome records plus the learned pattern
//! index derived from it. The planner reads it through a [`PatternSnapshot`];
//! only the adaptation engine writes patterns.
//!
//! Outcome appends are serialized by one lock so the log keeps completion
//! order. Pattern updates take a per-key lock around the read-modify-write,
//! so concurrent updates of the same key never lose a sample.
//!
//! With a backing [`KvStore`] every write is persisted under the `outcome/`,
//! `pattern/` and `summary/` namespaces and reloaded by [`MemoryStore::open`].

pub mod outcome;
pub mod pattern;

pub use outcome::{AdaptationSummary, OutcomeRecord, OutcomeStatus, ShapeStat};
pub use pattern::{LearnedPattern, PatternKey, PatternSnapshot};

use crate::db::KvStore;
use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

const OUTCOME_PREFIX: &str = "outcome/";
const PATTERN_PREFIX: &str = "pattern/";
const SUMMARY_PREFIX: &str = "summary/";

#[derive(Default)]
struct OutcomeLog {
    records: Vec<OutcomeRecord>,
    seen: HashSet<Uuid>,
    next_seq: u64,
}

pub struct MemoryStore {
    kv: Option<Arc<dyn KvStore>>,
    alpha: f64,
    log: Mutex<OutcomeLog>,
    patterns: RwLock<HashMap<PatternKey, LearnedPattern>>,
    pattern_locks: Mutex<HashMap<PatternKey, Arc<Mutex<()>>>>,
    summaries: RwLock<HashMap<String, AdaptationSummary>>,
}

impl MemoryStore {
    /// Store that lives only as long as the process
    pub fn in_memory(alpha: f64) -> Self {
        Self {
            kv: None,
            alpha,
            log: Mutex::new(OutcomeLog::default()),
            patterns: RwLock::new(HashMap::new()),
            pattern_locks: Mutex::new(HashMap::new()),
            summaries: RwLock::new(HashMap::new()),
        }
    }

    /// Open a persistent store and reload everything written before
    pub async fn open(kv: Arc<dyn KvStore>, alpha: f64) -> Result<Self> {
        let mut log = OutcomeLog::default();
        for (key, value) in kv.scan(OUTCOME_PREFIX).await? {
            let record: OutcomeRecord = serde_json::from_slice(&value)
                .with_context(|| format!("Corrupt outcome record {}", key))?;
            if let Ok(seq) = key[OUTCOME_PREFIX.len()..].parse::<u64>() {
                log.next_seq = log.next_seq.max(seq + 1);
            }
            log.seen.insert(record.id);
            log.records.push(record);
        }

        let mut patterns = HashMap::new();
        for (key, value) in kv.scan(PATTERN_PREFIX).await? {
            let pattern: LearnedPattern = serde_json::from_slice(&value)
                .with_context(|| format!("Corrupt pattern {}", key))?;
            patterns.insert(pattern.key.clone(), pattern);
        }

        let mut summaries = HashMap::new();
        for (key, value) in kv.scan(SUMMARY_PREFIX).await? {
            let summary: AdaptationSummary = serde_json::from_slice(&value)
                .with_context(|| format!("Corrupt summary {}", key))?;
            summaries.insert(summary.goal_id.clone(), summary);
        }

        info!(
            "Memory store opened: {} outcomes, {} patterns, {} summaries",
            log.records.len(),
            patterns.len(),
            summaries.len()
        );

        Ok(Self {
            kv: Some(kv),
            alpha,
            log: Mutex::new(log),
            patterns: RwLock::new(patterns),
            pattern_locks: Mutex::new(HashMap::new()),
            summaries: RwLock::new(summaries),
        })
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Append an outcome record in completion order
    ///
    /// Returns `false` without writing anything when a record with the same id
    /// was already appended.
    pub async fn append_outcome(&self, record: OutcomeRecord) -> Result<bool> {
        let mut log = self.log.lock().await;
        if log.seen.contains(&record.id) {
            debug!("Outcome {} already recorded, ignoring replay", record.id);
            return Ok(false);
        }

        if let Some(kv) = &self.kv {
            let key = format!("{}{:012}", OUTCOME_PREFIX, log.next_seq);
            let value = serde_json::to_vec(&record)?;
            kv.put(&key, &value).await?;
        }

        log.next_seq += 1;
        log.seen.insert(record.id);
        log.records.push(record);
        Ok(true)
    }

    pub async fn contains_outcome(&self, id: &Uuid) -> bool {
        self.log.lock().await.seen.contains(id)
    }

    /// Fold one success/failure sample into a pattern atomically
    pub async fn update_pattern(&self, key: PatternKey, success: bool) -> Result<LearnedPattern> {
        let key_lock = {
            let mut locks = self.pattern_locks.lock().await;
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        let _guard = key_lock.lock().await;

        let mut pattern = self
            .patterns
            .read()
            .await
            .get(&key)
            .cloned()
            .unwrap_or_else(|| LearnedPattern::new(key.clone()));
        pattern.apply(success, self.alpha);

        if let Some(kv) = &self.kv {
            kv.put(&key.storage_key(), &serde_json::to_vec(&pattern)?)
                .await?;
        }

        self.patterns.write().await.insert(key, pattern.clone());
        Ok(pattern)
    }

    pub async fn pattern(&self, key: &PatternKey) -> Option<LearnedPattern> {
        self.patterns.read().await.get(key).cloned()
    }

    pub async fn snapshot(&self) -> PatternSnapshot {
        PatternSnapshot::from_patterns(self.patterns.read().await.values().cloned())
    }

    /// All patterns, most confident first
    pub async fn patterns(&self) -> Vec<LearnedPattern> {
        let mut patterns: Vec<_> = self.patterns.read().await.values().cloned().collect();
        patterns.sort_by(|a, b| {
            b.last_confidence
                .total_cmp(&a.last_confidence)
                .then(b.sample_count.cmp(&a.sample_count))
                .then(a.key.cmp(&b.key))
        });
        patterns
    }

    pub async fn outcomes(&self) -> Vec<OutcomeRecord> {
        self.log.lock().await.records.clone()
    }

    pub async fn outcome_count(&self) -> usize {
        self.log.lock().await.records.len()
    }

    pub async fn outcomes_for_goal(&self, goal_id: &str) -> Vec<OutcomeRecord> {
        self.log
            .lock()
            .await
            .records
            .iter()
            .filter(|r| r.goal_id == goal_id)
            .cloned()
            .collect()
    }

    pub async fn save_summary(&self, summary: AdaptationSummary) -> Result<()> {
        if let Some(kv) = &self.kv {
            let key = format!("{}{}", SUMMARY_PREFIX, summary.goal_id);
            kv.put(&key, &serde_json::to_vec(&summary)?).await?;
        }
        self.summaries
            .write()
            .await
            .insert(summary.goal_id.clone(), summary);
        Ok(())
    }

    pub async fn summary(&self, goal_id: &str) -> Option<AdaptationSummary> {
        self.summaries.read().await.get(goal_id).cloned()
    }

    /// Make everything written so far durable
    pub async fn flush(&self) -> Result<()> {
        if let Some(kv) = &self.kv {
            kv.flush().await.context("Failed to flush memory store")?;
        }
        Ok(())
    }

    pub async fn close(&self) -> Result<()> {
        self.flush().await?;
        debug!("Memory store closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryKv;
    use serde_json::{json, Map};

    fn record(goal: &str, task: &str, status: OutcomeStatus) -> OutcomeRecord {
        let params = json!({"operation": "read_file", "path": "a"})
            .as_object()
            .cloned()
            .unwrap();
        OutcomeRecord::new(goal, task, Some("file_operations".into()), params, status)
    }

    #[tokio::test]
    async fn test_append_is_deduplicated_by_id() {
        let store = MemoryStore::in_memory(0.3);
        let rec = record("g", "t", OutcomeStatus::Succeeded);

        assert!(store.append_outcome(rec.clone()).await.unwrap());
        assert!(!store.append_outcome(rec.clone()).await.unwrap());
        assert_eq!(store.outcome_count().await, 1);
        assert!(store.contains_outcome(&rec.id).await);
    }

    #[tokio::test]
    async fn test_update_pattern_accumulates() {
        let store = MemoryStore::in_memory(0.3);
        let key = PatternKey::from_params("t", &Map::new());

        store.update_pattern(key.clone(), true).await.unwrap();
        let pattern = store.update_pattern(key.clone(), false).await.unwrap();

        assert_eq!(pattern.sample_count, 2);
        assert!((pattern.success_rate - 0.7).abs() < 1e-9);
        assert_eq!(store.pattern(&key).await, Some(pattern));
    }

    #[tokio::test]
    async fn test_reopen_restores_state() {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKv::new());
        let store = MemoryStore::open(Arc::clone(&kv), 0.3).await.unwrap();

        let rec = record("g1", "t1", OutcomeStatus::Failed);
        let key = rec.pattern_key().unwrap();
        store.append_outcome(rec.clone()).await.unwrap();
        store.update_pattern(key.clone(), false).await.unwrap();
        store.close().await.unwrap();

        let reopened = MemoryStore::open(Arc::clone(&kv), 0.3).await.unwrap();
        assert_eq!(reopened.outcomes().await, vec![rec.clone()]);
        assert_eq!(reopened.pattern(&key).await.unwrap().sample_count, 1);

        // the replay guard survives a restart
        assert!(!reopened.append_outcome(rec).await.unwrap());

        let second = record("g1", "t2", OutcomeStatus::Succeeded);
        assert!(reopened.append_outcome(second).await.unwrap());
        let keys: Vec<_> = kv
            .scan("outcome/")
            .await
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["outcome/000000000000", "outcome/000000000001"]);
    }

    #[tokio::test]
    async fn test_patterns_sorted_by_confidence() {
        let store = MemoryStore::in_memory(0.3);
        let good = PatternKey::new("good", "-");
        let bad = PatternKey::new("bad", "-");
        for _ in 0..3 {
            store.update_pattern(good.clone(), true).await.unwrap();
            store.update_pattern(bad.clone(), false).await.unwrap();
        }

        let patterns = store.patterns().await;
        assert_eq!(patterns[0].key, good);
        assert_eq!(patterns[1].key, bad);
        assert_eq!(store.snapshot().await.len(), 2);
    }

    #[tokio::test]
    async fn test_outcomes_for_goal_filters() {
        let store = MemoryStore::in_memory(0.3);
        store
            .append_outcome(record("a", "t", OutcomeStatus::Succeeded))
            .await
            .unwrap();
        store
            .append_outcome(record("b", "t", OutcomeStatus::Succeeded))
            .await
            .unwrap();

        assert_eq!(store.outcomes_for_goal("a").await.len(), 1);
    }
}
