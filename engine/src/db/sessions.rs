/// Goal session persistence
///
/// Sessions are stored as JSON under `session/<goal-id>`, one record per goal,
/// overwritten on every save.
use super::KvStore;
use crate::conductor::types::GoalSession;
use anyhow::{Context, Result};
use std::sync::Arc;

const SESSION_PREFIX: &str = "session/";

/// Session repository for goal snapshots
pub struct SessionRepository {
    kv: Arc<dyn KvStore>,
}

impl SessionRepository {
    /// Create a new session repository
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub async fn save(&self, session: &GoalSession) -> Result<()> {
        let key = format!("{}{}", SESSION_PREFIX, session.goal.id);
        let value = serde_json::to_vec(session).context("Failed to encode session")?;
        self.kv.put(&key, &value).await
    }

    pub async fn load(&self, goal_id: &str) -> Result<Option<GoalSession>> {
        let key = format!("{}{}", SESSION_PREFIX, goal_id);
        match self.kv.get(&key).await? {
            Some(value) => {
                let session = serde_json::from_slice(&value)
                    .with_context(|| format!("Corrupt session {}", goal_id))?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    /// Most recently updated sessions first
    pub async fn list(&self, limit: usize) -> Result<Vec<GoalSession>> {
        let mut sessions = Vec::new();
        for (key, value) in self.kv.scan(SESSION_PREFIX).await? {
            let session: GoalSession =
                serde_json::from_slice(&value).with_context(|| format!("Corrupt session {}", key))?;
            sessions.push(session);
        }

        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions.truncate(limit);
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conductor::types::Goal;
    use crate::db::InMemoryKv;
    use crate::graph::{TaskGraph, TaskSpec};

    fn session(text: &str) -> GoalSession {
        let graph = TaskGraph::from_specs(vec![TaskSpec::new("a", "t")]).unwrap();
        GoalSession::new(Goal::new(text, graph), None)
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let repo = SessionRepository::new(Arc::new(InMemoryKv::new()));
        let s = session("first");
        repo.save(&s).await.unwrap();

        let loaded = repo.load(&s.goal.id).await.unwrap().unwrap();
        assert_eq!(loaded, s);
        assert!(repo.load("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_most_recent_first() {
        let repo = SessionRepository::new(Arc::new(InMemoryKv::new()));
        let mut older = session("older");
        older.updated_at -= chrono::Duration::seconds(60);
        let newer = session("newer");

        repo.save(&older).await.unwrap();
        repo.save(&newer).await.unwrap();

        let listed = repo.list(10).await.unwrap();
        assert_eq!(listed[0].goal.text, "newer");
        assert_eq!(listed[1].goal.text, "older");
        assert_eq!(repo.list(1).await.unwrap().len(), 1);
    }
}
