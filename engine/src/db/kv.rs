/// Key/value persistence contract
///
/// The pipeline only needs `put`/`get`/`scan(prefix)`. Keys are plain strings
/// namespaced with `/` and `scan` returns entries ordered by key, so
/// zero-padded sequence numbers come back in insertion order.
use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Insert or replace a value
    async fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// All entries whose key starts with `prefix`, ordered by key
    async fn scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// Make previous writes durable
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Ordered in-process store for tests and ephemeral runs
#[derive(Debug, Default)]
pub struct InMemoryKv {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl KvStore for InMemoryKv {
    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let entries = self.entries.read().await;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_put_get_overwrite() {
        let kv = InMemoryKv::new();
        kv.put("a", b"1").await.unwrap();
        kv.put("a", b"2").await.unwrap();

        assert_eq!(kv.get("a").await.unwrap(), Some(b"2".to_vec()));
        assert_eq!(kv.get("b").await.unwrap(), None);
        assert_eq!(kv.len().await, 1);
    }

    #[tokio::test]
    async fn test_in_memory_scan_is_prefix_bounded_and_ordered() {
        let kv = InMemoryKv::new();
        kv.put("outcome/000000000002", b"b").await.unwrap();
        kv.put("outcome/000000000001", b"a").await.unwrap();
        kv.put("pattern/x", b"p").await.unwrap();
        kv.put("outcomes", b"not a child").await.unwrap();

        let scanned = kv.scan("outcome/").await.unwrap();
        let keys: Vec<_> = scanned.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["outcome/000000000001", "outcome/000000000002"]);
    }
}
