//! 轮次持久化
//!
//! TurnStore 接收完整的 TurnSnapshot，按 turn_id 覆盖写入（后写者胜）。
//! 提供内存实现（测试 / 单进程）与 JSON 文件实现（每轮一个文件）。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::core::{AgentError, TurnSnapshot};

/// 持久化协作方：保存 / 读取某一轮的快照
#[async_trait]
pub trait TurnStore: Send + Sync {
    async fn save(&self, snapshot: &TurnSnapshot) -> Result<(), AgentError>;

    async fn load(&self, turn_id: &str) -> Result<Option<TurnSnapshot>, AgentError>;
}

/// 内存实现：记录保存次数，便于断言「每轮恰好保存一次」
#[derive(Debug, Default)]
pub struct InMemoryTurnStore {
    turns: RwLock<HashMap<String, TurnSnapshot>>,
    saves: AtomicUsize,
}

impl InMemoryTurnStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.turns.read().await.len()
    }
}

#[async_trait]
impl TurnStore for InMemoryTurnStore {
    async fn save(&self, snapshot: &TurnSnapshot) -> Result<(), AgentError> {
        self.turns
            .write()
            .await
            .insert(snapshot.turn_id.clone(), snapshot.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load(&self, turn_id: &str) -> Result<Option<TurnSnapshot>, AgentError> {
        Ok(self.turns.read().await.get(turn_id).cloned())
    }
}

/// 文件实现：`<dir>/<turn_id>.json`，父目录不存在时自动创建
#[derive(Debug)]
pub struct JsonFileTurnStore {
    dir: PathBuf,
}

impl JsonFileTurnStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// turn_id 只允许字母、数字、`-`、`_`，防止路径逃逸
    fn path_for(&self, turn_id: &str) -> Result<PathBuf, AgentError> {
        let valid = !turn_id.is_empty()
            && turn_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(AgentError::Persistence(format!(
                "invalid turn id: {:?}",
                turn_id
            )));
        }
        Ok(self.dir.join(format!("{}.json", turn_id)))
    }
}

#[async_trait]
impl TurnStore for JsonFileTurnStore {
    async fn save(&self, snapshot: &TurnSnapshot) -> Result<(), AgentError> {
        let path = self.path_for(&snapshot.turn_id)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| AgentError::Persistence(e.to_string()))?;
        let data = serde_json::to_string_pretty(snapshot)?;
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| AgentError::Persistence(e.to_string()))?;
        tracing::debug!(turn_id = %snapshot.turn_id, path = %path.display(), "turn saved");
        Ok(())
    }

    async fn load(&self, turn_id: &str) -> Result<Option<TurnSnapshot>, AgentError> {
        let path = self.path_for(turn_id)?;
        if !path.exists() {
            return Ok(None);
        }
        let data = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| AgentError::Persistence(e.to_string()))?;
        Ok(Some(serde_json::from_str(&data)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{TurnContext, TurnStatus};

    fn snapshot(id: &str, answer: &str) -> TurnSnapshot {
        let mut ctx = TurnContext::new(id, "u", "q");
        ctx.complete(answer);
        ctx.snapshot()
    }

    #[tokio::test]
    async fn test_in_memory_last_write_wins() {
        let store = InMemoryTurnStore::new();
        store.save(&snapshot("t1", "first")).await.unwrap();
        store.save(&snapshot("t1", "second")).await.unwrap();
        let loaded = store.load("t1").await.unwrap().unwrap();
        assert_eq!(loaded.final_answer.as_deref(), Some("second"));
        assert_eq!(store.save_count(), 2);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_json_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileTurnStore::new(dir.path().join("turns"));
        assert!(store.load("missing").await.unwrap().is_none());
        store.save(&snapshot("abc-123", "42")).await.unwrap();
        let loaded = store.load("abc-123").await.unwrap().unwrap();
        assert_eq!(loaded.status, TurnStatus::Completed);
        assert_eq!(loaded.final_answer.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn test_json_file_rejects_path_escape() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileTurnStore::new(dir.path());
        let err = store.save(&snapshot("../evil", "x")).await.unwrap_err();
        assert!(matches!(err, AgentError::Persistence(_)));
    }
}
