//! 轮次监管：每轮一个取消令牌
//!
//! 单轮取消只影响对应的子令牌；cancel_all 取消当前在途的全部轮次，之后注册的轮次不受影响。
//! shutdown 取消根令牌，此后注册的令牌一出生即已取消，只在退出时使用。
//! 轮次结束后由调用方 finish 注销。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct TurnSupervisor {
    root: CancellationToken,
    turns: Arc<RwLock<HashMap<String, CancellationToken>>>,
}

impl TurnSupervisor {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            turns: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// 为一轮创建子令牌；同一 turn_id 重复注册时返回已有令牌
    pub async fn register(&self, turn_id: &str) -> CancellationToken {
        let mut turns = self.turns.write().await;
        turns
            .entry(turn_id.to_string())
            .or_insert_with(|| self.root.child_token())
            .clone()
    }

    /// 取消指定轮次；不存在（已结束或从未注册）时返回 false
    pub async fn cancel(&self, turn_id: &str) -> bool {
        match self.turns.read().await.get(turn_id) {
            Some(token) => {
                token.cancel();
                tracing::info!(turn_id = %turn_id, "turn cancellation requested");
                true
            }
            None => false,
        }
    }

    /// 取消当前在途的全部轮次，返回取消的数量
    pub async fn cancel_all(&self) -> usize {
        let turns = self.turns.read().await;
        for token in turns.values() {
            token.cancel();
        }
        tracing::info!(count = turns.len(), "all active turns cancelled");
        turns.len()
    }

    /// 取消根令牌（退出时）
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    pub async fn finish(&self, turn_id: &str) {
        self.turns.write().await.remove(turn_id);
    }

    pub async fn is_active(&self, turn_id: &str) -> bool {
        self.turns.read().await.contains_key(turn_id)
    }

    pub async fn active_turns(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.turns.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Default for TurnSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_single_turn() {
        let sup = TurnSupervisor::new();
        let a = sup.register("a").await;
        let b = sup.register("b").await;
        assert!(sup.cancel("a").await);
        assert!(a.is_cancelled());
        assert!(!b.is_cancelled());
        assert!(!sup.cancel("missing").await);
    }

    #[tokio::test]
    async fn test_cancel_all_and_finish() {
        let sup = TurnSupervisor::new();
        let a = sup.register("a").await;
        assert_eq!(sup.active_turns().await, vec!["a".to_string()]);
        assert_eq!(sup.cancel_all().await, 1);
        assert!(a.is_cancelled());
        sup.finish("a").await;
        assert!(!sup.is_active("a").await);

        let b = sup.register("b").await;
        assert!(!b.is_cancelled());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_later_turns() {
        let sup = TurnSupervisor::new();
        let a = sup.register("a").await;
        sup.shutdown();
        assert!(a.is_cancelled());
        assert!(sup.register("b").await.is_cancelled());
    }
}
