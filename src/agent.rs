//! 无界面 Agent 运行时
//!
//! 供命令行或 HTTP 前端直接调用：持有共享的 ReactSession 与 TurnSupervisor，
//! run_turn 对单条用户输入跑完整一轮并返回 TurnOutcome，cancel 按 turn_id 取消在途轮次。

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{load_config, AppConfig};
use crate::core::{AgentError, EngineBuilder, TurnSupervisor};
use crate::react::{react_loop, EventEmitter, ReactSession, TurnOutcome, TurnRequest};

pub struct Agent {
    session: ReactSession,
    supervisor: TurnSupervisor,
}

impl Agent {
    pub fn new(session: ReactSession) -> Self {
        Self {
            session,
            supervisor: TurnSupervisor::new(),
        }
    }

    /// 从配置文件构建；加载失败时使用默认配置
    pub fn from_config(
        config_path: Option<PathBuf>,
        emitter: Arc<dyn EventEmitter>,
    ) -> Result<Self, AgentError> {
        let cfg = load_config(config_path).unwrap_or_else(|e| {
            tracing::warn!("Config load failed ({}), using defaults", e);
            AppConfig::default()
        });
        let session = EngineBuilder::new(cfg).with_emitter(emitter).build()?;
        Ok(Self::new(session))
    }

    pub fn session(&self) -> &ReactSession {
        &self.session
    }

    pub async fn run(&self, request: TurnRequest) -> TurnOutcome {
        let turn_id = request.turn_id.clone();
        let token = self.supervisor.register(&turn_id).await;
        let outcome = react_loop(&self.session, request, token).await;
        self.supervisor.finish(&turn_id).await;
        outcome
    }

    /// 便捷入口：新建 turn_id 跑一轮
    pub async fn run_turn(&self, caller: &str, query: &str) -> TurnOutcome {
        self.run(TurnRequest::new(caller, query)).await
    }

    pub async fn cancel(&self, turn_id: &str) -> bool {
        self.supervisor.cancel(turn_id).await
    }

    /// 取消所有在途轮次；之后的新轮次照常运行
    pub async fn cancel_all(&self) -> usize {
        self.supervisor.cancel_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TurnStatus;
    use crate::llm::MockLlmClient;
    use crate::react::NoopEmitter;

    fn mock_agent() -> Agent {
        let session = EngineBuilder::new(AppConfig::default())
            .with_llm(Arc::new(MockLlmClient))
            .with_emitter(Arc::new(NoopEmitter))
            .build()
            .unwrap();
        Agent::new(session)
    }

    #[tokio::test]
    async fn test_turns_run_after_cancel_all() {
        let agent = mock_agent();
        assert_eq!(agent.cancel_all().await, 0);
        let outcome = agent.run_turn("cli", "hello").await;
        assert_eq!(outcome.status(), TurnStatus::Completed);
    }

    #[tokio::test]
    async fn test_mock_llm_round_trip() {
        let agent = mock_agent();
        let outcome = agent.run_turn("cli", "hello").await;
        assert_eq!(outcome.status(), TurnStatus::Completed);
        assert_eq!(outcome.final_answer(), Some("Echo from Mock: echo: hello"));
        assert_eq!(outcome.snapshot.steps.len(), 2);
    }
}
