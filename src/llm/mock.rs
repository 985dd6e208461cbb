//! Mock LLM 客户端（用于测试与无 API Key 的本地运行）
//!
//! - MockLlmClient：先对用户问题调用 echo，拿到 Observation 后以最终回答结束，便于本地跑通整轮流程。
//! - ScriptedLlmClient：按预设脚本依次返回回复，脚本耗尽后返回兜底回复或不可用错误。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;

use crate::core::FINAL_ANSWER_TOOL;
use crate::llm::{LlmClient, LlmError, TokenStream};
use crate::memory::{Message, Role};

/// Observation 消息前缀（与 prompt 组装器一致）
const OBSERVATION_PREFIX: &str = "Observation from ";

/// Mock 客户端：echo 一次，再回答
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        if let Some(observation) = last_user.strip_prefix(OBSERVATION_PREFIX) {
            let answer = serde_json::json!({
                "tool": FINAL_ANSWER_TOOL,
                "args": { "textResponse": format!("Echo from Mock: {}", observation) }
            });
            return Ok(answer.to_string());
        }
        let call = serde_json::json!({
            "tool": "echo",
            "args": { "text": last_user }
        });
        Ok(call.to_string())
    }
}

/// 脚本客户端：测试中精确控制每一轮 LLM 的输出
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    responses: Mutex<VecDeque<Result<String, LlmError>>>,
    fallback: Option<String>,
    chunk_chars: usize,
    calls: AtomicUsize,
    seen: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(|s| Ok(s.into())).collect()),
            chunk_chars: 8,
            ..Default::default()
        }
    }

    /// 脚本耗尽后一直返回该回复（用于模拟「永远不给最终回答」的 LLM）
    pub fn repeating(response: impl Into<String>) -> Self {
        Self {
            fallback: Some(response.into()),
            chunk_chars: 8,
            ..Default::default()
        }
    }

    /// 在脚本末尾追加一次失败
    pub fn then_fail(self, error: LlmError) -> Self {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(Err(error));
        }
        self
    }

    /// 流式输出时每段字符数
    pub fn with_chunk_chars(mut self, chunk_chars: usize) -> Self {
        self.chunk_chars = chunk_chars.max(1);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 每次调用收到的完整消息列表
    pub fn seen_messages(&self) -> Vec<Vec<Message>> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn next_response(&self) -> Result<String, LlmError> {
        let next = self.responses.lock().ok().and_then(|mut q| q.pop_front());
        match next {
            Some(r) => r,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| LlmError::Unavailable("script exhausted".to_string())),
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(messages.to_vec());
        }
        self.next_response()
    }

    async fn complete_stream(&self, messages: &[Message]) -> Result<TokenStream, LlmError> {
        let content = self.complete(messages).await?;
        let chars: Vec<char> = content.chars().collect();
        let chunks: Vec<Result<String, LlmError>> = chars
            .chunks(self.chunk_chars.max(1))
            .map(|c| Ok(c.iter().collect()))
            .collect();
        Ok(Box::pin(stream::iter(chunks)))
    }
}
