//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient：complete（非流式）、complete_stream（流式 Token）。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{stream, Stream};
use thiserror::Error;

use crate::memory::Message;

/// LLM 调用失败的原因
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("LLM unavailable: {0}")]
    Unavailable(String),

    #[error("LLM request timed out")]
    Timeout,

    #[error("LLM API error: {0}")]
    ApiError(String),

    #[error("LLM stream error: {0}")]
    Stream(String),
}

/// 流式输出：逐段 Token
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// LLM 客户端 trait：非流式完成与流式完成（返回 Token 流）
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 流式完成；默认实现把完整回复作为单个 Token 返回
    async fn complete_stream(&self, messages: &[Message]) -> Result<TokenStream, LlmError> {
        let content = self.complete(messages).await?;
        Ok(Box::pin(stream::iter(vec![Ok(content)])))
    }

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
