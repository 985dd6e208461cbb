//! OpenAI 兼容后端
//!
//! base_url 可指向任意兼容端点（OpenAI、DeepSeek、本地代理）。非流式请求受 request 超时约束，
//! 流式请求在建立连接阶段受 stream 超时约束，之后逐段转发 delta.content。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use futures_util::StreamExt;

use crate::llm::{LlmClient, LlmError, TokenStream};
use crate::memory::{Message, Role};

/// 本客户端累计消耗的 token
#[derive(Debug, Default)]
pub struct TokenUsage {
    prompt: AtomicU64,
    completion: AtomicU64,
}

impl TokenUsage {
    fn record(&self, prompt: u64, completion: u64) {
        self.prompt.fetch_add(prompt, Ordering::Relaxed);
        self.completion.fetch_add(completion, Ordering::Relaxed);
    }

    /// (prompt, completion, total)
    pub fn snapshot(&self) -> (u64, u64, u64) {
        let prompt = self.prompt.load(Ordering::Relaxed);
        let completion = self.completion.load(Ordering::Relaxed);
        (prompt, completion, prompt + completion)
    }
}

pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    request_timeout: Duration,
    stream_timeout: Duration,
    usage: TokenUsage,
}

impl OpenAiClient {
    /// api_key 为 None 时读取 OPENAI_API_KEY
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let key = api_key
            .map(str::to_string)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_default();
        let mut config = OpenAIConfig::new().with_api_key(key);
        if let Some(url) = base_url {
            config = config.with_api_base(url);
        }

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            request_timeout: Duration::from_secs(60),
            stream_timeout: Duration::from_secs(120),
            usage: TokenUsage::default(),
        }
    }

    pub fn with_request_timeout(mut self, secs: u64) -> Self {
        self.request_timeout = Duration::from_secs(secs.max(1));
        self
    }

    pub fn with_stream_timeout(mut self, secs: u64) -> Self {
        self.stream_timeout = Duration::from_secs(secs.max(1));
        self
    }

    pub fn usage(&self) -> &TokenUsage {
        &self.usage
    }

    fn request(&self, messages: &[Message]) -> Result<CreateChatCompletionRequest, LlmError> {
        let api_err = |e: async_openai::error::OpenAIError| LlmError::ApiError(e.to_string());
        let mut converted = Vec::with_capacity(messages.len());
        for m in messages {
            let content = m.content.clone();
            let msg = match m.role {
                Role::System => ChatCompletionRequestSystemMessageArgs::default()
                    .content(content)
                    .build()
                    .map(ChatCompletionRequestMessage::System),
                Role::User => ChatCompletionRequestUserMessageArgs::default()
                    .content(content)
                    .build()
                    .map(ChatCompletionRequestMessage::User),
                Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(content)
                    .build()
                    .map(ChatCompletionRequestMessage::Assistant),
            };
            converted.push(msg.map_err(api_err)?);
        }
        CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(converted)
            .build()
            .map_err(api_err)
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.snapshot()
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let request = self.request(messages)?;
        let chat = self.client.chat();
        let response = match tokio::time::timeout(self.request_timeout, chat.create(request)).await {
            Err(_) => return Err(LlmError::Timeout),
            Ok(Err(e)) => return Err(LlmError::Unavailable(e.to_string())),
            Ok(Ok(response)) => response,
        };

        if let Some(usage) = &response.usage {
            self.usage
                .record(usage.prompt_tokens as u64, usage.completion_tokens as u64);
        }
        tracing::debug!(model = %self.model, choices = response.choices.len(), "chat completion");

        Ok(response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default())
    }

    async fn complete_stream(&self, messages: &[Message]) -> Result<TokenStream, LlmError> {
        let request = self.request(messages)?;
        let chat = self.client.chat();
        let stream = match tokio::time::timeout(self.stream_timeout, chat.create_stream(request)).await {
            Err(_) => return Err(LlmError::Timeout),
            Ok(Err(e)) => return Err(LlmError::Unavailable(e.to_string())),
            Ok(Ok(stream)) => stream,
        };

        let tokens = stream.filter_map(|chunk| async move {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => return Some(Err(LlmError::Stream(e.to_string()))),
            };
            let text = chunk.choices.into_iter().next()?.delta.content?;
            (!text.is_empty()).then_some(Ok(text))
        });
        Ok(Box::pin(tokens))
    }
}
