//! Planner：组装上下文、调用 LLM、解析出下一步 Action
//!
//! LLM 调用是本轮主要的挂起点，与取消令牌一起 select，取消即返回 AgentError::Cancelled。
//! 流式模式下 Token 作为旁路推送给事件出口（过滤掉 `<think>` 内容），只有累积的完整文本参与解析。

use std::sync::Arc;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, TurnContext};
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::react::events::{Publisher, ReactEvent};
use crate::react::parser::{ParsedResponse, ResponseParser};
use crate::react::prompt::build_messages;

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

/// Planner：持有 LLM 与 system prompt
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
    streaming: bool,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, system_prompt: impl Into<String>) -> Self {
        Self {
            llm,
            system_prompt: system_prompt.into(),
            streaming: false,
        }
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn base_system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// 获取 LLM 累计 token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    /// 询问下一步动作
    pub async fn next_action(
        &self,
        ctx: &TurnContext,
        tool_catalog: &str,
        parser: &ResponseParser,
        known_tools: &[String],
        publisher: &Publisher,
        cancel: &CancellationToken,
    ) -> Result<ParsedResponse, AgentError> {
        publisher.publish(ReactEvent::ThinkingStarted);
        let messages = build_messages(&self.system_prompt, tool_catalog, ctx);

        let raw = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            r = self.invoke(&messages, publisher) => r?,
        };

        let parsed = parser.parse_response(&raw, known_tools);
        if let Some(reasoning) = &parsed.reasoning {
            tracing::debug!(turn_id = %ctx.turn_id(), reasoning = %reasoning, "llm reasoning");
        }
        if let Some(explanation) = &parsed.explanation {
            publisher.publish(ReactEvent::Explanation {
                text: explanation.clone(),
            });
        }
        if parsed.fallback {
            tracing::debug!(turn_id = %ctx.turn_id(), "no structured payload, treating reply as answer");
        }
        Ok(parsed)
    }

    async fn invoke(&self, messages: &[Message], publisher: &Publisher) -> Result<String, AgentError> {
        if !self.streaming {
            return Ok(self.llm.complete(messages).await?);
        }

        let mut stream = self.llm.complete_stream(messages).await?;
        let mut accumulated = String::new();
        let mut filter = ThinkFilter::default();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            accumulated.push_str(&chunk);
            let visible = filter.push(&chunk);
            if !visible.is_empty() {
                publisher.publish(ReactEvent::Token { text: visible });
            }
        }
        let tail = filter.finish();
        if !tail.is_empty() {
            publisher.publish(ReactEvent::Token { text: tail });
        }
        Ok(accumulated)
    }
}

/// 流式过滤 `<think>…</think>`；标签可能被切分在相邻的两段中
#[derive(Debug, Default)]
pub(crate) struct ThinkFilter {
    in_think: bool,
    pending: String,
}

impl ThinkFilter {
    /// 追加一段输出，返回可以立即展示的文本
    pub(crate) fn push(&mut self, chunk: &str) -> String {
        self.pending.push_str(chunk);
        let mut visible = String::new();
        loop {
            if self.in_think {
                match self.pending.find(THINK_CLOSE) {
                    Some(end) => {
                        self.pending.drain(..end + THINK_CLOSE.len());
                        self.in_think = false;
                    }
                    None => {
                        let keep = partial_suffix(&self.pending, THINK_CLOSE);
                        let cut = self.pending.len() - keep;
                        self.pending.drain(..cut);
                        break;
                    }
                }
            } else {
                match self.pending.find(THINK_OPEN) {
                    Some(start) => {
                        visible.push_str(&self.pending[..start]);
                        self.pending.drain(..start + THINK_OPEN.len());
                        self.in_think = true;
                    }
                    None => {
                        let keep = partial_suffix(&self.pending, THINK_OPEN);
                        let cut = self.pending.len() - keep;
                        visible.push_str(&self.pending[..cut]);
                        self.pending.drain(..cut);
                        break;
                    }
                }
            }
        }
        visible
    }

    /// 流结束：吐出残留的非思考文本
    pub(crate) fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        if self.in_think {
            String::new()
        } else {
            rest
        }
    }
}

/// text 末尾与 tag 前缀重合的最长字节数（tag 为 ASCII，切分点必在字符边界上）
fn partial_suffix(text: &str, tag: &str) -> usize {
    (1..tag.len())
        .rev()
        .find(|&k| text.ends_with(&tag[..k]))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;
    use crate::react::events::RecordingEmitter;
    use crate::react::parser::Action;

    #[test]
    fn test_think_filter_across_chunks() {
        let mut f = ThinkFilter::default();
        let mut out = String::new();
        for chunk in ["Hel", "lo <th", "ink>secret", " stuff</thi", "nk> world", " <"] {
            out.push_str(&f.push(chunk));
        }
        out.push_str(&f.finish());
        assert_eq!(out, "Hello  world <");
    }

    #[test]
    fn test_partial_suffix() {
        assert_eq!(partial_suffix("abc<thi", THINK_OPEN), 4);
        assert_eq!(partial_suffix("abc", THINK_OPEN), 0);
        assert_eq!(partial_suffix("数据<", THINK_OPEN), 1);
    }

    #[tokio::test]
    async fn test_streaming_publishes_visible_tokens_only() {
        let llm = Arc::new(
            ScriptedLlmClient::new([
                "<think>hidden</think>{\"tool\": \"_answerUserTool\", \"args\": {\"textResponse\": \"42\"}}",
            ])
            .with_chunk_chars(5),
        );
        let planner = Planner::new(llm, "base").with_streaming(true);
        let recorder = Arc::new(RecordingEmitter::new());
        let publisher = Publisher::new(recorder.clone(), "t");
        let ctx = TurnContext::new("t", "u", "q");

        let parsed = planner
            .next_action(
                &ctx,
                "[]",
                &ResponseParser::default(),
                &[],
                &publisher,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(parsed.action, Action::FinalAnswer { text: "42".into() });

        let streamed: String = recorder
            .kinds()
            .into_iter()
            .filter_map(|e| match e {
                ReactEvent::Token { text } => Some(text),
                _ => None,
            })
            .collect();
        assert!(!streamed.contains("hidden"));
        assert!(streamed.contains("textResponse"));
    }

    #[tokio::test]
    async fn test_cancelled_before_reply() {
        let llm = Arc::new(ScriptedLlmClient::repeating("x"));
        let planner = Planner::new(llm, "base");
        let publisher = Publisher::new(Arc::new(RecordingEmitter::new()), "t");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = planner
            .next_action(
                &TurnContext::new("t", "u", "q"),
                "[]",
                &ResponseParser::default(),
                &[],
                &publisher,
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
    }
}
