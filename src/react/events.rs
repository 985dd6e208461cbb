//! 编排过程事件：思考、工具调用、Token、最终回答等，供前端以流式方式展示
//!
//! 事件只是观察性的：至多一次、尽力投递，发送失败不影响本轮。
//! 传输层（SSE / WebSocket 等）在 crate 之外，这里只定义 EventEmitter 接口与几个实现。

use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::core::ErrorCode;

/// 单步过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReactEvent {
    /// 迭代计数更新
    StepUpdate { step: usize, max_steps: usize },
    /// 正在调用 LLM 思考
    ThinkingStarted,
    /// 流式输出的一段可见文本（`<think>` 内容不会出现在这里）
    Token { text: String },
    /// LLM 给出的解释片段
    Explanation { text: String },
    ToolStarted {
        name: String,
        args: Value,
        attempt: u32,
    },
    ToolFinished {
        name: String,
        summary: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_code: Option<ErrorCode>,
    },
    /// 代码执行失败，重新生成代码后再试
    Refinement { attempt: u32, reason: String },
    FinalAnswer {
        text: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        artifacts: Vec<String>,
    },
    ClarificationNeeded { question: String },
    Error { message: String, code: ErrorCode },
}

/// 带关联 ID（本轮 turn_id）的事件
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineEvent {
    pub correlation_id: String,
    #[serde(flatten)]
    pub event: ReactEvent,
}

/// 事件出口：实现方决定如何投递（通道、日志、丢弃）
pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

/// 丢弃所有事件
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEmitter;

impl EventEmitter for NoopEmitter {
    fn emit(&self, _event: EngineEvent) {}
}

/// 通过无界 mpsc 通道推送；接收端关闭后静默丢弃
#[derive(Debug, Clone)]
pub struct ChannelEmitter {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl ChannelEmitter {
    pub fn new(tx: mpsc::UnboundedSender<EngineEvent>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventEmitter for ChannelEmitter {
    fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }
}

/// 以 debug 日志输出（无前端时便于排查）
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEmitter;

impl EventEmitter for TracingEmitter {
    fn emit(&self, event: EngineEvent) {
        match serde_json::to_string(&event) {
            Ok(json) => tracing::debug!(event = %json, "engine event"),
            Err(e) => tracing::warn!(error = %e, "failed to serialize engine event"),
        }
    }
}

/// 记录全部事件，测试中用于断言事件顺序
#[derive(Debug, Default)]
pub struct RecordingEmitter {
    events: Mutex<Vec<EngineEvent>>,
}

impl RecordingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<ReactEvent> {
        self.events().into_iter().map(|e| e.event).collect()
    }
}

impl EventEmitter for RecordingEmitter {
    fn emit(&self, event: EngineEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// 为一轮绑定关联 ID 的发布器；emitter panic 被吞掉，不影响编排
#[derive(Clone)]
pub struct Publisher {
    emitter: Arc<dyn EventEmitter>,
    correlation_id: String,
}

impl Publisher {
    pub fn new(emitter: Arc<dyn EventEmitter>, correlation_id: impl Into<String>) -> Self {
        Self {
            emitter,
            correlation_id: correlation_id.into(),
        }
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn publish(&self, event: ReactEvent) {
        let event = EngineEvent {
            correlation_id: self.correlation_id.clone(),
            event,
        };
        let emitter = &self.emitter;
        if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| emitter.emit(event))).is_err() {
            tracing::warn!(correlation_id = %self.correlation_id, "event emitter panicked, event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_json_shape() {
        let ev = EngineEvent {
            correlation_id: "t-1".into(),
            event: ReactEvent::ToolFinished {
                name: "execute_code".into(),
                summary: "".into(),
                error: Some("boom".into()),
                error_code: Some(ErrorCode::CodeExecutionFailed),
            },
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["correlation_id"], "t-1");
        assert_eq!(v["type"], "tool_finished");
        assert_eq!(v["error_code"], "CODE_EXECUTION_FAILED");

        let v = serde_json::to_value(EngineEvent {
            correlation_id: "t-1".into(),
            event: ReactEvent::ThinkingStarted,
        })
        .unwrap();
        assert_eq!(v, json!({"correlation_id": "t-1", "type": "thinking_started"}));
    }

    #[tokio::test]
    async fn test_channel_emitter_survives_closed_receiver() {
        let (emitter, mut rx) = ChannelEmitter::channel();
        let publisher = Publisher::new(Arc::new(emitter), "t");
        publisher.publish(ReactEvent::ThinkingStarted);
        assert_eq!(rx.recv().await.unwrap().event, ReactEvent::ThinkingStarted);
        drop(rx);
        publisher.publish(ReactEvent::ThinkingStarted);
    }

    struct PanickyEmitter;

    impl EventEmitter for PanickyEmitter {
        fn emit(&self, _event: EngineEvent) {
            panic!("transport down");
        }
    }

    #[test]
    fn test_publisher_swallows_emitter_panic() {
        let publisher = Publisher::new(Arc::new(PanickyEmitter), "t");
        publisher.publish(ReactEvent::ThinkingStarted);
    }
}
