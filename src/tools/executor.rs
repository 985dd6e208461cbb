//! 工具执行器（分发器）
//!
//! 持有 ToolRegistry 与全局超时。execute(name, args, ctx, substituted) 总是返回恰好一个 ToolResult：
//! 未知工具 → UNKNOWN_TOOL；参数不合 schema → VALIDATION_ERROR；处理函数 panic → TOOL_WRAPPER_ERROR；
//! 超时 → TOOL_TIMEOUT（代码执行类为 CODE_EXECUTION_TIMEOUT）。每次调用输出结构化审计日志（JSON）。

use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use serde_json::{Map, Value};
use tokio::time::timeout;

use crate::core::ErrorCode;
use crate::tools::schema::validate_args;
use crate::tools::{ExecutionContext, Tool, ToolKind, ToolRegistry, ToolResult};

/// 工具执行器：对每次调用施加超时与 panic 隔离，并映射为统一的 ToolResult
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }

    /// 毫秒级超时（测试用）
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 执行指定工具；substituted 中的键覆盖 / 补充 LLM 给出的参数
    pub async fn execute(
        &self,
        tool_name: &str,
        args: Value,
        ctx: &ExecutionContext<'_>,
        substituted: Option<&Map<String, Value>>,
    ) -> ToolResult {
        let start = Instant::now();
        let Some(tool) = self.registry.get(tool_name) else {
            audit(tool_name, ctx, "unknown_tool", start, &args);
            return ToolResult::failure(ErrorCode::UnknownTool, "unknown tool");
        };

        let args = merge_args(args, substituted);
        if let Err(reason) = validate_args(&tool.parameters_schema(), &args) {
            audit(tool_name, ctx, "validation_error", start, &args);
            return ToolResult::failure(ErrorCode::ValidationError, reason);
        }

        let args_for_audit = args.clone();
        let guarded = AssertUnwindSafe(tool.execute(args, ctx)).catch_unwind();
        let result = match timeout(self.timeout, guarded).await {
            Ok(Ok(Ok(value))) => ToolResult::success(value),
            Ok(Ok(Err(e))) => ToolResult::failure(e.code, e.message),
            Ok(Err(panic)) => {
                tracing::error!(
                    tool = %tool_name,
                    trace_id = %ctx.trace_id,
                    panic = %panic_message(&panic),
                    "tool handler panicked"
                );
                ToolResult::failure(ErrorCode::ToolWrapperError, "tool handler failed")
            }
            Err(_) => {
                let code = match tool.kind() {
                    ToolKind::CodeExecution => ErrorCode::CodeExecutionTimeout,
                    _ => ErrorCode::ToolTimeout,
                };
                ToolResult::failure(
                    code,
                    format!("timed out after {}ms", self.timeout.as_millis()),
                )
            }
        };

        let outcome = match result.error_code() {
            None => "ok".to_string(),
            Some(code) => code.to_string(),
        };
        audit(tool_name, ctx, &outcome, start, &args_for_audit);
        result
    }

    pub fn get_tool(&self, name: &str) -> Option<std::sync::Arc<dyn Tool>> {
        self.registry.get(name)
    }

    pub fn kind_of(&self, name: &str) -> Option<ToolKind> {
        self.registry.get(name).map(|t| t.kind())
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }
}

/// 系统替换参数覆盖同名键；LLM 参数不是对象时以替换参数为准
fn merge_args(args: Value, substituted: Option<&Map<String, Value>>) -> Value {
    let Some(subs) = substituted else {
        return args;
    };
    let mut merged = match args {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => return other,
    };
    for (k, v) in subs {
        merged.insert(k.clone(), v.clone());
    }
    Value::Object(merged)
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn audit(tool_name: &str, ctx: &ExecutionContext<'_>, outcome: &str, start: Instant, args: &Value) {
    let duration_ms = start.elapsed().as_millis() as u64;
    let audit = serde_json::json!({
        "event": "tool_audit",
        "tool": tool_name,
        "trace_id": ctx.trace_id,
        "caller": ctx.caller,
        "ok": outcome == "ok",
        "outcome": outcome,
        "duration_ms": duration_ms,
        "args_preview": args_preview(args),
    });
    tracing::info!(audit = %audit.to_string(), "tool");
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::IntermediateResultStore;
    use crate::tools::{EchoTool, ToolError};
    use async_trait::async_trait;
    use serde_json::json;

    struct PanicTool;

    #[async_trait]
    impl Tool for PanicTool {
        fn name(&self) -> &str {
            "panics"
        }

        fn description(&self) -> &str {
            "always panics"
        }

        async fn execute(&self, _args: Value, _ctx: &ExecutionContext<'_>) -> Result<Value, ToolError> {
            panic!("secret internal detail");
        }
    }

    struct SlowTool(ToolKind);

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "sleeps"
        }

        fn kind(&self) -> ToolKind {
            self.0
        }

        async fn execute(&self, _args: Value, _ctx: &ExecutionContext<'_>) -> Result<Value, ToolError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Value::Null)
        }
    }

    fn executor_with(tool: impl Tool + 'static) -> ToolExecutor {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool).unwrap();
        reg.register(tool).unwrap();
        ToolExecutor::new(reg, 30)
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let exec = executor_with(PanicTool);
        let store = IntermediateResultStore::new();
        let ctx = ExecutionContext::new("u", "t", &store);
        let r = exec.execute("nope", json!({}), &ctx, None).await;
        assert_eq!(r.error_code(), Some(ErrorCode::UnknownTool));
        assert_eq!(r.error(), Some("unknown tool"));
    }

    #[tokio::test]
    async fn test_panic_becomes_wrapper_error() {
        let exec = executor_with(PanicTool);
        let store = IntermediateResultStore::new();
        let ctx = ExecutionContext::new("u", "t", &store);
        let r = exec.execute("panics", json!({}), &ctx, None).await;
        assert_eq!(r.error_code(), Some(ErrorCode::ToolWrapperError));
        assert!(!r.error().unwrap().contains("secret"));
    }

    #[tokio::test]
    async fn test_timeout_code_depends_on_kind() {
        let store = IntermediateResultStore::new();
        let ctx = ExecutionContext::new("u", "t", &store);

        let exec = executor_with(SlowTool(ToolKind::Standard)).with_timeout(Duration::from_millis(20));
        let r = exec.execute("slow", json!({}), &ctx, None).await;
        assert_eq!(r.error_code(), Some(ErrorCode::ToolTimeout));

        let exec =
            executor_with(SlowTool(ToolKind::CodeExecution)).with_timeout(Duration::from_millis(20));
        let r = exec.execute("slow", json!({}), &ctx, None).await;
        assert_eq!(r.error_code(), Some(ErrorCode::CodeExecutionTimeout));
    }

    #[tokio::test]
    async fn test_substituted_args_override() {
        let exec = executor_with(PanicTool);
        let store = IntermediateResultStore::new();
        let ctx = ExecutionContext::new("u", "t", &store);
        let mut subs = Map::new();
        subs.insert("text".to_string(), json!("from system"));
        let r = exec
            .execute("echo", json!({"text": "from llm"}), &ctx, Some(&subs))
            .await;
        assert_eq!(r.result(), Some(&json!("from system")));
    }

    #[tokio::test]
    async fn test_validation_error() {
        let exec = executor_with(PanicTool);
        let store = IntermediateResultStore::new();
        let ctx = ExecutionContext::new("u", "t", &store);
        let r = exec.execute("echo", json!({"text": 5}), &ctx, None).await;
        assert_eq!(r.error_code(), Some(ErrorCode::ValidationError));
    }

    struct Listing;

    #[async_trait]
    impl Tool for Listing {
        fn name(&self) -> &str {
            "listing"
        }

        fn description(&self) -> &str {
            "takes a list of ids"
        }

        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": {
                    "ids": { "type": "array", "items": { "type": "string" } }
                },
                "required": ["ids"]
            })
        }

        async fn execute(&self, args: Value, _ctx: &ExecutionContext<'_>) -> Result<Value, ToolError> {
            Ok(args["ids"].clone())
        }
    }

    #[tokio::test]
    async fn test_item_types_checked_before_dispatch() {
        let exec = executor_with(Listing);
        let store = IntermediateResultStore::new();
        let ctx = ExecutionContext::new("u", "t", &store);
        let r = exec.execute("listing", json!({"ids": [1]}), &ctx, None).await;
        assert_eq!(r.error_code(), Some(ErrorCode::ValidationError));
        let r = exec.execute("listing", json!({"ids": ["a"]}), &ctx, None).await;
        assert_eq!(r.result(), Some(&json!(["a"])));
    }

    #[tokio::test]
    async fn test_envelope_is_always_exactly_one() {
        let exec = executor_with(PanicTool);
        let store = IntermediateResultStore::new();
        let ctx = ExecutionContext::new("u", "t", &store);
        for (name, args) in [
            ("echo", json!({"text": "hi"})),
            ("echo", json!([1, 2])),
            ("panics", json!({})),
            ("missing", json!(null)),
        ] {
            let r = exec.execute(name, args, &ctx, None).await;
            assert!(r.result().is_some() ^ r.error().is_some());
        }
    }

    #[test]
    fn test_merge_args() {
        let mut subs = Map::new();
        subs.insert("code".into(), json!("print(1)"));
        assert_eq!(
            merge_args(json!({"a": 1}), Some(&subs)),
            json!({"a": 1, "code": "print(1)"})
        );
        assert_eq!(merge_args(Value::Null, Some(&subs)), json!({"code": "print(1)"}));
        assert_eq!(merge_args(json!({"a": 1}), None), json!({"a": 1}));
    }
}
