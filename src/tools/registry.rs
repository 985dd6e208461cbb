//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / execute），由 ToolRegistry 按名注册与查找。
//! 注册表是显式构造、注入给引擎的实例；保留名（最终回答 / 澄清）与重名在注册时即被拒绝。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::core::{AgentError, ErrorCode, RESERVED_TOOL_NAMES};
use crate::memory::IntermediateResultStore;

/// 工具类别：决定失败时的恢复策略
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Standard,
    /// 生成代码（修正循环中被再次调用）
    CodeGeneration,
    /// 执行代码（失败时走修正循环）
    CodeExecution,
}

/// 工具处理函数返回的失败
#[derive(Debug, Clone, PartialEq)]
pub struct ToolError {
    pub code: ErrorCode,
    pub message: String,
}

impl ToolError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }
}

/// 执行上下文：调用方身份、追踪 ID、对中间结果存储的只读访问
#[derive(Debug, Clone, Copy)]
pub struct ExecutionContext<'a> {
    pub caller: &'a str,
    pub trace_id: &'a str,
    pub artifacts: &'a IntermediateResultStore,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(
        caller: &'a str,
        trace_id: &'a str,
        artifacts: &'a IntermediateResultStore,
    ) -> Self {
        Self {
            caller,
            trace_id,
            artifacts,
        }
    }

    pub fn artifact(&self, key: &str) -> Option<&'a Value> {
        self.artifacts.get(key)
    }

    /// 取之前已解析过的数据集
    pub fn dataset(&self, dataset_id: &str) -> Option<&'a Value> {
        self.artifacts.dataset(dataset_id)
    }

    pub fn generated_code(&self) -> Option<&'a str> {
        self.artifacts.generated_code()
    }
}

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、类别、产物键、异步执行
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（用于 JSON 中的 "tool" 字段）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema；分发前按 required / type 校验
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Standard
    }

    /// 成功结果写入中间结果存储时使用的键；None 表示不缓存
    fn artifact_key(&self, _args: &Value) -> Option<String> {
        None
    }

    /// 执行工具
    async fn execute(&self, args: Value, ctx: &ExecutionContext<'_>) -> Result<Value, ToolError>;
}

/// 工具注册表：按名称存储 Arc<dyn Tool>
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), AgentError> {
        self.register_arc(Arc::new(tool))
    }

    /// 保留名与最终回答判别值冲突属于配置错误，直接拒绝
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<(), AgentError> {
        let name = tool.name().trim().to_string();
        if name.is_empty() {
            return Err(AgentError::Registration("tool name is empty".to_string()));
        }
        if RESERVED_TOOL_NAMES.contains(&name.as_str()) {
            return Err(AgentError::Registration(format!(
                "'{}' is a reserved action name",
                name
            )));
        }
        if self.tools.contains_key(&name) {
            return Err(AgentError::Registration(format!(
                "tool '{}' is already registered",
                name
            )));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// 按类别查找（修正循环用它找到代码生成工具）
    pub fn find_by_kind(&self, kind: ToolKind) -> Option<Arc<dyn Tool>> {
        let mut matches: Vec<&Arc<dyn Tool>> =
            self.tools.values().filter(|t| t.kind() == kind).collect();
        matches.sort_by(|a, b| a.name().cmp(b.name()));
        matches.first().map(|t| Arc::clone(t))
    }

    /// 排序后的工具名，保证 prompt 稳定
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 动态生成工具 schema JSON（名称、描述、参数），拼入 system prompt
    pub fn to_schema_json(&self) -> String {
        let tools: Vec<Value> = self
            .tool_names()
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| {
                serde_json::json!({
                    "name": tool.name(),
                    "description": tool.description(),
                    "parameters": tool.parameters_schema()
                })
            })
            .collect();
        serde_json::to_string_pretty(&tools).unwrap_or_else(|_| "[]".to_string())
    }
}
