//! 错误标签与 Agent 错误类型
//!
//! ErrorCode 是跨组件传递的错误「标签」（写入 Step / ToolResult / 事件），不是异常类型；
//! AgentError 是库内部 Result 的错误类型；RecoveryAction 由 RecoveryEngine 根据标签给出。

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::LlmError;

/// 错误标签（序列化为 SCREAMING_SNAKE_CASE，如 `UNKNOWN_TOOL`）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// 工具名未注册，永不重试
    UnknownTool,
    /// 工具处理函数 panic，在分发边界被捕获
    ToolWrapperError,
    /// 参数不符合工具 schema，永不重试
    ValidationError,
    /// 普通工具超时
    ToolTimeout,
    CodeExecutionTimeout,
    CodeExecutionFailed,
    CodeExecutionNoResult,
    CodeGenerationInvalid,
    MaxIterationsReached,
    /// LLM 不可用（网络、鉴权、限流等）
    OracleUnavailable,
    Cancelled,
    /// 循环本身出现未捕获的 panic
    AgentRunnerError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::UnknownTool => "UNKNOWN_TOOL",
            ErrorCode::ToolWrapperError => "TOOL_WRAPPER_ERROR",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::ToolTimeout => "TOOL_TIMEOUT",
            ErrorCode::CodeExecutionTimeout => "CODE_EXECUTION_TIMEOUT",
            ErrorCode::CodeExecutionFailed => "CODE_EXECUTION_FAILED",
            ErrorCode::CodeExecutionNoResult => "CODE_EXECUTION_NO_RESULT",
            ErrorCode::CodeGenerationInvalid => "CODE_GENERATION_INVALID",
            ErrorCode::MaxIterationsReached => "MAX_ITERATIONS_REACHED",
            ErrorCode::OracleUnavailable => "ORACLE_UNAVAILABLE",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::AgentRunnerError => "AGENT_RUNNER_ERROR",
        }
    }

    /// 沙箱类错误：代码执行动作遇到这些错误时进入「重新生成代码」的修正循环
    pub fn is_sandbox_class(&self) -> bool {
        matches!(
            self,
            ErrorCode::CodeExecutionTimeout
                | ErrorCode::CodeExecutionFailed
                | ErrorCode::CodeExecutionNoResult
                | ErrorCode::CodeGenerationInvalid
        )
    }

    /// 是否允许以相同参数重试
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ErrorCode::UnknownTool
                | ErrorCode::ValidationError
                | ErrorCode::MaxIterationsReached
                | ErrorCode::Cancelled
                | ErrorCode::AgentRunnerError
        )
    }

    /// 面向最终用户的简短说明（不包含内部异常文本）
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorCode::UnknownTool => "The assistant tried to use a tool that does not exist.",
            ErrorCode::ToolWrapperError => "A tool failed unexpectedly.",
            ErrorCode::ValidationError => "A tool was called with invalid arguments.",
            ErrorCode::ToolTimeout => "A tool took too long to respond.",
            ErrorCode::CodeExecutionTimeout => "The analysis code took too long to run.",
            ErrorCode::CodeExecutionFailed => "The analysis code could not be run successfully.",
            ErrorCode::CodeExecutionNoResult => "The analysis code did not produce a result.",
            ErrorCode::CodeGenerationInvalid => "Valid analysis code could not be generated.",
            ErrorCode::MaxIterationsReached => {
                "I could not complete this request within the allowed number of steps."
            }
            ErrorCode::OracleUnavailable => "The reasoning service is currently unavailable.",
            ErrorCode::Cancelled => "The request was cancelled.",
            ErrorCode::AgentRunnerError => "An internal error stopped this request.",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 库内部错误（LLM、取消、配置、注册、持久化）
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    Config(String),

    /// 工具注册被拒绝（保留名、重名、空名）
    #[error("Tool registration rejected: {0}")]
    Registration(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AgentError {
    /// 映射到写入 TurnContext 的错误标签
    pub fn code(&self) -> ErrorCode {
        match self {
            AgentError::Llm(_) => ErrorCode::OracleUnavailable,
            AgentError::Cancelled => ErrorCode::Cancelled,
            _ => ErrorCode::AgentRunnerError,
        }
    }
}

/// 恢复引擎根据失败标签给出的建议动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 以相同参数再试一次
    Retry,
    /// 重新生成代码后再执行（仅代码执行类工具）
    Refine,
    /// 放弃本次调用，记录错误后交还给循环（非致命）
    Skip,
    /// 修正预算耗尽：本轮终止
    Abort,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_serializes_as_tag() {
        let s = serde_json::to_string(&ErrorCode::CodeExecutionNoResult).unwrap();
        assert_eq!(s, "\"CODE_EXECUTION_NO_RESULT\"");
        let back: ErrorCode = serde_json::from_str("\"UNKNOWN_TOOL\"").unwrap();
        assert_eq!(back, ErrorCode::UnknownTool);
        assert_eq!(ErrorCode::MaxIterationsReached.to_string(), "MAX_ITERATIONS_REACHED");
    }

    #[test]
    fn test_sandbox_class() {
        assert!(ErrorCode::CodeExecutionTimeout.is_sandbox_class());
        assert!(ErrorCode::CodeGenerationInvalid.is_sandbox_class());
        assert!(!ErrorCode::ToolWrapperError.is_sandbox_class());
        assert!(!ErrorCode::UnknownTool.is_sandbox_class());
    }

    #[test]
    fn test_non_retryable_tags() {
        assert!(!ErrorCode::UnknownTool.is_retryable());
        assert!(!ErrorCode::ValidationError.is_retryable());
        assert!(ErrorCode::ToolWrapperError.is_retryable());
        assert!(ErrorCode::ToolTimeout.is_retryable());
    }

    #[test]
    fn test_agent_error_code() {
        let err = AgentError::Llm(LlmError::Timeout);
        assert_eq!(err.code(), ErrorCode::OracleUnavailable);
        assert_eq!(AgentError::Cancelled.code(), ErrorCode::Cancelled);
        assert_eq!(
            AgentError::Config("bad".into()).code(),
            ErrorCode::AgentRunnerError
        );
    }
}
