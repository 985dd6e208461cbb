//! 错误恢复引擎
//!
//! 根据工具类型、失败标签与当前尝试次数返回 RecoveryAction，
//! 供 RetryController 决定是原样重试、重新生成代码、跳过还是终止本轮。

use crate::core::{ErrorCode, RecoveryAction};
use crate::tools::ToolKind;

/// 重试与修正预算
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 普通失败在首次之外最多再试几次
    pub max_tool_retries: u32,
    /// 代码执行动作的执行总次数上限（含首次）
    pub max_code_refinement_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_tool_retries: 1,
            max_code_refinement_attempts: 2,
        }
    }
}

/// 语义化错误恢复：将失败标签映射为可执行动作
#[derive(Debug, Default, Clone)]
pub struct RecoveryEngine {
    policy: RetryPolicy,
}

impl RecoveryEngine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// attempt 为刚刚失败的那次尝试的序号（从 1 开始）
    pub fn handle(&self, kind: ToolKind, code: ErrorCode, attempt: u32) -> RecoveryAction {
        if !code.is_retryable() {
            return RecoveryAction::Skip;
        }
        if kind == ToolKind::CodeExecution && code.is_sandbox_class() {
            return if attempt < self.policy.max_code_refinement_attempts {
                RecoveryAction::Refine
            } else {
                RecoveryAction::Abort
            };
        }
        if attempt <= self.policy.max_tool_retries {
            RecoveryAction::Retry
        } else {
            RecoveryAction::Skip
        }
    }
}
