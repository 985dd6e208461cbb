//! 单轮状态：TurnContext 与其投影
//!
//! 步骤记录采用追加式事件日志（StepEvent），`steps()` 从日志折叠出当前的 Step 列表，
//! 因此不存在「找到最后一个匹配项再原地修改」的写法。终态（Completed / AwaitingInput / Error）
//! 一旦进入就不再改变；`snapshot()` 产出交给持久化协作方的完整记录。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::ErrorCode;
use crate::memory::IntermediateResultStore;

/// 最终回答的保留工具名（不是注册工具，而是 Action 的判别值）
pub const FINAL_ANSWER_TOOL: &str = "_answerUserTool";
/// 澄清提问的保留工具名
pub const CLARIFICATION_TOOL: &str = "_askUserTool";
/// 注册表拒绝使用的名字
pub const RESERVED_TOOL_NAMES: &[&str] = &[FINAL_ANSWER_TOOL, CLARIFICATION_TOOL];

/// 单轮状态机
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Running,
    AwaitingInput,
    Completed,
    Error,
}

impl TurnStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TurnStatus::Running)
    }
}

/// 一次尝试的动作（由事件日志投影得到）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub tool: String,
    pub args: Value,
    pub attempt: u32,
    pub result_summary: String,
    pub error: Option<String>,
    pub error_code: Option<ErrorCode>,
}

/// 步骤句柄：begin_step 返回，后续事件用它定位步骤
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepId(usize);

impl StepId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// 追加式步骤日志
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StepEvent {
    Started {
        step: StepId,
        tool: String,
        args: Value,
    },
    Retried {
        step: StepId,
        attempt: u32,
    },
    Finished {
        step: StepId,
        summary: String,
        error: Option<String>,
        error_code: Option<ErrorCode>,
    },
}

/// 本轮终止原因
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnError {
    pub code: ErrorCode,
    pub message: String,
}

impl TurnError {
    /// 以标签对应的用户可读文案构造（不带内部异常文本）
    pub fn from_code(code: ErrorCode) -> Self {
        Self {
            code,
            message: code.user_message().to_string(),
        }
    }
}

/// 交给持久化协作方的完整快照
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnSnapshot {
    pub turn_id: String,
    pub caller: String,
    pub status: TurnStatus,
    pub original_query: String,
    pub steps: Vec<Step>,
    pub final_answer: Option<String>,
    pub error: Option<TurnError>,
    pub artifacts: IntermediateResultStore,
    pub tool_error_counts: BTreeMap<String, u32>,
    pub iterations: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// 单次用户请求的可变状态，由编排循环独占
#[derive(Debug)]
pub struct TurnContext {
    turn_id: String,
    caller: String,
    original_query: String,
    log: Vec<StepEvent>,
    step_count: usize,
    artifacts: IntermediateResultStore,
    tool_error_counts: BTreeMap<String, u32>,
    final_answer: Option<String>,
    error: Option<TurnError>,
    status: TurnStatus,
    iterations: usize,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl TurnContext {
    pub fn new(
        turn_id: impl Into<String>,
        caller: impl Into<String>,
        original_query: impl Into<String>,
    ) -> Self {
        Self {
            turn_id: turn_id.into(),
            caller: caller.into(),
            original_query: original_query.into(),
            log: Vec::new(),
            step_count: 0,
            artifacts: IntermediateResultStore::new(),
            tool_error_counts: BTreeMap::new(),
            final_answer: None,
            error: None,
            status: TurnStatus::Running,
            iterations: 0,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// 复用上一轮留下的产物（如用户回答澄清问题后开启的新一轮）
    pub fn with_artifacts(mut self, artifacts: IntermediateResultStore) -> Self {
        self.artifacts = artifacts;
        self
    }

    pub fn turn_id(&self) -> &str {
        &self.turn_id
    }

    pub fn caller(&self) -> &str {
        &self.caller
    }

    pub fn original_query(&self) -> &str {
        &self.original_query
    }

    pub fn status(&self) -> TurnStatus {
        self.status
    }

    pub fn final_answer(&self) -> Option<&str> {
        self.final_answer.as_deref()
    }

    pub fn error(&self) -> Option<&TurnError> {
        self.error.as_ref()
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// 进入下一轮迭代，返回新的迭代序号（从 1 开始）
    pub fn next_iteration(&mut self) -> usize {
        self.iterations += 1;
        self.iterations
    }

    pub fn artifacts(&self) -> &IntermediateResultStore {
        &self.artifacts
    }

    pub fn artifacts_mut(&mut self) -> &mut IntermediateResultStore {
        &mut self.artifacts
    }

    pub fn events(&self) -> &[StepEvent] {
        &self.log
    }

    // ---- 步骤日志 ----

    pub fn begin_step(&mut self, tool: impl Into<String>, args: Value) -> StepId {
        let id = StepId(self.step_count);
        self.step_count += 1;
        self.log.push(StepEvent::Started {
            step: id,
            tool: tool.into(),
            args,
        });
        id
    }

    /// 记录一次重试，返回新的尝试序号
    pub fn record_retry(&mut self, step: StepId) -> u32 {
        let attempt = self.attempt_of(step) + 1;
        self.log.push(StepEvent::Retried { step, attempt });
        attempt
    }

    pub fn finish_step(
        &mut self,
        step: StepId,
        summary: impl Into<String>,
        error: Option<String>,
        error_code: Option<ErrorCode>,
    ) {
        self.log.push(StepEvent::Finished {
            step,
            summary: summary.into(),
            error,
            error_code,
        });
    }

    /// 当前尝试序号；未知步骤视为 0
    pub fn attempt_of(&self, step: StepId) -> u32 {
        self.log
            .iter()
            .filter_map(|e| match e {
                StepEvent::Started { step: s, .. } if *s == step => Some(1),
                StepEvent::Retried { step: s, attempt } if *s == step => Some(*attempt),
                _ => None,
            })
            .max()
            .unwrap_or(0)
    }

    /// 从事件日志折叠出 Step 列表
    pub fn steps(&self) -> Vec<Step> {
        let mut steps: Vec<Step> = Vec::with_capacity(self.step_count);
        for event in &self.log {
            match event {
                StepEvent::Started { tool, args, .. } => steps.push(Step {
                    tool: tool.clone(),
                    args: args.clone(),
                    attempt: 1,
                    result_summary: String::new(),
                    error: None,
                    error_code: None,
                }),
                StepEvent::Retried { step, attempt } => {
                    if let Some(s) = steps.get_mut(step.0) {
                        s.attempt = s.attempt.max(*attempt);
                    }
                }
                StepEvent::Finished {
                    step,
                    summary,
                    error,
                    error_code,
                } => {
                    if let Some(s) = steps.get_mut(step.0) {
                        s.result_summary = summary.clone();
                        s.error = error.clone();
                        s.error_code = *error_code;
                    }
                }
            }
        }
        steps
    }

    pub fn step_count(&self) -> usize {
        self.step_count
    }

    // ---- 错误计数 ----

    /// 工具失败一次，计数加一并返回新值
    pub fn bump_error_count(&mut self, tool: &str) -> u32 {
        let count = self.tool_error_counts.entry(tool.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn tool_error_count(&self, tool: &str) -> u32 {
        self.tool_error_counts.get(tool).copied().unwrap_or(0)
    }

    // ---- 状态迁移（只允许从 Running 出发） ----

    pub fn complete(&mut self, answer: impl Into<String>) -> bool {
        self.transition(TurnStatus::Completed, Some(answer.into()), None)
    }

    /// 澄清问题作为本轮的临时回答，等待用户输入（用户回复后开启新一轮）
    pub fn await_input(&mut self, question: impl Into<String>) -> bool {
        self.transition(TurnStatus::AwaitingInput, Some(question.into()), None)
    }

    pub fn fail(&mut self, error: TurnError) -> bool {
        self.transition(TurnStatus::Error, None, Some(error))
    }

    fn transition(
        &mut self,
        to: TurnStatus,
        answer: Option<String>,
        error: Option<TurnError>,
    ) -> bool {
        if self.status.is_terminal() {
            tracing::warn!(
                turn_id = %self.turn_id,
                from = ?self.status,
                to = ?to,
                "ignoring transition out of terminal state"
            );
            return false;
        }
        self.status = to;
        self.final_answer = answer;
        self.error = error;
        self.finished_at = Some(Utc::now());
        true
    }

    pub fn snapshot(&self) -> TurnSnapshot {
        TurnSnapshot {
            turn_id: self.turn_id.clone(),
            caller: self.caller.clone(),
            status: self.status,
            original_query: self.original_query.clone(),
            steps: self.steps(),
            final_answer: self.final_answer.clone(),
            error: self.error.clone(),
            artifacts: self.artifacts.clone(),
            tool_error_counts: self.tool_error_counts.clone(),
            iterations: self.iterations,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

/// 截断为至多 max_chars 个字符（按字符而非字节，避免切断 UTF-8）
pub fn truncate_summary(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{}...", head)
}
