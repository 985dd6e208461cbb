//! 编排主循环
//!
//! 每轮迭代：检查取消与迭代上限 → 组装上下文并询问 Planner → 按 Action 分支：
//! FinalAnswer 提交并结束（Completed），ClarificationRequest 以问题作为临时回答结束（AwaitingInput），
//! ToolCall 记录步骤、经 RetryController 执行、推送 tool_finished 后继续；致命结果置为 Error。
//!
//! 循环体整体包在 catch_unwind 中，任何 panic 都变成 AGENT_RUNNER_ERROR；
//! 无论怎样结束，快照恰好交给 TurnStore 一次。

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::core::{
    truncate_summary, ErrorCode, RecoveryEngine, TurnContext, TurnError, TurnSnapshot, TurnStatus,
    CLARIFICATION_TOOL, FINAL_ANSWER_TOOL,
};
use crate::memory::{InMemoryTurnStore, IntermediateResultStore, TurnStore};
use crate::react::controller::RetryController;
use crate::react::events::{EventEmitter, NoopEmitter, Publisher, ReactEvent};
use crate::react::parser::{Action, ResponseParser};
use crate::react::planner::Planner;
use crate::tools::ToolExecutor;

/// 单轮内最大迭代次数默认值
pub const DEFAULT_MAX_ITERATIONS: usize = 12;
/// Step.resultSummary 默认最大字符数
pub const DEFAULT_SUMMARY_CHARS: usize = 240;

/// 一次用户请求
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub turn_id: String,
    pub caller: String,
    pub query: String,
    /// 上一轮留下的产物（例如回答澄清问题后开启的新一轮）
    pub prior_artifacts: Option<IntermediateResultStore>,
}

impl TurnRequest {
    pub fn new(caller: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            turn_id: uuid::Uuid::new_v4().to_string(),
            caller: caller.into(),
            query: query.into(),
            prior_artifacts: None,
        }
    }

    pub fn with_turn_id(mut self, turn_id: impl Into<String>) -> Self {
        self.turn_id = turn_id.into();
        self
    }

    pub fn with_artifacts(mut self, artifacts: IntermediateResultStore) -> Self {
        self.prior_artifacts = Some(artifacts);
        self
    }
}

/// 一轮结束后的结果
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub snapshot: TurnSnapshot,
    /// 快照是否成功交给 TurnStore
    pub persisted: bool,
}

impl TurnOutcome {
    pub fn turn_id(&self) -> &str {
        &self.snapshot.turn_id
    }

    pub fn status(&self) -> TurnStatus {
        self.snapshot.status
    }

    pub fn final_answer(&self) -> Option<&str> {
        self.snapshot.final_answer.as_deref()
    }

    pub fn error(&self) -> Option<&TurnError> {
        self.snapshot.error.as_ref()
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.snapshot.error.as_ref().map(|e| e.code)
    }
}

/// 编排会话配置：各轮共享的只读部件
#[derive(Clone)]
pub struct ReactSession {
    pub planner: Arc<Planner>,
    pub executor: Arc<ToolExecutor>,
    pub recovery: RecoveryEngine,
    pub parser: ResponseParser,
    pub store: Arc<dyn TurnStore>,
    pub emitter: Arc<dyn EventEmitter>,
    pub max_iterations: usize,
    pub summary_chars: usize,
}

impl ReactSession {
    /// 最小配置：内存持久化、丢弃事件、默认预算
    pub fn new(planner: Arc<Planner>, executor: Arc<ToolExecutor>) -> Self {
        Self {
            planner,
            executor,
            recovery: RecoveryEngine::default(),
            parser: ResponseParser::default(),
            store: Arc::new(InMemoryTurnStore::new()),
            emitter: Arc::new(NoopEmitter),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            summary_chars: DEFAULT_SUMMARY_CHARS,
        }
    }

    pub fn with_recovery(mut self, recovery: RecoveryEngine) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn with_parser(mut self, parser: ResponseParser) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn TurnStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn EventEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_summary_chars(mut self, summary_chars: usize) -> Self {
        self.summary_chars = summary_chars.max(1);
        self
    }
}

/// 执行一轮编排，总会返回（不会 panic，也不会无限循环）
pub async fn react_loop(
    session: &ReactSession,
    request: TurnRequest,
    cancel: CancellationToken,
) -> TurnOutcome {
    let publisher = Publisher::new(session.emitter.clone(), request.turn_id.clone());
    let mut ctx = TurnContext::new(request.turn_id, request.caller, request.query)
        .with_artifacts(request.prior_artifacts.unwrap_or_default());
    tracing::info!(turn_id = %ctx.turn_id(), caller = %ctx.caller(), "turn started");

    let driven = AssertUnwindSafe(drive(session, &mut ctx, &publisher, &cancel))
        .catch_unwind()
        .await;
    if driven.is_err() {
        tracing::error!(turn_id = %ctx.turn_id(), "orchestration loop panicked");
        fail_turn(&mut ctx, &publisher, TurnError::from_code(ErrorCode::AgentRunnerError));
    }
    if ctx.status() == TurnStatus::Running {
        tracing::error!(turn_id = %ctx.turn_id(), "loop exited without a terminal state");
        fail_turn(&mut ctx, &publisher, TurnError::from_code(ErrorCode::AgentRunnerError));
    }

    let snapshot = ctx.snapshot();
    let persisted = match session.store.save(&snapshot).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(turn_id = %snapshot.turn_id, error = %e, "failed to persist turn snapshot");
            false
        }
    };
    tracing::info!(
        turn_id = %snapshot.turn_id,
        status = ?snapshot.status,
        iterations = snapshot.iterations,
        steps = snapshot.steps.len(),
        "turn finished"
    );
    TurnOutcome {
        snapshot,
        persisted,
    }
}

async fn drive(
    session: &ReactSession,
    ctx: &mut TurnContext,
    publisher: &Publisher,
    cancel: &CancellationToken,
) {
    let known_tools = session.executor.tool_names();
    let catalog = session.executor.registry().to_schema_json();
    let controller = RetryController::new(
        session.executor.as_ref(),
        &session.recovery,
        session.summary_chars,
    );

    loop {
        if cancel.is_cancelled() {
            fail_turn(ctx, publisher, TurnError::from_code(ErrorCode::Cancelled));
            return;
        }
        if ctx.iterations() >= session.max_iterations {
            tracing::warn!(
                turn_id = %ctx.turn_id(),
                max_iterations = session.max_iterations,
                "max iterations reached"
            );
            fail_turn(ctx, publisher, TurnError::from_code(ErrorCode::MaxIterationsReached));
            return;
        }
        let iteration = ctx.next_iteration();
        publisher.publish(ReactEvent::StepUpdate {
            step: iteration,
            max_steps: session.max_iterations,
        });

        let parsed = match session
            .planner
            .next_action(ctx, &catalog, &session.parser, &known_tools, publisher, cancel)
            .await
        {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(turn_id = %ctx.turn_id(), error = %e, "planner failed");
                fail_turn(ctx, publisher, TurnError::from_code(e.code()));
                return;
            }
        };

        match parsed.action {
            Action::FinalAnswer { text } => {
                let step = ctx.begin_step(FINAL_ANSWER_TOOL, json!({ "textResponse": text }));
                ctx.finish_step(step, truncate_summary(&text, session.summary_chars), None, None);
                ctx.complete(text.clone());
                publisher.publish(ReactEvent::FinalAnswer {
                    text,
                    artifacts: ctx.artifacts().keys(),
                });
                return;
            }
            Action::ClarificationRequest { question } => {
                let step = ctx.begin_step(CLARIFICATION_TOOL, json!({ "question": question }));
                ctx.finish_step(step, truncate_summary(&question, session.summary_chars), None, None);
                ctx.await_input(question.clone());
                publisher.publish(ReactEvent::ClarificationNeeded { question });
                return;
            }
            Action::ToolCall { name, args } => {
                let step = ctx.begin_step(name.clone(), args.clone());
                publisher.publish(ReactEvent::ToolStarted {
                    name: name.clone(),
                    args: args.clone(),
                    attempt: 1,
                });

                let outcome = controller
                    .run(ctx, step, &name, &args, publisher, cancel)
                    .await;
                let summary = outcome.result.summary(session.summary_chars);
                let error = outcome.result.error().map(str::to_string);
                let error_code = outcome.result.error_code();
                ctx.finish_step(step, summary.clone(), error.clone(), error_code);
                publisher.publish(ReactEvent::ToolFinished {
                    name,
                    summary,
                    error,
                    error_code,
                });

                if let Some(fatal) = outcome.fatal {
                    fail_turn(ctx, publisher, fatal);
                    return;
                }
            }
        }
    }
}

fn fail_turn(ctx: &mut TurnContext, publisher: &Publisher, error: TurnError) {
    let (message, code) = (error.message.clone(), error.code);
    if ctx.fail(error) {
        tracing::warn!(turn_id = %ctx.turn_id(), error_code = %code, "turn failed");
        publisher.publish(ReactEvent::Error { message, code });
    }
}
