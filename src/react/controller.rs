//! 重试与修正控制器
//!
//! 包在一次工具调用外面：
//! - 普通失败按 RecoveryEngine 原样重试（参数不变），每次尝试推进步骤的 attempt 与该工具的错误计数；
//! - 代码执行类工具遇到沙箱类失败时，带着上一次的错误重新调用代码生成工具，再用新代码执行；
//! - 修正预算耗尽或重新生成失败时返回 fatal，由主循环把本轮置为 Error。
//!
//! 只有明确成功的结果才写入中间结果存储。

use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use crate::core::{
    ErrorCode, RecoveryAction, RecoveryEngine, StepId, TurnContext, TurnError,
};
use crate::memory::GENERATED_CODE_KEY;
use crate::react::events::{Publisher, ReactEvent};
use crate::tools::{ExecutionContext, ToolExecutor, ToolKind, ToolResult};

/// 一次（可能多次尝试的）工具调用的结果
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// 最后一次尝试的结果
    pub result: ToolResult,
    /// 本轮必须终止时的原因
    pub fatal: Option<TurnError>,
    pub attempts: u32,
}

pub struct RetryController<'a> {
    executor: &'a ToolExecutor,
    recovery: &'a RecoveryEngine,
    summary_chars: usize,
}

impl<'a> RetryController<'a> {
    pub fn new(executor: &'a ToolExecutor, recovery: &'a RecoveryEngine, summary_chars: usize) -> Self {
        Self {
            executor,
            recovery,
            summary_chars,
        }
    }

    /// 执行 step 对应的工具调用；step 由调用方 begin，也由调用方 finish
    pub async fn run(
        &self,
        ctx: &mut TurnContext,
        step: StepId,
        name: &str,
        args: &Value,
        publisher: &Publisher,
        cancel: &CancellationToken,
    ) -> ExecutionOutcome {
        let kind = self.executor.kind_of(name).unwrap_or(ToolKind::Standard);
        let mut attempt = ctx.attempt_of(step).max(1);

        loop {
            let result = self.dispatch(ctx, name, args.clone(), kind, cancel).await;
            if let Some(value) = result.result() {
                self.store_artifact(ctx, name, args, value);
                return ExecutionOutcome {
                    result,
                    fatal: None,
                    attempts: attempt,
                };
            }

            let code = result.error_code().unwrap_or(ErrorCode::ToolWrapperError);
            if code == ErrorCode::Cancelled {
                return ExecutionOutcome {
                    result,
                    fatal: Some(TurnError::from_code(ErrorCode::Cancelled)),
                    attempts: attempt,
                };
            }

            let errors = ctx.bump_error_count(name);
            tracing::warn!(
                turn_id = %ctx.turn_id(),
                tool = %name,
                attempt,
                errors,
                error_code = %code,
                "tool attempt failed"
            );

            match self.recovery.handle(kind, code, attempt) {
                RecoveryAction::Retry => {
                    attempt = ctx.record_retry(step);
                    publisher.publish(ReactEvent::ToolStarted {
                        name: name.to_string(),
                        args: args.clone(),
                        attempt,
                    });
                }
                RecoveryAction::Refine => {
                    let regenerated = self
                        .regenerate(ctx, args, &result, attempt, publisher, cancel)
                        .await;
                    if let Err(fatal) = regenerated {
                        return ExecutionOutcome {
                            result,
                            fatal: Some(fatal),
                            attempts: attempt,
                        };
                    }
                    attempt = ctx.record_retry(step);
                    publisher.publish(ReactEvent::ToolStarted {
                        name: name.to_string(),
                        args: args.clone(),
                        attempt,
                    });
                }
                RecoveryAction::Skip => {
                    return ExecutionOutcome {
                        result,
                        fatal: None,
                        attempts: attempt,
                    };
                }
                RecoveryAction::Abort => {
                    tracing::error!(
                        turn_id = %ctx.turn_id(),
                        tool = %name,
                        attempts = attempt,
                        error_code = %code,
                        "code refinement budget exhausted"
                    );
                    return ExecutionOutcome {
                        result,
                        fatal: Some(TurnError::from_code(code)),
                        attempts: attempt,
                    };
                }
            }
        }
    }

    /// 单次分发；代码执行类工具的 code 参数由最近生成的代码替换。可被取消。
    async fn dispatch(
        &self,
        ctx: &TurnContext,
        name: &str,
        args: Value,
        kind: ToolKind,
        cancel: &CancellationToken,
    ) -> ToolResult {
        let substituted = if kind == ToolKind::CodeExecution {
            ctx.artifacts().generated_code().map(|code| {
                let mut subs = Map::new();
                subs.insert("code".to_string(), Value::String(code.to_string()));
                subs
            })
        } else {
            None
        };
        let exec_ctx = ExecutionContext::new(ctx.caller(), ctx.turn_id(), ctx.artifacts());

        tokio::select! {
            biased;
            _ = cancel.cancelled() => ToolResult::failure(ErrorCode::Cancelled, "cancelled"),
            r = self.executor.execute(name, args, &exec_ctx, substituted.as_ref()) => r,
        }
    }

    fn store_artifact(&self, ctx: &mut TurnContext, name: &str, args: &Value, value: &Value) {
        let Some(key) = self
            .executor
            .get_tool(name)
            .and_then(|tool| tool.artifact_key(args))
        else {
            return;
        };
        if ctx.artifacts_mut().put(key.clone(), value.clone()).is_some() {
            tracing::debug!(turn_id = %ctx.turn_id(), key = %key, "artifact overwritten");
        }
    }

    /// 重新生成代码；记录为独立的一步。失败即本轮终止。
    async fn regenerate(
        &self,
        ctx: &mut TurnContext,
        exec_args: &Value,
        failure: &ToolResult,
        attempt: u32,
        publisher: &Publisher,
        cancel: &CancellationToken,
    ) -> Result<(), TurnError> {
        let failed_code = failure.error_code().unwrap_or(ErrorCode::CodeExecutionFailed);
        let Some(generator) = self
            .executor
            .registry()
            .find_by_kind(ToolKind::CodeGeneration)
        else {
            tracing::warn!(turn_id = %ctx.turn_id(), "no code generation tool registered, cannot refine");
            return Err(TurnError::from_code(failed_code));
        };

        publisher.publish(ReactEvent::Refinement {
            attempt,
            reason: failure.summary(self.summary_chars),
        });

        let goal = ctx
            .artifacts()
            .get(GENERATED_CODE_KEY)
            .and_then(|a| a.get("goal"))
            .and_then(|g| g.as_str())
            .unwrap_or(ctx.original_query())
            .to_string();
        let mut gen_args = json!({
            "goal": goal,
            "error": failure.error().unwrap_or(""),
        });
        let previous = ctx
            .artifacts()
            .generated_code()
            .or_else(|| exec_args.get("code").and_then(|c| c.as_str()))
            .map(str::to_string);
        if let Some(previous) = previous {
            gen_args["previous_code"] = Value::String(previous);
        }
        if let Some(ids) = exec_args.get("dataset_ids").filter(|ids| ids.is_array()) {
            gen_args["dataset_ids"] = ids.clone();
        }

        let gen_name = generator.name().to_string();
        let gen_step = ctx.begin_step(gen_name.clone(), gen_args.clone());
        publisher.publish(ReactEvent::ToolStarted {
            name: gen_name.clone(),
            args: gen_args.clone(),
            attempt: 1,
        });

        let result = self
            .dispatch(ctx, &gen_name, gen_args.clone(), ToolKind::CodeGeneration, cancel)
            .await;
        let summary = result.summary(self.summary_chars);
        ctx.finish_step(
            gen_step,
            summary.clone(),
            result.error().map(str::to_string),
            result.error_code(),
        );
        publisher.publish(ReactEvent::ToolFinished {
            name: gen_name.clone(),
            summary,
            error: result.error().map(str::to_string),
            error_code: result.error_code(),
        });

        match result.result() {
            Some(value) => {
                self.store_artifact(ctx, &gen_name, &gen_args, value);
                Ok(())
            }
            None => {
                let code = result
                    .error_code()
                    .unwrap_or(ErrorCode::CodeGenerationInvalid);
                ctx.bump_error_count(&gen_name);
                tracing::error!(
                    turn_id = %ctx.turn_id(),
                    tool = %gen_name,
                    error_code = %code,
                    "code regeneration failed"
                );
                Err(TurnError::from_code(code))
            }
        }
    }
}
