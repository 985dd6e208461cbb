//! Prompt 组装：(基础 prompt, 工具目录, TurnContext) → 消息列表
//!
//! 纯函数，不读写任何状态；每轮迭代都从 TurnContext 重新组装。

use crate::core::{TurnContext, CLARIFICATION_TOOL, FINAL_ANSWER_TOOL};
use crate::memory::Message;
use crate::tools::tool_call_schema_json;

/// 默认 system prompt
pub const SYSTEM_PROMPT: &str = "You are a data analysis assistant. Work step by step: load the datasets you need, \
generate analysis code, execute it, then answer.\n\
Reply with exactly one JSON object {\"tool\": \"<name>\", \"args\": {...}} per message.\n\
When you have the answer, call _answerUserTool with {\"textResponse\": \"...\"}.\n\
If the request is ambiguous, call _askUserTool with {\"question\": \"...\"}.\n\
You may put private reasoning in <think>...</think> and a short note for the user in <explanation>...</explanation>.";

pub fn build_messages(base_prompt: &str, tool_catalog: &str, ctx: &TurnContext) -> Vec<Message> {
    let mut system = format!(
        "{}\n\n## Tools\n{}\n\nReserved actions: {} (final answer), {} (clarification).\n\n## Tool call format\n{}\n",
        base_prompt,
        tool_catalog,
        FINAL_ANSWER_TOOL,
        CLARIFICATION_TOOL,
        tool_call_schema_json()
    );

    let artifacts = ctx.artifacts().to_prompt_section();
    if !artifacts.is_empty() {
        system.push('\n');
        system.push_str(&artifacts);
    }

    let steps = ctx.steps();
    let failures: Vec<String> = steps
        .iter()
        .filter_map(|s| {
            s.error_code
                .map(|code| format!("- {} (attempt {}): {}", s.tool, s.attempt, code))
        })
        .collect();
    if !failures.is_empty() {
        system.push_str("\n## Failed steps\n");
        system.push_str(&failures.join("\n"));
        system.push('\n');
    }

    let mut messages = Vec::with_capacity(2 + steps.len() * 2);
    messages.push(Message::system(system));
    messages.push(Message::user(ctx.original_query().to_string()));

    for step in &steps {
        messages.push(Message::assistant(format!(
            "Tool call: {} {}",
            step.tool, step.args
        )));
        let observation = match (&step.error_code, &step.error) {
            (Some(code), Some(error)) => format!("{}: {}", code, error),
            (Some(code), None) => code.to_string(),
            _ => step.result_summary.clone(),
        };
        messages.push(Message::user(format!(
            "Observation from {}: {}",
            step.tool, observation
        )));
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorCode;
    use crate::memory::Role;
    use serde_json::json;

    #[test]
    fn test_first_iteration_has_system_and_query() {
        let ctx = TurnContext::new("t", "u", "how many rows?");
        let msgs = build_messages(SYSTEM_PROMPT, "[]", &ctx);
        assert_eq!(msgs.len(), 2);
        assert!(matches!(msgs[0].role, Role::System));
        assert!(msgs[0].content.contains(FINAL_ANSWER_TOOL));
        assert_eq!(msgs[1].content, "how many rows?");
    }

    #[test]
    fn test_steps_become_call_and_observation() {
        let mut ctx = TurnContext::new("t", "u", "q");
        let ok = ctx.begin_step("load_dataset", json!({"dataset_id": "s"}));
        ctx.finish_step(ok, "3 rows", None, None);
        let bad = ctx.begin_step("nope", json!({}));
        ctx.finish_step(bad, "", Some("unknown tool".into()), Some(ErrorCode::UnknownTool));
        ctx.artifacts_mut().put("dataset:s", json!({}));

        let msgs = build_messages("base", "[]", &ctx);
        assert_eq!(msgs.len(), 6);
        assert_eq!(msgs[3].content, "Observation from load_dataset: 3 rows");
        assert_eq!(msgs[5].content, "Observation from nope: UNKNOWN_TOOL: unknown tool");
        assert!(msgs[0].content.contains("- dataset:s"));
        assert!(msgs[0].content.contains("## Failed steps"));
    }
}
