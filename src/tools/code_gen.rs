//! 代码生成工具
//!
//! 用 LLM 为分析目标写一段 Python 代码；修正循环中会带上上一次的代码与错误再次调用。
//! 从回复中提取代码块，空代码或包含禁止模式时返回 CODE_GENERATION_INVALID。
//! 成功结果以 `generated_code` 为键写入中间结果存储（重新生成时覆盖）。

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};

use crate::core::ErrorCode;
use crate::llm::LlmClient;
use crate::memory::{Message, GENERATED_CODE_KEY};
use crate::tools::sandbox::SANDBOX_CODE_CONTRACT;
use crate::tools::{ExecutionContext, Tool, ToolError, ToolKind};

/// 生成代码中禁止出现的子串（进程 / 网络 / 文件系统逃逸）
const FORBIDDEN_SUBSTR: &[&str] = &[
    "import subprocess",
    "os.system",
    "shutil.rmtree",
    "import socket",
    "__import__(",
    "eval(input",
];

static CODE_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:python|py)?[ \t]*\r?\n(.*?)```").unwrap());

/// 从 LLM 回复中提取代码：优先 ```python / ```py / ``` 代码块，否则取全文
pub fn extract_code(reply: &str) -> String {
    if let Some(cap) = CODE_FENCE_RE.captures(reply) {
        if let Some(m) = cap.get(1) {
            return m.as_str().trim().to_string();
        }
    }
    reply.trim().to_string()
}

/// 校验生成的代码：非空、不含禁止模式
pub fn validate_code(code: &str) -> Result<(), String> {
    if code.trim().is_empty() {
        return Err("generated code is empty".to_string());
    }
    let lower = code.to_lowercase();
    for forbidden in FORBIDDEN_SUBSTR {
        if lower.contains(forbidden) {
            return Err(format!("forbidden pattern: {}", forbidden));
        }
    }
    Ok(())
}

/// generate_code 工具
pub struct GenerateCodeTool {
    llm: Arc<dyn LlmClient>,
}

impl GenerateCodeTool {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    fn build_prompt(args: &Value, ctx: &ExecutionContext<'_>) -> String {
        let goal = args.get("goal").and_then(|v| v.as_str()).unwrap_or("");
        let mut prompt = format!(
            "Write Python code for this analysis goal:\n{}\n\n{}\n",
            goal, SANDBOX_CODE_CONTRACT
        );

        let dataset_ids: Vec<&str> = args
            .get("dataset_ids")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();
        for id in dataset_ids {
            let columns = ctx
                .dataset(id)
                .and_then(|d| d.get("columns"))
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            prompt.push_str(&format!("Dataset '{}' columns: {}\n", id, columns));
        }

        let previous = args
            .get("previous_code")
            .and_then(|v| v.as_str())
            .or_else(|| ctx.generated_code());
        if let (Some(code), Some(error)) = (previous, args.get("error").and_then(|v| v.as_str())) {
            prompt.push_str(&format!(
                "\nThe previous attempt failed.\nPrevious code:\n```python\n{}\n```\nError: {}\nFix the problem.\n",
                code, error
            ));
        }
        prompt.push_str("\nReply with a single ```python code block and nothing else.");
        prompt
    }
}

#[async_trait]
impl Tool for GenerateCodeTool {
    fn name(&self) -> &str {
        "generate_code"
    }

    fn description(&self) -> &str {
        "Generate Python analysis code for a goal. Args: {\"goal\": \"...\", \"dataset_ids\": [\"sales\"]}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "goal": { "type": "string", "description": "What the code must compute" },
                "dataset_ids": { "type": "array", "items": { "type": "string" }, "description": "Datasets loaded earlier" },
                "previous_code": { "type": "string" },
                "error": { "type": "string" }
            },
            "required": ["goal"]
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::CodeGeneration
    }

    fn artifact_key(&self, _args: &Value) -> Option<String> {
        Some(GENERATED_CODE_KEY.to_string())
    }

    async fn execute(&self, args: Value, ctx: &ExecutionContext<'_>) -> Result<Value, ToolError> {
        let prompt = Self::build_prompt(&args, ctx);
        let reply = self
            .llm
            .complete(&[
                Message::system("You write short, correct Python for data analysis."),
                Message::user(prompt),
            ])
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "code generation LLM call failed");
                ToolError::new(ErrorCode::ToolWrapperError, "code generation service failed")
            })?;

        let code = extract_code(&reply);
        validate_code(&code).map_err(|e| ToolError::new(ErrorCode::CodeGenerationInvalid, e))?;

        Ok(json!({
            "code": code,
            "language": "python",
            "goal": args.get("goal").cloned().unwrap_or(Value::Null),
        }))
    }
}
