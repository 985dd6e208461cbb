//! 代码执行工具：把代码与已加载的数据集交给 CodeSandbox 执行
//!
//! 存在 `generated_code` 产物时，引擎会用它替换 LLM 给出的 code 参数。
//! 成功结果以 `analysis_result` 为键写入中间结果存储。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::memory::ANALYSIS_RESULT_KEY;
use crate::tools::sandbox::CodeSandbox;
use crate::tools::{ExecutionContext, Tool, ToolError, ToolKind};

pub struct ExecuteCodeTool {
    sandbox: Arc<dyn CodeSandbox>,
}

impl ExecuteCodeTool {
    pub fn new(sandbox: Arc<dyn CodeSandbox>) -> Self {
        Self { sandbox }
    }
}

/// 收集参数中引用的数据集：{ "datasets": { id: 产物 } }
fn collect_inputs(args: &Value, ctx: &ExecutionContext<'_>) -> Result<Value, ToolError> {
    let mut datasets = Map::new();
    let ids = args
        .get("dataset_ids")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    for id in ids {
        let Some(id) = id.as_str() else {
            return Err(ToolError::validation("dataset_ids must contain strings"));
        };
        let dataset = ctx.dataset(id).ok_or_else(|| {
            ToolError::validation(format!("dataset '{}' has not been loaded", id))
        })?;
        datasets.insert(id.to_string(), dataset.clone());
    }
    Ok(json!({ "datasets": datasets }))
}

#[async_trait]
impl Tool for ExecuteCodeTool {
    fn name(&self) -> &str {
        "execute_code"
    }

    fn description(&self) -> &str {
        "Run the generated analysis code in the sandbox. Args: {\"code\": \"...\", \"dataset_ids\": [\"sales\"]}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": { "type": "string", "description": "Python source; replaced by the latest generated code" },
                "dataset_ids": { "type": "array", "items": { "type": "string" }, "description": "Datasets to pass as inputs" }
            },
            "required": ["code"]
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::CodeExecution
    }

    fn artifact_key(&self, _args: &Value) -> Option<String> {
        Some(ANALYSIS_RESULT_KEY.to_string())
    }

    async fn execute(&self, args: Value, ctx: &ExecutionContext<'_>) -> Result<Value, ToolError> {
        let code = args.get("code").and_then(|v| v.as_str()).unwrap_or("");
        if code.trim().is_empty() {
            return Err(ToolError::validation("code is empty"));
        }
        let inputs = collect_inputs(&args, ctx)?;

        let output = self
            .sandbox
            .run(code, &inputs)
            .await
            .map_err(|e| ToolError::new(e.code(), e.message))?;
        Ok(json!({ "output": output }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorCode;
    use crate::memory::{dataset_key, IntermediateResultStore};
    use crate::tools::sandbox::{SandboxError, SandboxErrorKind};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeSandbox {
        seen: Mutex<Vec<(String, Value)>>,
        fail: Option<SandboxErrorKind>,
    }

    #[async_trait]
    impl CodeSandbox for FakeSandbox {
        async fn run(&self, code: &str, inputs: &Value) -> Result<Value, SandboxError> {
            self.seen.lock().unwrap().push((code.to_string(), inputs.clone()));
            match self.fail {
                Some(kind) => Err(SandboxError::new(kind, "boom")),
                None => Ok(json!(42)),
            }
        }
    }

    #[tokio::test]
    async fn test_execute_passes_datasets() {
        let sandbox = Arc::new(FakeSandbox::default());
        let tool = ExecuteCodeTool::new(sandbox.clone());
        let mut store = IntermediateResultStore::new();
        store.put(dataset_key("sales"), json!({"rows": [1]}));
        let ctx = ExecutionContext::new("u", "t", &store);

        let v = tool
            .execute(json!({"code": "print(42)", "dataset_ids": ["sales"]}), &ctx)
            .await
            .unwrap();
        assert_eq!(v, json!({"output": 42}));
        let seen = sandbox.seen.lock().unwrap();
        assert_eq!(seen[0].1["datasets"]["sales"]["rows"], json!([1]));
    }

    #[tokio::test]
    async fn test_missing_dataset_is_validation_error() {
        let tool = ExecuteCodeTool::new(Arc::new(FakeSandbox::default()));
        let store = IntermediateResultStore::new();
        let ctx = ExecutionContext::new("u", "t", &store);
        let err = tool
            .execute(json!({"code": "x", "dataset_ids": ["nope"]}), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn test_sandbox_failure_maps_code() {
        let sandbox = FakeSandbox {
            fail: Some(SandboxErrorKind::NoResult),
            ..Default::default()
        };
        let tool = ExecuteCodeTool::new(Arc::new(sandbox));
        let store = IntermediateResultStore::new();
        let ctx = ExecutionContext::new("u", "t", &store);
        let err = tool.execute(json!({"code": "pass"}), &ctx).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::CodeExecutionNoResult);
    }
}
