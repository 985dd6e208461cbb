//! 工具调用 JSON Schema：生成与校验
//!
//! tool_call_schema_json 用 schemars 生成「合法 tool call」的结构注入 system prompt；
//! validate_args 在分发前用 jsonschema 按工具的 parameters_schema 校验参数。

use std::collections::HashMap;

use schemars::{schema_for, JsonSchema};
use serde_json::Value;

/// 工具调用请求格式：与解析器识别的 `{"tool": "...", "args": {...}}` 一致（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallFormat {
    /// 工具名，如 load_dataset、generate_code、execute_code，或 _answerUserTool / _askUserTool
    pub tool: String,
    /// 工具参数，依工具不同而不同
    pub args: HashMap<String, serde_json::Value>,
}

/// 返回工具调用的 JSON Schema 字符串，可拼入 system prompt
pub fn tool_call_schema_json() -> String {
    let schema = schema_for!(ToolCallFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| String::new())
}

/// 按工具的 parameters_schema 校验参数；参数必须是对象，违反项合并为一条说明
pub fn validate_args(schema: &Value, args: &Value) -> Result<(), String> {
    if !args.is_object() {
        return Err("arguments must be a JSON object".to_string());
    }
    let validator = jsonschema::Validator::new(schema)
        .map_err(|e| format!("invalid tool schema: {}", e))?;
    if validator.is_valid(args) {
        return Ok(());
    }
    let errors: Vec<String> = validator.iter_errors(args).map(|e| e.to_string()).collect();
    Err(errors.join("; "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "dataset_id": { "type": "string" },
                "limit": { "type": "integer" }
            },
            "required": ["dataset_id"]
        })
    }

    #[test]
    fn test_tool_call_schema_mentions_fields() {
        let s = tool_call_schema_json();
        assert!(s.contains("tool"));
        assert!(s.contains("args"));
    }

    #[test]
    fn test_validate_ok() {
        assert!(validate_args(&schema(), &json!({"dataset_id": "a", "limit": 3})).is_ok());
    }

    #[test]
    fn test_validate_missing_required() {
        let err = validate_args(&schema(), &json!({"limit": 3})).unwrap_err();
        assert!(err.contains("dataset_id"));
        assert!(validate_args(&schema(), &json!({"dataset_id": null})).is_err());
    }

    #[test]
    fn test_validate_array_items() {
        let schema = json!({
            "type": "object",
            "properties": {
                "dataset_ids": { "type": "array", "items": { "type": "string" } }
            }
        });
        assert!(validate_args(&schema, &json!({"dataset_ids": ["sales"]})).is_ok());
        let err = validate_args(&schema, &json!({"dataset_ids": [1]})).unwrap_err();
        assert!(!err.is_empty());
    }

    #[test]
    fn test_validate_enum() {
        let schema = json!({
            "type": "object",
            "properties": { "mode": { "enum": ["sum", "mean"] } }
        });
        assert!(validate_args(&schema, &json!({"mode": "sum"})).is_ok());
        assert!(validate_args(&schema, &json!({"mode": "max"})).is_err());
    }

    #[test]
    fn test_validate_wrong_type_and_non_object() {
        assert!(validate_args(&schema(), &json!({"dataset_id": 5})).is_err());
        assert!(validate_args(&schema(), &json!({"dataset_id": "a", "limit": 1.5})).is_err());
        assert!(validate_args(&schema(), &json!("text")).is_err());
    }
}
