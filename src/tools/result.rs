//! 工具调用的统一返回：`{result}` 或 `{error, errorCode}`，二者恰居其一

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{truncate_summary, ErrorCode};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResult {
    Success {
        result: Value,
    },
    Failure {
        error: String,
        #[serde(rename = "errorCode")]
        error_code: ErrorCode,
    },
}

impl ToolResult {
    pub fn success(result: Value) -> Self {
        ToolResult::Success { result }
    }

    pub fn failure(error_code: ErrorCode, error: impl Into<String>) -> Self {
        ToolResult::Failure {
            error: error.into(),
            error_code,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ToolResult::Success { .. })
    }

    pub fn result(&self) -> Option<&Value> {
        match self {
            ToolResult::Success { result } => Some(result),
            ToolResult::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ToolResult::Success { .. } => None,
            ToolResult::Failure { error, .. } => Some(error),
        }
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            ToolResult::Success { .. } => None,
            ToolResult::Failure { error_code, .. } => Some(*error_code),
        }
    }

    /// 供 Step.resultSummary 与事件展示的有界摘要
    pub fn summary(&self, max_chars: usize) -> String {
        match self {
            ToolResult::Success { result } => {
                let text = match result {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                truncate_summary(&text, max_chars)
            }
            ToolResult::Failure { error, error_code } => {
                truncate_summary(&format!("{}: {}", error_code, error), max_chars)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_shapes() {
        let ok = serde_json::to_value(ToolResult::success(json!({"n": 1}))).unwrap();
        assert_eq!(ok, json!({"result": {"n": 1}}));

        let err = serde_json::to_value(ToolResult::failure(ErrorCode::UnknownTool, "unknown tool"))
            .unwrap();
        assert_eq!(err, json!({"error": "unknown tool", "errorCode": "UNKNOWN_TOOL"}));
    }

    #[test]
    fn test_accessors_are_exclusive() {
        let ok = ToolResult::success(json!("x"));
        assert!(ok.result().is_some() && ok.error().is_none() && ok.error_code().is_none());
        let err = ToolResult::failure(ErrorCode::ValidationError, "bad");
        assert!(err.result().is_none() && err.error().is_some());
    }

    #[test]
    fn test_summary_is_bounded() {
        let long = ToolResult::success(json!("a".repeat(500)));
        assert_eq!(long.summary(10).chars().count(), 13);
        let err = ToolResult::failure(ErrorCode::ToolTimeout, "slow");
        assert_eq!(err.summary(100), "TOOL_TIMEOUT: slow");
    }
}
