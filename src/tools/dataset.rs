//! 数据集加载工具
//!
//! 数据集内容的获取由外部协作方 DatasetProvider 负责（CSV 解析等不在本 crate 范围内），
//! 这里只负责按 id 取回行数据、补充列信息，并以 `dataset:<id>` 为键写入中间结果存储。
//! 同一数据集在本轮或之前轮次已解析过时直接复用。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::ErrorCode;
use crate::memory::dataset_key;
use crate::tools::{ExecutionContext, Tool, ToolError};

/// 数据集来源：返回行数组（每行一个 JSON 对象），不存在时返回 None
#[async_trait]
pub trait DatasetProvider: Send + Sync {
    async fn fetch(&self, dataset_id: &str) -> Result<Option<Value>, String>;
}

/// 内存数据集（测试 / 演示）
#[derive(Debug, Default, Clone)]
pub struct InMemoryDatasets {
    sets: HashMap<String, Value>,
}

impl InMemoryDatasets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dataset(mut self, dataset_id: impl Into<String>, rows: Value) -> Self {
        self.sets.insert(dataset_id.into(), rows);
        self
    }
}

#[async_trait]
impl DatasetProvider for InMemoryDatasets {
    async fn fetch(&self, dataset_id: &str) -> Result<Option<Value>, String> {
        Ok(self.sets.get(dataset_id).cloned())
    }
}

/// 目录数据集：`<root>/<id>.json`，文件内容为行数组
#[derive(Debug, Clone)]
pub struct DirectoryDatasets {
    root: PathBuf,
}

impl DirectoryDatasets {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl DatasetProvider for DirectoryDatasets {
    async fn fetch(&self, dataset_id: &str) -> Result<Option<Value>, String> {
        if !is_valid_dataset_id(dataset_id) {
            return Ok(None);
        }
        let path = self.root.join(format!("{}.json", dataset_id));
        if !path.exists() {
            return Ok(None);
        }
        let data = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| format!("read {}: {}", path.display(), e))?;
        serde_json::from_str(&data)
            .map(Some)
            .map_err(|e| format!("parse {}: {}", path.display(), e))
    }
}

fn is_valid_dataset_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// load_dataset 工具
pub struct LoadDatasetTool {
    provider: Arc<dyn DatasetProvider>,
}

impl LoadDatasetTool {
    pub fn new(provider: Arc<dyn DatasetProvider>) -> Self {
        Self { provider }
    }
}

/// 由行数组得到 { dataset_id, columns, row_count, rows }
fn describe(dataset_id: &str, rows: Value) -> Result<Value, ToolError> {
    let Some(list) = rows.as_array() else {
        return Err(ToolError::new(
            ErrorCode::ToolWrapperError,
            format!("dataset '{}' is not a list of rows", dataset_id),
        ));
    };
    let columns: Vec<String> = list
        .first()
        .and_then(|r| r.as_object())
        .map(|o| o.keys().cloned().collect())
        .unwrap_or_default();
    Ok(json!({
        "dataset_id": dataset_id,
        "columns": columns,
        "row_count": list.len(),
        "rows": rows,
    }))
}

#[async_trait]
impl Tool for LoadDatasetTool {
    fn name(&self) -> &str {
        "load_dataset"
    }

    fn description(&self) -> &str {
        "Load a dataset by id so later steps can analyse it. Args: {\"dataset_id\": \"sales\"}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "dataset_id": { "type": "string", "description": "Identifier of the dataset" }
            },
            "required": ["dataset_id"]
        })
    }

    fn artifact_key(&self, args: &Value) -> Option<String> {
        args.get("dataset_id")
            .and_then(|v| v.as_str())
            .map(|id| dataset_key(id.trim()))
    }

    async fn execute(&self, args: Value, ctx: &ExecutionContext<'_>) -> Result<Value, ToolError> {
        let dataset_id = args
            .get("dataset_id")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .unwrap_or("");
        if !is_valid_dataset_id(dataset_id) {
            return Err(ToolError::validation(format!(
                "invalid dataset id: {:?}",
                dataset_id
            )));
        }

        if let Some(cached) = ctx.dataset(dataset_id) {
            tracing::debug!(dataset_id = %dataset_id, "dataset reused from artifacts");
            return Ok(cached.clone());
        }

        let rows = self
            .provider
            .fetch(dataset_id)
            .await
            .map_err(|e| {
                tracing::warn!(dataset_id = %dataset_id, error = %e, "dataset provider failed");
                ToolError::new(ErrorCode::ToolWrapperError, "dataset provider failed")
            })?
            .ok_or_else(|| ToolError::validation(format!("dataset '{}' not found", dataset_id)))?;

        describe(dataset_id, rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::IntermediateResultStore;

    fn provider() -> Arc<dyn DatasetProvider> {
        Arc::new(InMemoryDatasets::new().with_dataset(
            "sales",
            json!([{"region": "n", "amount": 3}, {"region": "s", "amount": 5}]),
        ))
    }

    #[tokio::test]
    async fn test_load_dataset_describes_rows() {
        let tool = LoadDatasetTool::new(provider());
        let store = IntermediateResultStore::new();
        let ctx = ExecutionContext::new("u", "t", &store);
        let v = tool.execute(json!({"dataset_id": "sales"}), &ctx).await.unwrap();
        assert_eq!(v["row_count"], 2);
        let columns = v["columns"].as_array().unwrap();
        assert_eq!(columns.len(), 2);
        assert!(columns.contains(&json!("region")));
        assert_eq!(
            tool.artifact_key(&json!({"dataset_id": "sales"})).as_deref(),
            Some("dataset:sales")
        );
    }

    #[tokio::test]
    async fn test_padded_id_keys_match_lookup() {
        let tool = LoadDatasetTool::new(provider());
        let store = IntermediateResultStore::new();
        let ctx = ExecutionContext::new("u", "t", &store);
        let args = json!({"dataset_id": " sales\n"});
        let v = tool.execute(args.clone(), &ctx).await.unwrap();
        assert_eq!(v["dataset_id"], "sales");

        let key = tool.artifact_key(&args).unwrap();
        assert_eq!(key, "dataset:sales");
        let mut store = IntermediateResultStore::new();
        store.put(key, v);
        assert!(store.dataset("sales").is_some());
    }

    #[tokio::test]
    async fn test_missing_dataset_is_validation_error() {
        let tool = LoadDatasetTool::new(provider());
        let store = IntermediateResultStore::new();
        let ctx = ExecutionContext::new("u", "t", &store);
        let err = tool.execute(json!({"dataset_id": "nope"}), &ctx).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
        let err = tool.execute(json!({"dataset_id": "../x"}), &ctx).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn test_cached_dataset_is_reused() {
        let tool = LoadDatasetTool::new(Arc::new(InMemoryDatasets::new()));
        let mut store = IntermediateResultStore::new();
        store.put(dataset_key("old"), json!({"dataset_id": "old", "row_count": 0}));
        let ctx = ExecutionContext::new("u", "t", &store);
        let v = tool.execute(json!({"dataset_id": "old"}), &ctx).await.unwrap();
        assert_eq!(v["dataset_id"], "old");
    }

    #[tokio::test]
    async fn test_directory_datasets() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("d1.json"), r#"[{"a": 1}]"#).unwrap();
        let provider = DirectoryDatasets::new(dir.path());
        assert_eq!(provider.fetch("d1").await.unwrap(), Some(json!([{"a": 1}])));
        assert_eq!(provider.fetch("d2").await.unwrap(), None);
        assert_eq!(provider.fetch("../d1").await.unwrap(), None);
    }
}
