//! 中间结果存储：按生产者键缓存可复用的产物（解析后的数据集、生成的代码、分析结果）
//!
//! 只在工具明确成功时写入；同一键重复写入直接覆盖，不保留历史版本。
//! 可随 TurnSnapshot 序列化，供后续轮次复用。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 代码生成工具的产物键
pub const GENERATED_CODE_KEY: &str = "generated_code";
/// 代码执行工具的产物键
pub const ANALYSIS_RESULT_KEY: &str = "analysis_result";
/// 数据集产物键前缀，完整键为 `dataset:<id>`
pub const DATASET_KEY_PREFIX: &str = "dataset:";

/// id 两端空白不计入键
pub fn dataset_key(dataset_id: &str) -> String {
    format!("{}{}", DATASET_KEY_PREFIX, dataset_id.trim())
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntermediateResultStore {
    entries: BTreeMap<String, Value>,
}

impl IntermediateResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入产物，返回被覆盖的旧值
    pub fn put(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.entries.insert(key.into(), value)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dataset(&self, dataset_id: &str) -> Option<&Value> {
        self.get(&dataset_key(dataset_id))
    }

    /// 最近一次成功生成的代码文本
    pub fn generated_code(&self) -> Option<&str> {
        self.get(GENERATED_CODE_KEY)
            .and_then(|v| v.get("code"))
            .and_then(|v| v.as_str())
    }

    /// 构建供 Planner 使用的 Prompt 片段（Available artifacts）
    pub fn to_prompt_section(&self) -> String {
        if self.entries.is_empty() {
            return String::new();
        }
        let mut s = String::from("## Available artifacts\n");
        for key in self.entries.keys() {
            s.push_str(&format!("- {}\n", key));
        }
        s.push('\n');
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_overwrite_keeps_only_latest() {
        let mut store = IntermediateResultStore::new();
        assert!(store.put(GENERATED_CODE_KEY, json!({"code": "print(1)"})).is_none());
        let old = store.put(GENERATED_CODE_KEY, json!({"code": "print(2)"}));
        assert_eq!(old, Some(json!({"code": "print(1)"})));
        assert_eq!(store.len(), 1);
        assert_eq!(store.generated_code(), Some("print(2)"));
    }

    #[test]
    fn test_dataset_accessor() {
        let mut store = IntermediateResultStore::new();
        store.put(dataset_key("sales"), json!({"rows": []}));
        assert!(store.dataset("sales").is_some());
        assert!(store.dataset(" sales ").is_some());
        assert!(store.dataset("other").is_none());
        assert_eq!(store.keys(), vec!["dataset:sales".to_string()]);
    }

    #[test]
    fn test_prompt_section_lists_keys() {
        let mut store = IntermediateResultStore::new();
        assert!(store.to_prompt_section().is_empty());
        store.put(ANALYSIS_RESULT_KEY, json!(1));
        assert!(store.to_prompt_section().contains("- analysis_result"));
    }

    #[test]
    fn test_serializes_as_plain_map() {
        let mut store = IntermediateResultStore::new();
        store.put("a", json!(1));
        let s = serde_json::to_value(&store).unwrap();
        assert_eq!(s, json!({"a": 1}));
    }
}
