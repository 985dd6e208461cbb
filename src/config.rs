//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `BEE__*` 覆盖（双下划线表示嵌套，如 `BEE__ENGINE__MAX_AGENT_ITERATIONS=20`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::core::{AgentError, RetryPolicy};
use crate::react::UnknownToolPolicy;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub persistence: PersistenceSection,
}

/// [engine] 段：迭代上限、重试与修正预算、摘要长度、流式输出
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub max_agent_iterations: usize,
    /// 普通失败在首次之外的重试次数
    pub max_tool_retries: u32,
    /// 代码执行的总尝试次数（含首次）
    pub max_code_refinement_attempts: u32,
    pub result_summary_chars: usize,
    pub streaming: bool,
    pub unknown_tool_policy: UnknownToolPolicy,
    /// 覆盖默认 system prompt 的文件
    pub system_prompt_path: Option<PathBuf>,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_agent_iterations: 12,
            max_tool_retries: 1,
            max_code_refinement_attempts: 2,
            result_summary_chars: 240,
            streaming: false,
            unknown_tool_policy: UnknownToolPolicy::Dispatch,
            system_prompt_path: None,
        }
    }
}

impl EngineSection {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_tool_retries: self.max_tool_retries,
            max_code_refinement_attempts: self.max_code_refinement_attempts,
        }
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：openai / mock；openai 需要 OPENAI_API_KEY
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    pub request: u64,
    pub stream: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: 60,
            stream: 120,
        }
    }
}

/// [tools] 段：工具超时、沙箱、数据集目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    pub sandbox: SandboxSection,
    /// 数据集目录（`<dir>/<id>.json`）；未设置时不注册 load_dataset
    pub datasets_dir: Option<PathBuf>,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
            sandbox: SandboxSection::default(),
            datasets_dir: None,
        }
    }
}

/// [tools.sandbox] 段：解释器与执行超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SandboxSection {
    pub interpreter: String,
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            args: vec!["-".to_string()],
            timeout_secs: 20,
        }
    }
}

/// [persistence] 段：轮次快照目录；未设置时只保存在内存
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PersistenceSection {
    pub turns_dir: Option<PathBuf>,
}

impl AppConfig {
    /// 预算为 0 的配置没有意义，直接拒绝
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.engine.max_agent_iterations == 0 {
            return Err(AgentError::Config(
                "engine.max_agent_iterations must be at least 1".to_string(),
            ));
        }
        if self.engine.max_code_refinement_attempts == 0 {
            return Err(AgentError::Config(
                "engine.max_code_refinement_attempts must be at least 1".to_string(),
            ));
        }
        if self.engine.result_summary_chars == 0 {
            return Err(AgentError::Config(
                "engine.result_summary_chars must be at least 1".to_string(),
            ));
        }
        if self.tools.sandbox.interpreter.trim().is_empty() {
            return Err(AgentError::Config(
                "tools.sandbox.interpreter must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// 从 config 目录加载配置，环境变量 BEE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 BEE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!(path = %path.display(), "config file not found, ignoring");
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("BEE")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.engine.max_agent_iterations, 12);
        assert_eq!(cfg.engine.max_tool_retries, 1);
        assert_eq!(cfg.engine.max_code_refinement_attempts, 2);
        assert_eq!(cfg.engine.unknown_tool_policy, UnknownToolPolicy::Dispatch);
        assert_eq!(cfg.tools.tool_timeout_secs, 30);
        assert_eq!(cfg.tools.sandbox.interpreter, "python3");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_toml_overrides_and_partial_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bee.toml");
        std::fs::write(
            &path,
            "[engine]\nmax_agent_iterations = 5\nunknown_tool_policy = \"fallback\"\n\n[tools.sandbox]\ntimeout_secs = 3\n",
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.engine.max_agent_iterations, 5);
        assert_eq!(cfg.engine.unknown_tool_policy, UnknownToolPolicy::Fallback);
        // 未写出的键保留默认值
        assert_eq!(cfg.engine.max_tool_retries, 1);
        assert_eq!(cfg.tools.sandbox.timeout_secs, 3);
        assert_eq!(cfg.tools.sandbox.interpreter, "python3");
    }

    #[test]
    fn test_validate_rejects_zero_budgets() {
        let mut cfg = AppConfig::default();
        cfg.engine.max_agent_iterations = 0;
        assert!(matches!(cfg.validate(), Err(AgentError::Config(_))));
    }
}
