//! 引擎构建器：从配置组装 LLM、工具注册表、Planner、持久化与事件出口
//!
//! 各协作方（LLM、沙箱、数据集来源、TurnStore、EventEmitter）都可以显式注入；
//! 未注入时按配置创建默认实现。

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::{AgentError, RecoveryEngine};
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient};
use crate::memory::{InMemoryTurnStore, JsonFileTurnStore, TurnStore};
use crate::react::{
    EventEmitter, Planner, ReactSession, ResponseParser, TracingEmitter, SYSTEM_PROMPT,
};
use crate::tools::{
    CodeSandbox, DatasetProvider, DirectoryDatasets, EchoTool, ExecuteCodeTool,
    GenerateCodeTool, LoadDatasetTool, ProcessSandbox, Tool, ToolExecutor, ToolRegistry,
};

/// 根据配置与环境变量选择 LLM 后端（OpenAI 兼容 / Mock）
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    if provider == "mock" {
        tracing::info!("Using Mock LLM");
        return Arc::new(MockLlmClient);
    }

    match std::env::var("OPENAI_API_KEY") {
        Ok(key) if provider == "openai" => {
            tracing::info!(model = %cfg.llm.model, "Using OpenAI-compatible LLM");
            Arc::new(
                OpenAiClient::new(cfg.llm.base_url.as_deref(), &cfg.llm.model, Some(&key))
                    .with_request_timeout(cfg.llm.timeouts.request)
                    .with_stream_timeout(cfg.llm.timeouts.stream),
            )
        }
        _ => {
            tracing::warn!(provider = %provider, "No API key set or provider unknown, using Mock LLM");
            Arc::new(MockLlmClient)
        }
    }
}

/// 引擎构建器
pub struct EngineBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    code_llm: Option<Arc<dyn LlmClient>>,
    sandbox: Option<Arc<dyn CodeSandbox>>,
    datasets: Option<Arc<dyn DatasetProvider>>,
    store: Option<Arc<dyn TurnStore>>,
    emitter: Option<Arc<dyn EventEmitter>>,
    system_prompt: Option<String>,
    extra_tools: Vec<Arc<dyn Tool>>,
}

impl EngineBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            code_llm: None,
            sandbox: None,
            datasets: None,
            store: None,
            emitter: None,
            system_prompt: None,
            extra_tools: Vec::new(),
        }
    }

    /// 规划用 LLM
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// 代码生成工具使用的 LLM；未设置时与规划共用
    pub fn with_code_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.code_llm = Some(llm);
        self
    }

    pub fn with_sandbox(mut self, sandbox: Arc<dyn CodeSandbox>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    pub fn with_datasets(mut self, datasets: Arc<dyn DatasetProvider>) -> Self {
        self.datasets = Some(datasets);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn TurnStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn EventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// 追加自定义工具（注册时同样会拒绝保留名与重名）
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.extra_tools.push(tool);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 构建工具注册表：echo、load_dataset（有数据来源时）、generate_code、execute_code 与自定义工具
    pub fn build_tool_registry(&self, llm: &Arc<dyn LlmClient>) -> Result<ToolRegistry, AgentError> {
        let mut tools = ToolRegistry::new();
        tools.register(EchoTool)?;

        let datasets: Option<Arc<dyn DatasetProvider>> = self.datasets.clone().or_else(|| {
            self.config
                .tools
                .datasets_dir
                .as_ref()
                .map(|dir| Arc::new(DirectoryDatasets::new(dir)) as Arc<dyn DatasetProvider>)
        });
        if let Some(datasets) = datasets {
            tools.register(LoadDatasetTool::new(datasets))?;
        }

        let code_llm = self.code_llm.clone().unwrap_or_else(|| llm.clone());
        tools.register(GenerateCodeTool::new(code_llm))?;

        let sandbox = self.sandbox.clone().unwrap_or_else(|| {
            let cfg = &self.config.tools.sandbox;
            Arc::new(ProcessSandbox::new(
                cfg.interpreter.clone(),
                cfg.args.clone(),
                cfg.timeout_secs,
            ))
        });
        tools.register(ExecuteCodeTool::new(sandbox))?;

        for tool in &self.extra_tools {
            tools.register_arc(tool.clone())?;
        }
        Ok(tools)
    }

    /// system prompt：显式设置 > 配置文件指定 > 内置默认
    fn resolve_system_prompt(&self) -> Result<String, AgentError> {
        if let Some(prompt) = &self.system_prompt {
            return Ok(prompt.clone());
        }
        match &self.config.engine.system_prompt_path {
            Some(path) => std::fs::read_to_string(path).map_err(|e| {
                AgentError::Config(format!("cannot read system prompt {}: {}", path.display(), e))
            }),
            None => Ok(SYSTEM_PROMPT.to_string()),
        }
    }

    fn resolve_store(&self) -> Arc<dyn TurnStore> {
        if let Some(store) = &self.store {
            return store.clone();
        }
        match &self.config.persistence.turns_dir {
            Some(dir) => Arc::new(JsonFileTurnStore::new(PathBuf::from(dir))),
            None => Arc::new(InMemoryTurnStore::new()),
        }
    }

    /// 构建可在多轮之间共享的 ReactSession
    pub fn build(self) -> Result<ReactSession, AgentError> {
        self.config.validate()?;
        let engine = &self.config.engine;

        let llm = self
            .llm
            .clone()
            .unwrap_or_else(|| create_llm_from_config(&self.config));
        let tools = self.build_tool_registry(&llm)?;
        tracing::info!(tools = ?tools.tool_names(), "tool registry ready");

        let planner = Planner::new(llm, self.resolve_system_prompt()?).with_streaming(engine.streaming);
        let executor = ToolExecutor::new(tools, self.config.tools.tool_timeout_secs);

        Ok(ReactSession::new(Arc::new(planner), Arc::new(executor))
            .with_recovery(RecoveryEngine::new(engine.retry_policy()))
            .with_parser(ResponseParser::new(engine.unknown_tool_policy))
            .with_store(self.resolve_store())
            .with_emitter(
                self.emitter
                    .clone()
                    .unwrap_or_else(|| Arc::new(TracingEmitter)),
            )
            .with_max_iterations(engine.max_agent_iterations)
            .with_summary_chars(engine.result_summary_chars))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FINAL_ANSWER_TOOL;
    use crate::llm::ScriptedLlmClient;
    use crate::tools::InMemoryDatasets;
    use async_trait::async_trait;
    use serde_json::Value;

    struct Reserved;

    #[async_trait]
    impl Tool for Reserved {
        fn name(&self) -> &str {
            FINAL_ANSWER_TOOL
        }

        fn description(&self) -> &str {
            "clashes with the final answer action"
        }

        async fn execute(
            &self,
            _args: Value,
            _ctx: &crate::tools::ExecutionContext<'_>,
        ) -> Result<Value, crate::tools::ToolError> {
            Ok(Value::Null)
        }
    }

    #[test]
    fn test_registry_contents() {
        let builder = EngineBuilder::new(AppConfig::default())
            .with_datasets(Arc::new(InMemoryDatasets::new()));
        let llm: Arc<dyn LlmClient> = Arc::new(ScriptedLlmClient::new(Vec::<String>::new()));
        let reg = builder.build_tool_registry(&llm).unwrap();
        assert_eq!(
            reg.tool_names(),
            vec!["echo", "execute_code", "generate_code", "load_dataset"]
        );
    }

    #[test]
    fn test_reserved_tool_is_configuration_error() {
        let result = EngineBuilder::new(AppConfig::default())
            .with_llm(Arc::new(ScriptedLlmClient::new(Vec::<String>::new())))
            .with_tool(Arc::new(Reserved))
            .build();
        assert!(matches!(result, Err(AgentError::Registration(_))));
    }

    #[test]
    fn test_build_applies_engine_config() {
        let mut cfg = AppConfig::default();
        cfg.engine.max_agent_iterations = 4;
        let session = EngineBuilder::new(cfg)
            .with_llm(Arc::new(ScriptedLlmClient::new(Vec::<String>::new())))
            .build()
            .unwrap();
        assert_eq!(session.max_iterations, 4);
        assert!(session.executor.registry().contains("execute_code"));
    }

    #[test]
    fn test_mock_provider() {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "mock".to_string();
        let llm = create_llm_from_config(&cfg);
        assert_eq!(llm.token_usage(), (0, 0, 0));
    }
}
