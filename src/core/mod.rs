//! 核心编排层：错误与恢复、单轮状态、轮次监管、编排器、引擎构建

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod session_supervisor;
pub mod state;

pub use builder::{create_llm_from_config, EngineBuilder};
pub use error::{AgentError, ErrorCode, RecoveryAction};
pub use orchestrator::{spawn_orchestrator, Command};
pub use recovery::{RecoveryEngine, RetryPolicy};
pub use session_supervisor::TurnSupervisor;
pub use state::{
    truncate_summary, Step, StepEvent, StepId, TurnContext, TurnError, TurnSnapshot, TurnStatus,
    CLARIFICATION_TOOL, FINAL_ANSWER_TOOL, RESERVED_TOOL_NAMES,
};
