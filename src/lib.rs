//! Bee 工具编排引擎
//!
//! 把一次用户请求变成有界的「推理 → 工具调用 → 最终回答」序列。
//!
//! 模块划分：
//! - **agent**: 无界面运行时（命令行 / HTTP 前端调用）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误标签与恢复、单轮状态、轮次监管、编排器、引擎构建
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock / 脚本）
//! - **memory**: LLM 消息、中间结果存储、轮次持久化
//! - **react**: 回复解析、Prompt 组装、Planner、重试与修正、主循环、过程事件
//! - **tools**: 工具注册表、分发器与内置工具（数据集、代码生成、代码执行、echo）

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;

pub use agent::Agent;
pub use core::{AgentError, EngineBuilder, ErrorCode, TurnStatus};
pub use react::{react_loop, ReactSession, TurnOutcome, TurnRequest};
