//! 认知层：回复解析、Prompt 组装、Planner、重试与修正、编排主循环、过程事件

pub mod controller;
pub mod events;
pub mod loop_;
pub mod parser;
pub mod planner;
pub mod prompt;

pub use controller::{ExecutionOutcome, RetryController};
pub use events::{
    ChannelEmitter, EngineEvent, EventEmitter, NoopEmitter, Publisher, ReactEvent,
    RecordingEmitter, TracingEmitter,
};
pub use loop_::{
    react_loop, ReactSession, TurnOutcome, TurnRequest, DEFAULT_MAX_ITERATIONS,
    DEFAULT_SUMMARY_CHARS,
};
pub use parser::{parse, Action, ParsedResponse, ResponseParser, UnknownToolPolicy};
pub use planner::Planner;
pub use prompt::{build_messages, SYSTEM_PROMPT};
