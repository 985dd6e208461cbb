//! 记忆层：LLM 消息、单轮中间结果存储、轮次持久化

pub mod conversation;
pub mod persistence;
pub mod working;

pub use conversation::{Message, Role};
pub use persistence::{InMemoryTurnStore, JsonFileTurnStore, TurnStore};
pub use working::{
    dataset_key, IntermediateResultStore, ANALYSIS_RESULT_KEY, DATASET_KEY_PREFIX,
    GENERATED_CODE_KEY,
};
