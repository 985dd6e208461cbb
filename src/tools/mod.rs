pub mod code_exec;
pub mod code_gen;
pub mod dataset;
pub mod echo;
pub mod executor;
pub mod registry;
pub mod result;
pub mod sandbox;
pub mod schema;

pub use code_exec::ExecuteCodeTool;
pub use code_gen::GenerateCodeTool;
pub use dataset::{DatasetProvider, DirectoryDatasets, InMemoryDatasets, LoadDatasetTool};
pub use echo::EchoTool;
pub use executor::ToolExecutor;
pub use registry::{ExecutionContext, Tool, ToolError, ToolKind, ToolRegistry};
pub use result::ToolResult;
pub use sandbox::{CodeSandbox, ProcessSandbox, SandboxError, SandboxErrorKind};
pub use schema::tool_call_schema_json;
