//! 代码执行沙箱
//!
//! 沙箱运行时本身是外部协作方，这里只定义 CodeSandbox 接口与一个基于子进程的实现：
//! 代码经 stdin 交给解释器，输入数据以 JSON 写入临时文件，文件路径放在环境变量 BEE_SANDBOX_INPUT_FILE 中；
//! stdout 最后一个非空行即结果（能解析为 JSON 则按 JSON，否则作为字符串）。
//! 超时 / 非零退出 / 无输出分别映射为 CODE_EXECUTION_TIMEOUT / FAILED / NO_RESULT。

use std::io::Write;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::core::ErrorCode;

/// 输入数据文件路径的环境变量（单个环境变量在 Linux 上限 128 KiB，数据走文件）
pub const SANDBOX_INPUT_ENV: &str = "BEE_SANDBOX_INPUT_FILE";
/// stderr 保留的最大字符数
const STDERR_TAIL_CHARS: usize = 500;

/// 给代码生成 LLM 的沙箱约定说明
pub const SANDBOX_CODE_CONTRACT: &str = "The code runs in a sandbox. Read inputs with \
`json.load(open(os.environ[\"BEE_SANDBOX_INPUT_FILE\"]))`; datasets are under inputs[\"datasets\"][<id>][\"rows\"]. \
Print the final result as a single JSON value on the last line of stdout.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxErrorKind {
    Timeout,
    Runtime,
    NoResult,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct SandboxError {
    pub kind: SandboxErrorKind,
    pub message: String,
}

impl SandboxError {
    pub fn new(kind: SandboxErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self.kind {
            SandboxErrorKind::Timeout => ErrorCode::CodeExecutionTimeout,
            SandboxErrorKind::Runtime => ErrorCode::CodeExecutionFailed,
            SandboxErrorKind::NoResult => ErrorCode::CodeExecutionNoResult,
        }
    }
}

/// 沙箱接口：执行代码，返回结果值
#[async_trait]
pub trait CodeSandbox: Send + Sync {
    async fn run(&self, code: &str, inputs: &Value) -> Result<Value, SandboxError>;
}

/// 子进程沙箱：interpreter + args，代码从 stdin 读入
pub struct ProcessSandbox {
    interpreter: String,
    args: Vec<String>,
    timeout_secs: u64,
}

impl ProcessSandbox {
    pub fn new(interpreter: impl Into<String>, args: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            interpreter: interpreter.into(),
            args,
            timeout_secs: timeout_secs.max(1),
        }
    }

    /// `python3 -`：从 stdin 读取脚本
    pub fn python(timeout_secs: u64) -> Self {
        Self::new("python3", vec!["-".to_string()], timeout_secs)
    }
}

fn tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    text.chars().skip(count - max_chars).collect()
}

/// stdout 最后一个非空行 → 结果值
fn parse_output(stdout: &str) -> Option<Value> {
    let last = stdout.lines().rev().map(str::trim).find(|l| !l.is_empty())?;
    Some(serde_json::from_str(last).unwrap_or_else(|_| Value::String(last.to_string())))
}

#[async_trait]
impl CodeSandbox for ProcessSandbox {
    async fn run(&self, code: &str, inputs: &Value) -> Result<Value, SandboxError> {
        tracing::info!(interpreter = %self.interpreter, code_len = code.len(), "sandbox run");

        let runtime_err = |what: &str, e: std::io::Error| {
            SandboxError::new(SandboxErrorKind::Runtime, format!("{}: {}", what, e))
        };
        // 子进程退出前文件必须存在；input_file 在 run 结束时删除
        let mut input_file = tempfile::NamedTempFile::new().map_err(|e| runtime_err("input file", e))?;
        serde_json::to_writer(&mut input_file, inputs).map_err(|e| {
            SandboxError::new(SandboxErrorKind::Runtime, format!("input file: {}", e))
        })?;
        input_file.flush().map_err(|e| runtime_err("input file", e))?;

        let mut child = Command::new(&self.interpreter)
            .args(&self.args)
            .env(SANDBOX_INPUT_ENV, input_file.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SandboxError::new(SandboxErrorKind::Runtime, format!("spawn failed: {}", e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(code.as_bytes())
                .await
                .map_err(|e| SandboxError::new(SandboxErrorKind::Runtime, format!("stdin: {}", e)))?;
            // 关闭 stdin，让解释器开始执行
            drop(stdin);
        }

        let output = tokio::time::timeout(
            Duration::from_secs(self.timeout_secs),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| {
            SandboxError::new(
                SandboxErrorKind::Timeout,
                format!("execution timed out after {}s", self.timeout_secs),
            )
        })?
        .map_err(|e| SandboxError::new(SandboxErrorKind::Runtime, format!("wait failed: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(SandboxError::new(
                SandboxErrorKind::Runtime,
                format!(
                    "exit {:?}: {}",
                    output.status.code(),
                    tail(stderr.trim(), STDERR_TAIL_CHARS)
                ),
            ));
        }
        parse_output(&stdout).ok_or_else(|| {
            SandboxError::new(SandboxErrorKind::NoResult, "code produced no output")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_output_last_line() {
        assert_eq!(parse_output("log\n{\"n\": 2}\n\n"), Some(json!({"n": 2})));
        assert_eq!(parse_output("hello world"), Some(json!("hello world")));
        assert_eq!(parse_output("  \n"), None);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            SandboxError::new(SandboxErrorKind::Timeout, "").code(),
            ErrorCode::CodeExecutionTimeout
        );
        assert_eq!(
            SandboxError::new(SandboxErrorKind::NoResult, "").code(),
            ErrorCode::CodeExecutionNoResult
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_sandbox_result_and_inputs() {
        let sandbox = ProcessSandbox::new("sh", vec![], 5);
        let v = sandbox
            .run("cat \"$BEE_SANDBOX_INPUT_FILE\"; echo", &json!({"x": 1}))
            .await
            .unwrap();
        assert_eq!(v, json!({"x": 1}));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_sandbox_large_inputs() {
        let rows: Vec<Value> = (0..8000)
            .map(|i| json!({"id": i, "region": "north-east", "amount": i * 3}))
            .collect();
        let inputs = json!({"datasets": {"sales": {"rows": rows}}});
        assert!(inputs.to_string().len() > 128 * 1024);

        let sandbox = ProcessSandbox::new("sh", vec![], 5);
        let v = sandbox
            .run("wc -c < \"$BEE_SANDBOX_INPUT_FILE\" | tr -d ' '", &inputs)
            .await
            .unwrap();
        assert_eq!(v, json!(inputs.to_string().len()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_sandbox_failures() {
        let sandbox = ProcessSandbox::new("sh", vec![], 1);
        let err = sandbox.run("echo oops >&2; exit 3", &json!({})).await.unwrap_err();
        assert_eq!(err.kind, SandboxErrorKind::Runtime);
        assert!(err.message.contains("oops"));

        let err = sandbox.run("true", &json!({})).await.unwrap_err();
        assert_eq!(err.kind, SandboxErrorKind::NoResult);

        let err = sandbox.run("sleep 5", &json!({})).await.unwrap_err();
        assert_eq!(err.kind, SandboxErrorKind::Timeout);
    }
}
