//! bee-orchestrator：对一条查询跑一轮编排
//!
//! 用法：`bee-orchestrator [--config <path>] <query...>`
//! 过程事件按 JSON Lines 写到 stdout，最后一行是本轮快照；Ctrl+C 取消本轮。本轮以 Error 结束时退出码为 1。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use bee_orchestrator::{
    observability, react::ChannelEmitter, Agent, TurnRequest, TurnStatus,
};
use clap::Parser;

/// 对一条查询跑一轮工具编排
#[derive(Parser, Debug)]
#[command(name = "bee-orchestrator")]
#[command(about = "Run one orchestration turn for a query", long_about = None)]
struct Cli {
    /// 配置文件路径（叠加在 config/default.toml 之上）
    #[arg(long)]
    config: Option<PathBuf>,

    /// 查询文本
    #[arg(required = true, num_args = 1..)]
    query: Vec<String>,
}

impl Cli {
    fn query(&self) -> anyhow::Result<String> {
        let query = self.query.join(" ");
        if query.trim().is_empty() {
            anyhow::bail!("query must not be empty");
        }
        Ok(query)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();
    let cli = Cli::parse();
    let query = cli.query()?;

    let (emitter, mut events) = ChannelEmitter::channel();
    let agent = Agent::from_config(cli.config, Arc::new(emitter))
        .context("Failed to build engine")?;

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::warn!("failed to encode event: {}", e),
            }
        }
    });

    let request = TurnRequest::new("cli", query);
    let turn_id = request.turn_id.clone();
    let outcome = {
        let run = agent.run(request);
        tokio::pin!(run);
        loop {
            tokio::select! {
                outcome = &mut run => break outcome,
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!(turn_id = %turn_id, "Ctrl+C received, cancelling turn");
                    agent.cancel(&turn_id).await;
                }
            }
        }
    };

    // 释放 emitter，让事件打印任务结束
    drop(agent);
    let _ = printer.await;

    println!(
        "{}",
        serde_json::to_string(&outcome.snapshot).context("Failed to encode turn snapshot")?
    );

    if outcome.status() == TurnStatus::Error {
        std::process::exit(1);
    }
    Ok(())
}
