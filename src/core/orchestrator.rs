//! 编排器：命令通道前端
//!
//! 后台任务消费命令（Submit / Cancel / Quit）：每个 Submit 在独立任务中跑一轮，
//! 轮次之间不共享可变状态；结束的 TurnOutcome 从结果通道送出。
//! Quit 时取消所有在途轮次，并等它们各自落盘、送出结果后再退出。

use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

use crate::core::TurnSupervisor;
use crate::react::{react_loop, ReactSession, TurnOutcome, TurnRequest};

/// 发往编排器的命令
#[derive(Debug, Clone)]
pub enum Command {
    /// 开始新一轮
    Submit(TurnRequest),
    /// 按 turn_id 取消在途的一轮
    Cancel(String),
    /// 取消全部并退出
    Quit,
}

/// 启动编排器：返回命令发送端、结果接收端与后台任务句柄
pub fn spawn_orchestrator(
    session: ReactSession,
) -> (
    mpsc::UnboundedSender<Command>,
    mpsc::UnboundedReceiver<TurnOutcome>,
    JoinHandle<()>,
) {
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<Command>();
    let (outcome_tx, outcome_rx) = mpsc::unbounded_channel::<TurnOutcome>();
    let supervisor = TurnSupervisor::new();

    let handle = tokio::spawn(async move {
        let mut running: JoinSet<()> = JoinSet::new();
        loop {
            tokio::select! {
                Some(cmd) = cmd_rx.recv() => {
                    match cmd {
                        Command::Submit(request) => {
                            if supervisor.is_active(&request.turn_id).await {
                                tracing::warn!(turn_id = %request.turn_id, "turn already running, submit ignored");
                                continue;
                            }
                            let token = supervisor.register(&request.turn_id).await;
                            let session = session.clone();
                            let supervisor = supervisor.clone();
                            let outcome_tx = outcome_tx.clone();
                            running.spawn(async move {
                                let turn_id = request.turn_id.clone();
                                let outcome = react_loop(&session, request, token).await;
                                supervisor.finish(&turn_id).await;
                                let _ = outcome_tx.send(outcome);
                            });
                        }
                        Command::Cancel(turn_id) => {
                            if !supervisor.cancel(&turn_id).await {
                                tracing::debug!(turn_id = %turn_id, "cancel for unknown or finished turn");
                            }
                        }
                        Command::Quit => break,
                    }
                }
                Some(joined) = running.join_next() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "turn task failed");
                    }
                }
                else => break,
            }
        }

        supervisor.shutdown();
        while let Some(joined) = running.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "turn task failed during shutdown");
            }
        }
        tracing::info!("orchestrator stopped");
    });

    (cmd_tx, outcome_rx, handle)
}
