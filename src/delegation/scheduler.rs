//! 定期委托调度器
//!
//! 面向调用方的控制器：创建 / 暂停 / 恢复 / 取消委托、查询到期状态、到期即扣款。
//! 后台模式下以固定节拍扫描全部非终态委托，通过有界通道把“到期”事件交给扣款 worker；
//! 重复投递的事件由 Registry 的幂等 settle 兜底（第二次观察到未到期而被跳过）。

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerSection;
use crate::core::{Clock, PaymentError, Timestamp};
use crate::delegation::due::{self, DueStatus};
use crate::delegation::{
    Delegation, DelegationId, DelegationRegistry, NewDelegation, SettlementReceipt,
};

/// 扫描发现的到期事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueEvent {
    pub delegation_id: DelegationId,
    pub next_payment_time: Timestamp,
}

/// 调度器对外广播的事件
#[derive(Debug, Clone, Serialize)]
pub enum SchedulerEvent {
    Settled(SettlementReceipt),
    /// 执行器失败，状态未变，下次扫描重试
    SettlementFailed { delegation_id: DelegationId, error: String },
    /// 重复投递或状态已变化（已暂停 / 已取消 / 本期已扣）
    Skipped { delegation_id: DelegationId, reason: String },
}

/// 调度器
pub struct RecurringScheduler {
    registry: Arc<dyn DelegationRegistry>,
    clock: Arc<dyn Clock>,
    config: SchedulerSection,
}

impl RecurringScheduler {
    pub fn new(
        registry: Arc<dyn DelegationRegistry>,
        clock: Arc<dyn Clock>,
        config: SchedulerSection,
    ) -> Self {
        Self {
            registry,
            clock,
            config,
        }
    }

    pub async fn create_delegation(&self, params: NewDelegation) -> Result<DelegationId, PaymentError> {
        self.registry.create(params).await
    }

    pub async fn pause_delegation(&self, id: &str) -> Result<Delegation, PaymentError> {
        self.registry.pause(id).await
    }

    pub async fn resume_delegation(&self, id: &str) -> Result<Delegation, PaymentError> {
        self.registry.resume(id).await
    }

    pub async fn cancel_delegation(&self, id: &str) -> Result<Delegation, PaymentError> {
        self.registry.cancel(id).await
    }

    pub async fn get_delegation(&self, id: &str) -> Result<Delegation, PaymentError> {
        self.registry.get(id).await
    }

    /// 某付款方的全部委托（含历史）
    pub async fn delegations_for(&self, payer: &str) -> Result<Vec<Delegation>, PaymentError> {
        self.registry.list_by_payer(payer).await
    }

    pub async fn get_due_status(&self, id: &str) -> Result<DueStatus, PaymentError> {
        self.registry.due_status(id, self.clock.now()).await
    }

    /// 按需检查：到期则扣款，未到期返回 None
    pub async fn settle_if_due(&self, id: &str) -> Result<Option<SettlementReceipt>, PaymentError> {
        let now = self.clock.now();
        let status = self.registry.due_status(id, now).await?;
        if !status.is_due {
            tracing::debug!(delegation = %id, wait = %status.describe(), "Not due yet");
            return Ok(None);
        }
        self.registry.settle(id, now).await.map(Some)
    }

    /// 一次扫描：返回当前到期的委托
    pub async fn sweep_once(&self) -> Result<Vec<DueEvent>, PaymentError> {
        let now = self.clock.now();
        Ok(self
            .registry
            .list_active()
            .await?
            .into_iter()
            .filter(|d| due::is_due(d, now))
            .map(|d| DueEvent {
                next_payment_time: d.next_payment_time(),
                delegation_id: d.id,
            })
            .collect())
    }

    /// 启动后台扫描与扣款 worker；token 取消后两者退出（进行中的扣款会完成）
    ///
    /// 返回的 Receiver 在任务启动前订阅，不会漏掉第一批事件。
    pub fn spawn(
        self: &Arc<Self>,
        token: CancellationToken,
    ) -> (SchedulerHandle, broadcast::Receiver<SchedulerEvent>) {
        let (due_tx, due_rx) = mpsc::channel(self.config.event_buffer.max(1));
        let (events_tx, events_rx) = broadcast::channel(self.config.event_buffer.max(1));

        let sweeper = tokio::spawn(Arc::clone(self).run_sweeper(due_tx, token.clone()));
        let worker = tokio::spawn(Arc::clone(self).run_worker(due_rx, events_tx.clone(), token));

        tracing::info!(
            sweep_interval_secs = self.config.sweep_interval_secs,
            "Recurring scheduler started"
        );
        let handle = SchedulerHandle {
            sweeper,
            worker,
            events: events_tx,
        };
        (handle, events_rx)
    }

    async fn run_sweeper(self: Arc<Self>, due_tx: mpsc::Sender<DueEvent>, token: CancellationToken) {
        let period = Duration::from_secs(self.config.sweep_interval_secs.max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let due = match self.sweep_once().await {
                Ok(due) => due,
                Err(e) => {
                    tracing::warn!(error = %e, "Delegation sweep failed");
                    continue;
                }
            };
            if !due.is_empty() {
                tracing::debug!(count = due.len(), "Due delegations found");
            }
            for event in due {
                tokio::select! {
                    _ = token.cancelled() => return,
                    sent = due_tx.send(event) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
        }
        tracing::info!("Delegation sweeper stopped");
    }

    async fn run_worker(
        self: Arc<Self>,
        mut due_rx: mpsc::Receiver<DueEvent>,
        events: broadcast::Sender<SchedulerEvent>,
        token: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = token.cancelled() => break,
                event = due_rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            let outcome = self.handle_due(&event).await;
            // 没有订阅者时丢弃
            let _ = events.send(outcome);
        }
        tracing::info!("Settlement worker stopped");
    }

    async fn handle_due(&self, event: &DueEvent) -> SchedulerEvent {
        let id = event.delegation_id.clone();
        match self.registry.settle(&id, self.clock.now()).await {
            Ok(receipt) => {
                tracing::info!(
                    delegation = %id,
                    period = receipt.period,
                    completed = receipt.completed,
                    "Delegation settled"
                );
                SchedulerEvent::Settled(receipt)
            }
            Err(e @ PaymentError::SettlementFailed { .. }) => SchedulerEvent::SettlementFailed {
                delegation_id: id,
                error: e.to_string(),
            },
            Err(e) => {
                tracing::debug!(delegation = %id, reason = %e, "Due event skipped");
                SchedulerEvent::Skipped {
                    delegation_id: id,
                    reason: e.to_string(),
                }
            }
        }
    }
}

/// 后台任务句柄
pub struct SchedulerHandle {
    sweeper: JoinHandle<()>,
    worker: JoinHandle<()>,
    events: broadcast::Sender<SchedulerEvent>,
}

impl SchedulerHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.events.subscribe()
    }

    /// 等待扫描与 worker 退出（需先取消 token）
    pub async fn join(self) {
        if let Err(e) = self.sweeper.await {
            tracing::warn!(error = %e, "Sweeper task panicked");
        }
        if let Err(e) = self.worker.await {
            tracing::warn!(error = %e, "Settlement worker panicked");
        }
    }
}
