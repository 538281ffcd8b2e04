//! 委托注册表：委托状态的唯一写入方
//!
//! 同一委托 id 上的 pause / resume / cancel / settle 通过每 id 一把异步互斥锁串行化；
//! 不同 id 互不影响。settle 在持锁期间调用 Transfer Executor，只有执行器确认成功才修改记录，
//! 因此重复的到期事件不会重复扣款。
//! 转账通过付款方的 PaymentSession 发出并持有其单飞锁，不会插入同一付款方正在进行的分账批次。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use crate::contracts::TransferOrder;
use crate::core::{Clock, PaymentError, SessionPool, Timestamp};
use crate::delegation::due::{self, DueStatus};
use crate::delegation::{
    Delegation, DelegationId, IntervalLimits, NewDelegation, SettlementReceipt,
};

/// 委托注册表契约
#[async_trait]
pub trait DelegationRegistry: Send + Sync {
    async fn create(&self, params: NewDelegation) -> Result<DelegationId, PaymentError>;

    async fn get(&self, id: &str) -> Result<Delegation, PaymentError>;

    async fn pause(&self, id: &str) -> Result<Delegation, PaymentError>;

    async fn resume(&self, id: &str) -> Result<Delegation, PaymentError>;

    async fn cancel(&self, id: &str) -> Result<Delegation, PaymentError>;

    /// 扣一期；执行器失败时返回 SettlementFailed 且记录不变
    async fn settle(&self, id: &str, now: Timestamp) -> Result<SettlementReceipt, PaymentError>;

    async fn due_status(&self, id: &str, now: Timestamp) -> Result<DueStatus, PaymentError> {
        let delegation = self.get(id).await?;
        Ok(due::due_status(&delegation, now))
    }

    /// 所有非终态委托（供定时扫描）
    async fn list_active(&self) -> Result<Vec<Delegation>, PaymentError>;

    /// 某付款方的全部委托，含已完成 / 已取消的历史
    async fn list_by_payer(&self, payer: &str) -> Result<Vec<Delegation>, PaymentError>;
}

/// 内存版注册表
pub struct InMemoryDelegationRegistry {
    records: RwLock<HashMap<DelegationId, Arc<Mutex<Delegation>>>>,
    sessions: Arc<SessionPool>,
    clock: Arc<dyn Clock>,
    limits: IntervalLimits,
}

impl InMemoryDelegationRegistry {
    pub fn new(sessions: Arc<SessionPool>, clock: Arc<dyn Clock>, limits: IntervalLimits) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            sessions,
            clock,
            limits,
        }
    }

    async fn entry(&self, id: &str) -> Result<Arc<Mutex<Delegation>>, PaymentError> {
        self.records
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| PaymentError::NotFound(id.to_string()))
    }

    async fn snapshots(&self) -> Vec<Delegation> {
        let entries: Vec<_> = self.records.read().await.values().cloned().collect();
        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            out.push(entry.lock().await.clone());
        }
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        out
    }

    async fn transition(
        &self,
        id: &str,
        action: &'static str,
        apply: impl FnOnce(&mut Delegation) -> Result<(), PaymentError> + Send,
    ) -> Result<Delegation, PaymentError> {
        let entry = self.entry(id).await?;
        let mut delegation = entry.lock().await;
        apply(&mut delegation)?;
        tracing::info!(delegation = %id, status = ?delegation.status, "Delegation {}", action);
        Ok(delegation.clone())
    }
}

#[async_trait]
impl DelegationRegistry for InMemoryDelegationRegistry {
    async fn create(&self, params: NewDelegation) -> Result<DelegationId, PaymentError> {
        params.validate(&self.limits)?;
        let id = format!("dlg_{}", uuid::Uuid::new_v4());
        let delegation = Delegation::from_params(id.clone(), params, self.clock.now());
        tracing::info!(
            delegation = %id,
            payer = %delegation.payer,
            recipient = %delegation.recipient,
            amount = %delegation.amount_per_interval,
            periods = delegation.periods_total,
            "Delegation created"
        );
        self.records
            .write()
            .await
            .insert(id.clone(), Arc::new(Mutex::new(delegation)));
        Ok(id)
    }

    async fn get(&self, id: &str) -> Result<Delegation, PaymentError> {
        let entry = self.entry(id).await?;
        let delegation = entry.lock().await.clone();
        Ok(delegation)
    }

    async fn pause(&self, id: &str) -> Result<Delegation, PaymentError> {
        self.transition(id, "paused", Delegation::pause).await
    }

    async fn resume(&self, id: &str) -> Result<Delegation, PaymentError> {
        self.transition(id, "resumed", Delegation::resume).await
    }

    async fn cancel(&self, id: &str) -> Result<Delegation, PaymentError> {
        self.transition(id, "cancelled", Delegation::cancel).await
    }

    async fn settle(&self, id: &str, now: Timestamp) -> Result<SettlementReceipt, PaymentError> {
        let entry = self.entry(id).await?;
        let mut delegation = entry.lock().await;
        delegation.check_settleable(now)?;

        let order = TransferOrder {
            payer: delegation.payer.clone(),
            recipient: delegation.recipient.clone(),
            asset: delegation.asset.clone(),
            domain: delegation.domain.clone(),
            amount: delegation.amount_per_interval,
        };
        let session = self.sessions.session_for(&order.payer);
        let flight = session.acquire_flight().await;
        let start = Instant::now();
        let result = session.executor().send(&order).await;
        drop(flight);

        let audit = serde_json::json!({
            "event": "settlement_audit",
            "delegation": id,
            "period": delegation.periods_settled() + 1,
            "recipient": order.recipient,
            "amount": order.amount.to_string(),
            "ok": result.is_ok(),
            "duration_ms": start.elapsed().as_millis() as u64,
        });
        tracing::info!(audit = %audit, "settlement");

        match result {
            Ok(receipt) => Ok(delegation.apply_settlement(now, receipt.receipt_id)),
            Err(reason) => {
                tracing::warn!(delegation = %id, error = %reason, "Settlement failed, state unchanged");
                Err(PaymentError::SettlementFailed {
                    id: id.to_string(),
                    recipient: order.recipient,
                    amount: order.amount,
                    reason,
                })
            }
        }
    }

    async fn list_active(&self) -> Result<Vec<Delegation>, PaymentError> {
        Ok(self
            .snapshots()
            .await
            .into_iter()
            .filter(Delegation::is_active)
            .collect())
    }

    async fn list_by_payer(&self, payer: &str) -> Result<Vec<Delegation>, PaymentError> {
        Ok(self
            .snapshots()
            .await
            .into_iter()
            .filter(|d| d.payer == payer)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{InMemoryBalanceOracle, ScriptedTransferExecutor};
    use crate::core::{ManualClock, TransferError};
    use crate::delegation::DelegationStatus;
    use rust_decimal::Decimal;

    fn params(start: Timestamp) -> NewDelegation {
        NewDelegation {
            payer: "alice".into(),
            recipient: "bob".into(),
            asset: "USDC".into(),
            domain: "base".into(),
            amount_per_interval: Decimal::new(2550, 2),
            total_amount: Decimal::new(7650, 2),
            start_time: start,
            interval_secs: 3_600,
            periods_total: 3,
        }
    }

    fn registry(executor: Arc<ScriptedTransferExecutor>) -> InMemoryDelegationRegistry {
        InMemoryDelegationRegistry::new(
            Arc::new(SessionPool::new(executor, Arc::new(InMemoryBalanceOracle::new()))),
            Arc::new(ManualClock::new(0)),
            IntervalLimits::default(),
        )
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_params() {
        let registry = registry(Arc::new(ScriptedTransferExecutor::new()));
        let mut p = params(0);
        p.recipient = "alice".into();
        assert!(matches!(
            registry.create(p).await,
            Err(PaymentError::InvalidParameters(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let registry = registry(Arc::new(ScriptedTransferExecutor::new()));
        assert!(matches!(registry.get("nope").await, Err(PaymentError::NotFound(_))));
        assert!(matches!(registry.settle("nope", 0).await, Err(PaymentError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_settle_twice_in_same_interval_only_once() {
        let executor = Arc::new(ScriptedTransferExecutor::new());
        let registry = registry(executor.clone());
        let id = registry.create(params(100)).await.unwrap();

        let receipt = registry.settle(&id, 100).await.unwrap();
        assert_eq!(receipt.period, 1);
        assert!(matches!(
            registry.settle(&id, 100).await,
            Err(PaymentError::InvalidState { .. })
        ));

        let d = registry.get(&id).await.unwrap();
        assert_eq!(d.periods_remaining, 2);
        assert_eq!(d.remaining_amount, Decimal::new(5100, 2));
        assert_eq!(executor.call_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_transfer_leaves_state_unchanged() {
        let executor = Arc::new(ScriptedTransferExecutor::new().fail_recipient("bob", "frozen"));
        let registry = registry(executor.clone());
        let id = registry.create(params(0)).await.unwrap();
        let before = registry.get(&id).await.unwrap();

        match registry.settle(&id, 10).await {
            Err(PaymentError::SettlementFailed { recipient, amount, reason, .. }) => {
                assert_eq!(recipient, "bob");
                assert_eq!(amount, Decimal::new(2550, 2));
                assert_eq!(reason, TransferError::Rejected("frozen".into()));
            }
            other => panic!("Expected SettlementFailed, got {other:?}"),
        }
        assert_eq!(registry.get(&id).await.unwrap(), before);

        // 下一次到期检查即为安全重试
        executor.set_failure("bob", None);
        assert!(registry.settle(&id, 20).await.is_ok());
    }

    #[tokio::test]
    async fn test_paused_delegation_cannot_settle() {
        let registry = registry(Arc::new(ScriptedTransferExecutor::new()));
        let id = registry.create(params(0)).await.unwrap();
        registry.pause(&id).await.unwrap();
        assert!(matches!(
            registry.settle(&id, 10).await,
            Err(PaymentError::InvalidState { .. })
        ));
        assert!(!registry.due_status(&id, 10).await.unwrap().is_due);
    }

    #[tokio::test]
    async fn test_history_kept_after_terminal_states() {
        let registry = registry(Arc::new(ScriptedTransferExecutor::new()));
        let a = registry.create(params(0)).await.unwrap();
        let b = registry.create(params(0)).await.unwrap();
        registry.cancel(&a).await.unwrap();

        let active = registry.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, b);

        let history = registry.list_by_payer("alice").await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history
            .iter()
            .any(|d| d.id == a && d.status == DelegationStatus::Cancelled));
        assert!(registry.list_by_payer("carol").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_settles_on_same_id_serialize() {
        let executor = Arc::new(
            ScriptedTransferExecutor::new().with_latency(std::time::Duration::from_millis(20)),
        );
        let registry = Arc::new(registry(executor.clone()));
        let id = registry.create(params(0)).await.unwrap();

        let r1 = registry.clone();
        let r2 = registry.clone();
        let (id1, id2) = (id.clone(), id.clone());
        let (a, b) = tokio::join!(
            async move { r1.settle(&id1, 0).await },
            async move { r2.settle(&id2, 0).await }
        );

        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        assert_eq!(executor.call_count(), 1);
        assert_eq!(registry.get(&id).await.unwrap().periods_remaining, 2);
    }
}
