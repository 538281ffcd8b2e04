//! 内存版协作方（用于测试与本地运行，无需真实链 / 钱包）
//!
//! - InMemoryBalanceOracle：按资产、结算域配置余额
//! - ScriptedTransferExecutor：按收款人脚本化失败、模拟未就绪与延迟，并记录所有调用
//! - InMemoryContributionSink：收集贡献记录

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::contracts::{
    Amount, AssetId, BalanceOracle, ContributionRecord, ContributionSink, DomainBalance,
    TransferExecutor, TransferOrder, TransferReceipt, UnifiedBalance,
};
use crate::core::{PaymentError, StoreError, TransferError};

/// 内存余额预言机；未配置的资产余额为 0
#[derive(Debug, Default)]
pub struct InMemoryBalanceOracle {
    balances: RwLock<HashMap<AssetId, Vec<DomainBalance>>>,
    queries: AtomicUsize,
}

impl InMemoryBalanceOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balance(mut self, asset: &str, domain: &str, amount: Amount) -> Self {
        upsert(self.balances.get_mut(), asset, domain, amount);
        self
    }

    pub async fn set_balance(&self, asset: &str, domain: &str, amount: Amount) {
        upsert(&mut *self.balances.write().await, asset, domain, amount);
    }

    /// 被查询次数
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

fn upsert(map: &mut HashMap<AssetId, Vec<DomainBalance>>, asset: &str, domain: &str, amount: Amount) {
    let entries = map.entry(asset.to_string()).or_default();
    match entries.iter_mut().find(|b| b.domain == domain) {
        Some(existing) => existing.amount = amount,
        None => entries.push(DomainBalance {
            domain: domain.to_string(),
            amount,
        }),
    }
}

#[async_trait]
impl BalanceOracle for InMemoryBalanceOracle {
    async fn get_available(&self, asset: &str) -> Result<UnifiedBalance, PaymentError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let by_domain = self
            .balances
            .read()
            .await
            .get(asset)
            .cloned()
            .unwrap_or_default();
        UnifiedBalance::from_domains(asset, by_domain)
    }
}

/// 可脚本化的转账执行器
#[derive(Debug)]
pub struct ScriptedTransferExecutor {
    failures: Mutex<HashMap<String, TransferError>>,
    calls: Mutex<Vec<TransferOrder>>,
    ready: AtomicBool,
    /// reinitialize 是否能恢复就绪
    recoverable: bool,
    reinitializations: AtomicUsize,
    latency: Option<Duration>,
}

impl Default for ScriptedTransferExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedTransferExecutor {
    pub fn new() -> Self {
        Self {
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            ready: AtomicBool::new(true),
            recoverable: true,
            reinitializations: AtomicUsize::new(0),
            latency: None,
        }
    }

    /// 发往该收款人的转账一律失败
    pub fn fail_recipient(self, recipient: &str, reason: &str) -> Self {
        self.set_failure(recipient, Some(TransferError::Rejected(reason.to_string())));
        self
    }

    /// 初始未就绪；recoverable 为 false 时 reinitialize 也无法恢复
    pub fn not_ready(mut self, recoverable: bool) -> Self {
        self.ready = AtomicBool::new(false);
        self.recoverable = recoverable;
        self
    }

    /// 每次 send 的模拟耗时
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// 运行时切换某收款人的失败脚本（None 表示恢复正常）
    pub fn set_failure(&self, recipient: &str, failure: Option<TransferError>) {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        match failure {
            Some(err) => {
                failures.insert(recipient.to_string(), err);
            }
            None => {
                failures.remove(recipient);
            }
        }
    }

    /// 模拟会话掉线 / 恢复
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// 已收到的全部转账指令（含失败的）
    pub fn calls(&self) -> Vec<TransferOrder> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn reinitializations(&self) -> usize {
        self.reinitializations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransferExecutor for ScriptedTransferExecutor {
    async fn send(&self, order: &TransferOrder) -> Result<TransferReceipt, TransferError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(order.clone());

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if !self.ready.load(Ordering::SeqCst) {
            return Err(TransferError::NotReady);
        }

        let failure = self
            .failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&order.recipient)
            .cloned();
        match failure {
            Some(err) => Err(err),
            None => Ok(TransferReceipt {
                receipt_id: format!("rcpt_{}", uuid::Uuid::new_v4()),
            }),
        }
    }

    async fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn reinitialize(&self) -> Result<(), TransferError> {
        self.reinitializations.fetch_add(1, Ordering::SeqCst);
        if self.recoverable {
            self.ready.store(true, Ordering::SeqCst);
            Ok(())
        } else {
            Err(TransferError::Other("session could not be restored".into()))
        }
    }
}

/// 内存贡献记录
#[derive(Debug, Default)]
pub struct InMemoryContributionSink {
    records: RwLock<Vec<ContributionRecord>>,
}

impl InMemoryContributionSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<ContributionRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl ContributionSink for InMemoryContributionSink {
    async fn record(&self, record: &ContributionRecord) -> Result<(), StoreError> {
        self.records.write().await.push(record.clone());
        Ok(())
    }
}
