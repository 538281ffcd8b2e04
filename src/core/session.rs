//! 支付会话：显式的付款方上下文
//!
//! 持有付款方地址、Transfer Executor、Balance Oracle 与单飞锁（single-flight）。
//! 同一会话上的分账批次串行执行，避免共享签名者 / nonce 冲突；不同会话互不影响。
//! SessionPool 按付款方复用会话，定期扣款与分账批次因此共用同一把单飞锁。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::contracts::{Address, BalanceOracle, TransferExecutor};

/// 付款方会话；clone 后共享同一把单飞锁
#[derive(Clone)]
pub struct PaymentSession {
    payer: Address,
    executor: Arc<dyn TransferExecutor>,
    oracle: Arc<dyn BalanceOracle>,
    flight: Arc<Mutex<()>>,
}

impl PaymentSession {
    pub fn new(
        payer: impl Into<Address>,
        executor: Arc<dyn TransferExecutor>,
        oracle: Arc<dyn BalanceOracle>,
    ) -> Self {
        Self {
            payer: payer.into(),
            executor,
            oracle,
            flight: Arc::new(Mutex::new(())),
        }
    }

    pub fn payer(&self) -> &str {
        &self.payer
    }

    pub fn executor(&self) -> &Arc<dyn TransferExecutor> {
        &self.executor
    }

    pub fn oracle(&self) -> &Arc<dyn BalanceOracle> {
        &self.oracle
    }

    /// 获取单飞许可；持有期间同会话的其它批次等待
    pub async fn acquire_flight(&self) -> OwnedMutexGuard<()> {
        self.flight.clone().lock_owned().await
    }

    /// 当前是否有批次在执行
    pub fn is_busy(&self) -> bool {
        self.flight.try_lock().is_err()
    }
}

impl std::fmt::Debug for PaymentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentSession")
            .field("payer", &self.payer)
            .field("busy", &self.is_busy())
            .finish()
    }
}

/// 按付款方地址复用会话
pub struct SessionPool {
    executor: Arc<dyn TransferExecutor>,
    oracle: Arc<dyn BalanceOracle>,
    sessions: std::sync::Mutex<HashMap<Address, PaymentSession>>,
}

impl SessionPool {
    pub fn new(executor: Arc<dyn TransferExecutor>, oracle: Arc<dyn BalanceOracle>) -> Self {
        Self {
            executor,
            oracle,
            sessions: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// 取该付款方的会话，不存在则创建；返回的 clone 共享单飞锁
    pub fn session_for(&self, payer: &str) -> PaymentSession {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions
            .entry(payer.to_string())
            .or_insert_with(|| {
                PaymentSession::new(payer, Arc::clone(&self.executor), Arc::clone(&self.oracle))
            })
            .clone()
    }
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let payers = self
            .sessions
            .lock()
            .map(|s| s.len())
            .unwrap_or_default();
        f.debug_struct("SessionPool").field("payers", &payers).finish()
    }
}
