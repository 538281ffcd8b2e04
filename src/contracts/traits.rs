//! 外部协作方抽象
//!
//! Balance Oracle、Transfer Executor、贡献记录落盘都是外部系统；核心只依赖这些 trait。
//! 网络调用是唯一的挂起点，其余（分账计算、到期计算）都是同步纯函数。

use async_trait::async_trait;

use crate::contracts::{ContributionRecord, TransferOrder, TransferReceipt, UnifiedBalance};
use crate::core::{PaymentError, StoreError, TransferError};

/// 余额预言机：报告付款方某资产的统一余额
#[async_trait]
pub trait BalanceOracle: Send + Sync {
    async fn get_available(&self, asset: &str) -> Result<UnifiedBalance, PaymentError>;
}

/// 转账执行器
#[async_trait]
pub trait TransferExecutor: Send + Sync {
    /// 尝试转账；失败时返回具体原因
    async fn send(&self, order: &TransferOrder) -> Result<TransferReceipt, TransferError>;

    /// 会话（签名者 / SDK）是否就绪
    async fn is_ready(&self) -> bool {
        true
    }

    /// 重新初始化会话；调用方只做一次有界重试
    async fn reinitialize(&self) -> Result<(), TransferError> {
        Ok(())
    }
}

/// 分账批次汇总记录的持久化
#[async_trait]
pub trait ContributionSink: Send + Sync {
    async fn record(&self, record: &ContributionRecord) -> Result<(), StoreError>;
}
