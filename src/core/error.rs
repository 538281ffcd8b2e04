//! 支付错误类型
//!
//! 校验类错误（InvalidParameters / AmountMismatch / NoValidRecipients / InsufficientUnifiedBalance）
//! 在任何外部副作用之前返回；执行类错误（TransferError）按单笔转账记录，不中断批次。

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::contracts::{Address, AssetId};
use crate::delegation::DelegationId;
use crate::distribution::DistributionReport;

/// 调度器与分账编排器对调用方暴露的错误
#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Invalid state for delegation {id}: {reason}")]
    InvalidState { id: DelegationId, reason: String },

    #[error("Delegation not found: {0}")]
    NotFound(DelegationId),

    #[error("Insufficient unified balance of {asset}: available {available}, required {required}")]
    InsufficientUnifiedBalance {
        asset: AssetId,
        available: Decimal,
        required: Decimal,
    },

    #[error("Split amounts sum to {resolved}, expected {expected} (tolerance {tolerance})")]
    AmountMismatch {
        expected: Decimal,
        resolved: Decimal,
        tolerance: Decimal,
    },

    #[error("No valid recipients")]
    NoValidRecipients,

    /// 单期扣款失败：委托记录未被修改，下一次到期检查可安全重试
    #[error("Settlement of delegation {id} failed ({amount} to {recipient}): {reason}")]
    SettlementFailed {
        id: DelegationId,
        recipient: Address,
        amount: Decimal,
        reason: TransferError,
    },

    /// 批次超出墙钟预算；已完成的转账记录保留在 report 中
    #[error("Distribution timed out after {budget_secs}s ({} succeeded, {} not completed)", .report.succeeded_count(), .report.unsettled_count())]
    Timeout {
        budget_secs: u64,
        report: Box<DistributionReport>,
    },

    #[error("All {} transfers failed: {}", .report.attempts.len(), .report.failure_summary())]
    AllTransfersFailed { report: Box<DistributionReport> },

    #[error("Balance oracle unavailable: {0}")]
    OracleUnavailable(String),
}

impl PaymentError {
    pub(crate) fn invalid_state(id: &str, reason: impl Into<String>) -> Self {
        Self::InvalidState {
            id: id.to_string(),
            reason: reason.into(),
        }
    }

    /// 批次执行后的错误携带的报告（Timeout / AllTransfersFailed），用于重试剩余收款人
    pub fn report(&self) -> Option<&DistributionReport> {
        match self {
            Self::Timeout { report, .. } | Self::AllTransfersFailed { report } => Some(report),
            _ => None,
        }
    }
}

/// Transfer Executor 返回的单笔转账错误
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferError {
    #[error("Executor not ready")]
    NotReady,

    #[error("Transfer rejected: {0}")]
    Rejected(String),

    #[error("Transfer timed out")]
    TimedOut,

    #[error("Executor error: {0}")]
    Other(String),
}

/// 贡献记录持久化错误
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Background task failed: {0}")]
    Join(String),
}
