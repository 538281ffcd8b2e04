//! 外部协作方共享的数据类型

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core::{PaymentError, Timestamp};

/// 账户地址（不透明字符串）
pub type Address = String;
/// 资产（代币）标识
pub type AssetId = String;
/// 结算域（链）
pub type Domain = String;
/// 金额，以资产的展示单位计
pub type Amount = Decimal;

/// 单个结算域上的可用余额
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainBalance {
    pub domain: Domain,
    pub amount: Amount,
}

/// 统一余额：某资产在所有结算域上的合计及明细
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnifiedBalance {
    pub asset: AssetId,
    pub total: Amount,
    pub by_domain: Vec<DomainBalance>,
}

impl UnifiedBalance {
    /// 各域余额求和；合计溢出说明预言机数据不可信，按不可用处理
    pub fn from_domains(
        asset: impl Into<AssetId>,
        by_domain: Vec<DomainBalance>,
    ) -> Result<Self, PaymentError> {
        let asset = asset.into();
        let total = by_domain
            .iter()
            .try_fold(Decimal::ZERO, |acc, b| acc.checked_add(b.amount))
            .ok_or_else(|| {
                PaymentError::OracleUnavailable(format!("{asset} balance overflows across domains"))
            })?;
        Ok(Self {
            asset,
            total,
            by_domain,
        })
    }

    pub fn covers(&self, required: Amount) -> bool {
        self.total >= required
    }
}

/// 一笔转账指令
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOrder {
    pub payer: Address,
    pub recipient: Address,
    pub asset: AssetId,
    pub domain: Domain,
    pub amount: Amount,
}

/// 转账成功回执
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub receipt_id: String,
}

/// 一次分账批次的汇总贡献记录（唯一需要外部持久化的内容）
///
/// `settled_total` 只统计成功的转账；`requested_total` 保留原始请求金额用于审计。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributionRecord {
    pub batch_id: String,
    pub payer: Address,
    pub asset: AssetId,
    pub domain: Domain,
    pub requested_total: Amount,
    pub settled_total: Amount,
    pub succeeded: usize,
    pub failed: usize,
    pub receipt_ids: Vec<String>,
    pub recorded_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unified_balance_sums_domains() {
        let balance = UnifiedBalance::from_domains(
            "USDC",
            vec![
                DomainBalance {
                    domain: "base".into(),
                    amount: Decimal::new(3050, 2),
                },
                DomainBalance {
                    domain: "arbitrum".into(),
                    amount: Decimal::new(1950, 2),
                },
            ],
        )
        .unwrap();
        assert_eq!(balance.total, Decimal::from(50));
        assert!(balance.covers(Decimal::from(50)));
        assert!(!balance.covers(Decimal::new(5001, 2)));
    }

    #[test]
    fn test_overflowing_domain_total_is_oracle_error() {
        let huge = |domain: &str| DomainBalance {
            domain: domain.into(),
            amount: Decimal::MAX,
        };
        let result = UnifiedBalance::from_domains("USDC", vec![huge("base"), huge("arbitrum")]);
        assert!(matches!(result, Err(PaymentError::OracleUnavailable(_))));
    }
}
