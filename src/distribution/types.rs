//! 分账类型：请求、分账计划、单笔转账记录与批次报告

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::contracts::{Address, Amount, AssetId, ContributionRecord, Domain};
use crate::core::{Timestamp, TransferError};

/// 分账模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitMode {
    /// 总额平均分配，share 被忽略
    Equal,
    /// share 为百分比
    Percent,
    /// share 即金额
    Custom,
}

impl std::str::FromStr for SplitMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "equal" => Ok(Self::Equal),
            "percent" => Ok(Self::Percent),
            "custom" => Ok(Self::Custom),
            other => Err(format!("unknown split mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientShare {
    pub address: Address,
    pub share: Amount,
}

/// 一次分账请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionRequest {
    pub total_amount: Amount,
    pub asset: AssetId,
    pub domain: Domain,
    pub recipients: Vec<RecipientShare>,
    pub mode: SplitMode,
}

impl DistributionRequest {
    pub fn new(
        total_amount: Amount,
        asset: impl Into<AssetId>,
        domain: impl Into<Domain>,
        mode: SplitMode,
    ) -> Self {
        Self {
            total_amount,
            asset: asset.into(),
            domain: domain.into(),
            recipients: Vec::new(),
            mode,
        }
    }

    pub fn recipient(mut self, address: impl Into<Address>, share: Amount) -> Self {
        self.recipients.push(RecipientShare {
            address: address.into(),
            share,
        });
        self
    }

    /// equal 模式下的收款人（share 无意义）
    pub fn equal_recipient(self, address: impl Into<Address>) -> Self {
        self.recipient(address, Decimal::ZERO)
    }
}

/// 分账计划中的一项
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitEntry {
    pub recipient: Address,
    pub amount: Amount,
}

/// 解析后的分账计划（不持久化）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitPlan {
    pub total: Amount,
    pub entries: Vec<SplitEntry>,
}

impl SplitPlan {
    /// 各项合计；溢出时返回 None
    pub fn sum(&self) -> Option<Amount> {
        self.entries
            .iter()
            .try_fold(Decimal::ZERO, |acc, e| acc.checked_add(e.amount))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptStatus {
    Pending,
    Succeeded,
    Failed,
}

/// 单个收款人的转账记录；执行期间只变更一次
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferAttempt {
    pub index: usize,
    pub recipient: Address,
    pub amount: Amount,
    pub status: AttemptStatus,
    pub error: Option<TransferError>,
    pub receipt_id: Option<String>,
}

impl TransferAttempt {
    pub(crate) fn pending(index: usize, entry: &SplitEntry) -> Self {
        Self {
            index,
            recipient: entry.recipient.clone(),
            amount: entry.amount,
            status: AttemptStatus::Pending,
            error: None,
            receipt_id: None,
        }
    }

    pub(crate) fn succeed(&mut self, receipt_id: String) {
        self.status = AttemptStatus::Succeeded;
        self.receipt_id = Some(receipt_id);
    }

    pub(crate) fn fail(&mut self, error: TransferError) {
        self.status = AttemptStatus::Failed;
        self.error = Some(error);
    }
}

/// 失败明细：序号、收款人、金额、原因
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedAttempt {
    pub index: usize,
    pub recipient: Address,
    pub amount: Amount,
    pub reason: String,
}

/// 分账批次报告
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionReport {
    pub batch_id: String,
    pub payer: Address,
    pub asset: AssetId,
    pub domain: Domain,
    pub requested_total: Amount,
    pub attempts: Vec<TransferAttempt>,
    pub started_at: Timestamp,
    pub finished_at: Option<Timestamp>,
    pub timed_out: bool,
    /// 至少一笔成功时生成的汇总贡献记录
    pub contribution: Option<ContributionRecord>,
    /// 汇总记录落盘失败的原因
    pub persist_error: Option<String>,
}

impl DistributionReport {
    pub(crate) fn new(
        payer: &str,
        request: &DistributionRequest,
        plan: &SplitPlan,
        started_at: Timestamp,
    ) -> Self {
        Self {
            batch_id: format!("batch_{}", uuid::Uuid::new_v4()),
            payer: payer.to_string(),
            asset: request.asset.clone(),
            domain: request.domain.clone(),
            requested_total: request.total_amount,
            attempts: plan
                .entries
                .iter()
                .enumerate()
                .map(|(i, e)| TransferAttempt::pending(i, e))
                .collect(),
            started_at,
            finished_at: None,
            timed_out: false,
            contribution: None,
            persist_error: None,
        }
    }

    fn count(&self, status: AttemptStatus) -> usize {
        self.attempts.iter().filter(|a| a.status == status).count()
    }

    pub fn succeeded_count(&self) -> usize {
        self.count(AttemptStatus::Succeeded)
    }

    pub fn failed_count(&self) -> usize {
        self.count(AttemptStatus::Failed)
    }

    /// 超时未执行的
    pub fn pending_count(&self) -> usize {
        self.count(AttemptStatus::Pending)
    }

    /// 未成功（失败 + 未执行）
    pub fn unsettled_count(&self) -> usize {
        self.attempts.len() - self.succeeded_count()
    }

    /// 实际转出的金额
    pub fn settled_total(&self) -> Amount {
        self.attempts
            .iter()
            .filter(|a| a.status == AttemptStatus::Succeeded)
            .map(|a| a.amount)
            .sum()
    }

    pub fn failures(&self) -> Vec<FailedAttempt> {
        self.attempts
            .iter()
            .filter(|a| a.status == AttemptStatus::Failed)
            .map(|a| FailedAttempt {
                index: a.index,
                recipient: a.recipient.clone(),
                amount: a.amount,
                reason: a
                    .error
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown error".to_string()),
            })
            .collect()
    }

    pub fn failure_summary(&self) -> String {
        self.failures()
            .iter()
            .map(|f| format!("#{} {} ({}): {}", f.index, f.recipient, f.amount, f.reason))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// 只覆盖未成功收款人的重试请求（custom 模式，金额沿用本批次解析结果）；
    /// 全部成功时返回 None。整批重提会重复支付已成功的收款人。
    pub fn retry_request(&self) -> Option<DistributionRequest> {
        let remaining: Vec<_> = self
            .attempts
            .iter()
            .filter(|a| a.status != AttemptStatus::Succeeded)
            .collect();
        if remaining.is_empty() {
            return None;
        }
        let mut request = DistributionRequest::new(
            remaining.iter().map(|a| a.amount).sum(),
            self.asset.clone(),
            self.domain.clone(),
            SplitMode::Custom,
        );
        for attempt in remaining {
            request = request.recipient(attempt.recipient.clone(), attempt.amount);
        }
        Some(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> DistributionReport {
        let request = DistributionRequest::new(Decimal::from(60), "USDC", "base", SplitMode::Custom)
            .recipient("a", Decimal::from(10))
            .recipient("b", Decimal::from(20))
            .recipient("c", Decimal::from(30));
        let plan = SplitPlan {
            total: Decimal::from(60),
            entries: request
                .recipients
                .iter()
                .map(|r| SplitEntry {
                    recipient: r.address.clone(),
                    amount: r.share,
                })
                .collect(),
        };
        DistributionReport::new("payer", &request, &plan, 0)
    }

    #[test]
    fn test_split_mode_from_str() {
        assert_eq!("Equal".parse::<SplitMode>().unwrap(), SplitMode::Equal);
        assert_eq!(" percent ".parse::<SplitMode>().unwrap(), SplitMode::Percent);
        assert!("ratio".parse::<SplitMode>().is_err());
    }

    #[test]
    fn test_report_counts_and_failures() {
        let mut r = report();
        r.attempts[0].succeed("r0".into());
        r.attempts[1].fail(TransferError::Rejected("nonce too low".into()));

        assert_eq!(r.succeeded_count(), 1);
        assert_eq!(r.failed_count(), 1);
        assert_eq!(r.pending_count(), 1);
        assert_eq!(r.settled_total(), Decimal::from(10));

        let failures = r.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].index, 1);
        assert_eq!(failures[0].recipient, "b");
        assert!(r.failure_summary().contains("nonce too low"));
    }

    #[test]
    fn test_retry_request_excludes_succeeded() {
        let mut r = report();
        r.attempts[0].succeed("r0".into());
        r.attempts[1].fail(TransferError::TimedOut);

        let retry = r.retry_request().unwrap();
        assert_eq!(retry.mode, SplitMode::Custom);
        assert_eq!(retry.total_amount, Decimal::from(50));
        let addresses: Vec<_> = retry.recipients.iter().map(|r| r.address.as_str()).collect();
        assert_eq!(addresses, vec!["b", "c"]);
    }

    #[test]
    fn test_retry_request_none_when_all_succeeded() {
        let mut r = report();
        for (i, a) in r.attempts.iter_mut().enumerate() {
            a.succeed(format!("r{i}"));
        }
        assert!(r.retry_request().is_none());
    }
}
