//! 委托类型与状态机
//!
//! 状态：Active / Paused / Completed / Cancelled，后两者为终态。
//! 只有 Registry 调用这里的变更方法；记录永不删除，终态后仍可查询。

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::contracts::{Address, Amount, AssetId, Domain};
use crate::core::{PaymentError, Timestamp};

pub type DelegationId = String;

/// 委托状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DelegationStatus {
    Active,
    Paused,
    /// 所有期数已扣完
    Completed,
    /// 付款方撤销，不可恢复
    Cancelled,
}

impl DelegationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

/// 周期间隔的允许范围（秒）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalLimits {
    pub min_secs: u64,
    pub max_secs: u64,
}

impl Default for IntervalLimits {
    fn default() -> Self {
        Self {
            min_secs: 60,
            max_secs: 365 * 24 * 3600,
        }
    }
}

/// 创建委托的参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDelegation {
    pub payer: Address,
    pub recipient: Address,
    pub asset: AssetId,
    pub domain: Domain,
    pub amount_per_interval: Amount,
    pub total_amount: Amount,
    pub start_time: Timestamp,
    pub interval_secs: u64,
    pub periods_total: u32,
}

impl NewDelegation {
    /// 校验创建参数；任一不满足返回 InvalidParameters
    pub fn validate(&self, limits: &IntervalLimits) -> Result<(), PaymentError> {
        let invalid = |msg: String| Err(PaymentError::InvalidParameters(msg));

        if self.payer.trim().is_empty() || self.recipient.trim().is_empty() {
            return invalid("payer and recipient must be non-empty".into());
        }
        if self.payer == self.recipient {
            return invalid(format!("payer and recipient are the same address ({})", self.payer));
        }
        if self.amount_per_interval <= Decimal::ZERO {
            return invalid(format!(
                "amount per interval must be positive, got {}",
                self.amount_per_interval
            ));
        }
        if self.total_amount <= Decimal::ZERO {
            return invalid(format!("total amount must be positive, got {}", self.total_amount));
        }
        if self.periods_total == 0 {
            return invalid("periods total must be positive".into());
        }
        if self.interval_secs < limits.min_secs || self.interval_secs > limits.max_secs {
            return invalid(format!(
                "interval {}s outside [{}s, {}s]",
                self.interval_secs, limits.min_secs, limits.max_secs
            ));
        }
        let expected = self
            .amount_per_interval
            .checked_mul(Decimal::from(self.periods_total));
        if expected != Some(self.total_amount) {
            return invalid(format!(
                "total amount {} != {} x {} periods",
                self.total_amount, self.amount_per_interval, self.periods_total
            ));
        }
        Ok(())
    }
}

/// 一条定期委托记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    pub id: DelegationId,
    pub payer: Address,
    pub recipient: Address,
    pub asset: AssetId,
    pub domain: Domain,
    pub amount_per_interval: Amount,
    pub total_amount: Amount,
    /// 每次成功扣款精确减少 amount_per_interval
    pub remaining_amount: Amount,
    pub interval_secs: u64,
    pub start_time: Timestamp,
    pub periods_total: u32,
    pub periods_remaining: u32,
    pub status: DelegationStatus,
    pub created_at: Timestamp,
    pub last_settled_at: Option<Timestamp>,
    pub last_receipt_id: Option<String>,
}

/// 一次成功扣款的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementReceipt {
    pub delegation_id: DelegationId,
    /// 本次是第几期（从 1 开始）
    pub period: u32,
    pub amount: Amount,
    pub receipt_id: String,
    pub settled_at: Timestamp,
    pub remaining_amount: Amount,
    pub periods_remaining: u32,
    pub completed: bool,
}

impl Delegation {
    pub(crate) fn from_params(id: DelegationId, params: NewDelegation, created_at: Timestamp) -> Self {
        Self {
            id,
            remaining_amount: params.total_amount,
            periods_remaining: params.periods_total,
            payer: params.payer,
            recipient: params.recipient,
            asset: params.asset,
            domain: params.domain,
            amount_per_interval: params.amount_per_interval,
            total_amount: params.total_amount,
            interval_secs: params.interval_secs,
            start_time: params.start_time,
            periods_total: params.periods_total,
            status: DelegationStatus::Active,
            created_at,
            last_settled_at: None,
            last_receipt_id: None,
        }
    }

    /// 暂停也算 active（isActive 标志），只有终态不是
    pub fn is_active(&self) -> bool {
        matches!(self.status, DelegationStatus::Active | DelegationStatus::Paused)
    }

    pub fn is_paused(&self) -> bool {
        self.status == DelegationStatus::Paused
    }

    pub fn periods_settled(&self) -> u32 {
        self.periods_total - self.periods_remaining
    }

    /// startTime + 已扣期数 × interval
    pub fn next_payment_time(&self) -> Timestamp {
        let elapsed = i64::from(self.periods_settled())
            .saturating_mul(i64::try_from(self.interval_secs).unwrap_or(i64::MAX));
        self.start_time.saturating_add(elapsed)
    }

    pub(crate) fn pause(&mut self) -> Result<(), PaymentError> {
        match self.status {
            DelegationStatus::Active => {
                self.status = DelegationStatus::Paused;
                Ok(())
            }
            other => Err(PaymentError::invalid_state(
                &self.id,
                format!("cannot pause a {other:?} delegation"),
            )),
        }
    }

    pub(crate) fn resume(&mut self) -> Result<(), PaymentError> {
        match self.status {
            DelegationStatus::Paused => {
                self.status = DelegationStatus::Active;
                Ok(())
            }
            other => Err(PaymentError::invalid_state(
                &self.id,
                format!("cannot resume a {other:?} delegation"),
            )),
        }
    }

    pub(crate) fn cancel(&mut self) -> Result<(), PaymentError> {
        if self.status.is_terminal() {
            return Err(PaymentError::invalid_state(
                &self.id,
                format!("cannot cancel a {:?} delegation", self.status),
            ));
        }
        self.status = DelegationStatus::Cancelled;
        Ok(())
    }

    /// 扣款前置条件：Active、未暂停、已到期
    pub(crate) fn check_settleable(&self, now: Timestamp) -> Result<(), PaymentError> {
        if self.status != DelegationStatus::Active {
            return Err(PaymentError::invalid_state(
                &self.id,
                format!("cannot settle a {:?} delegation", self.status),
            ));
        }
        if now < self.next_payment_time() {
            return Err(PaymentError::invalid_state(
                &self.id,
                format!("payment not due until {}", self.next_payment_time()),
            ));
        }
        Ok(())
    }

    /// 执行器确认成功后才调用；扣完最后一期转为 Completed
    pub(crate) fn apply_settlement(&mut self, now: Timestamp, receipt_id: String) -> SettlementReceipt {
        self.remaining_amount -= self.amount_per_interval;
        self.periods_remaining -= 1;
        self.last_settled_at = Some(now);
        self.last_receipt_id = Some(receipt_id.clone());
        if self.periods_remaining == 0 {
            self.status = DelegationStatus::Completed;
        }
        SettlementReceipt {
            delegation_id: self.id.clone(),
            period: self.periods_settled(),
            amount: self.amount_per_interval,
            receipt_id,
            settled_at: now,
            remaining_amount: self.remaining_amount,
            periods_remaining: self.periods_remaining,
            completed: self.status == DelegationStatus::Completed,
        }
    }
}
