//! 分账计划解析与校验（同步纯函数）

use rust_decimal::Decimal;

use crate::core::PaymentError;
use crate::distribution::{DistributionRequest, SplitEntry, SplitMode, SplitPlan};

/// 分账合计与请求总额允许的绝对误差：0.01 个展示单位
pub fn amount_tolerance() -> Decimal {
    Decimal::new(1, 2)
}

/// 解析并校验分账计划；任何错误都在转账之前返回
pub fn resolve_plan(request: &DistributionRequest) -> Result<SplitPlan, PaymentError> {
    if request.total_amount <= Decimal::ZERO {
        return Err(PaymentError::InvalidParameters(format!(
            "total amount must be positive, got {}",
            request.total_amount
        )));
    }

    let recipients: Vec<_> = request
        .recipients
        .iter()
        .filter(|r| !r.address.trim().is_empty())
        .collect();
    if recipients.is_empty() {
        return Err(PaymentError::NoValidRecipients);
    }
    if let Some(negative) = recipients.iter().find(|r| r.share < Decimal::ZERO) {
        return Err(PaymentError::InvalidParameters(format!(
            "negative share {} for {}",
            negative.share, negative.address
        )));
    }

    let total = request.total_amount;
    let count = Decimal::from(recipients.len());
    let entries = recipients
        .into_iter()
        .map(|r| {
            let amount = match request.mode {
                SplitMode::Equal => total.checked_div(count),
                SplitMode::Percent => (r.share / Decimal::ONE_HUNDRED).checked_mul(total),
                SplitMode::Custom => Some(r.share),
            };
            amount
                .map(|amount| SplitEntry {
                    recipient: r.address.trim().to_string(),
                    amount,
                })
                .ok_or_else(|| {
                    PaymentError::InvalidParameters(format!(
                        "amount for {} overflows (share {}, total {})",
                        r.address, r.share, total
                    ))
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let plan = SplitPlan { total, entries };
    validate_plan(&plan)?;
    Ok(plan)
}

/// 合计必须在误差范围内等于总额
pub fn validate_plan(plan: &SplitPlan) -> Result<(), PaymentError> {
    let resolved = plan.sum().ok_or_else(|| {
        PaymentError::InvalidParameters(format!(
            "split amounts overflow (expected total {})",
            plan.total
        ))
    })?;
    let tolerance = amount_tolerance();
    let within = resolved
        .checked_sub(plan.total)
        .map(|diff| diff.abs() <= tolerance)
        .unwrap_or(false);
    if !within {
        return Err(PaymentError::AmountMismatch {
            expected: plan.total,
            resolved,
            tolerance,
        });
    }
    Ok(())
}
