//! 到期计算器：对任意委托快照的纯函数

use serde::{Deserialize, Serialize};

use crate::core::Timestamp;
use crate::delegation::Delegation;

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

/// 到期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DueStatus {
    pub is_due: bool,
    pub time_until_due_secs: u64,
    pub next_payment_time: Timestamp,
}

impl DueStatus {
    /// 面向展示的描述，如 "due now" / "2d 3h"
    pub fn describe(&self) -> String {
        format_time_until(self.time_until_due_secs)
    }
}

pub fn is_due(d: &Delegation, now: Timestamp) -> bool {
    d.is_active() && !d.is_paused() && now >= d.next_payment_time()
}

pub fn time_until_due(d: &Delegation, now: Timestamp) -> u64 {
    u64::try_from(d.next_payment_time().saturating_sub(now)).unwrap_or(0)
}

pub fn due_status(d: &Delegation, now: Timestamp) -> DueStatus {
    DueStatus {
        is_due: is_due(d, now),
        time_until_due_secs: time_until_due(d, now),
        next_payment_time: d.next_payment_time(),
    }
}

/// 粗粒度剩余时间：天/小时、小时/分钟或分钟
pub fn format_time_until(secs: u64) -> String {
    if secs == 0 {
        return "due now".to_string();
    }
    if secs >= DAY {
        format!("{}d {}h", secs / DAY, (secs % DAY) / HOUR)
    } else if secs >= HOUR {
        format!("{}h {}m", secs / HOUR, (secs % HOUR) / MINUTE)
    } else {
        format!("{}m", (secs / MINUTE).max(1))
    }
}
