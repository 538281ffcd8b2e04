//! 多收款人分账：计划解析、余额校验、串行执行与报告

pub mod orchestrator;
pub mod split;
pub mod types;

pub use orchestrator::DistributionOrchestrator;
pub use split::{amount_tolerance, resolve_plan, validate_plan};
pub use types::{
    AttemptStatus, DistributionReport, DistributionRequest, FailedAttempt, RecipientShare,
    SplitEntry, SplitMode, SplitPlan, TransferAttempt,
};
