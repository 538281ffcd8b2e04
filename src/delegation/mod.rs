//! 定期委托：状态机、到期计算、注册表与调度器

pub mod due;
pub mod registry;
pub mod scheduler;
pub mod types;

pub use due::{format_time_until, DueStatus};
pub use registry::{DelegationRegistry, InMemoryDelegationRegistry};
pub use scheduler::{DueEvent, RecurringScheduler, SchedulerEvent, SchedulerHandle};
pub use types::{
    Delegation, DelegationId, DelegationStatus, IntervalLimits, NewDelegation, SettlementReceipt,
};
