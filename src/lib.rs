//! Payflow - 定期委托支付调度与多收款人分账编排
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **contracts**: 外部协作方契约（余额预言机、转账执行器、贡献记录）与内存实现
//! - **core**: 错误类型、时间源、支付会话、优雅关闭
//! - **delegation**: 委托状态机、到期计算、注册表、定期调度器
//! - **distribution**: 分账计划解析、余额校验、串行执行与报告
//! - **observability**: 日志初始化
//! - **persistence**: 贡献记录落盘（JSON Lines）

pub mod config;
pub mod contracts;
pub mod core;
pub mod delegation;
pub mod distribution;
pub mod observability;
pub mod persistence;

pub use crate::core::{PaymentError, PaymentSession};
pub use delegation::RecurringScheduler;
pub use distribution::DistributionOrchestrator;
