//! 持久化：分账批次的汇总贡献记录

pub mod contribution_store;

pub use contribution_store::JsonlContributionStore;
