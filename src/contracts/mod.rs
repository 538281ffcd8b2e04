//! 外部协作方契约：余额预言机、转账执行器、贡献记录落盘

pub mod mock;
pub mod traits;
pub mod types;

pub use mock::{InMemoryBalanceOracle, InMemoryContributionSink, ScriptedTransferExecutor};
pub use traits::{BalanceOracle, ContributionSink, TransferExecutor};
pub use types::{
    Address, Amount, AssetId, ContributionRecord, Domain, DomainBalance, TransferOrder,
    TransferReceipt, UnifiedBalance,
};
