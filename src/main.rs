//! Payflow 调度守护进程
//!
//! 入口：初始化日志、加载配置、装配注册表与调度器，后台扫描到期委托直到收到关闭信号。
//! 用法：`payflow [config.toml] [--demo]`；`--demo` 使用内存执行器创建一条演示委托，
//! 并执行一次三方平分的演示分账（贡献记录写入 data_dir）。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use payflow::config::load_config;
use payflow::contracts::{InMemoryBalanceOracle, ScriptedTransferExecutor};
use payflow::core::{run_with_graceful_shutdown, Clock, SessionPool, ShutdownManager, SystemClock};
use payflow::delegation::{
    format_time_until, InMemoryDelegationRegistry, NewDelegation, RecurringScheduler,
    SchedulerEvent,
};
use payflow::distribution::{DistributionOrchestrator, DistributionRequest, SplitMode};
use payflow::persistence::JsonlContributionStore;
use rust_decimal::Decimal;
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    payflow::observability::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let demo = args.iter().any(|a| a == "--demo");
    let config_path = args.iter().find(|a| !a.starts_with("--")).map(PathBuf::from);

    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        Default::default()
    });

    tracing::info!(
        app = cfg.app.name.as_deref().unwrap_or("payflow"),
        data_dir = %cfg.app.data_dir.display(),
        "Starting"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let oracle = Arc::new(InMemoryBalanceOracle::new().with_balance("USDC", "base", Decimal::from(100)));
    // 定期扣款与分账批次共用每个付款方的会话
    let sessions = Arc::new(SessionPool::new(Arc::new(ScriptedTransferExecutor::new()), oracle));
    let registry = Arc::new(InMemoryDelegationRegistry::new(
        sessions.clone(),
        clock.clone(),
        cfg.delegation.limits(),
    ));
    let scheduler = Arc::new(RecurringScheduler::new(
        registry,
        clock.clone(),
        cfg.scheduler.clone(),
    ));

    if demo {
        let id = scheduler
            .create_delegation(NewDelegation {
                payer: "demo-payer".into(),
                recipient: "demo-recipient".into(),
                asset: "USDC".into(),
                domain: "base".into(),
                amount_per_interval: Decimal::from(5),
                total_amount: Decimal::from(15),
                start_time: clock.now(),
                interval_secs: cfg.delegation.min_interval_secs,
                periods_total: 3,
            })
            .await
            .context("Failed to create demo delegation")?;
        let status = scheduler.get_due_status(&id).await?;
        tracing::info!(delegation = %id, next = %format_time_until(status.time_until_due_secs), "Demo delegation created");

        let session = sessions.session_for("demo-payer");
        let store = Arc::new(JsonlContributionStore::in_dir(&cfg.app.data_dir));
        let orchestrator = DistributionOrchestrator::new(&cfg.distribution)
            .with_sink(store.clone())
            .with_clock(clock.clone());
        let request = DistributionRequest::new(Decimal::from(30), "USDC", "base", SplitMode::Equal)
            .equal_recipient("demo-alice")
            .equal_recipient("demo-bob")
            .equal_recipient("demo-carol");
        match orchestrator.distribute(&session, request).await {
            Ok(report) => tracing::info!(
                batch = %report.batch_id,
                succeeded = report.succeeded_count(),
                store = %store.path().display(),
                "Demo distribution finished"
            ),
            Err(e) => tracing::warn!(error = %e, "Demo distribution failed"),
        }
    }

    let shutdown = Arc::new(ShutdownManager::new());
    let (handle, mut events) = scheduler.spawn(shutdown.token());

    let app = async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Scheduler event listener lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            match event {
                SchedulerEvent::Settled(receipt) => tracing::info!(
                    delegation = %receipt.delegation_id,
                    period = receipt.period,
                    remaining = %receipt.remaining_amount,
                    "Payment settled"
                ),
                SchedulerEvent::SettlementFailed { delegation_id, error } => {
                    tracing::warn!(delegation = %delegation_id, %error, "Payment failed, will retry")
                }
                SchedulerEvent::Skipped { .. } => {}
            }
        }
    };

    run_with_graceful_shutdown(shutdown, app, || handle.join()).await;
    Ok(())
}
