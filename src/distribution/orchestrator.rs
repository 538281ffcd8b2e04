//! 分账编排器
//!
//! distribute 流程：解析计划 → 获取会话单飞锁 → 统一余额校验 → 逐个收款人串行转账
//! （相邻转账之间固定间隔；执行器未就绪时重新初始化一次）→ 汇总报告与贡献记录。
//! 单笔失败不会中断批次；整体超出墙钟预算时停止后续转账并返回 Timeout。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout_at;

use crate::config::DistributionSection;
use crate::contracts::{ContributionRecord, ContributionSink, TransferOrder};
use crate::core::{Clock, PaymentError, PaymentSession, SystemClock};
use crate::distribution::split::resolve_plan;
use crate::distribution::{AttemptStatus, DistributionReport, DistributionRequest, TransferAttempt};

/// 分账编排器；本身无可变状态，多个批次可并发调用
pub struct DistributionOrchestrator {
    inter_attempt_delay: Duration,
    ready_wait: Duration,
    timeout: Duration,
    sink: Option<Arc<dyn ContributionSink>>,
    clock: Arc<dyn Clock>,
}

impl DistributionOrchestrator {
    pub fn new(config: &DistributionSection) -> Self {
        Self {
            inter_attempt_delay: Duration::from_millis(config.inter_attempt_delay_ms.max(1)),
            ready_wait: Duration::from_millis(config.ready_wait_ms),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
            sink: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// 批次汇总记录的落盘目标
    pub fn with_sink(mut self, sink: Arc<dyn ContributionSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 执行一次分账
    ///
    /// - 校验错误（InvalidParameters / NoValidRecipients / AmountMismatch / InsufficientUnifiedBalance）
    ///   在任何转账之前返回
    /// - 至少一笔成功返回 Ok(report)；全部失败返回 AllTransfersFailed；超时返回 Timeout
    pub async fn distribute(
        &self,
        session: &PaymentSession,
        request: DistributionRequest,
    ) -> Result<DistributionReport, PaymentError> {
        let plan = resolve_plan(&request)?;

        // 排队等待单飞锁的时间不计入批次预算
        let _flight = session.acquire_flight().await;
        let deadline = tokio::time::Instant::now() + self.timeout;

        let mut report = DistributionReport::new(session.payer(), &request, &plan, self.clock.now());
        let balance = match timeout_at(deadline, session.oracle().get_available(&request.asset)).await {
            Ok(balance) => balance?,
            Err(_) => return Err(self.timed_out(report)),
        };
        if !balance.covers(plan.total) {
            tracing::warn!(
                payer = %session.payer(),
                asset = %request.asset,
                available = %balance.total,
                required = %plan.total,
                "Insufficient unified balance, no transfer attempted"
            );
            return Err(PaymentError::InsufficientUnifiedBalance {
                asset: request.asset,
                available: balance.total,
                required: plan.total,
            });
        }

        tracing::info!(
            batch = %report.batch_id,
            payer = %session.payer(),
            recipients = report.attempts.len(),
            total = %plan.total,
            mode = ?request.mode,
            "Distribution started"
        );

        for attempt in report.attempts.iter_mut() {
            let step = self.run_attempt(session, &request, attempt);
            if timeout_at(deadline, step).await.is_err() {
                report.timed_out = true;
                break;
            }
        }
        report.finished_at = Some(self.clock.now());

        if report.succeeded_count() > 0 {
            self.record_contribution(&mut report).await;
        }

        tracing::info!(
            batch = %report.batch_id,
            succeeded = report.succeeded_count(),
            failed = report.failed_count(),
            pending = report.pending_count(),
            settled = %report.settled_total(),
            "Distribution finished"
        );

        if report.timed_out {
            return Err(self.timed_out(report));
        }
        if report.succeeded_count() == 0 {
            return Err(PaymentError::AllTransfersFailed {
                report: Box::new(report),
            });
        }
        Ok(report)
    }

    fn timed_out(&self, mut report: DistributionReport) -> PaymentError {
        report.timed_out = true;
        tracing::warn!(batch = %report.batch_id, budget_secs = self.timeout.as_secs(), "Distribution timed out");
        PaymentError::Timeout {
            budget_secs: self.timeout.as_secs(),
            report: Box::new(report),
        }
    }

    /// 单个收款人：间隔 → 就绪检查（最多一次重新初始化）→ 转账 → 记录结果
    async fn run_attempt(
        &self,
        session: &PaymentSession,
        request: &DistributionRequest,
        attempt: &mut TransferAttempt,
    ) {
        if attempt.index > 0 {
            tokio::time::sleep(self.inter_attempt_delay).await;
        }

        let executor = session.executor();
        if !executor.is_ready().await {
            tracing::warn!(index = attempt.index, "Transfer executor not ready, reinitializing");
            if let Err(e) = executor.reinitialize().await {
                tracing::warn!(error = %e, "Executor reinitialization failed");
            }
            tokio::time::sleep(self.ready_wait).await;
        }

        let order = TransferOrder {
            payer: session.payer().to_string(),
            recipient: attempt.recipient.clone(),
            asset: request.asset.clone(),
            domain: request.domain.clone(),
            amount: attempt.amount,
        };
        let start = Instant::now();
        let result = executor.send(&order).await;

        let (ok, outcome) = match &result {
            Ok(_) => (true, "ok".to_string()),
            Err(e) => (false, e.to_string()),
        };
        let audit = serde_json::json!({
            "event": "transfer_audit",
            "index": attempt.index,
            "recipient": order.recipient,
            "amount": order.amount.to_string(),
            "domain": order.domain,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
        });
        tracing::info!(audit = %audit, "transfer");

        match result {
            Ok(receipt) => attempt.succeed(receipt.receipt_id),
            Err(e) => attempt.fail(e),
        }
    }

    /// 汇总记录只计入成功的金额；落盘失败不影响已完成的转账，记录在报告中
    async fn record_contribution(&self, report: &mut DistributionReport) {
        let record = ContributionRecord {
            batch_id: report.batch_id.clone(),
            payer: report.payer.clone(),
            asset: report.asset.clone(),
            domain: report.domain.clone(),
            requested_total: report.requested_total,
            settled_total: report.settled_total(),
            succeeded: report.succeeded_count(),
            failed: report.failed_count(),
            receipt_ids: report
                .attempts
                .iter()
                .filter(|a| a.status == AttemptStatus::Succeeded)
                .filter_map(|a| a.receipt_id.clone())
                .collect(),
            recorded_at: self.clock.now(),
        };
        if let Some(sink) = &self.sink {
            if let Err(e) = sink.record(&record).await {
                tracing::warn!(batch = %report.batch_id, error = %e, "Failed to persist contribution record");
                report.persist_error = Some(e.to_string());
            }
        }
        report.contribution = Some(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{InMemoryBalanceOracle, InMemoryContributionSink, ScriptedTransferExecutor};
    use crate::distribution::SplitMode;
    use rust_decimal::Decimal;

    fn config() -> DistributionSection {
        DistributionSection {
            inter_attempt_delay_ms: 1_500,
            ready_wait_ms: 1_000,
            timeout_secs: 300,
        }
    }

    fn session(executor: Arc<ScriptedTransferExecutor>, balance: i64) -> PaymentSession {
        let oracle = InMemoryBalanceOracle::new().with_balance("USDC", "base", Decimal::from(balance));
        PaymentSession::new("payer", executor, Arc::new(oracle))
    }

    fn equal_request(total: i64, recipients: &[&str]) -> DistributionRequest {
        recipients.iter().fold(
            DistributionRequest::new(Decimal::from(total), "USDC", "base", SplitMode::Equal),
            |req, r| req.equal_recipient(*r),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_spaced_by_delay() {
        let executor = Arc::new(ScriptedTransferExecutor::new());
        let orchestrator = DistributionOrchestrator::new(&config());
        let started = tokio::time::Instant::now();

        let report = orchestrator
            .distribute(&session(executor.clone(), 100), equal_request(90, &["a", "b", "c"]))
            .await
            .unwrap();

        assert_eq!(report.succeeded_count(), 3);
        // 第一笔不等待，其后每笔 1.5s
        assert_eq!(started.elapsed(), Duration::from_millis(3_000));
        assert_eq!(executor.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_ready_executor_reinitialized_once() {
        let executor = Arc::new(ScriptedTransferExecutor::new().not_ready(true));
        let orchestrator = DistributionOrchestrator::new(&config());

        let report = orchestrator
            .distribute(&session(executor.clone(), 100), equal_request(10, &["a"]))
            .await
            .unwrap();

        assert_eq!(report.succeeded_count(), 1);
        assert_eq!(executor.reinitializations(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrecoverable_executor_fails_all() {
        let executor = Arc::new(ScriptedTransferExecutor::new().not_ready(false));
        let orchestrator = DistributionOrchestrator::new(&config());

        let err = orchestrator
            .distribute(&session(executor.clone(), 100), equal_request(10, &["a", "b"]))
            .await
            .unwrap_err();

        match err {
            PaymentError::AllTransfersFailed { report } => {
                assert_eq!(report.failed_count(), 2);
                assert!(report.contribution.is_none());
            }
            other => panic!("Expected AllTransfersFailed, got {other:?}"),
        }
        // 每笔各重试一次初始化
        assert_eq!(executor.reinitializations(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_preserves_completed_attempts() {
        let executor = Arc::new(ScriptedTransferExecutor::new().with_latency(Duration::from_secs(40)));
        let orchestrator = DistributionOrchestrator::new(&DistributionSection {
            timeout_secs: 60,
            ..config()
        });
        let sink = Arc::new(InMemoryContributionSink::new());
        let orchestrator = orchestrator.with_sink(sink.clone());

        let err = orchestrator
            .distribute(&session(executor.clone(), 100), equal_request(30, &["a", "b", "c"]))
            .await
            .unwrap_err();

        let report = err.report().unwrap();
        assert!(matches!(err, PaymentError::Timeout { budget_secs: 60, .. }));
        assert!(report.timed_out);
        assert_eq!(report.succeeded_count(), 1);
        assert_eq!(report.pending_count(), 2);
        // 已成功的部分仍然生成汇总记录
        assert_eq!(sink.records().await.len(), 1);
        assert_eq!(report.retry_request().unwrap().recipients.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_contribution_counts_only_succeeded() {
        let executor = Arc::new(ScriptedTransferExecutor::new().fail_recipient("b", "rejected"));
        let sink = Arc::new(InMemoryContributionSink::new());
        let orchestrator = DistributionOrchestrator::new(&config()).with_sink(sink.clone());

        let request = DistributionRequest::new(Decimal::from(100), "USDC", "base", SplitMode::Percent)
            .recipient("a", Decimal::from(25))
            .recipient("b", Decimal::from(75));
        let report = orchestrator
            .distribute(&session(executor, 100), request)
            .await
            .unwrap();

        let record = report.contribution.clone().unwrap();
        assert_eq!(record.requested_total, Decimal::from(100));
        assert_eq!(record.settled_total, Decimal::from(25));
        assert_eq!(record.receipt_ids.len(), 1);
        assert_eq!(sink.records().await, vec![record]);
        assert!(report.persist_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_on_same_session_serialize() {
        let executor = Arc::new(ScriptedTransferExecutor::new());
        let orchestrator = Arc::new(DistributionOrchestrator::new(&config()));
        let session = session(executor.clone(), 1_000);

        let (o1, o2) = (orchestrator.clone(), orchestrator.clone());
        let (s1, s2) = (session.clone(), session.clone());
        let (r1, r2) = tokio::join!(
            async move { o1.distribute(&s1, equal_request(20, &["a", "b"])).await },
            async move { o2.distribute(&s2, equal_request(20, &["c", "d"])).await }
        );
        assert!(r1.is_ok() && r2.is_ok());

        // 两个批次的转账不交错
        let order: Vec<_> = executor.calls().into_iter().map(|c| c.recipient).collect();
        assert!(order == ["a", "b", "c", "d"] || order == ["c", "d", "a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_batch_gets_full_budget() {
        let executor = Arc::new(ScriptedTransferExecutor::new().with_latency(Duration::from_secs(40)));
        let orchestrator = Arc::new(DistributionOrchestrator::new(&DistributionSection {
            timeout_secs: 60,
            ..config()
        }));
        let session = session(executor.clone(), 1_000);

        let (o1, o2) = (orchestrator.clone(), orchestrator.clone());
        let (s1, s2) = (session.clone(), session.clone());
        // 第二个批次排队 40s，自身执行 40s，仍在 60s 预算内
        let (r1, r2) = tokio::join!(
            async move { o1.distribute(&s1, equal_request(10, &["a"])).await },
            async move { o2.distribute(&s2, equal_request(10, &["b"])).await }
        );
        assert_eq!(r1.unwrap().succeeded_count(), 1);
        assert_eq!(r2.unwrap().succeeded_count(), 1);
        assert_eq!(executor.call_count(), 2);
    }
}
