//! 积分对账 Worker
//!
//! 定期扫描非终态订单（NEW / PROCESSING），向积分系统查询结果并写回本地：
//! 1. 以订单号为游标分页扫描，每轮每个订单只查询一次
//! 2. 单个订单查询失败只记录日志，不中断本轮
//! 3. 写库失败按退避策略重试，仍失败则记录错误并计数
//! 4. 积分系统限流时暂停（有上限、可被关闭信号打断），随后继续处理剩余订单
//!
//! 关闭信号到达后不再开始新一轮，进行中的一轮在订单之间停止。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use loyalty_shared::config::ReconcilerConfig;
use loyalty_shared::observability::metrics;
use loyalty_shared::retry::{RetryPolicy, retry_with_policy};

use crate::accrual::{AccrualAuthority, AccrualError};
use crate::clock::Clock;
use crate::error::{LedgerError, Result};
use crate::models::ApplyOutcome;
use crate::repository::OrderRepositoryTrait;

const WORKER_NAME: &str = "accrual_reconciler";

/// 单轮对账统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// 本轮处理的订单数
    pub scanned: usize,
    /// 状态或积分发生变化
    pub applied: usize,
    /// 结果与本地一致，无需更新
    pub unchanged: usize,
    /// 积分系统尚未登记
    pub unregistered: usize,
    /// 积分系统查询失败（含限流）
    pub authority_errors: usize,
    /// 重试后仍写库失败
    pub write_failures: usize,
    /// 因关闭信号提前结束
    pub interrupted: bool,
}

/// 积分对账 Worker
pub struct AccrualReconciler<R, A>
where
    R: OrderRepositoryTrait,
    A: AccrualAuthority,
{
    orders: Arc<R>,
    authority: Arc<A>,
    clock: Arc<dyn Clock>,
    /// 两轮之间的间隔
    poll_interval: Duration,
    /// 每页扫描的订单数
    batch_size: i64,
    /// 限流暂停时长上限
    max_rate_limit_pause: Duration,
    write_policy: RetryPolicy,
}

impl<R, A> AccrualReconciler<R, A>
where
    R: OrderRepositoryTrait,
    A: AccrualAuthority,
{
    pub fn new(
        orders: Arc<R>,
        authority: Arc<A>,
        clock: Arc<dyn Clock>,
        config: &ReconcilerConfig,
    ) -> Self {
        Self {
            orders,
            authority,
            clock,
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            batch_size: config.batch_size.max(1),
            max_rate_limit_pause: Duration::from_secs(config.max_rate_limit_pause_secs),
            write_policy: RetryPolicy {
                max_retries: config.write_max_retries,
                initial_delay: Duration::from_millis(config.write_initial_delay_ms),
                ..RetryPolicy::default()
            },
        }
    }

    /// 主循环：按固定间隔执行对账，直到收到关闭信号
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval = ?self.poll_interval,
            batch_size = self.batch_size,
            max_rate_limit_pause = ?self.max_rate_limit_pause,
            "积分对账 Worker 已启动"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_cycle(&mut shutdown).await {
                Ok(report) if report.scanned > 0 => {
                    info!(
                        scanned = report.scanned,
                        applied = report.applied,
                        unchanged = report.unchanged,
                        unregistered = report.unregistered,
                        authority_errors = report.authority_errors,
                        write_failures = report.write_failures,
                        "本轮对账完成"
                    );
                }
                Ok(_) => debug!("没有待对账订单"),
                Err(e) => error!(error = %e, "对账轮次失败"),
            }

            metrics::set_worker_last_run(WORKER_NAME);

            if self.sleep_or_shutdown(self.poll_interval, &mut shutdown).await {
                break;
            }
        }

        info!("收到关闭信号，积分对账 Worker 退出");
    }

    /// 执行一轮对账
    ///
    /// 只有扫描待处理订单失败时返回错误；单个订单的失败计入统计
    pub async fn run_cycle(&self, shutdown: &mut watch::Receiver<bool>) -> Result<CycleReport> {
        let started = Instant::now();
        let mut report = CycleReport::default();
        let mut cursor: Option<String> = None;

        'scan: loop {
            let page = self
                .orders
                .list_pending_orders(cursor.clone(), self.batch_size)
                .await?;
            let page_len = page.len();

            for order_id in page {
                if *shutdown.borrow() {
                    report.interrupted = true;
                    break 'scan;
                }

                report.scanned += 1;
                let stopped = self.reconcile_order(&order_id, &mut report, shutdown).await;
                cursor = Some(order_id);

                if stopped {
                    report.interrupted = true;
                    break 'scan;
                }
            }

            if (page_len as i64) < self.batch_size {
                break;
            }
        }

        metrics::record_reconcile_cycle(report.scanned, started.elapsed().as_secs_f64());
        Ok(report)
    }

    /// 对账单个订单，返回限流暂停期间是否收到关闭信号
    async fn reconcile_order(
        &self,
        order_id: &str,
        report: &mut CycleReport,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        let accrual = match self.authority.fetch(order_id).await {
            Ok(accrual) => accrual,
            Err(AccrualError::RateLimited { retry_after }) => {
                report.authority_errors += 1;
                metrics::record_accrual_error("rate_limited");
                let pause = retry_after.min(self.max_rate_limit_pause);
                warn!(order_id = %order_id, ?retry_after, ?pause, "积分系统限流，暂停查询");
                return self.sleep_or_shutdown(pause, shutdown).await;
            }
            Err(e) => {
                report.authority_errors += 1;
                metrics::record_accrual_error(e.kind());
                warn!(order_id = %order_id, error = %e, "查询积分系统失败，下一轮重试");
                return false;
            }
        };

        let Some(update) = accrual.to_update() else {
            report.unregistered += 1;
            debug!(order_id = %order_id, "积分系统尚未登记该订单");
            return false;
        };

        let result = retry_with_policy(
            &self.write_policy,
            "apply_accrual",
            LedgerError::is_retryable,
            || self.orders.apply_accrual(order_id, update),
        )
        .await;

        match result {
            Ok(ApplyOutcome::Applied) => {
                report.applied += 1;
                metrics::record_accrual_update("applied");
                info!(
                    order_id = %order_id,
                    status = %update.status,
                    accrual = %update.accrual,
                    "订单积分状态已更新"
                );
            }
            Ok(ApplyOutcome::Unchanged) => {
                report.unchanged += 1;
                metrics::record_accrual_update("unchanged");
            }
            Err(e) => {
                report.write_failures += 1;
                metrics::record_accrual_update("failed");
                error!(order_id = %order_id, error = %e, "写入订单积分失败");
            }
        }
        false
    }

    /// 等待指定时长，期间收到关闭信号则提前返回 true
    async fn sleep_or_shutdown(
        &self,
        duration: Duration,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        tokio::select! {
            biased;

            // 发送端被丢弃同样视为关闭
            _ = shutdown.wait_for(|stop| *stop) => true,
            _ = self.clock.sleep(duration) => false,
        }
    }
}
