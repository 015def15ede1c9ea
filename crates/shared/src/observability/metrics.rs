//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// Metrics 资源守卫
pub struct MetricsHandle {
    server_handle: tokio::task::JoinHandle<()>,
}

impl Drop for MetricsHandle {
    fn drop(&mut self) {
        self.server_handle.abort();
    }
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 与 `/health`。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_common_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle { server_handle })
}

/// 注册积分账本相关指标的描述
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!(
        "loyalty_order_submissions_total",
        "Order submissions by outcome"
    );
    metrics::describe_counter!("loyalty_withdrawals_total", "Withdrawals by outcome");
    metrics::describe_counter!(
        "loyalty_reconcile_cycles_total",
        "Completed accrual reconciliation cycles"
    );
    metrics::describe_histogram!(
        "loyalty_reconcile_cycle_duration_seconds",
        "Accrual reconciliation cycle duration in seconds"
    );
    metrics::describe_gauge!(
        "loyalty_reconcile_scanned_orders",
        "Orders queried in the last reconciliation cycle"
    );
    metrics::describe_counter!(
        "loyalty_accrual_updates_total",
        "Per-order accrual apply results"
    );
    metrics::describe_counter!(
        "loyalty_accrual_errors_total",
        "Accrual authority query failures by kind"
    );
    metrics::describe_gauge!(
        "worker_last_run_timestamp_seconds",
        "Unix timestamp of the last worker cycle"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录订单提交结果（accepted / duplicate / conflict / invalid / error）
#[inline]
pub fn record_order_submission(outcome: &str) {
    metrics::counter!(
        "loyalty_order_submissions_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// 记录积分扣减结果（committed / insufficient / duplicate / invalid / error）
#[inline]
pub fn record_withdrawal(outcome: &str) {
    metrics::counter!(
        "loyalty_withdrawals_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// 记录一轮对账
#[inline]
pub fn record_reconcile_cycle(scanned: usize, duration_secs: f64) {
    metrics::counter!("loyalty_reconcile_cycles_total").increment(1);
    metrics::gauge!("loyalty_reconcile_scanned_orders").set(scanned as f64);
    metrics::histogram!("loyalty_reconcile_cycle_duration_seconds").record(duration_secs);
}

/// 记录单笔订单的积分应用结果（applied / unchanged / failed）
#[inline]
pub fn record_accrual_update(result: &str) {
    metrics::counter!(
        "loyalty_accrual_updates_total",
        "result" => result.to_string()
    )
    .increment(1);
}

/// 记录积分系统查询失败
#[inline]
pub fn record_accrual_error(kind: &str) {
    metrics::counter!(
        "loyalty_accrual_errors_total",
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// 记录 Worker 最近一次运行时间
#[inline]
pub fn set_worker_last_run(worker: &str) {
    metrics::gauge!(
        "worker_last_run_timestamp_seconds",
        "worker" => worker.to_string()
    )
    .set(chrono::Utc::now().timestamp() as f64);
}
