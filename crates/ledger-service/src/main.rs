//! 积分账本服务
//!
//! 启动数据库迁移与积分对账 Worker，收到 SIGINT / SIGTERM 后优雅退出。

use std::sync::Arc;

use loyalty_ledger::{
    AccrualReconciler, HttpAccrualClient, MIGRATOR, OrderRepository, SystemClock,
};
use loyalty_shared::{config::AppConfig, database::Database, observability};
use tokio::sync::watch;
use tracing::{error, info, warn};

const SERVICE_NAME: &str = "loyalty-ledger";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let loaded = AppConfig::load(SERVICE_NAME);
    let config = match &loaded {
        Ok(config) => config.clone(),
        Err(_) => AppConfig {
            service_name: SERVICE_NAME.to_string(),
            ..AppConfig::default()
        },
    };

    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    if let Err(e) = loaded {
        warn!(error = %e, "加载配置失败，使用默认配置");
    }

    info!(
        environment = %config.environment,
        accrual = %config.accrual.base_url,
        "Starting {}",
        SERVICE_NAME
    );

    let db = Database::connect(&config.database).await?;
    db.run_migrations(&MIGRATOR).await?;
    db.health_check().await?;

    let orders = Arc::new(OrderRepository::new(db.pool().clone()));
    let authority = Arc::new(HttpAccrualClient::new(&config.accrual)?);
    let reconciler = AccrualReconciler::new(
        orders,
        authority,
        Arc::new(SystemClock),
        &config.reconciler,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = tokio::spawn(async move {
        reconciler.run(shutdown_rx).await;
    });

    shutdown_signal().await;

    let _ = shutdown_tx.send(true);
    if let Err(e) = worker.await {
        error!(error = %e, "对账 Worker 异常退出");
    }

    db.close().await;
    info!("{} stopped", SERVICE_NAME);
    Ok(())
}

/// 等待关闭信号（Ctrl+C 或 SIGTERM）
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("注册 Ctrl+C 处理器失败");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("注册 SIGTERM 处理器失败")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("收到 Ctrl+C，开始优雅关闭"),
        _ = terminate => info!("收到 SIGTERM，开始优雅关闭"),
    }
}
