//! 订单仓储
//!
//! 订单号全局唯一，归属在首次提交时确定；状态只通过条件更新单向推进

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::debug;

use super::traits::OrderRepositoryTrait;
use crate::error::{LedgerError, Result};
use crate::models::{AccrualUpdate, ApplyOutcome, Order, OrderStatus, SubmitOutcome};

/// 订单仓储
pub struct OrderRepository {
    pool: PgPool,
}

impl OrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 登记订单
    ///
    /// 先尝试插入，冲突时再读取归属者判断是否为本人提交。
    /// 主键冲突由数据库仲裁，并发提交同一订单号只有一个插入成功。
    pub async fn submit_order(
        &self,
        login: &str,
        order_id: &str,
        now: DateTime<Utc>,
    ) -> Result<SubmitOutcome> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO orders (order_id, login, status, accrual, uploaded_at, updated_at)
            VALUES ($1, $2, 'NEW', 0, $3, $3)
            ON CONFLICT (order_id) DO NOTHING
            RETURNING order_id
            "#,
        )
        .bind(order_id)
        .bind(login)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_missing_user(e, login))?;

        if inserted.is_some() {
            return Ok(SubmitOutcome::Accepted);
        }

        let owner: String = sqlx::query("SELECT login FROM orders WHERE order_id = $1")
            .bind(order_id)
            .fetch_one(&self.pool)
            .await?
            .get("login");

        if owner == login {
            Ok(SubmitOutcome::AlreadyOwnedBySelf)
        } else {
            debug!(order_id = %order_id, "订单已归属其他用户");
            Ok(SubmitOutcome::OwnedByOther)
        }
    }

    /// 列出用户订单
    ///
    /// 按提交时间升序，同一时刻按订单号排序保证结果稳定
    pub async fn list_orders(&self, login: &str) -> Result<Vec<Order>> {
        let orders = sqlx::query_as::<_, Order>(
            r#"
            SELECT order_id, login, status, accrual, uploaded_at
            FROM orders
            WHERE login = $1
            ORDER BY uploaded_at ASC, order_id ASC
            "#,
        )
        .bind(login)
        .fetch_all(&self.pool)
        .await?;

        Ok(orders)
    }

    /// 分页扫描非终态订单
    ///
    /// 使用订单号做游标（keyset 分页），order_id 列为 "C" 排序规则，即字节序
    pub async fn list_pending_orders(
        &self,
        after: Option<String>,
        limit: i64,
    ) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT order_id
            FROM orders
            WHERE status IN ('NEW', 'PROCESSING')
              AND ($1::VARCHAR IS NULL OR order_id > $1)
            ORDER BY order_id ASC
            LIMIT $2
            "#,
        )
        .bind(after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|row| row.get("order_id")).collect())
    }

    /// 应用积分系统结果
    ///
    /// 只有当前状态属于目标状态的合法前置状态时才更新，
    /// 重复结果、回退和终态订单都会得到 `Unchanged`。
    pub async fn apply_accrual(
        &self,
        order_id: &str,
        update: AccrualUpdate,
    ) -> Result<ApplyOutcome> {
        let from: Vec<String> = OrderStatus::predecessors(update.status)
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();
        if from.is_empty() {
            return Ok(ApplyOutcome::Unchanged);
        }

        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, accrual = $3, updated_at = NOW()
            WHERE order_id = $1 AND status = ANY($4)
            "#,
        )
        .bind(order_id)
        .bind(update.status)
        .bind(update.accrual)
        .bind(&from)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            Ok(ApplyOutcome::Unchanged)
        } else {
            Ok(ApplyOutcome::Applied)
        }
    }
}

/// 外键冲突说明提交者不存在
fn map_missing_user(err: sqlx::Error, login: &str) -> LedgerError {
    match &err {
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
            LedgerError::UserNotFound(login.to_string())
        }
        _ => LedgerError::Database(err),
    }
}

#[async_trait]
impl OrderRepositoryTrait for OrderRepository {
    async fn submit_order(
        &self,
        login: &str,
        order_id: &str,
        now: DateTime<Utc>,
    ) -> Result<SubmitOutcome> {
        self.submit_order(login, order_id, now).await
    }

    async fn list_orders(&self, login: &str) -> Result<Vec<Order>> {
        self.list_orders(login).await
    }

    async fn list_pending_orders(&self, after: Option<String>, limit: i64) -> Result<Vec<String>> {
        self.list_pending_orders(after, limit).await
    }

    async fn apply_accrual(&self, order_id: &str, update: AccrualUpdate) -> Result<ApplyOutcome> {
        self.apply_accrual(order_id, update).await
    }
}
