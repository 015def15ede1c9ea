//! 扣减仓储
//!
//! 余额不落库：每次都由订单积分和扣减流水聚合。
//! 扣减时锁定用户行，同一用户的扣减串行执行，余额检查与写入在同一事务内完成。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool, Row};
use tracing::debug;

use super::traits::WithdrawalRepositoryTrait;
use crate::error::{LedgerError, Result};
use crate::models::{Balance, WithdrawOutcome, Withdrawal};

/// 余额聚合 SQL，两个子查询在同一语句快照内执行
const BALANCE_SQL: &str = r#"
    SELECT
        COALESCE((SELECT SUM(accrual) FROM orders
                  WHERE login = $1 AND status = 'PROCESSED'), 0) AS accrued,
        COALESCE((SELECT SUM(amount) FROM withdrawals
                  WHERE login = $1), 0) AS withdrawn
"#;

/// 扣减仓储
pub struct WithdrawalRepository {
    pool: PgPool,
}

impl WithdrawalRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 扣减积分
    ///
    /// 1. 锁定用户行（FOR UPDATE）
    /// 2. 检查订单号是否已用于扣减
    /// 3. 聚合余额并判断是否充足
    /// 4. 写入流水并提交
    ///
    /// 任一前置检查失败时事务回滚，不写入数据。
    pub async fn withdraw(
        &self,
        login: &str,
        order_id: &str,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<WithdrawOutcome> {
        let mut tx = self.pool.begin().await?;

        Self::lock_user_in_tx(&mut tx, login).await?;

        if Self::exists_in_tx(&mut tx, login, order_id).await? {
            return Ok(WithdrawOutcome::DuplicateReference);
        }

        let balance = Self::get_balance_in_tx(&mut tx, login).await?;
        if !balance.covers(amount) {
            debug!(login = %login, %amount, available = %balance.current, "余额不足，放弃扣减");
            return Ok(WithdrawOutcome::InsufficientBalance {
                available: balance.current,
            });
        }

        let inserted = sqlx::query_as::<_, Withdrawal>(
            r#"
            INSERT INTO withdrawals (login, order_id, amount, processed_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (login, order_id) DO NOTHING
            RETURNING login, order_id, amount, processed_at
            "#,
        )
        .bind(login)
        .bind(order_id)
        .bind(amount)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(withdrawal) = inserted else {
            return Ok(WithdrawOutcome::DuplicateReference);
        };

        tx.commit().await?;
        Ok(WithdrawOutcome::Committed(withdrawal))
    }

    /// 在事务中锁定用户行
    async fn lock_user_in_tx(tx: &mut PgConnection, login: &str) -> Result<()> {
        let locked = sqlx::query("SELECT login FROM users WHERE login = $1 FOR UPDATE")
            .bind(login)
            .fetch_optional(tx)
            .await?;

        if locked.is_none() {
            return Err(LedgerError::UserNotFound(login.to_string()));
        }
        Ok(())
    }

    async fn exists_in_tx(tx: &mut PgConnection, login: &str, order_id: &str) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM withdrawals WHERE login = $1 AND order_id = $2
            ) AS found
            "#,
        )
        .bind(login)
        .bind(order_id)
        .fetch_one(tx)
        .await?;

        Ok(row.get("found"))
    }

    /// 列出用户扣减流水，按处理时间升序
    pub async fn list_withdrawals(&self, login: &str) -> Result<Vec<Withdrawal>> {
        let withdrawals = sqlx::query_as::<_, Withdrawal>(
            r#"
            SELECT login, order_id, amount, processed_at
            FROM withdrawals
            WHERE login = $1
            ORDER BY processed_at ASC, order_id ASC
            "#,
        )
        .bind(login)
        .fetch_all(&self.pool)
        .await?;

        Ok(withdrawals)
    }

    /// 获取用户余额
    pub async fn get_balance(&self, login: &str) -> Result<Balance> {
        let row = sqlx::query(BALANCE_SQL)
            .bind(login)
            .fetch_one(&self.pool)
            .await?;

        Balance::from_totals(row.try_get("accrued")?, row.try_get("withdrawn")?)
    }

    /// 在事务中获取用户余额
    pub async fn get_balance_in_tx(tx: &mut PgConnection, login: &str) -> Result<Balance> {
        let row = sqlx::query(BALANCE_SQL).bind(login).fetch_one(tx).await?;

        Balance::from_totals(row.try_get("accrued")?, row.try_get("withdrawn")?)
    }
}

#[async_trait]
impl WithdrawalRepositoryTrait for WithdrawalRepository {
    async fn withdraw(
        &self,
        login: &str,
        order_id: &str,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<WithdrawOutcome> {
        self.withdraw(login, order_id, amount, now).await
    }

    async fn list_withdrawals(&self, login: &str) -> Result<Vec<Withdrawal>> {
        self.list_withdrawals(login).await
    }

    async fn get_balance(&self, login: &str) -> Result<Balance> {
        self.get_balance(login).await
    }
}
