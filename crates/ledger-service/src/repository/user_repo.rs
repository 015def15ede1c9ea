//! 用户仓储

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::traits::UserRepositoryTrait;
use crate::error::{LedgerError, Result};
use crate::models::User;

/// 用户仓储
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 创建用户
    ///
    /// 登录名唯一，冲突时不覆盖已有密码
    pub async fn create_user(
        &self,
        login: &str,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (login, password_hash, created_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (login) DO NOTHING
            "#,
        )
        .bind(login)
        .bind(password_hash)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::UserAlreadyExists(login.to_string()));
        }
        Ok(())
    }

    pub async fn get_user(&self, login: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT login, password_hash, created_at
            FROM users
            WHERE login = $1
            "#,
        )
        .bind(login)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }
}

#[async_trait]
impl UserRepositoryTrait for UserRepository {
    async fn create_user(
        &self,
        login: &str,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.create_user(login, password_hash, now).await
    }

    async fn get_user(&self, login: &str) -> Result<Option<User>> {
        self.get_user(login).await
    }
}
