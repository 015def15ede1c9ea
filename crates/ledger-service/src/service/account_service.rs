//! 账户服务
//!
//! 注册与凭证校验。令牌签发属于外层鉴权，不在此处理。

use std::sync::Arc;

use tracing::{info, instrument, warn};

use super::password::{hash_password, verify_password};
use crate::clock::Clock;
use crate::error::{LedgerError, Result};
use crate::models::User;
use crate::repository::UserRepositoryTrait;

/// 登录名最大长度，与 users.login 列宽一致
const MAX_LOGIN_LEN: usize = 128;

/// 账户服务
pub struct AccountService<R: UserRepositoryTrait> {
    users: Arc<R>,
    clock: Arc<dyn Clock>,
    bcrypt_cost: u32,
}

impl<R: UserRepositoryTrait> AccountService<R> {
    pub fn new(users: Arc<R>, clock: Arc<dyn Clock>) -> Self {
        Self {
            users,
            clock,
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }

    /// 调整 bcrypt 计算强度（测试中使用较低的值）
    pub fn with_cost(mut self, cost: u32) -> Self {
        self.bcrypt_cost = cost;
        self
    }

    /// 注册用户
    #[instrument(skip(self, password))]
    pub async fn register(&self, login: &str, password: &str) -> Result<()> {
        if login.trim().is_empty() {
            return Err(LedgerError::Validation("登录名不能为空".to_string()));
        }
        if login.chars().count() > MAX_LOGIN_LEN {
            return Err(LedgerError::Validation(format!(
                "登录名长度不能超过 {MAX_LOGIN_LEN}"
            )));
        }
        if password.is_empty() {
            return Err(LedgerError::Validation("密码不能为空".to_string()));
        }

        let hashed = hash_password(password, self.bcrypt_cost).await?;
        self.users
            .create_user(login, &hashed, self.clock.now())
            .await?;

        info!(login = %login, "用户注册成功");
        Ok(())
    }

    /// 校验登录凭证
    #[instrument(skip(self, password))]
    pub async fn authenticate(&self, login: &str, password: &str) -> Result<User> {
        let user = self
            .users
            .get_user(login)
            .await?
            .ok_or_else(|| LedgerError::UserNotFound(login.to_string()))?;

        if !verify_password(password, &user.password_hash).await? {
            warn!(login = %login, "密码校验失败");
            return Err(LedgerError::InvalidCredentials);
        }
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::repository::{MemoryLedgerStore, MockUserRepositoryTrait};

    fn service() -> AccountService<MemoryLedgerStore> {
        AccountService::new(
            Arc::new(MemoryLedgerStore::new()),
            Arc::new(ManualClock::default()),
        )
        .with_cost(4)
    }

    #[tokio::test]
    async fn test_register_then_authenticate() {
        let accounts = service();
        accounts.register("alice", "s3cret").await.unwrap();

        let user = accounts.authenticate("alice", "s3cret").await.unwrap();
        assert_eq!(user.login, "alice");
        assert_ne!(user.password_hash, "s3cret");
    }

    #[tokio::test]
    async fn test_register_duplicate_login() {
        let accounts = service();
        accounts.register("alice", "s3cret").await.unwrap();

        let err = accounts.register("alice", "other").await.unwrap_err();
        assert!(matches!(err, LedgerError::UserAlreadyExists(_)));
        // 原密码仍然有效
        assert!(accounts.authenticate("alice", "s3cret").await.is_ok());
    }

    #[tokio::test]
    async fn test_authenticate_failures() {
        let accounts = service();
        accounts.register("alice", "s3cret").await.unwrap();

        let err = accounts.authenticate("alice", "wrong").await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidCredentials));

        let err = accounts.authenticate("bob", "s3cret").await.unwrap_err();
        assert!(matches!(err, LedgerError::UserNotFound(_)));
    }

    #[tokio::test]
    async fn test_register_rejects_blank_input_before_store() {
        let mut users = MockUserRepositoryTrait::new();
        users.expect_create_user().never();

        let accounts =
            AccountService::new(Arc::new(users), Arc::new(ManualClock::default())).with_cost(4);

        assert!(matches!(
            accounts.register("  ", "pw").await,
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            accounts.register("alice", "").await,
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            accounts.register(&"a".repeat(MAX_LOGIN_LEN + 1), "pw").await,
            Err(LedgerError::Validation(_))
        ));
    }
}
