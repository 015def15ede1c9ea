//! 仓储 Trait 定义
//!
//! 服务层与对账 worker 只依赖这些接口，PostgreSQL 与内存实现可以互换，也便于 mock 测试

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::Result;
use crate::models::{
    AccrualUpdate, ApplyOutcome, Balance, Order, SubmitOutcome, User, WithdrawOutcome, Withdrawal,
};

/// 用户仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserRepositoryTrait: Send + Sync {
    /// 创建用户，登录名已存在时返回 `UserAlreadyExists`
    async fn create_user(&self, login: &str, password_hash: &str, now: DateTime<Utc>)
    -> Result<()>;
    async fn get_user(&self, login: &str) -> Result<Option<User>>;
}

/// 订单仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderRepositoryTrait: Send + Sync {
    /// 原子地登记订单归属
    ///
    /// 同一订单号并发提交时只有一个调用方得到 `Accepted`。
    async fn submit_order(
        &self,
        login: &str,
        order_id: &str,
        now: DateTime<Utc>,
    ) -> Result<SubmitOutcome>;

    /// 用户的订单，按提交时间升序
    async fn list_orders(&self, login: &str) -> Result<Vec<Order>>;

    /// 非终态订单号，按字节序升序，从 `after` 之后开始，最多 `limit` 条
    async fn list_pending_orders(&self, after: Option<String>, limit: i64) -> Result<Vec<String>>;

    /// 条件更新订单状态与积分，只在流转合法时生效
    async fn apply_accrual(&self, order_id: &str, update: AccrualUpdate) -> Result<ApplyOutcome>;
}

/// 扣减仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WithdrawalRepositoryTrait: Send + Sync {
    /// 原子地校验余额并写入扣减
    ///
    /// 同一用户的扣减在存储层串行化，余额不足或重复引用时不写入任何数据。
    async fn withdraw(
        &self,
        login: &str,
        order_id: &str,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<WithdrawOutcome>;

    /// 用户的扣减流水，按处理时间升序
    async fn list_withdrawals(&self, login: &str) -> Result<Vec<Withdrawal>>;

    async fn get_balance(&self, login: &str) -> Result<Balance>;
}
