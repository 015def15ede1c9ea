//! 账本实体
//!
//! 余额不落库，始终由订单积分与扣减流水聚合得出

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::enums::OrderStatus;
use crate::error::{LedgerError, Result};

/// 用户
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct User {
    pub login: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// 订单
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Order {
    #[serde(rename = "number")]
    pub order_id: String,
    #[serde(skip)]
    pub login: String,
    pub status: OrderStatus,
    #[serde(skip_serializing_if = "Decimal::is_zero")]
    pub accrual: Decimal,
    pub uploaded_at: DateTime<Utc>,
}

impl Order {
    /// 新提交的订单：状态 NEW，积分为 0
    pub fn new(order_id: &str, login: &str, uploaded_at: DateTime<Utc>) -> Self {
        Self {
            order_id: order_id.to_string(),
            login: login.to_string(),
            status: OrderStatus::New,
            accrual: Decimal::ZERO,
            uploaded_at,
        }
    }

    /// 尝试应用积分系统的结果，返回是否发生变化
    ///
    /// 终态订单、回退或同状态更新都不会修改订单。
    pub fn apply(&mut self, update: &AccrualUpdate) -> ApplyOutcome {
        if !self.status.can_transition_to(update.status) {
            return ApplyOutcome::Unchanged;
        }
        self.status = update.status;
        self.accrual = update.accrual;
        ApplyOutcome::Applied
    }
}

/// 积分扣减流水
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Withdrawal {
    #[serde(skip)]
    pub login: String,
    #[serde(rename = "order")]
    pub order_id: String,
    #[serde(rename = "sum")]
    pub amount: Decimal,
    pub processed_at: DateTime<Utc>,
}

/// 派生余额
///
/// current = 已结算订单积分之和 - 扣减之和；withdrawn = 扣减之和。
/// 没有任何订单和流水的用户余额为 0。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Balance {
    pub current: Decimal,
    pub withdrawn: Decimal,
}

impl Balance {
    /// 由累计入账与累计扣减构造，超出 Decimal 范围时返回错误
    pub fn from_totals(accrued: Decimal, withdrawn: Decimal) -> Result<Self> {
        let current = accrued
            .checked_sub(withdrawn)
            .ok_or_else(|| overflow("current"))?;
        Ok(Self { current, withdrawn })
    }

    /// 对单个用户的订单与扣减流水做聚合
    ///
    /// 只有 PROCESSED 订单计入积分；调用方负责传入同一快照下、同一用户的数据。
    pub fn aggregate<'a>(
        orders: impl IntoIterator<Item = &'a Order>,
        withdrawals: impl IntoIterator<Item = &'a Withdrawal>,
    ) -> Result<Self> {
        let accrued = orders
            .into_iter()
            .filter(|o| o.status == OrderStatus::Processed)
            .try_fold(Decimal::ZERO, |sum, o| sum.checked_add(o.accrual))
            .ok_or_else(|| overflow("accrued"))?;
        let withdrawn = withdrawals
            .into_iter()
            .try_fold(Decimal::ZERO, |sum, w| sum.checked_add(w.amount))
            .ok_or_else(|| overflow("withdrawn"))?;
        Self::from_totals(accrued, withdrawn)
    }

    /// 余额是否足以扣减 amount
    pub fn covers(&self, amount: Decimal) -> bool {
        amount <= self.current
    }
}

fn overflow(field: &str) -> LedgerError {
    LedgerError::Internal(format!("余额计算溢出: {field}"))
}

/// 积分系统结果映射到本地订单后的更新内容
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccrualUpdate {
    pub status: OrderStatus,
    pub accrual: Decimal,
}

impl AccrualUpdate {
    pub fn processing() -> Self {
        Self {
            status: OrderStatus::Processing,
            accrual: Decimal::ZERO,
        }
    }

    pub fn processed(accrual: Decimal) -> Self {
        Self {
            status: OrderStatus::Processed,
            accrual,
        }
    }

    pub fn invalid() -> Self {
        Self {
            status: OrderStatus::Invalid,
            accrual: Decimal::ZERO,
        }
    }
}

/// 订单提交结果（存储层）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// 新订单已写入
    Accepted,
    /// 当前用户此前已提交过，幂等成功
    AlreadyOwnedBySelf,
    /// 订单属于其他用户
    OwnedByOther,
}

/// 积分扣减结果（存储层）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WithdrawOutcome {
    /// 扣减已提交
    Committed(Withdrawal),
    /// 余额不足，未写入任何数据
    InsufficientBalance { available: Decimal },
    /// 该用户已用此订单号扣减过
    DuplicateReference,
}

/// 积分结果应用结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// 状态与积分已更新
    Applied,
    /// 无变化（重复结果、终态订单或订单不存在）
    Unchanged,
}
