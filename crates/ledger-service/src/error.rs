//! 积分账本服务错误类型
//!
//! 定义服务层的业务错误和系统错误

use rust_decimal::Decimal;
use thiserror::Error;

use loyalty_shared::error::is_transient_db_error;

use crate::accrual::AccrualError;

/// 积分账本服务错误类型
#[derive(Debug, Error)]
pub enum LedgerError {
    // === 校验错误（不访问存储） ===
    #[error("订单号格式错误: {0}")]
    InvalidOrderNumber(String),

    #[error("扣减金额必须为正数: {0}")]
    InvalidAmount(Decimal),

    #[error("参数校验失败: {0}")]
    Validation(String),

    // === 冲突错误 ===
    #[error("订单已被其他用户提交: order_id={0}")]
    OrderOwnedByOther(String),

    #[error("订单号已用于扣减: order_id={0}")]
    DuplicateWithdrawal(String),

    #[error("用户已存在: {0}")]
    UserAlreadyExists(String),

    // === 余额与账户 ===
    #[error("积分余额不足: 需要 {required}, 可用 {available}")]
    InsufficientBalance {
        required: Decimal,
        available: Decimal,
    },

    #[error("用户不存在: {0}")]
    UserNotFound(String),

    #[error("用户名或密码错误")]
    InvalidCredentials,

    // === 系统错误 ===
    #[error("积分计算系统错误: {0}")]
    Accrual(#[from] AccrualError),

    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 积分账本服务 Result 类型别名
pub type Result<T> = std::result::Result<T, LedgerError>;

impl LedgerError {
    /// 检查是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Database(e) => is_transient_db_error(e),
            Self::Accrual(e) => e.is_transient(),
            _ => false,
        }
    }

    /// 检查是否为业务错误（非系统错误）
    pub fn is_business_error(&self) -> bool {
        !matches!(
            self,
            Self::Accrual(_) | Self::Database(_) | Self::Internal(_)
        )
    }

    /// 获取错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidOrderNumber(_) => "INVALID_ORDER_NUMBER",
            Self::InvalidAmount(_) => "INVALID_AMOUNT",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::OrderOwnedByOther(_) => "ORDER_OWNED_BY_OTHER",
            Self::DuplicateWithdrawal(_) => "DUPLICATE_WITHDRAWAL",
            Self::UserAlreadyExists(_) => "USER_ALREADY_EXISTS",
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Self::UserNotFound(_) => "USER_NOT_FOUND",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::Accrual(_) => "ACCRUAL_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
