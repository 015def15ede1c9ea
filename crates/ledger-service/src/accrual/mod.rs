//! 积分计算系统对接
//!
//! 积分系统是订单积分的权威来源。本模块定义查询结果、错误类型，
//! 以及 `AccrualAuthority` 抽象，HTTP 实现见 [`client`]。

mod client;

pub use client::HttpAccrualClient;

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::models::AccrualUpdate;

/// 积分系统侧的订单状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccrualStatus {
    /// 积分系统未登记该订单（HTTP 204）
    #[serde(skip)]
    Unregistered,
    /// 已登记，尚未开始计算
    Registered,
    /// 计算中
    Processing,
    /// 订单被拒绝，不产生积分
    Invalid,
    /// 计算完成
    Processed,
}

/// 单个订单的查询结果
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AccrualReport {
    pub order: String,
    pub status: AccrualStatus,
    #[serde(default, deserialize_with = "exact_decimal")]
    pub accrual: Option<Decimal>,
}

impl AccrualReport {
    /// 积分系统未登记的订单
    pub fn unregistered(order: &str) -> Self {
        Self {
            order: order.to_string(),
            status: AccrualStatus::Unregistered,
            accrual: None,
        }
    }

    pub fn registered(order: &str) -> Self {
        Self {
            order: order.to_string(),
            status: AccrualStatus::Registered,
            accrual: None,
        }
    }

    pub fn processing(order: &str) -> Self {
        Self {
            order: order.to_string(),
            status: AccrualStatus::Processing,
            accrual: None,
        }
    }

    pub fn invalid(order: &str) -> Self {
        Self {
            order: order.to_string(),
            status: AccrualStatus::Invalid,
            accrual: None,
        }
    }

    pub fn processed(order: &str, accrual: Decimal) -> Self {
        Self {
            order: order.to_string(),
            status: AccrualStatus::Processed,
            accrual: Some(accrual),
        }
    }

    /// 映射为本地订单更新
    ///
    /// - PROCESSED -> PROCESSED，携带积分（缺省为 0）
    /// - INVALID -> INVALID，积分为 0
    /// - REGISTERED / PROCESSING -> PROCESSING
    /// - 未登记 -> 不更新，订单保持 NEW
    pub fn to_update(&self) -> Option<AccrualUpdate> {
        match self.status {
            AccrualStatus::Unregistered => None,
            AccrualStatus::Registered | AccrualStatus::Processing => {
                Some(AccrualUpdate::processing())
            }
            AccrualStatus::Invalid => Some(AccrualUpdate::invalid()),
            AccrualStatus::Processed => Some(AccrualUpdate::processed(
                self.accrual.unwrap_or(Decimal::ZERO),
            )),
        }
    }
}

/// 按 JSON 数字的字面值解析积分，避免经过 f64
///
/// 依赖 serde_json 的 `arbitrary_precision` 特性保留原始数字文本。
fn exact_decimal<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let number = Option::<serde_json::Number>::deserialize(deserializer)?;
    number
        .map(|n| {
            let text = n.to_string();
            Decimal::from_str(&text)
                .or_else(|_| Decimal::from_scientific(&text))
                .map_err(serde::de::Error::custom)
        })
        .transpose()
}

/// 积分系统错误类型
#[derive(Debug, Error)]
pub enum AccrualError {
    #[error("积分系统请求失败: {0}")]
    Transport(String),

    #[error("积分系统请求超时: order_id={order_id}")]
    Timeout { order_id: String },

    #[error("积分系统限流，{retry_after:?} 后重试")]
    RateLimited { retry_after: Duration },

    #[error("积分系统返回非预期状态码: {status}")]
    UnexpectedStatus { status: u16 },

    #[error("积分系统响应解析失败: {0}")]
    Decode(String),
}

impl AccrualError {
    /// 指标与日志使用的错误分类
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Timeout { .. } => "timeout",
            Self::RateLimited { .. } => "rate_limited",
            Self::UnexpectedStatus { .. } => "unexpected_status",
            Self::Decode(_) => "decode",
        }
    }

    /// 下一轮对账时是否值得重试
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout { .. } | Self::RateLimited { .. } => true,
            Self::UnexpectedStatus { status } => *status >= 500,
            Self::Decode(_) => false,
        }
    }
}

/// 积分系统查询接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccrualAuthority: Send + Sync {
    /// 查询单个订单的积分状态
    async fn fetch(&self, order_id: &str) -> Result<AccrualReport, AccrualError>;
}
