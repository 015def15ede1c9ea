//! 订单状态定义
//!
//! 同时支持数据库（sqlx）和 JSON（serde）序列化

use serde::{Deserialize, Serialize};

/// 订单状态
///
/// 只允许单向流转：NEW -> PROCESSING -> {PROCESSED, INVALID}，
/// 终态之后不再变化。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// 已提交，积分系统尚未受理
    #[default]
    New,
    /// 积分系统已受理，计算中
    Processing,
    /// 积分系统拒绝，不会产生积分
    Invalid,
    /// 计算完成，积分已入账
    Processed,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 4] = [
        Self::New,
        Self::Processing,
        Self::Invalid,
        Self::Processed,
    ];

    /// 数据库与接口中使用的字符串形式
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Processing => "PROCESSING",
            Self::Invalid => "INVALID",
            Self::Processed => "PROCESSED",
        }
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Invalid | Self::Processed)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::New => 0,
            Self::Processing => 1,
            Self::Invalid | Self::Processed => 2,
        }
    }

    /// 是否允许从当前状态流转到 `next`
    ///
    /// 同状态不算流转；NEW 可以直接跳到终态。
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    /// 所有可以流转到 `next` 的前置状态
    pub fn predecessors(next: OrderStatus) -> Vec<OrderStatus> {
        Self::ALL
            .into_iter()
            .filter(|s| s.can_transition_to(next))
            .collect()
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
