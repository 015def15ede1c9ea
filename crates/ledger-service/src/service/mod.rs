//! 业务服务层
//!
//! 调用方（HTTP / 鉴权层）负责识别用户，登录名作为显式参数传入每个操作。
//! 校验在访问存储之前完成，原子性由仓储保证。

mod account_service;
mod order_service;
mod password;
mod withdrawal_service;

pub use account_service::AccountService;
pub use order_service::OrderService;
pub use password::{hash_password, verify_password};
pub use withdrawal_service::WithdrawalService;

use crate::error::{LedgerError, Result};
use crate::luhn;

/// 订单号最大长度，与 orders.order_id 列宽一致
pub const MAX_ORDER_ID_LEN: usize = 64;

/// 校验订单号或扣减流水号
pub(crate) fn validate_order_id(order_id: &str) -> Result<()> {
    if order_id.len() > MAX_ORDER_ID_LEN || !luhn::is_valid(order_id) {
        return Err(LedgerError::InvalidOrderNumber(order_id.to_string()));
    }
    Ok(())
}
