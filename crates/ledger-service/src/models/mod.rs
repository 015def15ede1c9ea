//! 积分账本领域模型
//!
//! 包含用户、订单、扣减流水以及派生余额的定义

pub mod enums;
pub mod ledger;

pub use enums::OrderStatus;
pub use ledger::{
    AccrualUpdate, ApplyOutcome, Balance, Order, SubmitOutcome, User, WithdrawOutcome, Withdrawal,
};
