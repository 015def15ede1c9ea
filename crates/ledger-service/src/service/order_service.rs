//! 订单服务
//!
//! 订单提交：校验订单号 -> 原子登记归属 -> 按归属结果返回

use std::sync::Arc;

use tracing::{info, instrument, warn};

use loyalty_shared::observability::metrics;

use super::validate_order_id;
use crate::clock::Clock;
use crate::error::{LedgerError, Result};
use crate::models::{Order, SubmitOutcome};
use crate::repository::OrderRepositoryTrait;

/// 订单服务
pub struct OrderService<R: OrderRepositoryTrait> {
    orders: Arc<R>,
    clock: Arc<dyn Clock>,
}

impl<R: OrderRepositoryTrait> OrderService<R> {
    pub fn new(orders: Arc<R>, clock: Arc<dyn Clock>) -> Self {
        Self { orders, clock }
    }

    /// 提交订单
    ///
    /// 返回 `Accepted`（新订单）或 `AlreadyOwnedBySelf`（幂等重复提交）；
    /// 订单属于其他用户时返回 `OrderOwnedByOther`，账本不变。
    #[instrument(skip(self))]
    pub async fn submit(&self, login: &str, order_id: &str) -> Result<SubmitOutcome> {
        if let Err(e) = validate_order_id(order_id) {
            metrics::record_order_submission("invalid");
            return Err(e);
        }

        let outcome = match self
            .orders
            .submit_order(login, order_id, self.clock.now())
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                metrics::record_order_submission("error");
                return Err(e);
            }
        };

        match outcome {
            SubmitOutcome::Accepted => {
                metrics::record_order_submission("accepted");
                info!(login = %login, order_id = %order_id, "订单已受理");
                Ok(outcome)
            }
            SubmitOutcome::AlreadyOwnedBySelf => {
                metrics::record_order_submission("duplicate");
                Ok(outcome)
            }
            SubmitOutcome::OwnedByOther => {
                metrics::record_order_submission("conflict");
                warn!(login = %login, order_id = %order_id, "订单已被其他用户提交");
                Err(LedgerError::OrderOwnedByOther(order_id.to_string()))
            }
        }
    }

    /// 用户订单列表，按提交时间升序
    #[instrument(skip(self))]
    pub async fn list_orders(&self, login: &str) -> Result<Vec<Order>> {
        self.orders.list_orders(login).await
    }
}
