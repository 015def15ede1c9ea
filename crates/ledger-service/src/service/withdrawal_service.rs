//! 积分扣减服务
//!
//! 校验金额与流水号后交给仓储，余额检查与写入在同一事务内完成

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, instrument, warn};

use loyalty_shared::observability::metrics;

use super::validate_order_id;
use crate::clock::Clock;
use crate::error::{LedgerError, Result};
use crate::models::{Balance, WithdrawOutcome, Withdrawal};
use crate::repository::WithdrawalRepositoryTrait;

/// 积分扣减服务
pub struct WithdrawalService<R: WithdrawalRepositoryTrait> {
    withdrawals: Arc<R>,
    clock: Arc<dyn Clock>,
}

impl<R: WithdrawalRepositoryTrait> WithdrawalService<R> {
    pub fn new(withdrawals: Arc<R>, clock: Arc<dyn Clock>) -> Self {
        Self { withdrawals, clock }
    }

    /// 扣减积分
    ///
    /// 成功时返回已提交的流水；余额不足或流水号重复时返回对应错误，不写入任何数据
    #[instrument(skip(self))]
    pub async fn withdraw(
        &self,
        login: &str,
        order_id: &str,
        amount: Decimal,
    ) -> Result<Withdrawal> {
        if amount <= Decimal::ZERO {
            metrics::record_withdrawal("invalid");
            return Err(LedgerError::InvalidAmount(amount));
        }
        if let Err(e) = validate_order_id(order_id) {
            metrics::record_withdrawal("invalid");
            return Err(e);
        }

        let outcome = match self
            .withdrawals
            .withdraw(login, order_id, amount, self.clock.now())
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                metrics::record_withdrawal("error");
                return Err(e);
            }
        };

        match outcome {
            WithdrawOutcome::Committed(withdrawal) => {
                metrics::record_withdrawal("committed");
                info!(login = %login, order_id = %order_id, "积分扣减成功");
                Ok(withdrawal)
            }
            WithdrawOutcome::InsufficientBalance { available } => {
                metrics::record_withdrawal("insufficient");
                warn!(login = %login, %available, "积分余额不足");
                Err(LedgerError::InsufficientBalance {
                    required: amount,
                    available,
                })
            }
            WithdrawOutcome::DuplicateReference => {
                metrics::record_withdrawal("duplicate");
                Err(LedgerError::DuplicateWithdrawal(order_id.to_string()))
            }
        }
    }

    /// 当前余额与累计扣减
    #[instrument(skip(self))]
    pub async fn balance(&self, login: &str) -> Result<Balance> {
        self.withdrawals.get_balance(login).await
    }

    /// 扣减流水，按处理时间升序
    #[instrument(skip(self))]
    pub async fn list_withdrawals(&self, login: &str) -> Result<Vec<Withdrawal>> {
        self.withdrawals.list_withdrawals(login).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::repository::MockWithdrawalRepositoryTrait;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn service(
        repo: MockWithdrawalRepositoryTrait,
    ) -> WithdrawalService<MockWithdrawalRepositoryTrait> {
        WithdrawalService::new(Arc::new(repo), Arc::new(ManualClock::default()))
    }

    #[tokio::test]
    async fn test_non_positive_amount_rejected_before_store() {
        let mut repo = MockWithdrawalRepositoryTrait::new();
        repo.expect_withdraw().never();

        let withdrawals = service(repo);
        for amount in [dec!(0), dec!(-0.01)] {
            let err = withdrawals
                .withdraw("alice", "2377225624", amount)
                .await
                .unwrap_err();
            assert!(matches!(err, LedgerError::InvalidAmount(_)));
        }
        let err = withdrawals
            .withdraw("alice", "2377225625", dec!(1))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidOrderNumber(_)));
    }

    #[tokio::test]
    async fn test_insufficient_balance_reports_amounts() {
        let mut repo = MockWithdrawalRepositoryTrait::new();
        repo.expect_withdraw()
            .times(1)
            .returning(|_, _, _, _| {
                Ok(WithdrawOutcome::InsufficientBalance {
                    available: dec!(729.98),
                })
            });

        let err = service(repo)
            .withdraw("alice", "2377225624", dec!(751))
            .await
            .unwrap_err();
        match err {
            LedgerError::InsufficientBalance { required, available } => {
                assert_eq!(required, dec!(751));
                assert_eq!(available, dec!(729.98));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_committed_and_duplicate() {
        let mut repo = MockWithdrawalRepositoryTrait::new();
        let mut seq = mockall::Sequence::new();
        repo.expect_withdraw()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|login, order_id, amount, now| {
                Ok(WithdrawOutcome::Committed(Withdrawal {
                    login: login.to_string(),
                    order_id: order_id.to_string(),
                    amount,
                    processed_at: now,
                }))
            });
        repo.expect_withdraw()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| Ok(WithdrawOutcome::DuplicateReference));

        let withdrawals = service(repo);
        let committed = withdrawals
            .withdraw("alice", "2377225624", dec!(100.5))
            .await
            .unwrap();
        assert_eq!(committed.amount, dec!(100.5));
        assert!(committed.processed_at <= Utc::now());

        let err = withdrawals
            .withdraw("alice", "2377225624", dec!(100.5))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateWithdrawal(_)));
    }
}
