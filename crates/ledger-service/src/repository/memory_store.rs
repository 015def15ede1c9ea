//! 内存账本存储
//!
//! 与 PostgreSQL 仓储语义一致的进程内实现，适用于测试和本地开发。
//! 所有操作在同一把锁内完成，天然满足单用户扣减串行化。

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;

use super::traits::{OrderRepositoryTrait, UserRepositoryTrait, WithdrawalRepositoryTrait};
use crate::error::{LedgerError, Result};
use crate::models::{
    AccrualUpdate, ApplyOutcome, Balance, Order, SubmitOutcome, User, WithdrawOutcome, Withdrawal,
};

#[derive(Default)]
struct LedgerState {
    users: HashMap<String, User>,
    /// 按订单号字节序存放
    orders: BTreeMap<String, Order>,
    withdrawals: Vec<Withdrawal>,
}

impl LedgerState {
    fn require_user(&self, login: &str) -> Result<()> {
        if self.users.contains_key(login) {
            Ok(())
        } else {
            Err(LedgerError::UserNotFound(login.to_string()))
        }
    }

    fn balance(&self, login: &str) -> Result<Balance> {
        Balance::aggregate(
            self.orders.values().filter(|o| o.login == login),
            self.withdrawals.iter().filter(|w| w.login == login),
        )
    }
}

/// 内存账本存储
#[derive(Default)]
pub struct MemoryLedgerStore {
    state: Mutex<LedgerState>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 读取单个订单
    pub fn get_order(&self, order_id: &str) -> Option<Order> {
        self.state.lock().orders.get(order_id).cloned()
    }

    /// 订单总数
    pub fn order_count(&self) -> usize {
        self.state.lock().orders.len()
    }
}

#[async_trait]
impl UserRepositoryTrait for MemoryLedgerStore {
    async fn create_user(
        &self,
        login: &str,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if state.users.contains_key(login) {
            return Err(LedgerError::UserAlreadyExists(login.to_string()));
        }
        state.users.insert(
            login.to_string(),
            User {
                login: login.to_string(),
                password_hash: password_hash.to_string(),
                created_at: now,
            },
        );
        Ok(())
    }

    async fn get_user(&self, login: &str) -> Result<Option<User>> {
        Ok(self.state.lock().users.get(login).cloned())
    }
}

#[async_trait]
impl OrderRepositoryTrait for MemoryLedgerStore {
    async fn submit_order(
        &self,
        login: &str,
        order_id: &str,
        now: DateTime<Utc>,
    ) -> Result<SubmitOutcome> {
        let mut state = self.state.lock();
        state.require_user(login)?;

        if let Some(existing) = state.orders.get(order_id) {
            return Ok(if existing.login == login {
                SubmitOutcome::AlreadyOwnedBySelf
            } else {
                SubmitOutcome::OwnedByOther
            });
        }

        state
            .orders
            .insert(order_id.to_string(), Order::new(order_id, login, now));
        Ok(SubmitOutcome::Accepted)
    }

    async fn list_orders(&self, login: &str) -> Result<Vec<Order>> {
        let state = self.state.lock();
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.login == login)
            .cloned()
            .collect();
        orders.sort_by(|a, b| {
            a.uploaded_at
                .cmp(&b.uploaded_at)
                .then_with(|| a.order_id.cmp(&b.order_id))
        });
        Ok(orders)
    }

    async fn list_pending_orders(&self, after: Option<String>, limit: i64) -> Result<Vec<String>> {
        let limit = usize::try_from(limit).unwrap_or(0);
        let state = self.state.lock();
        Ok(state
            .orders
            .values()
            .filter(|o| !o.status.is_terminal())
            .filter(|o| after.as_ref().is_none_or(|cursor| o.order_id > *cursor))
            .take(limit)
            .map(|o| o.order_id.clone())
            .collect())
    }

    async fn apply_accrual(&self, order_id: &str, update: AccrualUpdate) -> Result<ApplyOutcome> {
        let mut state = self.state.lock();
        Ok(match state.orders.get_mut(order_id) {
            Some(order) => order.apply(&update),
            None => ApplyOutcome::Unchanged,
        })
    }
}

#[async_trait]
impl WithdrawalRepositoryTrait for MemoryLedgerStore {
    async fn withdraw(
        &self,
        login: &str,
        order_id: &str,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<WithdrawOutcome> {
        let mut state = self.state.lock();
        state.require_user(login)?;

        if state
            .withdrawals
            .iter()
            .any(|w| w.login == login && w.order_id == order_id)
        {
            return Ok(WithdrawOutcome::DuplicateReference);
        }

        let balance = state.balance(login)?;
        if !balance.covers(amount) {
            return Ok(WithdrawOutcome::InsufficientBalance {
                available: balance.current,
            });
        }

        let withdrawal = Withdrawal {
            login: login.to_string(),
            order_id: order_id.to_string(),
            amount,
            processed_at: now,
        };
        state.withdrawals.push(withdrawal.clone());
        Ok(WithdrawOutcome::Committed(withdrawal))
    }

    async fn list_withdrawals(&self, login: &str) -> Result<Vec<Withdrawal>> {
        let state = self.state.lock();
        let mut withdrawals: Vec<Withdrawal> = state
            .withdrawals
            .iter()
            .filter(|w| w.login == login)
            .cloned()
            .collect();
        withdrawals.sort_by(|a, b| {
            a.processed_at
                .cmp(&b.processed_at)
                .then_with(|| a.order_id.cmp(&b.order_id))
        });
        Ok(withdrawals)
    }

    async fn get_balance(&self, login: &str) -> Result<Balance> {
        self.state.lock().balance(login)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderStatus;
    use std::sync::Arc;
    use rust_decimal_macros::dec;

    async fn store_with_user(login: &str) -> MemoryLedgerStore {
        let store = MemoryLedgerStore::new();
        store.create_user(login, "hash", Utc::now()).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_create_user_rejects_duplicate_login() {
        let store = store_with_user("alice").await;
        let err = store
            .create_user("alice", "other", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::UserAlreadyExists(_)));
        let user = store.get_user("alice").await.unwrap().unwrap();
        assert_eq!(user.password_hash, "hash");
    }

    #[tokio::test]
    async fn test_submit_order_ownership() {
        let store = store_with_user("alice").await;
        store.create_user("bob", "hash", Utc::now()).await.unwrap();

        let now = Utc::now();
        assert_eq!(
            store.submit_order("alice", "79927398713", now).await.unwrap(),
            SubmitOutcome::Accepted
        );
        assert_eq!(
            store.submit_order("alice", "79927398713", now).await.unwrap(),
            SubmitOutcome::AlreadyOwnedBySelf
        );
        assert_eq!(
            store.submit_order("bob", "79927398713", now).await.unwrap(),
            SubmitOutcome::OwnedByOther
        );
        assert_eq!(store.order_count(), 1);
        assert!(store.list_orders("bob").await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_submissions_have_one_owner() {
        let store = Arc::new(store_with_user("alice").await);
        store.create_user("bob", "hash", Utc::now()).await.unwrap();

        for round in 0..20u64 {
            let order_id = format!("{}", 1_000_000 + round);
            let tasks: Vec<_> = ["alice", "bob", "alice", "bob"]
                .into_iter()
                .map(|login| {
                    let store = store.clone();
                    let order_id = order_id.clone();
                    tokio::spawn(async move {
                        store.submit_order(login, &order_id, Utc::now()).await
                    })
                })
                .collect();
            let results = futures::future::join_all(tasks).await;

            let accepted = results
                .iter()
                .filter(|r| matches!(r, Ok(Ok(SubmitOutcome::Accepted))))
                .count();
            assert_eq!(accepted, 1, "order {order_id}");
            assert!(results.iter().all(|r| matches!(r, Ok(Ok(_)))));

            let owner = store.get_order(&order_id).unwrap().login;
            let owner_copies = results
                .iter()
                .filter(|r| matches!(r, Ok(Ok(SubmitOutcome::AlreadyOwnedBySelf))))
                .count();
            let others = results
                .iter()
                .filter(|r| matches!(r, Ok(Ok(SubmitOutcome::OwnedByOther))))
                .count();
            // 获胜者的另一次提交视为重复，对方两次均为冲突
            assert_eq!(owner_copies, 1, "owner {owner}");
            assert_eq!(others, 2);
        }
        assert_eq!(store.order_count(), 20);
    }

    #[tokio::test]
    async fn test_submit_order_requires_user() {
        let store = MemoryLedgerStore::new();
        let err = store
            .submit_order("ghost", "79927398713", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::UserNotFound(_)));
    }

    #[tokio::test]
    async fn test_list_pending_orders_pages_by_byte_order() {
        let store = store_with_user("alice").await;
        let now = Utc::now();
        for id in ["30", "100", "20", "9"] {
            store.submit_order("alice", id, now).await.unwrap();
        }
        store
            .apply_accrual("20", AccrualUpdate::invalid())
            .await
            .unwrap();

        let first = store.list_pending_orders(None, 2).await.unwrap();
        assert_eq!(first, vec!["100", "30"]);

        let second = store
            .list_pending_orders(Some("30".to_string()), 2)
            .await
            .unwrap();
        assert_eq!(second, vec!["9"]);
    }

    #[tokio::test]
    async fn test_apply_accrual_on_unknown_order_is_unchanged() {
        let store = MemoryLedgerStore::new();
        let outcome = store
            .apply_accrual("79927398713", AccrualUpdate::processed(dec!(10)))
            .await
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_withdrawals_with_equal_timestamps_list_by_order_id() {
        let store = store_with_user("alice").await;
        let now = Utc::now();
        store.submit_order("alice", "79927398713", now).await.unwrap();
        store
            .apply_accrual("79927398713", AccrualUpdate::processed(dec!(100)))
            .await
            .unwrap();

        for reference in ["9278923470", "2377225624"] {
            store
                .withdraw("alice", reference, dec!(10), now)
                .await
                .unwrap();
        }

        let history = store.list_withdrawals("alice").await.unwrap();
        let ids: Vec<&str> = history.iter().map(|w| w.order_id.as_str()).collect();
        assert_eq!(ids, vec!["2377225624", "9278923470"]);
    }

    #[tokio::test]
    async fn test_balance_overflow_is_reported_not_panicking() {
        let store = store_with_user("alice").await;
        let now = Utc::now();
        for id in ["79927398713", "2377225624"] {
            store.submit_order("alice", id, now).await.unwrap();
            store
                .apply_accrual(id, AccrualUpdate::processed(Decimal::MAX))
                .await
                .unwrap();
        }

        let err = store.get_balance("alice").await.unwrap_err();
        assert!(matches!(err, LedgerError::Internal(_)));
        let err = store
            .withdraw("alice", "9278923470", dec!(1), now)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Internal(_)));
    }

    #[tokio::test]
    async fn test_withdraw_checks_balance_and_duplicates() {
        let store = store_with_user("alice").await;
        let now = Utc::now();
        store.submit_order("alice", "79927398713", now).await.unwrap();
        store
            .apply_accrual("79927398713", AccrualUpdate::processed(dec!(729.98)))
            .await
            .unwrap();

        let outcome = store
            .withdraw("alice", "2377225624", dec!(751), now)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            WithdrawOutcome::InsufficientBalance {
                available: dec!(729.98)
            }
        );
        assert!(store.list_withdrawals("alice").await.unwrap().is_empty());

        let outcome = store
            .withdraw("alice", "2377225624", dec!(700.98), now)
            .await
            .unwrap();
        assert!(matches!(outcome, WithdrawOutcome::Committed(_)));

        let outcome = store
            .withdraw("alice", "2377225624", dec!(1), now)
            .await
            .unwrap();
        assert_eq!(outcome, WithdrawOutcome::DuplicateReference);

        let balance = store.get_balance("alice").await.unwrap();
        assert_eq!(balance.current, dec!(29));
        assert_eq!(balance.withdrawn, dec!(700.98));

        let order = store.get_order("79927398713").unwrap();
        assert_eq!(order.status, OrderStatus::Processed);
    }
}
