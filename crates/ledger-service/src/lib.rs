//! 积分账本服务
//!
//! 维护用户订单与积分扣减流水，并与外部积分计算系统对账。
//!
//! ## 核心功能
//!
//! - **订单提交**：Luhn 校验后原子登记订单归属，重复提交幂等
//! - **积分对账**：后台 Worker 轮询积分系统，单向推进订单状态并写入积分
//! - **积分扣减**：同一事务内校验余额并写入流水，余额永不为负
//! - **余额查询**：由已结算订单与扣减流水实时聚合
//! - **账户**：注册与凭证校验（bcrypt）
//!
//! ## 模块结构
//!
//! - `models`: 领域模型定义
//! - `error`: 错误类型定义
//! - `luhn`: 订单号校验
//! - `clock`: 可注入的时钟
//! - `repository`: 仓储层（PostgreSQL 与内存实现）
//! - `accrual`: 积分系统客户端
//! - `service`: 业务服务层
//! - `worker`: 对账 Worker

pub mod accrual;
pub mod clock;
pub mod error;
pub mod luhn;
pub mod models;
pub mod repository;
pub mod service;
pub mod worker;

use sqlx::migrate::Migrator;

pub use accrual::{AccrualAuthority, AccrualError, AccrualReport, AccrualStatus, HttpAccrualClient};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{LedgerError, Result};
pub use models::{Balance, Order, OrderStatus, SubmitOutcome, User, Withdrawal};
pub use repository::{
    MemoryLedgerStore, OrderRepository, OrderRepositoryTrait, UserRepository,
    UserRepositoryTrait, WithdrawalRepository, WithdrawalRepositoryTrait,
};
pub use service::{AccountService, OrderService, WithdrawalService};
pub use worker::{AccrualReconciler, CycleReport};

/// 编译期嵌入的数据库迁移
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");
