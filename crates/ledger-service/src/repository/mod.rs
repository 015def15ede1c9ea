//! 数据库仓储层
//!
//! 提供用户、订单与扣减流水的数据访问接口，封装 SQL 操作细节。
//!
//! ## 设计原则
//!
//! - 仓储只负责数据持久化，不包含业务校验
//! - 需要原子性的操作（订单归属、余额扣减）在仓储内部完成
//! - 定义 trait 接口以支持 mock 测试和内存实现

mod memory_store;
mod order_repo;
mod traits;
mod user_repo;
mod withdrawal_repo;

pub use memory_store::MemoryLedgerStore;
pub use order_repo::OrderRepository;
pub use traits::*;
pub use user_repo::UserRepository;
pub use withdrawal_repo::WithdrawalRepository;
