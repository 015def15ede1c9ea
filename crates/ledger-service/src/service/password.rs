//! 密码处理
//!
//! bcrypt 计算耗时较长，放到阻塞线程池执行，避免占用异步工作线程

use bcrypt::{hash, verify};

use crate::error::{LedgerError, Result};

/// 对密码进行哈希处理
pub async fn hash_password(password: &str, cost: u32) -> Result<String> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || hash(password, cost))
        .await
        .map_err(|e| LedgerError::Internal(format!("密码哈希任务失败: {e}")))?
        .map_err(|e| LedgerError::Internal(format!("密码哈希失败: {e}")))
}

/// 验证密码
///
/// 比较明文密码与存储的哈希值
pub async fn verify_password(password: &str, hashed: &str) -> Result<bool> {
    let password = password.to_string();
    let hashed = hashed.to_string();
    tokio::task::spawn_blocking(move || verify(password, &hashed))
        .await
        .map_err(|e| LedgerError::Internal(format!("密码验证任务失败: {e}")))?
        .map_err(|e| LedgerError::Internal(format!("密码验证失败: {e}")))
}
