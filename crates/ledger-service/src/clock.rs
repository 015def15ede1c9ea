//! 时钟抽象
//!
//! 服务与对账 Worker 通过 `Clock` 读取当前时间并等待，测试中注入 `ManualClock`
//! 即可在不依赖真实定时器的情况下驱动轮询循环。

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// 时钟接口
#[async_trait]
pub trait Clock: Send + Sync {
    /// 当前时间
    fn now(&self) -> DateTime<Utc>;

    /// 等待指定时长
    async fn sleep(&self, duration: Duration);
}

/// 系统时钟（生产环境）
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// 手动时钟
///
/// `sleep` 不真正等待：推进内部时间、记录等待时长后让出调度。
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    /// 手动推进时间
    pub fn advance(&self, duration: Duration) {
        let step = chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX);
        let mut now = self.now.lock();
        *now = now.checked_add_signed(step).unwrap_or(*now);
    }

    /// 至今为止所有 sleep 调用的时长
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}
