use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// 两次尝试之间的等待策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    #[default]
    Fixed,
    Exponential,
}

/// 有界重试策略，写入文件与请求接口共用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// 总尝试次数（包含第一次），小于 1 时按 1 处理
    pub max_attempts: u32,
    pub delay_ms: u64,
    #[serde(default)]
    pub backoff: Backoff,
}

/// 单次尝试的结果，由调用方决定该错误是否值得重试
pub enum RetryAction<T, E> {
    Success(T),
    Retry(E),
    Fail(E),
}

#[derive(Debug)]
pub enum RetryError<E> {
    /// 所有尝试均遇到可重试的错误，last 为最后一次的错误
    Exhausted { attempts: u32, last: E },
    /// 遇到了不可重试的错误
    Failed(E),
    Cancelled,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay_ms: delay.as_millis() as u64,
            backoff: Backoff::Fixed,
        }
    }

    /// 第 attempt 次（从 1 开始）失败后需要等待的时间
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = Duration::from_millis(self.delay_ms);
        match self.backoff {
            Backoff::Fixed => base,
            Backoff::Exponential => match 1u32.checked_shl(attempt.saturating_sub(1)) {
                Some(multiplier) => base.checked_mul(multiplier).unwrap_or(Duration::MAX),
                None => Duration::MAX,
            },
        }
    }

    pub async fn run<F, Fut, T, E>(&self, token: &CancellationToken, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = RetryAction<T, E>>,
        E: Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            if token.is_cancelled() {
                return Err(RetryError::Cancelled);
            }
            match operation(attempt).await {
                RetryAction::Success(value) => return Ok(value),
                RetryAction::Fail(err) => return Err(RetryError::Failed(err)),
                RetryAction::Retry(err) => {
                    if attempt >= max_attempts {
                        return Err(RetryError::Exhausted { attempts: attempt, last: err });
                    }
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        "第 {}/{} 次尝试失败：{}，{}ms 后重试",
                        attempt,
                        max_attempts,
                        err,
                        delay.as_millis()
                    );
                    if token.run_until_cancelled(tokio::time::sleep(delay)).await.is_none() {
                        return Err(RetryError::Cancelled);
                    }
                    attempt += 1;
                }
            }
        }
    }
}

impl<E> RetryError<E> {
    /// 取出导致失败的错误，取消时返回 None
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Exhausted { last, .. } | RetryError::Failed(last) => Some(last),
            RetryError::Cancelled => None,
        }
    }
}
