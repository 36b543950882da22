// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@on1.no>

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Bounded attempts with exponential backoff between them.
///
/// The wait after failed attempt `n` (zero-based) is `base_delay * multiplier^n`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, multiplier: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            multiplier: multiplier.max(1),
        }
    }

    pub fn delay_for(&self, attempt_index: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt_index);
        self.base_delay.saturating_mul(factor)
    }

    /// True when another attempt is allowed after `attempts_used` attempts.
    pub fn allows_another(&self, attempts_used: u32) -> bool {
        attempts_used < self.max_attempts
    }
}

/// Timed wait used by backoff and pacing, swappable in tests.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Waits for `duration` unless `cancel` fires first. Returns false when cancelled.
pub async fn sleep_or_cancel(
    sleeper: &dyn Sleeper,
    duration: Duration,
    cancel: &CancellationToken,
) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = sleeper.sleep(duration) => true,
    }
}

/// Retry an async operation with exponential backoff. The last error is
/// returned without a trailing wait.
pub async fn retry_async<F, Fut, T, E>(mut op: F, policy: &RetryPolicy) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match op(attempt + 1).await {
            Ok(v) => return Ok(v),
            Err(_) if policy.allows_another(attempt + 1) => {
                tokio::time::sleep(policy.delay_for(attempt)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use recording::RecordingSleeper;

#[cfg(any(test, feature = "test-utils"))]
mod recording {
    use super::Sleeper;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records requested waits and returns immediately.
    #[derive(Debug, Default)]
    pub struct RecordingSleeper {
        waits: Mutex<Vec<Duration>>,
    }

    impl RecordingSleeper {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn waits(&self) -> Vec<Duration> {
            self.waits
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone()
        }
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.waits
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(duration);
            tokio::task::yield_now().await;
        }
    }
}
