//! ### English
//! Spin, then yield, then sleep backoff for waits on shared-memory control words.
//!
//! The peer lives in another process, so nothing can `unpark()` us; after the spin and yield
//! budgets are spent the waiter sleeps in short, growing steps capped at [`MAX_SLEEP`].
//!
//! ### 中文
//! 用于等待共享内存控制字的“自旋 → 让出调度 → 睡眠”退避工具。
//!
//! 对端位于另一个进程，无法 `unpark()` 我们；自旋与让出预算耗尽后，等待方以逐步增长、
//! 上限为 [`MAX_SLEEP`] 的短睡眠等待。

use std::thread;
use std::time::{Duration, Instant};

/// ### English
/// Spin budget before switching to `yield_now()`.
///
/// ### 中文
/// 在切换到 `yield_now()` 之前允许的自旋次数预算。
const SPIN_LIMIT: u32 = 64;

/// ### English
/// Yield budget (counted after the spin budget) before switching to sleeping.
///
/// ### 中文
/// 切换到睡眠之前的让出调度预算（在自旋预算之后计数）。
const YIELD_LIMIT: u32 = 128;

/// ### English
/// Upper bound for a single sleep step.
///
/// ### 中文
/// 单次睡眠步长的上限。
const MAX_SLEEP: Duration = Duration::from_millis(2);

/// ### English
/// Spin-then-yield-then-sleep backoff state.
///
/// ### 中文
/// “自旋 + 让出调度 + 睡眠”的退避状态。
pub(crate) struct Backoff {
    /// ### English
    /// Step counter used to pick the current phase.
    ///
    /// ### 中文
    /// 步数计数器，用于决定当前所处阶段。
    steps: u32,
}

impl Backoff {
    #[inline]
    pub(crate) fn new() -> Self {
        Self { steps: 0 }
    }

    /// ### English
    /// Performs one backoff step.
    ///
    /// ### 中文
    /// 执行一次退避步骤。
    #[inline]
    pub(crate) fn snooze(&mut self) {
        if self.steps < SPIN_LIMIT {
            std::hint::spin_loop();
        } else if self.steps < SPIN_LIMIT + YIELD_LIMIT {
            thread::yield_now();
        } else {
            let over = (self.steps - SPIN_LIMIT - YIELD_LIMIT).min(20);
            let sleep = Duration::from_micros(50 * u64::from(over + 1)).min(MAX_SLEEP);
            thread::sleep(sleep);
        }
        self.steps = self.steps.saturating_add(1);
    }

    /// ### English
    /// Performs one backoff step without sleeping past `deadline`.
    ///
    /// Returns `false` once the deadline has passed (caller should give up).
    ///
    /// ### 中文
    /// 执行一次退避步骤，但不会睡过 `deadline`。
    ///
    /// 截止时间已过时返回 `false`（调用方应放弃等待）。
    #[inline]
    pub(crate) fn snooze_until(&mut self, deadline: Instant) -> bool {
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        if self.steps >= SPIN_LIMIT + YIELD_LIMIT {
            let over = (self.steps - SPIN_LIMIT - YIELD_LIMIT).min(20);
            let sleep = Duration::from_micros(50 * u64::from(over + 1))
                .min(MAX_SLEEP)
                .min(deadline - now);
            thread::sleep(sleep);
            self.steps = self.steps.saturating_add(1);
        } else {
            self.snooze();
        }
        true
    }

    /// ### English
    /// Resets the backoff after progress was made.
    ///
    /// ### 中文
    /// 在取得进展后重置退避状态。
    #[inline]
    pub(crate) fn reset(&mut self) {
        self.steps = 0;
    }
}
