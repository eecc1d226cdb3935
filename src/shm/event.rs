//! ### English
//! Manual-reset event shared between processes through one word of shared memory.
//!
//! ### 中文
//! 通过一个共享内存字在进程间共享的手动复位事件。

use std::path::Path;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use super::{SharedRegion, ShmError};
use crate::lockfree::Backoff;

const EVENT_BYTES: usize = 8;
const SIGNALED: u32 = 1;

/// ### English
/// Named manual-reset event. Once [`set`](Self::set) it stays signaled until
/// [`reset`](Self::reset); every waiter in either process observes it.
///
/// ### 中文
/// 命名手动复位事件。一旦 [`set`](Self::set)，在 [`reset`](Self::reset) 之前始终保持触发状态；
/// 任一进程中的所有等待方都能观察到。
#[derive(Debug)]
pub struct NamedEvent {
    region: SharedRegion,
}

impl NamedEvent {
    pub fn create(dir: &Path, name: &str) -> Result<Self, ShmError> {
        let region = SharedRegion::create(dir, name, EVENT_BYTES)?;
        Ok(Self { region })
    }

    pub fn open(dir: &Path, name: &str) -> Result<Self, ShmError> {
        let region = SharedRegion::open(dir, name)?;
        if region.len() < EVENT_BYTES {
            return Err(ShmError::TooSmall {
                name: name.to_string(),
                len: region.len(),
                required: EVENT_BYTES,
            });
        }
        Ok(Self { region })
    }

    pub fn name(&self) -> &str {
        self.region.name()
    }

    fn word(&self) -> Result<&std::sync::atomic::AtomicU32, ShmError> {
        self.region.atomic_u32(0)
    }

    pub fn set(&self) -> Result<(), ShmError> {
        self.word()?.store(SIGNALED, Ordering::Release);
        Ok(())
    }

    pub fn reset(&self) -> Result<(), ShmError> {
        self.word()?.store(0, Ordering::Release);
        Ok(())
    }

    pub fn is_set(&self) -> bool {
        self.word()
            .is_ok_and(|word| word.load(Ordering::Acquire) == SIGNALED)
    }

    /// ### English
    /// Waits up to `timeout` for the event. Returns whether it was observed set.
    ///
    /// ### 中文
    /// 最长等待 `timeout` 直到事件被触发。返回是否观察到触发。
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut backoff = Backoff::new();
        loop {
            if self.is_set() {
                return true;
            }
            if !backoff.snooze_until(deadline) {
                return self.is_set();
            }
        }
    }
}
