//! ### English
//! Lock-free bounded ring of variable-length records living inside a [`SharedRegion`].
//!
//! Layout at `offset` inside the region (all words little-endian `u32` atomics):
//!
//! | word | meaning |
//! |---|---|
//! | 0 | `head` (consumer position) |
//! | 1 | `tail_reserve` (producer reservation) |
//! | 2 | `tail_commit` (in-order committed tail) |
//! | 3 | `capacity` in bytes |
//!
//! followed by `capacity` data bytes. The capacity is a power of two so byte indices stay
//! consistent when the `u32` positions wrap. Records are a `u32` length prefix plus payload, padded to
//! [`RECORD_ALIGN`]. When a record does not fit before the end of the buffer the producer writes
//! [`WRAP_MARKER`] and restarts at offset 0; fewer than 4 trailing bytes are skipped implicitly.
//! Multiple producers reserve with a CAS on `tail_reserve` and commit in reservation order.
//!
//! ### 中文
//! 位于 [`SharedRegion`] 内部的变长记录有界无锁环形缓冲区。
//!
//! 区域内 `offset` 处的布局（均为小端 `u32` 原子字）：
//!
//! | 字 | 含义 |
//! |---|---|
//! | 0 | `head`（消费者位置） |
//! | 1 | `tail_reserve`（生产者预留位置） |
//! | 2 | `tail_commit`（按序提交的尾部） |
//! | 3 | `capacity`（字节数） |
//!
//! 之后是 `capacity` 字节的数据区。容量为 2 的幂，保证 `u32` 位置回绕时字节索引仍然一致。记录由 `u32` 长度前缀与负载组成，并按 [`RECORD_ALIGN`]
//! 对齐。记录无法在缓冲区末尾之前放下时，生产者写入 [`WRAP_MARKER`] 并从 0 重新开始；
//! 末尾不足 4 字节时隐式跳过。多个生产者通过 `tail_reserve` 上的 CAS 预留，并按预留顺序提交。

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use super::{SharedRegion, ShmError};
use crate::lockfree::Backoff;

pub const RECORD_ALIGN: usize = 4;
pub const WRAP_MARKER: u32 = 0xFFFF_FFFF;

const HEADER_BYTES: usize = 16;
const HEAD: usize = 0;
const TAIL_RESERVE: usize = 4;
const TAIL_COMMIT: usize = 8;
const CAPACITY: usize = 12;
const MAX_CAPACITY: usize = 1 << 31;

#[inline]
const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

#[inline]
const fn ring_capacity(requested: usize) -> usize {
    if requested <= RECORD_ALIGN {
        RECORD_ALIGN
    } else {
        requested.next_power_of_two()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PushError {
    #[error("ring is full")]
    Full,
    #[error("record does not fit in the ring")]
    TooLarge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PopError {
    /// ### English
    /// Nothing committed (or the wait timed out).
    ///
    /// ### 中文
    /// 没有已提交记录（或等待超时）。
    #[error("ring is empty")]
    Empty,
    /// ### English
    /// A bogus length was found; the peer wrote garbage.
    ///
    /// ### 中文
    /// 读到非法长度；对端写入了垃圾数据。
    #[error("ring contents are corrupt")]
    Corrupt,
}

/// ### English
/// Handle to one ring inside a shared region. Cheap to clone; clones address the same ring.
///
/// ### 中文
/// 指向共享区域内某个环形缓冲区的句柄。克隆开销很小，克隆体指向同一个环。
#[derive(Clone)]
pub struct ShmRing {
    region: Arc<SharedRegion>,
    data: usize,
    cap: u32,
    head: *const AtomicU32,
    tail_reserve: *const AtomicU32,
    tail_commit: *const AtomicU32,
}

// The control words point into `region`, which the ring keeps alive.
unsafe impl Send for ShmRing {}
unsafe impl Sync for ShmRing {}

impl std::fmt::Debug for ShmRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmRing")
            .field("region", &self.region.name())
            .field("capacity", &self.cap)
            .finish()
    }
}

impl ShmRing {
    /// ### English
    /// Bytes a ring with `capacity` data bytes occupies (header included).
    ///
    /// ### 中文
    /// 数据区为 `capacity` 字节的环形缓冲区所占字节数（含头部）。
    pub const fn bytes_for(capacity: usize) -> usize {
        HEADER_BYTES + ring_capacity(capacity)
    }

    /// ### English
    /// Formats a fresh ring at `offset` (creator side).
    ///
    /// #### Parameters
    /// - `region`: Region holding the ring.
    /// - `offset`: Byte offset of the ring header (4-byte aligned).
    /// - `capacity`: Data bytes; rounded up to a power of two.
    ///
    /// ### 中文
    /// 在 `offset` 处初始化一个新的环（创建方）。
    ///
    /// #### 参数
    /// - `region`：容纳该环的区域。
    /// - `offset`：环头部的字节偏移（4 字节对齐）。
    /// - `capacity`：数据区字节数；向上取整到 2 的幂。
    pub fn init(region: Arc<SharedRegion>, offset: usize, capacity: usize) -> Result<Self, ShmError> {
        if capacity > MAX_CAPACITY {
            return Err(ShmError::CorruptHeader {
                name: region.name().to_string(),
            });
        }
        let capacity = ring_capacity(capacity);
        if capacity < RECORD_ALIGN {
            return Err(ShmError::CorruptHeader {
                name: region.name().to_string(),
            });
        }
        let required = offset.saturating_add(Self::bytes_for(capacity));
        if required > region.len() {
            return Err(ShmError::TooSmall {
                name: region.name().to_string(),
                len: region.len(),
                required,
            });
        }

        region.atomic_u32(offset + HEAD)?.store(0, Ordering::Relaxed);
        region.atomic_u32(offset + TAIL_RESERVE)?.store(0, Ordering::Relaxed);
        region.atomic_u32(offset + TAIL_COMMIT)?.store(0, Ordering::Relaxed);
        region
            .atomic_u32(offset + CAPACITY)?
            .store(capacity as u32, Ordering::Release);
        Self::attach(region, offset)
    }

    /// ### English
    /// Attaches to a ring the peer already formatted at `offset`.
    ///
    /// ### 中文
    /// 连接到对端已在 `offset` 处初始化好的环。
    pub fn attach(region: Arc<SharedRegion>, offset: usize) -> Result<Self, ShmError> {
        let cap = region.atomic_u32(offset + CAPACITY)?.load(Ordering::Acquire);
        let fits = offset
            .checked_add(HEADER_BYTES)
            .and_then(|data| data.checked_add(cap as usize))
            .is_some_and(|end| end <= region.len());
        if !cap.is_power_of_two() || (cap as usize) < RECORD_ALIGN || !fits {
            return Err(ShmError::CorruptHeader {
                name: region.name().to_string(),
            });
        }

        let head: *const AtomicU32 = region.atomic_u32(offset + HEAD)?;
        let tail_reserve: *const AtomicU32 = region.atomic_u32(offset + TAIL_RESERVE)?;
        let tail_commit: *const AtomicU32 = region.atomic_u32(offset + TAIL_COMMIT)?;
        Ok(Self {
            data: offset + HEADER_BYTES,
            cap,
            head,
            tail_reserve,
            tail_commit,
            region,
        })
    }

    pub fn capacity_bytes(&self) -> usize {
        self.cap as usize
    }

    #[inline]
    fn head(&self) -> &AtomicU32 {
        unsafe { &*self.head }
    }

    #[inline]
    fn tail_reserve(&self) -> &AtomicU32 {
        unsafe { &*self.tail_reserve }
    }

    #[inline]
    fn tail_commit(&self) -> &AtomicU32 {
        unsafe { &*self.tail_commit }
    }

    #[inline]
    fn index(&self, position: u32) -> usize {
        (position & (self.cap - 1)) as usize
    }

    #[inline]
    fn data_ptr(&self, index: usize) -> *mut u8 {
        unsafe { self.region.base_ptr().add(self.data + index) }
    }

    pub fn is_empty(&self) -> bool {
        self.head().load(Ordering::Acquire) == self.tail_commit().load(Ordering::Acquire)
    }

    /// ### English
    /// Appends one record without blocking.
    ///
    /// ### 中文
    /// 非阻塞地追加一条记录。
    pub fn try_push(&self, payload: &[u8]) -> Result<(), PushError> {
        let payload_len = payload.len();
        if payload_len > (u32::MAX as usize).saturating_sub(4) {
            return Err(PushError::TooLarge);
        }
        let record_size = align_up(4 + payload_len, RECORD_ALIGN);
        if record_size > self.cap as usize {
            return Err(PushError::TooLarge);
        }

        loop {
            let head = self.head().load(Ordering::Acquire);
            let tail = self.tail_reserve().load(Ordering::Acquire);

            let used = tail.wrapping_sub(head);
            if used > self.cap {
                // Raced with the consumer moving `head`.
                continue;
            }
            let free = self.cap - used;

            let tail_index = self.index(tail);
            let remaining = self.cap as usize - tail_index;
            let (padding, write_wrap_marker) = if remaining < 4 {
                (remaining, false)
            } else if remaining < record_size {
                (remaining, true)
            } else {
                (0, false)
            };

            let reserve = padding + record_size;
            if reserve as u32 > free {
                return Err(PushError::Full);
            }

            let new_tail = tail.wrapping_add(reserve as u32);
            if self
                .tail_reserve()
                .compare_exchange(tail, new_tail, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                continue;
            }

            unsafe {
                if write_wrap_marker {
                    write_u32_le(self.data_ptr(tail_index), WRAP_MARKER);
                }
                let start_index = self.index(tail.wrapping_add(padding as u32));
                write_u32_le(self.data_ptr(start_index), payload_len as u32);
                std::ptr::copy_nonoverlapping(
                    payload.as_ptr(),
                    self.data_ptr(start_index + 4),
                    payload_len,
                );
            }

            let mut backoff = Backoff::new();
            while self.tail_commit().load(Ordering::Acquire) != tail {
                backoff.snooze();
            }
            self.tail_commit().store(new_tail, Ordering::Release);
            return Ok(());
        }
    }

    /// ### English
    /// Removes the oldest record without blocking. Single consumer only.
    ///
    /// ### 中文
    /// 非阻塞地取出最早的一条记录。仅允许单个消费者。
    pub fn try_pop(&self) -> Result<Vec<u8>, PopError> {
        loop {
            let head = self.head().load(Ordering::Acquire);
            let tail = self.tail_commit().load(Ordering::Acquire);
            if head == tail {
                return Err(PopError::Empty);
            }

            let head_index = self.index(head);
            let remaining = self.cap as usize - head_index;
            if remaining < 4 {
                self.head()
                    .store(head.wrapping_add(remaining as u32), Ordering::Release);
                continue;
            }

            let len = unsafe { read_u32_le(self.data_ptr(head_index)) };
            if len == WRAP_MARKER {
                self.head()
                    .store(head.wrapping_add(remaining as u32), Ordering::Release);
                continue;
            }

            let len = len as usize;
            let total = align_up(4 + len, RECORD_ALIGN);
            if total > remaining || tail.wrapping_sub(head) < total as u32 {
                return Err(PopError::Corrupt);
            }

            let mut out = vec![0u8; len];
            unsafe {
                std::ptr::copy_nonoverlapping(self.data_ptr(head_index + 4), out.as_mut_ptr(), len);
            }
            self.head()
                .store(head.wrapping_add(total as u32), Ordering::Release);
            return Ok(out);
        }
    }

    /// ### English
    /// Retries [`Self::try_push`] with backoff while the ring is full, up to `timeout`.
    ///
    /// ### 中文
    /// 环满时带退避地重试 [`Self::try_push`]，最长等待 `timeout`。
    pub fn push_timeout(&self, payload: &[u8], timeout: Duration) -> Result<(), PushError> {
        let deadline = Instant::now() + timeout;
        let mut backoff = Backoff::new();
        loop {
            match self.try_push(payload) {
                Err(PushError::Full) => {
                    if !backoff.snooze_until(deadline) {
                        return Err(PushError::Full);
                    }
                }
                other => return other,
            }
        }
    }

    /// ### English
    /// Waits up to `timeout` for a record. Returns [`PopError::Empty`] on timeout so reader loops
    /// can check their cancellation flag between calls.
    ///
    /// ### 中文
    /// 最长等待 `timeout` 获取一条记录。超时返回 [`PopError::Empty`]，
    /// 以便读取循环在两次调用之间检查取消标志。
    pub fn pop_timeout(&self, timeout: Duration) -> Result<Vec<u8>, PopError> {
        let deadline = Instant::now() + timeout;
        let mut backoff = Backoff::new();
        loop {
            match self.try_pop() {
                Err(PopError::Empty) => {
                    if !backoff.snooze_until(deadline) {
                        return Err(PopError::Empty);
                    }
                }
                other => return other,
            }
        }
    }
}

#[inline]
unsafe fn write_u32_le(ptr: *mut u8, value: u32) {
    unsafe { std::ptr::copy_nonoverlapping(value.to_le_bytes().as_ptr(), ptr, 4) };
}

#[inline]
unsafe fn read_u32_le(ptr: *const u8) -> u32 {
    let mut bytes = [0u8; 4];
    unsafe { std::ptr::copy_nonoverlapping(ptr, bytes.as_mut_ptr(), 4) };
    u32::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::thread;

    fn ring(dir: &tempfile::TempDir, name: &str, capacity: usize) -> (ShmRing, ShmRing) {
        let region =
            Arc::new(SharedRegion::create(dir.path(), name, ShmRing::bytes_for(capacity)).unwrap());
        let producer = ShmRing::init(region, 0, capacity).unwrap();
        let peer = Arc::new(SharedRegion::open(dir.path(), name).unwrap());
        let consumer = ShmRing::attach(peer, 0).unwrap();
        (producer, consumer)
    }

    #[test]
    fn wraps_and_keeps_fifo_order() {
        let dir = tempfile::tempdir().unwrap();
        let (producer, consumer) = ring(&dir, "ring-fifo", 64);
        let mut expected = VecDeque::new();
        let mut seed = 0x1234_5678u32;

        for _ in 0..2_000 {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            if seed % 3 != 0 {
                let len = (seed % 23) as usize;
                let payload: Vec<u8> = (0..len).map(|i| (seed as u8).wrapping_add(i as u8)).collect();
                match producer.try_push(&payload) {
                    Ok(()) => expected.push_back(payload),
                    Err(PushError::Full) => {}
                    Err(PushError::TooLarge) => panic!("payload fits"),
                }
            } else {
                match consumer.try_pop() {
                    Ok(got) => assert_eq!(Some(got), expected.pop_front()),
                    Err(PopError::Empty) => assert!(expected.is_empty()),
                    Err(PopError::Corrupt) => panic!("corrupt"),
                }
            }
        }
        while let Some(want) = expected.pop_front() {
            assert_eq!(consumer.try_pop().unwrap(), want);
        }
        assert!(consumer.is_empty());
    }

    fn seed_positions(ring: &ShmRing, position: u32) {
        ring.head().store(position, Ordering::Release);
        ring.tail_reserve().store(position, Ordering::Release);
        ring.tail_commit().store(position, Ordering::Release);
    }

    #[test]
    fn capacity_rounds_up_to_power_of_two() {
        let dir = tempfile::tempdir().unwrap();
        let (producer, consumer) = ring(&dir, "ring-pow2", 12);
        assert_eq!(producer.capacity_bytes(), 16);
        assert_eq!(consumer.capacity_bytes(), 16);
        assert_eq!(ShmRing::bytes_for(2304), HEADER_BYTES + 4096);
    }

    #[test]
    fn attach_rejects_non_power_of_two_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let region =
            Arc::new(SharedRegion::create(dir.path(), "ring-bad-cap", ShmRing::bytes_for(16)).unwrap());
        ShmRing::init(region.clone(), 0, 16).unwrap();
        region.atomic_u32(CAPACITY).unwrap().store(12, Ordering::Release);
        assert!(matches!(
            ShmRing::attach(region, 0),
            Err(ShmError::CorruptHeader { .. })
        ));
    }

    #[test]
    fn records_survive_position_wrap() {
        let dir = tempfile::tempdir().unwrap();
        let (producer, consumer) = ring(&dir, "ring-wrap", 12);
        seed_positions(&producer, u32::MAX - 3);

        producer.try_push(&[]).unwrap();
        producer.try_push(&[1, 2, 3, 4]).unwrap();
        assert_eq!(consumer.try_pop(), Ok(vec![]));
        assert_eq!(consumer.try_pop(), Ok(vec![1, 2, 3, 4]));
        assert_eq!(consumer.try_pop(), Err(PopError::Empty));
    }

    #[test]
    fn fifo_order_holds_across_position_wrap() {
        let dir = tempfile::tempdir().unwrap();
        let (producer, consumer) = ring(&dir, "ring-wrap-fifo", 2304);
        seed_positions(&producer, u32::MAX - 1_023);

        let mut expected = VecDeque::new();
        for n in 0..5_000u32 {
            let payload = n.to_le_bytes().repeat((n % 9) as usize + 1);
            loop {
                match producer.try_push(&payload) {
                    Ok(()) => break,
                    Err(PushError::Full) => {
                        let want = expected.pop_front();
                        assert_eq!(consumer.try_pop().ok(), want);
                    }
                    Err(PushError::TooLarge) => panic!("payload fits"),
                }
            }
            expected.push_back(payload);
        }
        while let Some(want) = expected.pop_front() {
            assert_eq!(consumer.try_pop().unwrap(), want);
        }
        assert!(consumer.is_empty());
    }

    #[test]
    fn rejects_oversized_records() {
        let dir = tempfile::tempdir().unwrap();
        let (producer, _) = ring(&dir, "ring-large", 32);
        assert_eq!(producer.try_push(&[0u8; 29]), Err(PushError::TooLarge));
        assert_eq!(producer.try_push(&[0u8; 28]), Ok(()));
        assert_eq!(producer.try_push(&[]), Err(PushError::Full));
    }

    #[test]
    fn pop_timeout_returns_empty_after_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let (_, consumer) = ring(&dir, "ring-timeout", 32);
        let started = Instant::now();
        assert_eq!(consumer.pop_timeout(Duration::from_millis(30)), Err(PopError::Empty));
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn concurrent_producers_commit_every_record() {
        let dir = tempfile::tempdir().unwrap();
        let (producer, consumer) = ring(&dir, "ring-mpsc", 256);
        let handles: Vec<_> = (0..4u8)
            .map(|id| {
                let producer = producer.clone();
                thread::spawn(move || {
                    for n in 0..200u8 {
                        producer
                            .push_timeout(&[id, n], Duration::from_secs(5))
                            .unwrap();
                    }
                })
            })
            .collect();

        let mut last = [None::<u8>; 4];
        let mut received = 0;
        while received < 800 {
            let record = consumer.pop_timeout(Duration::from_secs(5)).unwrap();
            let (id, n) = (record[0] as usize, record[1]);
            assert!(last[id].is_none_or(|prev| prev + 1 == n));
            last[id] = Some(n);
            received += 1;
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
