//! ### English
//! Where the reader thread drops the answer to one correlated request.
//!
//! ### 中文
//! 读线程为某个关联请求投递应答的位置。

use std::time::Instant;

use parking_lot::{Condvar, Mutex};

/// ### English
/// What came back for one request id.
///
/// ### 中文
/// 某个请求 id 收到的结果。
#[derive(Debug, PartialEq, Eq)]
pub(super) enum Reply {
    Payload(Vec<u8>),
    /// ### English
    /// The peer could not decode or answer the request.
    ///
    /// ### 中文
    /// 对端无法解码或应答该请求。
    Rejected(String),
    /// ### English
    /// The channel died or closed while the caller was waiting.
    ///
    /// ### 中文
    /// 调用方等待期间通道已失效或关闭。
    Closed,
}

/// ### English
/// Response slot for one in-flight request. The first reply wins; later ones are discarded.
///
/// ### 中文
/// 单个进行中请求的响应槽。先到的应答生效，之后的会被丢弃。
#[derive(Default)]
pub(super) struct ResponseSlot {
    state: Mutex<SlotState>,
    filled: Condvar,
}

#[derive(Default)]
struct SlotState {
    reply: Option<Reply>,
    delivered: bool,
}

impl ResponseSlot {
    /// ### English
    /// Stores `reply` and wakes the waiting caller. Returns `false` if the slot was already
    /// filled.
    ///
    /// ### 中文
    /// 存入 `reply` 并唤醒等待的调用方。若槽已被填充则返回 `false`。
    pub(super) fn fill(&self, reply: Reply) -> bool {
        let mut state = self.state.lock();
        if state.delivered {
            return false;
        }
        state.delivered = true;
        state.reply = Some(reply);
        self.filled.notify_all();
        true
    }

    /// ### English
    /// Blocks until a reply arrives or `deadline` passes.
    ///
    /// ### 中文
    /// 阻塞直到应答到达或超过 `deadline`。
    pub(super) fn wait_until(&self, deadline: Instant) -> Option<Reply> {
        let mut state = self.state.lock();
        while !state.delivered {
            if self.filled.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.reply.take()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn reply_reaches_waiting_caller() {
        let slot = Arc::new(ResponseSlot::default());
        let reader = {
            let slot = slot.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                assert!(slot.fill(Reply::Payload(b"null".to_vec())));
            })
        };
        let reply = slot.wait_until(Instant::now() + Duration::from_secs(5));
        assert_eq!(reply, Some(Reply::Payload(b"null".to_vec())));
        reader.join().unwrap();
    }

    #[test]
    fn first_reply_wins() {
        let slot = ResponseSlot::default();
        assert!(slot.fill(Reply::Rejected("bad request".into())));
        assert!(!slot.fill(Reply::Closed));
        let reply = slot.wait_until(Instant::now());
        assert_eq!(reply, Some(Reply::Rejected("bad request".into())));
    }

    #[test]
    fn wait_gives_up_at_deadline() {
        let slot = ResponseSlot::default();
        let started = Instant::now();
        assert_eq!(slot.wait_until(started + Duration::from_millis(30)), None);
        assert!(started.elapsed() >= Duration::from_millis(30));
    }
}
