//! ### English
//! Typed, bidirectional request/response channel between the host and the render host.
//!
//! One shared memory region holds two [`ShmRing`](crate::shm::ShmRing)s: host → render host and
//! render host → host. Each side pushes onto its outgoing ring from any thread and runs one
//! reader thread on its incoming ring. Records are a fixed [`wire::WireHeader`] followed by a
//! `serde_json` payload.
//!
//! ### 中文
//! 宿主与渲染宿主之间带类型的双向请求/响应通道。
//!
//! 一个共享内存区域内含两个 [`ShmRing`](crate::shm::ShmRing)：宿主 → 渲染宿主，
//! 以及渲染宿主 → 宿主。每一侧可在任意线程向出方向环写入，并在入方向环上运行一个读线程。
//! 记录由固定的 [`wire::WireHeader`] 和随后的 `serde_json` 负载组成。

mod channel;
mod slot;
mod wire;

use std::time::Duration;

pub use channel::{ChannelRole, IpcChannel};

use crate::shm::ShmError;

/// ### English
/// Data bytes per direction.
///
/// ### 中文
/// 每个方向的数据区字节数。
pub const DEFAULT_RING_CAPACITY: usize = 1 << 20;

/// ### English
/// How long a push may wait for ring space before the peer is considered unresponsive.
///
/// ### 中文
/// 推送等待环空间的最长时间，超过即视为对端无响应。
pub const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_millis(1000);

/// ### English
/// Errors surfaced by [`IpcChannel`].
///
/// ### 中文
/// [`IpcChannel`] 产生的错误。
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("ipc channel is dead")]
    ChannelDead,
    #[error(transparent)]
    Shm(#[from] ShmError),
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("peer rejected request: {0}")]
    Remote(String),
    #[error("message of {0} bytes does not fit in the ring")]
    TooLarge(usize),
    #[error("failed to spawn ipc reader thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl IpcError {
    /// ### English
    /// Whether the error means the peer is gone. Protocol errors only fail the one call.
    ///
    /// ### 中文
    /// 该错误是否意味着对端已失效。协议错误只会让当前这一次调用失败。
    pub fn is_channel_fatal(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::ChannelDead | Self::Shm(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(IpcError::Timeout(Duration::from_millis(1)).is_channel_fatal());
        assert!(IpcError::ChannelDead.is_channel_fatal());
        assert!(!IpcError::Remote("nope".into()).is_channel_fatal());
        let decode = serde_json::from_str::<u32>("x").unwrap_err();
        assert!(!IpcError::Decode(decode).is_channel_fatal());
    }
}
