use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::slot::{Reply, ResponseSlot};
use super::wire::{self, FrameKind};
use super::{DEFAULT_PUSH_TIMEOUT, IpcError};
use crate::shm::{PopError, PushError, SharedRegion, ShmRing};

/// ### English
/// Upper bound on one blocking read, i.e. how quickly the reader notices cancellation.
///
/// ### 中文
/// 单次阻塞读的上限，即读线程察觉取消的最长延迟。
const READ_POLL: Duration = Duration::from_millis(20);

/// ### English
/// Which end of the channel this process is. The host creates the region; the render host opens
/// it.
///
/// ### 中文
/// 本进程是通道的哪一端。宿主创建区域；渲染宿主打开区域。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRole {
    Host,
    RenderHost,
}

struct Shared {
    name: String,
    role: ChannelRole,
    outgoing: ShmRing,
    pending: Mutex<HashMap<u64, Arc<ResponseSlot>>>,
    next_id: AtomicU64,
    dead: AtomicBool,
    cancel: AtomicBool,
    push_timeout: Duration,
}

impl Shared {
    fn push(&self, kind: FrameKind, id: u64, payload: &[u8]) -> Result<(), IpcError> {
        let record = wire::encode(kind, id, payload);
        match self.outgoing.push_timeout(&record, self.push_timeout) {
            Ok(()) => Ok(()),
            Err(PushError::TooLarge) => Err(IpcError::TooLarge(record.len())),
            Err(PushError::Full) => {
                self.mark_dead("outgoing ring stayed full");
                Err(IpcError::Timeout(self.push_timeout))
            }
        }
    }

    fn ensure_alive(&self) -> Result<(), IpcError> {
        if self.dead.load(Ordering::Acquire) {
            Err(IpcError::ChannelDead)
        } else {
            Ok(())
        }
    }

    fn mark_dead(&self, reason: &str) {
        if !self.dead.swap(true, Ordering::AcqRel) {
            tracing::error!("IPC channel {} ({:?}) is dead: {reason}", self.name, self.role);
        }
        self.fail_pending();
    }

    fn fail_pending(&self) {
        let pending: Vec<_> = self.pending.lock().drain().collect();
        for (_, slot) in pending {
            slot.fill(Reply::Closed);
        }
    }

    fn complete(&self, id: u64, reply: Reply) {
        let slot = self.pending.lock().remove(&id);
        match slot {
            Some(slot) => {
                slot.fill(reply);
            }
            None => tracing::debug!("Dropping late response for request {id} on {}", self.name),
        }
    }
}

/// ### English
/// One end of a typed IPC channel.
///
/// `Out` is the request type this side sends, `In` the request type it receives. Incoming
/// requests are decoded on a dedicated reader thread and passed to the handler given at
/// construction; the handler's return value (`None` becomes JSON `null`) answers the peer when
/// the peer asked for a response.
///
/// ### 中文
/// 带类型 IPC 通道的一端。
///
/// `Out` 为本端发送的请求类型，`In` 为本端接收的请求类型。入站请求在专用读线程上解码，
/// 并交给构造时传入的处理函数；若对端需要响应，则以处理函数的返回值作答
///（`None` 编码为 JSON `null`）。
pub struct IpcChannel<Out, In> {
    shared: Arc<Shared>,
    reader: Mutex<Option<thread::JoinHandle<()>>>,
    _marker: PhantomData<fn(Out) -> In>,
}

impl<Out, In> IpcChannel<Out, In>
where
    Out: Serialize,
    In: DeserializeOwned + 'static,
{
    /// ### English
    /// Creates the named region (host side) and starts the reader thread.
    ///
    /// #### Parameters
    /// - `dir`: Shared memory directory.
    /// - `name`: Channel name; must not already exist.
    /// - `capacity`: Data bytes per direction.
    /// - `handler`: Called on the reader thread for every incoming request.
    ///
    /// ### 中文
    /// 创建命名区域（宿主侧）并启动读线程。
    ///
    /// #### 参数
    /// - `dir`：共享内存目录。
    /// - `name`：通道名；不得已存在。
    /// - `capacity`：每个方向的数据区字节数。
    /// - `handler`：每个入站请求都会在读线程上调用它。
    pub fn create<H, R>(dir: &Path, name: &str, capacity: usize, handler: H) -> Result<Self, IpcError>
    where
        H: Fn(In) -> Option<R> + Send + 'static,
        R: Serialize + 'static,
    {
        let ring_bytes = ShmRing::bytes_for(capacity);
        let region = Arc::new(SharedRegion::create(dir, name, ring_bytes * 2)?);
        let downstream = ShmRing::init(region.clone(), 0, capacity)?;
        let upstream = ShmRing::init(region, ring_bytes, capacity)?;
        Self::start(name, ChannelRole::Host, downstream, upstream, handler)
    }

    /// ### English
    /// Opens a region the host created (render-host side) and starts the reader thread.
    ///
    /// ### 中文
    /// 打开宿主创建的区域（渲染宿主侧）并启动读线程。
    pub fn open<H, R>(dir: &Path, name: &str, handler: H) -> Result<Self, IpcError>
    where
        H: Fn(In) -> Option<R> + Send + 'static,
        R: Serialize + 'static,
    {
        let region = Arc::new(SharedRegion::open(dir, name)?);
        let downstream = ShmRing::attach(region.clone(), 0)?;
        let upstream = ShmRing::attach(region, ShmRing::bytes_for(downstream.capacity_bytes()))?;
        Self::start(name, ChannelRole::RenderHost, upstream, downstream, handler)
    }

    fn start<H, R>(
        name: &str,
        role: ChannelRole,
        outgoing: ShmRing,
        incoming: ShmRing,
        handler: H,
    ) -> Result<Self, IpcError>
    where
        H: Fn(In) -> Option<R> + Send + 'static,
        R: Serialize + 'static,
    {
        let shared = Arc::new(Shared {
            name: name.to_string(),
            role,
            outgoing,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            dead: AtomicBool::new(false),
            cancel: AtomicBool::new(false),
            push_timeout: DEFAULT_PUSH_TIMEOUT,
        });

        let reader_shared = shared.clone();
        let reader = thread::Builder::new()
            .name(format!("InlayIpcReader-{role:?}"))
            .spawn(move || run_reader::<In, R, H>(reader_shared, incoming, handler))
            .map_err(IpcError::Spawn)?;

        tracing::debug!("IPC channel {name} open as {role:?}");
        Ok(Self {
            shared,
            reader: Mutex::new(Some(reader)),
            _marker: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn is_dead(&self) -> bool {
        self.shared.dead.load(Ordering::Acquire)
    }

    /// ### English
    /// Marks the channel dead from outside (e.g. the peer process was observed to exit).
    ///
    /// ### 中文
    /// 从外部将通道标记为失效（例如观察到对端进程已退出）。
    pub fn mark_dead(&self, reason: &str) {
        self.shared.mark_dead(reason);
    }

    /// ### English
    /// Sends `message` and blocks until the peer answers or `timeout` elapses.
    ///
    /// A timeout is fatal: the channel is marked dead and every later call fails fast with
    /// [`IpcError::ChannelDead`]. A malformed or rejected response only fails this call.
    ///
    /// ### 中文
    /// 发送 `message` 并阻塞，直到对端应答或超过 `timeout`。
    ///
    /// 超时是致命的：通道被标记为失效，之后的调用都会以 [`IpcError::ChannelDead`] 快速失败。
    /// 格式错误或被拒绝的响应只会让本次调用失败。
    pub fn request<R: DeserializeOwned>(&self, message: &Out, timeout: Duration) -> Result<R, IpcError> {
        self.shared.ensure_alive()?;
        let payload = serde_json::to_vec(message).map_err(IpcError::Encode)?;
        let deadline = Instant::now() + timeout;

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(ResponseSlot::default());
        self.shared.pending.lock().insert(id, slot.clone());

        if let Err(err) = self.shared.push(FrameKind::Request, id, &payload) {
            self.shared.pending.lock().remove(&id);
            return Err(err);
        }

        match slot.wait_until(deadline) {
            Some(Reply::Payload(bytes)) => serde_json::from_slice(&bytes).map_err(|e| {
                tracing::warn!("Malformed response to request {id} on {}: {e}", self.shared.name);
                IpcError::Decode(e)
            }),
            Some(Reply::Rejected(message)) => Err(IpcError::Remote(message)),
            Some(Reply::Closed) => Err(IpcError::ChannelDead),
            None => {
                self.shared.pending.lock().remove(&id);
                self.shared.mark_dead(&format!("request {id} timed out after {timeout:?}"));
                Err(IpcError::Timeout(timeout))
            }
        }
    }

    /// ### English
    /// Sends `message` without waiting; the peer does not answer.
    ///
    /// ### 中文
    /// 发送 `message` 且不等待；对端不会应答。
    pub fn notify(&self, message: &Out) -> Result<(), IpcError> {
        self.shared.ensure_alive()?;
        let payload = serde_json::to_vec(message).map_err(IpcError::Encode)?;
        self.shared.push(FrameKind::Notify, 0, &payload)
    }

    /// ### English
    /// Stops the reader thread and fails every pending request. Idempotent.
    ///
    /// ### 中文
    /// 停止读线程，并让所有挂起的请求失败。可重复调用。
    pub fn close(&self) {
        self.shared.cancel.store(true, Ordering::Release);
        let reader = self.reader.lock().take();
        if let Some(reader) = reader {
            if reader.thread().id() != thread::current().id() {
                let _ = reader.join();
            }
            self.shared.dead.store(true, Ordering::Release);
            self.shared.fail_pending();
            tracing::debug!("IPC channel {} closed", self.shared.name);
        }
    }
}

impl<Out, In> Drop for IpcChannel<Out, In> {
    fn drop(&mut self) {
        self.shared.cancel.store(true, Ordering::Release);
        if let Some(reader) = self.reader.lock().take() {
            if reader.thread().id() != thread::current().id() {
                let _ = reader.join();
            }
        }
        self.shared.dead.store(true, Ordering::Release);
        self.shared.fail_pending();
    }
}

fn run_reader<In, R, H>(shared: Arc<Shared>, incoming: ShmRing, handler: H)
where
    In: DeserializeOwned,
    R: Serialize,
    H: Fn(In) -> Option<R>,
{
    while !shared.cancel.load(Ordering::Acquire) {
        let record = match incoming.pop_timeout(READ_POLL) {
            Ok(record) => record,
            Err(PopError::Empty) => continue,
            Err(PopError::Corrupt) => {
                shared.mark_dead("incoming ring is corrupt");
                return;
            }
        };

        let Some((kind, id, payload)) = wire::decode(&record) else {
            tracing::warn!("Ignoring malformed IPC record ({} bytes) on {}", record.len(), shared.name);
            continue;
        };

        match kind {
            FrameKind::Request | FrameKind::Notify => {
                let reply = handle_request::<In, R, H>(&shared, &handler, payload);
                if kind == FrameKind::Request {
                    let sent = match reply {
                        Ok(bytes) => shared.push(FrameKind::Response, id, &bytes),
                        Err(message) => shared.push(FrameKind::Error, id, message.as_bytes()),
                    };
                    if let Err(e) = sent {
                        tracing::warn!("Failed to answer request {id} on {}: {e}", shared.name);
                    }
                }
            }
            FrameKind::Response => shared.complete(id, Reply::Payload(payload.to_vec())),
            FrameKind::Error => shared.complete(
                id,
                Reply::Rejected(String::from_utf8_lossy(payload).into_owned()),
            ),
        }
    }
}

fn handle_request<In, R, H>(shared: &Shared, handler: &H, payload: &[u8]) -> Result<Vec<u8>, String>
where
    In: DeserializeOwned,
    R: Serialize,
    H: Fn(In) -> Option<R>,
{
    let request: In = serde_json::from_slice(payload).map_err(|e| {
        tracing::warn!("Rejecting unrecognised IPC request on {}: {e}", shared.name);
        format!("unrecognised request: {e}")
    })?;
    serde_json::to_vec(&handler(request)).map_err(|e| {
        tracing::warn!("Failed to encode IPC response on {}: {e}", shared.name);
        format!("failed to encode response: {e}")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    #[serde(tag = "type")]
    enum Ping {
        Echo { value: u32 },
        Nothing,
        Stall,
    }

    fn host_and_peer(dir: &Path) -> (IpcChannel<Ping, Ping>, IpcChannel<Ping, Ping>) {
        let host = IpcChannel::create(dir, "ipc-test", 4096, |_: Ping| None::<()>).unwrap();
        let peer = IpcChannel::open(dir, "ipc-test", |request: Ping| match request {
            Ping::Echo { value } => Some(value * 2),
            Ping::Nothing => None,
            Ping::Stall => {
                thread::sleep(Duration::from_millis(300));
                None
            }
        })
        .unwrap();
        (host, peer)
    }

    #[test]
    fn request_gets_matching_response() {
        let dir = tempfile::tempdir().unwrap();
        let (host, _peer) = host_and_peer(dir.path());
        let doubled: u32 = host
            .request(&Ping::Echo { value: 21 }, Duration::from_secs(5))
            .unwrap();
        assert_eq!(doubled, 42);
        let nothing: Option<u32> = host.request(&Ping::Nothing, Duration::from_secs(5)).unwrap();
        assert_eq!(nothing, None);
    }

    #[test]
    fn concurrent_callers_get_their_own_responses() {
        let dir = tempfile::tempdir().unwrap();
        let (host, _peer) = host_and_peer(dir.path());
        let host = Arc::new(host);
        let handles: Vec<_> = (0..8u32)
            .map(|value| {
                let host = host.clone();
                thread::spawn(move || {
                    let got: u32 = host
                        .request(&Ping::Echo { value }, Duration::from_secs(5))
                        .unwrap();
                    assert_eq!(got, value * 2);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn timeout_is_bounded_and_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let (host, _peer) = host_and_peer(dir.path());
        let started = Instant::now();
        let result: Result<Option<u32>, _> = host.request(&Ping::Stall, Duration::from_millis(50));
        let elapsed = started.elapsed();
        assert!(matches!(result, Err(IpcError::Timeout(_))));
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(250));
        assert!(host.is_dead());
        assert!(matches!(host.notify(&Ping::Nothing), Err(IpcError::ChannelDead)));
    }

    #[test]
    fn unknown_request_fails_only_that_call() {
        #[derive(Serialize)]
        #[serde(tag = "type")]
        enum Unknown {
            Explode,
        }

        let dir = tempfile::tempdir().unwrap();
        let peer_handler = |request: Ping| match request {
            Ping::Echo { value } => Some(value),
            _ => None,
        };
        let host: IpcChannel<Unknown, Ping> =
            IpcChannel::create(dir.path(), "ipc-unknown", 4096, |_: Ping| None::<()>).unwrap();
        let peer: IpcChannel<Ping, Ping> =
            IpcChannel::open(dir.path(), "ipc-unknown", peer_handler).unwrap();

        let result: Result<Option<u32>, _> = host.request(&Unknown::Explode, Duration::from_secs(5));
        assert!(matches!(result, Err(IpcError::Remote(_))));
        assert!(!host.is_dead());
        drop(peer);
    }

    #[test]
    fn close_fails_pending_and_later_calls() {
        let dir = tempfile::tempdir().unwrap();
        let (host, peer) = host_and_peer(dir.path());
        peer.close();
        peer.close();
        host.close();
        assert!(matches!(host.notify(&Ping::Nothing), Err(IpcError::ChannelDead)));
    }
}
