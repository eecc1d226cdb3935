//! ### English
//! Routes downstream requests to engine instances.
//!
//! ### 中文
//! 将下行请求路由到引擎实例。

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel::Sender;
use dpi::PhysicalSize;
use parking_lot::Mutex;
use url::Url;

use crate::engine::{
    BrowserEngine, BrowserInstance, EngineCursor, EngineKeyEvent, EngineKeyKind, EngineMouseButton,
    MousePoint,
};
use crate::gpu::GpuDevice;
use crate::protocol::{
    Cursor, DownstreamRequest, FrameTransportMode, FrameTransportModes, FrameTransportResponse,
    KeyEvent, KeyEventType, MouseButtons, MouseEvent, RenderGuid, UpstreamRequest,
};
use crate::shm::ResourceNames;
use crate::transport::{BitmapTransport, FrameTransport, TextureTransport, TransportError};

const WHEEL_MULTIPLIER: i32 = 100;

struct RenderInlay<I> {
    instance: I,
    transport: Arc<dyn FrameTransport>,
}

/// ### English
/// Registry of overlay id → engine instance, plus the dispatch function the IPC channel calls.
///
/// The registry holds at most one instance per [`RenderGuid`]: `NewInlay` for a registered id
/// closes the old instance and replaces it under the same lock.
///
/// ### 中文
/// overlay id → 引擎实例的注册表，以及 IPC 通道调用的分发函数。
///
/// 注册表中每个 [`RenderGuid`] 至多对应一个实例：对已注册 id 的 `NewInlay`
/// 会在同一把锁内关闭旧实例并替换。
pub struct Dispatcher<E: BrowserEngine, D: GpuDevice> {
    engine: Arc<E>,
    device: Arc<D>,
    names: ResourceNames,
    upstream: Sender<UpstreamRequest>,
    inlays: Mutex<HashMap<RenderGuid, RenderInlay<E::Instance>>>,
}

impl<E: BrowserEngine, D: GpuDevice> Dispatcher<E, D> {
    /// ### English
    /// `upstream` receives cursor changes; the process loop forwards them to the host.
    ///
    /// ### 中文
    /// `upstream` 接收光标变化；进程主循环负责把它们转发给宿主。
    pub fn new(
        engine: Arc<E>,
        device: Arc<D>,
        names: ResourceNames,
        upstream: Sender<UpstreamRequest>,
    ) -> Self {
        Self {
            engine,
            device,
            names,
            upstream,
            inlays: Mutex::new(HashMap::new()),
        }
    }

    pub fn available_transports(&self) -> FrameTransportModes {
        let mut modes = FrameTransportModes::BITMAP_BUFFER;
        if self.device.supports_sharing() {
            modes |= FrameTransportModes::SHARED_TEXTURE;
        }
        modes
    }

    pub fn len(&self) -> usize {
        self.inlays.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inlays.lock().is_empty()
    }

    pub fn contains(&self, guid: RenderGuid) -> bool {
        self.inlays.lock().contains_key(&guid)
    }

    /// ### English
    /// Runs `f` against the registered instance, if any. Mostly useful to inspect engine state.
    ///
    /// ### 中文
    /// 若实例已注册则对其执行 `f`。主要用于检查引擎状态。
    pub fn with_instance<R>(&self, guid: RenderGuid, f: impl FnOnce(&mut E::Instance) -> R) -> Option<R> {
        self.inlays
            .lock()
            .get_mut(&guid)
            .map(|inlay| f(&mut inlay.instance))
    }

    /// ### English
    /// Handles one request. `NewInlay` and `ResizeInlay` answer with the transport descriptor;
    /// they answer `None` when the transport could not be built or the id is unknown.
    ///
    /// ### 中文
    /// 处理一个请求。`NewInlay` 与 `ResizeInlay` 以传输描述作答；
    /// 若传输无法构建或 id 未知则回答 `None`。
    pub fn handle(&self, request: DownstreamRequest) -> Option<FrameTransportResponse> {
        tracing::trace!("Dispatching {} for {}", request.kind(), request.guid());
        match request {
            DownstreamRequest::NewInlay {
                guid,
                mode,
                url,
                size,
            } => self.create(guid, mode, &url, size),
            DownstreamRequest::ResizeInlay { guid, size } => self.resize(guid, size),
            DownstreamRequest::NavigateInlay { guid, url } => {
                self.with_instance(guid, |instance| navigate(instance, &url));
                None
            }
            DownstreamRequest::DebugInlay { guid } => {
                self.with_instance(guid, |instance| instance.show_dev_tools());
                None
            }
            DownstreamRequest::RemoveInlay { guid } => {
                let removed = self.inlays.lock().remove(&guid);
                match removed {
                    Some(mut inlay) => {
                        inlay.instance.close();
                        tracing::debug!("Removed inlay {guid}");
                    }
                    None => tracing::debug!("Remove for unknown inlay {guid}; ignored"),
                }
                None
            }
            DownstreamRequest::MouseEvent { guid, event } => {
                self.with_instance(guid, |instance| inject_mouse(instance, &event));
                None
            }
            DownstreamRequest::KeyEvent { guid, event } => {
                self.with_instance(guid, |instance| inject_key(instance, &event));
                None
            }
        }
    }

    fn create(
        &self,
        guid: RenderGuid,
        mode: FrameTransportMode,
        url: &Url,
        size: PhysicalSize<u32>,
    ) -> Option<FrameTransportResponse> {
        let mut inlays = self.inlays.lock();
        if let Some(mut old) = inlays.remove(&guid) {
            tracing::warn!("Inlay {guid} already registered; replacing it");
            old.instance.close();
        }

        let transport = match self.build_transport(mode, size) {
            Ok(transport) => transport,
            Err(e) => {
                tracing::warn!("Failed to build {mode:?} transport for inlay {guid}: {e}");
                return None;
            }
        };
        let response = match transport.response() {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Failed to describe transport for inlay {guid}: {e}");
                return None;
            }
        };

        let upstream = self.upstream.clone();
        let on_cursor = Arc::new(move |cursor: EngineCursor| {
            let cursor = Cursor::from(cursor);
            if upstream.send(UpstreamRequest::SetCursor { guid, cursor }).is_err() {
                tracing::trace!("Upstream queue closed; cursor change for {guid} dropped");
            }
        });
        let instance = match self.engine.create(url, transport.clone(), on_cursor) {
            Ok(instance) => instance,
            Err(e) => {
                tracing::warn!("Failed to create engine instance for inlay {guid}: {e}");
                return None;
            }
        };

        inlays.insert(guid, RenderInlay { instance, transport });
        tracing::info!(
            "Created inlay {guid} ({mode:?}, {}x{}) for {url}",
            size.width,
            size.height
        );
        Some(response)
    }

    fn resize(&self, guid: RenderGuid, size: PhysicalSize<u32>) -> Option<FrameTransportResponse> {
        let mut inlays = self.inlays.lock();
        let Some(inlay) = inlays.get_mut(&guid) else {
            tracing::debug!("Resize for unknown inlay {guid}; ignored");
            return None;
        };

        // The engine queries the transport size when notified, so the transport goes first.
        match inlay.transport.resize(size) {
            Ok(true) => inlay.instance.was_resized(),
            Ok(false) => {}
            Err(e) => {
                tracing::warn!("Failed to resize inlay {guid}: {e}");
                return None;
            }
        }
        inlay
            .transport
            .response()
            .inspect_err(|e| tracing::warn!("Failed to describe transport for inlay {guid}: {e}"))
            .ok()
    }

    fn build_transport(
        &self,
        mode: FrameTransportMode,
        size: PhysicalSize<u32>,
    ) -> Result<Arc<dyn FrameTransport>, TransportError> {
        Ok(match mode {
            FrameTransportMode::SharedTexture => {
                Arc::new(TextureTransport::new(self.device.clone(), size)?)
            }
            FrameTransportMode::BitmapBuffer => {
                Arc::new(BitmapTransport::new(self.names.clone(), size)?)
            }
        })
    }

    /// ### English
    /// Closes and deregisters every instance.
    ///
    /// ### 中文
    /// 关闭并注销所有实例。
    pub fn close_all(&self) {
        let drained: Vec<_> = self.inlays.lock().drain().collect();
        for (guid, mut inlay) in drained {
            inlay.instance.close();
            tracing::debug!("Closed inlay {guid}");
        }
    }
}

fn navigate<I: BrowserInstance>(instance: &mut I, url: &Url) {
    if instance.url() == url {
        instance.reload_ignore_cache();
    } else {
        instance.load(url);
    }
}

fn buttons(set: MouseButtons) -> impl Iterator<Item = EngineMouseButton> {
    [
        (MouseButtons::PRIMARY, EngineMouseButton::Left),
        (MouseButtons::SECONDARY, EngineMouseButton::Right),
        (MouseButtons::TERTIARY, EngineMouseButton::Middle),
    ]
    .into_iter()
    .filter(move |(flag, _)| set.contains(*flag))
    .map(|(_, button)| button)
}

fn inject_mouse<I: BrowserInstance>(instance: &mut I, event: &MouseEvent) {
    let point = MousePoint {
        x: event.x as i32,
        y: event.y as i32,
        modifiers: event.modifiers,
    };

    instance.send_mouse_move(point, event.leaving);

    let double = event.double;
    for button in buttons(event.down) {
        let click_count = if buttons(double).any(|b| b == button) { 2 } else { 1 };
        instance.send_mouse_click(point, button, false, click_count);
    }
    for button in buttons(event.up) {
        instance.send_mouse_click(point, button, true, 1);
    }

    instance.send_mouse_wheel(
        point,
        (event.wheel_x as i32).saturating_mul(WHEEL_MULTIPLIER),
        (event.wheel_y as i32).saturating_mul(WHEEL_MULTIPLIER),
    );
}

fn inject_key<I: BrowserInstance>(instance: &mut I, event: &KeyEvent) {
    let kind = match event.kind {
        KeyEventType::KeyDown => EngineKeyKind::RawKeyDown,
        KeyEventType::KeyUp => EngineKeyKind::KeyUp,
        KeyEventType::Character => EngineKeyKind::Char,
    };
    instance.send_key_event(EngineKeyEvent {
        kind,
        modifiers: event.modifiers,
        windows_key_code: event.user_key_code,
        native_key_code: event.native_key_code,
        is_system_key: event.system_key,
    });
}
