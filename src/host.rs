//! ### English
//! Host composition root.
//!
//! [`InlayHost`] owns the render process, the inlay arena and the transport settings, and is
//! passed explicitly to whatever drives the host UI. Upstream requests are queued by the IPC
//! reader thread and applied on the host's frame thread in [`InlayHost::pump`].
//!
//! ### 中文
//! 宿主的组合根。
//!
//! [`InlayHost`] 持有渲染进程、inlay 集合与传输设置，并被显式传给驱动宿主 UI 的代码。
//! 上行请求由 IPC 读线程入队，在宿主帧线程上通过 [`InlayHost::pump`] 应用。

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crossbeam_channel::Receiver;
use dpi::PhysicalSize;
use url::Url;

use crate::config::{HostConfig, SupervisorConfig};
use crate::gpu::GpuDevice;
use crate::inlay::{Inlay, InlayError, MouseInput, WindowMessage};
use crate::protocol::{FrameTransportMode, FrameTransportModes, UpstreamRequest};
use crate::supervisor::{RenderProcess, SupervisorError};
use crate::surface::FrameSink;

/// ### English
/// Stable key of an inlay in the host arena. Unlike the render guid it survives transport
/// invalidation.
///
/// ### 中文
/// inlay 在宿主集合中的稳定键。与渲染 guid 不同，它在传输失效后保持不变。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InlayId(u64);

impl fmt::Display for InlayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "inlay#{}", self.0)
    }
}

pub struct InlayHost<D: GpuDevice> {
    config: HostConfig,
    device: Arc<D>,
    process: RenderProcess,
    inbox: Receiver<UpstreamRequest>,
    available: FrameTransportModes,
    inlays: BTreeMap<InlayId, Inlay<D>>,
    next_id: u64,
}

impl<D: GpuDevice> InlayHost<D> {
    pub fn new(config: HostConfig, supervisor: SupervisorConfig, device: Arc<D>) -> Self {
        let (tx, inbox) = crossbeam_channel::unbounded();
        Self {
            config,
            device,
            process: RenderProcess::new(supervisor, tx),
            inbox,
            available: FrameTransportModes::empty(),
            inlays: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn start(&mut self) -> Result<(), SupervisorError> {
        self.process.start()
    }

    /// ### English
    /// Closes every inlay and stops the render process.
    ///
    /// ### 中文
    /// 关闭所有 inlay 并停止渲染进程。
    pub fn shutdown(&mut self) {
        let inlays = std::mem::take(&mut self.inlays);
        for (id, inlay) in inlays {
            if let Err(e) = inlay.close(&self.process) {
                tracing::debug!("Closing {id} during shutdown failed: {e}");
            }
        }
        self.process.stop();
        self.available = FrameTransportModes::empty();
    }

    pub fn process(&self) -> &RenderProcess {
        &self.process
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// ### English
    /// Whether the render host announced itself with `ReadyNotification`.
    ///
    /// ### 中文
    /// 渲染宿主是否已通过 `ReadyNotification` 宣告就绪。
    pub fn is_ready(&self) -> bool {
        !self.available.is_empty()
    }

    pub fn available_transports(&self) -> FrameTransportModes {
        self.available
    }

    pub fn transport_mode(&self) -> FrameTransportMode {
        self.config.transport_mode
    }

    /// ### English
    /// Applies queued upstream requests. Call once per host frame. Returns how many were
    /// applied.
    ///
    /// ### 中文
    /// 应用已排队的上行请求。每个宿主帧调用一次。返回应用的数量。
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(request) = self.inbox.try_recv() {
            applied += 1;
            match request {
                UpstreamRequest::ReadyNotification {
                    available_transports,
                } => self.on_ready(available_transports),
                UpstreamRequest::SetCursor { guid, cursor } => {
                    match self.inlays.values_mut().find(|inlay| inlay.guid() == guid) {
                        Some(inlay) => inlay.set_cursor(cursor),
                        None => tracing::trace!("Cursor for unknown render guid {guid}; ignored"),
                    }
                }
            }
        }
        applied
    }

    fn on_ready(&mut self, available: FrameTransportModes) {
        tracing::info!("Render process ready; available transports {available:?}");
        self.available = available;
        if let Some(mode) = self.config.transport_mode.negotiate(available) {
            if mode != self.config.transport_mode {
                tracing::warn!(
                    "Transport {:?} unavailable; falling back to {mode:?}",
                    self.config.transport_mode
                );
                if let Err(e) = self.set_transport_mode(mode) {
                    tracing::warn!("Failed to switch transport: {e}");
                }
            }
        }
    }

    /// ### English
    /// Selects a transport mode. A change invalidates every inlay; each renegotiates on its
    /// next size update.
    ///
    /// ### 中文
    /// 选择传输方式。若发生变化则所有 inlay 失效；各自会在下一次尺寸更新时重新协商。
    pub fn set_transport_mode(&mut self, mode: FrameTransportMode) -> Result<(), InlayError> {
        if self.config.transport_mode == mode {
            return Ok(());
        }
        self.config.transport_mode = mode;
        let mut first_error = None;
        for (id, inlay) in &mut self.inlays {
            if let Err(e) = inlay.invalidate_transport(&self.process) {
                tracing::warn!("Failed to invalidate {id}: {e}");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn add_inlay(&mut self, url: Url) -> InlayId {
        let id = InlayId(self.next_id);
        self.next_id += 1;
        self.inlays.insert(id, Inlay::new(url));
        id
    }

    pub fn inlay(&self, id: InlayId) -> Option<&Inlay<D>> {
        self.inlays.get(&id)
    }

    pub fn inlay_ids(&self) -> impl Iterator<Item = InlayId> + '_ {
        self.inlays.keys().copied()
    }

    /// ### English
    /// Removes an inlay from the arena and its instance from the render host. Returns whether
    /// the id was known.
    ///
    /// ### 中文
    /// 从集合中移除 inlay，并从渲染宿主中移除其实例。返回该 id 是否存在。
    pub fn remove_inlay(&mut self, id: InlayId) -> Result<bool, InlayError> {
        match self.inlays.remove(&id) {
            Some(inlay) => {
                inlay.close(&self.process)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn navigate(&mut self, id: InlayId, url: Url) -> Result<(), InlayError> {
        match self.inlays.get_mut(&id) {
            Some(inlay) => inlay.navigate(&self.process, url),
            None => Ok(()),
        }
    }

    pub fn debug(&self, id: InlayId) -> Result<(), InlayError> {
        match self.inlays.get(&id) {
            Some(inlay) => inlay.debug(&self.process),
            None => Ok(()),
        }
    }

    /// ### English
    /// Negotiates `id`'s transport for its current content size. Does nothing until the render
    /// host is ready.
    ///
    /// ### 中文
    /// 按当前内容尺寸为 `id` 协商传输通道。渲染宿主就绪之前不做任何事。
    pub fn update_inlay_size(&mut self, id: InlayId, size: PhysicalSize<u32>) -> Result<bool, InlayError> {
        let Some(mode) = self.config.transport_mode.negotiate(self.available) else {
            return Ok(false);
        };
        match self.inlays.get_mut(&id) {
            Some(inlay) => inlay.update_size(&self.process, &self.device, mode, size),
            None => Ok(false),
        }
    }

    pub fn handle_mouse(&mut self, id: InlayId, input: &MouseInput) -> Result<(), InlayError> {
        match self.inlays.get_mut(&id) {
            Some(inlay) => inlay.handle_mouse(&self.process, input),
            None => Ok(()),
        }
    }

    /// ### English
    /// Offers a raw window message to every inlay. Returns whether any inlay captured it. An
    /// inlay that fails to forward the message does not stop the others; its error is returned
    /// only when no inlay captured the message.
    ///
    /// ### 中文
    /// 将原始窗口消息交给每个 inlay。返回是否有 inlay 捕获了它。某个 inlay 转发失败不会影响其他
    /// inlay；仅当没有 inlay 捕获该消息时才返回其错误。
    pub fn handle_window_message(
        &mut self,
        msg: u32,
        wparam: u64,
        lparam: i64,
    ) -> Result<bool, InlayError> {
        let msg = WindowMessage::from_raw(msg);
        let mut captured = false;
        let mut first_error = None;
        for (id, inlay) in &mut self.inlays {
            match inlay.handle_window_message(&self.process, msg, wparam, lparam) {
                Ok(hit) => captured |= hit,
                Err(e) => {
                    tracing::warn!("Failed to forward {msg:?} to {id}: {e}");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) if !captured => Err(e),
            _ => Ok(captured),
        }
    }

    pub fn render_inlay(&mut self, id: InlayId, sink: &mut dyn FrameSink) -> Result<bool, InlayError> {
        match self.inlays.get_mut(&id) {
            Some(inlay) => inlay.render(sink),
            None => Ok(false),
        }
    }
}

impl<D: GpuDevice> Drop for InlayHost<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
