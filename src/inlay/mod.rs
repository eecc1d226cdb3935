//! ### English
//! Host-side overlay: couples one UI surface to one render-host instance.
//!
//! ### 中文
//! 宿主侧 overlay：将一个 UI 界面与一个渲染宿主实例关联起来。

mod input;

use std::sync::Arc;

use dpi::PhysicalSize;
use url::Url;

pub use input::{MouseInput, VK_CONTROL, VK_SHIFT, WindowMessage};

use crate::gpu::GpuDevice;
use crate::protocol::{
    Cursor, DownstreamRequest, FrameTransportMode, FrameTransportResponse, InputModifiers, RenderGuid,
};
use crate::supervisor::{RenderProcess, SupervisorError};
use crate::surface::{FrameSink, Surface, SurfaceError};
use input::InputState;

#[derive(Debug, thiserror::Error)]
pub enum InlayError {
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
    #[error(transparent)]
    Surface(#[from] SurfaceError),
    #[error("inlay transport failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InlayState {
    /// ### English
    /// No transport negotiated yet.
    ///
    /// ### 中文
    /// 尚未协商传输通道。
    Pending,
    Ready,
    /// ### English
    /// Building or polling the transport failed; rendered as an error instead of content.
    ///
    /// ### 中文
    /// 构建或轮询传输通道失败；渲染时显示错误而非内容。
    Failed(String),
}

/// ### English
/// One overlay as the host sees it.
///
/// Every call that talks to the render host takes the [`RenderProcess`] explicitly.
///
/// ### 中文
/// 宿主视角下的一个 overlay。
///
/// 所有需要与渲染宿主通信的调用都显式接收 [`RenderProcess`]。
pub struct Inlay<D: GpuDevice> {
    url: Url,
    guid: RenderGuid,
    size: PhysicalSize<u32>,
    surface: Option<Surface<D>>,
    state: InlayState,
    cursor: Cursor,
    input: InputState,
}

impl<D: GpuDevice> Inlay<D> {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            guid: RenderGuid::new(),
            size: PhysicalSize::new(0, 0),
            surface: None,
            state: InlayState::Pending,
            cursor: Cursor::Default,
            input: InputState::default(),
        }
    }

    pub fn guid(&self) -> RenderGuid {
        self.guid
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// ### English
    /// Last size acknowledged by the render host; zero before the first negotiation.
    ///
    /// ### 中文
    /// 渲染宿主最近确认的尺寸；首次协商前为零。
    pub fn size(&self) -> PhysicalSize<u32> {
        self.size
    }

    pub fn state(&self) -> &InlayState {
        &self.state
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn captures_cursor(&self) -> bool {
        self.input.capture_cursor()
    }

    pub fn is_focused(&self) -> bool {
        self.input.focused()
    }

    /// ### English
    /// Modifier keys currently held, as tracked from forwarded key messages.
    ///
    /// ### 中文
    /// 根据已转发按键消息跟踪到的当前按下的修饰键。
    pub fn key_modifiers(&self) -> InputModifiers {
        self.input.modifiers()
    }

    #[cfg(test)]
    pub(crate) fn input_mut(&mut self) -> &mut InputState {
        &mut self.input
    }

    pub fn surface(&self) -> Option<&Surface<D>> {
        self.surface.as_ref()
    }

    pub fn navigate(&mut self, process: &RenderProcess, url: Url) -> Result<(), InlayError> {
        self.url = url.clone();
        process.send(&DownstreamRequest::NavigateInlay {
            guid: self.guid,
            url,
        })?;
        Ok(())
    }

    pub fn debug(&self, process: &RenderProcess) -> Result<(), InlayError> {
        process.send(&DownstreamRequest::DebugInlay { guid: self.guid })?;
        Ok(())
    }

    /// ### English
    /// Drops the surface and removes the render-side instance.
    ///
    /// ### 中文
    /// 丢弃 surface 并移除渲染侧实例。
    pub fn close(mut self, process: &RenderProcess) -> Result<(), InlayError> {
        self.surface = None;
        process.send(&DownstreamRequest::RemoveInlay { guid: self.guid })?;
        Ok(())
    }

    /// ### English
    /// Forgets the current transport so the next [`update_size`](Self::update_size) creates a
    /// fresh instance under a new guid. The old guid is removed render-side.
    ///
    /// ### 中文
    /// 放弃当前传输通道，使下一次 [`update_size`](Self::update_size) 以新 guid 创建新实例。
    /// 旧 guid 会在渲染侧被移除。
    pub fn invalidate_transport(&mut self, process: &RenderProcess) -> Result<(), InlayError> {
        let old_guid = self.guid;
        self.surface = None;
        self.size = PhysicalSize::new(0, 0);
        self.guid = RenderGuid::new();
        self.state = InlayState::Pending;
        process.send(&DownstreamRequest::RemoveInlay { guid: old_guid })?;
        Ok(())
    }

    pub fn set_cursor(&mut self, cursor: Cursor) {
        self.input.set_capture_cursor(cursor.captures());
        self.cursor = cursor;
    }

    /// ### English
    /// Negotiates the transport for `size`: `NewInlay` before the first success, `ResizeInlay`
    /// afterwards. Returns whether a new transport descriptor was applied.
    ///
    /// A `None` answer leaves the size untouched so the next frame retries. A surface that
    /// cannot be opened moves the inlay to [`InlayState::Failed`].
    ///
    /// ### 中文
    /// 为 `size` 协商传输通道：首次成功前发送 `NewInlay`，之后发送 `ResizeInlay`。
    /// 返回是否应用了新的传输描述。
    ///
    /// 应答为 `None` 时尺寸保持不变，下一帧会重试。surface 无法打开时 inlay 进入
    /// [`InlayState::Failed`]。
    pub fn update_size(
        &mut self,
        process: &RenderProcess,
        device: &Arc<D>,
        mode: FrameTransportMode,
        size: PhysicalSize<u32>,
    ) -> Result<bool, InlayError> {
        if size.width == 0 || size.height == 0 || size == self.size {
            return Ok(false);
        }

        let request = if self.surface.is_none() {
            DownstreamRequest::NewInlay {
                guid: self.guid,
                mode,
                url: self.url.clone(),
                size,
            }
        } else {
            DownstreamRequest::ResizeInlay {
                guid: self.guid,
                size,
            }
        };

        let response: Option<FrameTransportResponse> = process.send_request(&request)?;
        let Some(response) = response else {
            tracing::warn!("Transport build for inlay {} failed; retrying", self.guid);
            return Ok(false);
        };
        self.size = size;

        let shm_dir = process.names().dir();
        let result = match self.surface.as_mut() {
            Some(surface) => surface.rebind(device, shm_dir, &response),
            None => Surface::open(device, shm_dir, &response).map(|surface| {
                self.surface = Some(surface);
            }),
        };
        match result {
            Ok(()) => {
                self.state = InlayState::Ready;
                Ok(true)
            }
            Err(e) => {
                tracing::error!("Failed to open transport for inlay {}: {e}", self.guid);
                self.surface = None;
                self.state = InlayState::Failed(e.to_string());
                Err(e.into())
            }
        }
    }

    pub fn handle_mouse(&mut self, process: &RenderProcess, input: &MouseInput) -> Result<(), InlayError> {
        if self.surface.is_none() {
            return Ok(());
        }
        if let Some(event) = self.input.mouse(input) {
            process.send(&DownstreamRequest::MouseEvent {
                guid: self.guid,
                event,
            })?;
        }
        Ok(())
    }

    /// ### English
    /// Returns whether the message was captured (and forwarded as a key event).
    ///
    /// ### 中文
    /// 返回该消息是否被捕获（并作为按键事件转发）。
    pub fn handle_window_message(
        &mut self,
        process: &RenderProcess,
        msg: WindowMessage,
        wparam: u64,
        lparam: i64,
    ) -> Result<bool, InlayError> {
        let Some(event) = self.input.window_message(msg, wparam, lparam) else {
            return Ok(false);
        };
        process.send(&DownstreamRequest::KeyEvent {
            guid: self.guid,
            event,
        })?;
        Ok(true)
    }

    /// ### English
    /// Pushes new content into `sink`. A failed inlay reports its error instead.
    ///
    /// ### 中文
    /// 将新内容推入 `sink`。失败状态的 inlay 则返回其错误。
    pub fn render(&mut self, sink: &mut dyn FrameSink) -> Result<bool, InlayError> {
        if let InlayState::Failed(message) = &self.state {
            return Err(InlayError::Failed(message.clone()));
        }
        let Some(surface) = self.surface.as_mut() else {
            return Ok(false);
        };
        match surface.poll(sink) {
            Ok(changed) => Ok(changed),
            Err(e) => {
                tracing::error!("Inlay {} surface failed: {e}", self.guid);
                self.state = InlayState::Failed(e.to_string());
                self.surface = None;
                Err(e.into())
            }
        }
    }
}
