//! ### English
//! Request and response sum types for both directions of the channel.
//!
//! ### 中文
//! 通道两个方向上的请求与响应和类型。

use dpi::PhysicalSize;
use serde::{Deserialize, Serialize};
use url::Url;

use super::{
    Cursor, FrameTransportMode, FrameTransportModes, KeyEvent, MouseEvent, RenderGuid,
};

/// ### English
/// Host → render-host requests.
///
/// `NewInlay` and `ResizeInlay` answer with a [`FrameTransportResponse`]; every other kind is
/// sent fire-and-forget.
///
/// ### 中文
/// 宿主 → 渲染宿主的请求。
///
/// `NewInlay` 与 `ResizeInlay` 以 [`FrameTransportResponse`] 应答；其余类型均为发送即忘。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DownstreamRequest {
    NewInlay {
        guid: RenderGuid,
        mode: FrameTransportMode,
        url: Url,
        size: PhysicalSize<u32>,
    },
    ResizeInlay {
        guid: RenderGuid,
        size: PhysicalSize<u32>,
    },
    NavigateInlay {
        guid: RenderGuid,
        url: Url,
    },
    DebugInlay {
        guid: RenderGuid,
    },
    RemoveInlay {
        guid: RenderGuid,
    },
    MouseEvent {
        guid: RenderGuid,
        event: MouseEvent,
    },
    KeyEvent {
        guid: RenderGuid,
        event: KeyEvent,
    },
}

impl DownstreamRequest {
    pub fn guid(&self) -> RenderGuid {
        match self {
            Self::NewInlay { guid, .. }
            | Self::ResizeInlay { guid, .. }
            | Self::NavigateInlay { guid, .. }
            | Self::DebugInlay { guid }
            | Self::RemoveInlay { guid }
            | Self::MouseEvent { guid, .. }
            | Self::KeyEvent { guid, .. } => *guid,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::NewInlay { .. } => "NewInlay",
            Self::ResizeInlay { .. } => "ResizeInlay",
            Self::NavigateInlay { .. } => "NavigateInlay",
            Self::DebugInlay { .. } => "DebugInlay",
            Self::RemoveInlay { .. } => "RemoveInlay",
            Self::MouseEvent { .. } => "MouseEvent",
            Self::KeyEvent { .. } => "KeyEvent",
        }
    }
}

/// ### English
/// Render-host → host requests. Both are notifications; neither expects a response.
///
/// ### 中文
/// 渲染宿主 → 宿主的请求。两者都是通知，均不需要响应。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum UpstreamRequest {
    ReadyNotification {
        available_transports: FrameTransportModes,
    },
    SetCursor {
        guid: RenderGuid,
        cursor: Cursor,
    },
}

/// ### English
/// Opaque token naming a shared texture of one generation. Resolved on the host side with
/// [`GpuDevice::open_shared`](crate::gpu::GpuDevice::open_shared).
///
/// ### 中文
/// 标识某一代共享纹理的不透明 token。宿主侧通过
/// [`GpuDevice::open_shared`](crate::gpu::GpuDevice::open_shared) 解析。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SharedTextureHandle {
    pub token: u64,
}

/// ### English
/// Descriptor of an overlay's transport, returned from create and resize.
///
/// ### 中文
/// overlay 传输通道的描述，由创建与调整大小请求返回。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FrameTransportResponse {
    TextureHandle(SharedTextureHandle),
    BitmapBuffer {
        bitmap_buffer_name: String,
        frame_info_buffer_name: String,
    },
}
