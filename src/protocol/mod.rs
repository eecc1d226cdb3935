//! ### English
//! Messages and data records exchanged between the host and the render-host process.
//!
//! Every message set is a closed sum type; the dispatcher on each side matches exhaustively so a
//! new request kind cannot be forgotten at compile time.
//!
//! ### 中文
//! 宿主与渲染宿主进程之间交换的消息与数据记录。
//!
//! 每个消息集合都是封闭的和类型；两侧的分发器都做穷尽匹配，新增请求类型时编译期即可发现遗漏。

mod args;
mod cursor;
mod frame;
mod input;
mod request;

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use args::RenderProcessArguments;
pub use cursor::Cursor;
pub use frame::{BitmapFrame, DirtyRect};
pub use input::{InputModifiers, KeyEvent, KeyEventType, MouseButtons, MouseEvent};
pub use request::{
    DownstreamRequest, FrameTransportResponse, SharedTextureHandle, UpstreamRequest,
};

/// ### English
/// Process-wide unique identifier of one overlay, minted by the host.
///
/// A new value is minted whenever the overlay's transport is rebuilt, so requests addressed to
/// the old transport can never reach the new engine instance.
///
/// ### 中文
/// 由宿主生成的、进程内唯一的 overlay 标识。
///
/// overlay 的传输通道每次重建都会生成新值，发往旧传输通道的请求永远不会到达新的引擎实例。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RenderGuid(Uuid);

impl RenderGuid {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RenderGuid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RenderGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

bitflags::bitflags! {
    /// ### English
    /// Set of frame transports a render host can offer.
    ///
    /// ### 中文
    /// 渲染宿主可提供的帧传输方式集合。
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct FrameTransportModes: u32 {
        const SHARED_TEXTURE = 1 << 0;
        const BITMAP_BUFFER = 1 << 1;
    }
}

/// ### English
/// One concrete frame transport, as requested for a single overlay.
///
/// ### 中文
/// 为单个 overlay 请求的某一种具体帧传输方式。
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FrameTransportMode {
    #[default]
    SharedTexture,
    BitmapBuffer,
}

impl FrameTransportMode {
    pub fn as_flag(self) -> FrameTransportModes {
        match self {
            Self::SharedTexture => FrameTransportModes::SHARED_TEXTURE,
            Self::BitmapBuffer => FrameTransportModes::BITMAP_BUFFER,
        }
    }

    /// ### English
    /// Picks `self` when available, otherwise any other available mode.
    ///
    /// ### 中文
    /// 若 `self` 可用则选择它，否则选择任意其它可用方式。
    pub fn negotiate(self, available: FrameTransportModes) -> Option<Self> {
        if available.contains(self.as_flag()) {
            return Some(self);
        }
        [Self::SharedTexture, Self::BitmapBuffer]
            .into_iter()
            .find(|mode| available.contains(mode.as_flag()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiate_prefers_requested_mode() {
        let both = FrameTransportModes::all();
        assert_eq!(
            FrameTransportMode::BitmapBuffer.negotiate(both),
            Some(FrameTransportMode::BitmapBuffer)
        );
        assert_eq!(
            FrameTransportMode::SharedTexture.negotiate(FrameTransportModes::BITMAP_BUFFER),
            Some(FrameTransportMode::BitmapBuffer)
        );
        assert_eq!(
            FrameTransportMode::SharedTexture.negotiate(FrameTransportModes::empty()),
            None
        );
    }

    #[test]
    fn guid_serializes_as_plain_uuid() {
        let guid = RenderGuid::new();
        let json = serde_json::to_string(&guid).unwrap();
        assert_eq!(json, format!("\"{}\"", guid.as_uuid()));
        assert_eq!(serde_json::from_str::<RenderGuid>(&json).unwrap(), guid);
    }
}
