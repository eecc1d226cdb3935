//! ### English
//! Producer side of the frame transports (render-host process).
//!
//! The engine's paint callbacks land here and become something the host process can see:
//! - [`TextureTransport`]: a shareable GPU texture, updated with partial sub-resource writes.
//! - [`BitmapTransport`]: a shared pixel buffer plus a ring of [`BitmapFrame`] records.
//!
//! Both retire old resources through a [`GenerationLedger`]: generation `N` is released only
//! after a paint into a newer generation succeeded.
//!
//! ### 中文
//! 帧传输的生产方（渲染宿主进程）。
//!
//! 引擎的绘制回调落在这里，并被转换为宿主进程可见的资源：
//! - [`TextureTransport`]：可共享的 GPU 纹理，以局部子资源写入更新。
//! - [`BitmapTransport`]：共享像素缓冲区加上 [`BitmapFrame`] 记录环。
//!
//! 两者都通过 [`GenerationLedger`] 退役旧资源：只有当更新一代的绘制成功后，
//! 第 `N` 代才会被释放。
//!
//! [`BitmapFrame`]: crate::protocol::BitmapFrame

mod bitmap;
mod generation;
mod texture;

use dpi::PhysicalSize;

pub use bitmap::{BITMAP_HEADER_BYTES, BitmapHeader, BitmapTransport};
pub use generation::GenerationLedger;
pub use texture::TextureTransport;

use crate::gpu::GpuError;
use crate::protocol::{DirtyRect, FrameTransportMode, FrameTransportResponse};
use crate::shm::ShmError;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport size {width}x{height} is invalid")]
    InvalidSize { width: u32, height: u32 },
    #[error(transparent)]
    Gpu(#[from] GpuError),
    #[error(transparent)]
    Shm(#[from] ShmError),
    #[error("frame transport {0:?} is not available")]
    Unavailable(FrameTransportMode),
}

/// ### English
/// Which layer an engine paint callback targets.
///
/// ### 中文
/// 引擎绘制回调所针对的图层。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaintElement {
    View,
    /// ### English
    /// Popup/IME layer, composited onto the view on the next view paint.
    ///
    /// ### 中文
    /// 弹出层/IME 层，在下一次 view 绘制时合成到 view 上。
    Popup,
}

/// ### English
/// Result of one paint callback.
///
/// ### 中文
/// 一次绘制回调的结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaintOutcome {
    Applied,
    /// ### English
    /// The frame was dropped (geometry race, bad bounds, or a failed write).
    ///
    /// ### 中文
    /// 帧被丢弃（几何竞争、越界或写入失败）。
    Dropped,
}

/// ### English
/// Paint-callback surface the engine renders into.
///
/// Resize is called from the dispatch thread while paints arrive on the engine's paint thread;
/// implementations are internally synchronized.
///
/// ### 中文
/// 引擎渲染写入的绘制回调接口。
///
/// resize 在分发线程上调用，而绘制发生在引擎绘制线程上；实现内部自行同步。
pub trait FrameTransport: Send + Sync {
    fn mode(&self) -> FrameTransportMode;

    /// ### English
    /// Current view size reported to the engine. Never fails; falls back to 1x1.
    ///
    /// ### 中文
    /// 报告给引擎的当前 view 尺寸。不会失败；回退值为 1x1。
    fn view_size(&self) -> PhysicalSize<u32>;

    /// ### English
    /// Resizes the transport. Returns `false` (and allocates nothing) when `size` is current.
    ///
    /// ### 中文
    /// 调整传输尺寸。若 `size` 与当前一致则返回 `false`（且不分配任何资源）。
    fn resize(&self, size: PhysicalSize<u32>) -> Result<bool, TransportError>;

    /// ### English
    /// Descriptor the host uses to open the current generation.
    ///
    /// ### 中文
    /// 宿主用于打开当前代资源的描述。
    fn response(&self) -> Result<FrameTransportResponse, TransportError>;

    fn on_paint(
        &self,
        element: PaintElement,
        dirty: DirtyRect,
        buffer: &[u8],
        width: u32,
        height: u32,
    ) -> PaintOutcome;

    fn on_popup_show(&self, show: bool);

    fn on_popup_size(&self, rect: DirtyRect);
}

pub(crate) fn validate_size(size: PhysicalSize<u32>) -> Result<(), TransportError> {
    if size.width == 0 || size.height == 0 {
        Err(TransportError::InvalidSize {
            width: size.width,
            height: size.height,
        })
    } else {
        Ok(())
    }
}
