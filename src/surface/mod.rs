//! ### English
//! Host-side consumers of the frame transports.
//!
//! A surface turns a [`FrameTransportResponse`] into pixels the host renderer can draw. Each
//! frame the host calls [`Surface::poll`], which pushes any new content into a [`FrameSink`]
//! (a GL texture in practice, see [`GlFrameSink`]).
//!
//! ### 中文
//! 帧传输在宿主侧的消费方。
//!
//! surface 将 [`FrameTransportResponse`] 转换为宿主渲染器可以绘制的像素。宿主每帧调用
//! [`Surface::poll`]，把新内容推入 [`FrameSink`]（实际中是 GL 纹理，见 [`GlFrameSink`]）。

mod bitmap;
mod gl;
mod texture;

use std::path::Path;
use std::sync::Arc;

use dpi::PhysicalSize;

pub use bitmap::BitmapSurface;
pub use gl::GlFrameSink;
pub use texture::TextureSurface;

use crate::gpu::{BYTES_PER_PIXEL, GpuDevice, GpuError};
use crate::protocol::{DirtyRect, FrameTransportResponse};
use crate::shm::ShmError;

#[derive(Debug, thiserror::Error)]
pub enum SurfaceError {
    #[error(transparent)]
    Shm(#[from] ShmError),
    #[error(transparent)]
    Gpu(#[from] GpuError),
    #[error("failed to spawn frame reader thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("frame sink error: {0}")]
    Sink(String),
}

/// ### English
/// Destination the host draws from. Pixels are BGRA8 with a tight `rect.width * 4` stride.
///
/// ### 中文
/// 宿主用于绘制的目标。像素为 BGRA8，行距紧密为 `rect.width * 4`。
pub trait FrameSink {
    /// ### English
    /// (Re)allocates storage for `size` when it differs from the current size.
    ///
    /// ### 中文
    /// 当 `size` 与当前尺寸不同时（重新）分配存储。
    fn ensure_size(&mut self, size: PhysicalSize<u32>) -> Result<(), SurfaceError>;

    fn upload(&mut self, rect: DirtyRect, pixels: &[u8]) -> Result<(), SurfaceError>;
}

/// ### English
/// CPU-side sink holding the latest full frame. Used by headless hosts and tests.
///
/// ### 中文
/// 在 CPU 侧保存最新完整帧的 sink。供无界面宿主与测试使用。
#[derive(Debug, Default)]
pub struct MemorySink {
    size: PhysicalSize<u32>,
    pixels: Vec<u8>,
    uploads: usize,
}

impl MemorySink {
    pub fn size(&self) -> PhysicalSize<u32> {
        self.size
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn uploads(&self) -> usize {
        self.uploads
    }

    /// ### English
    /// BGRA value at `(x, y)`.
    ///
    /// ### 中文
    /// `(x, y)` 处的 BGRA 值。
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        let offset = (y as usize * self.size.width as usize + x as usize) * BYTES_PER_PIXEL;
        self.pixels
            .get(offset..offset + BYTES_PER_PIXEL)
            .and_then(|px| px.try_into().ok())
    }
}

impl FrameSink for MemorySink {
    fn ensure_size(&mut self, size: PhysicalSize<u32>) -> Result<(), SurfaceError> {
        if self.size != size {
            self.size = size;
            self.pixels = vec![0; size.width as usize * size.height as usize * BYTES_PER_PIXEL];
        }
        Ok(())
    }

    fn upload(&mut self, rect: DirtyRect, pixels: &[u8]) -> Result<(), SurfaceError> {
        let src_stride = rect.width as usize * BYTES_PER_PIXEL;
        let clamped = rect.clamp_to(self.size.width, self.size.height);
        let row_bytes = clamped.width as usize * BYTES_PER_PIXEL;
        let stride = self.size.width as usize * BYTES_PER_PIXEL;
        for line in 0..clamped.height as usize {
            let src = pixels
                .get(line * src_stride..line * src_stride + row_bytes)
                .ok_or_else(|| SurfaceError::Sink(format!("upload of {rect:?} is short")))?;
            let offset = (clamped.y as usize + line) * stride + clamped.x as usize * BYTES_PER_PIXEL;
            self.pixels[offset..offset + row_bytes].copy_from_slice(src);
        }
        self.uploads += 1;
        Ok(())
    }
}

/// ### English
/// One overlay's consumer, matching the transport the render host handed out.
///
/// ### 中文
/// 单个 overlay 的消费方，与渲染宿主给出的传输方式相对应。
pub enum Surface<D: GpuDevice> {
    Texture(TextureSurface<D>),
    Bitmap(BitmapSurface),
}

impl<D: GpuDevice> Surface<D> {
    /// ### English
    /// Opens the resources named in `response`.
    ///
    /// ### 中文
    /// 打开 `response` 中指定的资源。
    pub fn open(
        device: &Arc<D>,
        shm_dir: &Path,
        response: &FrameTransportResponse,
    ) -> Result<Self, SurfaceError> {
        match response {
            FrameTransportResponse::TextureHandle(handle) => {
                Ok(Self::Texture(TextureSurface::open(device.clone(), *handle)?))
            }
            FrameTransportResponse::BitmapBuffer {
                bitmap_buffer_name,
                frame_info_buffer_name,
            } => Ok(Self::Bitmap(BitmapSurface::open(
                shm_dir,
                bitmap_buffer_name,
                frame_info_buffer_name,
            )?)),
        }
    }

    /// ### English
    /// Follows a resize response. A response of a different kind replaces the surface.
    ///
    /// ### 中文
    /// 跟随 resize 响应。若响应类型不同则替换整个 surface。
    pub fn rebind(
        &mut self,
        device: &Arc<D>,
        shm_dir: &Path,
        response: &FrameTransportResponse,
    ) -> Result<(), SurfaceError> {
        match (&mut *self, response) {
            (
                Self::Bitmap(surface),
                FrameTransportResponse::BitmapBuffer {
                    bitmap_buffer_name,
                    frame_info_buffer_name,
                },
            ) if surface.frame_info_buffer_name() == frame_info_buffer_name => {
                surface.rebind(bitmap_buffer_name)
            }
            _ => {
                *self = Self::open(device, shm_dir, response)?;
                Ok(())
            }
        }
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        match self {
            Self::Texture(surface) => surface.size(),
            Self::Bitmap(surface) => surface.size(),
        }
    }

    /// ### English
    /// Uploads new content, if any. Returns whether the sink changed.
    ///
    /// ### 中文
    /// 若有新内容则上传。返回 sink 是否发生了变化。
    pub fn poll(&mut self, sink: &mut dyn FrameSink) -> Result<bool, SurfaceError> {
        match self {
            Self::Texture(surface) => surface.poll(sink),
            Self::Bitmap(surface) => surface.poll(sink),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_places_rect() {
        let mut sink = MemorySink::default();
        sink.ensure_size(PhysicalSize::new(4, 4)).unwrap();
        sink.upload(DirtyRect::new(1, 2, 2, 1), &[1, 1, 1, 1, 2, 2, 2, 2]).unwrap();
        assert_eq!(sink.pixel(1, 2), Some([1, 1, 1, 1]));
        assert_eq!(sink.pixel(2, 2), Some([2, 2, 2, 2]));
        assert_eq!(sink.pixel(0, 0), Some([0, 0, 0, 0]));
        assert_eq!(sink.uploads(), 1);
    }
}
