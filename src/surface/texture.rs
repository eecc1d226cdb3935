use std::sync::Arc;

use dpi::PhysicalSize;

use super::{FrameSink, SurfaceError};
use crate::gpu::GpuDevice;
use crate::protocol::{DirtyRect, SharedTextureHandle};

/// ### English
/// Host-side view of a render-host texture, opened from its share handle.
///
/// New content is detected through the texture's flush counter; each change re-uploads the
/// full texture into the sink.
///
/// ### 中文
/// 渲染宿主纹理在宿主侧的视图，通过共享句柄打开。
///
/// 通过纹理的 flush 计数检测新内容；每次变化都会把整张纹理重新上传到 sink。
pub struct TextureSurface<D: GpuDevice> {
    device: Arc<D>,
    texture: D::Texture,
    handle: SharedTextureHandle,
    last_flush: Option<u32>,
    scratch: Vec<u8>,
}

impl<D: GpuDevice> TextureSurface<D> {
    pub fn open(device: Arc<D>, handle: SharedTextureHandle) -> Result<Self, SurfaceError> {
        let texture = device.open_shared(handle)?;
        Ok(Self {
            device,
            texture,
            handle,
            last_flush: None,
            scratch: Vec::new(),
        })
    }

    pub fn handle(&self) -> SharedTextureHandle {
        self.handle
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        self.device.texture_size(&self.texture)
    }

    pub fn texture(&self) -> &D::Texture {
        &self.texture
    }

    pub fn poll(&mut self, sink: &mut dyn FrameSink) -> Result<bool, SurfaceError> {
        let flushes = self.device.flush_count(&self.texture);
        if self.last_flush == Some(flushes) {
            return Ok(false);
        }
        let size = self.size();
        let rect = DirtyRect::full(size.width, size.height);
        self.device.read_region(&self.texture, rect, &mut self.scratch)?;
        sink.ensure_size(size)?;
        sink.upload(rect, &self.scratch)?;
        self.last_flush = Some(flushes);
        Ok(true)
    }
}
