//! ### English
//! Shared GPU texture transport.
//!
//! ### 中文
//! 共享 GPU 纹理传输。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use dpi::PhysicalSize;
use parking_lot::{Mutex, RwLock};

use super::{
    FrameTransport, GenerationLedger, PaintElement, PaintOutcome, TransportError, validate_size,
};
use crate::gpu::{BYTES_PER_PIXEL, GpuDevice};
use crate::protocol::{DirtyRect, FrameTransportMode, FrameTransportResponse, SharedTextureHandle};

fn pack_size(size: PhysicalSize<u32>) -> u64 {
    (u64::from(size.width) << 32) | u64::from(size.height)
}

fn unpack_size(packed: u64) -> PhysicalSize<u32> {
    PhysicalSize::new((packed >> 32) as u32, packed as u32)
}

struct ViewLayer<T> {
    texture: T,
    size: PhysicalSize<u32>,
    generation: u32,
    /// ### English
    /// Share handle of this generation, computed on first request.
    ///
    /// ### 中文
    /// 本代纹理的共享句柄，首次请求时计算。
    handle: OnceLock<SharedTextureHandle>,
}

struct PopupLayer<T> {
    texture: Option<T>,
    rect: DirtyRect,
    visible: bool,
}

/// ### English
/// Exposes engine paints as a shareable texture.
///
/// ### 中文
/// 将引擎绘制内容暴露为可共享纹理。
pub struct TextureTransport<D: GpuDevice> {
    device: Arc<D>,
    view: RwLock<ViewLayer<D::Texture>>,
    /// ### English
    /// Last committed view size, readable while a resize holds the view lock.
    ///
    /// ### 中文
    /// 最近一次提交的 view 尺寸，resize 持有 view 锁时仍可读取。
    size: AtomicU64,
    ledger: Mutex<GenerationLedger<D::Texture>>,
    popup: Mutex<PopupLayer<D::Texture>>,
}

impl<D: GpuDevice> TextureTransport<D> {
    pub fn new(device: Arc<D>, size: PhysicalSize<u32>) -> Result<Self, TransportError> {
        validate_size(size)?;
        if !device.supports_sharing() {
            return Err(TransportError::Unavailable(FrameTransportMode::SharedTexture));
        }
        let texture = device.create_texture(size, true)?;
        let ledger = GenerationLedger::new();
        Ok(Self {
            view: RwLock::new(ViewLayer {
                texture,
                size,
                generation: ledger.current(),
                handle: OnceLock::new(),
            }),
            size: AtomicU64::new(pack_size(size)),
            ledger: Mutex::new(ledger),
            popup: Mutex::new(PopupLayer {
                texture: None,
                rect: DirtyRect::default(),
                visible: false,
            }),
            device,
        })
    }

    pub fn generation(&self) -> u32 {
        self.view.read().generation
    }

    /// ### English
    /// Generations parked and not yet released.
    ///
    /// ### 中文
    /// 已暂存但尚未释放的代数。
    pub fn retired_generations(&self) -> Vec<u32> {
        self.ledger.lock().retired_generations()
    }

    /// ### English
    /// Share handle of the current generation (cached per generation).
    ///
    /// ### 中文
    /// 当前代的共享句柄（按代缓存）。
    pub fn shared_handle(&self) -> Result<SharedTextureHandle, TransportError> {
        let view = self.view.read();
        if let Some(handle) = view.handle.get() {
            return Ok(*handle);
        }
        let handle = self.device.share(&view.texture)?;
        Ok(*view.handle.get_or_init(|| handle))
    }

    fn paint_popup(&self, dirty: DirtyRect, buffer: &[u8], width: u32, height: u32) -> PaintOutcome {
        let popup = self.popup.lock();
        let Some(texture) = popup.texture.as_ref() else {
            tracing::trace!("Popup paint before popup size; dropped");
            return PaintOutcome::Dropped;
        };
        if self.device.texture_size(texture) != PhysicalSize::new(width, height) {
            tracing::debug!("Popup paint {width}x{height} does not match popup layer; dropped");
            return PaintOutcome::Dropped;
        }
        match self
            .device
            .update_region(texture, dirty, buffer, width as usize * BYTES_PER_PIXEL)
        {
            Ok(()) => PaintOutcome::Applied,
            Err(e) => {
                tracing::warn!("Popup paint failed: {e}");
                PaintOutcome::Dropped
            }
        }
    }

    fn paint_view(&self, dirty: DirtyRect, buffer: &[u8], width: u32, height: u32) -> PaintOutcome {
        let generation = {
            let view = self.view.read();
            if view.size != PhysicalSize::new(width, height) {
                tracing::debug!(
                    "View paint {width}x{height} raced a resize to {}x{}; dropped",
                    view.size.width,
                    view.size.height
                );
                return PaintOutcome::Dropped;
            }

            let stride = width as usize * BYTES_PER_PIXEL;
            if let Err(e) = self.device.update_region(&view.texture, dirty, buffer, stride) {
                tracing::warn!("View paint failed: {e}");
                return PaintOutcome::Dropped;
            }

            {
                let popup = self.popup.lock();
                if popup.visible {
                    if let Some(texture) = popup.texture.as_ref() {
                        if let Err(e) = self.device.copy_texture(
                            texture,
                            &view.texture,
                            popup.rect.x,
                            popup.rect.y,
                        ) {
                            tracing::warn!("Popup composite failed: {e}");
                        }
                    }
                }
            }

            if let Err(e) = self.device.flush(&view.texture) {
                tracing::warn!("Texture flush failed: {e}");
                return PaintOutcome::Dropped;
            }
            view.generation
        };

        let released = self.ledger.lock().painted(generation);
        if !released.is_empty() {
            tracing::trace!("Released {} retired texture(s) after generation {generation} paint", released.len());
        }
        drop(released);
        PaintOutcome::Applied
    }
}

impl<D: GpuDevice> FrameTransport for TextureTransport<D> {
    fn mode(&self) -> FrameTransportMode {
        FrameTransportMode::SharedTexture
    }

    fn view_size(&self) -> PhysicalSize<u32> {
        unpack_size(self.size.load(Ordering::Acquire))
    }

    fn resize(&self, size: PhysicalSize<u32>) -> Result<bool, TransportError> {
        validate_size(size)?;
        if self.view.read().size == size {
            return Ok(false);
        }

        let texture = self.device.create_texture(size, true)?;
        let mut view = self.view.write();
        if view.size == size {
            return Ok(false);
        }
        let old = std::mem::replace(&mut view.texture, texture);
        let generation = self.ledger.lock().advance(old);
        view.size = size;
        self.size.store(pack_size(size), Ordering::Release);
        view.generation = generation;
        view.handle = OnceLock::new();
        tracing::debug!("Texture transport resized to {}x{} (generation {generation})", size.width, size.height);
        Ok(true)
    }

    fn response(&self) -> Result<FrameTransportResponse, TransportError> {
        Ok(FrameTransportResponse::TextureHandle(self.shared_handle()?))
    }

    fn on_paint(
        &self,
        element: PaintElement,
        dirty: DirtyRect,
        buffer: &[u8],
        width: u32,
        height: u32,
    ) -> PaintOutcome {
        match element {
            PaintElement::View => self.paint_view(dirty, buffer, width, height),
            PaintElement::Popup => self.paint_popup(dirty, buffer, width, height),
        }
    }

    fn on_popup_show(&self, show: bool) {
        self.popup.lock().visible = show;
    }

    fn on_popup_size(&self, rect: DirtyRect) {
        let view_size = self.view_size();
        if rect.width > view_size.width || rect.height > view_size.height {
            tracing::warn!(
                "Popup layer {}x{} is larger than the view {}x{}",
                rect.width,
                rect.height,
                view_size.width,
                view_size.height
            );
        }

        let texture = if rect.is_empty() {
            None
        } else {
            match self
                .device
                .create_texture(PhysicalSize::new(rect.width, rect.height), false)
            {
                Ok(texture) => Some(texture),
                Err(e) => {
                    tracing::warn!("Failed to build popup layer: {e}");
                    None
                }
            }
        };

        let old = {
            let mut popup = self.popup.lock();
            popup.rect = rect;
            std::mem::replace(&mut popup.texture, texture)
        };
        drop(old);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::ShmDevice;
    use crate::shm::ResourceNames;

    fn transport(dir: &tempfile::TempDir, size: (u32, u32)) -> (Arc<ShmDevice>, TextureTransport<ShmDevice>) {
        let device = Arc::new(ShmDevice::new(ResourceNames::new(std::process::id(), dir.path()), None));
        let transport = TextureTransport::new(device.clone(), PhysicalSize::new(size.0, size.1)).unwrap();
        (device, transport)
    }

    fn frame(width: u32, height: u32, value: u8) -> Vec<u8> {
        vec![value; (width * height) as usize * BYTES_PER_PIXEL]
    }

    #[test]
    fn resize_to_same_size_keeps_generation_and_handle() {
        let dir = tempfile::tempdir().unwrap();
        let (_, transport) = transport(&dir, (64, 32));
        let handle = transport.shared_handle().unwrap();
        assert!(!transport.resize(PhysicalSize::new(64, 32)).unwrap());
        assert_eq!(transport.generation(), 1);
        assert_eq!(transport.shared_handle().unwrap(), handle);

        assert!(transport.resize(PhysicalSize::new(32, 32)).unwrap());
        assert_ne!(transport.shared_handle().unwrap(), handle);
        assert_eq!(transport.view_size(), PhysicalSize::new(32, 32));
    }

    #[test]
    fn view_size_reports_last_size_during_resize() {
        let dir = tempfile::tempdir().unwrap();
        let (_, transport) = transport(&dir, (64, 32));
        {
            let _resizing = transport.view.write();
            assert_eq!(transport.view_size(), PhysicalSize::new(64, 32));
        }

        transport.resize(PhysicalSize::new(400, 300)).unwrap();
        let _resizing = transport.view.write();
        assert_eq!(transport.view_size(), PhysicalSize::new(400, 300));
    }

    #[test]
    fn old_generation_survives_until_new_paint() {
        let dir = tempfile::tempdir().unwrap();
        let (device, transport) = transport(&dir, (16, 16));
        let old = transport.shared_handle().unwrap();
        transport.resize(PhysicalSize::new(20, 20)).unwrap();

        // A paint that still carries the old geometry is dropped and releases nothing.
        let stale = frame(16, 16, 1);
        assert_eq!(
            transport.on_paint(PaintElement::View, DirtyRect::full(16, 16), &stale, 16, 16),
            PaintOutcome::Dropped
        );
        assert!(device.open_shared(old).is_ok());
        assert_eq!(transport.retired_generations(), vec![1]);

        let fresh = frame(20, 20, 2);
        assert_eq!(
            transport.on_paint(PaintElement::View, DirtyRect::full(20, 20), &fresh, 20, 20),
            PaintOutcome::Applied
        );
        assert!(device.open_shared(old).is_err());
        assert!(transport.retired_generations().is_empty());
    }

    #[test]
    fn visible_popup_is_composited_on_view_paint() {
        let dir = tempfile::tempdir().unwrap();
        let (device, transport) = transport(&dir, (8, 8));
        transport.on_popup_size(DirtyRect::new(2, 2, 2, 2));
        assert_eq!(
            transport.on_paint(PaintElement::Popup, DirtyRect::full(2, 2), &frame(2, 2, 7), 2, 2),
            PaintOutcome::Applied
        );
        transport.on_popup_show(true);
        transport.on_paint(PaintElement::View, DirtyRect::full(8, 8), &frame(8, 8, 1), 8, 8);

        let view = device.open_shared(transport.shared_handle().unwrap()).unwrap();
        let mut out = Vec::new();
        device
            .read_region(&view, DirtyRect::new(1, 2, 2, 1), &mut out)
            .unwrap();
        assert_eq!(out, vec![1, 1, 1, 1, 7, 7, 7, 7]);
        assert_eq!(device.flush_count(&view), 1);
    }
}
