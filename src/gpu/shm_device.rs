//! ### English
//! [`GpuDevice`] backed by named shared memory.
//!
//! A shareable texture is a region named `ResourceNames::texture(token)` holding a 16-byte header
//! (`magic`, `width`, `height`, `flush_count`) followed by BGRA pixels. The share handle is the
//! token; opening it maps the same region in the other process.
//!
//! ### 中文
//! 基于命名共享内存的 [`GpuDevice`]。
//!
//! 可共享纹理是名为 `ResourceNames::texture(token)` 的区域，含 16 字节头部
//!（`magic`、`width`、`height`、`flush_count`），随后是 BGRA 像素。共享句柄即 token；
//! 打开它会在另一进程中映射同一区域。

use std::sync::atomic::{AtomicU32, Ordering};

use dpi::PhysicalSize;
use parking_lot::RwLock;
use uuid::Uuid;

use super::{BYTES_PER_PIXEL, GpuDevice, GpuError};
use crate::protocol::{DirtyRect, SharedTextureHandle};
use crate::shm::{ResourceNames, SharedRegion};

const TEXTURE_MAGIC: u32 = u32::from_le_bytes(*b"ITEX");
const HEADER_BYTES: usize = 16;
const MAGIC: usize = 0;
const WIDTH: usize = 4;
const HEIGHT: usize = 8;
const FLUSH_COUNT: usize = 12;

enum Storage {
    Shared { region: SharedRegion, token: u64 },
    Local {
        pixels: RwLock<Vec<u8>>,
        flushes: AtomicU32,
    },
}

/// ### English
/// Texture of [`ShmDevice`].
///
/// ### 中文
/// [`ShmDevice`] 的纹理。
pub struct ShmTexture {
    size: PhysicalSize<u32>,
    storage: Storage,
}

impl std::fmt::Debug for ShmTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let token = match &self.storage {
            Storage::Shared { token, .. } => Some(*token),
            Storage::Local { .. } => None,
        };
        f.debug_struct("ShmTexture")
            .field("size", &self.size)
            .field("token", &token)
            .finish()
    }
}

impl ShmTexture {
    fn stride(&self) -> usize {
        self.size.width as usize * BYTES_PER_PIXEL
    }

    fn write(&self, offset: usize, bytes: &[u8]) -> Result<(), GpuError> {
        match &self.storage {
            Storage::Shared { region, .. } => Ok(region.write_at(HEADER_BYTES + offset, bytes)?),
            Storage::Local { pixels, .. } => {
                let mut pixels = pixels.write();
                let end = offset + bytes.len();
                let dst = pixels.get_mut(offset..end).ok_or(GpuError::InvalidSize {
                    width: self.size.width,
                    height: self.size.height,
                })?;
                dst.copy_from_slice(bytes);
                Ok(())
            }
        }
    }

    fn read(&self, offset: usize, out: &mut [u8]) -> Result<(), GpuError> {
        match &self.storage {
            Storage::Shared { region, .. } => Ok(region.read_at(HEADER_BYTES + offset, out)?),
            Storage::Local { pixels, .. } => {
                let pixels = pixels.read();
                let src = pixels.get(offset..offset + out.len()).ok_or(GpuError::InvalidSize {
                    width: self.size.width,
                    height: self.size.height,
                })?;
                out.copy_from_slice(src);
                Ok(())
            }
        }
    }

    fn flush_counter(&self) -> Result<&AtomicU32, GpuError> {
        match &self.storage {
            Storage::Shared { region, .. } => Ok(region.atomic_u32(FLUSH_COUNT)?),
            Storage::Local { flushes, .. } => Ok(flushes),
        }
    }
}

/// ### English
/// Shared-memory device. All names are scoped by the host pid through [`ResourceNames`].
///
/// ### 中文
/// 共享内存设备。所有名字都通过 [`ResourceNames`] 按宿主 pid 划分。
#[derive(Debug, Clone)]
pub struct ShmDevice {
    names: ResourceNames,
    adapter_id: Option<u64>,
    sharing: bool,
}

impl ShmDevice {
    pub fn new(names: ResourceNames, adapter_id: Option<u64>) -> Self {
        Self {
            names,
            adapter_id,
            sharing: true,
        }
    }

    /// ### English
    /// Disables cross-process sharing, e.g. to force the bitmap transport.
    ///
    /// ### 中文
    /// 禁用跨进程共享，例如用于强制使用 bitmap 传输。
    pub fn with_sharing(mut self, sharing: bool) -> Self {
        self.sharing = sharing;
        self
    }

    pub fn names(&self) -> &ResourceNames {
        &self.names
    }
}

fn pixel_bytes(size: PhysicalSize<u32>) -> Result<usize, GpuError> {
    let invalid = GpuError::InvalidSize {
        width: size.width,
        height: size.height,
    };
    if size.width == 0 || size.height == 0 {
        return Err(invalid);
    }
    (size.width as usize)
        .checked_mul(size.height as usize)
        .and_then(|pixels| pixels.checked_mul(BYTES_PER_PIXEL))
        .filter(|len| *len <= u32::MAX as usize)
        .ok_or(invalid)
}

impl GpuDevice for ShmDevice {
    type Texture = ShmTexture;

    fn adapter_id(&self) -> Option<u64> {
        self.adapter_id
    }

    fn supports_sharing(&self) -> bool {
        self.sharing
    }

    fn create_texture(
        &self,
        size: PhysicalSize<u32>,
        shareable: bool,
    ) -> Result<ShmTexture, GpuError> {
        let len = pixel_bytes(size)?;
        if !shareable {
            return Ok(ShmTexture {
                size,
                storage: Storage::Local {
                    pixels: RwLock::new(vec![0; len]),
                    flushes: AtomicU32::new(0),
                },
            });
        }
        if !self.sharing {
            return Err(GpuError::NotShareable);
        }

        let token = Uuid::new_v4().as_u64_pair().0;
        let region = SharedRegion::create(
            self.names.dir(),
            &self.names.texture(token),
            HEADER_BYTES + len,
        )?;
        region.atomic_u32(WIDTH)?.store(size.width, Ordering::Relaxed);
        region.atomic_u32(HEIGHT)?.store(size.height, Ordering::Relaxed);
        region.atomic_u32(MAGIC)?.store(TEXTURE_MAGIC, Ordering::Release);
        Ok(ShmTexture {
            size,
            storage: Storage::Shared { region, token },
        })
    }

    fn texture_size(&self, texture: &ShmTexture) -> PhysicalSize<u32> {
        texture.size
    }

    fn update_region(
        &self,
        texture: &ShmTexture,
        rect: DirtyRect,
        pixels: &[u8],
        stride: usize,
    ) -> Result<(), GpuError> {
        let rect = rect.clamp_to(texture.size.width, texture.size.height);
        if rect.is_empty() {
            return Ok(());
        }
        let row_bytes = rect.width as usize * BYTES_PER_PIXEL;
        let col = rect.x as usize * BYTES_PER_PIXEL;
        let last = (rect.bottom() as usize - 1) * stride + col + row_bytes;
        if stride < col + row_bytes || pixels.len() < last {
            return Err(GpuError::SourceTooSmall {
                len: pixels.len(),
                stride,
                rect,
            });
        }

        for row in rect.y as usize..rect.bottom() as usize {
            let src = &pixels[row * stride + col..row * stride + col + row_bytes];
            texture.write(row * texture.stride() + col, src)?;
        }
        Ok(())
    }

    fn copy_texture(
        &self,
        src: &ShmTexture,
        dst: &ShmTexture,
        x: u32,
        y: u32,
    ) -> Result<(), GpuError> {
        let target = DirtyRect::new(x, y, src.size.width, src.size.height)
            .clamp_to(dst.size.width, dst.size.height);
        if target.is_empty() {
            return Ok(());
        }
        let row_bytes = target.width as usize * BYTES_PER_PIXEL;
        let mut row = vec![0u8; row_bytes];
        for line in 0..target.height as usize {
            src.read(line * src.stride(), &mut row)?;
            let offset = (target.y as usize + line) * dst.stride() + target.x as usize * BYTES_PER_PIXEL;
            dst.write(offset, &row)?;
        }
        Ok(())
    }

    fn flush(&self, texture: &ShmTexture) -> Result<(), GpuError> {
        texture.flush_counter()?.fetch_add(1, Ordering::Release);
        Ok(())
    }

    fn flush_count(&self, texture: &ShmTexture) -> u32 {
        texture
            .flush_counter()
            .map(|counter| counter.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    fn share(&self, texture: &ShmTexture) -> Result<SharedTextureHandle, GpuError> {
        match &texture.storage {
            Storage::Shared { token, .. } => Ok(SharedTextureHandle { token: *token }),
            Storage::Local { .. } => Err(GpuError::NotShareable),
        }
    }

    fn open_shared(&self, handle: SharedTextureHandle) -> Result<ShmTexture, GpuError> {
        let invalid = GpuError::InvalidHandle {
            token: handle.token,
        };
        let region = SharedRegion::open(self.names.dir(), &self.names.texture(handle.token))?;
        if region.len() < HEADER_BYTES
            || region.atomic_u32(MAGIC)?.load(Ordering::Acquire) != TEXTURE_MAGIC
        {
            return Err(invalid);
        }
        let size = PhysicalSize::new(
            region.atomic_u32(WIDTH)?.load(Ordering::Relaxed),
            region.atomic_u32(HEIGHT)?.load(Ordering::Relaxed),
        );
        match pixel_bytes(size) {
            Ok(len) if HEADER_BYTES + len <= region.len() => Ok(ShmTexture {
                size,
                storage: Storage::Shared {
                    region,
                    token: handle.token,
                },
            }),
            _ => Err(invalid),
        }
    }

    fn read_region(
        &self,
        texture: &ShmTexture,
        rect: DirtyRect,
        out: &mut Vec<u8>,
    ) -> Result<(), GpuError> {
        let rect = rect.clamp_to(texture.size.width, texture.size.height);
        let row_bytes = rect.width as usize * BYTES_PER_PIXEL;
        out.clear();
        if rect.is_empty() {
            return Ok(());
        }
        out.resize(row_bytes * rect.height as usize, 0);
        for (line, chunk) in out.chunks_exact_mut(row_bytes).enumerate() {
            let offset = (rect.y as usize + line) * texture.stride() + rect.x as usize * BYTES_PER_PIXEL;
            texture.read(offset, chunk)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(dir: &tempfile::TempDir) -> ShmDevice {
        ShmDevice::new(ResourceNames::new(std::process::id(), dir.path()), Some(1))
    }

    fn solid(size: PhysicalSize<u32>, bgra: [u8; 4]) -> Vec<u8> {
        bgra.repeat((size.width * size.height) as usize)
    }

    #[test]
    fn shared_texture_opens_with_same_size_and_pixels() {
        let dir = tempfile::tempdir().unwrap();
        let device = device(&dir);
        let size = PhysicalSize::new(640, 480);
        let texture = device.create_texture(size, true).unwrap();
        let handle = device.share(&texture).unwrap();

        let frame = solid(size, [1, 2, 3, 255]);
        device
            .update_region(&texture, DirtyRect::new(10, 10, 4, 2), &frame, 640 * 4)
            .unwrap();
        device.flush(&texture).unwrap();

        let opened = device.open_shared(handle).unwrap();
        assert_eq!(device.texture_size(&opened), size);
        assert_eq!(device.flush_count(&opened), 1);

        let mut out = Vec::new();
        device
            .read_region(&opened, DirtyRect::new(9, 10, 2, 1), &mut out)
            .unwrap();
        assert_eq!(out, vec![0, 0, 0, 0, 1, 2, 3, 255]);
    }

    #[test]
    fn local_textures_are_not_shareable() {
        let dir = tempfile::tempdir().unwrap();
        let device = device(&dir);
        let local = device.create_texture(PhysicalSize::new(4, 4), false).unwrap();
        assert!(matches!(device.share(&local), Err(GpuError::NotShareable)));
        let disabled = device.clone().with_sharing(false);
        assert!(disabled.create_texture(PhysicalSize::new(4, 4), true).is_err());
    }

    #[test]
    fn copy_texture_clips_to_destination() {
        let dir = tempfile::tempdir().unwrap();
        let device = device(&dir);
        let view = device.create_texture(PhysicalSize::new(8, 8), true).unwrap();
        let popup = device.create_texture(PhysicalSize::new(4, 4), false).unwrap();
        let popup_pixels = solid(PhysicalSize::new(4, 4), [9, 9, 9, 9]);
        device
            .update_region(&popup, DirtyRect::full(4, 4), &popup_pixels, 16)
            .unwrap();
        device.copy_texture(&popup, &view, 6, 6).unwrap();

        let mut out = Vec::new();
        device
            .read_region(&view, DirtyRect::new(5, 6, 3, 1), &mut out)
            .unwrap();
        assert_eq!(out, vec![0, 0, 0, 0, 9, 9, 9, 9, 9, 9, 9, 9]);
    }

    #[test]
    fn rejects_short_source_and_bad_handles() {
        let dir = tempfile::tempdir().unwrap();
        let device = device(&dir);
        let texture = device.create_texture(PhysicalSize::new(4, 4), true).unwrap();
        assert!(matches!(
            device.update_region(&texture, DirtyRect::full(4, 4), &[0; 10], 16),
            Err(GpuError::SourceTooSmall { .. })
        ));
        assert!(device.open_shared(SharedTextureHandle { token: 1 }).is_err());
        assert!(device.create_texture(PhysicalSize::new(0, 4), true).is_err());
    }
}
