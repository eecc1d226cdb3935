//! ### English
//! Shared pixel buffer transport with dirty-rectangle metadata.
//!
//! The pixel buffer region starts with a [`BitmapHeader`] (`magic`, `width`, `height`,
//! `generation`) followed by `width * height * 4` BGRA bytes. Shared memory cannot grow in
//! place, so a resize allocates a brand-new region under a fresh name.
//!
//! ### 中文
//! 带脏矩形元数据的共享像素缓冲区传输。
//!
//! 像素缓冲区域以 [`BitmapHeader`]（`magic`、`width`、`height`、`generation`）开头，
//! 随后是 `width * height * 4` 字节的 BGRA 数据。共享内存无法原地扩容，
//! 因此 resize 会以新名字分配一个全新的区域。

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use dpi::PhysicalSize;
use parking_lot::Mutex;

use super::{
    FrameTransport, GenerationLedger, PaintElement, PaintOutcome, TransportError, validate_size,
};
use crate::gpu::BYTES_PER_PIXEL;
use crate::protocol::{BitmapFrame, DirtyRect, FrameTransportMode, FrameTransportResponse};
use crate::shm::{PushError, ResourceNames, SharedRegion, ShmError, ShmRing};

pub const BITMAP_MAGIC: u32 = u32::from_le_bytes(*b"IBMP");
pub const BITMAP_HEADER_BYTES: usize = std::mem::size_of::<BitmapHeader>();

/// ### English
/// Frame records the metadata ring can hold before the producer starts coalescing.
///
/// ### 中文
/// 元数据环在生产方开始合并之前可容纳的帧记录数。
const FRAME_RING_RECORDS: usize = 64;

/// ### English
/// Fixed header at the start of every pixel buffer region.
///
/// ### 中文
/// 每个像素缓冲区域开头的固定头部。
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct BitmapHeader {
    pub magic: u32,
    pub width: u32,
    pub height: u32,
    pub generation: u32,
}

impl BitmapHeader {
    /// ### English
    /// Reads and validates the header of an opened pixel buffer.
    ///
    /// ### 中文
    /// 读取并校验已打开像素缓冲区的头部。
    pub fn read(region: &SharedRegion) -> Result<Self, ShmError> {
        let mut raw = [0u8; BITMAP_HEADER_BYTES];
        region.read_at(0, &mut raw)?;
        let header: Self = bytemuck::pod_read_unaligned(&raw);
        let required = BITMAP_HEADER_BYTES + header.pixel_bytes();
        if header.magic != BITMAP_MAGIC || header.width == 0 || header.height == 0 {
            return Err(ShmError::CorruptHeader {
                name: region.name().to_string(),
            });
        }
        if region.len() < required {
            return Err(ShmError::TooSmall {
                name: region.name().to_string(),
                len: region.len(),
                required,
            });
        }
        Ok(header)
    }

    pub fn pixel_bytes(&self) -> usize {
        self.width as usize * self.height as usize * BYTES_PER_PIXEL
    }
}

struct PixelBuffer {
    region: SharedRegion,
    header: BitmapHeader,
}

impl PixelBuffer {
    fn allocate(
        names: &ResourceNames,
        size: PhysicalSize<u32>,
        generation: u32,
    ) -> Result<Self, TransportError> {
        validate_size(size)?;
        let header = BitmapHeader {
            magic: BITMAP_MAGIC,
            width: size.width,
            height: size.height,
            generation,
        };
        let region = SharedRegion::create(
            names.dir(),
            &names.bitmap_buffer(),
            BITMAP_HEADER_BYTES + header.pixel_bytes(),
        )?;
        region.write_at(0, bytemuck::bytes_of(&header))?;
        Ok(Self { region, header })
    }

    fn size(&self) -> PhysicalSize<u32> {
        PhysicalSize::new(self.header.width, self.header.height)
    }

    fn write_dirty(&self, dirty: DirtyRect, buffer: &[u8]) -> Result<(), ShmError> {
        let stride = self.header.width as usize * BYTES_PER_PIXEL;
        let col = dirty.x as usize * BYTES_PER_PIXEL;
        let row_bytes = dirty.width as usize * BYTES_PER_PIXEL;
        for row in dirty.y as usize..dirty.bottom() as usize {
            let offset = row * stride + col;
            let src = buffer.get(offset..offset + row_bytes).ok_or(ShmError::OutOfBounds {
                offset,
                len: row_bytes,
                capacity: buffer.len(),
            })?;
            self.region.write_at(BITMAP_HEADER_BYTES + offset, src)?;
        }
        Ok(())
    }
}

struct BitmapState {
    buffer: PixelBuffer,
    ledger: GenerationLedger<PixelBuffer>,
    /// ### English
    /// Dirty area painted while the frame ring was full; sent with the next record.
    ///
    /// ### 中文
    /// 帧环已满期间绘制的脏区域；随下一条记录一起发送。
    backlog: Option<DirtyRect>,
}

/// ### English
/// Exposes engine paints as a shared pixel buffer plus a ring of [`BitmapFrame`] records.
///
/// ### 中文
/// 将引擎绘制内容暴露为共享像素缓冲区，外加 [`BitmapFrame`] 记录环。
pub struct BitmapTransport {
    names: ResourceNames,
    frames: ShmRing,
    frame_info_name: String,
    state: Mutex<BitmapState>,
}

impl BitmapTransport {
    pub fn new(names: ResourceNames, size: PhysicalSize<u32>) -> Result<Self, TransportError> {
        let ledger = GenerationLedger::new();
        let buffer = PixelBuffer::allocate(&names, size, ledger.current())?;

        let frame_info_name = names.frame_info();
        let capacity = FRAME_RING_RECORDS * (4 + std::mem::size_of::<BitmapFrame>());
        let region = SharedRegion::create(names.dir(), &frame_info_name, ShmRing::bytes_for(capacity))?;
        let frames = ShmRing::init(Arc::new(region), 0, capacity)?;

        Ok(Self {
            names,
            frames,
            frame_info_name,
            state: Mutex::new(BitmapState {
                buffer,
                ledger,
                backlog: None,
            }),
        })
    }

    pub fn bitmap_buffer_name(&self) -> String {
        self.state.lock().buffer.region.name().to_string()
    }

    pub fn frame_info_buffer_name(&self) -> &str {
        &self.frame_info_name
    }

    pub fn generation(&self) -> u32 {
        self.state.lock().buffer.header.generation
    }

    pub fn retired_generations(&self) -> Vec<u32> {
        self.state.lock().ledger.retired_generations()
    }
}

impl FrameTransport for BitmapTransport {
    fn mode(&self) -> FrameTransportMode {
        FrameTransportMode::BitmapBuffer
    }

    fn view_size(&self) -> PhysicalSize<u32> {
        self.state.lock().buffer.size()
    }

    fn resize(&self, size: PhysicalSize<u32>) -> Result<bool, TransportError> {
        validate_size(size)?;
        let mut state = self.state.lock();
        if state.buffer.size() == size {
            return Ok(false);
        }
        let next = state.ledger.current().wrapping_add(1);
        let buffer = PixelBuffer::allocate(&self.names, size, next)?;
        let old = std::mem::replace(&mut state.buffer, buffer);
        let generation = state.ledger.advance(old);
        state.backlog = None;
        tracing::debug!(
            "Bitmap transport resized to {}x{} as {} (generation {generation})",
            size.width,
            size.height,
            state.buffer.region.name()
        );
        Ok(true)
    }

    fn response(&self) -> Result<FrameTransportResponse, TransportError> {
        Ok(FrameTransportResponse::BitmapBuffer {
            bitmap_buffer_name: self.bitmap_buffer_name(),
            frame_info_buffer_name: self.frame_info_name.clone(),
        })
    }

    fn on_paint(
        &self,
        element: PaintElement,
        dirty: DirtyRect,
        buffer: &[u8],
        width: u32,
        height: u32,
    ) -> PaintOutcome {
        if element != PaintElement::View {
            tracing::trace!("Bitmap transport ignores popup paints");
            return PaintOutcome::Dropped;
        }

        let mut state = self.state.lock();
        let header = state.buffer.header;
        if (header.width, header.height) != (width, height) {
            tracing::debug!(
                "Bitmap paint {width}x{height} does not match buffer {}x{}; dropped",
                header.width,
                header.height
            );
            return PaintOutcome::Dropped;
        }
        if buffer.len() < header.pixel_bytes() || !dirty.fits_in(width, height) {
            tracing::warn!(
                "Bitmap paint out of bounds (buffer {} bytes, dirty {dirty:?}); dropped",
                buffer.len()
            );
            return PaintOutcome::Dropped;
        }

        if let Err(e) = state.buffer.write_dirty(dirty, buffer) {
            tracing::warn!("Bitmap write failed, frame dropped: {e}");
            return PaintOutcome::Dropped;
        }

        let dirty = state.backlog.take().map_or(dirty, |backlog| backlog.union(dirty));
        let frame = BitmapFrame::new(width, height, dirty, header.generation);
        match self.frames.try_push(bytemuck::bytes_of(&frame)) {
            Ok(()) => {}
            Err(PushError::Full) => {
                tracing::trace!("Frame ring full; coalescing dirty rect into next frame");
                state.backlog = Some(dirty);
            }
            Err(PushError::TooLarge) => {
                tracing::warn!("Frame record does not fit the frame ring");
            }
        }

        let released = state.ledger.painted(header.generation);
        drop(state);
        if !released.is_empty() {
            tracing::trace!("Released {} retired bitmap buffer(s)", released.len());
        }
        PaintOutcome::Applied
    }

    fn on_popup_show(&self, _show: bool) {}

    fn on_popup_size(&self, _rect: DirtyRect) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(dir: &tempfile::TempDir, width: u32, height: u32) -> BitmapTransport {
        let names = ResourceNames::new(std::process::id(), dir.path());
        BitmapTransport::new(names, PhysicalSize::new(width, height)).unwrap()
    }

    fn open_frames(dir: &tempfile::TempDir, transport: &BitmapTransport) -> ShmRing {
        let region = SharedRegion::open(dir.path(), transport.frame_info_buffer_name()).unwrap();
        ShmRing::attach(Arc::new(region), 0).unwrap()
    }

    #[test]
    fn writes_only_dirty_rows_and_pushes_record() {
        let dir = tempfile::tempdir().unwrap();
        let transport = transport(&dir, 4, 4);
        let frames = open_frames(&dir, &transport);
        let pixels = vec![0xAB; 4 * 4 * 4];

        assert_eq!(
            transport.on_paint(PaintElement::View, DirtyRect::new(1, 1, 2, 1), &pixels, 4, 4),
            PaintOutcome::Applied
        );

        let record: BitmapFrame = bytemuck::pod_read_unaligned(&frames.try_pop().unwrap());
        assert_eq!(record.dirty(), DirtyRect::new(1, 1, 2, 1));
        assert_eq!((record.width, record.height, record.generation), (4, 4, 1));

        let buffer = SharedRegion::open(dir.path(), &transport.bitmap_buffer_name()).unwrap();
        assert_eq!(BitmapHeader::read(&buffer).unwrap().width, 4);
        let mut row = [0u8; 16];
        buffer.read_at(BITMAP_HEADER_BYTES + 16, &mut row).unwrap();
        assert_eq!(row, [0, 0, 0, 0, 0xAB, 0xAB, 0xAB, 0xAB, 0xAB, 0xAB, 0xAB, 0xAB, 0, 0, 0, 0]);
    }

    #[test]
    fn full_ring_folds_dirty_rects_into_next_record() {
        let dir = tempfile::tempdir().unwrap();
        let transport = transport(&dir, 8, 8);
        let frames = open_frames(&dir, &transport);
        let pixels = vec![1; 8 * 8 * 4];

        for _ in 0..FRAME_RING_RECORDS {
            transport.on_paint(PaintElement::View, DirtyRect::new(0, 0, 1, 1), &pixels, 8, 8);
        }
        transport.on_paint(PaintElement::View, DirtyRect::new(6, 6, 2, 2), &pixels, 8, 8);
        while frames.try_pop().is_ok() {}

        transport.on_paint(PaintElement::View, DirtyRect::new(0, 0, 1, 1), &pixels, 8, 8);
        let record: BitmapFrame = bytemuck::pod_read_unaligned(&frames.try_pop().unwrap());
        assert_eq!(record.dirty(), DirtyRect::new(0, 0, 8, 8));
    }

    #[test]
    fn resize_uses_fresh_buffer_and_frees_old_after_write() {
        let dir = tempfile::tempdir().unwrap();
        let transport = transport(&dir, 4, 4);
        let old_name = transport.bitmap_buffer_name();
        assert!(!transport.resize(PhysicalSize::new(4, 4)).unwrap());

        assert!(transport.resize(PhysicalSize::new(8, 2)).unwrap());
        let new_name = transport.bitmap_buffer_name();
        assert_ne!(old_name, new_name);
        assert!(SharedRegion::open(dir.path(), &old_name).is_ok());

        let stale = vec![0; 4 * 4 * 4];
        assert_eq!(
            transport.on_paint(PaintElement::View, DirtyRect::full(4, 4), &stale, 4, 4),
            PaintOutcome::Dropped
        );
        assert!(SharedRegion::open(dir.path(), &old_name).is_ok());

        let fresh = vec![0; 8 * 2 * 4];
        transport.on_paint(PaintElement::View, DirtyRect::full(8, 2), &fresh, 8, 2);
        assert!(SharedRegion::open(dir.path(), &old_name).is_err());
        assert_eq!(transport.generation(), 2);
    }

    #[test]
    fn out_of_bounds_dirty_rect_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let transport = transport(&dir, 4, 4);
        let pixels = vec![0; 4 * 4 * 4];
        assert_eq!(
            transport.on_paint(PaintElement::View, DirtyRect::new(3, 3, 2, 2), &pixels, 4, 4),
            PaintOutcome::Dropped
        );
        assert_eq!(
            transport.on_paint(PaintElement::View, DirtyRect::full(4, 4), &pixels[..10], 4, 4),
            PaintOutcome::Dropped
        );
    }
}
