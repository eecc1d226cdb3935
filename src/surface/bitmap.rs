//! ### English
//! Consumer side of the bitmap transport.
//!
//! A reader thread blocks on the frame-info ring and folds every record into a single pending
//! frame; the draw thread takes at most one frame per poll, so a slow host never builds a
//! backlog.
//!
//! ### 中文
//! bitmap 传输的消费方。
//!
//! 读线程阻塞在帧信息环上，并把每条记录合并为单个待处理帧；绘制线程每次轮询最多取走一帧，
//! 因此宿主即使较慢也不会积压。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use dpi::PhysicalSize;
use parking_lot::Mutex;

use super::{FrameSink, SurfaceError};
use crate::gpu::BYTES_PER_PIXEL;
use crate::protocol::{BitmapFrame, DirtyRect};
use crate::shm::{PopError, SharedRegion, ShmRing};
use crate::transport::{BITMAP_HEADER_BYTES, BitmapHeader};

/// ### English
/// Upper bound on one blocking read of the frame ring (cancellation latency).
///
/// ### 中文
/// 帧环单次阻塞读的上限（即取消延迟）。
const READ_POLL: Duration = Duration::from_millis(20);

/// ### English
/// Holds at most one undrawn frame. A newer frame is merged into the waiting one.
///
/// ### 中文
/// 至多保存一个尚未绘制的帧。新帧会合并进正在等待的帧。
#[derive(Default)]
struct FrameMailbox {
    pending: Mutex<Option<BitmapFrame>>,
}

impl FrameMailbox {
    fn publish(&self, frame: BitmapFrame) {
        let mut pending = self.pending.lock();
        *pending = Some(match pending.take() {
            Some(waiting) => waiting.coalesce(frame),
            None => frame,
        });
    }

    fn take(&self) -> Option<BitmapFrame> {
        self.pending.lock().take()
    }
}

pub struct BitmapSurface {
    dir: PathBuf,
    buffer: SharedRegion,
    header: BitmapHeader,
    frame_info_name: String,
    latest: Arc<FrameMailbox>,
    cancel: Arc<AtomicBool>,
    reader: Option<thread::JoinHandle<()>>,
    needs_full_upload: bool,
    stale_frames: u64,
    scratch: Vec<u8>,
}

impl BitmapSurface {
    pub fn open(dir: &Path, bitmap_buffer_name: &str, frame_info_name: &str) -> Result<Self, SurfaceError> {
        let buffer = SharedRegion::open(dir, bitmap_buffer_name)?;
        let header = BitmapHeader::read(&buffer)?;
        let frames = ShmRing::attach(Arc::new(SharedRegion::open(dir, frame_info_name)?), 0)?;

        let latest = Arc::new(FrameMailbox::default());
        let cancel = Arc::new(AtomicBool::new(false));
        let reader = {
            let latest = latest.clone();
            let cancel = cancel.clone();
            thread::Builder::new()
                .name("InlayFrameReader".to_string())
                .spawn(move || run_reader(frames, latest, cancel))
                .map_err(SurfaceError::Spawn)?
        };

        Ok(Self {
            dir: dir.to_path_buf(),
            buffer,
            header,
            frame_info_name: frame_info_name.to_string(),
            latest,
            cancel,
            reader: Some(reader),
            needs_full_upload: true,
            stale_frames: 0,
            scratch: Vec::new(),
        })
    }

    pub fn frame_info_buffer_name(&self) -> &str {
        &self.frame_info_name
    }

    pub fn bitmap_buffer_name(&self) -> &str {
        self.buffer.name()
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        PhysicalSize::new(self.header.width, self.header.height)
    }

    pub fn generation(&self) -> u32 {
        self.header.generation
    }

    /// ### English
    /// Frames discarded because their geometry did not match the live buffer.
    ///
    /// ### 中文
    /// 因几何与当前缓冲区不一致而被丢弃的帧数。
    pub fn stale_frames(&self) -> u64 {
        self.stale_frames
    }

    /// ### English
    /// Switches to the pixel buffer a resize produced. The whole buffer is uploaded on the next
    /// poll.
    ///
    /// ### 中文
    /// 切换到 resize 产生的新像素缓冲区。下次轮询会上传整个缓冲区。
    pub fn rebind(&mut self, bitmap_buffer_name: &str) -> Result<(), SurfaceError> {
        if bitmap_buffer_name == self.buffer.name() {
            return Ok(());
        }
        let buffer = SharedRegion::open(&self.dir, bitmap_buffer_name)?;
        self.header = BitmapHeader::read(&buffer)?;
        self.buffer = buffer;
        self.needs_full_upload = true;
        Ok(())
    }

    fn upload(&mut self, rect: DirtyRect, sink: &mut dyn FrameSink) -> Result<(), SurfaceError> {
        let stride = self.header.width as usize * BYTES_PER_PIXEL;
        let row_bytes = rect.width as usize * BYTES_PER_PIXEL;
        self.scratch.clear();
        self.scratch.resize(row_bytes * rect.height as usize, 0);
        for (line, chunk) in self.scratch.chunks_exact_mut(row_bytes).enumerate() {
            let offset = (rect.y as usize + line) * stride + rect.x as usize * BYTES_PER_PIXEL;
            self.buffer.read_at(BITMAP_HEADER_BYTES + offset, chunk)?;
        }
        sink.ensure_size(self.size())?;
        sink.upload(rect, &self.scratch)
    }

    /// ### English
    /// Applies the latest pending frame, if it matches the live buffer. Returns whether the sink
    /// changed.
    ///
    /// ### 中文
    /// 若最新待处理帧与当前缓冲区一致则应用之。返回 sink 是否发生了变化。
    pub fn poll(&mut self, sink: &mut dyn FrameSink) -> Result<bool, SurfaceError> {
        let frame = self.latest.take();

        if self.needs_full_upload {
            self.needs_full_upload = false;
            let size = self.size();
            self.upload(DirtyRect::full(size.width, size.height), sink)?;
            if let Some(frame) = frame.filter(|frame| !self.matches(frame)) {
                self.reject(&frame);
            }
            return Ok(true);
        }

        let Some(frame) = frame else {
            return Ok(false);
        };
        if !self.matches(&frame) {
            self.reject(&frame);
            return Ok(false);
        }
        let dirty = frame.dirty();
        if dirty.is_empty() {
            return Ok(false);
        }
        self.upload(dirty, sink)?;
        Ok(true)
    }

    fn matches(&self, frame: &BitmapFrame) -> bool {
        frame.width == self.header.width
            && frame.height == self.header.height
            && frame.generation == self.header.generation
            && frame.dirty().fits_in(self.header.width, self.header.height)
    }

    fn reject(&mut self, frame: &BitmapFrame) {
        self.stale_frames += 1;
        tracing::debug!(
            "Discarding stale frame {}x{} gen {} (live buffer {}x{} gen {})",
            frame.width,
            frame.height,
            frame.generation,
            self.header.width,
            self.header.height,
            self.header.generation
        );
    }
}

impl Drop for BitmapSurface {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Release);
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

fn run_reader(frames: ShmRing, latest: Arc<FrameMailbox>, cancel: Arc<AtomicBool>) {
    while !cancel.load(Ordering::Acquire) {
        match frames.pop_timeout(READ_POLL) {
            Ok(record) if record.len() == std::mem::size_of::<BitmapFrame>() => {
                let frame: BitmapFrame = bytemuck::pod_read_unaligned(&record);
                latest.publish(frame);
            }
            Ok(record) => {
                tracing::warn!("Ignoring frame record of {} bytes", record.len());
            }
            Err(PopError::Empty) => {}
            Err(PopError::Corrupt) => {
                tracing::error!("Frame info ring is corrupt; stopping frame reader");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mailbox_merges_undrawn_frames() {
        let mailbox = FrameMailbox::default();
        assert_eq!(mailbox.take(), None);

        mailbox.publish(BitmapFrame::new(100, 100, DirtyRect::new(0, 0, 10, 10), 1));
        mailbox.publish(BitmapFrame::new(100, 100, DirtyRect::new(40, 40, 10, 10), 1));
        let merged = mailbox.take().unwrap();
        assert_eq!(merged.dirty(), DirtyRect::new(0, 0, 50, 50));
        assert_eq!(mailbox.take(), None);
    }

    #[test]
    fn mailbox_keeps_only_newest_geometry() {
        let mailbox = FrameMailbox::default();
        mailbox.publish(BitmapFrame::new(100, 100, DirtyRect::new(0, 0, 10, 10), 1));
        let resized = BitmapFrame::new(200, 50, DirtyRect::full(200, 50), 2);
        mailbox.publish(resized);
        assert_eq!(mailbox.take(), Some(resized));
    }

    #[test]
    fn mailbox_hands_reader_frames_to_draw_thread() {
        let mailbox = Arc::new(FrameMailbox::default());
        let reader = {
            let mailbox = mailbox.clone();
            thread::spawn(move || {
                for x in 0..1000 {
                    mailbox.publish(BitmapFrame::new(1000, 1, DirtyRect::new(x, 0, 1, 1), 3));
                }
            })
        };
        let mut covered = DirtyRect::default();
        while !reader.is_finished() {
            if let Some(frame) = mailbox.take() {
                covered = covered.union(frame.dirty());
            }
        }
        reader.join().unwrap();
        if let Some(frame) = mailbox.take() {
            covered = covered.union(frame.dirty());
        }
        assert_eq!(covered, DirtyRect::full(1000, 1));
    }
}
