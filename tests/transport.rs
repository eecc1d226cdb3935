use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use dpi::PhysicalSize;
use inlay_render::gpu::{BYTES_PER_PIXEL, GpuDevice, GpuError, ShmDevice, ShmTexture};
use inlay_render::protocol::{DirtyRect, FrameTransportResponse, SharedTextureHandle};
use inlay_render::shm::ResourceNames;
use inlay_render::surface::{BitmapSurface, FrameSink, MemorySink};
use inlay_render::transport::{BitmapTransport, FrameTransport, PaintElement, PaintOutcome, TextureTransport};
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Flushed(u64),
    Dropped(u64),
}

struct TrackedTexture {
    id: u64,
    inner: ShmTexture,
    log: Arc<Mutex<Vec<Event>>>,
}

impl Drop for TrackedTexture {
    fn drop(&mut self) {
        self.log.lock().push(Event::Dropped(self.id));
    }
}

/// Records flushes and releases per texture so tests can check release ordering.
struct TrackingDevice {
    inner: ShmDevice,
    next_id: AtomicU64,
    log: Arc<Mutex<Vec<Event>>>,
}

impl TrackingDevice {
    fn new(dir: &tempfile::TempDir) -> Self {
        Self {
            inner: ShmDevice::new(ResourceNames::new(std::process::id(), dir.path()), None),
            next_id: AtomicU64::new(0),
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn track(&self, inner: ShmTexture) -> TrackedTexture {
        TrackedTexture {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            inner,
            log: self.log.clone(),
        }
    }

    fn events(&self) -> Vec<Event> {
        self.log.lock().clone()
    }
}

impl GpuDevice for TrackingDevice {
    type Texture = TrackedTexture;

    fn adapter_id(&self) -> Option<u64> {
        self.inner.adapter_id()
    }

    fn supports_sharing(&self) -> bool {
        self.inner.supports_sharing()
    }

    fn create_texture(&self, size: PhysicalSize<u32>, shareable: bool) -> Result<TrackedTexture, GpuError> {
        Ok(self.track(self.inner.create_texture(size, shareable)?))
    }

    fn texture_size(&self, texture: &TrackedTexture) -> PhysicalSize<u32> {
        self.inner.texture_size(&texture.inner)
    }

    fn update_region(
        &self,
        texture: &TrackedTexture,
        rect: DirtyRect,
        pixels: &[u8],
        stride: usize,
    ) -> Result<(), GpuError> {
        self.inner.update_region(&texture.inner, rect, pixels, stride)
    }

    fn copy_texture(&self, src: &TrackedTexture, dst: &TrackedTexture, x: u32, y: u32) -> Result<(), GpuError> {
        self.inner.copy_texture(&src.inner, &dst.inner, x, y)
    }

    fn flush(&self, texture: &TrackedTexture) -> Result<(), GpuError> {
        self.inner.flush(&texture.inner)?;
        self.log.lock().push(Event::Flushed(texture.id));
        Ok(())
    }

    fn flush_count(&self, texture: &TrackedTexture) -> u32 {
        self.inner.flush_count(&texture.inner)
    }

    fn share(&self, texture: &TrackedTexture) -> Result<SharedTextureHandle, GpuError> {
        self.inner.share(&texture.inner)
    }

    fn open_shared(&self, handle: SharedTextureHandle) -> Result<TrackedTexture, GpuError> {
        Ok(self.track(self.inner.open_shared(handle)?))
    }

    fn read_region(&self, texture: &TrackedTexture, rect: DirtyRect, out: &mut Vec<u8>) -> Result<(), GpuError> {
        self.inner.read_region(&texture.inner, rect, out)
    }
}

fn frame(size: PhysicalSize<u32>, value: u8) -> Vec<u8> {
    vec![value; size.width as usize * size.height as usize * BYTES_PER_PIXEL]
}

fn paint_full(transport: &dyn FrameTransport, size: PhysicalSize<u32>, value: u8) -> PaintOutcome {
    transport.on_paint(
        PaintElement::View,
        DirtyRect::full(size.width, size.height),
        &frame(size, value),
        size.width,
        size.height,
    )
}

#[test]
fn retired_textures_outlive_resize_races() {
    let dir = tempfile::tempdir().unwrap();
    let device = Arc::new(TrackingDevice::new(&dir));
    let small = PhysicalSize::new(64, 48);
    let large = PhysicalSize::new(96, 72);
    let transport = Arc::new(TextureTransport::new(device.clone(), small).unwrap());

    let stop = Arc::new(AtomicBool::new(false));
    let painter = {
        let transport = transport.clone();
        let stop = stop.clone();
        thread::spawn(move || {
            let mut applied = 0usize;
            let mut value = 0u8;
            while !stop.load(Ordering::Acquire) {
                let size = transport.view_size();
                value = value.wrapping_add(1);
                if paint_full(transport.as_ref(), size, value) == PaintOutcome::Applied {
                    applied += 1;
                }
            }
            applied
        })
    };

    for round in 0..200 {
        let size = if round % 2 == 0 { large } else { small };
        transport.resize(size).unwrap();
        thread::sleep(Duration::from_micros(200));
    }
    stop.store(true, Ordering::Release);
    let applied = painter.join().unwrap();
    assert!(applied > 0);

    let size = transport.view_size();
    assert_eq!(paint_full(transport.as_ref(), size, 7), PaintOutcome::Applied);
    assert!(transport.retired_generations().is_empty());

    let events = device.events();
    for (index, event) in events.iter().enumerate() {
        if let Event::Dropped(id) = *event {
            let newer_flushed = events[..index]
                .iter()
                .any(|earlier| matches!(*earlier, Event::Flushed(newer) if newer > id));
            assert!(newer_flushed, "texture {id} released before any newer generation painted");
        }
    }
    assert!(events.iter().any(|event| matches!(event, Event::Dropped(_))));
}

#[test]
fn texture_response_tracks_generation() {
    let dir = tempfile::tempdir().unwrap();
    let device = Arc::new(TrackingDevice::new(&dir));
    let transport = TextureTransport::new(device, PhysicalSize::new(32, 32)).unwrap();
    let first = transport.response().unwrap();
    assert!(!transport.resize(PhysicalSize::new(32, 32)).unwrap());
    assert_eq!(transport.response().unwrap(), first);

    assert!(transport.resize(PhysicalSize::new(40, 40)).unwrap());
    let second = transport.response().unwrap();
    assert_ne!(second, first);
    assert!(matches!(second, FrameTransportResponse::TextureHandle(_)));
}

fn open_surface(dir: &tempfile::TempDir, transport: &BitmapTransport) -> BitmapSurface {
    BitmapSurface::open(
        dir.path(),
        &transport.bitmap_buffer_name(),
        transport.frame_info_buffer_name(),
    )
    .unwrap()
}

fn poll_until(surface: &mut BitmapSurface, sink: &mut MemorySink, done: impl Fn(&BitmapSurface, &MemorySink) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done(surface, sink) {
        assert!(Instant::now() < deadline, "surface never reached the expected state");
        surface.poll(sink).unwrap();
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn slow_consumer_sees_only_the_latest_frame() {
    let dir = tempfile::tempdir().unwrap();
    let size = PhysicalSize::new(32, 32);
    let transport = BitmapTransport::new(ResourceNames::new(std::process::id(), dir.path()), size).unwrap();
    let mut surface = open_surface(&dir, &transport);
    let mut sink = MemorySink::default();
    assert!(surface.poll(&mut sink).unwrap());
    let after_open = sink.uploads();

    let mut pixels = frame(size, 0);
    for step in 0..500u32 {
        let x = step % size.width;
        let offset = x as usize * BYTES_PER_PIXEL;
        pixels[offset..offset + BYTES_PER_PIXEL].copy_from_slice(&[step as u8, 0, 0, 0xff]);
        let dirty = DirtyRect {
            x,
            y: 0,
            width: 1,
            height: 1,
        };
        assert_eq!(
            transport.on_paint(PaintElement::View, dirty, &pixels, size.width, size.height),
            PaintOutcome::Applied
        );
    }

    // A paint that found the ring full parks its dirty rect until the next paint.
    thread::sleep(Duration::from_millis(50));
    let last = 499u32;
    let dirty = DirtyRect {
        x: last % size.width,
        y: 0,
        width: 1,
        height: 1,
    };
    transport.on_paint(PaintElement::View, dirty, &pixels, size.width, size.height);

    poll_until(&mut surface, &mut sink, |_, sink| {
        sink.pixel(last % size.width, 0) == Some([last as u8, 0, 0, 0xff])
    });
    let uploads = sink.uploads() - after_open;
    assert!(uploads < 500, "expected coalescing, saw {uploads} uploads for 500 frames");

    thread::sleep(Duration::from_millis(50));
    let mut settled = false;
    for _ in 0..10 {
        if !surface.poll(&mut sink).unwrap() {
            settled = true;
            break;
        }
    }
    assert!(settled);
    assert_eq!(surface.stale_frames(), 0);
}

#[test]
fn stale_frames_are_rejected_until_rebind() {
    let dir = tempfile::tempdir().unwrap();
    let small = PhysicalSize::new(16, 16);
    let large = PhysicalSize::new(24, 24);
    let transport = BitmapTransport::new(ResourceNames::new(std::process::id(), dir.path()), small).unwrap();
    let mut surface = open_surface(&dir, &transport);
    let mut sink = MemorySink::default();
    assert!(surface.poll(&mut sink).unwrap());
    assert_eq!(sink.size(), small);

    assert!(transport.resize(large).unwrap());
    assert_eq!(paint_full(&transport, large, 0x42), PaintOutcome::Applied);

    poll_until(&mut surface, &mut sink, |surface, _| surface.stale_frames() > 0);
    assert_eq!(sink.size(), small);

    surface.rebind(&transport.bitmap_buffer_name()).unwrap();
    assert_eq!(surface.size(), large);
    assert!(surface.poll(&mut sink).unwrap());
    assert_eq!(sink.size(), large);
    assert_eq!(sink.pixel(23, 23), Some([0x42; 4]));
    assert!(transport.retired_generations().is_empty());
}

#[test]
fn memory_sink_clips_uploads() {
    let mut sink = MemorySink::default();
    sink.ensure_size(PhysicalSize::new(4, 4)).unwrap();
    let rect = DirtyRect {
        x: 2,
        y: 2,
        width: 4,
        height: 4,
    };
    sink.upload(rect, &[9; 4 * 4 * BYTES_PER_PIXEL]).unwrap();
    assert_eq!(sink.pixel(3, 3), Some([9; 4]));
    assert_eq!(sink.pixel(1, 1), Some([0; 4]));
}
