//! ### English
//! Placeholder engine that paints one solid colour per URL.
//!
//! Every instance paints a full frame on creation, navigation and resize, marks clicks with a
//! small inverted square (a partial dirty-rect update) and reports [`EngineCursor::Hand`] while
//! the pointer is inside the view.
//!
//! ### 中文
//! 按 URL 绘制单一纯色的占位引擎。
//!
//! 每个实例在创建、导航和调整大小时绘制整帧，用一个小的反色方块标记点击（局部脏矩形更新），
//! 并在指针位于 view 内时报告 [`EngineCursor::Hand`]。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use url::Url;

use super::{
    BrowserEngine, BrowserInstance, CursorCallback, EngineCursor, EngineError, EngineKeyEvent,
    EngineMouseButton, EngineSettings, MousePoint,
};
use crate::gpu::BYTES_PER_PIXEL;
use crate::protocol::DirtyRect;
use crate::transport::{FrameTransport, PaintElement, PaintOutcome};

const CLICK_MARK: u32 = 8;

#[derive(Debug, Default)]
pub struct SolidColorEngine {
    initialized: AtomicBool,
    live: Arc<AtomicUsize>,
}

impl SolidColorEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_instances(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }
}

impl BrowserEngine for SolidColorEngine {
    type Instance = SolidColorInstance;

    fn initialize(&self, settings: &EngineSettings) -> Result<(), EngineError> {
        if self.initialized.swap(true, Ordering::AcqRel) {
            return Err(EngineError::Init("engine already initialized".into()));
        }
        tracing::info!(
            "Solid colour engine initialized (library dir: {:?}, cache dir: {:?})",
            settings.library_dir,
            settings.cache_dir
        );
        Ok(())
    }

    fn create(
        &self,
        url: &Url,
        transport: Arc<dyn FrameTransport>,
        on_cursor: CursorCallback,
    ) -> Result<Self::Instance, EngineError> {
        if !self.initialized.load(Ordering::Acquire) {
            return Err(EngineError::Instance("engine is not initialized".into()));
        }
        self.live.fetch_add(1, Ordering::AcqRel);
        let mut instance = SolidColorInstance {
            url: url.clone(),
            color: color_for(url),
            transport,
            on_cursor,
            cursor: None,
            closed: false,
            live: self.live.clone(),
            reloads: 0,
            dev_tools: false,
        };
        instance.paint_full();
        Ok(instance)
    }

    fn shutdown(&self) {
        if self.initialized.swap(false, Ordering::AcqRel) {
            tracing::info!("Solid colour engine shut down");
        }
    }
}

pub struct SolidColorInstance {
    url: Url,
    color: [u8; 4],
    transport: Arc<dyn FrameTransport>,
    on_cursor: CursorCallback,
    cursor: Option<EngineCursor>,
    closed: bool,
    live: Arc<AtomicUsize>,
    reloads: u32,
    dev_tools: bool,
}

impl SolidColorInstance {
    /// ### English
    /// BGRA colour currently painted.
    ///
    /// ### 中文
    /// 当前绘制的 BGRA 颜色。
    pub fn color(&self) -> [u8; 4] {
        self.color
    }

    pub fn reloads(&self) -> u32 {
        self.reloads
    }

    pub fn dev_tools_shown(&self) -> bool {
        self.dev_tools
    }

    fn paint_full(&mut self) -> PaintOutcome {
        if self.closed {
            return PaintOutcome::Dropped;
        }
        let size = self.transport.view_size();
        let pixels = (size.width as usize) * (size.height as usize);
        let buffer = self.color.repeat(pixels);
        self.transport.on_paint(
            PaintElement::View,
            DirtyRect::full(size.width, size.height),
            &buffer,
            size.width,
            size.height,
        )
    }

    fn paint_click(&mut self, point: MousePoint) {
        if self.closed {
            return;
        }
        let size = self.transport.view_size();
        let (Ok(x), Ok(y)) = (u32::try_from(point.x), u32::try_from(point.y)) else {
            return;
        };
        let mark = DirtyRect::new(x, y, CLICK_MARK, CLICK_MARK).clamp_to(size.width, size.height);
        if mark.is_empty() {
            return;
        }

        let inverted = [!self.color[0], !self.color[1], !self.color[2], self.color[3]];
        let mut buffer = self.color.repeat((size.width as usize) * (size.height as usize));
        let stride = size.width as usize * BYTES_PER_PIXEL;
        for row in mark.y..mark.bottom() {
            let start = row as usize * stride + mark.x as usize * BYTES_PER_PIXEL;
            let end = start + mark.width as usize * BYTES_PER_PIXEL;
            for px in buffer[start..end].chunks_exact_mut(BYTES_PER_PIXEL) {
                px.copy_from_slice(&inverted);
            }
        }
        self.transport
            .on_paint(PaintElement::View, mark, &buffer, size.width, size.height);
    }

    fn report_cursor(&mut self, cursor: EngineCursor) {
        if self.cursor != Some(cursor) {
            self.cursor = Some(cursor);
            (self.on_cursor)(cursor);
        }
    }
}

impl BrowserInstance for SolidColorInstance {
    fn url(&self) -> &Url {
        &self.url
    }

    fn load(&mut self, url: &Url) {
        self.url = url.clone();
        self.color = color_for(url);
        self.paint_full();
    }

    fn reload_ignore_cache(&mut self) {
        self.reloads += 1;
        self.paint_full();
    }

    fn show_dev_tools(&mut self) {
        self.dev_tools = true;
        tracing::info!("Dev tools requested for {}", self.url);
    }

    fn was_resized(&mut self) {
        self.paint_full();
    }

    fn send_mouse_move(&mut self, point: MousePoint, leaving: bool) {
        if leaving {
            self.cursor = None;
            return;
        }
        let size = self.transport.view_size();
        let inside = point.x >= 0
            && point.y >= 0
            && (point.x as u32) < size.width
            && (point.y as u32) < size.height;
        self.report_cursor(if inside {
            EngineCursor::Hand
        } else {
            EngineCursor::Pointer
        });
    }

    fn send_mouse_click(
        &mut self,
        point: MousePoint,
        button: EngineMouseButton,
        mouse_up: bool,
        _click_count: u32,
    ) {
        if button == EngineMouseButton::Left && !mouse_up {
            self.paint_click(point);
        }
    }

    fn send_mouse_wheel(&mut self, _point: MousePoint, _delta_x: i32, _delta_y: i32) {}

    fn send_key_event(&mut self, event: EngineKeyEvent) {
        tracing::trace!("Key event for {}: {event:?}", self.url);
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.live.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl Drop for SolidColorInstance {
    fn drop(&mut self) {
        self.close();
    }
}

fn color_for(url: &Url) -> [u8; 4] {
    // FNV-1a
    let mut hash: u32 = 0x811c_9dc5;
    for byte in url.as_str().bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    let [b, g, r, _] = hash.to_le_bytes();
    [b, g, r, 0xff]
}
