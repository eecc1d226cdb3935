//! ### English
//! Per-paint metadata records for the bitmap transport, plus dirty-rectangle math shared by both
//! transports.
//!
//! ### 中文
//! bitmap 传输方式的逐次绘制元数据记录，以及两种传输方式共用的脏矩形运算。

use bytemuck::{Pod, Zeroable};

/// ### English
/// Sub-rectangle of a frame, in pixels.
///
/// ### 中文
/// 帧内的子矩形（像素）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DirtyRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl DirtyRect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub const fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }

    /// ### English
    /// Smallest rectangle covering both. An empty side is ignored.
    ///
    /// ### 中文
    /// 同时覆盖两者的最小矩形。空矩形会被忽略。
    pub fn union(self, other: Self) -> Self {
        if self.is_empty() {
            return other;
        }
        if other.is_empty() {
            return self;
        }
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        Self::new(
            x,
            y,
            self.right().max(other.right()) - x,
            self.bottom().max(other.bottom()) - y,
        )
    }

    /// ### English
    /// Intersects with a `width` x `height` frame.
    ///
    /// ### 中文
    /// 与 `width` x `height` 的帧求交。
    pub fn clamp_to(self, width: u32, height: u32) -> Self {
        let x = self.x.min(width);
        let y = self.y.min(height);
        Self::new(x, y, self.right().min(width) - x, self.bottom().min(height) - y)
    }

    /// ### English
    /// Whether the rectangle lies entirely inside a `width` x `height` frame.
    ///
    /// ### 中文
    /// 矩形是否完全位于 `width` x `height` 的帧内。
    pub fn fits_in(&self, width: u32, height: u32) -> bool {
        self.right() <= width && self.bottom() <= height
    }
}

/// ### English
/// One paint event on the bitmap transport, written into the frame-info ring.
///
/// `width`/`height`/`generation` describe the pixel buffer the paint went into; the consumer
/// discards the record when they no longer match its live buffer.
///
/// ### 中文
/// bitmap 传输上的一次绘制事件，写入帧信息环形缓冲区。
///
/// `width`/`height`/`generation` 描述此次绘制写入的像素缓冲区；
/// 当它们与消费方当前缓冲区不一致时，消费方丢弃该记录。
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct BitmapFrame {
    pub width: u32,
    pub height: u32,
    /// ### English
    /// Byte length of the full pixel buffer (`width * height * 4`).
    ///
    /// ### 中文
    /// 完整像素缓冲区的字节长度（`width * height * 4`）。
    pub length: u32,
    pub dirty_x: u32,
    pub dirty_y: u32,
    pub dirty_width: u32,
    pub dirty_height: u32,
    pub generation: u32,
}

impl BitmapFrame {
    pub fn new(width: u32, height: u32, dirty: DirtyRect, generation: u32) -> Self {
        Self {
            width,
            height,
            length: width.saturating_mul(height).saturating_mul(4),
            dirty_x: dirty.x,
            dirty_y: dirty.y,
            dirty_width: dirty.width,
            dirty_height: dirty.height,
            generation,
        }
    }

    pub fn dirty(&self) -> DirtyRect {
        DirtyRect::new(self.dirty_x, self.dirty_y, self.dirty_width, self.dirty_height)
    }

    /// ### English
    /// Whether two records describe the same buffer geometry (so their dirty rects can merge).
    ///
    /// ### 中文
    /// 两条记录是否描述同一缓冲区几何（从而脏矩形可以合并）。
    pub fn same_geometry(&self, other: &Self) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.generation == other.generation
    }

    /// ### English
    /// Folds a newer record into this one: newer geometry wins, dirty rects union when the
    /// geometry is unchanged.
    ///
    /// ### 中文
    /// 将更新的记录合并进来：几何以较新者为准；几何不变时脏矩形取并集。
    pub fn coalesce(self, newer: Self) -> Self {
        if self.same_geometry(&newer) {
            let dirty = self.dirty().union(newer.dirty());
            Self::new(newer.width, newer.height, dirty, newer.generation)
        } else {
            newer
        }
    }
}
