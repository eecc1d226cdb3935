//! ### English
//! `glow`-backed [`FrameSink`]: uploads dirty rectangles into one GL texture.
//!
//! ### 中文
//! 基于 `glow` 的 [`FrameSink`]：将脏矩形上传到一张 GL 纹理。

use std::sync::Arc;

use dpi::PhysicalSize;
use glow::HasContext as _;

use super::{FrameSink, SurfaceError};
use crate::protocol::DirtyRect;

/// ### English
/// GL texture the host samples when drawing an overlay. Must be used on the thread that owns
/// the GL context.
///
/// ### 中文
/// 宿主绘制 overlay 时采样的 GL 纹理。必须在持有 GL 上下文的线程上使用。
pub struct GlFrameSink {
    gl: Arc<glow::Context>,
    texture: glow::Texture,
    size: PhysicalSize<u32>,
}

impl GlFrameSink {
    /// ### English
    /// Creates an empty texture; storage is allocated on the first [`FrameSink::ensure_size`].
    ///
    /// ### 中文
    /// 创建一张空纹理；存储在首次 [`FrameSink::ensure_size`] 时分配。
    pub fn new(gl: Arc<glow::Context>) -> Result<Self, SurfaceError> {
        let texture = unsafe { gl.create_texture() }.map_err(SurfaceError::Sink)?;
        unsafe {
            gl.bind_texture(glow::TEXTURE_2D, Some(texture));
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, glow::LINEAR as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, glow::LINEAR as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_S, glow::CLAMP_TO_EDGE as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_T, glow::CLAMP_TO_EDGE as i32);
            gl.bind_texture(glow::TEXTURE_2D, None);
        }
        Ok(Self {
            gl,
            texture,
            size: PhysicalSize::new(0, 0),
        })
    }

    pub fn texture(&self) -> glow::Texture {
        self.texture
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        self.size
    }
}

impl FrameSink for GlFrameSink {
    fn ensure_size(&mut self, size: PhysicalSize<u32>) -> Result<(), SurfaceError> {
        if self.size == size {
            return Ok(());
        }
        unsafe {
            self.gl.bind_texture(glow::TEXTURE_2D, Some(self.texture));
            self.gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                glow::RGBA8 as i32,
                size.width as i32,
                size.height as i32,
                0,
                glow::BGRA,
                glow::UNSIGNED_BYTE,
                glow::PixelUnpackData::Slice(None),
            );
            self.gl.bind_texture(glow::TEXTURE_2D, None);
        }
        self.size = size;
        Ok(())
    }

    fn upload(&mut self, rect: DirtyRect, pixels: &[u8]) -> Result<(), SurfaceError> {
        if rect.is_empty() {
            return Ok(());
        }
        if !rect.fits_in(self.size.width, self.size.height) {
            return Err(SurfaceError::Sink(format!(
                "upload {rect:?} exceeds texture {}x{}",
                self.size.width, self.size.height
            )));
        }
        unsafe {
            self.gl.bind_texture(glow::TEXTURE_2D, Some(self.texture));
            self.gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 4);
            self.gl.tex_sub_image_2d(
                glow::TEXTURE_2D,
                0,
                rect.x as i32,
                rect.y as i32,
                rect.width as i32,
                rect.height as i32,
                glow::BGRA,
                glow::UNSIGNED_BYTE,
                glow::PixelUnpackData::Slice(Some(pixels)),
            );
            self.gl.bind_texture(glow::TEXTURE_2D, None);
        }
        Ok(())
    }
}

impl Drop for GlFrameSink {
    fn drop(&mut self) {
        unsafe { self.gl.delete_texture(self.texture) };
    }
}
