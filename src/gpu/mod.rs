//! ### English
//! GPU device abstraction used by the texture transport (producer) and the shared-texture
//! surface (consumer).
//!
//! Textures are BGRA8, 4 bytes per pixel, tightly packed.
//!
//! ### 中文
//! 纹理传输（生产方）与共享纹理 surface（消费方）使用的 GPU 设备抽象。
//!
//! 纹理格式为 BGRA8，每像素 4 字节，紧密排列。

mod shm_device;

use dpi::PhysicalSize;

pub use shm_device::{ShmDevice, ShmTexture};

use crate::protocol::{DirtyRect, SharedTextureHandle};
use crate::shm::ShmError;

pub const BYTES_PER_PIXEL: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("texture size {width}x{height} is invalid")]
    InvalidSize { width: u32, height: u32 },
    #[error("texture is not shareable")]
    NotShareable,
    #[error("pixel buffer of {len} bytes is too small for {rect:?} at stride {stride}")]
    SourceTooSmall {
        len: usize,
        stride: usize,
        rect: DirtyRect,
    },
    #[error("shared texture {token:#x} is invalid")]
    InvalidHandle { token: u64 },
    #[error(transparent)]
    Shm(#[from] ShmError),
}

/// ### English
/// Minimal device surface the transports need.
///
/// A real implementation wraps a D3D11/Vulkan device bound to `adapter_id`; [`ShmDevice`] backs
/// textures with named shared memory so both processes can use them without a GPU.
///
/// ### 中文
/// 传输层所需的最小设备接口。
///
/// 真实实现会封装绑定到 `adapter_id` 的 D3D11/Vulkan 设备；[`ShmDevice`] 则以命名共享内存
/// 承载纹理，两个进程无需 GPU 即可使用。
pub trait GpuDevice: Send + Sync + 'static {
    type Texture: Send + Sync + 'static;

    fn adapter_id(&self) -> Option<u64>;

    /// ### English
    /// Whether textures can be opened by another process on this device.
    ///
    /// ### 中文
    /// 该设备上的纹理能否被其它进程打开。
    fn supports_sharing(&self) -> bool;

    fn create_texture(
        &self,
        size: PhysicalSize<u32>,
        shareable: bool,
    ) -> Result<Self::Texture, GpuError>;

    fn texture_size(&self, texture: &Self::Texture) -> PhysicalSize<u32>;

    /// ### English
    /// Partial update: copies `rect` out of a `stride`-pitched source buffer into the same
    /// rectangle of `texture`.
    ///
    /// ### 中文
    /// 局部更新：从行距为 `stride` 的源缓冲区拷贝 `rect`，写入 `texture` 的同一矩形。
    fn update_region(
        &self,
        texture: &Self::Texture,
        rect: DirtyRect,
        pixels: &[u8],
        stride: usize,
    ) -> Result<(), GpuError>;

    /// ### English
    /// Copies all of `src` into `dst` with its top-left corner at `(x, y)`, clipped to `dst`.
    ///
    /// ### 中文
    /// 将整个 `src` 拷贝到 `dst`，左上角位于 `(x, y)`，超出 `dst` 的部分被裁剪。
    fn copy_texture(
        &self,
        src: &Self::Texture,
        dst: &Self::Texture,
        x: u32,
        y: u32,
    ) -> Result<(), GpuError>;

    /// ### English
    /// Makes all prior writes to `texture` visible to other processes.
    ///
    /// ### 中文
    /// 使此前对 `texture` 的所有写入对其它进程可见。
    fn flush(&self, texture: &Self::Texture) -> Result<(), GpuError>;

    /// ### English
    /// Number of flushes observed on `texture`; lets a consumer detect new content.
    ///
    /// ### 中文
    /// `texture` 上已观察到的 flush 次数；消费方据此检测新内容。
    fn flush_count(&self, texture: &Self::Texture) -> u32;

    fn share(&self, texture: &Self::Texture) -> Result<SharedTextureHandle, GpuError>;

    fn open_shared(&self, handle: SharedTextureHandle) -> Result<Self::Texture, GpuError>;

    /// ### English
    /// Reads `rect` into `out` with a tight `rect.width * 4` stride.
    ///
    /// ### 中文
    /// 以紧密的 `rect.width * 4` 行距将 `rect` 读入 `out`。
    fn read_region(
        &self,
        texture: &Self::Texture,
        rect: DirtyRect,
        out: &mut Vec<u8>,
    ) -> Result<(), GpuError>;
}
