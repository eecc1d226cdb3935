//! ### English
//! `inlay_render` crate root.
//! Out-of-process web overlays: a supervised render-host process paints into shared textures
//! or shared pixel buffers, and the host composites them.
//!
//! ### 中文
//! `inlay_render` 的 crate 根。
//! 进程外网页 overlay：受监管的渲染宿主进程绘制到共享纹理或共享像素缓冲区，
//! 由宿主进行合成。

mod lockfree;

pub mod config;
pub mod engine;
pub mod gpu;
pub mod host;
pub mod inlay;
pub mod ipc;
pub mod logging;
pub mod protocol;
pub mod render_host;
pub mod shm;
pub mod supervisor;
pub mod surface;
pub mod transport;

pub use config::{HostConfig, SupervisorConfig};
pub use host::{InlayHost, InlayId};
pub use protocol::{FrameTransportMode, RenderGuid, RenderProcessArguments};
pub use supervisor::{RenderProcess, RenderProcessState, SupervisorError};
