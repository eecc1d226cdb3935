//! ### English
//! Collaborator interface of the embedded browser engine (render-host side).
//!
//! The engine is opaque: it paints into a [`FrameTransport`], accepts input injection calls and
//! reports cursor changes. [`solid::SolidColorEngine`] is a placeholder implementation that
//! paints solid colours, so the render host runs without a real browser.
//!
//! ### 中文
//! 内嵌浏览器引擎的协作接口（渲染宿主侧）。
//!
//! 引擎是不透明的：它向 [`FrameTransport`] 绘制、接受输入注入调用并报告光标变化。
//! [`solid::SolidColorEngine`] 是一个绘制纯色的占位实现，使渲染宿主无需真实浏览器即可运行。

mod cursor;
pub mod solid;

use std::path::PathBuf;
use std::sync::Arc;

use url::Url;

pub use cursor::EngineCursor;

use crate::protocol::{InputModifiers, RenderProcessArguments};
use crate::transport::{FrameTransport, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("engine initialisation failed: {0}")]
    Init(String),
    #[error("failed to create browser instance: {0}")]
    Instance(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// ### English
/// Global engine settings, taken from the boot arguments.
///
/// ### 中文
/// 引擎全局设置，取自启动参数。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineSettings {
    pub library_dir: Option<PathBuf>,
    pub asset_dir: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
}

impl From<&RenderProcessArguments> for EngineSettings {
    fn from(args: &RenderProcessArguments) -> Self {
        Self {
            library_dir: args.engine_library_dir.clone(),
            asset_dir: args.asset_dir.clone(),
            cache_dir: args.cache_dir.clone(),
        }
    }
}

/// ### English
/// Callback the engine invokes whenever an instance's cursor changes.
///
/// ### 中文
/// 实例光标变化时由引擎调用的回调。
pub type CursorCallback = Arc<dyn Fn(EngineCursor) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineMouseButton {
    Left,
    Right,
    Middle,
}

/// ### English
/// Pointer position plus held modifiers, in view pixels.
///
/// ### 中文
/// 指针位置及按住的修饰键（view 像素坐标）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MousePoint {
    pub x: i32,
    pub y: i32,
    pub modifiers: InputModifiers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKeyKind {
    RawKeyDown,
    KeyUp,
    Char,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineKeyEvent {
    pub kind: EngineKeyKind,
    pub modifiers: InputModifiers,
    pub windows_key_code: i32,
    pub native_key_code: i32,
    pub is_system_key: bool,
}

/// ### English
/// Process-wide engine library.
///
/// ### 中文
/// 进程级的引擎库。
pub trait BrowserEngine: Send + Sync + 'static {
    type Instance: BrowserInstance;

    fn initialize(&self, settings: &EngineSettings) -> Result<(), EngineError>;

    /// ### English
    /// Creates an offscreen browser that paints into `transport`, sized by
    /// [`FrameTransport::view_size`].
    ///
    /// ### 中文
    /// 创建一个离屏浏览器，绘制到 `transport`，尺寸取自 [`FrameTransport::view_size`]。
    fn create(
        &self,
        url: &Url,
        transport: Arc<dyn FrameTransport>,
        on_cursor: CursorCallback,
    ) -> Result<Self::Instance, EngineError>;

    fn shutdown(&self);
}

/// ### English
/// One offscreen browser. Mirrors the engine's host API; translation from protocol messages
/// happens in the render host.
///
/// ### 中文
/// 一个离屏浏览器。对应引擎的宿主 API；从协议消息的转换在渲染宿主中完成。
pub trait BrowserInstance: Send + 'static {
    fn url(&self) -> &Url;

    fn load(&mut self, url: &Url);

    fn reload_ignore_cache(&mut self);

    fn show_dev_tools(&mut self);

    /// ### English
    /// The transport was resized; the engine re-queries the view size and repaints.
    ///
    /// ### 中文
    /// 传输通道尺寸已改变；引擎会重新查询 view 尺寸并重绘。
    fn was_resized(&mut self);

    fn send_mouse_move(&mut self, point: MousePoint, leaving: bool);

    fn send_mouse_click(
        &mut self,
        point: MousePoint,
        button: EngineMouseButton,
        mouse_up: bool,
        click_count: u32,
    );

    fn send_mouse_wheel(&mut self, point: MousePoint, delta_x: i32, delta_y: i32);

    fn send_key_event(&mut self, event: EngineKeyEvent);

    /// ### English
    /// Stops painting and releases the instance's engine resources.
    ///
    /// ### 中文
    /// 停止绘制并释放该实例的引擎资源。
    fn close(&mut self);
}
