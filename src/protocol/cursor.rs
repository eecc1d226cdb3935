use serde::{Deserialize, Serialize};

/// ### English
/// Cursor shapes an overlay can request from the host.
///
/// [`Cursor::BrowserHostNoCapture`] is special: the pointer is over a fully transparent part of
/// the page and the host should let input fall through to whatever is underneath.
///
/// ### 中文
/// overlay 可以向宿主请求的光标形状。
///
/// [`Cursor::BrowserHostNoCapture`] 是特殊值：指针位于页面完全透明的区域，
/// 宿主应让输入穿透到下层。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Cursor {
    #[default]
    Default,
    None,
    ContextMenu,
    Help,
    Pointer,
    Progress,
    Wait,
    Cell,
    Crosshair,
    Text,
    VerticalText,
    Alias,
    Copy,
    Move,
    NoDrop,
    NotAllowed,
    Grab,
    Grabbing,
    AllScroll,
    ColResize,
    RowResize,
    NResize,
    EResize,
    SResize,
    WResize,
    NEResize,
    NWResize,
    SEResize,
    SWResize,
    EWResize,
    NSResize,
    NESWResize,
    NWSEResize,
    ZoomIn,
    ZoomOut,
    BrowserHostNoCapture,
}

impl Cursor {
    /// ### English
    /// Whether the host should capture mouse input while this cursor is shown.
    ///
    /// ### 中文
    /// 显示该光标时宿主是否应捕获鼠标输入。
    pub fn captures(self) -> bool {
        self != Cursor::BrowserHostNoCapture
    }
}
