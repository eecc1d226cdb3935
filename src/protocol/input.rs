//! ### English
//! Input events forwarded from the host window to one overlay's engine instance.
//!
//! ### 中文
//! 从宿主窗口转发到某个 overlay 引擎实例的输入事件。

use serde::{Deserialize, Serialize};

bitflags::bitflags! {
    /// ### English
    /// Keyboard modifiers held during an event.
    ///
    /// ### 中文
    /// 事件发生时按下的修饰键。
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct InputModifiers: u32 {
        const SHIFT = 1 << 0;
        const CONTROL = 1 << 1;
        const ALT = 1 << 2;
    }
}

bitflags::bitflags! {
    /// ### English
    /// Mouse buttons. In [`MouseEvent`] these describe *changes* since the previous event.
    ///
    /// ### 中文
    /// 鼠标按键。在 [`MouseEvent`] 中表示相对上一事件的*变化*。
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct MouseButtons: u32 {
        const PRIMARY = 1 << 0;
        const SECONDARY = 1 << 1;
        const TERTIARY = 1 << 2;
        const FOURTH = 1 << 3;
        const FIFTH = 1 << 4;
    }
}

/// ### English
/// Mouse state for one overlay, in overlay-local pixels.
///
/// ### 中文
/// 某个 overlay 的鼠标状态（overlay 局部像素坐标）。
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MouseEvent {
    pub x: f32,
    pub y: f32,
    /// ### English
    /// The pointer left the overlay; this is the last event until it re-enters.
    ///
    /// ### 中文
    /// 指针离开了 overlay；在重新进入之前这是最后一个事件。
    pub leaving: bool,
    pub down: MouseButtons,
    pub double: MouseButtons,
    pub up: MouseButtons,
    pub wheel_x: f32,
    pub wheel_y: f32,
    pub modifiers: InputModifiers,
}

impl MouseEvent {
    /// ### English
    /// Whether the event changes nothing beyond the pointer position.
    ///
    /// ### 中文
    /// 事件除指针位置外是否没有任何变化。
    pub fn is_motion_only(&self) -> bool {
        !self.leaving
            && self.down.is_empty()
            && self.double.is_empty()
            && self.up.is_empty()
            && self.wheel_x == 0.0
            && self.wheel_y == 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyEventType {
    KeyDown,
    KeyUp,
    Character,
}

/// ### English
/// One keyboard event in the host window's native terms.
///
/// ### 中文
/// 以宿主窗口原生语义表示的一个键盘事件。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEvent {
    pub kind: KeyEventType,
    /// ### English
    /// Originated from a system-key message (Alt held, or F10).
    ///
    /// ### 中文
    /// 来自系统按键消息（按住 Alt，或 F10）。
    pub system_key: bool,
    /// ### English
    /// Virtual key code, or the character code for [`KeyEventType::Character`].
    ///
    /// ### 中文
    /// 虚拟键码；对 [`KeyEventType::Character`] 则为字符码。
    pub user_key_code: i32,
    pub native_key_code: i32,
    pub modifiers: InputModifiers,
}
