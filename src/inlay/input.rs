//! ### English
//! Translation of host pointer samples and window messages into protocol input events.
//!
//! ### 中文
//! 将宿主的指针采样与窗口消息转换为协议输入事件。

use crate::protocol::{InputModifiers, KeyEvent, KeyEventType, MouseButtons, MouseEvent};

pub const VK_SHIFT: u64 = 0x10;
pub const VK_CONTROL: u64 = 0x11;

/// ### English
/// Window messages an inlay reacts to. Values follow the Win32 message ids.
///
/// ### 中文
/// inlay 会响应的窗口消息。取值与 Win32 消息 id 一致。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowMessage {
    KeyDown,
    KeyUp,
    Char,
    SysKeyDown,
    SysKeyUp,
    SysChar,
    LButtonDown,
    Other(u32),
}

impl WindowMessage {
    pub const fn from_raw(msg: u32) -> Self {
        match msg {
            0x0100 => Self::KeyDown,
            0x0101 => Self::KeyUp,
            0x0102 => Self::Char,
            0x0104 => Self::SysKeyDown,
            0x0105 => Self::SysKeyUp,
            0x0106 => Self::SysChar,
            0x0201 => Self::LButtonDown,
            other => Self::Other(other),
        }
    }

    pub fn key_event_type(self) -> Option<KeyEventType> {
        match self {
            Self::KeyDown | Self::SysKeyDown => Some(KeyEventType::KeyDown),
            Self::KeyUp | Self::SysKeyUp => Some(KeyEventType::KeyUp),
            Self::Char | Self::SysChar => Some(KeyEventType::Character),
            Self::LButtonDown | Self::Other(_) => None,
        }
    }

    /// ### English
    /// `Sys*` messages, which are sent while Alt is held.
    ///
    /// ### 中文
    /// `Sys*` 消息，在按住 Alt 时发送。
    pub fn is_system(self) -> bool {
        matches!(self, Self::SysKeyDown | Self::SysKeyUp | Self::SysChar)
    }
}

/// ### English
/// One frame of pointer state sampled by the host UI, in inlay-local pixels.
///
/// Button sets describe what changed during this frame.
///
/// ### 中文
/// 宿主 UI 每帧采样的指针状态（inlay 局部像素坐标）。
///
/// 按键集合描述本帧内发生的变化。
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MouseInput {
    pub x: f32,
    pub y: f32,
    pub hovered: bool,
    pub moved: bool,
    pub clicked: MouseButtons,
    pub double_clicked: MouseButtons,
    pub released: MouseButtons,
    pub wheel_x: f32,
    pub wheel_y: f32,
    pub modifiers: InputModifiers,
}

#[derive(Debug)]
pub(crate) struct InputState {
    mouse_in_window: bool,
    focused: bool,
    capture_cursor: bool,
    modifiers: InputModifiers,
}

impl Default for InputState {
    fn default() -> Self {
        Self {
            mouse_in_window: false,
            focused: false,
            capture_cursor: true,
            modifiers: InputModifiers::empty(),
        }
    }
}

impl InputState {
    pub(crate) fn focused(&self) -> bool {
        self.focused
    }

    pub(crate) fn modifiers(&self) -> InputModifiers {
        self.modifiers
    }

    pub(crate) fn capture_cursor(&self) -> bool {
        self.capture_cursor
    }

    pub(crate) fn set_capture_cursor(&mut self, capture: bool) {
        self.capture_cursor = capture;
    }

    /// ### English
    /// Event to send for this frame, if any. Leaving the inlay yields exactly one `leaving`
    /// event; frames with no change yield nothing.
    ///
    /// ### 中文
    /// 本帧需要发送的事件（如有）。离开 inlay 时恰好产生一个 `leaving` 事件；
    /// 无变化的帧不产生事件。
    pub(crate) fn mouse(&mut self, input: &MouseInput) -> Option<MouseEvent> {
        if !input.hovered {
            if !self.mouse_in_window {
                return None;
            }
            self.mouse_in_window = false;
            return Some(MouseEvent {
                x: input.x,
                y: input.y,
                leaving: true,
                ..MouseEvent::default()
            });
        }
        self.mouse_in_window = true;

        let event = MouseEvent {
            x: input.x,
            y: input.y,
            leaving: false,
            down: input.clicked,
            double: input.double_clicked,
            up: input.released,
            wheel_x: input.wheel_x,
            wheel_y: input.wheel_y,
            modifiers: input.modifiers,
        };
        if !input.moved && event.is_motion_only() {
            return None;
        }
        Some(event)
    }

    /// ### English
    /// Key event for a window message, if the inlay is focused and the message is a key
    /// message. A primary-button-down anywhere updates focus first.
    ///
    /// ### 中文
    /// 若 inlay 处于焦点且消息为按键消息，则返回对应的按键事件。
    /// 任何位置的主键按下都会先更新焦点。
    pub(crate) fn window_message(
        &mut self,
        msg: WindowMessage,
        wparam: u64,
        lparam: i64,
    ) -> Option<KeyEvent> {
        if msg == WindowMessage::LButtonDown {
            self.focused = self.mouse_in_window && self.capture_cursor;
        }
        if !self.focused {
            return None;
        }

        let kind = msg.key_event_type()?;
        let system_key = msg.is_system();

        let mut adjust = InputModifiers::empty();
        if wparam == VK_SHIFT {
            adjust |= InputModifiers::SHIFT;
        }
        if wparam == VK_CONTROL {
            adjust |= InputModifiers::CONTROL;
        }
        if system_key {
            adjust |= InputModifiers::ALT;
        }
        match kind {
            KeyEventType::KeyDown => self.modifiers |= adjust,
            KeyEventType::KeyUp => self.modifiers &= !adjust,
            KeyEventType::Character => {}
        }

        Some(KeyEvent {
            kind,
            system_key,
            user_key_code: wparam as i32,
            native_key_code: lparam as i32,
            modifiers: self.modifiers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hovered() -> MouseInput {
        MouseInput {
            hovered: true,
            moved: true,
            ..MouseInput::default()
        }
    }

    #[test]
    fn leaving_is_sent_once() {
        let mut state = InputState::default();
        assert!(state.mouse(&hovered()).is_some());

        let outside = MouseInput::default();
        let leaving = state.mouse(&outside).unwrap();
        assert!(leaving.leaving);
        assert_eq!(state.mouse(&outside), None);
    }

    #[test]
    fn idle_frames_are_skipped() {
        let mut state = InputState::default();
        let idle = MouseInput {
            hovered: true,
            ..MouseInput::default()
        };
        assert_eq!(state.mouse(&idle), None);

        let scroll = MouseInput {
            wheel_y: 1.0,
            ..idle
        };
        assert_eq!(state.mouse(&scroll).map(|e| e.wheel_y), Some(1.0));
    }

    #[test]
    fn focus_follows_click_inside_capturing_inlay() {
        let mut state = InputState::default();
        let key = WindowMessage::KeyDown;
        assert_eq!(state.window_message(key, 65, 0), None);

        state.mouse(&hovered());
        assert_eq!(state.window_message(WindowMessage::LButtonDown, 0, 0), None);
        assert!(state.focused());
        assert!(state.window_message(key, 65, 0).is_some());

        state.set_capture_cursor(false);
        state.window_message(WindowMessage::LButtonDown, 0, 0);
        assert!(!state.focused());
        assert_eq!(state.window_message(key, 65, 0), None);
    }

    #[test]
    fn modifiers_track_shift_control_and_sys_messages() {
        let mut state = InputState::default();
        state.mouse(&hovered());
        state.window_message(WindowMessage::LButtonDown, 0, 0);

        let event = state.window_message(WindowMessage::KeyDown, VK_SHIFT, 0).unwrap();
        assert_eq!(event.modifiers, InputModifiers::SHIFT);

        let event = state.window_message(WindowMessage::SysKeyDown, 0x41, 7).unwrap();
        assert!(event.system_key);
        assert_eq!(event.native_key_code, 7);
        assert_eq!(event.modifiers, InputModifiers::SHIFT | InputModifiers::ALT);

        let event = state.window_message(WindowMessage::KeyUp, VK_SHIFT, 0).unwrap();
        assert_eq!(event.modifiers, InputModifiers::ALT);

        let event = state.window_message(WindowMessage::SysChar, 0x61, 0).unwrap();
        assert_eq!(event.kind, KeyEventType::Character);
        assert_eq!(event.modifiers, InputModifiers::ALT);

        assert_eq!(state.window_message(WindowMessage::Other(0x0200), 0, 0), None);
    }
}
