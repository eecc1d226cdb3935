use crate::protocol::Cursor;

/// ### English
/// Cursor types as the engine reports them.
///
/// Note the engine's naming: its `Pointer` is the default arrow and its `Hand` is what CSS
/// calls `pointer`.
///
/// ### 中文
/// 引擎报告的光标类型。
///
/// 注意引擎的命名：其 `Pointer` 是默认箭头，而 `Hand` 才是 CSS 中的 `pointer`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineCursor {
    Pointer,
    Cross,
    Hand,
    IBeam,
    Wait,
    Help,
    EastResize,
    NorthResize,
    NortheastResize,
    NorthwestResize,
    SouthResize,
    SoutheastResize,
    SouthwestResize,
    WestResize,
    NorthSouthResize,
    EastWestResize,
    NortheastSouthwestResize,
    NorthwestSoutheastResize,
    ColumnResize,
    RowResize,
    MiddlePanning,
    EastPanning,
    NorthPanning,
    NortheastPanning,
    NorthwestPanning,
    SouthPanning,
    SoutheastPanning,
    SouthwestPanning,
    WestPanning,
    Move,
    VerticalText,
    Cell,
    ContextMenu,
    Alias,
    Progress,
    NoDrop,
    Copy,
    None,
    NotAllowed,
    ZoomIn,
    ZoomOut,
    Grab,
    Grabbing,
    Custom,
    /// ### English
    /// Pointer is over a fully transparent part of the page.
    ///
    /// ### 中文
    /// 指针位于页面完全透明的区域。
    Transparent,
}

impl From<EngineCursor> for Cursor {
    fn from(cursor: EngineCursor) -> Self {
        use EngineCursor as E;
        match cursor {
            E::Pointer => Cursor::Default,
            E::Cross => Cursor::Crosshair,
            E::Hand => Cursor::Pointer,
            E::IBeam => Cursor::Text,
            E::Wait => Cursor::Wait,
            E::Help => Cursor::Help,
            E::EastResize => Cursor::EResize,
            E::NorthResize => Cursor::NResize,
            E::NortheastResize => Cursor::NEResize,
            E::NorthwestResize => Cursor::NWResize,
            E::SouthResize => Cursor::SResize,
            E::SoutheastResize => Cursor::SEResize,
            E::SouthwestResize => Cursor::SWResize,
            E::WestResize => Cursor::WResize,
            E::NorthSouthResize => Cursor::NSResize,
            E::EastWestResize => Cursor::EWResize,
            E::NortheastSouthwestResize => Cursor::NESWResize,
            E::NorthwestSoutheastResize => Cursor::NWSEResize,
            E::ColumnResize => Cursor::ColResize,
            E::RowResize => Cursor::RowResize,
            E::MiddlePanning
            | E::EastPanning
            | E::NorthPanning
            | E::NortheastPanning
            | E::NorthwestPanning
            | E::SouthPanning
            | E::SoutheastPanning
            | E::SouthwestPanning
            | E::WestPanning => Cursor::AllScroll,
            E::Move => Cursor::Move,
            E::VerticalText => Cursor::VerticalText,
            E::Cell => Cursor::Cell,
            E::ContextMenu => Cursor::ContextMenu,
            E::Alias => Cursor::Alias,
            E::Progress => Cursor::Progress,
            E::NoDrop => Cursor::NoDrop,
            E::Copy => Cursor::Copy,
            E::None => Cursor::None,
            E::NotAllowed => Cursor::NotAllowed,
            E::ZoomIn => Cursor::ZoomIn,
            E::ZoomOut => Cursor::ZoomOut,
            E::Grab => Cursor::Grab,
            E::Grabbing => Cursor::Grabbing,
            E::Custom => Cursor::Default,
            E::Transparent => Cursor::BrowserHostNoCapture,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_naming_is_translated() {
        assert_eq!(Cursor::from(EngineCursor::Hand), Cursor::Pointer);
        assert_eq!(Cursor::from(EngineCursor::Pointer), Cursor::Default);
        assert_eq!(Cursor::from(EngineCursor::SouthwestPanning), Cursor::AllScroll);
        assert_eq!(Cursor::from(EngineCursor::Custom), Cursor::Default);
        assert!(!Cursor::from(EngineCursor::Transparent).captures());
    }
}
