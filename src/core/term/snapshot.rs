//! Point-in-time copies of a screen buffer
//!
//! A snapshot owns everything a renderer needs to draw one frame, so it can
//! be read without holding the session lock.

use super::state::{CharAttributes, Cursor, Row, ScreenBuffer, TerminalSize};

/// Immutable view of the visible screen
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub size: TerminalSize,
    /// Rows as seen through the window, top to bottom
    pub rows: Vec<Row>,
    pub cursor: Cursor,
    pub window_top: usize,
    /// Attributes that the next written glyph would get
    pub attributes: CharAttributes,
    pub show_cursor: bool,
    pub title: String,
}

impl Snapshot {
    pub fn capture(buffer: &ScreenBuffer, title: &str) -> Self {
        Self {
            size: buffer.size(),
            rows: buffer.visible_rows(),
            cursor: buffer.cursor(),
            window_top: buffer.window_top(),
            attributes: buffer.current_attributes(),
            show_cursor: buffer.show_cursor,
            title: title.to_string(),
        }
    }

    /// Text of one visible row, trailing blanks trimmed
    pub fn row_text(&self, y: usize) -> String {
        self.rows.get(y).map(Row::text).unwrap_or_default()
    }

    /// All visible rows joined with newlines, trailing empty rows dropped
    pub fn text(&self) -> String {
        let mut lines: Vec<String> = self.rows.iter().map(Row::text).collect();
        while lines.last().is_some_and(|line| line.is_empty()) {
            lines.pop();
        }
        lines.join("\n")
    }
}
