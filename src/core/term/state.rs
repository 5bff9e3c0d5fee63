//! Screen buffer model
//!
//! This module defines the cell grid, cursor, attributes and scroll-back
//! store that decoded terminal codes are applied to. Every operation leaves
//! the cursor inside the grid; out-of-range requests are clamped.

use std::collections::VecDeque;
use std::fmt;

use bitflags::bitflags;
use unicode_width::UnicodeWidthChar;

use super::code::Sgr;

/// Default number of rows kept in the scroll-back store
pub const DEFAULT_SCROLLBACK_LIMIT: usize = 10_000;

const TAB_WIDTH: u16 = 8;

/// Terminal dimensions in character cells
///
/// Both dimensions are always at least 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TerminalSize {
    columns: u16,
    rows: u16,
}

impl TerminalSize {
    /// Create a size, clamping zero dimensions to 1
    pub fn new(columns: u16, rows: u16) -> Self {
        Self {
            columns: columns.max(1),
            rows: rows.max(1),
        }
    }

    pub fn columns(&self) -> u16 {
        self.columns
    }

    pub fn rows(&self) -> u16 {
        self.rows
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self::new(80, 24)
    }
}

impl fmt::Display for TerminalSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.columns, self.rows)
    }
}

/// Cursor position (0-indexed)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    pub x: u16,
    pub y: u16,
}

/// Saved cursor state (DECSC)
#[derive(Debug, Clone, Copy)]
struct SavedCursor {
    cursor: Cursor,
    attrs: CharAttributes,
}

/// Screen buffer with scroll-back
pub struct ScreenBuffer {
    size: TerminalSize,
    rows: Vec<Row>,
    scrollback: VecDeque<Row>,
    scrollback_limit: usize,
    /// Lines the view is scrolled back into history (0 = live view)
    window_top: usize,
    cursor: Cursor,
    saved_cursor: Option<SavedCursor>,
    current_attrs: CharAttributes,
    pub show_cursor: bool,
    pub auto_wrap: bool,
    /// Scroll region (top, bottom) - 0-indexed, inclusive
    scroll_region: (u16, u16),
}

impl ScreenBuffer {
    pub fn new(size: TerminalSize) -> Self {
        Self::with_scrollback_limit(size, DEFAULT_SCROLLBACK_LIMIT)
    }

    pub fn with_scrollback_limit(size: TerminalSize, scrollback_limit: usize) -> Self {
        Self {
            size,
            rows: (0..size.rows).map(|_| Row::new(size.columns)).collect(),
            scrollback: VecDeque::new(),
            scrollback_limit,
            window_top: 0,
            cursor: Cursor::default(),
            saved_cursor: None,
            current_attrs: CharAttributes::default(),
            show_cursor: true,
            auto_wrap: true,
            scroll_region: (0, size.rows - 1),
        }
    }

    pub fn size(&self) -> TerminalSize {
        self.size
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn cursor_x(&self) -> u16 {
        self.cursor.x
    }

    pub fn cursor_y(&self) -> u16 {
        self.cursor.y
    }

    pub fn current_attributes(&self) -> CharAttributes {
        self.current_attrs
    }

    pub fn window_top(&self) -> usize {
        self.window_top
    }

    pub fn scroll_region(&self) -> (u16, u16) {
        self.scroll_region
    }

    fn last_col(&self) -> u16 {
        self.size.columns - 1
    }

    fn last_row(&self) -> u16 {
        self.size.rows - 1
    }

    // ── Writing ────────────────────────────────────────────────────────

    /// Write text at the cursor with the current attributes
    pub fn type_text(&mut self, text: &str) {
        for ch in text.chars() {
            self.put_char(ch);
        }
    }

    /// Put a character at the current cursor position
    pub fn put_char(&mut self, ch: char) {
        if ch.is_control() {
            return;
        }
        let width = match ch.width() {
            Some(w) => w as u16,
            None => return,
        };
        if width == 0 {
            self.append_to_previous_cell(ch);
            return;
        }
        let cols = self.size.columns;
        if width > cols {
            return;
        }

        // Wide glyph that does not fit on the rest of the row
        if self.cursor.x + width > cols {
            if self.auto_wrap {
                self.wrap_line();
            } else {
                self.cursor.x = cols - width;
            }
        }

        let row = self.cursor.y as usize;
        let col = self.cursor.x as usize;
        self.handle_wide_char_overwrite(row, col, width as usize);

        let attrs = self.current_attrs;
        let cells = &mut self.rows[row].cells;
        cells[col] = Cell::new(ch, width as u8, attrs);
        if width == 2 {
            cells[col + 1] = Cell::continuation(attrs);
        }

        let next = self.cursor.x + width;
        if next < cols {
            self.cursor.x = next;
        } else if self.auto_wrap {
            self.wrap_line();
        } else {
            self.cursor.x = cols - 1;
        }
    }

    fn wrap_line(&mut self) {
        let row = self.cursor.y as usize;
        self.rows[row].wrapped = true;
        self.cursor.x = 0;
        self.line_feed();
    }

    fn append_to_previous_cell(&mut self, ch: char) {
        let (row, col) = (self.cursor.y as usize, self.cursor.x as usize);
        let target = if col > 0 {
            Some((row, col - 1))
        } else if row > 0 && self.rows[row - 1].wrapped {
            Some((row - 1, self.size.columns as usize - 1))
        } else {
            None
        };

        if let Some((row, mut col)) = target {
            let cells = &mut self.rows[row].cells;
            if cells[col].is_continuation() && col > 0 {
                col -= 1;
            }
            if !cells[col].glyph.is_empty() {
                cells[col].glyph.push(ch);
            }
        }
    }

    fn handle_wide_char_overwrite(&mut self, row: usize, col: usize, width: usize) {
        let cells = &mut self.rows[row].cells;

        // Overwriting the right half of a wide char
        if col > 0 && cells[col].is_continuation() {
            cells[col - 1] = Cell::default();
        }

        // Overwriting the left half of a wide char
        let end = col + width - 1;
        if cells[end].width == 2 && end + 1 < cells.len() {
            cells[end + 1] = Cell::default();
        }
    }

    /// Fold SGR changes onto the current attributes
    pub fn set_attributes(&mut self, changes: &[Sgr]) {
        for change in changes {
            self.current_attrs.apply(change);
        }
    }

    // ── Cursor movement ────────────────────────────────────────────────

    /// Carriage return - move cursor to column 0
    pub fn carriage_return(&mut self) {
        self.cursor.x = 0;
    }

    /// Line feed - move cursor down, scroll at the bottom of the scroll region
    pub fn line_feed(&mut self) {
        if self.cursor.y == self.scroll_region.1 {
            self.shift_up();
        } else if self.cursor.y < self.last_row() {
            self.cursor.y += 1;
        }
    }

    /// Discard the top row of the scroll region and blank the bottom one
    pub fn shift_up(&mut self) {
        self.scroll_up(1);
    }

    pub fn backspace(&mut self) {
        self.cursor.x = self.cursor.x.saturating_sub(1);
    }

    /// Move to the next tab stop (every 8 columns)
    pub fn tab(&mut self) {
        let next = (self.cursor.x / TAB_WIDTH + 1).saturating_mul(TAB_WIDTH);
        self.cursor.x = next.min(self.last_col());
    }

    pub fn set_cursor_position(&mut self, line: u16, column: u16) {
        self.cursor.y = line.min(self.last_row());
        self.cursor.x = column.min(self.last_col());
    }

    pub fn cursor_up(&mut self, n: u16) {
        self.cursor.y = self.cursor.y.saturating_sub(n);
    }

    pub fn cursor_down(&mut self, n: u16) {
        self.cursor.y = self.cursor.y.saturating_add(n).min(self.last_row());
    }

    pub fn cursor_forward(&mut self, n: u16) {
        self.cursor.x = self.cursor.x.saturating_add(n).min(self.last_col());
    }

    pub fn cursor_back(&mut self, n: u16) {
        self.cursor.x = self.cursor.x.saturating_sub(n);
    }

    pub fn cursor_char_absolute(&mut self, column: u16) {
        self.cursor.x = column.min(self.last_col());
    }

    pub fn line_position_absolute(&mut self, line: u16) {
        self.cursor.y = line.min(self.last_row());
    }

    /// Index - cursor down, scroll at the bottom of the scroll region
    pub fn index(&mut self) {
        self.line_feed();
    }

    /// Reverse index - cursor up, scroll at the top of the scroll region
    pub fn reverse_index(&mut self) {
        if self.cursor.y == self.scroll_region.0 {
            self.scroll_down(1);
        } else {
            self.cursor_up(1);
        }
    }

    pub fn save_cursor(&mut self) {
        self.saved_cursor = Some(SavedCursor {
            cursor: self.cursor,
            attrs: self.current_attrs,
        });
    }

    pub fn restore_cursor(&mut self) {
        if let Some(saved) = self.saved_cursor {
            self.set_cursor_position(saved.cursor.y, saved.cursor.x);
            self.current_attrs = saved.attrs;
        }
    }

    // ── Erasing ────────────────────────────────────────────────────────

    /// Blank the cells from `(x0, y0)` to `(x1, y1)` inclusive, in reading order
    ///
    /// Erased cells carry default attributes, not the current ones.
    pub fn clear_block(&mut self, x0: u16, y0: u16, x1: u16, y1: u16) {
        let (x0, y0) = (x0.min(self.last_col()), y0.min(self.last_row()));
        let (x1, y1) = (x1.min(self.last_col()), y1.min(self.last_row()));
        if (y0, x0) > (y1, x1) {
            return;
        }

        let last_col = self.last_col();
        for y in y0..=y1 {
            let start = if y == y0 { x0 } else { 0 };
            let end = if y == y1 { x1 } else { last_col };
            let row = &mut self.rows[y as usize];
            for cell in &mut row.cells[start as usize..=end as usize] {
                *cell = Cell::default();
            }
            if end == last_col {
                row.wrapped = false;
            }
        }
    }

    /// Erase in line: 0 = cursor to end, 1 = start to cursor, 2 = whole line
    pub fn erase_in_line(&mut self, mode: u16) {
        let Cursor { x, y } = self.cursor;
        match mode {
            0 => self.clear_block(x, y, self.last_col(), y),
            1 => self.clear_block(0, y, x, y),
            2 => self.clear_block(0, y, self.last_col(), y),
            _ => {}
        }
    }

    /// Erase in display
    ///
    /// 0 = cursor to end of screen, 1 = start of screen to cursor,
    /// 2 = whole screen and home the cursor, 3 = as 2 and drop scroll-back.
    pub fn erase_in_display(&mut self, mode: u16) {
        let Cursor { x, y } = self.cursor;
        match mode {
            0 => self.clear_block(x, y, self.last_col(), self.last_row()),
            1 => self.clear_block(0, 0, x, y),
            2 | 3 => {
                self.clear();
                if mode == 3 {
                    self.scrollback.clear();
                    self.window_top = 0;
                }
                self.cursor = Cursor::default();
            }
            _ => {}
        }
    }

    /// Blank the whole grid; the cursor is left where it is
    pub fn clear(&mut self) {
        let cols = self.size.columns;
        for row in &mut self.rows {
            *row = Row::new(cols);
        }
    }

    pub fn erase_chars(&mut self, n: u16) {
        let Cursor { x, y } = self.cursor;
        let end = x.saturating_add(n.max(1) - 1);
        self.clear_block(x, y, end.min(self.last_col()), y);
    }

    pub fn insert_chars(&mut self, n: u16) {
        let Cursor { x, y } = self.cursor;
        let n = n.min(self.size.columns - x) as usize;
        let cells = &mut self.rows[y as usize].cells;
        for _ in 0..n {
            cells.pop();
            cells.insert(x as usize, Cell::default());
        }
    }

    pub fn delete_chars(&mut self, n: u16) {
        let Cursor { x, y } = self.cursor;
        let n = n.min(self.size.columns - x) as usize;
        let cells = &mut self.rows[y as usize].cells;
        for _ in 0..n {
            cells.remove(x as usize);
            cells.push(Cell::default());
        }
    }

    // ── Scrolling ──────────────────────────────────────────────────────

    /// Scroll the scroll region up by n lines
    ///
    /// Rows leaving the top of the screen go to the scroll-back store.
    pub fn scroll_up(&mut self, n: u16) {
        let (top, bottom) = (self.scroll_region.0 as usize, self.scroll_region.1 as usize);
        let n = (n as usize).min(bottom - top + 1);
        let cols = self.size.columns;

        for _ in 0..n {
            let removed = self.rows.remove(top);
            if top == 0 {
                self.push_to_scrollback(removed);
            }
            self.rows.insert(bottom, Row::new(cols));
        }
    }

    /// Scroll the scroll region down by n lines
    pub fn scroll_down(&mut self, n: u16) {
        let (top, bottom) = (self.scroll_region.0 as usize, self.scroll_region.1 as usize);
        let n = (n as usize).min(bottom - top + 1);
        let cols = self.size.columns;

        for _ in 0..n {
            self.rows.remove(bottom);
            self.rows.insert(top, Row::new(cols));
        }
    }

    /// Insert blank lines at the cursor row, pushing lines below down
    pub fn insert_lines(&mut self, n: u16) {
        let (top, bottom) = self.scroll_region;
        let y = self.cursor.y;
        if y < top || y > bottom {
            return;
        }
        let n = n.min(bottom - y + 1);
        let cols = self.size.columns;
        for _ in 0..n {
            self.rows.remove(bottom as usize);
            self.rows.insert(y as usize, Row::new(cols));
        }
    }

    /// Delete lines at the cursor row, pulling lines below up
    pub fn delete_lines(&mut self, n: u16) {
        let (top, bottom) = self.scroll_region;
        let y = self.cursor.y;
        if y < top || y > bottom {
            return;
        }
        let n = n.min(bottom - y + 1);
        let cols = self.size.columns;
        for _ in 0..n {
            self.rows.remove(y as usize);
            self.rows.insert(bottom as usize, Row::new(cols));
        }
    }

    /// Set scroll region (0-indexed, inclusive) and home the cursor
    pub fn set_scroll_region(&mut self, top: u16, bottom: Option<u16>) {
        let last = self.last_row();
        let top = top.min(last);
        let bottom = bottom.unwrap_or(last).min(last);
        if top < bottom {
            self.scroll_region = (top, bottom);
            self.cursor = Cursor::default();
        }
    }

    fn push_to_scrollback(&mut self, row: Row) {
        if self.scrollback_limit == 0 {
            return;
        }
        self.scrollback.push_back(row);
        // Keep a scrolled-back view on the same lines
        if self.window_top > 0 {
            self.window_top += 1;
        }
        while self.scrollback.len() > self.scrollback_limit {
            self.scrollback.pop_front();
        }
        self.window_top = self.window_top.min(self.scrollback.len());
    }

    pub fn scrollback_len(&self) -> usize {
        self.scrollback.len()
    }

    /// Scroll view up by n lines
    pub fn scroll_view_up(&mut self, n: usize) {
        self.window_top = self.window_top.saturating_add(n).min(self.scrollback.len());
    }

    /// Scroll view down by n lines
    pub fn scroll_view_down(&mut self, n: usize) {
        self.window_top = self.window_top.saturating_sub(n);
    }

    /// Reset scroll to bottom (live view)
    pub fn scroll_to_bottom(&mut self) {
        self.window_top = 0;
    }

    pub fn is_scrolled(&self) -> bool {
        self.window_top > 0
    }

    // ── Size and modes ─────────────────────────────────────────────────

    /// Resize the grid
    ///
    /// Shrinking truncates; content outside the new bounds is gone for good.
    pub fn resize(&mut self, size: TerminalSize) {
        let (cols, rows) = (size.columns, size.rows);
        self.rows.truncate(rows as usize);
        while self.rows.len() < rows as usize {
            self.rows.push(Row::new(cols));
        }
        for row in &mut self.rows {
            row.resize(cols);
        }
        for row in &mut self.scrollback {
            row.resize(cols);
        }

        self.size = size;
        self.scroll_region = (0, rows - 1);
        self.set_cursor_position(self.cursor.y, self.cursor.x);
        if let Some(saved) = &mut self.saved_cursor {
            saved.cursor.x = saved.cursor.x.min(cols - 1);
            saved.cursor.y = saved.cursor.y.min(rows - 1);
        }
        self.window_top = self.window_top.min(self.scrollback.len());
    }

    /// Align the view with the live screen when the cursor sits on row 0
    pub fn reset_window_if_at_top(&mut self) {
        if self.cursor.y == 0 {
            self.scroll_to_bottom();
        }
    }

    /// Full reset (RIS), keeping size and scroll-back limit
    pub fn reset(&mut self) {
        *self = Self::with_scrollback_limit(self.size, self.scrollback_limit);
    }

    // ── Reading ────────────────────────────────────────────────────────

    /// Live screen row
    pub fn row(&self, y: usize) -> Option<&Row> {
        self.rows.get(y)
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn cell(&self, x: usize, y: usize) -> Option<&Cell> {
        self.rows.get(y).and_then(|row| row.cells.get(x))
    }

    /// Text of a live screen row, trailing blanks trimmed
    pub fn row_text(&self, y: usize) -> String {
        self.rows.get(y).map(Row::text).unwrap_or_default()
    }

    /// Row as currently seen through the window (accounting for `window_top`)
    pub fn visible_row(&self, y: usize) -> Option<&Row> {
        if self.window_top == 0 {
            return self.rows.get(y);
        }
        let start = self.scrollback.len() - self.window_top;
        let absolute = start + y;
        if absolute < self.scrollback.len() {
            self.scrollback.get(absolute)
        } else {
            self.rows.get(absolute - self.scrollback.len())
        }
    }

    /// Copy of the rows currently in view
    pub fn visible_rows(&self) -> Vec<Row> {
        (0..self.size.rows as usize)
            .filter_map(|y| self.visible_row(y).cloned())
            .collect()
    }
}

/// A single row
#[derive(Clone, Debug, PartialEq)]
pub struct Row {
    pub cells: Vec<Cell>,
    /// Row was ended by autowrap rather than a line feed
    pub wrapped: bool,
}

impl Row {
    pub fn new(cols: u16) -> Self {
        Self {
            cells: vec![Cell::default(); cols as usize],
            wrapped: false,
        }
    }

    pub fn resize(&mut self, new_cols: u16) {
        self.cells.resize(new_cols as usize, Cell::default());
        // Don't leave half of a wide char at the edge
        if let Some(last) = self.cells.last_mut() {
            if last.width == 2 {
                *last = Cell::default();
            }
        }
    }

    /// Display text with trailing blanks trimmed
    pub fn text(&self) -> String {
        let text: String = self
            .cells
            .iter()
            .filter(|cell| !cell.is_continuation())
            .map(Cell::display_char)
            .collect();
        text.trim_end().to_string()
    }
}

/// A single cell
#[derive(Clone, Debug, PartialEq)]
pub struct Cell {
    /// Empty for a blank cell
    pub glyph: String,
    pub width: u8,
    pub attrs: CharAttributes,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            glyph: String::new(),
            width: 1,
            attrs: CharAttributes::default(),
        }
    }
}

impl Cell {
    pub fn new(ch: char, width: u8, attrs: CharAttributes) -> Self {
        Self {
            glyph: ch.to_string(),
            width,
            attrs,
        }
    }

    pub fn continuation(attrs: CharAttributes) -> Self {
        Self {
            glyph: String::new(),
            width: 0,
            attrs,
        }
    }

    pub fn is_continuation(&self) -> bool {
        self.width == 0
    }

    /// Blank with default attributes
    pub fn is_blank(&self) -> bool {
        self.glyph.is_empty() && self.width == 1 && self.attrs == CharAttributes::default()
    }

    /// Get the display character (space if empty)
    pub fn display_char(&self) -> &str {
        if self.glyph.is_empty() {
            " "
        } else {
            &self.glyph
        }
    }
}

/// Rendering style stamped onto written cells
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CharAttributes {
    pub fg: Color,
    pub bg: Color,
    pub flags: AttrFlags,
}

impl CharAttributes {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn apply(&mut self, change: &Sgr) {
        match *change {
            Sgr::Reset => self.reset(),
            Sgr::Set(flags) => self.flags |= flags,
            Sgr::Unset(flags) => self.flags &= !flags,
            Sgr::Foreground(color) => self.fg = color,
            Sgr::Background(color) => self.bg = color,
        }
    }
}

/// Color definition
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Color {
    #[default]
    Default,
    Indexed(u8),
    Rgb(u8, u8, u8),
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct AttrFlags: u16 {
        const BOLD          = 0b0000_0000_0001;
        const DIM           = 0b0000_0000_0010;
        const ITALIC        = 0b0000_0000_0100;
        const UNDERLINE     = 0b0000_0000_1000;
        const BLINK         = 0b0000_0001_0000;
        const INVERSE       = 0b0000_0010_0000;
        const HIDDEN        = 0b0000_0100_0000;
        const STRIKETHROUGH = 0b0000_1000_0000;
    }
}
