//! Terminal codes
//!
//! The closed set of operations the decoder produces and the session applies
//! to a screen buffer. Positions are 0-indexed; counts are at least 1.

use super::state::{AttrFlags, Color};

/// A decoded terminal operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalCode {
    /// A run of printable characters
    Text(String),
    LineFeed,
    CarriageReturn,
    Backspace,
    /// Horizontal tab
    Tab,
    SetMode(Mode),
    ResetMode(Mode),
    /// SGR changes, applied in order onto the current attributes
    CharAttributes(Vec<Sgr>),
    /// CUP / HVP
    CursorPosition { line: u16, column: u16 },
    CursorUp(u16),
    CursorDown(u16),
    CursorForward(u16),
    CursorBack(u16),
    /// CNL - down n lines, column 0
    CursorNextLine(u16),
    /// CPL - up n lines, column 0
    CursorPrevLine(u16),
    /// CHA
    CursorCharAbsolute(u16),
    /// VPA
    LinePositionAbsolute(u16),
    EraseInLine(u16),
    EraseInDisplay(u16),
    EraseChars(u16),
    InsertChars(u16),
    DeleteChars(u16),
    InsertLines(u16),
    DeleteLines(u16),
    ScrollUp(u16),
    ScrollDown(u16),
    /// DECSTBM; `bottom` of `None` means the last row
    SetScrollRegion { top: u16, bottom: Option<u16> },
    SaveCursor,
    RestoreCursor,
    Index,
    NextLine,
    ReverseIndex,
    FullReset,
    SetTitle(String),
}

/// Terminal mode selected by SM/RM
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// DECTCEM (`?25`)
    ShowCursor,
    /// DECAWM (`?7`)
    AutoWrap,
    /// A mode the screen buffer does not model
    Other { private: bool, code: u16 },
}

impl Mode {
    pub fn from_param(private: bool, code: u16) -> Self {
        match (private, code) {
            (true, 25) => Mode::ShowCursor,
            (true, 7) => Mode::AutoWrap,
            _ => Mode::Other { private, code },
        }
    }
}

/// A single Select Graphic Rendition change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sgr {
    Reset,
    Set(AttrFlags),
    Unset(AttrFlags),
    Foreground(Color),
    Background(Color),
}

impl Sgr {
    /// Translate an SGR parameter list (`CSI ... m`)
    ///
    /// An empty list means reset. Unknown parameters are skipped; extended
    /// colors (`38;5;n`, `38;2;r;g;b`) consume their arguments.
    pub fn parse_params(params: &[u16]) -> Vec<Sgr> {
        if params.is_empty() {
            return vec![Sgr::Reset];
        }

        let mut changes = Vec::with_capacity(params.len());
        let mut iter = params.iter().copied();

        while let Some(param) = iter.next() {
            let change = match param {
                0 => Sgr::Reset,
                1 => Sgr::Set(AttrFlags::BOLD),
                2 => Sgr::Set(AttrFlags::DIM),
                3 => Sgr::Set(AttrFlags::ITALIC),
                4 => Sgr::Set(AttrFlags::UNDERLINE),
                5 | 6 => Sgr::Set(AttrFlags::BLINK),
                7 => Sgr::Set(AttrFlags::INVERSE),
                8 => Sgr::Set(AttrFlags::HIDDEN),
                9 => Sgr::Set(AttrFlags::STRIKETHROUGH),

                22 => Sgr::Unset(AttrFlags::BOLD | AttrFlags::DIM),
                23 => Sgr::Unset(AttrFlags::ITALIC),
                24 => Sgr::Unset(AttrFlags::UNDERLINE),
                25 => Sgr::Unset(AttrFlags::BLINK),
                27 => Sgr::Unset(AttrFlags::INVERSE),
                28 => Sgr::Unset(AttrFlags::HIDDEN),
                29 => Sgr::Unset(AttrFlags::STRIKETHROUGH),

                30..=37 => Sgr::Foreground(Color::Indexed((param - 30) as u8)),
                38 => match extended_color(&mut iter) {
                    Some(color) => Sgr::Foreground(color),
                    None => continue,
                },
                39 => Sgr::Foreground(Color::Default),

                40..=47 => Sgr::Background(Color::Indexed((param - 40) as u8)),
                48 => match extended_color(&mut iter) {
                    Some(color) => Sgr::Background(color),
                    None => continue,
                },
                49 => Sgr::Background(Color::Default),

                90..=97 => Sgr::Foreground(Color::Indexed((param - 90 + 8) as u8)),
                100..=107 => Sgr::Background(Color::Indexed((param - 100 + 8) as u8)),

                _ => continue,
            };
            changes.push(change);
        }
        changes
    }
}

fn extended_color(iter: &mut impl Iterator<Item = u16>) -> Option<Color> {
    match iter.next()? {
        5 => iter.next().map(|n| Color::Indexed(n.min(255) as u8)),
        2 => {
            let mut channel = || iter.next().unwrap_or(0).min(255) as u8;
            let (r, g, b) = (channel(), channel(), channel());
            Some(Color::Rgb(r, g, b))
        }
        _ => None,
    }
}
