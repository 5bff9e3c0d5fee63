//! Terminal emulation: decoder, codes and screen buffer

pub mod code;
pub mod parser;
pub mod snapshot;
pub mod state;

pub use code::{Mode, Sgr, TerminalCode};
pub use parser::Decoder;
pub use snapshot::Snapshot;
pub use state::{
    AttrFlags, Cell, CharAttributes, Color, Cursor, Row, ScreenBuffer, TerminalSize,
    DEFAULT_SCROLLBACK_LIMIT,
};
