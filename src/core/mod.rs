//! Core terminal emulation components.
//!
//! - **term**: escape-sequence decoder, terminal codes and the screen buffer
//! - **session**: one decoder and one buffer behind a lock, plus observers
//!
//! # Architecture
//!
//! ```text
//! Session
//! ├── Transport (host input out, program output in via the reader thread)
//! ├── Decoder (bytes -> TerminalCode batches)
//! └── ScreenBuffer
//!     ├── Rows of Cells (glyph + attributes)
//!     ├── Cursor, scroll region, saved cursor
//!     └── Scroll-back + window offset
//! ```

pub mod session;
pub mod term;
