//! tterm - a terminal emulation engine
//!
//! Decodes a terminal output stream into [`TerminalCode`]s, applies them to a
//! [`ScreenBuffer`] and publishes [`SessionEvent`]s to observers. Rendering,
//! process spawning and keyboard encoding are left to the host.
//!
//! ```
//! use tterm::{Profile, Session, TerminalSize};
//!
//! let session = Session::new(TerminalSize::new(80, 24), Profile::default());
//! session.feed("\x1b[1mhello\x1b[0m\r\n").unwrap();
//! assert_eq!(session.snapshot().row_text(0), "hello");
//! ```

pub mod config;
pub mod core;

pub use crate::config::{Config, ConfigError, Profile};
pub use crate::core::session::{
    Lifecycle, Session, SessionError, SessionEvent, Transport, TransportError,
};
pub use crate::core::term::{
    Decoder, Mode, ScreenBuffer, Sgr, Snapshot, TerminalCode, TerminalSize,
};
