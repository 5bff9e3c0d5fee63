//! Session management
//!
//! A session owns one decoder and one screen buffer behind a single lock.
//! Input from the transport (or from the host) is decoded and applied as one
//! batch, and observers are notified over channels once the lock is released.

use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use thiserror::Error;

use super::term::{
    Decoder, Mode, ScreenBuffer, Sgr, Snapshot, TerminalCode, TerminalSize,
    DEFAULT_SCROLLBACK_LIMIT,
};
use crate::config::{Config, Profile};

/// Bytes read from the transport per chunk
const READ_CHUNK_SIZE: usize = 4096;

/// Errors raised by a transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("transport closed")]
    Closed,
}

/// Errors returned by session operations
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session has finished")]
    Finished,
    #[error("session has been disposed")]
    Disposed,
    #[error("no transport attached")]
    NoTransport,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Write side of the connection to the program running in the terminal
pub trait Transport: Send {
    /// Send host input (keystrokes, pasted text) to the program
    fn send(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Release the connection; called at most once
    fn shutdown(&mut self);
}

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Active,
    /// The transport closed or failed; the screen can still be read
    Finished,
    Disposed,
}

/// Session events
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A batch of codes has been applied (screen updated)
    Output,
    /// Title changed
    TitleChanged(String),
    /// Terminal was resized
    SizeChanged(TerminalSize),
    /// Session has finished, with the transport error if there was one
    Finished(Option<Arc<TransportError>>),
}

/// State guarded by the session lock
struct Inner {
    decoder: Decoder,
    buffer: ScreenBuffer,
    title: String,
    lifecycle: Lifecycle,
}

impl Inner {
    fn ensure_active(&self) -> Result<(), SessionError> {
        match self.lifecycle {
            Lifecycle::Active => Ok(()),
            Lifecycle::Finished => Err(SessionError::Finished),
            Lifecycle::Disposed => Err(SessionError::Disposed),
        }
    }

    /// Apply codes in order, returning the titles that were set
    fn apply_batch(&mut self, codes: Vec<TerminalCode>) -> Vec<String> {
        let mut titles = Vec::new();
        for code in codes {
            self.apply_code(code, &mut titles);
        }
        titles
    }

    fn apply_code(&mut self, code: TerminalCode, titles: &mut Vec<String>) {
        let buffer = &mut self.buffer;
        match code {
            TerminalCode::Text(text) => buffer.type_text(&text),
            TerminalCode::LineFeed => buffer.line_feed(),
            TerminalCode::CarriageReturn => buffer.carriage_return(),
            TerminalCode::Backspace => buffer.backspace(),
            TerminalCode::Tab => buffer.tab(),
            TerminalCode::SetMode(mode) => {
                set_mode(buffer, mode, true);
                buffer.reset_window_if_at_top();
            }
            TerminalCode::ResetMode(mode) => set_mode(buffer, mode, false),
            TerminalCode::CharAttributes(changes) => buffer.set_attributes(&changes),
            TerminalCode::CursorPosition { line, column } => {
                buffer.set_cursor_position(line, column);
                buffer.reset_window_if_at_top();
            }
            TerminalCode::CursorUp(n) => buffer.cursor_up(n),
            TerminalCode::CursorDown(n) => buffer.cursor_down(n),
            TerminalCode::CursorForward(n) => buffer.cursor_forward(n),
            TerminalCode::CursorBack(n) => buffer.cursor_back(n),
            TerminalCode::CursorNextLine(n) => {
                buffer.cursor_down(n);
                buffer.carriage_return();
            }
            TerminalCode::CursorPrevLine(n) => {
                buffer.cursor_up(n);
                buffer.carriage_return();
            }
            TerminalCode::CursorCharAbsolute(column) => buffer.cursor_char_absolute(column),
            TerminalCode::LinePositionAbsolute(line) => buffer.line_position_absolute(line),
            TerminalCode::EraseInLine(mode) => buffer.erase_in_line(mode),
            TerminalCode::EraseInDisplay(mode) => buffer.erase_in_display(mode),
            TerminalCode::EraseChars(n) => buffer.erase_chars(n),
            TerminalCode::InsertChars(n) => buffer.insert_chars(n),
            TerminalCode::DeleteChars(n) => buffer.delete_chars(n),
            TerminalCode::InsertLines(n) => buffer.insert_lines(n),
            TerminalCode::DeleteLines(n) => buffer.delete_lines(n),
            TerminalCode::ScrollUp(n) => buffer.scroll_up(n),
            TerminalCode::ScrollDown(n) => buffer.scroll_down(n),
            TerminalCode::SetScrollRegion { top, bottom } => buffer.set_scroll_region(top, bottom),
            TerminalCode::SaveCursor => buffer.save_cursor(),
            TerminalCode::RestoreCursor => buffer.restore_cursor(),
            TerminalCode::Index => buffer.index(),
            TerminalCode::NextLine => {
                buffer.carriage_return();
                buffer.line_feed();
            }
            TerminalCode::ReverseIndex => buffer.reverse_index(),
            TerminalCode::FullReset => buffer.reset(),
            TerminalCode::SetTitle(title) => {
                self.title = title.clone();
                titles.push(title);
            }
        }
    }
}

fn set_mode(buffer: &mut ScreenBuffer, mode: Mode, enabled: bool) {
    match mode {
        Mode::ShowCursor => buffer.show_cursor = enabled,
        Mode::AutoWrap => buffer.auto_wrap = enabled,
        Mode::Other { private, code } => {
            tracing::trace!("Unhandled mode: private={}, code={}, set={}", private, code, enabled);
        }
    }
}

/// A terminal session
pub struct Session {
    profile: Profile,
    inner: Mutex<Inner>,
    subscribers: Mutex<Vec<Sender<SessionEvent>>>,
    transport: Mutex<Option<Box<dyn Transport>>>,
    /// Reader thread keeps going while set
    running: Arc<AtomicBool>,
    reader_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Create a new session
    pub fn new(size: TerminalSize, profile: Profile) -> Self {
        Self::with_buffer_settings(size, DEFAULT_SCROLLBACK_LIMIT, String::new(), profile)
    }

    /// Create a session from configuration
    pub fn from_config(config: &Config) -> Self {
        Self::with_buffer_settings(
            config.terminal_size(),
            config.scrollback_limit,
            config.title.clone(),
            config.profile.clone(),
        )
    }

    fn with_buffer_settings(
        size: TerminalSize,
        scrollback_limit: usize,
        title: String,
        profile: Profile,
    ) -> Self {
        tracing::debug!("Creating session {} for {:?}", size, profile.command);
        Self {
            profile,
            inner: Mutex::new(Inner {
                decoder: Decoder::new(),
                buffer: ScreenBuffer::with_scrollback_limit(size, scrollback_limit),
                title,
                lifecycle: Lifecycle::Active,
            }),
            subscribers: Mutex::new(Vec::new()),
            transport: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
            reader_thread: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lock().lifecycle
    }

    pub fn title(&self) -> String {
        self.lock().title.clone()
    }

    pub fn size(&self) -> TerminalSize {
        self.lock().buffer.size()
    }

    /// Check if the reader thread is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // ── Observers ──────────────────────────────────────────────────────

    /// Register an observer
    ///
    /// Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    fn broadcast(&self, event: SessionEvent) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn notify_output(&self, titles: Vec<String>) {
        for title in titles {
            self.broadcast(SessionEvent::TitleChanged(title));
        }
        self.broadcast(SessionEvent::Output);
    }

    // ── Input ──────────────────────────────────────────────────────────

    /// Decode and apply program output
    pub fn feed(&self, text: &str) -> Result<(), SessionError> {
        let titles = {
            let mut inner = self.lock();
            inner.ensure_active()?;
            let codes = inner.decoder.parse(text);
            inner.apply_batch(codes)
        };
        self.notify_output(titles);
        Ok(())
    }

    /// Decode and apply raw program output (UTF-8)
    pub fn feed_bytes(&self, bytes: &[u8]) -> Result<(), SessionError> {
        let titles = {
            let mut inner = self.lock();
            inner.ensure_active()?;
            let codes = inner.decoder.parse_bytes(bytes);
            inner.apply_batch(codes)
        };
        self.notify_output(titles);
        Ok(())
    }

    /// Apply already decoded codes as one batch
    pub fn apply(&self, codes: Vec<TerminalCode>) -> Result<(), SessionError> {
        let titles = {
            let mut inner = self.lock();
            inner.ensure_active()?;
            inner.apply_batch(codes)
        };
        self.notify_output(titles);
        Ok(())
    }

    // ── Host output helpers ────────────────────────────────────────────

    /// Write text in default attributes at the cursor
    pub fn write_output(&self, text: &str) -> Result<(), SessionError> {
        self.apply(vec![
            TerminalCode::CharAttributes(vec![Sgr::Reset]),
            TerminalCode::Text(text.to_string()),
        ])
    }

    /// Write text, blank the rest of the line and move to the next one
    pub fn write_line(&self, text: &str) -> Result<(), SessionError> {
        self.apply(vec![
            TerminalCode::CharAttributes(vec![Sgr::Reset]),
            TerminalCode::Text(text.to_string()),
            TerminalCode::EraseInLine(0),
            TerminalCode::CarriageReturn,
            TerminalCode::LineFeed,
        ])
    }

    /// Write lines below the cursor, then return to the starting row
    pub fn write_lines<S: AsRef<str>>(&self, lines: &[S]) -> Result<(), SessionError> {
        let mut codes = Vec::with_capacity(lines.len() * 3 + 1);
        for line in lines {
            codes.push(TerminalCode::Text(line.as_ref().to_string()));
            codes.push(TerminalCode::CarriageReturn);
            codes.push(TerminalCode::LineFeed);
        }
        if !lines.is_empty() {
            let count = u16::try_from(lines.len()).unwrap_or(u16::MAX);
            codes.push(TerminalCode::CursorUp(count));
        }
        self.apply(codes)
    }

    pub fn write_cursor_up(&self, n: u16) -> Result<(), SessionError> {
        self.apply(vec![TerminalCode::CursorUp(n)])
    }

    pub fn write_cursor_down(&self, n: u16) -> Result<(), SessionError> {
        self.apply(vec![TerminalCode::CursorDown(n)])
    }

    /// Clear the screen and home the cursor
    pub fn clear(&self) -> Result<(), SessionError> {
        self.apply(vec![TerminalCode::EraseInDisplay(2)])
    }

    // ── View ───────────────────────────────────────────────────────────

    /// Resize the terminal
    ///
    /// Raises `SizeChanged` only when the size actually changes. Once the
    /// session has finished the size is frozen.
    pub fn resize(&self, size: TerminalSize) -> Result<(), SessionError> {
        {
            let mut inner = self.lock();
            inner.ensure_active()?;
            if inner.buffer.size() == size {
                return Ok(());
            }
            inner.buffer.resize(size);
        }
        tracing::debug!("Session resized to {}", size);
        self.broadcast(SessionEvent::SizeChanged(size));
        Ok(())
    }

    /// Scroll the view back into history
    pub fn scroll_view_up(&self, lines: usize) -> Result<(), SessionError> {
        self.update_view(|buffer| buffer.scroll_view_up(lines))
    }

    /// Scroll the view towards the live screen
    pub fn scroll_view_down(&self, lines: usize) -> Result<(), SessionError> {
        self.update_view(|buffer| buffer.scroll_view_down(lines))
    }

    fn update_view(&self, f: impl FnOnce(&mut ScreenBuffer)) -> Result<(), SessionError> {
        {
            let mut inner = self.lock();
            if inner.lifecycle == Lifecycle::Disposed {
                return Err(SessionError::Disposed);
            }
            f(&mut inner.buffer);
        }
        self.broadcast(SessionEvent::Output);
        Ok(())
    }

    /// Read the buffer under the session lock
    pub fn with_buffer<R>(&self, f: impl FnOnce(&ScreenBuffer) -> R) -> R {
        f(&self.lock().buffer)
    }

    /// Copy of the visible screen
    pub fn snapshot(&self) -> Snapshot {
        let inner = self.lock();
        Snapshot::capture(&inner.buffer, &inner.title)
    }

    // ── Transport ──────────────────────────────────────────────────────

    /// Attach the write side of the connection
    ///
    /// A previously attached transport is shut down.
    pub fn attach_transport(&self, transport: Box<dyn Transport>) -> Result<(), SessionError> {
        // Held until the transport is stored so dispose cannot slip in between
        let inner = self.lock();
        inner.ensure_active()?;
        let previous = self
            .transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(transport);
        drop(inner);
        if let Some(mut previous) = previous {
            previous.shutdown();
        }
        Ok(())
    }

    /// Forward host input to the transport
    pub fn write_input(&self, text: &str) -> Result<(), SessionError> {
        self.lock().ensure_active()?;
        let mut transport = self.transport.lock().unwrap_or_else(PoisonError::into_inner);
        match transport.as_mut() {
            Some(transport) => Ok(transport.send(text.as_bytes())?),
            None => Err(SessionError::NoTransport),
        }
    }

    /// Pump program output from `reader` into the session on a thread
    ///
    /// End of input closes the session; a read error fails it.
    pub fn spawn_reader<R>(self: &Arc<Self>, mut reader: R)
    where
        R: Read + Send + 'static,
    {
        let session = Arc::downgrade(self);
        let running = self.running.clone();
        running.store(true, Ordering::SeqCst);

        let reader_thread = thread::spawn(move || {
            let mut buffer = vec![0u8; READ_CHUNK_SIZE];

            while running.load(Ordering::SeqCst) {
                let result = reader.read(&mut buffer);
                let Some(session) = session.upgrade() else {
                    break;
                };
                match result {
                    Ok(0) => {
                        session.close();
                        break;
                    }
                    Ok(n) => {
                        if session.feed_bytes(&buffer[..n]).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => {
                        session.fail(TransportError::Io(e));
                        break;
                    }
                }
            }
            running.store(false, Ordering::SeqCst);
        });

        let previous = self
            .reader_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(reader_thread);
        if previous.is_some() {
            tracing::warn!("Replacing a running reader thread");
        }
    }

    // ── Lifecycle ──────────────────────────────────────────────────────

    /// The program closed its output
    pub fn close(&self) {
        self.finish(None);
    }

    /// The transport failed
    pub fn fail(&self, error: TransportError) {
        self.finish(Some(Arc::new(error)));
    }

    fn finish(&self, error: Option<Arc<TransportError>>) {
        {
            let mut inner = self.lock();
            if inner.lifecycle != Lifecycle::Active {
                return;
            }
            inner.lifecycle = Lifecycle::Finished;
        }
        match &error {
            Some(e) => tracing::debug!("Session finished: {}", e),
            None => tracing::debug!("Session finished"),
        }
        self.broadcast(SessionEvent::Finished(error));
    }

    /// Release the session
    ///
    /// Shuts the transport down and stops the reader. Safe to call more than
    /// once and after the session has finished.
    pub fn dispose(&self) {
        {
            let mut inner = self.lock();
            if inner.lifecycle == Lifecycle::Disposed {
                return;
            }
            inner.lifecycle = Lifecycle::Disposed;
            // Disposed sessions keep an empty 1x1 screen
            inner.buffer = ScreenBuffer::with_scrollback_limit(TerminalSize::new(1, 1), 0);
        }

        self.running.store(false, Ordering::SeqCst);

        let transport = self
            .transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut transport) = transport {
            transport.shutdown();
        }

        // The reader may be blocked in read(); it exits on its next wakeup
        if let Some(handle) = self
            .reader_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            if handle.is_finished() {
                let _ = handle.join();
            }
        }

        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        tracing::debug!("Session disposed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn session(columns: u16, rows: u16) -> Session {
        Session::new(TerminalSize::new(columns, rows), Profile::default())
    }

    fn drain(rx: &Receiver<SessionEvent>) -> Vec<SessionEvent> {
        rx.try_iter().collect()
    }

    #[derive(Default, Clone)]
    struct MockTransport {
        sent: Arc<Mutex<Vec<u8>>>,
        shutdowns: Arc<AtomicUsize>,
    }

    impl Transport for MockTransport {
        fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
            self.sent.lock().unwrap().extend_from_slice(data);
            Ok(())
        }

        fn shutdown(&mut self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"))
        }
    }

    #[test]
    fn test_feed_applies_batch_with_one_notification() {
        let session = session(20, 5);
        let rx = session.subscribe();

        session.feed("hello\r\nworld").unwrap();

        let events = drain(&rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], SessionEvent::Output));
        session.with_buffer(|buffer| {
            assert_eq!(buffer.row_text(0), "hello");
            assert_eq!(buffer.row_text(1), "world");
            assert_eq!((buffer.cursor_x(), buffer.cursor_y()), (5, 1));
        });
    }

    #[test]
    fn test_cursor_position_sequence() {
        let session = session(20, 5);
        session.feed("\x1b[2;5H").unwrap();
        let cursor = session.snapshot().cursor;
        assert_eq!((cursor.x, cursor.y), (4, 1));
    }

    #[test]
    fn test_sequence_split_across_feeds() {
        let session = session(20, 5);
        session.feed("hello\x1b[2;").unwrap();
        session.feed("5Hx").unwrap();
        assert_eq!(session.snapshot().row_text(1), "    x");
    }

    #[test]
    fn test_feed_bytes_split_code_point() {
        let session = session(20, 5);
        let bytes = "añb".as_bytes();
        session.feed_bytes(&bytes[..2]).unwrap();
        session.feed_bytes(&bytes[2..]).unwrap();
        assert_eq!(session.snapshot().row_text(0), "añb");
    }

    #[test]
    fn test_title_events_precede_output() {
        let session = session(20, 5);
        let rx = session.subscribe();

        session.feed("\x1b]0;first\x07\x1b]2;second\x07$ ").unwrap();

        let events = drain(&rx);
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], SessionEvent::TitleChanged(t) if t == "first"));
        assert!(matches!(&events[1], SessionEvent::TitleChanged(t) if t == "second"));
        assert!(matches!(events[2], SessionEvent::Output));
        assert_eq!(session.title(), "second");
    }

    #[test]
    fn test_cursor_visibility_modes() {
        let session = session(20, 5);
        session.feed("\x1b[?25l").unwrap();
        assert!(!session.snapshot().show_cursor);
        session.feed("\x1b[?25h").unwrap();
        assert!(session.snapshot().show_cursor);
    }

    #[test]
    fn test_sgr_is_stamped_on_cells() {
        let session = session(20, 5);
        session.feed("\x1b[1;32mok\x1b[0m.").unwrap();
        session.with_buffer(|buffer| {
            let bold = buffer.cell(0, 0).unwrap().attrs;
            assert!(bold.flags.contains(crate::core::term::AttrFlags::BOLD));
            assert_eq!(bold.fg, crate::core::term::Color::Indexed(2));
            assert_eq!(buffer.cell(2, 0).unwrap().attrs, Default::default());
        });
    }

    #[test]
    fn test_window_resets_at_top() {
        let session = session(10, 3);
        for i in 0..6 {
            session.feed(&format!("line{}\r\n", i)).unwrap();
        }
        session.scroll_view_up(2).unwrap();
        assert_eq!(session.snapshot().window_top, 2);

        session.feed("\x1b[H").unwrap();
        assert_eq!(session.snapshot().window_top, 0);
    }

    #[test]
    fn test_mode_set_resets_window_only_at_top() {
        let session = session(10, 3);
        for i in 0..6 {
            session.feed(&format!("line{}\r\n", i)).unwrap();
        }
        session.scroll_view_up(2).unwrap();

        // Cursor is on the bottom row
        session.feed("\x1b[?25h").unwrap();
        assert_eq!(session.snapshot().window_top, 2);

        // Relative moves never reset the window
        session.feed("\x1b[5A").unwrap();
        assert_eq!(session.snapshot().cursor.y, 0);
        assert_eq!(session.snapshot().window_top, 2);

        session.feed("\x1b[?25h").unwrap();
        assert_eq!(session.snapshot().window_top, 0);
    }

    #[test]
    fn test_resize_notifies_only_on_change() {
        let session = session(20, 5);
        let rx = session.subscribe();

        session.resize(TerminalSize::new(20, 5)).unwrap();
        assert!(drain(&rx).is_empty());

        session.resize(TerminalSize::new(30, 6)).unwrap();
        let events = drain(&rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], SessionEvent::SizeChanged(s) if s == TerminalSize::new(30, 6)));
        assert_eq!(session.size(), TerminalSize::new(30, 6));
    }

    #[test]
    fn test_close_finishes_once() {
        let session = session(20, 5);
        let rx = session.subscribe();

        session.close();
        session.close();
        session.fail(TransportError::Closed);

        let events = drain(&rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], SessionEvent::Finished(None)));
        assert_eq!(session.lifecycle(), Lifecycle::Finished);
        assert!(matches!(session.feed("x"), Err(SessionError::Finished)));
        assert_eq!(session.snapshot().row_text(0), "");
    }

    #[test]
    fn test_resize_after_close_is_ignored() {
        let session = session(20, 5);
        session.close();
        let rx = session.subscribe();

        assert!(matches!(
            session.resize(TerminalSize::new(40, 10)),
            Err(SessionError::Finished)
        ));

        assert_eq!(session.size(), TerminalSize::new(20, 5));
        assert!(drain(&rx).is_empty());
    }

    #[test]
    fn test_fail_carries_error() {
        let session = session(20, 5);
        let rx = session.subscribe();

        session.fail(TransportError::Closed);

        match drain(&rx).as_slice() {
            [SessionEvent::Finished(Some(e))] => assert!(matches!(**e, TransportError::Closed)),
            other => panic!("unexpected events: {:?}", other),
        }
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let session = session(20, 5);
        let transport = MockTransport::default();
        session.attach_transport(Box::new(transport.clone())).unwrap();
        session.close();

        session.dispose();
        session.dispose();

        assert_eq!(transport.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(session.lifecycle(), Lifecycle::Disposed);
        assert!(matches!(session.feed("x"), Err(SessionError::Disposed)));
        assert!(matches!(
            session.resize(TerminalSize::new(9, 9)),
            Err(SessionError::Disposed)
        ));
        assert!(matches!(session.clear(), Err(SessionError::Disposed)));
    }

    #[test]
    fn test_attach_after_dispose_is_rejected() {
        let session = session(20, 5);
        session.dispose();

        let transport = MockTransport::default();
        assert!(matches!(
            session.attach_transport(Box::new(transport.clone())),
            Err(SessionError::Disposed)
        ));
        assert!(session.transport.lock().unwrap().is_none());
    }

    #[test]
    fn test_attach_racing_dispose_always_shuts_down() {
        for _ in 0..200 {
            let session = Arc::new(session(20, 5));
            let transport = MockTransport::default();

            let attacher = {
                let session = session.clone();
                let transport = transport.clone();
                thread::spawn(move || session.attach_transport(Box::new(transport)).is_ok())
            };
            session.dispose();
            let attached = attacher.join().unwrap();

            let expected = if attached { 1 } else { 0 };
            assert_eq!(transport.shutdowns.load(Ordering::SeqCst), expected);
        }
    }

    #[test]
    fn test_drop_shuts_transport_down() {
        let transport = MockTransport::default();
        {
            let session = session(20, 5);
            session.attach_transport(Box::new(transport.clone())).unwrap();
        }
        assert_eq!(transport.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dispose_disconnects_subscribers() {
        let session = session(20, 5);
        let rx = session.subscribe();
        session.dispose();
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let session = session(20, 5);
        let kept = session.subscribe();
        drop(session.subscribe());

        session.feed("x").unwrap();

        assert_eq!(drain(&kept).len(), 1);
        assert_eq!(session.subscribers.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_write_input_forwards_to_transport() {
        let session = session(20, 5);
        assert!(matches!(
            session.write_input("ls\r"),
            Err(SessionError::NoTransport)
        ));

        let transport = MockTransport::default();
        session.attach_transport(Box::new(transport.clone())).unwrap();
        session.write_input("ls\r").unwrap();

        assert_eq!(transport.sent.lock().unwrap().as_slice(), b"ls\r");
    }

    #[test]
    fn test_host_write_helpers() {
        let session = session(20, 6);
        session.feed("\x1b[31m").unwrap();

        session.write_line("header").unwrap();
        session.write_output("> ").unwrap();
        session.write_lines(&["one", "two"]).unwrap();

        let snapshot = session.snapshot();
        assert_eq!(snapshot.row_text(0), "header");
        assert_eq!(snapshot.row_text(1), "> one");
        assert_eq!(snapshot.row_text(2), "two");
        assert_eq!((snapshot.cursor.x, snapshot.cursor.y), (0, 1));
        assert_eq!(snapshot.attributes, Default::default());

        session.write_cursor_down(2).unwrap();
        assert_eq!(session.snapshot().cursor.y, 3);
        session.write_cursor_up(1).unwrap();
        assert_eq!(session.snapshot().cursor.y, 2);

        session.clear().unwrap();
        let snapshot = session.snapshot();
        assert_eq!(snapshot.text(), "");
        assert_eq!((snapshot.cursor.x, snapshot.cursor.y), (0, 0));
    }

    #[test]
    fn test_reader_feeds_until_eof() {
        let session = Arc::new(session(20, 5));
        let rx = session.subscribe();

        session.spawn_reader(io::Cursor::new(b"\x1b]0;replay\x07ready\r\n$ ".to_vec()));

        let finished = loop {
            if let SessionEvent::Finished(error) = rx.recv_timeout(Duration::from_secs(5)).unwrap() {
                break error;
            }
        };
        assert!(finished.is_none());

        let snapshot = session.snapshot();
        assert_eq!(snapshot.title, "replay");
        assert_eq!(snapshot.text(), "ready\n$");
    }

    #[test]
    fn test_reader_error_fails_session() {
        let session = Arc::new(session(20, 5));
        let rx = session.subscribe();

        session.spawn_reader(FailingReader);

        match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            SessionEvent::Finished(Some(e)) => {
                assert!(matches!(&*e, TransportError::Io(err) if err.kind() == io::ErrorKind::BrokenPipe))
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(session.lifecycle(), Lifecycle::Finished);
    }

    #[test]
    fn test_concurrent_feed_and_resize() {
        let session = Arc::new(session(40, 5));

        let feeder = {
            let session = session.clone();
            thread::spawn(move || {
                for i in 0..500 {
                    let ch = if i % 2 == 0 { 'a' } else { 'b' };
                    let line: String = std::iter::repeat(ch).take(10).collect();
                    session.feed(&format!("\x1b[H{}", line)).unwrap();
                }
            })
        };
        let resizer = {
            let session = session.clone();
            thread::spawn(move || {
                for i in 0..500 {
                    let columns = if i % 2 == 0 { 20 } else { 40 };
                    session.resize(TerminalSize::new(columns, 5)).unwrap();
                }
            })
        };

        for _ in 0..500 {
            let row = session.snapshot().row_text(0);
            assert!(
                row.is_empty() || row == "aaaaaaaaaa" || row == "bbbbbbbbbb",
                "partially applied batch: {:?}",
                row
            );
        }

        feeder.join().unwrap();
        resizer.join().unwrap();
        assert_eq!(session.snapshot().row_text(0), "bbbbbbbbbb");
    }
}
