//! VT sequence decoder
//!
//! Turns a character stream into [`TerminalCode`]s. The decoder is a
//! resumable state machine: input may be split anywhere, and an unfinished
//! sequence at the end of one call is completed by the next.
//!
//! Malformed or unsupported sequences are consumed silently; nothing in the
//! input can make the decoder fail.

use std::borrow::Cow;

use super::code::{Mode, Sgr, TerminalCode};

/// Maximum number of CSI parameters kept; extra ones are ignored
const MAX_PARAMS: usize = 16;

/// Maximum OSC payload length in bytes; extra chars are dropped
const MAX_OSC_LEN: usize = 4096;

/// Decoder state machine
pub struct Decoder {
    state: ParserState,
    params: Vec<u16>,
    current_param: Option<u16>,
    private_marker: Option<char>,
    intermediates: Vec<char>,
    osc_string: String,
    /// Printable run not yet emitted
    text: String,
    /// Incomplete UTF-8 sequence from the previous `parse_bytes` call
    utf8_pending: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum ParserState {
    #[default]
    Ground,
    Escape,
    EscapeIntermediate,
    CsiEntry,
    CsiParam,
    CsiIntermediate,
    CsiIgnore,
    OscString,
    /// ESC received within OSC, waiting for backslash
    OscEscape,
    /// DCS, SOS, PM or APC payload, discarded up to ST
    IgnoreString,
    /// ESC received within an ignored string
    IgnoreEscape,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            state: ParserState::Ground,
            params: Vec::with_capacity(MAX_PARAMS),
            current_param: None,
            private_marker: None,
            intermediates: Vec::with_capacity(4),
            osc_string: String::new(),
            text: String::new(),
            utf8_pending: Vec::with_capacity(4),
        }
    }

    /// Whether the decoder is between sequences
    pub fn is_ground(&self) -> bool {
        self.state == ParserState::Ground && self.utf8_pending.is_empty()
    }

    /// Decode a chunk of characters
    pub fn parse(&mut self, input: &str) -> Vec<TerminalCode> {
        let mut codes = Vec::new();
        for ch in input.chars() {
            self.advance(ch, &mut codes);
        }
        self.flush_text(&mut codes);
        codes
    }

    /// Decode a chunk of UTF-8 bytes
    ///
    /// A code point split across chunks is completed by the next call;
    /// invalid sequences become U+FFFD.
    pub fn parse_bytes(&mut self, bytes: &[u8]) -> Vec<TerminalCode> {
        let input: Cow<'_, [u8]> = if self.utf8_pending.is_empty() {
            Cow::Borrowed(bytes)
        } else {
            let mut joined = std::mem::take(&mut self.utf8_pending);
            joined.extend_from_slice(bytes);
            Cow::Owned(joined)
        };

        let mut codes = Vec::new();
        let mut rest: &[u8] = &input;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    self.advance_str(valid, &mut codes);
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    if let Ok(valid) = std::str::from_utf8(valid) {
                        self.advance_str(valid, &mut codes);
                    }
                    match err.error_len() {
                        Some(len) => {
                            self.advance(char::REPLACEMENT_CHARACTER, &mut codes);
                            rest = &after[len..];
                        }
                        None => {
                            self.utf8_pending.extend_from_slice(after);
                            break;
                        }
                    }
                }
            }
        }
        self.flush_text(&mut codes);
        codes
    }

    fn advance_str(&mut self, input: &str, codes: &mut Vec<TerminalCode>) {
        for ch in input.chars() {
            self.advance(ch, codes);
        }
    }

    /// Feed a single character
    fn advance(&mut self, ch: char, codes: &mut Vec<TerminalCode>) {
        // C0 controls are executed anywhere except inside a string
        if ch < '\u{20}' && !self.in_string() {
            self.execute_control(ch, codes);
            return;
        }

        match self.state {
            ParserState::Ground => self.ground(ch),
            ParserState::Escape => self.escape(ch, codes),
            ParserState::EscapeIntermediate => self.escape_intermediate(ch),
            ParserState::CsiEntry => self.csi_entry(ch, codes),
            ParserState::CsiParam => self.csi_param(ch, codes),
            ParserState::CsiIntermediate => self.csi_intermediate(ch, codes),
            ParserState::CsiIgnore => self.csi_ignore(ch),
            ParserState::OscString => self.osc_string_state(ch, codes),
            ParserState::OscEscape => self.osc_escape(ch, codes),
            ParserState::IgnoreString => self.ignore_string(ch),
            ParserState::IgnoreEscape => self.ignore_escape(ch, codes),
        }
    }

    fn in_string(&self) -> bool {
        matches!(
            self.state,
            ParserState::OscString
                | ParserState::OscEscape
                | ParserState::IgnoreString
                | ParserState::IgnoreEscape
        )
    }

    fn flush_text(&mut self, codes: &mut Vec<TerminalCode>) {
        if !self.text.is_empty() {
            codes.push(TerminalCode::Text(std::mem::take(&mut self.text)));
        }
    }

    fn emit(&mut self, code: TerminalCode, codes: &mut Vec<TerminalCode>) {
        self.flush_text(codes);
        codes.push(code);
    }

    fn execute_control(&mut self, ch: char, codes: &mut Vec<TerminalCode>) {
        match ch {
            '\x1b' => {
                self.flush_text(codes);
                self.enter_escape();
            }
            '\n' | '\x0b' | '\x0c' => self.emit(TerminalCode::LineFeed, codes),
            '\r' => self.emit(TerminalCode::CarriageReturn, codes),
            '\x08' => self.emit(TerminalCode::Backspace, codes),
            '\t' => self.emit(TerminalCode::Tab, codes),
            // CAN / SUB abort any sequence in progress
            '\x18' | '\x1a' => {
                self.flush_text(codes);
                self.state = ParserState::Ground;
            }
            // BEL and the rest are consumed
            _ => self.flush_text(codes),
        }
    }

    fn enter_escape(&mut self) {
        self.state = ParserState::Escape;
        self.params.clear();
        self.intermediates.clear();
        self.current_param = None;
        self.private_marker = None;
    }

    fn ground(&mut self, ch: char) {
        // DEL and C1 controls are dropped
        if !ch.is_control() {
            self.text.push(ch);
        }
    }

    fn escape(&mut self, ch: char, codes: &mut Vec<TerminalCode>) {
        self.state = ParserState::Ground;
        let code = match ch {
            '[' => {
                self.state = ParserState::CsiEntry;
                return;
            }
            ']' => {
                self.state = ParserState::OscString;
                self.osc_string.clear();
                return;
            }
            'P' | 'X' | '^' | '_' => {
                self.state = ParserState::IgnoreString;
                return;
            }
            '\u{20}'..='\u{2f}' => {
                // Charset designation and friends
                self.intermediates.push(ch);
                self.state = ParserState::EscapeIntermediate;
                return;
            }
            '7' => TerminalCode::SaveCursor,
            '8' => TerminalCode::RestoreCursor,
            'D' => TerminalCode::Index,
            'E' => TerminalCode::NextLine,
            'M' => TerminalCode::ReverseIndex,
            'c' => TerminalCode::FullReset,
            _ => {
                tracing::trace!("Unsupported ESC sequence: {:?}", ch);
                return;
            }
        };
        codes.push(code);
    }

    fn escape_intermediate(&mut self, ch: char) {
        match ch {
            '\u{20}'..='\u{2f}' => self.intermediates.push(ch),
            _ => {
                tracing::trace!(
                    "Ignored ESC sequence: intermediates={:?}, final={:?}",
                    self.intermediates,
                    ch
                );
                self.state = ParserState::Ground;
            }
        }
    }

    fn csi_entry(&mut self, ch: char, codes: &mut Vec<TerminalCode>) {
        match ch {
            '0'..='9' => {
                self.current_param = Some(ch as u16 - '0' as u16);
                self.state = ParserState::CsiParam;
            }
            ';' | ':' => {
                self.push_param(0);
                self.state = ParserState::CsiParam;
            }
            '?' | '>' | '<' | '=' => {
                self.private_marker = Some(ch);
            }
            '\u{20}'..='\u{2f}' => {
                self.intermediates.push(ch);
                self.state = ParserState::CsiIntermediate;
            }
            '@'..='~' => self.csi_dispatch(ch, codes),
            _ => self.state = ParserState::CsiIgnore,
        }
    }

    fn csi_param(&mut self, ch: char, codes: &mut Vec<TerminalCode>) {
        match ch {
            '0'..='9' => {
                let digit = ch as u16 - '0' as u16;
                self.current_param = Some(
                    self.current_param
                        .unwrap_or(0)
                        .saturating_mul(10)
                        .saturating_add(digit),
                );
            }
            ';' | ':' => {
                let param = self.current_param.take().unwrap_or(0);
                self.push_param(param);
            }
            // An empty last parameter (`1;m`) counts as 0
            '\u{20}'..='\u{2f}' => {
                let param = self.current_param.take().unwrap_or(0);
                self.push_param(param);
                self.intermediates.push(ch);
                self.state = ParserState::CsiIntermediate;
            }
            '@'..='~' => {
                let param = self.current_param.take().unwrap_or(0);
                self.push_param(param);
                self.csi_dispatch(ch, codes);
            }
            _ => self.state = ParserState::CsiIgnore,
        }
    }

    fn csi_intermediate(&mut self, ch: char, codes: &mut Vec<TerminalCode>) {
        match ch {
            '\u{20}'..='\u{2f}' => self.intermediates.push(ch),
            '@'..='~' => self.csi_dispatch(ch, codes),
            _ => self.state = ParserState::CsiIgnore,
        }
    }

    fn csi_ignore(&mut self, ch: char) {
        if ('@'..='~').contains(&ch) {
            self.state = ParserState::Ground;
        }
    }

    fn push_param(&mut self, param: u16) {
        if self.params.len() < MAX_PARAMS {
            self.params.push(param);
        }
    }

    fn csi_dispatch(&mut self, final_char: char, codes: &mut Vec<TerminalCode>) {
        self.state = ParserState::Ground;

        if !self.intermediates.is_empty() {
            tracing::trace!(
                "Unsupported CSI: intermediates={:?}, params={:?}, final={:?}",
                self.intermediates,
                self.params,
                final_char
            );
            return;
        }

        let params = &self.params;
        // Counts default to 1, and 0 means 1
        let count = |i: usize| params.get(i).copied().unwrap_or(0).max(1);
        // Positions are 1-indexed on the wire
        let position = |i: usize| params.get(i).copied().unwrap_or(1).saturating_sub(1);
        let value = |i: usize| params.get(i).copied().unwrap_or(0);

        let code = match (self.private_marker, final_char) {
            (None, 'A') => TerminalCode::CursorUp(count(0)),
            (None, 'B') => TerminalCode::CursorDown(count(0)),
            (None, 'C') => TerminalCode::CursorForward(count(0)),
            (None, 'D') => TerminalCode::CursorBack(count(0)),
            (None, 'E') => TerminalCode::CursorNextLine(count(0)),
            (None, 'F') => TerminalCode::CursorPrevLine(count(0)),
            (None, 'G') | (None, '`') => TerminalCode::CursorCharAbsolute(position(0)),
            (None, 'H') | (None, 'f') => TerminalCode::CursorPosition {
                line: position(0),
                column: position(1),
            },
            (None, 'd') => TerminalCode::LinePositionAbsolute(position(0)),
            (None, 'J') => TerminalCode::EraseInDisplay(value(0)),
            (None, 'K') => TerminalCode::EraseInLine(value(0)),
            (None, 'X') => TerminalCode::EraseChars(count(0)),
            (None, '@') => TerminalCode::InsertChars(count(0)),
            (None, 'P') => TerminalCode::DeleteChars(count(0)),
            (None, 'L') => TerminalCode::InsertLines(count(0)),
            (None, 'M') => TerminalCode::DeleteLines(count(0)),
            (None, 'S') => TerminalCode::ScrollUp(count(0)),
            (None, 'T') => TerminalCode::ScrollDown(count(0)),
            (None, 'r') => TerminalCode::SetScrollRegion {
                top: position(0),
                bottom: params.get(1).copied().filter(|&b| b > 0).map(|b| b - 1),
            },
            (None, 's') => TerminalCode::SaveCursor,
            (None, 'u') => TerminalCode::RestoreCursor,
            (None, 'm') => TerminalCode::CharAttributes(Sgr::parse_params(params)),
            (None | Some('?'), 'h' | 'l') => {
                let private = self.private_marker.is_some();
                for &param in params {
                    let mode = Mode::from_param(private, param);
                    codes.push(if final_char == 'h' {
                        TerminalCode::SetMode(mode)
                    } else {
                        TerminalCode::ResetMode(mode)
                    });
                }
                return;
            }
            _ => {
                tracing::trace!(
                    "Unsupported CSI: marker={:?}, params={:?}, final={:?}",
                    self.private_marker,
                    params,
                    final_char
                );
                return;
            }
        };
        codes.push(code);
    }

    fn osc_string_state(&mut self, ch: char, codes: &mut Vec<TerminalCode>) {
        match ch {
            // BEL or ST terminates OSC
            '\x07' | '\u{9c}' => {
                self.execute_osc(codes);
                self.state = ParserState::Ground;
            }
            '\x1b' => self.state = ParserState::OscEscape,
            '\x18' | '\x1a' => {
                self.osc_string.clear();
                self.state = ParserState::Ground;
            }
            _ if ch < '\u{20}' => {}
            _ => {
                if self.osc_string.len() < MAX_OSC_LEN {
                    self.osc_string.push(ch);
                }
            }
        }
    }

    /// Handle the char after ESC within an OSC sequence
    fn osc_escape(&mut self, ch: char, codes: &mut Vec<TerminalCode>) {
        self.execute_osc(codes);
        if ch == '\\' {
            self.state = ParserState::Ground;
        } else {
            // Not ST: the ESC starts a new sequence
            self.enter_escape();
            self.advance(ch, codes);
        }
    }

    fn ignore_string(&mut self, ch: char) {
        match ch {
            '\u{9c}' | '\x18' | '\x1a' => self.state = ParserState::Ground,
            '\x1b' => self.state = ParserState::IgnoreEscape,
            _ => {}
        }
    }

    fn ignore_escape(&mut self, ch: char, codes: &mut Vec<TerminalCode>) {
        if ch == '\\' {
            self.state = ParserState::Ground;
        } else {
            self.enter_escape();
            self.advance(ch, codes);
        }
    }

    fn execute_osc(&mut self, codes: &mut Vec<TerminalCode>) {
        let payload = std::mem::take(&mut self.osc_string);
        match payload.split_once(';') {
            Some(("0" | "1" | "2", title)) => {
                codes.push(TerminalCode::SetTitle(title.to_string()));
            }
            _ => tracing::trace!("Ignored OSC: {:?}", payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::term::state::{AttrFlags, Color};

    fn parse(input: &str) -> Vec<TerminalCode> {
        Decoder::new().parse(input)
    }

    fn text(s: &str) -> TerminalCode {
        TerminalCode::Text(s.to_string())
    }

    #[test]
    fn test_text_is_coalesced() {
        assert_eq!(parse("hello world"), vec![text("hello world")]);
    }

    #[test]
    fn test_line_controls_flush_text() {
        assert_eq!(
            parse("ab\r\ncd"),
            vec![
                text("ab"),
                TerminalCode::CarriageReturn,
                TerminalCode::LineFeed,
                text("cd"),
            ]
        );
    }

    #[test]
    fn test_erase_in_line_between_text() {
        let expected = vec![text("A"), TerminalCode::EraseInLine(2), text("B")];
        assert_eq!(parse("A\x1b[2KB"), expected);
    }

    #[test]
    fn test_resumes_across_every_split() {
        let input = "A\x1b[2KB";
        let expected = vec![text("A"), TerminalCode::EraseInLine(2), text("B")];

        for split in 0..=input.len() {
            let mut decoder = Decoder::new();
            let mut codes = decoder.parse(&input[..split]);
            codes.extend(decoder.parse(&input[split..]));
            assert_eq!(codes, expected, "split at {}", split);
            assert!(decoder.is_ground());
        }
    }

    #[test]
    fn test_resumes_one_char_at_a_time() {
        let mut decoder = Decoder::new();
        let mut codes = Vec::new();
        for ch in "\x1b]2;title\x07\x1b[3;7H".chars() {
            codes.extend(decoder.parse(&ch.to_string()));
        }
        assert_eq!(
            codes,
            vec![
                TerminalCode::SetTitle("title".to_string()),
                TerminalCode::CursorPosition { line: 2, column: 6 },
            ]
        );
    }

    #[test]
    fn test_cursor_position_is_zero_indexed() {
        assert_eq!(
            parse("\x1b[2;5H"),
            vec![TerminalCode::CursorPosition { line: 1, column: 4 }]
        );
        assert_eq!(
            parse("\x1b[H\x1b[;3f"),
            vec![
                TerminalCode::CursorPosition { line: 0, column: 0 },
                TerminalCode::CursorPosition { line: 0, column: 2 },
            ]
        );
    }

    #[test]
    fn test_parameter_defaults() {
        assert_eq!(
            parse("\x1b[A\x1b[0B\x1b[4G\x1b[K\x1b[J"),
            vec![
                TerminalCode::CursorUp(1),
                TerminalCode::CursorDown(1),
                TerminalCode::CursorCharAbsolute(3),
                TerminalCode::EraseInLine(0),
                TerminalCode::EraseInDisplay(0),
            ]
        );
    }

    #[test]
    fn test_parameters_saturate() {
        assert_eq!(
            parse("\x1b[99999999A"),
            vec![TerminalCode::CursorUp(u16::MAX)]
        );
        let many = format!("\x1b[{}m", vec!["1"; 40].join(";"));
        let codes = parse(&many);
        match &codes[..] {
            [TerminalCode::CharAttributes(changes)] => assert_eq!(changes.len(), MAX_PARAMS),
            other => panic!("unexpected codes: {:?}", other),
        }
    }

    #[test]
    fn test_sgr() {
        assert_eq!(
            parse("\x1b[1;31mX\x1b[m"),
            vec![
                TerminalCode::CharAttributes(vec![
                    Sgr::Set(AttrFlags::BOLD),
                    Sgr::Foreground(Color::Indexed(1)),
                ]),
                text("X"),
                TerminalCode::CharAttributes(vec![Sgr::Reset]),
            ]
        );
    }

    #[test]
    fn test_modes() {
        assert_eq!(
            parse("\x1b[?25l\x1b[?7;25h\x1b[4h"),
            vec![
                TerminalCode::ResetMode(Mode::ShowCursor),
                TerminalCode::SetMode(Mode::AutoWrap),
                TerminalCode::SetMode(Mode::ShowCursor),
                TerminalCode::SetMode(Mode::Other { private: false, code: 4 }),
            ]
        );
    }

    #[test]
    fn test_osc_title() {
        assert_eq!(
            parse("\x1b]0;my title\x07"),
            vec![TerminalCode::SetTitle("my title".to_string())]
        );
        assert_eq!(
            parse("\x1b]2;x;y\x1b\\z"),
            vec![TerminalCode::SetTitle("x;y".to_string()), text("z")]
        );
    }

    #[test]
    fn test_other_osc_dropped() {
        assert_eq!(parse("\x1b]52;c;aGVsbG8=\x07ok"), vec![text("ok")]);
        assert_eq!(parse("\x1b]no-separator\x07"), vec![]);
    }

    #[test]
    fn test_osc_interrupted_by_escape() {
        assert_eq!(
            parse("\x1b]0;t\x1b[2A"),
            vec![
                TerminalCode::SetTitle("t".to_string()),
                TerminalCode::CursorUp(2),
            ]
        );
    }

    #[test]
    fn test_osc_payload_is_capped() {
        let long = "x".repeat(MAX_OSC_LEN + 100);
        let codes = parse(&format!("\x1b]0;{}\x07", long));
        match &codes[..] {
            [TerminalCode::SetTitle(title)] => assert_eq!(title.len(), MAX_OSC_LEN - 2),
            other => panic!("unexpected codes: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_sequences_are_dropped() {
        assert_eq!(parse("a\x1b[5zb"), vec![text("a"), text("b")]);
        assert_eq!(parse("\x1b[>c\x1b[1 qx"), vec![text("x")]);
        assert_eq!(parse("\x1bQx"), vec![text("x")]);
        assert_eq!(parse("\x1b(Bx"), vec![text("x")]);
    }

    #[test]
    fn test_device_control_strings_are_discarded() {
        assert_eq!(parse("\x1bPq#0;2;0\x1b\\ok"), vec![text("ok")]);
        assert_eq!(parse("\x1b_app\ncmd\x1b\\\x1b^pm\x1b\\x"), vec![text("x")]);
        assert_eq!(
            parse("\x1bXsos\x1b[2Ay"),
            vec![TerminalCode::CursorUp(2), text("y")]
        );
    }

    #[test]
    fn test_device_control_string_split_across_calls() {
        let mut decoder = Decoder::new();
        assert_eq!(decoder.parse("a\x1bP1$r"), vec![text("a")]);
        assert_eq!(decoder.parse("0m\x1b"), vec![]);
        assert_eq!(decoder.parse("\\b"), vec![text("b")]);
    }

    #[test]
    fn test_trailing_empty_parameter() {
        assert_eq!(
            parse("\x1b[1;m"),
            vec![TerminalCode::CharAttributes(vec![
                Sgr::Set(AttrFlags::BOLD),
                Sgr::Reset,
            ])]
        );
        assert_eq!(
            parse("\x1b[5;H"),
            vec![TerminalCode::CursorPosition { line: 4, column: 0 }]
        );
    }

    #[test]
    fn test_escape_restarts_csi() {
        assert_eq!(parse("\x1b[12\x1b[3A"), vec![TerminalCode::CursorUp(3)]);
    }

    #[test]
    fn test_control_inside_csi_is_executed() {
        assert_eq!(
            parse("\x1b[1\n;2H"),
            vec![
                TerminalCode::LineFeed,
                TerminalCode::CursorPosition { line: 0, column: 1 },
            ]
        );
    }

    #[test]
    fn test_cancel_aborts_sequence() {
        assert_eq!(parse("\x1b[12\x18A"), vec![text("A")]);
    }

    #[test]
    fn test_single_char_escapes() {
        assert_eq!(
            parse("\x1b7\x1b8\x1bD\x1bE\x1bM\x1bc"),
            vec![
                TerminalCode::SaveCursor,
                TerminalCode::RestoreCursor,
                TerminalCode::Index,
                TerminalCode::NextLine,
                TerminalCode::ReverseIndex,
                TerminalCode::FullReset,
            ]
        );
    }

    #[test]
    fn test_scroll_region() {
        assert_eq!(
            parse("\x1b[2;10r\x1b[r"),
            vec![
                TerminalCode::SetScrollRegion { top: 1, bottom: Some(9) },
                TerminalCode::SetScrollRegion { top: 0, bottom: None },
            ]
        );
    }

    #[test]
    fn test_bytes_split_inside_code_point() {
        let bytes = "é!".as_bytes();
        let mut decoder = Decoder::new();

        assert_eq!(decoder.parse_bytes(&bytes[..1]), vec![]);
        assert!(!decoder.is_ground());
        assert_eq!(decoder.parse_bytes(&bytes[1..]), vec![text("é!")]);
        assert!(decoder.is_ground());
    }

    #[test]
    fn test_invalid_bytes_become_replacement() {
        let mut decoder = Decoder::new();
        assert_eq!(
            decoder.parse_bytes(b"a\xffb\x1b[1A"),
            vec![text("a\u{FFFD}b"), TerminalCode::CursorUp(1)]
        );
    }
}
