//! Byte-level ANSI escape sequence parser.
//!
//! Splits a raw PTY byte stream into printable characters, C0 controls, CSI
//! and ESC sequences. OSC and DCS-style strings are consumed and dropped.
//! The parser is incremental: sequences and UTF-8 characters may be split
//! across `advance` calls.

/// Maximum CSI parameters kept; extra ones are dropped
const MAX_PARAMS: usize = 16;

/// One parsed unit of terminal output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// A printable character
    Print(char),
    /// A C0 control byte (BS, HT, LF, CR, ...)
    Control(u8),
    /// Control Sequence Introducer sequence
    Csi {
        /// Numeric parameters; an omitted parameter is 0
        params: Vec<u16>,
        /// Private marker such as `?`
        private: Option<u8>,
        /// Final byte
        action: u8,
    },
    /// Two-byte escape sequence
    Esc {
        /// Intermediate byte, e.g. `(` in `ESC ( B`
        intermediate: Option<u8>,
        /// Final byte
        action: u8,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Ground,
    Escape,
    EscapeIntermediate,
    Csi,
    CsiIgnore,
    Osc,
    OscEscape,
    IgnoredString,
    IgnoredStringEscape,
}

#[derive(Debug, Default)]
struct Utf8Decoder {
    buf: [u8; 4],
    len: usize,
    need: usize,
}

impl Utf8Decoder {
    fn is_pending(&self) -> bool {
        self.need > 0
    }

    fn reset(&mut self) {
        self.len = 0;
        self.need = 0;
    }

    /// Feed one byte; emits decoded characters (U+FFFD for invalid input)
    fn push(&mut self, byte: u8, emit: &mut impl FnMut(char)) {
        if self.need > 0 {
            if byte & 0xC0 == 0x80 {
                self.buf[self.len] = byte;
                self.len += 1;
                if self.len == self.need + 1 {
                    let ch = std::str::from_utf8(&self.buf[..self.len])
                        .ok()
                        .and_then(|s| s.chars().next())
                        .unwrap_or(char::REPLACEMENT_CHARACTER);
                    self.reset();
                    emit(ch);
                }
                return;
            }
            self.reset();
            emit(char::REPLACEMENT_CHARACTER);
        }

        let need = match byte {
            0x00..=0x7F => {
                emit(byte as char);
                return;
            }
            0xC2..=0xDF => 1,
            0xE0..=0xEF => 2,
            0xF0..=0xF4 => 3,
            _ => {
                emit(char::REPLACEMENT_CHARACTER);
                return;
            }
        };
        self.buf[0] = byte;
        self.len = 1;
        self.need = need;
    }
}

/// Incremental ANSI parser
#[derive(Debug)]
pub struct Parser {
    state: State,
    params: Vec<u16>,
    current: Option<u16>,
    private: Option<u8>,
    intermediate: Option<u8>,
    utf8: Utf8Decoder,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    /// Create a parser in the ground state
    pub fn new() -> Self {
        Self {
            state: State::Ground,
            params: Vec::with_capacity(MAX_PARAMS),
            current: None,
            private: None,
            intermediate: None,
            utf8: Utf8Decoder::default(),
        }
    }

    /// Parse `bytes`, reporting each complete unit to `perform`
    pub fn advance(&mut self, bytes: &[u8], mut perform: impl FnMut(Action)) {
        for &byte in bytes {
            self.step(byte, &mut perform);
        }
    }

    fn begin_sequence(&mut self) {
        self.params.clear();
        self.current = None;
        self.private = None;
        self.intermediate = None;
    }

    fn push_param(&mut self) {
        if self.params.len() < MAX_PARAMS {
            self.params.push(self.current.unwrap_or(0));
        }
        self.current = None;
    }

    fn step(&mut self, byte: u8, perform: &mut impl FnMut(Action)) {
        // CAN and SUB abort any sequence
        if matches!(byte, 0x18 | 0x1A) && self.state != State::Ground {
            self.state = State::Ground;
            return;
        }

        match self.state {
            State::Ground => {
                if self.utf8.is_pending() && byte >= 0x80 {
                    self.utf8.push(byte, &mut |c| perform(Action::Print(c)));
                    return;
                }
                match byte {
                    0x1B => {
                        self.utf8.reset();
                        self.begin_sequence();
                        self.state = State::Escape;
                    }
                    0x00..=0x1F => {
                        self.utf8.reset();
                        perform(Action::Control(byte));
                    }
                    0x7F => {}
                    _ => self.utf8.push(byte, &mut |c| perform(Action::Print(c))),
                }
            }
            State::Escape => match byte {
                b'[' => self.state = State::Csi,
                b']' => self.state = State::Osc,
                b'P' | b'X' | b'^' | b'_' => self.state = State::IgnoredString,
                0x20..=0x2F => {
                    self.intermediate = Some(byte);
                    self.state = State::EscapeIntermediate;
                }
                0x30..=0x7E => {
                    perform(Action::Esc {
                        intermediate: None,
                        action: byte,
                    });
                    self.state = State::Ground;
                }
                0x1B => self.begin_sequence(),
                0x00..=0x1F => perform(Action::Control(byte)),
                _ => self.state = State::Ground,
            },
            State::EscapeIntermediate => match byte {
                0x20..=0x2F => self.intermediate = Some(byte),
                0x30..=0x7E => {
                    perform(Action::Esc {
                        intermediate: self.intermediate,
                        action: byte,
                    });
                    self.state = State::Ground;
                }
                _ => self.state = State::Ground,
            },
            State::Csi => match byte {
                b'0'..=b'9' => {
                    let digit = u16::from(byte - b'0');
                    let value = self.current.unwrap_or(0);
                    self.current = Some(value.saturating_mul(10).saturating_add(digit));
                }
                b';' | b':' => self.push_param(),
                b'<'..=b'?' => {
                    if self.params.is_empty() && self.current.is_none() && self.private.is_none() {
                        self.private = Some(byte);
                    } else {
                        self.state = State::CsiIgnore;
                    }
                }
                0x20..=0x2F => self.intermediate = Some(byte),
                0x40..=0x7E => {
                    if self.current.is_some() || !self.params.is_empty() {
                        self.push_param();
                    }
                    perform(Action::Csi {
                        params: std::mem::take(&mut self.params),
                        private: self.private,
                        action: byte,
                    });
                    self.state = State::Ground;
                }
                0x1B => {
                    self.begin_sequence();
                    self.state = State::Escape;
                }
                0x00..=0x1F => perform(Action::Control(byte)),
                _ => self.state = State::CsiIgnore,
            },
            State::CsiIgnore => {
                if (0x40..=0x7E).contains(&byte) {
                    self.state = State::Ground;
                }
            }
            State::Osc => match byte {
                0x07 => self.state = State::Ground,
                0x1B => self.state = State::OscEscape,
                _ => {}
            },
            State::OscEscape => {
                self.state = if byte == b'\\' {
                    State::Ground
                } else {
                    State::Osc
                };
            }
            State::IgnoredString => {
                if byte == 0x1B {
                    self.state = State::IgnoredStringEscape;
                }
            }
            State::IgnoredStringEscape => {
                self.state = if byte == b'\\' {
                    State::Ground
                } else {
                    State::IgnoredString
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(bytes: &[u8]) -> Vec<Action> {
        let mut actions = Vec::new();
        Parser::new().advance(bytes, |a| actions.push(a));
        actions
    }

    #[test]
    fn test_prints_and_controls() {
        assert_eq!(
            parse(b"a\r\n"),
            vec![
                Action::Print('a'),
                Action::Control(b'\r'),
                Action::Control(b'\n')
            ]
        );
    }

    #[test]
    fn test_csi_with_params_and_private_marker() {
        assert_eq!(
            parse(b"\x1b[1;31m\x1b[?25l\x1b[H"),
            vec![
                Action::Csi {
                    params: vec![1, 31],
                    private: None,
                    action: b'm'
                },
                Action::Csi {
                    params: vec![25],
                    private: Some(b'?'),
                    action: b'l'
                },
                Action::Csi {
                    params: vec![],
                    private: None,
                    action: b'H'
                },
            ]
        );
    }

    #[test]
    fn test_omitted_params_are_zero() {
        assert_eq!(
            parse(b"\x1b[;5H"),
            vec![Action::Csi {
                params: vec![0, 5],
                private: None,
                action: b'H'
            }]
        );
    }

    #[test]
    fn test_osc_title_is_dropped() {
        assert_eq!(parse(b"\x1b]0;title\x07x"), vec![Action::Print('x')]);
        assert_eq!(parse(b"\x1b]0;title\x1b\\y"), vec![Action::Print('y')]);
    }

    #[test]
    fn test_sequence_split_across_chunks() {
        let mut parser = Parser::new();
        let mut actions = Vec::new();
        parser.advance(b"\x1b[3", |a| actions.push(a));
        parser.advance(b"2mok", |a| actions.push(a));
        assert_eq!(
            actions,
            vec![
                Action::Csi {
                    params: vec![32],
                    private: None,
                    action: b'm'
                },
                Action::Print('o'),
                Action::Print('k'),
            ]
        );
    }

    #[test]
    fn test_utf8_split_across_chunks() {
        let bytes = "✓".as_bytes();
        let mut parser = Parser::new();
        let mut actions = Vec::new();
        parser.advance(&bytes[..1], |a| actions.push(a));
        parser.advance(&bytes[1..], |a| actions.push(a));
        assert_eq!(actions, vec![Action::Print('✓')]);
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        assert_eq!(
            parse(&[0xC3, b'a']),
            vec![
                Action::Print(char::REPLACEMENT_CHARACTER),
                Action::Print('a')
            ]
        );
    }

    #[test]
    fn test_charset_designation() {
        assert_eq!(
            parse(b"\x1b(B"),
            vec![Action::Esc {
                intermediate: Some(b'('),
                action: b'B'
            }]
        );
    }
}
