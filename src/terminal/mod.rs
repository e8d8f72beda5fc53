//! Minimal terminal emulation for captured command output.
//!
//! [`Terminal`] keeps a live screen for progressive display while
//! [`plain_transcript`] turns the full raw byte stream into text once the
//! command is done.

mod parser;
mod screen;
mod transcript;

pub use parser::{Action, Parser};
pub use screen::{Cell, Color, Screen, Style};
pub use transcript::{Transcript, plain_transcript};

/// Parser and screen fed from one byte stream
#[derive(Debug)]
pub struct Terminal {
    parser: Parser,
    screen: Screen,
}

impl Terminal {
    /// Terminal of the given size
    pub fn new(rows: u16, cols: u16) -> Self {
        Self {
            parser: Parser::new(),
            screen: Screen::new(rows, cols),
        }
    }

    /// Feed raw output bytes
    pub fn feed(&mut self, bytes: &[u8]) {
        let screen = &mut self.screen;
        self.parser.advance(bytes, |action| screen.apply(&action));
    }

    /// Resize the screen buffer
    pub fn resize(&mut self, rows: u16, cols: u16) {
        self.screen.resize(rows, cols);
    }

    /// Current screen with styles
    pub fn render(&self) -> String {
        self.screen.render()
    }

    /// Underlying screen
    pub fn screen(&self) -> &Screen {
        &self.screen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_in_pieces() {
        let mut term = Terminal::new(4, 20);
        term.feed(b"\x1b[3");
        term.feed(b"3mwarn\x1b[0m: x\r\n");
        assert_eq!(term.render(), "\x1b[0;33mwarn\x1b[0m: x");
        assert_eq!(term.screen().render_plain(), "warn: x");
    }
}
