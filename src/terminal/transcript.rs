//! Plain-text transcript of a whole command run.
//!
//! Unlike the screen, nothing is lost to scrolling: every line the command
//! produced is kept. Carriage returns and erase-line sequences are honored so
//! progress spinners collapse to their final state instead of repeating.

use super::parser::{Action, Parser};

/// Accumulates plain lines from parsed actions
#[derive(Debug, Default)]
pub struct Transcript {
    lines: Vec<String>,
    current: Vec<char>,
    col: usize,
}

impl Transcript {
    /// Empty transcript
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one parsed action
    pub fn apply(&mut self, action: &Action) {
        match action {
            Action::Print(ch) => self.put(*ch),
            Action::Control(b'\r') => self.col = 0,
            Action::Control(b'\n') => self.finish_line(),
            Action::Control(0x08) => self.col = self.col.saturating_sub(1),
            Action::Control(b'\t') => {
                let next = (self.col / 8 + 1) * 8;
                while self.col < next {
                    self.put(' ');
                }
            }
            Action::Csi {
                params,
                private: None,
                action,
            } => {
                let first = params.first().copied().unwrap_or(0);
                match action {
                    b'K' => match first {
                        0 => self.current.truncate(self.col),
                        2 => self.current.clear(),
                        _ => {}
                    },
                    b'G' => self.col = usize::from(first.max(1)) - 1,
                    b'C' => self.col += usize::from(first.max(1)),
                    b'D' => self.col = self.col.saturating_sub(usize::from(first.max(1))),
                    _ => {}
                }
            }
            _ => {}
        }
    }

    fn put(&mut self, ch: char) {
        while self.current.len() < self.col {
            self.current.push(' ');
        }
        if self.col < self.current.len() {
            self.current[self.col] = ch;
        } else {
            self.current.push(ch);
        }
        self.col += 1;
    }

    fn finish_line(&mut self) {
        let line: String = self.current.iter().collect();
        self.lines.push(line.trim_end().to_string());
        self.current.clear();
        self.col = 0;
    }

    /// Collected text; a trailing partial line is included
    pub fn text(&self) -> String {
        let mut lines = self.lines.clone();
        let partial: String = self.current.iter().collect();
        let partial = partial.trim_end();
        if !partial.is_empty() {
            lines.push(partial.to_string());
        }
        while lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }
        lines.join("\n")
    }
}

/// Plain transcript of a raw terminal byte stream
pub fn plain_transcript(raw: &[u8]) -> String {
    let mut parser = Parser::new();
    let mut transcript = Transcript::new();
    parser.advance(raw, |action| transcript.apply(&action));
    transcript.text()
}
