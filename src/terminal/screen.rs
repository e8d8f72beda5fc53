//! Character grid driven by parsed ANSI actions.
//!
//! Only what colored CLI output needs is interpreted: cursor movement, erase,
//! SGR styles and a handful of line edits. Lines scrolled off the top are
//! dropped and private modes (alternate screen, cursor visibility) are
//! ignored, so the rendered buffer is always flat.

use super::parser::Action;

const TAB_WIDTH: usize = 8;

/// Foreground or background color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Color {
    /// Terminal default
    #[default]
    Default,
    /// One of the 16 basic colors; 8..=15 are the bright variants
    Named(u8),
    /// 256-color palette index
    Indexed(u8),
    /// 24-bit color
    Rgb(u8, u8, u8),
}

impl Color {
    fn push_sgr(self, background: bool, out: &mut Vec<String>) {
        let (base, bright, extended) = if background {
            (40, 100, 48)
        } else {
            (30, 90, 38)
        };
        match self {
            Color::Default => {}
            Color::Named(n) if n < 8 => out.push((base + u16::from(n)).to_string()),
            Color::Named(n) => out.push((bright + u16::from(n - 8)).to_string()),
            Color::Indexed(n) => out.push(format!("{};5;{}", extended, n)),
            Color::Rgb(r, g, b) => out.push(format!("{};2;{};{};{}", extended, r, g, b)),
        }
    }
}

/// Graphic rendition of a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Style {
    /// Foreground color
    pub fg: Color,
    /// Background color
    pub bg: Color,
    /// Bold
    pub bold: bool,
    /// Faint
    pub dim: bool,
    /// Italic
    pub italic: bool,
    /// Underline
    pub underline: bool,
    /// Swap foreground and background
    pub reverse: bool,
}

impl Style {
    /// SGR sequence selecting this style from any previous one
    fn sgr(&self) -> String {
        let mut params = vec!["0".to_string()];
        for (on, code) in [
            (self.bold, "1"),
            (self.dim, "2"),
            (self.italic, "3"),
            (self.underline, "4"),
            (self.reverse, "7"),
        ] {
            if on {
                params.push(code.to_string());
            }
        }
        self.fg.push_sgr(false, &mut params);
        self.bg.push_sgr(true, &mut params);
        format!("\x1b[{}m", params.join(";"))
    }

    /// Background-only style used for erased cells
    fn erased(&self) -> Style {
        Style {
            bg: self.bg,
            ..Style::default()
        }
    }
}

/// One grid position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    /// Character shown
    pub ch: char,
    /// Its style
    pub style: Style,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            ch: ' ',
            style: Style::default(),
        }
    }
}

impl Cell {
    fn blank(style: Style) -> Self {
        Self { ch: ' ', style }
    }

    fn is_blank(&self) -> bool {
        self.ch == ' ' && self.style.bg == Color::Default && !self.style.reverse
    }
}

#[derive(Debug, Clone, Copy)]
struct SavedCursor {
    row: usize,
    col: usize,
    style: Style,
}

/// Terminal screen buffer
#[derive(Debug, Clone)]
pub struct Screen {
    rows: usize,
    cols: usize,
    grid: Vec<Vec<Cell>>,
    row: usize,
    col: usize,
    wrap_pending: bool,
    style: Style,
    saved: Option<SavedCursor>,
}

impl Screen {
    /// Blank screen; dimensions are clamped to at least 1x1
    pub fn new(rows: u16, cols: u16) -> Self {
        let rows = usize::from(rows.max(1));
        let cols = usize::from(cols.max(1));
        Self {
            rows,
            cols,
            grid: vec![vec![Cell::default(); cols]; rows],
            row: 0,
            col: 0,
            wrap_pending: false,
            style: Style::default(),
            saved: None,
        }
    }

    /// Screen size as `(rows, cols)`
    pub fn size(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Cursor position as `(row, col)`
    pub fn cursor(&self) -> (usize, usize) {
        (self.row, self.col)
    }

    /// Cell at a position, if inside the grid
    pub fn cell(&self, row: usize, col: usize) -> Option<&Cell> {
        self.grid.get(row).and_then(|line| line.get(col))
    }

    /// Change dimensions, keeping the top-left region
    pub fn resize(&mut self, rows: u16, cols: u16) {
        let rows = usize::from(rows.max(1));
        let cols = usize::from(cols.max(1));
        self.grid.resize(rows, vec![Cell::default(); cols]);
        for line in &mut self.grid {
            line.resize(cols, Cell::default());
        }
        self.rows = rows;
        self.cols = cols;
        self.row = self.row.min(rows - 1);
        self.col = self.col.min(cols - 1);
        self.wrap_pending = false;
    }

    /// Clear everything and reset cursor and style
    pub fn reset(&mut self) {
        *self = Screen::new(self.rows as u16, self.cols as u16);
    }

    /// Apply one parsed action
    pub fn apply(&mut self, action: &Action) {
        match action {
            Action::Print(ch) => self.print(*ch),
            Action::Control(byte) => self.control(*byte),
            Action::Csi {
                params,
                private,
                action,
            } => {
                if private.is_none() {
                    self.csi(params, *action);
                }
            }
            Action::Esc {
                intermediate: None,
                action,
            } => self.esc(*action),
            Action::Esc { .. } => {}
        }
    }

    fn print(&mut self, ch: char) {
        if self.wrap_pending {
            self.col = 0;
            self.line_feed();
            self.wrap_pending = false;
        }
        self.grid[self.row][self.col] = Cell {
            ch,
            style: self.style,
        };
        if self.col + 1 >= self.cols {
            self.wrap_pending = true;
        } else {
            self.col += 1;
        }
    }

    fn control(&mut self, byte: u8) {
        match byte {
            0x08 => {
                self.col = self.col.saturating_sub(1);
                self.wrap_pending = false;
            }
            0x09 => {
                self.col = ((self.col / TAB_WIDTH + 1) * TAB_WIDTH).min(self.cols - 1);
            }
            0x0A..=0x0C => self.line_feed(),
            0x0D => {
                self.col = 0;
                self.wrap_pending = false;
            }
            _ => {}
        }
    }

    fn esc(&mut self, action: u8) {
        match action {
            b'7' => self.save_cursor(),
            b'8' => self.restore_cursor(),
            b'D' => self.line_feed(),
            b'E' => {
                self.col = 0;
                self.line_feed();
            }
            b'M' => self.reverse_index(),
            b'c' => self.reset(),
            _ => {}
        }
    }

    fn csi(&mut self, params: &[u16], action: u8) {
        // Count-style parameter: missing or zero means 1
        let count = |i: usize| usize::from(params.get(i).copied().filter(|&v| v != 0).unwrap_or(1));
        let mode = params.first().copied().unwrap_or(0);

        match action {
            b'A' => self.move_to(self.row.saturating_sub(count(0)), self.col),
            b'B' | b'e' => self.move_to(self.row + count(0), self.col),
            b'C' | b'a' => self.move_to(self.row, self.col + count(0)),
            b'D' => self.move_to(self.row, self.col.saturating_sub(count(0))),
            b'E' => self.move_to(self.row + count(0), 0),
            b'F' => self.move_to(self.row.saturating_sub(count(0)), 0),
            b'G' | b'`' => self.move_to(self.row, count(0) - 1),
            b'd' => self.move_to(count(0) - 1, self.col),
            b'H' | b'f' => self.move_to(count(0) - 1, count(1) - 1),
            b'J' => self.erase_display(mode),
            b'K' => self.erase_line(mode),
            b'X' => {
                let blank = Cell::blank(self.style.erased());
                let end = (self.col + count(0)).min(self.cols);
                self.grid[self.row][self.col..end].fill(blank);
            }
            b'P' => {
                let blank = Cell::blank(self.style.erased());
                let n = count(0).min(self.cols - self.col);
                let line = &mut self.grid[self.row];
                line[self.col..].rotate_left(n);
                let len = line.len();
                line[len - n..].fill(blank);
            }
            b'@' => {
                let blank = Cell::blank(self.style.erased());
                let n = count(0).min(self.cols - self.col);
                let line = &mut self.grid[self.row];
                line[self.col..].rotate_right(n);
                line[self.col..self.col + n].fill(blank);
            }
            b'L' => {
                for _ in 0..count(0).min(self.rows - self.row) {
                    self.grid.pop();
                    self.grid.insert(self.row, vec![Cell::default(); self.cols]);
                }
            }
            b'M' => {
                for _ in 0..count(0).min(self.rows - self.row) {
                    self.grid.remove(self.row);
                    self.grid.push(vec![Cell::default(); self.cols]);
                }
            }
            b'S' => {
                for _ in 0..count(0).min(self.rows) {
                    self.scroll_up();
                }
            }
            b'T' => {
                for _ in 0..count(0).min(self.rows) {
                    self.grid.pop();
                    self.grid.insert(0, vec![Cell::default(); self.cols]);
                }
            }
            b'm' => self.sgr(params),
            b's' => self.save_cursor(),
            b'u' => self.restore_cursor(),
            _ => log::trace!("ignoring CSI {}", action as char),
        }
    }

    fn move_to(&mut self, row: usize, col: usize) {
        self.row = row.min(self.rows - 1);
        self.col = col.min(self.cols - 1);
        self.wrap_pending = false;
    }

    fn line_feed(&mut self) {
        if self.row + 1 >= self.rows {
            self.scroll_up();
        } else {
            self.row += 1;
        }
    }

    fn reverse_index(&mut self) {
        if self.row == 0 {
            self.grid.pop();
            self.grid.insert(0, vec![Cell::default(); self.cols]);
        } else {
            self.row -= 1;
        }
    }

    fn scroll_up(&mut self) {
        self.grid.remove(0);
        self.grid.push(vec![Cell::default(); self.cols]);
    }

    fn save_cursor(&mut self) {
        self.saved = Some(SavedCursor {
            row: self.row,
            col: self.col,
            style: self.style,
        });
    }

    fn restore_cursor(&mut self) {
        if let Some(saved) = self.saved {
            self.style = saved.style;
            self.move_to(saved.row, saved.col);
        } else {
            self.move_to(0, 0);
        }
    }

    fn erase_display(&mut self, mode: u16) {
        let blank = Cell::blank(self.style.erased());
        match mode {
            0 => {
                self.grid[self.row][self.col..].fill(blank);
                for line in &mut self.grid[self.row + 1..] {
                    line.fill(blank);
                }
            }
            1 => {
                for line in &mut self.grid[..self.row] {
                    line.fill(blank);
                }
                self.grid[self.row][..=self.col].fill(blank);
            }
            2 | 3 => {
                for line in &mut self.grid {
                    line.fill(blank);
                }
            }
            _ => {}
        }
    }

    fn erase_line(&mut self, mode: u16) {
        let blank = Cell::blank(self.style.erased());
        let line = &mut self.grid[self.row];
        match mode {
            0 => line[self.col..].fill(blank),
            1 => line[..=self.col].fill(blank),
            2 => line.fill(blank),
            _ => {}
        }
    }

    fn sgr(&mut self, params: &[u16]) {
        if params.is_empty() {
            self.style = Style::default();
            return;
        }

        let mut i = 0;
        while i < params.len() {
            match params[i] {
                0 => self.style = Style::default(),
                1 => self.style.bold = true,
                2 => self.style.dim = true,
                3 => self.style.italic = true,
                4 => self.style.underline = true,
                7 => self.style.reverse = true,
                22 => {
                    self.style.bold = false;
                    self.style.dim = false;
                }
                23 => self.style.italic = false,
                24 => self.style.underline = false,
                27 => self.style.reverse = false,
                n @ 30..=37 => self.style.fg = Color::Named((n - 30) as u8),
                n @ 40..=47 => self.style.bg = Color::Named((n - 40) as u8),
                n @ 90..=97 => self.style.fg = Color::Named((n - 90 + 8) as u8),
                n @ 100..=107 => self.style.bg = Color::Named((n - 100 + 8) as u8),
                39 => self.style.fg = Color::Default,
                49 => self.style.bg = Color::Default,
                38 | 48 => {
                    let (color, used) = extended_color(&params[i + 1..]);
                    if let Some(color) = color {
                        if params[i] == 38 {
                            self.style.fg = color;
                        } else {
                            self.style.bg = color;
                        }
                    }
                    i += used;
                }
                _ => {}
            }
            i += 1;
        }
    }

    /// Visible content with SGR codes, trailing blank rows and columns
    /// trimmed. A style sequence is written only where the style changes.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let mut current = Style::default();

        for (index, line) in self.visible_rows().iter().enumerate() {
            if index > 0 {
                out.push('\n');
            }
            let end = line
                .iter()
                .rposition(|cell| !cell.is_blank())
                .map_or(0, |p| p + 1);
            for cell in &line[..end] {
                if cell.style != current {
                    out.push_str(&cell.style.sgr());
                    current = cell.style;
                }
                out.push(cell.ch);
            }
            if current != Style::default() {
                out.push_str("\x1b[0m");
                current = Style::default();
            }
        }
        out
    }

    /// Visible text without styles, trailing whitespace trimmed
    pub fn render_plain(&self) -> String {
        self.visible_rows()
            .iter()
            .map(|line| {
                line.iter()
                    .map(|cell| cell.ch)
                    .collect::<String>()
                    .trim_end()
                    .to_string()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn visible_rows(&self) -> &[Vec<Cell>] {
        let last = self
            .grid
            .iter()
            .rposition(|line| line.iter().any(|cell| !cell.is_blank()))
            .map_or(0, |p| p + 1);
        &self.grid[..last]
    }
}

/// Parse `5;n` or `2;r;g;b` after a 38/48; returns the color and how many
/// parameters it consumed
fn extended_color(rest: &[u16]) -> (Option<Color>, usize) {
    match rest {
        [5, n, ..] => (Some(Color::Indexed((*n).min(255) as u8)), 2),
        [2, r, g, b, ..] => (
            Some(Color::Rgb(
                (*r).min(255) as u8,
                (*g).min(255) as u8,
                (*b).min(255) as u8,
            )),
            4,
        ),
        [5] | [2, ..] => (None, rest.len()),
        _ => (None, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::super::parser::Parser;
    use super::*;

    fn screen_with(rows: u16, cols: u16, input: &[u8]) -> Screen {
        let mut screen = Screen::new(rows, cols);
        let mut parser = Parser::new();
        parser.advance(input, |action| screen.apply(&action));
        screen
    }

    #[test]
    fn test_plain_text_and_newlines() {
        let screen = screen_with(5, 20, b"hello\r\nworld");
        assert_eq!(screen.render_plain(), "hello\nworld");
        assert_eq!(screen.render(), "hello\nworld");
    }

    #[test]
    fn test_trailing_blank_rows_and_columns_trimmed() {
        let screen = screen_with(10, 40, b"a   \r\n\r\n");
        assert_eq!(screen.render(), "a");
    }

    #[test]
    fn test_sgr_emitted_only_on_change() {
        let screen = screen_with(3, 20, b"\x1b[31mab\x1b[31mc\x1b[0md");
        assert_eq!(screen.render(), "\x1b[0;31mabc\x1b[0md");
    }

    #[test]
    fn test_color_families_are_preserved() {
        let screen = screen_with(3, 40, b"\x1b[92ma\x1b[38;5;208mb\x1b[38;2;1;2;3mc\x1b[44md");
        let rendered = screen.render();
        assert!(rendered.contains("\x1b[0;92ma"));
        assert!(rendered.contains("\x1b[0;38;5;208mb"));
        assert!(rendered.contains("\x1b[0;38;2;1;2;3mc"));
        assert!(rendered.contains("\x1b[0;38;2;1;2;3;44md"));
        assert!(rendered.ends_with("\x1b[0m"));
    }

    #[test]
    fn test_carriage_return_overwrites_spinner() {
        let screen = screen_with(3, 20, b"working |\rworking /\rdone\x1b[K");
        assert_eq!(screen.render_plain(), "done");
    }

    #[test]
    fn test_cursor_positioning_and_erase_display() {
        let screen = screen_with(4, 10, b"xxxx\r\nyyyy\x1b[2J\x1b[2;3Hz");
        assert_eq!(screen.render_plain(), "\n  z");
        assert_eq!(screen.cursor(), (1, 3));
    }

    #[test]
    fn test_wrap_and_scroll_drop_top_line() {
        let screen = screen_with(2, 3, b"abcdefg");
        assert_eq!(screen.render_plain(), "def\ng");
    }

    #[test]
    fn test_private_modes_ignored() {
        let screen = screen_with(3, 10, b"\x1b[?1049h\x1b[?25lok\x1b[?1049l");
        assert_eq!(screen.render_plain(), "ok");
    }

    #[test]
    fn test_resize_keeps_content_and_clamps_cursor() {
        let mut screen = screen_with(5, 10, b"abcdef\r\n\r\n\r\nx");
        screen.resize(2, 3);
        assert_eq!(screen.size(), (2, 3));
        assert_eq!(screen.render_plain(), "abc");
        let (row, col) = screen.cursor();
        assert!(row < 2 && col < 3);
    }

    #[test]
    fn test_save_and_restore_cursor() {
        let screen = screen_with(3, 10, b"ab\x1b7\r\nzz\x1b8c");
        assert_eq!(screen.render_plain(), "abc\nzz");
    }

    #[test]
    fn test_erased_background_is_kept() {
        let screen = screen_with(2, 4, b"\x1b[41m\x1b[K");
        assert_eq!(screen.cell(0, 3).map(|c| c.style.bg), Some(Color::Named(1)));
        assert!(screen.render().starts_with("\x1b[0;41m    "));
    }
}
