//! Colored terminal output for release operations.
//!
//! Status lines go through [`OutputManager`]. The PTY screen of the running
//! command is drawn by [`LiveScreen`], which redraws its own region in place
//! when stdout is a terminal and otherwise prints only the final frame.

use std::io::{IsTerminal, Write};
use termcolor::{BufferWriter, Color, ColorChoice, ColorSpec, WriteColor};

/// Output manager for consistent colored terminal output
#[derive(Debug)]
pub struct OutputManager {
    bufwtr: BufferWriter,
    verbose: bool,
    quiet: bool,
}

impl Clone for OutputManager {
    fn clone(&self) -> Self {
        Self::new(self.verbose, self.quiet)
    }
}

impl OutputManager {
    /// Create a new output manager
    pub fn new(verbose: bool, quiet: bool) -> Self {
        Self {
            bufwtr: BufferWriter::stdout(ColorChoice::Auto),
            verbose,
            quiet,
        }
    }

    fn tagged(&self, tag: &str, spec: &ColorSpec, message: &str) -> std::io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        let mut buffer = self.bufwtr.buffer();
        let _ = buffer.set_color(spec);
        let _ = write!(&mut buffer, "{}", tag);
        let _ = buffer.reset();
        let _ = writeln!(&mut buffer, " {}", message);
        self.bufwtr.print(&buffer)
    }

    /// Print an info message
    pub fn info(&self, message: &str) -> std::io::Result<()> {
        self.tagged("ℹ", ColorSpec::new().set_fg(Some(Color::Cyan)), message)
    }

    /// Print a success message
    pub fn success(&self, message: &str) -> std::io::Result<()> {
        self.tagged(
            "✓",
            ColorSpec::new().set_fg(Some(Color::Green)).set_bold(true),
            message,
        )
    }

    /// Print a warning message
    pub fn warn(&self, message: &str) -> std::io::Result<()> {
        self.tagged(
            "⚠",
            ColorSpec::new().set_fg(Some(Color::Yellow)).set_bold(true),
            message,
        )
    }

    /// Print an error message to stderr (never suppressed)
    pub fn error(&self, message: &str) {
        let bufwtr = BufferWriter::stderr(ColorChoice::Auto);
        let mut buffer = bufwtr.buffer();

        if buffer.set_color(ColorSpec::new().set_fg(Some(Color::Red)).set_bold(true)).is_err()
            || write!(&mut buffer, "✗").is_err()
            || buffer.reset().is_err()
            || writeln!(&mut buffer, " {}", message).is_err()
            || bufwtr.print(&buffer).is_err()
        {
            println!("[STDERR ERROR] ✗ {}", message);
        }
    }

    /// Print a message only in verbose mode
    pub fn verbose(&self, message: &str) -> std::io::Result<()> {
        if !self.verbose {
            return Ok(());
        }
        self.tagged("→", ColorSpec::new().set_fg(Some(Color::Blue)), message)
    }

    /// Print a step that is starting
    pub fn progress(&self, message: &str) -> std::io::Result<()> {
        self.tagged("⋯", ColorSpec::new().set_fg(Some(Color::Magenta)), message)
    }

    /// Print a section header
    pub fn section(&self, title: &str) -> std::io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        let mut buffer = self.bufwtr.buffer();
        let _ = writeln!(&mut buffer);
        let _ = buffer.set_color(ColorSpec::new().set_fg(Some(Color::Cyan)).set_bold(true));
        let _ = writeln!(&mut buffer, "═══ {} ═══", title);
        let _ = buffer.reset();
        self.bufwtr.print(&buffer)
    }

    /// Print a `label: value` line with a dimmed label
    pub fn field(&self, label: &str, value: &str) -> std::io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        let mut buffer = self.bufwtr.buffer();
        let _ = buffer.set_color(ColorSpec::new().set_dimmed(true));
        let _ = write!(&mut buffer, "  {:<14}", format!("{}:", label));
        let _ = buffer.reset();
        let _ = writeln!(&mut buffer, " {}", value);
        self.bufwtr.print(&buffer)
    }

    /// Print indented text (for sub-items)
    pub fn indent(&self, message: &str) -> std::io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        let mut buffer = self.bufwtr.buffer();
        for line in message.lines() {
            let _ = writeln!(&mut buffer, "    {}", line);
        }
        self.bufwtr.print(&buffer)
    }

    /// Print a plain message
    pub fn println(&self, message: &str) -> std::io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        let mut buffer = self.bufwtr.buffer();
        let _ = writeln!(&mut buffer, "{}", message);
        self.bufwtr.print(&buffer)
    }

    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Check if quiet mode is enabled
    pub fn is_quiet(&self) -> bool {
        self.quiet
    }
}

/// In-place view of the PTY screen
#[derive(Debug)]
pub struct LiveScreen {
    interactive: bool,
    quiet: bool,
    drawn_lines: usize,
    pending: Option<String>,
}

impl LiveScreen {
    /// Screen writing to stdout; redraws in place only on a terminal
    pub fn new(quiet: bool) -> Self {
        Self {
            interactive: std::io::stdout().is_terminal(),
            quiet,
            drawn_lines: 0,
            pending: None,
        }
    }

    /// Show a new frame
    pub fn draw(&mut self, frame: &str) {
        if self.quiet {
            return;
        }
        if !self.interactive {
            self.pending = Some(frame.to_string());
            return;
        }
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(redraw_sequence(self.drawn_lines, frame).as_bytes());
        let _ = stdout.flush();
        self.drawn_lines = frame_height(frame);
    }

    /// Leave the current frame in the scrollback so status lines print below it
    pub fn settle(&mut self) {
        if let Some(frame) = self.pending.take() {
            let mut stdout = std::io::stdout().lock();
            let _ = stdout.write_all(redraw_sequence(0, &frame).as_bytes());
        }
        self.drawn_lines = 0;
    }
}

fn frame_height(frame: &str) -> usize {
    if frame.is_empty() {
        0
    } else {
        frame.lines().count()
    }
}

/// Bytes that erase the previously drawn `previous` lines and print `frame`
fn redraw_sequence(previous: usize, frame: &str) -> String {
    let mut out = String::new();
    if previous > 0 {
        out.push_str(&format!("\x1b[{}F\x1b[J", previous));
    }
    for line in frame.lines() {
        out.push_str(line);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redraw_moves_up_over_previous_frame() {
        assert_eq!(redraw_sequence(0, "a\nb"), "a\nb\n");
        assert_eq!(redraw_sequence(2, "c"), "\x1b[2F\x1b[Jc\n");
    }

    #[test]
    fn test_frame_height() {
        assert_eq!(frame_height(""), 0);
        assert_eq!(frame_height("$ git fetch\nremote: done"), 2);
    }
}
