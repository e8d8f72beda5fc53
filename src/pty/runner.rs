//! Pseudo-terminal command runner.
//!
//! Each command gets a fresh PTY sized to the current dimensions and runs as
//! `sh -c` in its own session, so killing its process group takes every
//! child with it. Two workers cooperate per command: a blocking reader that
//! drains the PTY master into the emulator and the raw buffer, and a render
//! task that publishes the screen on a fixed cadence. The reader signals
//! completion when it sees end-of-stream; the render task then does one last
//! render and exits. `run_command` returns only after both have finished.

use super::{CommandFailure, CommandOutput, CommandRunner};
use crate::error::PtyError;
use crate::terminal::{Terminal, plain_transcript};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Default screen size
pub const DEFAULT_ROWS: u16 = 30;
/// Default screen width
pub const DEFAULT_COLS: u16 = 120;

/// Default live render cadence (about 20 Hz)
const DEFAULT_RENDER_INTERVAL: Duration = Duration::from_millis(50);

/// How long to wait for end-of-stream after the shell exited
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(unix)]
mod sys {
    nix::ioctl_write_ptr_bad!(tiocswinsz, nix::libc::TIOCSWINSZ, nix::pty::Winsize);
    nix::ioctl_write_int_bad!(tiocsctty, nix::libc::TIOCSCTTY);

    pub fn winsize(rows: u16, cols: u16) -> nix::pty::Winsize {
        nix::pty::Winsize {
            ws_row: rows,
            ws_col: cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        }
    }
}

/// Process currently attached to a PTY
#[cfg(unix)]
struct ActiveProcess {
    pgid: nix::unistd::Pid,
    master: std::os::fd::OwnedFd,
    terminal: Arc<Mutex<Terminal>>,
}

/// Runs commands attached to a pseudo-terminal
pub struct PtyRunner {
    shell: PathBuf,
    work_dir: PathBuf,
    size: Mutex<(u16, u16)>,
    render_interval: Duration,
    frames: Option<mpsc::UnboundedSender<String>>,
    #[cfg(unix)]
    active: Mutex<Option<ActiveProcess>>,
    interrupted: AtomicBool,
    closed: AtomicBool,
}

impl std::fmt::Debug for PtyRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyRunner")
            .field("shell", &self.shell)
            .field("work_dir", &self.work_dir)
            .field("size", &*lock(&self.size))
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl PtyRunner {
    /// Runner executing in `work_dir` with `/bin/sh`
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            shell: PathBuf::from("/bin/sh"),
            work_dir: work_dir.into(),
            size: Mutex::new((DEFAULT_ROWS, DEFAULT_COLS)),
            render_interval: DEFAULT_RENDER_INTERVAL,
            frames: None,
            #[cfg(unix)]
            active: Mutex::new(None),
            interrupted: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Initial terminal size
    pub fn with_size(self, rows: u16, cols: u16) -> Self {
        *lock(&self.size) = (rows.max(1), cols.max(1));
        self
    }

    /// Live render cadence
    pub fn with_render_interval(mut self, interval: Duration) -> Self {
        self.render_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Publish rendered screens to `frames` while commands run
    pub fn with_frames(mut self, frames: mpsc::UnboundedSender<String>) -> Self {
        self.frames = Some(frames);
        self
    }

    /// Directory commands run in
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Current terminal size as `(rows, cols)`
    pub fn size(&self) -> (u16, u16) {
        *lock(&self.size)
    }

    /// Kill anything running and refuse further commands. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            log::debug!("closing PTY runner");
        }
        self.kill();
    }

    /// Whether [`close`](Self::close) was called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Run one command to completion. A pending [`kill`](CommandRunner::kill)
    /// stops it as soon as it starts; `run_commands` clears that flag first.
    #[cfg(unix)]
    pub async fn run_command(&self, command: &str) -> Result<CommandOutput, PtyError> {
        use nix::pty::openpty;
        use nix::sys::termios::Termios;
        use std::os::unix::process::ExitStatusExt;

        if self.is_closed() {
            return Err(PtyError::Closed);
        }

        let (rows, cols) = self.size();
        let pty = openpty(&sys::winsize(rows, cols), None::<&Termios>).map_err(|e| {
            PtyError::Allocation {
                reason: e.to_string(),
            }
        })?;

        let spawn_error = |reason: String| PtyError::Spawn {
            command: command.to_string(),
            reason,
        };
        let slave_stdio = || {
            pty.slave
                .try_clone()
                .map(std::process::Stdio::from)
                .map_err(|e| spawn_error(e.to_string()))
        };

        let mut cmd = tokio::process::Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .current_dir(&self.work_dir)
            .env("TERM", "xterm-256color")
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(slave_stdio()?)
            .stdout(slave_stdio()?)
            .stderr(slave_stdio()?)
            .kill_on_drop(true);
        // SAFETY: only async-signal-safe calls between fork and exec
        unsafe {
            cmd.pre_exec(|| {
                nix::unistd::setsid()?;
                sys::tiocsctty(0, 0)?;
                Ok(())
            });
        }

        log::debug!("$ {}", command);
        let mut child = cmd.spawn().map_err(|e| spawn_error(e.to_string()))?;
        // Only the child may hold the slave side, or the reader never sees EOF
        drop(cmd);
        drop(pty.slave);

        let pgid = child
            .id()
            .map(|id| nix::unistd::Pid::from_raw(id as i32))
            .ok_or_else(|| spawn_error("process exited before it was tracked".to_string()))?;

        let reader_fd = pty.master.try_clone().map_err(|e| PtyError::Task {
            reason: format!("Failed to duplicate PTY master: {}", e),
        })?;

        let prompt = format!("$ {}\r\n", command);
        let terminal = Arc::new(Mutex::new(Terminal::new(rows, cols)));
        lock(&terminal).feed(prompt.as_bytes());
        let raw = Arc::new(Mutex::new(prompt.into_bytes()));

        *lock(&self.active) = Some(ActiveProcess {
            pgid,
            master: pty.master,
            terminal: Arc::clone(&terminal),
        });
        // A kill that landed before the registration above had nothing to signal
        if self.interrupted.load(Ordering::SeqCst) {
            log::info!("interrupted while starting '{}'", command);
            let _ = nix::sys::signal::killpg(pgid, nix::sys::signal::Signal::SIGKILL);
        }

        let (done_tx, done_rx) = oneshot::channel();
        let stop = CancellationToken::new();
        let reader = tokio::task::spawn_blocking({
            let terminal = Arc::clone(&terminal);
            let raw = Arc::clone(&raw);
            move || read_until_eof(std::fs::File::from(reader_fd), &terminal, &raw, done_tx)
        });
        let render = tokio::spawn(render_loop(
            Arc::clone(&terminal),
            self.frames.clone(),
            self.render_interval,
            done_rx,
            stop.clone(),
        ));

        let status = child.wait().await;
        self.await_reader(reader, pgid).await;
        // Unblocks the render task if the reader had to be abandoned
        stop.cancel();
        if let Err(e) = render.await {
            log::warn!("render task failed: {}", e);
        }
        *lock(&self.active) = None;

        let status = status.map_err(|e| PtyError::Task {
            reason: format!("Failed to wait for '{}': {}", command, e),
        })?;
        let transcript = plain_transcript(&lock(&raw));
        let failure = (!status.success()).then(|| CommandFailure {
            command: command.to_string(),
            exit_code: status.code(),
        });
        if let Some(signal) = status.signal() {
            log::info!("'{}' terminated by signal {}", command, signal);
        }

        Ok(CommandOutput {
            transcript,
            failure,
        })
    }

    /// Wait for the reader to hit end-of-stream. Processes that outlive the
    /// shell and keep the terminal open are killed after a grace period.
    #[cfg(unix)]
    async fn await_reader(&self, mut reader: tokio::task::JoinHandle<()>, pgid: nix::unistd::Pid) {
        if let Ok(joined) = tokio::time::timeout(DRAIN_TIMEOUT, &mut reader).await {
            if let Err(e) = joined {
                log::warn!("PTY reader failed: {}", e);
            }
            return;
        }

        log::warn!("output still open after the shell exited; killing process group");
        let _ = nix::sys::signal::killpg(pgid, nix::sys::signal::Signal::SIGKILL);
        match tokio::time::timeout(DRAIN_TIMEOUT, &mut reader).await {
            Ok(Err(e)) => log::warn!("PTY reader failed: {}", e),
            Ok(Ok(())) => {}
            Err(_) => log::warn!("abandoning PTY reader that never reached end-of-stream"),
        }
    }

    /// Run one command to completion
    #[cfg(not(unix))]
    pub async fn run_command(&self, _command: &str) -> Result<CommandOutput, PtyError> {
        if self.is_closed() {
            return Err(PtyError::Closed);
        }
        Err(PtyError::Unsupported)
    }

    async fn run_sequence(&self, commands: &[String]) -> Result<CommandOutput, PtyError> {
        self.interrupted.store(false, Ordering::SeqCst);
        let mut output = CommandOutput::default();
        for command in commands {
            if self.interrupted.load(Ordering::SeqCst) {
                output.failure = Some(CommandFailure {
                    command: command.clone(),
                    exit_code: None,
                });
                break;
            }
            output.append(self.run_command(command).await?);
            if !output.success() {
                break;
            }
        }
        Ok(output)
    }
}

impl CommandRunner for PtyRunner {
    async fn run_commands(&self, commands: &[String]) -> Result<CommandOutput, PtyError> {
        self.run_sequence(commands).await
    }

    fn kill(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        #[cfg(unix)]
        if let Some(active) = lock(&self.active).as_ref() {
            use nix::sys::signal::{Signal, killpg};
            match killpg(active.pgid, Signal::SIGKILL) {
                Ok(()) => log::info!("killed process group {}", active.pgid),
                Err(nix::errno::Errno::ESRCH) => {}
                Err(e) => log::warn!("failed to kill process group {}: {}", active.pgid, e),
            }
        }
    }

    fn resize(&self, rows: u16, cols: u16) {
        let (rows, cols) = (rows.max(1), cols.max(1));
        *lock(&self.size) = (rows, cols);

        #[cfg(unix)]
        if let Some(active) = lock(&self.active).as_ref() {
            use std::os::fd::AsRawFd;
            let size = sys::winsize(rows, cols);
            // SAFETY: the descriptor stays open while the active lock is held
            if let Err(e) = unsafe { sys::tiocswinsz(active.master.as_raw_fd(), &size) } {
                log::warn!("failed to resize PTY: {}", e);
            }
            lock(&active.terminal).resize(rows, cols);
        }
    }
}

/// Blocking reader: drain the master until end-of-stream, then signal done.
/// Linux reports a closed slave as `EIO` rather than a zero-length read.
#[cfg(unix)]
fn read_until_eof(
    mut master: std::fs::File,
    terminal: &Mutex<Terminal>,
    raw: &Mutex<Vec<u8>>,
    done: oneshot::Sender<()>,
) {
    use std::io::Read;

    let mut buf = [0u8; 4096];
    loop {
        match master.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                lock(terminal).feed(&buf[..n]);
                lock(raw).extend_from_slice(&buf[..n]);
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) if e.raw_os_error() == Some(nix::libc::EIO) => break,
            Err(e) => {
                log::warn!("PTY read failed: {}", e);
                break;
            }
        }
    }
    let _ = done.send(());
}

/// Timer-driven renderer. Publishes only changed frames; always renders once
/// more after the done signal so the last output is never missed.
async fn render_loop(
    terminal: Arc<Mutex<Terminal>>,
    frames: Option<mpsc::UnboundedSender<String>>,
    interval: Duration,
    mut done: oneshot::Receiver<()>,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last = String::new();

    loop {
        tokio::select! {
            _ = &mut done => break,
            _ = stop.cancelled() => break,
            _ = ticker.tick() => publish(&terminal, frames.as_ref(), &mut last),
        }
    }
    publish(&terminal, frames.as_ref(), &mut last);
}

fn publish(
    terminal: &Mutex<Terminal>,
    frames: Option<&mpsc::UnboundedSender<String>>,
    last: &mut String,
) {
    let Some(frames) = frames else {
        return;
    };
    let frame = lock(terminal).render();
    if frame != *last {
        let _ = frames.send(frame.clone());
        *last = frame;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn runner(dir: &Path) -> PtyRunner {
        PtyRunner::new(dir).with_render_interval(Duration::from_millis(10))
    }

    fn commands(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|l| l.to_string()).collect()
    }

    #[tokio::test]
    async fn test_runs_command_and_captures_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = runner(dir.path()).run_command("echo hello").await.unwrap();
        assert!(out.success());
        assert_eq!(out.transcript, "$ echo hello\nhello");
    }

    #[tokio::test]
    async fn test_child_sees_a_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let out = runner(dir.path())
            .run_command("test -t 1 && echo interactive")
            .await
            .unwrap();
        assert!(out.transcript.contains("interactive"));
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_data() {
        let dir = tempfile::tempdir().unwrap();
        let out = runner(dir.path()).run_command("echo oops; exit 3").await.unwrap();
        let failure = out.failure.unwrap();
        assert_eq!(failure.exit_code, Some(3));
        assert!(out.transcript.contains("oops"));
    }

    #[tokio::test]
    async fn test_sequence_stops_at_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let out = runner(dir.path())
            .run_commands(&commands(&["echo first", "false", "echo never"]))
            .await
            .unwrap();
        assert_eq!(out.failure.unwrap().command, "false");
        assert!(out.transcript.contains("first"));
        assert!(!out.transcript.contains("never"));
    }

    #[tokio::test]
    async fn test_colors_reach_live_frames_but_not_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let runner = runner(dir.path()).with_frames(tx);
        let out = runner
            .run_command(r"printf '\033[31mred\033[0m\n'")
            .await
            .unwrap();
        assert!(out.transcript.ends_with("\nred"));

        let mut last = None;
        while let Ok(frame) = rx.try_recv() {
            last = Some(frame);
        }
        assert!(last.unwrap().contains("\x1b[0;31mred\x1b[0m"));
    }

    #[tokio::test]
    async fn test_resize_applies_to_next_command() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(dir.path());
        runner.resize(20, 50);
        let out = runner.run_command("stty size").await.unwrap();
        assert!(out.transcript.contains("20 50"));
    }

    #[tokio::test]
    async fn test_kill_stops_running_command() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(runner(dir.path()));
        let task = tokio::spawn({
            let runner = Arc::clone(&runner);
            async move { runner.run_commands(&commands(&["sleep 30", "echo after"])).await }
        });

        tokio::time::sleep(Duration::from_millis(300)).await;
        runner.kill();
        runner.kill();

        let out = tokio::time::timeout(Duration::from_secs(10), task)
            .await
            .expect("killed command should return promptly")
            .unwrap()
            .unwrap();
        let failure = out.failure.unwrap();
        assert_eq!(failure.command, "sleep 30");
        assert_eq!(failure.exit_code, None);
        assert!(!out.transcript.contains("after"));
    }

    #[tokio::test]
    async fn test_kill_before_process_is_tracked_still_stops_it() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(dir.path());
        // Nothing active yet, as when the kill lands while the command spawns
        runner.kill();

        let out = tokio::time::timeout(Duration::from_secs(10), runner.run_command("sleep 30"))
            .await
            .expect("pending kill should stop the command once it starts")
            .unwrap();
        let failure = out.failure.unwrap();
        assert_eq!(failure.command, "sleep 30");
        assert_eq!(failure.exit_code, None);
    }

    #[tokio::test]
    async fn test_new_sequence_clears_previous_kill() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(dir.path());
        runner.kill();
        let out = runner.run_commands(&commands(&["echo again"])).await.unwrap();
        assert!(out.success());
        assert!(out.transcript.contains("again"));
    }

    #[tokio::test]
    async fn test_closed_runner_refuses_commands() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(dir.path());
        runner.close();
        runner.close();
        assert!(matches!(
            runner.run_command("true").await,
            Err(PtyError::Closed)
        ));
    }
}
