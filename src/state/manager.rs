//! State persistence for release operations.
//!
//! The state file is the single source of truth for resume. Every save writes
//! a temp file, syncs it, and renames it over the previous state so a crash
//! never leaves a half-written file behind. An advisory `flock` on a sibling
//! lock file keeps a second process from driving the same release.

use crate::error::{Result, StateError};
use crate::state::ReleaseState;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// State manager for persistent release state
#[derive(Debug)]
pub struct StateManager {
    /// Path to state file
    state_file_path: PathBuf,
    /// Path to lock file
    lock_file_path: PathBuf,
    /// Current lock handle
    lock_handle: Option<FileLock>,
    /// How long to wait for another process to release the lock
    lock_timeout: Duration,
}

/// Held advisory lock; released when dropped.
#[derive(Debug)]
struct FileLock {
    #[cfg(unix)]
    _flock: nix::fcntl::Flock<fs::File>,
    #[cfg(not(unix))]
    _file: fs::File,
}

impl StateManager {
    /// Create a new state manager
    pub fn new<P: AsRef<Path>>(state_file_path: P) -> Self {
        let state_file_path = state_file_path.as_ref().to_path_buf();
        let lock_file_path = state_file_path.with_extension("lock");

        Self {
            state_file_path,
            lock_file_path,
            lock_handle: None,
            lock_timeout: Duration::from_secs(2),
        }
    }

    /// Override the lock wait
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Path of the state file
    pub fn path(&self) -> &Path {
        &self.state_file_path
    }

    /// Check if state file exists
    pub fn state_exists(&self) -> bool {
        self.state_file_path.exists()
    }

    /// Save release state atomically
    pub async fn save_state(&mut self, state: &mut ReleaseState) -> Result<()> {
        self.acquire_lock().await?;

        state.save_version += 1;
        let serialized =
            serde_json::to_string_pretty(state).map_err(|e| StateError::SaveFailed {
                reason: format!("Failed to serialize state: {}", e),
            })?;

        if let Some(parent) = self.state_file_path.parent() {
            fs::create_dir_all(parent).map_err(|e| StateError::SaveFailed {
                reason: format!("Failed to create {}: {}", parent.display(), e),
            })?;
        }

        let temp_file_path = self.state_file_path.with_extension("tmp");
        {
            let mut file =
                fs::File::create(&temp_file_path).map_err(|e| StateError::SaveFailed {
                    reason: format!("Failed to create temp file: {}", e),
                })?;

            file.write_all(serialized.as_bytes())
                .map_err(|e| StateError::SaveFailed {
                    reason: format!("Failed to write state: {}", e),
                })?;

            file.sync_all().map_err(|e| StateError::SaveFailed {
                reason: format!("Failed to sync file: {}", e),
            })?;
        }

        fs::rename(&temp_file_path, &self.state_file_path).map_err(|e| StateError::SaveFailed {
            reason: format!("Failed to rename temp file: {}", e),
        })?;

        log::debug!(
            "Saved release state v{} at {}",
            state.save_version,
            state.current_step
        );
        Ok(())
    }

    /// Load release state from file
    pub async fn load_state(&mut self) -> Result<ReleaseState> {
        if !self.state_exists() {
            return Err(StateError::NotFound.into());
        }
        self.acquire_lock().await?;

        let contents =
            fs::read_to_string(&self.state_file_path).map_err(|e| StateError::LoadFailed {
                reason: format!(
                    "Failed to read file {}: {}",
                    self.state_file_path.display(),
                    e
                ),
            })?;

        let state: ReleaseState =
            serde_json::from_str(&contents).map_err(|e| StateError::Corrupted {
                reason: format!("Failed to deserialize state: {}", e),
            })?;

        state.validate()?;
        Ok(state)
    }

    /// Read the state without taking the lock, for display while another
    /// process may be driving the release
    pub fn read_state(&self) -> Result<ReleaseState> {
        let contents = match fs::read_to_string(&self.state_file_path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StateError::NotFound.into());
            }
            Err(e) => {
                return Err(StateError::LoadFailed {
                    reason: e.to_string(),
                }
                .into());
            }
        };
        serde_json::from_str(&contents).map_err(|e| {
            StateError::Corrupted {
                reason: format!("Failed to deserialize state: {}", e),
            }
            .into()
        })
    }

    /// Delete the state file and release the lock
    pub fn cleanup_state(&mut self) -> Result<()> {
        let mut errors = Vec::new();

        if self.state_file_path.exists()
            && let Err(e) = fs::remove_file(&self.state_file_path)
        {
            errors.push(format!("Failed to remove state file: {}", e));
        }

        self.lock_handle = None;
        if self.lock_file_path.exists()
            && let Err(e) = fs::remove_file(&self.lock_file_path)
        {
            errors.push(format!("Failed to remove lock file: {}", e));
        }

        if !errors.is_empty() {
            return Err(StateError::SaveFailed {
                reason: format!("Cleanup errors: {}", errors.join("; ")),
            }
            .into());
        }

        Ok(())
    }

    /// Acquire the advisory lock, waiting up to the configured timeout
    async fn acquire_lock(&mut self) -> Result<()> {
        if self.lock_handle.is_some() {
            return Ok(());
        }

        if let Some(parent) = self.lock_file_path.parent() {
            fs::create_dir_all(parent).map_err(|e| StateError::SaveFailed {
                reason: format!("Failed to create {}: {}", parent.display(), e),
            })?;
        }

        let started = Instant::now();
        loop {
            let file = fs::OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&self.lock_file_path)
                .map_err(|e| StateError::SaveFailed {
                    reason: format!("Failed to open lock file: {}", e),
                })?;

            #[cfg(unix)]
            {
                use nix::fcntl::{Flock, FlockArg};

                match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
                    Ok(mut flock) => {
                        let _ = flock.set_len(0);
                        let _ = write!(flock, "{}", std::process::id());
                        self.lock_handle = Some(FileLock { _flock: flock });
                        return Ok(());
                    }
                    Err((_, nix::errno::Errno::EWOULDBLOCK)) => {
                        if started.elapsed() >= self.lock_timeout {
                            return Err(StateError::Locked.into());
                        }
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                    Err((_, e)) => {
                        return Err(StateError::SaveFailed {
                            reason: format!("flock error: {}", e),
                        }
                        .into());
                    }
                }
            }

            #[cfg(not(unix))]
            {
                let _ = started;
                self.lock_handle = Some(FileLock { _file: file });
                return Ok(());
            }
        }
    }
}
