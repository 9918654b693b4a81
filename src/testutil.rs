//! Shared test doubles for the peripheral seams.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::platform::{
    AudioLink, DisplayLink, Led, PlatformError, ResetReason, SystemControl,
};
use crate::savestate::{StateError, StateHandler};

static NEXT_ROOT: AtomicUsize = AtomicUsize::new(0);

/// Fresh per-test directory under the system temp dir.
pub fn temp_root(tag: &str) -> PathBuf {
    let n = NEXT_ROOT.fetch_add(1, Ordering::Relaxed);
    let root = std::env::temp_dir().join(format!(
        "pocketcore-{tag}-{}-{n}",
        std::process::id()
    ));
    std::fs::create_dir_all(&root).expect("create test root");
    root
}

#[derive(Default)]
pub struct RecordingDisplay {
    alerts: Mutex<Vec<String>>,
}

impl RecordingDisplay {
    pub fn alerts(&self) -> Vec<String> {
        self.alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl DisplayLink for RecordingDisplay {
    fn clear(&self) {}

    fn show_hourglass(&self) {}

    fn alert(&self, message: &str) {
        self.alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.to_owned());
    }
}

#[derive(Default)]
pub struct RecordingAudio {
    terminations: AtomicUsize,
}

impl RecordingAudio {
    pub fn terminations(&self) -> usize {
        self.terminations.load(Ordering::Relaxed)
    }
}

impl AudioLink for RecordingAudio {
    fn terminate(&self) {
        self.terminations.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Default)]
pub struct RecordingLed {
    states: Mutex<Vec<bool>>,
}

impl RecordingLed {
    pub fn states(&self) -> Vec<bool> {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Led for RecordingLed {
    fn set(&self, on: bool) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(on);
    }
}

/// System control that records boot-table writes and restarts instead of
/// touching hardware.
pub struct FakeControl {
    reset_reason: Mutex<ResetReason>,
    boot_slot: Mutex<Option<i32>>,
    restarts: AtomicUsize,
}

impl Default for FakeControl {
    fn default() -> Self {
        Self {
            reset_reason: Mutex::new(ResetReason::PowerOn),
            boot_slot: Mutex::new(None),
            restarts: AtomicUsize::new(0),
        }
    }
}

impl FakeControl {
    pub fn with_reset_reason(reason: ResetReason) -> Self {
        let control = Self::default();
        *control
            .reset_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = reason;
        control
    }

    /// Most recent boot-table write, if any.
    pub fn boot_slot(&self) -> Option<i32> {
        *self
            .boot_slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn restarts(&self) -> usize {
        self.restarts.load(Ordering::Relaxed)
    }
}

impl SystemControl for FakeControl {
    fn reset_reason(&self) -> ResetReason {
        *self
            .reset_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn set_boot_slot(&self, slot: i32) -> Result<(), PlatformError> {
        *self
            .boot_slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(slot);
        Ok(())
    }

    fn restart(&self) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
    }
}

/// State handler that accepts every save and load.
pub struct NoopHandler;

impl StateHandler for NoopHandler {
    fn save(&self, _path: &Path) -> Result<(), StateError> {
        Ok(())
    }

    fn load(&self, _path: &Path) -> Result<(), StateError> {
        Ok(())
    }
}
