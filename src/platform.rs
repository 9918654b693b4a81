//! Collaborator seams for the hardware subsystems the core does not own.
//!
//! The display, audio sink, indicator LED, boot-image table and memory
//! pools are driven by their own drivers; the core only sends one-way
//! notifications or asks narrow questions. Each seam is a small trait with
//! a no-op or host-side implementation for running off-device.

use tracing::{debug, info};

/// One-way display side effects. The core never reads display state back.
pub trait DisplayLink: Send + Sync {
    fn clear(&self);
    /// Busy indicator shown during saves, loads and app switches.
    fn show_hourglass(&self);
    fn alert(&self, message: &str);
}

pub trait AudioLink: Send + Sync {
    /// Silences and shuts down the audio pipeline ahead of a restart.
    fn terminate(&self);
}

pub trait Led: Send + Sync {
    fn set(&self, on: bool);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetReason {
    PowerOn,
    /// Deliberate restart, e.g. an application switch.
    Software,
    /// The previous boot crashed.
    Panic,
}

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("boot table update failed: {0}")]
    BootTable(String),
}

/// Restart control and the persistent boot-image table.
///
/// The device carries an ordered table of flashed application images;
/// `set_boot_slot` persists which one runs on the next restart. Slot 0 is
/// the launcher.
pub trait SystemControl: Send + Sync {
    fn reset_reason(&self) -> ResetReason;

    fn set_boot_slot(&self, slot: i32) -> Result<(), PlatformError>;

    /// Restarts the device. Does not return on real hardware; host and test
    /// implementations record the call and return so callers can observe
    /// the terminal state.
    fn restart(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemPool {
    Internal,
    External,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct PoolStats {
    pub free: usize,
    pub largest_free: usize,
}

/// Capability constraints on an allocation request. Pool affinity is the
/// part that gets relaxed on the out-of-memory retry; DMA reachability is
/// a hard requirement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemCaps {
    pub internal: bool,
    pub external: bool,
    pub dma: bool,
}

impl MemCaps {
    /// Same request without pool affinity, for the one-shot retry.
    pub fn relaxed(self) -> Self {
        Self {
            internal: false,
            external: false,
            dma: self.dma,
        }
    }
}

pub trait MemoryPools: Send + Sync {
    fn stats(&self, pool: MemPool) -> PoolStats;

    /// Zeroed allocation honoring `caps`, or `None` when the pools cannot
    /// satisfy it. The caps-relaxation retry policy lives in
    /// [`crate::system::Runtime::alloc`].
    fn alloc(&self, size: usize, caps: MemCaps) -> Option<Vec<u8>>;
}

/// Display that logs instead of drawing. Used by the host binary.
#[derive(Debug, Default)]
pub struct NullDisplay;

impl DisplayLink for NullDisplay {
    fn clear(&self) {
        debug!("display cleared");
    }

    fn show_hourglass(&self) {
        debug!("display busy indicator shown");
    }

    fn alert(&self, message: &str) {
        info!("display alert: {message}");
    }
}

#[derive(Debug, Default)]
pub struct NullAudio;

impl AudioLink for NullAudio {
    fn terminate(&self) {
        debug!("audio terminated");
    }
}

#[derive(Debug, Default)]
pub struct NullLed;

impl Led for NullLed {
    fn set(&self, on: bool) {
        debug!("led {}", if on { "on" } else { "off" });
    }
}

/// System control for development hosts: the boot table is a logged
/// variable and restart returns to the caller.
#[derive(Debug, Default)]
pub struct HostControl {
    boot_slot: std::sync::atomic::AtomicI32,
}

impl SystemControl for HostControl {
    fn reset_reason(&self) -> ResetReason {
        ResetReason::PowerOn
    }

    fn set_boot_slot(&self, slot: i32) -> Result<(), PlatformError> {
        info!("boot slot flagged: {slot}");
        self.boot_slot
            .store(slot, std::sync::atomic::Ordering::Relaxed);
        Ok(())
    }

    fn restart(&self) {
        info!("restart requested");
    }
}

/// Memory pools backed by the host allocator. Pool statistics are not
/// observable from std, so they read as zero.
#[derive(Debug, Default)]
pub struct HostMemory;

impl MemoryPools for HostMemory {
    fn stats(&self, _pool: MemPool) -> PoolStats {
        PoolStats::default()
    }

    fn alloc(&self, size: usize, _caps: MemCaps) -> Option<Vec<u8>> {
        Some(vec![0u8; size])
    }
}
