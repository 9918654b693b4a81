//! Runtime telemetry and the unresponsiveness watchdog.
//!
//! Frame ticks from the foreground application accumulate lock-free in
//! [`FrameCounters`]. Once per second the monitor task swaps the counters
//! out, derives FPS/busy/memory statistics, publishes them as one whole
//! [`RuntimeStatistics`] record, drives the low-battery indicator and
//! checks that somebody is still reading input. An application that stops
//! polling input for ten seconds is declared unresponsive and recovered
//! back to the launcher.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::battery::{BatteryMonitor, BatteryState};
use crate::clock::Clock;
use crate::input::InputHandle;
use crate::platform::{Led, MemPool, MemoryPools, PoolStats};
use crate::recovery::Recovery;

/// Reporting period of the monitor task.
pub const MONITOR_INTERVAL: Duration = Duration::from_secs(1);

/// Input silence after which the foreground application is declared
/// unresponsive.
pub const INPUT_STALL_MICROS: u64 = 10_000_000;

/// Reference refresh rate for the emulated-speed estimate.
const BASELINE_FPS: f32 = 60.0;

/// Per-interval frame accumulators, written by the frame-tick caller and
/// swapped out by the monitor.
///
/// Updates are plain atomic additions, so a tick racing the monitor's
/// read-and-reset loses at most one interval's contribution and can never
/// corrupt anything.
#[derive(Debug)]
pub struct FrameCounters {
    clock: Clock,
    total_frames: AtomicU32,
    full_frames: AtomicU32,
    skipped_frames: AtomicU32,
    busy_micros: AtomicU64,
    last_tick_micros: AtomicU64,
    reset_micros: AtomicU64,
}

impl FrameCounters {
    pub fn new(clock: Clock) -> Self {
        Self {
            reset_micros: AtomicU64::new(clock.elapsed_micros()),
            clock,
            total_frames: AtomicU32::new(0),
            full_frames: AtomicU32::new(0),
            skipped_frames: AtomicU32::new(0),
            busy_micros: AtomicU64::new(0),
            last_tick_micros: AtomicU64::new(0),
        }
    }

    /// Records one emulation frame. Called from the application's frame
    /// loop; cheap enough for interrupt-adjacent contexts.
    pub fn tick(&self, skipped: bool, full: bool, busy_micros: u64) {
        if skipped {
            self.skipped_frames.fetch_add(1, Ordering::Relaxed);
        } else if full {
            self.full_frames.fetch_add(1, Ordering::Relaxed);
        }
        self.total_frames.fetch_add(1, Ordering::Relaxed);
        self.busy_micros.fetch_add(busy_micros, Ordering::Relaxed);
        self.last_tick_micros
            .store(self.clock.elapsed_micros(), Ordering::Relaxed);
    }

    /// Micros of the most recent tick, surviving resets. 0 if never ticked.
    pub fn last_tick_micros(&self) -> u64 {
        self.last_tick_micros.load(Ordering::Relaxed)
    }

    /// Swaps all accumulators to zero and returns the interval's sample.
    fn take(&self) -> CounterSample {
        let now = self.clock.elapsed_micros();
        let previous_reset = self.reset_micros.swap(now, Ordering::Relaxed);
        CounterSample {
            total: self.total_frames.swap(0, Ordering::Relaxed),
            full: self.full_frames.swap(0, Ordering::Relaxed),
            skipped: self.skipped_frames.swap(0, Ordering::Relaxed),
            busy_micros: self.busy_micros.swap(0, Ordering::Relaxed),
            interval_micros: now.saturating_sub(previous_reset),
            last_tick_micros: self.last_tick_micros.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CounterSample {
    total: u32,
    full: u32,
    skipped: u32,
    busy_micros: u64,
    interval_micros: u64,
    last_tick_micros: u64,
}

/// Whole-record statistics snapshot, recomputed once per interval and
/// published atomically; readers never see a partial update. Serializable
/// so hosts can export the telemetry stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize)]
pub struct RuntimeStatistics {
    pub battery: BatteryState,
    pub busy_percent: f32,
    pub total_fps: f32,
    pub skipped_fps: f32,
    /// Estimated emulated speed relative to the 60 Hz baseline, percent.
    pub emulated_speed: f32,
    pub internal: PoolStats,
    pub external: PoolStats,
    pub last_tick_micros: u64,
}

fn derive_statistics(
    sample: &CounterSample,
    battery: BatteryState,
    internal: PoolStats,
    external: PoolStats,
) -> RuntimeStatistics {
    let interval = sample.interval_micros.max(1) as f32;
    // An in-flight tick can push busy time past the interval boundary.
    let busy = (sample.busy_micros as f32).min(interval);
    let seconds = interval / 1_000_000.0;

    let total_fps = sample.total as f32 / seconds;
    RuntimeStatistics {
        battery,
        busy_percent: busy / interval * 100.0,
        total_fps,
        skipped_fps: sample.skipped as f32 / seconds,
        emulated_speed: total_fps / BASELINE_FPS * 100.0,
        internal,
        external,
        last_tick_micros: sample.last_tick_micros,
    }
}

/// Watchdog decision for one interval.
///
/// Fires only when the monitor has seen activity before (`last_tick > 0`),
/// input has been silent past the threshold, and this stall episode has not
/// been reported yet. Returns the new latch state alongside the verdict.
fn stall_verdict(last_tick_micros: u64, input_age_micros: u64, reported: bool) -> (bool, bool) {
    let stalled = last_tick_micros > 0 && input_age_micros > INPUT_STALL_MICROS;
    if !stalled {
        return (false, false);
    }
    (!reported, true)
}

/// Handle to the running monitor task.
pub struct MonitorHandle {
    stats_rx: watch::Receiver<RuntimeStatistics>,
    running: Arc<AtomicBool>,
}

impl MonitorHandle {
    /// Spawns the 1 s monitor task.
    pub fn spawn(
        counters: Arc<FrameCounters>,
        input: InputHandle,
        mut battery: BatteryMonitor,
        memory: Arc<dyn MemoryPools>,
        led: Arc<dyn Led>,
        recovery: Arc<Recovery>,
    ) -> Self {
        let (stats_tx, stats_rx) = watch::channel(RuntimeStatistics::default());
        let running = Arc::new(AtomicBool::new(true));
        let task_running = running.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(MONITOR_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut led_state = false;
            let mut stall_reported = false;

            info!("runtime monitor started");

            while task_running.load(Ordering::Acquire) {
                ticker.tick().await;

                let sample = counters.take();
                let battery_state = battery.read();
                let stats = derive_statistics(
                    &sample,
                    battery_state,
                    memory.stats(MemPool::Internal),
                    memory.stats(MemPool::External),
                );
                stats_tx.send_replace(stats);

                info!(
                    "HEAP:{}+{} ({}+{}), BUSY:{:.4}, FPS:{:.4} (SKIP:{}, PART:{}, FULL:{}), BATTERY:{}",
                    stats.internal.free / 1024,
                    stats.external.free / 1024,
                    stats.internal.largest_free / 1024,
                    stats.external.largest_free / 1024,
                    stats.busy_percent,
                    stats.total_fps,
                    sample.skipped,
                    sample.total.saturating_sub(sample.full + sample.skipped),
                    sample.full,
                    battery_state.millivolts,
                );

                // Applications must never stop polling input; silence means
                // the foreground task is wedged.
                let (fire, latched) = stall_verdict(
                    stats.last_tick_micros,
                    input.last_polled_micros(),
                    stall_reported,
                );
                stall_reported = latched;
                if fire {
                    recovery.unresponsive("Input timeout");
                }

                if battery_state.percentage < 2 {
                    led_state = !led_state;
                    led.set(led_state);
                } else if led_state {
                    led_state = false;
                    led.set(false);
                }
            }

            debug!("runtime monitor stopped");
        });

        Self { stats_rx, running }
    }

    /// Receiver for the published statistics; the borrowed value is always
    /// a complete record.
    pub fn subscribe(&self) -> watch::Receiver<RuntimeStatistics> {
        self.stats_rx.clone()
    }

    pub fn current(&self) -> RuntimeStatistics {
        *self.stats_rx.borrow()
    }

    pub fn terminate(&self) {
        self.running.store(false, Ordering::Release);
    }
}
