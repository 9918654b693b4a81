//! Boot orchestration and the top-level runtime facade.
//!
//! [`Runtime::init`] wires the subsystems in boot order: monotonic clock,
//! bus arbiter, input sampler, storage presence check, recovery funnel,
//! crash detection from the previous boot, temp-file sweep, then the
//! application registry, save-state manager and telemetry monitor. A
//! flashed application holds one [`Runtime`] for its whole life and reaches
//! every shared service through it.

use std::sync::Arc;

use tracing::{info, warn};

use crate::app::{
    AppDescriptor, NetplayCallback, NetplayEvent, Registry, Switcher, Termination,
};
use crate::battery::{AdcReader, BatteryMonitor};
use crate::bus::BusArbiter;
use crate::clock::Clock;
use crate::input::{ControlLines, InputHandle};
use crate::monitor::{FrameCounters, MonitorHandle, RuntimeStatistics};
use crate::paths::{SavePaths, TEMP_SUFFIX};
use crate::platform::{
    AudioLink, DisplayLink, Led, MemCaps, MemoryPools, ResetReason, SystemControl,
};
use crate::recovery::{self, Recovery};
use crate::savestate::{SaveStateManager, StateHandler};
use crate::settings::SettingsStore;
use crate::storage::StorageMedium;

/// Everything the runtime needs from the device. The host binary fills this
/// with `std::fs` and null implementations; the device build wires real
/// drivers.
pub struct Peripherals {
    pub lines: Box<dyn ControlLines>,
    pub adc: Box<dyn AdcReader>,
    pub display: Arc<dyn DisplayLink>,
    pub audio: Arc<dyn AudioLink>,
    pub led: Arc<dyn Led>,
    pub control: Arc<dyn SystemControl>,
    pub memory: Arc<dyn MemoryPools>,
    pub storage: Arc<dyn StorageMedium>,
    pub settings: Arc<dyn SettingsStore>,
    pub paths: SavePaths,
}

pub struct Runtime {
    clock: Clock,
    bus: Arc<BusArbiter>,
    input: InputHandle,
    memory: Arc<dyn MemoryPools>,
    registry: Arc<Registry>,
    switcher: Arc<Switcher>,
    recovery: Arc<Recovery>,
    saves: SaveStateManager,
    counters: Arc<FrameCounters>,
    monitor: MonitorHandle,
    paths: SavePaths,
}

impl Runtime {
    /// Boots the runtime core for the application in slot `app_id`.
    ///
    /// Must run inside a tokio runtime; the input sampler and monitor are
    /// spawned here. A missing storage medium halts the device. A panic
    /// reset reason from the previous boot funnels straight to recovery and
    /// returns the resulting [`Termination`].
    pub fn init(app_id: i32, peripherals: Peripherals) -> Result<Self, Termination> {
        let Peripherals {
            lines,
            adc,
            display,
            audio,
            led,
            control,
            memory,
            storage,
            settings,
            paths,
        } = peripherals;

        info!("runtime core starting, app {app_id}");

        let clock = Clock::new();
        let bus = Arc::new(BusArbiter::new());
        let input = InputHandle::spawn(lines, clock);

        // Nothing works without the medium: no ROMs, no saves, no settings
        // worth keeping. Parked until power-cycle.
        if !storage.is_present() {
            display.alert("Storage medium not found!");
            recovery::halt();
        }

        let switcher = Arc::new(Switcher::new(
            settings.clone(),
            storage.clone(),
            display.clone(),
            audio.clone(),
            control.clone(),
        ));
        let recovery = Arc::new(Recovery::new(
            bus.clone(),
            display.clone(),
            audio,
            switcher.clone(),
        ));

        let reset_reason = control.reset_reason();
        info!("reset reason: {reset_reason:?}");
        if reset_reason == ResetReason::Panic {
            return Err(recovery.panic("The application crashed!"));
        }
        if reset_reason != ResetReason::Software {
            display.clear();
            display.show_hourglass();
        }

        sweep_temp_files(storage.as_ref(), &paths);

        let registry = Arc::new(Registry::new(settings, storage.clone(), app_id));
        let saves = SaveStateManager::new(
            registry.clone(),
            bus.clone(),
            storage,
            paths.clone(),
            display,
            led.clone(),
            clock,
        );

        let counters = Arc::new(FrameCounters::new(clock));
        let monitor = MonitorHandle::spawn(
            counters.clone(),
            input.clone(),
            BatteryMonitor::new(adc),
            memory.clone(),
            led,
            recovery.clone(),
        );

        Ok(Self {
            clock,
            bus,
            input,
            memory,
            registry,
            switcher,
            recovery,
            saves,
            counters,
            monitor,
            paths,
        })
    }

    /// Registers the booting emulator application; see
    /// [`Registry::register_emulator`] for the recovery rules applied here.
    pub fn register_emulator(
        &self,
        handler: Arc<dyn StateHandler>,
        netplay: Option<NetplayCallback>,
    ) -> Result<AppDescriptor, Termination> {
        self.registry
            .register_emulator(handler, netplay, &self.input, &self.switcher, &self.recovery)
    }

    /// Pool-constrained allocation with one caps-relaxed retry. Exhausting
    /// both attempts is unrecoverable.
    pub fn alloc(&self, size: usize, caps: MemCaps) -> Result<Vec<u8>, Termination> {
        if let Some(buffer) = self.memory.alloc(size, caps) {
            return Ok(buffer);
        }
        warn!("allocation of {size} bytes failed, retrying without pool affinity");
        if let Some(buffer) = self.memory.alloc(size, caps.relaxed()) {
            return Ok(buffer);
        }
        Err(self.recovery.panic("Memory allocation failed!"))
    }

    /// Records one emulation frame for the telemetry monitor.
    pub fn tick(&self, skipped: bool, full: bool, busy_micros: u64) {
        self.counters.tick(skipped, full, busy_micros);
    }

    pub fn save_state(&self, slot: u32) -> bool {
        self.saves.save(slot)
    }

    pub fn load_state(&self, slot: u32) -> bool {
        self.saves.load(slot)
    }

    pub fn switch_app(&self, slot: i32) -> Termination {
        self.switcher.switch_app(slot)
    }

    pub fn set_boot_app(&self, slot: i32) {
        self.switcher.set_boot_app(slot);
    }

    pub fn panic(&self, reason: &str) -> Termination {
        self.recovery.panic(reason)
    }

    pub fn notify_netplay(&self, event: NetplayEvent) {
        self.registry.notify_netplay(event);
    }

    pub fn input(&self) -> &InputHandle {
        &self.input
    }

    pub fn bus(&self) -> &Arc<BusArbiter> {
        &self.bus
    }

    pub fn clock(&self) -> Clock {
        self.clock
    }

    pub fn paths(&self) -> &SavePaths {
        &self.paths
    }

    pub fn descriptor(&self) -> Option<AppDescriptor> {
        self.registry.descriptor()
    }

    pub fn stats(&self) -> RuntimeStatistics {
        self.monitor.current()
    }

    pub fn subscribe_stats(&self) -> tokio::sync::watch::Receiver<RuntimeStatistics> {
        self.monitor.subscribe()
    }

    /// Stops the background tasks. Called ahead of a clean host shutdown;
    /// on the device the restart tears everything down instead.
    pub fn terminate(&self) {
        self.monitor.terminate();
        self.input.terminate();
    }
}

/// Deletes temp files orphaned by an interrupted save transaction. Their
/// content was never committed, so removal is always safe.
fn sweep_temp_files(storage: &dyn StorageMedium, paths: &SavePaths) {
    let entries = match storage.list(paths.temp_dir()) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries {
        if entry.to_string_lossy().ends_with(TEMP_SUFFIX) {
            warn!("removing orphaned temp file {}", entry.display());
            let _ = storage.remove(&entry);
        }
    }
}
