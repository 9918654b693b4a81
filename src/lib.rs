//! Runtime core for a battery-powered handheld game console.
//!
//! A launcher and a family of independently flashed emulator applications
//! share one device. This crate provides the pieces they all depend on:
//! debounced input sampling, arbitration of the shared peripheral bus,
//! crash-safe save-state transactions on the removable storage medium,
//! application registration and boot-image switching, a telemetry/watchdog
//! monitor and the panic/recovery funnel that ties them together.
//!
//! Hardware collaborators (display, audio, LED, boot table, memory pools,
//! control lines) are reached through the narrow traits in [`platform`],
//! [`input`] and [`battery`], so the core runs unchanged on the device, on a
//! development host and under test.

pub mod app;
pub mod battery;
pub mod bus;
pub mod clock;
pub mod input;
pub mod monitor;
pub mod paths;
pub mod platform;
pub mod recovery;
pub mod savestate;
pub mod settings;
pub mod storage;
pub mod system;

#[cfg(feature = "rpi")]
pub mod rpi;

#[cfg(test)]
pub(crate) mod testutil;

pub use app::{AppDescriptor, Registry, StartAction, Switcher, Termination, LAUNCHER_SLOT};
pub use battery::{AdcReader, BatteryMonitor, BatteryState};
pub use bus::{BusArbiter, BusOwner};
pub use clock::Clock;
pub use input::{Button, ControlLines, InputHandle, InputSnapshot, RawLines};
pub use monitor::{FrameCounters, MonitorHandle, RuntimeStatistics};
pub use recovery::Recovery;
pub use savestate::{SaveStateManager, StateHandler};
pub use settings::{SettingsStore, TomlSettings};
pub use storage::{HostStorage, StorageMedium};
pub use system::{Peripherals, Runtime};
