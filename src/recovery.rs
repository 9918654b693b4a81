//! Panic and recovery funnel.
//!
//! Any component that hits an unrecoverable condition ends up here. The
//! funnel tears down audio, force-releases the shared bus (the panic may
//! have been raised while it was held), tells the user what happened and
//! restarts into the launcher. [`halt`] is the terminal state for failures
//! even the launcher cannot fix, like a missing storage medium at boot.

use std::sync::Arc;

use tracing::{error, warn};

use crate::app::{Switcher, Termination, LAUNCHER_SLOT};
use crate::bus::{BusArbiter, BusOwner};
use crate::platform::{AudioLink, DisplayLink};

pub struct Recovery {
    bus: Arc<BusArbiter>,
    display: Arc<dyn DisplayLink>,
    audio: Arc<dyn AudioLink>,
    switcher: Arc<Switcher>,
}

impl Recovery {
    pub fn new(
        bus: Arc<BusArbiter>,
        display: Arc<dyn DisplayLink>,
        audio: Arc<dyn AudioLink>,
        switcher: Arc<Switcher>,
    ) -> Self {
        Self {
            bus,
            display,
            audio,
            switcher,
        }
    }

    /// Unrecoverable failure: tear down, alert, restart into the launcher.
    ///
    /// Safe to call while the bus is held by any owner; the funnel
    /// force-releases it before touching the display.
    pub fn panic(&self, reason: &str) -> Termination {
        error!(" *** PANIC: {reason} *** ");

        self.audio.terminate();

        // The panic may have been raised from inside a transaction that
        // held the bus.
        self.bus.release(BusOwner::Any);

        self.display.clear();
        self.display.alert(reason);

        self.switcher.switch_app(LAUNCHER_SLOT)
    }

    /// The foreground application stopped feeding input/frame activity.
    pub fn unresponsive(&self, reason: &str) -> Termination {
        warn!(" *** APP UNRESPONSIVE: {reason} *** ");
        self.switcher.switch_app(LAUNCHER_SLOT)
    }
}

/// Terminal state for unrecoverable startup failures. Never returns; the
/// device stays parked until the user power-cycles it.
pub fn halt() -> ! {
    error!("halting system");
    loop {
        std::thread::park();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::TomlSettings;
    use crate::storage::HostStorage;
    use crate::testutil::{temp_root, FakeControl, RecordingAudio, RecordingDisplay};

    struct Fixture {
        recovery: Recovery,
        bus: Arc<BusArbiter>,
        display: Arc<RecordingDisplay>,
        audio: Arc<RecordingAudio>,
        control: Arc<FakeControl>,
    }

    fn fixture(tag: &str) -> Fixture {
        let root = temp_root(tag);
        let settings = Arc::new(TomlSettings::load(root.join("settings.toml")));
        let storage = Arc::new(HostStorage::new(root));
        let display = Arc::new(RecordingDisplay::default());
        let audio = Arc::new(RecordingAudio::default());
        let control = Arc::new(FakeControl::default());
        let bus = Arc::new(BusArbiter::new());

        let switcher = Arc::new(Switcher::new(
            settings,
            storage,
            display.clone(),
            audio.clone(),
            control.clone(),
        ));
        let recovery = Recovery::new(bus.clone(), display.clone(), audio.clone(), switcher);

        Fixture {
            recovery,
            bus,
            display,
            audio,
            control,
        }
    }

    #[test]
    fn panic_releases_held_bus_and_restarts_to_launcher() {
        let f = fixture("recovery-panic");
        f.bus.acquire(BusOwner::Storage);

        let termination = f.recovery.panic("ROM file not found!");

        assert_eq!(termination, Termination::Restart { slot: LAUNCHER_SLOT });
        assert_eq!(f.bus.holder(), None, "bus must be force-released");
        assert!(f.audio.terminations() >= 1);
        assert!(f
            .display
            .alerts()
            .iter()
            .any(|a| a == "ROM file not found!"));
        assert_eq!(f.control.boot_slot(), Some(LAUNCHER_SLOT));
        assert_eq!(f.control.restarts(), 1);
    }

    #[test]
    fn panic_with_free_bus_is_safe() {
        let f = fixture("recovery-panic-free");
        let termination = f.recovery.panic("Memory allocation failed!");
        assert_eq!(termination, Termination::Restart { slot: LAUNCHER_SLOT });
        assert_eq!(f.bus.holder(), None);
    }

    #[test]
    fn unresponsive_switches_without_display_teardown() {
        let f = fixture("recovery-unresponsive");
        let termination = f.recovery.unresponsive("Input timeout");
        assert_eq!(termination, Termination::Restart { slot: LAUNCHER_SLOT });
        assert_eq!(f.control.restarts(), 1);
        // No user-facing alert on the watchdog path.
        assert!(f.display.alerts().is_empty());
    }
}
