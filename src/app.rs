//! Application registry and boot-image switcher.
//!
//! Each flashed application registers itself at startup with its save-state
//! handlers. Registration derives a stable per-title game id from the ROM
//! content, applies the crash-recovery rules (held button, boot-once flag,
//! one-shot NewGame) and records the active descriptor. Switching
//! applications re-flags the boot image table and restarts the device.

use std::path::PathBuf;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crc::{Crc, CRC_32_ISO_HDLC};
use tracing::{error, info};

use crate::input::InputHandle;
use crate::paths::SavePaths;
use crate::platform::{AudioLink, DisplayLink, SystemControl};
use crate::recovery::Recovery;
use crate::savestate::StateHandler;
use crate::settings::{SettingsStore, KEY_ROM_FILE_PATH, KEY_SELECTED_APP, KEY_START_ACTION, KEY_STARTUP_APP};
use crate::storage::StorageMedium;

/// Boot-image slot reserved for the launcher.
pub const LAUNCHER_SLOT: i32 = 0;

/// Number of leading ROM bytes hashed into the game id.
pub const GAME_ID_CHUNK: usize = 0x150;

const GAME_ID_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// One-shot start action the launcher hands to the booting application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartAction {
    #[default]
    Resume,
    NewGame,
}

impl StartAction {
    pub fn from_i32(value: i32) -> Self {
        if value == 1 {
            StartAction::NewGame
        } else {
            StartAction::Resume
        }
    }

    pub fn as_i32(self) -> i32 {
        match self {
            StartAction::Resume => 0,
            StartAction::NewGame => 1,
        }
    }
}

/// Identity of the running application. Set once at registration, read-only
/// afterward until the next switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppDescriptor {
    pub app_id: i32,
    /// Checksum of the first [`GAME_ID_CHUNK`] ROM bytes; stable per title,
    /// used for cache and settings namespacing.
    pub game_id: u32,
    pub start_action: StartAction,
    pub rom_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetplayEvent {
    PeerConnected,
    PeerDisconnected,
}

pub type NetplayCallback = Box<dyn Fn(NetplayEvent) + Send + Sync>;

/// Distinguished terminal state of a switch: on hardware the restart call
/// does not return, so observing this value means the process is being
/// torn down and re-entered with a new boot image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Restart { slot: i32 },
}

/// Tears down the peripherals and re-flags which image boots next.
pub struct Switcher {
    settings: Arc<dyn SettingsStore>,
    storage: Arc<dyn StorageMedium>,
    display: Arc<dyn DisplayLink>,
    audio: Arc<dyn AudioLink>,
    control: Arc<dyn SystemControl>,
}

impl Switcher {
    pub fn new(
        settings: Arc<dyn SettingsStore>,
        storage: Arc<dyn StorageMedium>,
        display: Arc<dyn DisplayLink>,
        audio: Arc<dyn AudioLink>,
        control: Arc<dyn SystemControl>,
    ) -> Self {
        Self {
            settings,
            storage,
            display,
            audio,
            control,
        }
    }

    /// Switches to the application in boot-image slot `slot` and restarts.
    ///
    /// Never returns on the success path on real hardware; callers treat
    /// the returned [`Termination`] as the end of this process.
    pub fn switch_app(&self, slot: i32) -> Termination {
        info!("switching to app {slot}");

        self.display.clear();
        self.display.show_hourglass();
        self.audio.terminate();
        self.storage.close();

        self.settings.set_i32(KEY_SELECTED_APP, slot);
        self.set_boot_app(slot);
        self.control.restart();

        Termination::Restart { slot }
    }

    /// Persists the boot-image pointer without restarting. Used to make
    /// "return to launcher next boot" sticky independent of a clean
    /// shutdown.
    pub fn set_boot_app(&self, slot: i32) {
        if let Err(e) = self.control.set_boot_slot(slot) {
            // The boot table is the one piece of state the recovery path
            // itself depends on; a device that cannot re-flag it is bricked
            // either way.
            error!("failed to flag boot image {slot}: {e}, aborting");
            std::process::abort();
        }
    }
}

/// Registry of the active application and its save-state handlers.
pub struct Registry {
    settings: Arc<dyn SettingsStore>,
    storage: Arc<dyn StorageMedium>,
    app_id: AtomicI32,
    descriptor: RwLock<Option<AppDescriptor>>,
    handler: RwLock<Option<Arc<dyn StateHandler>>>,
    netplay: RwLock<Option<NetplayCallback>>,
}

impl Registry {
    pub fn new(
        settings: Arc<dyn SettingsStore>,
        storage: Arc<dyn StorageMedium>,
        app_id: i32,
    ) -> Self {
        Self {
            settings,
            storage,
            app_id: AtomicI32::new(app_id),
            descriptor: RwLock::new(None),
            handler: RwLock::new(None),
            netplay: RwLock::new(None),
        }
    }

    pub fn app_id(&self) -> i32 {
        self.app_id.load(Ordering::Relaxed)
    }

    pub fn set_app_id(&self, app_id: i32) {
        self.app_id.store(app_id, Ordering::Relaxed);
    }

    /// Registers the booting emulator application.
    ///
    /// Recovery rules, in order: any button held at startup aborts straight
    /// back to the launcher (a ROM that crashed last boot, or the user
    /// signaling intent); a zero boot-once flag re-flags the launcher for
    /// the next restart; a one-shot NewGame start action is downgraded to
    /// Resume immediately so a crash-restart of the same title resumes
    /// instead of wiping progress again. An absent, short or unreadable ROM
    /// is unrecoverable and funnels to the panic path.
    pub fn register_emulator(
        &self,
        handler: Arc<dyn StateHandler>,
        netplay: Option<NetplayCallback>,
        input: &InputHandle,
        switcher: &Switcher,
        recovery: &Recovery,
    ) -> Result<AppDescriptor, Termination> {
        if input.any_pressed() {
            info!("input held at startup, returning to launcher");
            return Err(switcher.switch_app(LAUNCHER_SLOT));
        }

        if let Some(callback) = netplay {
            *self
                .netplay
                .write()
                .unwrap_or_else(PoisonError::into_inner) = Some(callback);
        }

        // Boot-once: next restart returns to the launcher.
        if self.settings.get_i32(KEY_STARTUP_APP, 1) == 0 {
            switcher.set_boot_app(LAUNCHER_SLOT);
        }

        let start_action = StartAction::from_i32(self.settings.get_i32(KEY_START_ACTION, 0));
        if start_action == StartAction::NewGame {
            self.settings
                .set_i32(KEY_START_ACTION, StartAction::Resume.as_i32());
        }

        let rom_setting = self.settings.get_str(KEY_ROM_FILE_PATH, "");
        if rom_setting.len() < 4 {
            return Err(recovery.panic("Invalid ROM path!"));
        }
        let rom_path = PathBuf::from(rom_setting);

        let chunk = match self.storage.read_prefix(&rom_path, GAME_ID_CHUNK) {
            Ok(chunk) => chunk,
            Err(e) => {
                error!("cannot read ROM {}: {e}", rom_path.display());
                return Err(recovery.panic("ROM file not found!"));
            }
        };

        let descriptor = AppDescriptor {
            app_id: self.app_id(),
            game_id: GAME_ID_CRC.checksum(&chunk),
            start_action,
            rom_path,
        };
        info!(
            "emulator registered: rom {} game id {:08X}",
            descriptor.rom_path.display(),
            descriptor.game_id
        );

        self.install(descriptor.clone(), handler);
        Ok(descriptor)
    }

    pub(crate) fn install(&self, descriptor: AppDescriptor, handler: Arc<dyn StateHandler>) {
        *self
            .descriptor
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(descriptor);
        *self
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    pub fn descriptor(&self) -> Option<AppDescriptor> {
        self.descriptor
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Registered handler and ROM path, if an application is active.
    pub fn active(&self) -> Option<(Arc<dyn StateHandler>, PathBuf)> {
        let handler = self
            .handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()?;
        let rom_path = self.descriptor()?.rom_path;
        Some((handler, rom_path))
    }

    pub fn notify_netplay(&self, event: NetplayEvent) {
        if let Some(callback) = self
            .netplay
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            callback(event);
        }
    }

    /// SRAM path for the active ROM, namespaced like the save state.
    pub fn sram_path(&self, paths: &SavePaths) -> Option<PathBuf> {
        Some(paths.sram(&self.descriptor()?.rom_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::input::{ControlLines, InputHandle, RawLines};
    use crate::settings::TomlSettings;
    use crate::storage::HostStorage;
    use crate::testutil::{temp_root, FakeControl, NoopHandler, RecordingAudio, RecordingDisplay};
    use crate::BusArbiter;
    use std::time::Duration;

    struct Idle;
    impl ControlLines for Idle {
        fn read_raw(&mut self) -> RawLines {
            RawLines::default()
        }
    }

    struct Held;
    impl ControlLines for Held {
        fn read_raw(&mut self) -> RawLines {
            RawLines {
                start: true,
                ..RawLines::default()
            }
        }
    }

    struct Fixture {
        settings: Arc<TomlSettings>,
        registry: Registry,
        switcher: Arc<Switcher>,
        recovery: Recovery,
        display: Arc<RecordingDisplay>,
        control: Arc<FakeControl>,
        root: std::path::PathBuf,
    }

    fn fixture(tag: &str) -> Fixture {
        let root = temp_root(tag);
        let settings: Arc<TomlSettings> =
            Arc::new(TomlSettings::load(root.join("settings.toml")));
        let storage = Arc::new(HostStorage::new(root.clone()));
        let display = Arc::new(RecordingDisplay::default());
        let audio = Arc::new(RecordingAudio::default());
        let control = Arc::new(FakeControl::default());

        let switcher = Arc::new(Switcher::new(
            settings.clone(),
            storage.clone(),
            display.clone(),
            audio.clone(),
            control.clone(),
        ));
        let recovery = Recovery::new(
            Arc::new(BusArbiter::new()),
            display.clone(),
            audio,
            switcher.clone(),
        );
        let registry = Registry::new(settings.clone(), storage, 3);

        Fixture {
            settings,
            registry,
            switcher,
            recovery,
            display,
            control,
            root,
        }
    }

    fn write_rom(f: &Fixture, name: &str, fill: u8) -> std::path::PathBuf {
        let rom = f.root.join("roms").join(name);
        std::fs::create_dir_all(rom.parent().unwrap()).unwrap();
        std::fs::write(&rom, vec![fill; GAME_ID_CHUNK + 16]).unwrap();
        rom
    }

    async fn settled_input(lines: Box<dyn ControlLines>) -> InputHandle {
        let input = InputHandle::spawn(lines, Clock::new());
        // Let the sampler observe a few cycles before registration reads it.
        tokio::time::sleep(Duration::from_millis(50)).await;
        input
    }

    #[tokio::test]
    async fn registration_derives_stable_game_id() {
        let f = fixture("app-gameid");
        let rom = write_rom(&f, "alpha.gb", 0xA5);
        f.settings
            .set_str(KEY_ROM_FILE_PATH, rom.to_str().unwrap());
        let input = settled_input(Box::new(Idle)).await;

        let first = f
            .registry
            .register_emulator(
                Arc::new(NoopHandler),
                None,
                &input,
                &f.switcher,
                &f.recovery,
            )
            .expect("registration failed");
        let second = f
            .registry
            .register_emulator(
                Arc::new(NoopHandler),
                None,
                &input,
                &f.switcher,
                &f.recovery,
            )
            .expect("registration failed");
        assert_eq!(first.game_id, second.game_id);
        assert_eq!(first.app_id, 3);

        // A different title hashes differently.
        let other = write_rom(&f, "beta.gb", 0x5A);
        f.settings
            .set_str(KEY_ROM_FILE_PATH, other.to_str().unwrap());
        let third = f
            .registry
            .register_emulator(
                Arc::new(NoopHandler),
                None,
                &input,
                &f.switcher,
                &f.recovery,
            )
            .expect("registration failed");
        assert_ne!(first.game_id, third.game_id);

        input.terminate();
    }

    #[tokio::test]
    async fn new_game_is_downgraded_to_resume_before_first_frame() {
        let f = fixture("app-newgame");
        let rom = write_rom(&f, "alpha.gb", 1);
        f.settings
            .set_str(KEY_ROM_FILE_PATH, rom.to_str().unwrap());
        f.settings
            .set_i32(KEY_START_ACTION, StartAction::NewGame.as_i32());
        let input = settled_input(Box::new(Idle)).await;

        let descriptor = f
            .registry
            .register_emulator(
                Arc::new(NoopHandler),
                None,
                &input,
                &f.switcher,
                &f.recovery,
            )
            .expect("registration failed");

        // The application still sees NewGame for this boot, but the stored
        // action is already Resume so a crash-restart resumes.
        assert_eq!(descriptor.start_action, StartAction::NewGame);
        assert_eq!(
            f.settings.get_i32(KEY_START_ACTION, -1),
            StartAction::Resume.as_i32()
        );

        input.terminate();
    }

    #[tokio::test]
    async fn held_button_at_startup_switches_to_launcher() {
        let f = fixture("app-held");
        let input = settled_input(Box::new(Held)).await;

        let result = f.registry.register_emulator(
            Arc::new(NoopHandler),
            None,
            &input,
            &f.switcher,
            &f.recovery,
        );
        assert_eq!(result, Err(Termination::Restart { slot: LAUNCHER_SLOT }));
        assert_eq!(f.control.boot_slot(), Some(LAUNCHER_SLOT));
        assert_eq!(f.control.restarts(), 1);

        input.terminate();
    }

    #[tokio::test]
    async fn invalid_rom_path_funnels_to_panic() {
        let f = fixture("app-badrom");
        f.settings.set_str(KEY_ROM_FILE_PATH, "x");
        let input = settled_input(Box::new(Idle)).await;

        let result = f.registry.register_emulator(
            Arc::new(NoopHandler),
            None,
            &input,
            &f.switcher,
            &f.recovery,
        );
        assert_eq!(result, Err(Termination::Restart { slot: LAUNCHER_SLOT }));
        assert!(f
            .display
            .alerts()
            .iter()
            .any(|a| a.contains("Invalid ROM path")));

        input.terminate();
    }

    #[tokio::test]
    async fn boot_once_flag_reflags_launcher() {
        let f = fixture("app-bootonce");
        let rom = write_rom(&f, "alpha.gb", 2);
        f.settings
            .set_str(KEY_ROM_FILE_PATH, rom.to_str().unwrap());
        f.settings.set_i32(KEY_STARTUP_APP, 0);
        let input = settled_input(Box::new(Idle)).await;

        f.registry
            .register_emulator(
                Arc::new(NoopHandler),
                None,
                &input,
                &f.switcher,
                &f.recovery,
            )
            .expect("registration failed");

        // Launcher is re-flagged for the next boot without restarting now.
        assert_eq!(f.control.boot_slot(), Some(LAUNCHER_SLOT));
        assert_eq!(f.control.restarts(), 0);

        input.terminate();
    }

    #[test]
    fn set_boot_app_persists_without_restart() {
        let f = fixture("app-setboot");
        f.switcher.set_boot_app(2);
        assert_eq!(f.control.boot_slot(), Some(2));
        assert_eq!(f.control.restarts(), 0);
    }

    #[test]
    fn switch_app_tears_down_and_restarts() {
        let f = fixture("app-switch");
        let termination = f.switcher.switch_app(1);
        assert_eq!(termination, Termination::Restart { slot: 1 });
        assert_eq!(f.control.boot_slot(), Some(1));
        assert_eq!(f.control.restarts(), 1);
        assert_eq!(f.settings.get_i32(KEY_SELECTED_APP, -1), 1);
    }
}
