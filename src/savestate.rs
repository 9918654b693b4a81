//! Crash-safe save-state transactions.
//!
//! A save never touches the primary file until the new state has been fully
//! written somewhere else. The sequence is: write the complete state to a
//! uniquely-named temp file, rename primary to backup (best-effort), rename
//! temp to primary, delete the backup. Interrupted anywhere, the title's
//! prior state survives as either the primary or the backup; a failed save
//! leaves the primary byte-for-byte untouched.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::app::Registry;
use crate::bus::{BusArbiter, BusOwner};
use crate::clock::Clock;
use crate::paths::SavePaths;
use crate::platform::{DisplayLink, Led};
use crate::storage::{StorageError, StorageMedium};

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("state handler failed: {0}")]
    Handler(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Serialization hooks a flashed application registers for its own state
/// format. `save` must write the complete state to `path`; `load` reads it
/// back from `path`.
pub trait StateHandler: Send + Sync {
    fn save(&self, path: &Path) -> Result<(), StateError>;
    fn load(&self, path: &Path) -> Result<(), StateError>;
}

pub struct SaveStateManager {
    registry: Arc<Registry>,
    bus: Arc<BusArbiter>,
    storage: Arc<dyn StorageMedium>,
    paths: SavePaths,
    display: Arc<dyn DisplayLink>,
    led: Arc<dyn Led>,
    clock: Clock,
}

impl SaveStateManager {
    pub fn new(
        registry: Arc<Registry>,
        bus: Arc<BusArbiter>,
        storage: Arc<dyn StorageMedium>,
        paths: SavePaths,
        display: Arc<dyn DisplayLink>,
        led: Arc<dyn Led>,
        clock: Clock,
    ) -> Self {
        Self {
            registry,
            bus,
            storage,
            paths,
            display,
            led,
            clock,
        }
    }

    /// Saves the active application's state into `slot`.
    ///
    /// Returns false (and alerts the user) on failure; the prior save is
    /// untouched in that case. No-op failure when no application or handler
    /// is registered.
    pub fn save(&self, slot: u32) -> bool {
        let Some((handler, rom_path)) = self.registry.active() else {
            warn!("no application registered, save {slot} skipped");
            return false;
        };

        info!("saving state {slot}");

        self.led.set(true);
        self.display.show_hourglass();
        self.bus.acquire(BusOwner::Storage);

        let primary = self.paths.save_state(&rom_path);
        let backup = self.paths.save_backup(&rom_path);
        let temp = self.paths.temp_file(&self.clock);

        // Missing directories are created on demand.
        if let Some(dir) = primary.parent() {
            if let Err(e) = self.storage.create_dir_all(dir) {
                warn!("cannot create save directory: {e}");
            }
        }
        if let Err(e) = self.storage.create_dir_all(self.paths.temp_dir()) {
            warn!("cannot create temp directory: {e}");
        }

        let mut success = false;
        match handler.save(&temp) {
            Ok(()) => {
                // Backup rename is best-effort: on the first ever save
                // there is no primary to preserve.
                if let Err(e) = self.storage.rename(&primary, &backup) {
                    debug!("backup rename skipped: {e}");
                }
                match self.storage.rename(&temp, &primary) {
                    Ok(()) => {
                        let _ = self.storage.remove(&backup);
                        success = true;
                    }
                    Err(e) => error!("commit rename failed: {e}"),
                }
            }
            Err(e) => error!("state handler failed: {e}"),
        }

        // The temp file never outlives the transaction.
        let _ = self.storage.remove(&temp);

        self.bus.release(BusOwner::Storage);
        self.led.set(false);

        if !success {
            error!("save {slot} failed");
            self.display.alert("Save failed");
        }
        success
    }

    /// Loads the active application's state from `slot`'s primary file.
    ///
    /// Failure is reported but not alerted: the launcher stays in control
    /// of the screen on a failed load.
    pub fn load(&self, slot: u32) -> bool {
        let Some((handler, rom_path)) = self.registry.active() else {
            warn!("no application registered, load {slot} skipped");
            return false;
        };

        info!("loading state {slot}");

        self.display.show_hourglass();
        self.bus.acquire(BusOwner::Storage);

        let primary = self.paths.save_state(&rom_path);
        let result = handler.load(&primary);

        self.bus.release(BusOwner::Storage);

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!("load {slot} failed: {e}");
                false
            }
        }
    }
}
