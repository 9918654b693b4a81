//! Path conventions for ROMs, saves and temp files.
//!
//! Every purpose has a fixed suffix and directory, which is the
//! compatibility contract with flashed applications: save-state primary
//! `.sav`, backup `.sav.bak`, cartridge RAM `.sram`, content-hash cache
//! `.crc`, and randomized `.tmp` names under the temp root. All paths are
//! owned `PathBuf`s built by joining, never fixed buffers.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::clock::Clock;

pub const SAVE_SUFFIX: &str = ".sav";
pub const BACKUP_SUFFIX: &str = ".sav.bak";
pub const SRAM_SUFFIX: &str = ".sram";
pub const CRC_CACHE_SUFFIX: &str = ".crc";
pub const TEMP_SUFFIX: &str = ".tmp";

#[derive(Debug, Clone)]
pub struct SavePaths {
    roms: PathBuf,
    saves: PathBuf,
    temp: PathBuf,
    crc_cache: PathBuf,
}

impl SavePaths {
    pub fn new(root: &Path) -> Self {
        Self {
            roms: root.join("roms"),
            saves: root.join("saves"),
            temp: root.join("tmp"),
            crc_cache: root.join("cache").join("crc"),
        }
    }

    pub fn roms_dir(&self) -> &Path {
        &self.roms
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp
    }

    /// Save-state primary for a ROM. Mirrors the ROM's path relative to the
    /// ROM root so titles in subdirectories don't collide.
    pub fn save_state(&self, rom_path: &Path) -> PathBuf {
        append_suffix(self.saves.join(self.relative_rom(rom_path)), SAVE_SUFFIX)
    }

    pub fn save_backup(&self, rom_path: &Path) -> PathBuf {
        append_suffix(self.saves.join(self.relative_rom(rom_path)), BACKUP_SUFFIX)
    }

    pub fn sram(&self, rom_path: &Path) -> PathBuf {
        append_suffix(self.saves.join(self.relative_rom(rom_path)), SRAM_SUFFIX)
    }

    pub fn crc_cache(&self, rom_path: &Path) -> PathBuf {
        append_suffix(
            self.crc_cache.join(self.relative_rom(rom_path)),
            CRC_CACHE_SUFFIX,
        )
    }

    /// Fresh uniquely-named temp file: hex elapsed micros plus a random
    /// suffix, so concurrent transactions never collide.
    pub fn temp_file(&self, clock: &Clock) -> PathBuf {
        let name = format!(
            "{:x}{:x}{}",
            clock.elapsed_micros(),
            rand::random::<u32>(),
            TEMP_SUFFIX
        );
        self.temp.join(name)
    }

    fn relative_rom<'a>(&self, rom_path: &'a Path) -> &'a Path {
        if let Ok(relative) = rom_path.strip_prefix(&self.roms) {
            return relative;
        }
        rom_path
            .file_name()
            .map(Path::new)
            .unwrap_or(rom_path)
    }
}

fn append_suffix(path: PathBuf, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path);
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths() -> SavePaths {
        SavePaths::new(Path::new("/sdcard"))
    }

    #[test]
    fn suffixes_follow_conventions() {
        let p = paths();
        let rom = Path::new("/sdcard/roms/gb/zelda.gb");
        assert_eq!(
            p.save_state(rom),
            Path::new("/sdcard/saves/gb/zelda.gb.sav")
        );
        assert_eq!(
            p.save_backup(rom),
            Path::new("/sdcard/saves/gb/zelda.gb.sav.bak")
        );
        assert_eq!(p.sram(rom), Path::new("/sdcard/saves/gb/zelda.gb.sram"));
        assert_eq!(
            p.crc_cache(rom),
            Path::new("/sdcard/cache/crc/gb/zelda.gb.crc")
        );
    }

    #[test]
    fn rom_outside_rom_root_falls_back_to_file_name() {
        let p = paths();
        let rom = Path::new("/mnt/other/tetris.gb");
        assert_eq!(p.save_state(rom), Path::new("/sdcard/saves/tetris.gb.sav"));
    }

    #[test]
    fn temp_names_are_unique_and_under_temp_root() {
        let p = paths();
        let clock = Clock::new();
        let a = p.temp_file(&clock);
        let b = p.temp_file(&clock);
        assert_ne!(a, b);
        assert!(a.starts_with(p.temp_dir()));
        assert!(a.to_string_lossy().ends_with(TEMP_SUFFIX));
    }
}
