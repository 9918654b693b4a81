//! Narrow seam over the removable storage medium.
//!
//! The core only ever needs read/write/rename/unlink/mkdir primitives plus
//! a presence check, so that is the whole trait. [`HostStorage`] implements
//! it over `std::fs` for development hosts and tests; the device build wires
//! the same trait to the SD card driver.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("file {path} is shorter than {wanted} bytes")]
    TooShort { path: PathBuf, wanted: usize },
}

impl StorageError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub trait StorageMedium: Send + Sync {
    /// Whether the medium is mounted and reachable. Checked once at boot;
    /// absence is fatal.
    fn is_present(&self) -> bool;

    fn read(&self, path: &Path) -> Result<Vec<u8>, StorageError>;

    /// Reads exactly the first `len` bytes. A shorter file is an error.
    fn read_prefix(&self, path: &Path, len: usize) -> Result<Vec<u8>, StorageError>;

    fn write(&self, path: &Path, bytes: &[u8]) -> Result<(), StorageError>;

    fn rename(&self, from: &Path, to: &Path) -> Result<(), StorageError>;

    fn remove(&self, path: &Path) -> Result<(), StorageError>;

    fn create_dir_all(&self, path: &Path) -> Result<(), StorageError>;

    fn exists(&self, path: &Path) -> bool;

    fn list(&self, dir: &Path) -> Result<Vec<PathBuf>, StorageError>;

    /// Flushes and detaches the medium ahead of a restart.
    fn close(&self);
}

/// `std::fs`-backed medium rooted at a directory.
#[derive(Debug, Clone)]
pub struct HostStorage {
    root: PathBuf,
}

impl HostStorage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl StorageMedium for HostStorage {
    fn is_present(&self) -> bool {
        self.root.is_dir()
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>, StorageError> {
        fs::read(path).map_err(|e| StorageError::io(path, e))
    }

    fn read_prefix(&self, path: &Path, len: usize) -> Result<Vec<u8>, StorageError> {
        let mut file = fs::File::open(path).map_err(|e| StorageError::io(path, e))?;
        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                StorageError::TooShort {
                    path: path.to_path_buf(),
                    wanted: len,
                }
            } else {
                StorageError::io(path, e)
            }
        })?;
        Ok(buffer)
    }

    fn write(&self, path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        fs::write(path, bytes).map_err(|e| StorageError::io(path, e))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), StorageError> {
        debug!("rename {} -> {}", from.display(), to.display());
        fs::rename(from, to).map_err(|e| StorageError::io(from, e))
    }

    fn remove(&self, path: &Path) -> Result<(), StorageError> {
        fs::remove_file(path).map_err(|e| StorageError::io(path, e))
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), StorageError> {
        fs::create_dir_all(path).map_err(|e| StorageError::io(path, e))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn list(&self, dir: &Path) -> Result<Vec<PathBuf>, StorageError> {
        let entries = fs::read_dir(dir).map_err(|e| StorageError::io(dir, e))?;
        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io(dir, e))?;
            paths.push(entry.path());
        }
        Ok(paths)
    }

    fn close(&self) {
        info!("storage medium closed");
    }
}
