//! Image store: the directory holding image files referenced by index entries.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::eid::Eid;

pub trait ImageStore: Send + Sync {
    /// Write `data` under `ident` and return the path it can be read back from.
    fn write(&self, ident: &str, data: &[u8]) -> std::io::Result<PathBuf>;
    fn read(&self, image_ref: &Path) -> std::io::Result<Vec<u8>>;
    fn exists(&self, image_ref: &Path) -> bool;
    fn delete(&self, ident: &str) -> std::io::Result<()>;
    fn path_of(&self, ident: &str) -> PathBuf;
}

#[derive(Clone, Debug)]
pub struct LocalImageStore {
    pub base_dir: PathBuf,
}

impl LocalImageStore {
    pub fn new(storage_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = storage_dir.into();
        std::fs::create_dir_all(&path)?;
        Ok(LocalImageStore { base_dir: path })
    }

    /// Write and sync, the rename that follows must not expose a partial file.
    fn write_synced(path: &Path, data: &[u8]) -> std::io::Result<()> {
        let mut file = File::create(path)?;
        file.write_all(data)?;
        file.sync_all()
    }
}

impl ImageStore for LocalImageStore {
    fn exists(&self, image_ref: &Path) -> bool {
        std::fs::metadata(image_ref).map(|m| m.is_file()).unwrap_or(false)
    }

    fn read(&self, image_ref: &Path) -> std::io::Result<Vec<u8>> {
        std::fs::read(image_ref)
    }

    fn write(&self, ident: &str, data: &[u8]) -> std::io::Result<PathBuf> {
        let path = self.path_of(ident);
        let temp_path = self.base_dir.join(format!(".{}-{ident}", Eid::new()));

        let result = Self::write_synced(&temp_path, data)
            .and_then(|_| std::fs::rename(&temp_path, &path));
        if let Err(err) = result {
            let _ = std::fs::remove_file(&temp_path);
            return Err(err);
        }

        Ok(path)
    }

    fn delete(&self, ident: &str) -> std::io::Result<()> {
        std::fs::remove_file(self.path_of(ident))
    }

    fn path_of(&self, ident: &str) -> PathBuf {
        self.base_dir.join(ident)
    }
}
