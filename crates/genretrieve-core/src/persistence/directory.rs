//! Directory abstraction for persistence.
//!
//! Backs the `Storage` collaborator: the store talks to this trait, never
//! directly to `std::fs`, so callers can swap in an in-memory directory for
//! tests or a different backend (S3, NFS) in production.

use std::io::{Read, Write};
use std::path::PathBuf;

use super::error::{PersistenceError, PersistenceResult};

pub trait Directory: Send + Sync {
    fn create_file(&self, path: &str) -> PersistenceResult<Box<dyn Write>>;
    fn open_file(&self, path: &str) -> PersistenceResult<Box<dyn Read>>;
    fn exists(&self, path: &str) -> bool;
    fn delete(&self, path: &str) -> PersistenceResult<()>;
    fn atomic_rename(&self, from: &str, to: &str) -> PersistenceResult<()>;
    fn create_dir_all(&self, path: &str) -> PersistenceResult<()>;
    fn list_dir(&self, path: &str) -> PersistenceResult<Vec<String>>;
    fn append_file(&self, path: &str) -> PersistenceResult<Box<dyn Write>>;

    /// Write via a temp file + fsync + rename so a crash never leaves a
    /// half-written file at `path`.
    fn atomic_write(&self, path: &str, data: &[u8]) -> PersistenceResult<()>;

    /// Absolute path for memory-mapping, if this backend has one on disk.
    fn file_path(&self, path: &str) -> Option<PathBuf>;

    /// Convenience: read an entire file into memory.
    fn read_file(&self, path: &str) -> PersistenceResult<Vec<u8>> {
        let mut reader = self.open_file(path)?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

/// Filesystem-backed directory.
pub struct FsDirectory {
    root: PathBuf,
}

impl FsDirectory {
    pub fn new<P: Into<PathBuf>>(root: P) -> PersistenceResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

impl Directory for FsDirectory {
    fn create_file(&self, path: &str) -> PersistenceResult<Box<dyn Write>> {
        let full_path = self.resolve(path);
        if let Some(parent) = full_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Box::new(std::fs::File::create(full_path)?))
    }

    fn open_file(&self, path: &str) -> PersistenceResult<Box<dyn Read>> {
        Ok(Box::new(std::fs::File::open(self.resolve(path))?))
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).exists()
    }

    fn delete(&self, path: &str) -> PersistenceResult<()> {
        let full_path = self.resolve(path);
        if full_path.is_dir() {
            std::fs::remove_dir_all(full_path)?;
        } else {
            std::fs::remove_file(full_path)?;
        }
        Ok(())
    }

    fn atomic_rename(&self, from: &str, to: &str) -> PersistenceResult<()> {
        let to_path = self.resolve(to);
        if let Some(parent) = to_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::rename(self.resolve(from), to_path)?;
        Ok(())
    }

    fn create_dir_all(&self, path: &str) -> PersistenceResult<()> {
        std::fs::create_dir_all(self.resolve(path))?;
        Ok(())
    }

    fn list_dir(&self, path: &str) -> PersistenceResult<Vec<String>> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(self.resolve(path))? {
            paths.push(entry?.file_name().to_string_lossy().to_string());
        }
        Ok(paths)
    }

    fn append_file(&self, path: &str) -> PersistenceResult<Box<dyn Write>> {
        let full_path = self.resolve(path);
        if let Some(parent) = full_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Box::new(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(full_path)?,
        ))
    }

    fn atomic_write(&self, path: &str, data: &[u8]) -> PersistenceResult<()> {
        let temp_path = format!("{path}.tmp");
        let full_temp_path = self.resolve(&temp_path);
        if let Some(parent) = full_temp_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut temp_file = std::fs::File::create(&full_temp_path)?;
        temp_file.write_all(data)?;
        temp_file.sync_all()?;

        let full_path = self.resolve(path);
        std::fs::rename(&full_temp_path, &full_path)?;
        if let Some(parent) = full_path.parent() {
            if let Ok(parent_file) = std::fs::File::open(parent) {
                let _ = parent_file.sync_all();
            }
        }
        Ok(())
    }

    fn file_path(&self, path: &str) -> Option<PathBuf> {
        Some(self.resolve(path))
    }
}

/// In-memory directory, used by tests so persistence round-trips don't
/// touch disk.
#[derive(Clone, Default)]
pub struct MemoryDirectory {
    files: std::sync::Arc<std::sync::RwLock<std::collections::HashMap<String, Vec<u8>>>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Directory for MemoryDirectory {
    fn create_file(&self, path: &str) -> PersistenceResult<Box<dyn Write>> {
        Ok(Box::new(MemoryWriter {
            files: self.files.clone(),
            path: path.to_string(),
            buffer: Vec::new(),
        }))
    }

    fn open_file(&self, path: &str) -> PersistenceResult<Box<dyn Read>> {
        let files = self.files.read().unwrap();
        let data = files
            .get(path)
            .ok_or_else(|| PersistenceError::NotFound(path.to_string()))?
            .clone();
        Ok(Box::new(std::io::Cursor::new(data)))
    }

    fn exists(&self, path: &str) -> bool {
        self.files.read().unwrap().contains_key(path)
    }

    fn delete(&self, path: &str) -> PersistenceResult<()> {
        self.files.write().unwrap().remove(path);
        Ok(())
    }

    fn atomic_rename(&self, from: &str, to: &str) -> PersistenceResult<()> {
        let mut files = self.files.write().unwrap();
        if let Some(data) = files.remove(from) {
            files.insert(to.to_string(), data);
        }
        Ok(())
    }

    fn create_dir_all(&self, _path: &str) -> PersistenceResult<()> {
        Ok(())
    }

    fn list_dir(&self, path: &str) -> PersistenceResult<Vec<String>> {
        let files = self.files.read().unwrap();
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{path}/")
        };
        let mut result: Vec<String> = files
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .map(|k| k.strip_prefix(&prefix).unwrap_or(k).to_string())
            .collect();
        result.sort();
        Ok(result)
    }

    fn append_file(&self, path: &str) -> PersistenceResult<Box<dyn Write>> {
        let existing = self
            .files
            .read()
            .unwrap()
            .get(path)
            .cloned()
            .unwrap_or_default();
        Ok(Box::new(MemoryWriter {
            files: self.files.clone(),
            path: path.to_string(),
            buffer: existing,
        }))
    }

    fn atomic_write(&self, path: &str, data: &[u8]) -> PersistenceResult<()> {
        self.files
            .write()
            .unwrap()
            .insert(path.to_string(), data.to_vec());
        Ok(())
    }

    fn file_path(&self, _path: &str) -> Option<PathBuf> {
        None
    }
}

struct MemoryWriter {
    files: std::sync::Arc<std::sync::RwLock<std::collections::HashMap<String, Vec<u8>>>>,
    path: String,
    buffer: Vec<u8>,
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.files
            .write()
            .unwrap()
            .insert(self.path.clone(), self.buffer.clone());
        Ok(())
    }
}

impl Drop for MemoryWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fs_directory_roundtrips() {
        let tmp = std::env::temp_dir().join(format!("genretrieve-test-{:p}", &0));
        let dir = FsDirectory::new(&tmp).unwrap();

        dir.atomic_write("test.bin", b"hello").unwrap();
        assert!(dir.exists("test.bin"));
        assert_eq!(dir.read_file("test.bin").unwrap(), b"hello");

        dir.atomic_rename("test.bin", "renamed.bin").unwrap();
        assert!(!dir.exists("test.bin"));
        assert!(dir.exists("renamed.bin"));

        dir.delete("renamed.bin").unwrap();
        assert!(!dir.exists("renamed.bin"));

        std::fs::remove_dir_all(&tmp).ok();
    }

    #[test]
    fn memory_directory_roundtrips() {
        let dir = MemoryDirectory::new();
        dir.atomic_write("a.bin", b"data").unwrap();
        assert_eq!(dir.read_file("a.bin").unwrap(), b"data");
        dir.atomic_rename("a.bin", "b.bin").unwrap();
        assert!(dir.exists("b.bin"));
        assert!(!dir.exists("a.bin"));
    }
}
