// files.rs -- filesystem access
//
// The loaders only ever need one thing from the filesystem: the whole
// file as a byte buffer, or nothing. `DiskFileSystem` searches game
// directories in order; `MemFileSystem` serves preloaded buffers and
// backs the tests.

use std::collections::HashMap;
use std::path::PathBuf;

/// `Sync` so batch loaders may decode from several threads at once; the
/// implementations here are stateless per call.
pub trait FileSystem: Sync {
    /// Load an entire file by game path. `None` if it does not exist.
    fn load_file(&self, name: &str) -> Option<Vec<u8>>;

    fn file_exists(&self, name: &str) -> bool {
        self.load_file(name).is_some()
    }
}

/// Search-path filesystem over real directories, first hit wins.
pub struct DiskFileSystem {
    search_paths: Vec<PathBuf>,
}

impl DiskFileSystem {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        DiskFileSystem {
            search_paths: vec![base_dir.into()],
        }
    }

    /// Added paths are searched before earlier ones, so a mod directory
    /// shadows the base game.
    pub fn add_search_path(&mut self, dir: impl Into<PathBuf>) {
        self.search_paths.insert(0, dir.into());
    }
}

impl FileSystem for DiskFileSystem {
    fn load_file(&self, name: &str) -> Option<Vec<u8>> {
        for path in &self.search_paths {
            if let Ok(data) = std::fs::read(path.join(name)) {
                return Some(data);
            }
        }
        None
    }

    fn file_exists(&self, name: &str) -> bool {
        self.search_paths.iter().any(|p| p.join(name).is_file())
    }
}

/// In-memory filesystem keyed by game path.
#[derive(Default)]
pub struct MemFileSystem {
    files: HashMap<String, Vec<u8>>,
}

impl MemFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, data: Vec<u8>) {
        self.files.insert(name.into(), data);
    }

    pub fn remove(&mut self, name: &str) {
        self.files.remove(name);
    }
}

impl FileSystem for MemFileSystem {
    fn load_file(&self, name: &str) -> Option<Vec<u8>> {
        self.files.get(name).cloned()
    }

    fn file_exists(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }
}
