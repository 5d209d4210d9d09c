//! Arena-style file manager arbitrating file descriptors, memory maps, and
//! a global byte budget across open index files (`spec.md` §5
//! "Shared-resource policy", §9 design note "Shared storage lifetime").
//!
//! The source's reference-counted file manager is re-architected here as
//! an arena of byte sources plus opaque [`FileHandle`]s: the manager owns
//! every open back-end, and a handle's lifetime *is* its pin — dropping the
//! last handle to a path makes that path eligible for eviction. This maps
//! the design note's `pin`/`unpin` pair onto Rust's RAII rather than
//! requiring callers to remember to call `unpin` themselves.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::Result;

use super::backend::{ByteSource, MmapSource, WholeFileSource};

/// Backing-store preference an index passes to `try_get_file`
/// (`spec.md` §5, §6 `preferMMapIndex`/`preferReadIndex`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorePreference {
    PreferRead,
    PreferMmap,
    /// Memory-map when the file exceeds [`FileManager::LARGE_FILE_BYTES`],
    /// otherwise read it whole. This is the `read_option == 0` default of
    /// `spec.md` §4.7.
    MmapLargeFiles,
}

struct Entry {
    source: Arc<dyn ByteSource>,
    size: u64,
    pins: u64,
    last_used: u64,
}

struct State {
    entries: HashMap<PathBuf, Entry>,
    clock: u64,
}

/// Owns every open bitmap-store back-end and evicts least-recently-used,
/// unpinned entries once the byte budget is exceeded.
pub struct FileManager {
    state: Mutex<State>,
    budget_bytes: u64,
}

impl FileManager {
    /// Files at or above this size prefer a memory map under
    /// [`StorePreference::MmapLargeFiles`]. Tunable; not load-bearing for
    /// correctness (`spec.md` §9 open question ii, same spirit).
    pub const LARGE_FILE_BYTES: u64 = 1 << 20;

    pub fn new(budget_bytes: u64) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                entries: HashMap::new(),
                clock: 0,
            }),
            budget_bytes,
        })
    }

    /// Returns a pinned handle to `path`'s backing store, opening it with
    /// the requested preference if not already resident.
    pub fn try_get_file(
        self: &Arc<Self>,
        path: impl AsRef<Path>,
        preference: StorePreference,
    ) -> Result<FileHandle> {
        let path = path.as_ref();
        {
            let mut state = self.state.lock().unwrap();
            if let Some(entry) = state.entries.get_mut(path) {
                state.clock += 1;
                entry.pins += 1;
                entry.last_used = state.clock;
                return Ok(FileHandle {
                    manager: self.clone(),
                    path: path.to_path_buf(),
                    source: entry.source.clone(),
                });
            }
        }

        let source = Self::open_with_preference(path, preference)?;
        let size = source.len();

        let mut state = self.state.lock().unwrap();
        // Another thread may have opened the same path while we were
        // performing I/O outside the lock; prefer whichever got there
        // first rather than holding two live sources for one path.
        let entry = state.entries.entry(path.to_path_buf()).or_insert_with(|| {
            let source: Arc<dyn ByteSource> = source.clone();
            Entry {
                source,
                size,
                pins: 0,
                last_used: 0,
            }
        });
        state.clock += 1;
        entry.pins += 1;
        entry.last_used = state.clock;
        let source = entry.source.clone();
        self.evict_if_needed(&mut state);
        Ok(FileHandle {
            manager: self.clone(),
            path: path.to_path_buf(),
            source,
        })
    }

    fn open_with_preference(path: &Path, preference: StorePreference) -> Result<Arc<dyn ByteSource>> {
        let use_mmap = match preference {
            StorePreference::PreferMmap => true,
            StorePreference::PreferRead => false,
            StorePreference::MmapLargeFiles => {
                let meta = fs::metadata(path).map_err(|e| crate::error::IbisError::io(path, e))?;
                meta.len() >= Self::LARGE_FILE_BYTES
            }
        };
        if use_mmap {
            Ok(Arc::new(MmapSource::open(path)?))
        } else {
            Ok(Arc::new(WholeFileSource::open(path)?))
        }
    }

    fn unpin(&self, path: &Path) {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.entries.get_mut(path) {
            entry.pins = entry.pins.saturating_sub(1);
        }
        self.evict_if_needed(&mut state);
    }

    fn evict_if_needed(&self, state: &mut State) {
        let mut total: u64 = state.entries.values().map(|e| e.size).sum();
        while total > self.budget_bytes {
            let victim = state
                .entries
                .iter()
                .filter(|(_, e)| e.pins == 0)
                .min_by_key(|(_, e)| e.last_used)
                .map(|(p, _)| p.clone());
            match victim {
                Some(p) => {
                    if let Some(e) = state.entries.remove(&p) {
                        debug!(path = %p.display(), size = e.size, "evicting index store entry");
                        total -= e.size;
                    }
                }
                // Every resident entry is pinned; the budget is
                // momentarily over-subscribed and will shrink once a
                // handle is dropped.
                None => break,
            }
        }
    }

    /// Total bytes currently resident, pinned or not. Exposed for tests and
    /// diagnostics.
    pub fn resident_bytes(&self) -> u64 {
        self.state.lock().unwrap().entries.values().map(|e| e.size).sum()
    }
}

/// A pinned reference to an open bitmap-store back-end. Dropping the last
/// handle for a path unpins it, making it eligible for LRU eviction.
pub struct FileHandle {
    manager: Arc<FileManager>,
    path: PathBuf,
    source: Arc<dyn ByteSource>,
}

impl FileHandle {
    pub fn source(&self) -> &Arc<dyn ByteSource> {
        &self.source
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        self.manager.unpin(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reopening_same_path_shares_one_entry() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&vec![0u8; 64]).unwrap();
        let manager = FileManager::new(1 << 20);
        let h1 = manager.try_get_file(f.path(), StorePreference::PreferRead).unwrap();
        let h2 = manager.try_get_file(f.path(), StorePreference::PreferRead).unwrap();
        assert_eq!(h1.source().len(), 64);
        assert_eq!(h2.source().len(), 64);
        assert_eq!(manager.resident_bytes(), 64);
    }

    #[test]
    fn eviction_drops_unpinned_entries_over_budget() {
        let mut a = tempfile::NamedTempFile::new().unwrap();
        a.write_all(&vec![0u8; 100]).unwrap();
        let mut b = tempfile::NamedTempFile::new().unwrap();
        b.write_all(&vec![0u8; 100]).unwrap();

        let manager = FileManager::new(150);
        {
            let _ha = manager.try_get_file(a.path(), StorePreference::PreferRead).unwrap();
        }
        let _hb = manager.try_get_file(b.path(), StorePreference::PreferRead).unwrap();
        // `a` was unpinned before `b` was opened, so it is the eviction victim.
        assert_eq!(manager.resident_bytes(), 100);
    }

    #[test]
    fn pinned_entries_survive_over_budget() {
        let mut a = tempfile::NamedTempFile::new().unwrap();
        a.write_all(&vec![0u8; 100]).unwrap();
        let mut b = tempfile::NamedTempFile::new().unwrap();
        b.write_all(&vec![0u8; 100]).unwrap();

        let manager = FileManager::new(150);
        let _ha = manager.try_get_file(a.path(), StorePreference::PreferRead).unwrap();
        let _hb = manager.try_get_file(b.path(), StorePreference::PreferRead).unwrap();
        assert_eq!(manager.resident_bytes(), 200);
    }
}
