//! Persistent disk tier for rendered pages
//!
//! Page rasters are written to `<cache_dir>/<document>/<page>_<zoom>_<rotation>.page`
//! with an 8-byte header (width, height as little-endian u32) followed by raw
//! RGBA bytes. The tier is bounded by total file size with LRU eviction, and
//! can be re-indexed from disk after a restart.

use dualread_render::{Bitmap, DocumentId, Rotation};
use std::collections::{HashMap, VecDeque};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::key::{PageKey, ZoomBucket};

const HEADER_LEN: usize = 8;
const EXTENSION: &str = "page";

/// Statistics for monitoring disk tier performance
#[derive(Debug, Clone, Default)]
pub struct DiskCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entry_count: usize,
    /// Total bytes on disk including headers
    pub disk_used: usize,
}

impl DiskCacheStats {
    /// Calculate cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct DiskState {
    entries: HashMap<PageKey, (PathBuf, usize)>,
    /// Front = least recently used
    lru_queue: VecDeque<PageKey>,
    stats: DiskCacheStats,
    disk_limit: usize,
    cache_dir: PathBuf,
}

impl DiskState {
    fn touch(&mut self, key: &PageKey) {
        self.lru_queue.retain(|k| k != key);
        self.lru_queue.push_back(key.clone());
    }

    fn forget(&mut self, key: &PageKey) -> Option<PathBuf> {
        let (path, size) = self.entries.remove(key)?;
        self.lru_queue.retain(|k| k != key);
        self.stats.disk_used = self.stats.disk_used.saturating_sub(size);
        self.stats.entry_count = self.entries.len();
        Some(path)
    }

    fn evict_lru(&mut self) -> io::Result<bool> {
        let Some(key) = self.lru_queue.front().cloned() else {
            return Ok(false);
        };
        if let Some(path) = self.forget(&key) {
            remove_file_if_present(&path)?;
            self.stats.evictions += 1;
        }
        Ok(true)
    }

    fn evict_until_space_available(&mut self, needed: usize) -> io::Result<()> {
        while self.stats.disk_used + needed > self.disk_limit {
            if !self.evict_lru()? {
                break;
            }
        }
        Ok(())
    }
}

fn remove_file_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn file_name(key: &PageKey) -> String {
    format!("{}_{}_{}.{EXTENSION}", key.page, key.zoom.percent(), key.rotation.degrees())
}

/// Reverse of [`file_name`]
fn parse_file_name(document: &DocumentId, name: &str) -> Option<PageKey> {
    let stem = name.strip_suffix(EXTENSION)?.strip_suffix('.')?;
    let mut parts = stem.split('_');
    let page = parts.next()?.parse::<u16>().ok()?;
    let percent = parts.next()?.parse::<u16>().ok()?;
    let rotation = Rotation::from_degrees(parts.next()?.parse::<i32>().ok()?)?;
    if parts.next().is_some() {
        return None;
    }
    Some(PageKey {
        document: document.clone(),
        page,
        zoom: ZoomBucket::from_percent(percent),
        rotation,
    })
}

/// Disk-backed page cache
///
/// Thread-safe and cheap to clone.
#[derive(Clone)]
pub struct DiskPageCache {
    state: Arc<Mutex<DiskState>>,
}

impl DiskPageCache {
    /// Open (creating if needed) a disk tier rooted at `cache_dir`
    pub fn new<P: AsRef<Path>>(cache_dir: P, disk_limit: usize) -> io::Result<Self> {
        let cache_dir = cache_dir.as_ref().to_path_buf();
        fs::create_dir_all(&cache_dir)?;

        let state = DiskState {
            entries: HashMap::new(),
            lru_queue: VecDeque::new(),
            stats: DiskCacheStats::default(),
            disk_limit,
            cache_dir,
        };
        Ok(Self { state: Arc::new(Mutex::new(state)) })
    }

    pub fn with_mb_limit<P: AsRef<Path>>(cache_dir: P, megabytes: usize) -> io::Result<Self> {
        Self::new(cache_dir, megabytes * 1024 * 1024)
    }

    fn lock(&self) -> MutexGuard<'_, DiskState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write a bitmap, replacing any existing file for the key
    pub fn put(&self, key: &PageKey, bitmap: &Bitmap) -> io::Result<()> {
        let mut state = self.lock();
        let size = bitmap.byte_len() + HEADER_LEN;

        if let Some(old) = state.forget(key) {
            remove_file_if_present(&old)?;
        }
        state.evict_until_space_available(size)?;

        let dir = state.cache_dir.join(key.document.as_str());
        fs::create_dir_all(&dir)?;
        let path = dir.join(file_name(key));

        let mut file = File::create(&path)?;
        file.write_all(&bitmap.width().to_le_bytes())?;
        file.write_all(&bitmap.height().to_le_bytes())?;
        file.write_all(bitmap.pixels())?;
        file.sync_all()?;

        state.entries.insert(key.clone(), (path, size));
        state.lru_queue.push_back(key.clone());
        state.stats.disk_used += size;
        state.stats.entry_count = state.entries.len();
        Ok(())
    }

    /// Read a bitmap back
    ///
    /// A file that vanished or is truncated counts as a miss and is dropped
    /// from the index.
    pub fn get(&self, key: &PageKey) -> io::Result<Option<Bitmap>> {
        let mut state = self.lock();

        let Some((path, _)) = state.entries.get(key).cloned() else {
            state.stats.misses += 1;
            return Ok(None);
        };

        match read_page_file(&path) {
            Ok(Some(bitmap)) => {
                state.touch(key);
                state.stats.hits += 1;
                Ok(Some(bitmap))
            }
            Ok(None) => {
                log::warn!("dropping unreadable disk cache entry {}", path.display());
                state.forget(key);
                remove_file_if_present(&path)?;
                state.stats.misses += 1;
                Ok(None)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                state.forget(key);
                state.stats.misses += 1;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub fn contains(&self, key: &PageKey) -> bool {
        self.lock().entries.contains_key(key)
    }

    /// Remove every file belonging to `document`
    pub fn invalidate(&self, document: &DocumentId) -> io::Result<usize> {
        let mut state = self.lock();
        let keys: Vec<PageKey> =
            state.entries.keys().filter(|key| &key.document == document).cloned().collect();
        for key in &keys {
            state.forget(key);
        }

        let dir = state.cache_dir.join(document.as_str());
        match fs::remove_dir_all(&dir) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
            _ => {}
        }
        Ok(keys.len())
    }

    pub fn clear(&self) -> io::Result<()> {
        let mut state = self.lock();
        let documents: Vec<DocumentId> =
            state.entries.keys().map(|key| key.document.clone()).collect();
        state.entries.clear();
        state.lru_queue.clear();
        state.stats.entry_count = 0;
        state.stats.disk_used = 0;

        for document in documents {
            let dir = state.cache_dir.join(document.as_str());
            if dir.exists() {
                fs::remove_dir_all(dir)?;
            }
        }
        Ok(())
    }

    /// Rebuild the index from files already on disk
    ///
    /// Useful for restoring the tier after an application restart. Files
    /// with unrecognized names are ignored.
    pub fn load_from_disk(&self) -> io::Result<()> {
        let mut state = self.lock();
        state.entries.clear();
        state.lru_queue.clear();
        state.stats.entry_count = 0;
        state.stats.disk_used = 0;

        for document_dir in fs::read_dir(&state.cache_dir)? {
            let document_dir = document_dir?;
            if !document_dir.file_type()?.is_dir() {
                continue;
            }
            let Some(document) = document_dir.file_name().to_str().map(DocumentId::new) else {
                continue;
            };

            for entry in fs::read_dir(document_dir.path())? {
                let entry = entry?;
                let Some(key) =
                    entry.file_name().to_str().and_then(|name| parse_file_name(&document, name))
                else {
                    continue;
                };
                let size = entry.metadata()?.len() as usize;
                state.entries.insert(key.clone(), (entry.path(), size));
                state.lru_queue.push_back(key);
                state.stats.disk_used += size;
            }
        }
        state.stats.entry_count = state.entries.len();
        Ok(())
    }

    pub fn stats(&self) -> DiskCacheStats {
        self.lock().stats.clone()
    }

    pub fn disk_used(&self) -> usize {
        self.lock().stats.disk_used
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.lock().cache_dir.clone()
    }
}

/// `Ok(None)` when the file exists but its contents are inconsistent
fn read_page_file(path: &Path) -> io::Result<Option<Bitmap>> {
    let mut file = File::open(path)?;
    let mut header = [0u8; HEADER_LEN];
    if file.read_exact(&mut header).is_err() {
        return Ok(None);
    }
    let width = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let height = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

    let mut pixels = Vec::new();
    file.read_to_end(&mut pixels)?;
    Ok(Bitmap::from_rgba(width, height, pixels).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(doc: &str, page: u16) -> PageKey {
        PageKey::new(DocumentId::new(doc), page, 1.25, Rotation::Deg90)
    }

    fn bitmap(fill: u8) -> Bitmap {
        Bitmap::from_rgba(16, 16, vec![fill; 16 * 16 * 4]).unwrap()
    }

    #[test]
    fn test_basic_put_get() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskPageCache::with_mb_limit(dir.path(), 1).unwrap();

        cache.put(&key("a", 3), &bitmap(7)).unwrap();
        let loaded = cache.get(&key("a", 3)).unwrap().unwrap();

        assert_eq!((loaded.width(), loaded.height()), (16, 16));
        assert!(loaded.pixels().iter().all(|&b| b == 7));
        assert!(dir.path().join("a").join("3_125_90.page").exists());
    }

    #[test]
    fn test_cache_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskPageCache::with_mb_limit(dir.path(), 1).unwrap();

        assert!(cache.get(&key("a", 0)).unwrap().is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_lru_eviction() {
        let dir = tempfile::tempdir().unwrap();
        let entry_size = 16 * 16 * 4 + HEADER_LEN;
        let cache = DiskPageCache::new(dir.path(), 2 * entry_size).unwrap();

        cache.put(&key("a", 0), &bitmap(0)).unwrap();
        cache.put(&key("a", 1), &bitmap(1)).unwrap();
        assert!(cache.get(&key("a", 0)).unwrap().is_some());
        cache.put(&key("a", 2), &bitmap(2)).unwrap();

        assert!(cache.contains(&key("a", 0)));
        assert!(!cache.contains(&key("a", 1)));
        assert!(cache.contains(&key("a", 2)));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_invalidate_removes_document_directory() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskPageCache::with_mb_limit(dir.path(), 1).unwrap();
        cache.put(&key("a", 0), &bitmap(0)).unwrap();
        cache.put(&key("a", 1), &bitmap(1)).unwrap();
        cache.put(&key("b", 0), &bitmap(2)).unwrap();

        assert_eq!(cache.invalidate(&DocumentId::new("a")).unwrap(), 2);
        assert!(!dir.path().join("a").exists());
        assert!(cache.contains(&key("b", 0)));
        assert_eq!(cache.stats().entry_count, 1);
    }

    #[test]
    fn test_load_from_disk_restores_index() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = DiskPageCache::with_mb_limit(dir.path(), 1).unwrap();
            cache.put(&key("a", 0), &bitmap(4)).unwrap();
            cache.put(&key("b", 5), &bitmap(5)).unwrap();
        }
        fs::write(dir.path().join("a").join("notes.txt"), b"ignored").unwrap();

        let cache = DiskPageCache::with_mb_limit(dir.path(), 1).unwrap();
        cache.load_from_disk().unwrap();

        assert_eq!(cache.stats().entry_count, 2);
        let loaded = cache.get(&key("b", 5)).unwrap().unwrap();
        assert_eq!(loaded.pixels()[0], 5);
    }

    #[test]
    fn test_truncated_file_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskPageCache::with_mb_limit(dir.path(), 1).unwrap();
        cache.put(&key("a", 0), &bitmap(1)).unwrap();
        fs::write(dir.path().join("a").join("0_125_90.page"), [1u8, 0, 0]).unwrap();

        assert!(cache.get(&key("a", 0)).unwrap().is_none());
        assert!(!cache.contains(&key("a", 0)));
    }

    #[test]
    fn test_file_name_round_trip() {
        let k = key("doc", 12);
        assert_eq!(parse_file_name(&k.document, &file_name(&k)), Some(k));
        assert_eq!(parse_file_name(&DocumentId::new("doc"), "12_125.page"), None);
        assert_eq!(parse_file_name(&DocumentId::new("doc"), "12_125_45.page"), None);
    }
}
