use brandmark_core::{BrandError, BrandResult, PersistedMetadata};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Durable home of the last known asset id.
///
/// The record is always written and erased as a whole.
pub trait MetadataStore: Send + Sync {
    fn load(&self) -> BrandResult<Option<PersistedMetadata>>;

    fn save(&self, record: &PersistedMetadata) -> BrandResult<()>;

    /// Erasing a store that holds nothing is not an error.
    fn erase(&self) -> BrandResult<()>;
}

impl<S: MetadataStore + ?Sized> MetadataStore for Arc<S> {
    fn load(&self) -> BrandResult<Option<PersistedMetadata>> {
        (**self).load()
    }

    fn save(&self, record: &PersistedMetadata) -> BrandResult<()> {
        (**self).save(record)
    }

    fn erase(&self) -> BrandResult<()> {
        (**self).erase()
    }
}

impl<S: MetadataStore + ?Sized> MetadataStore for Box<S> {
    fn load(&self) -> BrandResult<Option<PersistedMetadata>> {
        (**self).load()
    }

    fn save(&self, record: &PersistedMetadata) -> BrandResult<()> {
        (**self).save(record)
    }

    fn erase(&self) -> BrandResult<()> {
        (**self).erase()
    }
}

/// A single TOML file, e.g. `~/.config/brandmark/logo.toml`.
#[derive(Debug, Clone)]
pub struct FileMetadataStore {
    path: PathBuf,
}

impl FileMetadataStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetadataStore for FileMetadataStore {
    fn load(&self) -> BrandResult<Option<PersistedMetadata>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(BrandError::store(format!("{}: {}", self.path.display(), e))),
        };
        toml::from_str(&content)
            .map(Some)
            .map_err(|e| BrandError::store(format!("{}: {}", self.path.display(), e)))
    }

    fn save(&self, record: &PersistedMetadata) -> BrandResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| BrandError::store(e.to_string()))?;
        }
        let content = toml::to_string(record).map_err(|e| BrandError::store(e.to_string()))?;

        // Write beside the target and rename so a crash never leaves half a record.
        let staging = self.path.with_extension("toml.tmp");
        fs::write(&staging, content).map_err(|e| BrandError::store(e.to_string()))?;
        fs::rename(&staging, &self.path).map_err(|e| BrandError::store(e.to_string()))
    }

    fn erase(&self) -> BrandResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BrandError::store(format!("{}: {}", self.path.display(), e))),
        }
    }
}

/// Process-local store, mainly for tests.
#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    record: Mutex<Option<PersistedMetadata>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(asset_id: &str, saved_at: u64) -> Self {
        Self {
            record: Mutex::new(Some(PersistedMetadata {
                asset_id: asset_id.to_string(),
                saved_at,
            })),
        }
    }

    pub fn current(&self) -> Option<PersistedMetadata> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Option<PersistedMetadata>> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MetadataStore for MemoryMetadataStore {
    fn load(&self) -> BrandResult<Option<PersistedMetadata>> {
        Ok(self.current())
    }

    fn save(&self, record: &PersistedMetadata) -> BrandResult<()> {
        *self.lock() = Some(record.clone());
        Ok(())
    }

    fn erase(&self) -> BrandResult<()> {
        *self.lock() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> PersistedMetadata {
        PersistedMetadata {
            asset_id: id.to_string(),
            saved_at: 1_700_000_000_000,
        }
    }

    #[test]
    fn file_store_round_trips_and_erases() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileMetadataStore::new(dir.path().join("nested").join("logo.toml"));

        assert_eq!(store.load().unwrap(), None);
        store.save(&record("brand.png")).unwrap();
        assert_eq!(store.load().unwrap(), Some(record("brand.png")));

        store.save(&record("other.svg")).unwrap();
        assert_eq!(store.load().unwrap(), Some(record("other.svg")));

        store.erase().unwrap();
        assert_eq!(store.load().unwrap(), None);
        store.erase().unwrap();
    }

    #[test]
    fn file_layout_uses_camel_case_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileMetadataStore::new(dir.path().join("logo.toml"));
        store.save(&record("brand.png")).unwrap();

        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("assetId = \"brand.png\""), "{}", raw);
        assert!(raw.contains("savedAt = 1700000000000"), "{}", raw);
    }

    #[test]
    fn corrupt_file_is_a_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logo.toml");
        fs::write(&path, "assetId = ").unwrap();
        assert!(matches!(
            FileMetadataStore::new(path).load(),
            Err(BrandError::Store(_))
        ));
    }

    #[test]
    fn memory_store_is_wholesale() {
        let store = MemoryMetadataStore::with_record("a.png", 1);
        store.save(&record("b.png")).unwrap();
        assert_eq!(store.current(), Some(record("b.png")));
        store.erase().unwrap();
        assert_eq!(store.current(), None);
    }
}
