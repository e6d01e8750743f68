use std::{
    io::ErrorKind,
    path::{Component, Path, PathBuf},
    sync::{Arc, OnceLock},
};

use async_trait::async_trait;
use mailchat_common::internal;
use mailchat_module::{BlobStore, ConfigError, ConfigMap, Instance, Module, ModuleError};
use tokio::fs;

/// `storage.blob.fs`: every blob is a file under a root directory
///
/// Keys map to paths relative to the root and may contain `/` to nest
/// blobs in subdirectories. Writes go to a `.tmp_` file next to the target
/// and are renamed into place.
pub struct FsBlobStore {
    instance: Instance,
    root: OnceLock<PathBuf>,
}

impl FsBlobStore {
    pub fn new(instance: Instance) -> Self {
        Self {
            instance,
            root: OnceLock::new(),
        }
    }

    #[allow(clippy::unnecessary_wraps)]
    pub fn factory(instance: Instance) -> Result<Arc<dyn Module>, ModuleError> {
        Ok(Arc::new(Self::new(instance)))
    }

    /// A store rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Fails if `root` is relative or cannot be created.
    pub async fn open(instance: Instance, root: impl Into<PathBuf>) -> Result<Self, ModuleError> {
        let root = root.into();
        if !root.is_absolute() {
            return Err(ModuleError::Permanent(format!(
                "root must be absolute: {}",
                root.display()
            )));
        }

        fs::create_dir_all(&root).await?;
        let store = Self::new(instance);
        let _ = store.root.set(root);
        Ok(store)
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.get().map(PathBuf::as_path)
    }

    fn path(&self, key: &str) -> Result<PathBuf, ModuleError> {
        let root = self
            .root
            .get()
            .ok_or_else(|| ModuleError::Temporary(format!("{} not initialized", self.instance)))?;
        Ok(root.join(validate_key(key)?))
    }
}

/// Blob keys must stay inside the root.
fn validate_key(key: &str) -> Result<&Path, ModuleError> {
    let path = Path::new(key);
    let valid = !key.is_empty()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_)));

    if valid {
        Ok(path)
    } else {
        Err(ModuleError::Permanent(format!("invalid blob key: {key:?}")))
    }
}

#[async_trait]
impl Module for FsBlobStore {
    fn instance(&self) -> &Instance {
        &self.instance
    }

    async fn init(&self, cfg: &mut ConfigMap<'_>) -> Result<(), ConfigError> {
        let root = match cfg.string("root")? {
            Some(root) => PathBuf::from(root),
            None => cfg.globals().state_dir.join("messages"),
        };

        if !root.is_absolute() || root.components().any(|c| c == Component::ParentDir) {
            return Err(ConfigError::invalid(
                cfg.location(),
                format!("root must be an absolute path: {}", root.display()),
            ));
        }

        fs::create_dir_all(&root)
            .await
            .map_err(|e| ConfigError::invalid(cfg.location(), format!("root: {e}")))?;

        internal!(
            "Blob store {} rooted at {}",
            self.instance.display_name(),
            root.display()
        );
        let _ = self.root.set(root);
        Ok(())
    }

    fn as_blob_store(self: Arc<Self>) -> Option<Arc<dyn BlobStore>> {
        Some(self)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    #[tracing::instrument(level = "debug", skip_all, fields(key = %key, size = data.len()))]
    async fn write(&self, key: &str, data: &[u8]) -> Result<(), ModuleError> {
        let path = self.path(key)?;
        let (Some(parent), Some(filename)) = (path.parent(), path.file_name()) else {
            return Err(ModuleError::Permanent(format!("invalid blob key: {key:?}")));
        };

        fs::create_dir_all(parent).await?;
        let temp = parent.join(format!(".tmp_{}", filename.to_string_lossy()));
        fs::write(&temp, data).await?;
        fs::rename(&temp, &path).await?;
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, ModuleError> {
        match fs::read(self.path(key)?).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(ModuleError::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, keys: &[&str]) -> Result<(), ModuleError> {
        for key in keys {
            match fs::remove_file(self.path(key)?).await {
                Err(e) if e.kind() != ErrorKind::NotFound => return Err(e.into()),
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("abc").is_ok());
        assert!(validate_key("2024/01/abc").is_ok());

        for key in ["", "/etc/passwd", "../escape", "a/../../b", "./a"] {
            assert!(validate_key(key).is_err(), "{key:?} accepted");
        }
    }

    #[tokio::test]
    async fn test_write_read_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::open(Instance::new("storage.blob.fs", "blobs"), dir.path())
            .await
            .unwrap();

        store.write("a/b/message", b"hello").await.unwrap();
        assert_eq!(store.read("a/b/message").await.unwrap(), b"hello");

        store.write("a/b/message", b"replaced").await.unwrap();
        assert_eq!(store.read("a/b/message").await.unwrap(), b"replaced");
        assert!(!dir.path().join("a/b/.tmp_message").exists());

        store.delete(&["a/b/message", "missing"]).await.unwrap();
        assert!(matches!(
            store.read("a/b/message").await,
            Err(ModuleError::NotFound(key)) if key == "a/b/message"
        ));
    }

    #[tokio::test]
    async fn test_uninitialized_store_is_temporary() {
        let store = FsBlobStore::new(Instance::new("storage.blob.fs", "blobs"));
        let err = store.write("key", b"data").await.unwrap_err();
        assert!(err.is_temporary());
    }
}
