use std::{
    io::ErrorKind,
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use mailchat_common::internal;
use tokio::fs;

use super::{QueueStore, Result, StoreError, bincode_config};
use crate::item::{BodyId, ItemId, QueueItem};

const ITEM_EXTENSION: &str = "bin";
const BODY_EXTENSION: &str = "eml";

/// File-based store
///
/// Every item is a bincode file `{item_id}.bin`; every body a raw
/// `{body_id}.eml` file. Writes go to a `.tmp_` file first and are
/// renamed into place, so a crash never leaves a partially written entry
/// under its final name.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Open the store at `path`, creating the directory if needed and
    /// removing leftovers of interrupted writes.
    ///
    /// # Errors
    ///
    /// Fails if `path` is relative or contains `..`, is not a directory, or
    /// cannot be created.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        Self::validate_path(&path)?;

        match fs::metadata(&path).await {
            Ok(metadata) if !metadata.is_dir() => {
                return Err(StoreError::InvalidLocation(format!(
                    "{} is not a directory",
                    path.display()
                )));
            }
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                internal!("{} does not exist, creating...", path.display());
                fs::create_dir_all(&path).await?;
            }
            Err(e) => return Err(e.into()),
        }

        let store = Self { path };
        store.cleanup_temporary_files().await?;
        Ok(store)
    }

    fn validate_path(path: &Path) -> Result<()> {
        if path.components().any(|c| c == Component::ParentDir) {
            return Err(StoreError::InvalidLocation(format!(
                "path cannot contain '..' components: {}",
                path.display()
            )));
        }

        if !path.is_absolute() {
            return Err(StoreError::InvalidLocation(format!(
                "path must be absolute: {}",
                path.display()
            )));
        }

        Ok(())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn cleanup_temporary_files(&self) -> Result<()> {
        let mut entries = fs::read_dir(&self.path).await?;
        let mut cleaned = 0;

        while let Some(entry) = entries.next_entry().await? {
            let filename = entry.file_name();
            if filename.to_string_lossy().starts_with(".tmp_") {
                fs::remove_file(entry.path()).await?;
                cleaned += 1;
            }
        }

        if cleaned > 0 {
            internal!(
                level = INFO,
                "Cleaned up {cleaned} interrupted writes in {}",
                self.path.display()
            );
        }

        Ok(())
    }

    async fn write_atomic(&self, filename: &str, data: &[u8]) -> Result<()> {
        let temp = self.path.join(format!(".tmp_{filename}"));
        fs::write(&temp, data).await?;
        fs::rename(&temp, self.path.join(filename)).await?;
        Ok(())
    }

    async fn remove_file(&self, filename: &str) -> Result<()> {
        match fs::remove_file(self.path.join(filename)).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl QueueStore for FileStore {
    #[tracing::instrument(level = "debug", skip_all, fields(id = %id))]
    async fn write_body(&self, id: BodyId, body: &[u8]) -> Result<()> {
        self.write_atomic(&format!("{id}.{BODY_EXTENSION}"), body)
            .await
    }

    async fn read_body(&self, id: BodyId) -> Result<Arc<[u8]>> {
        match fs::read(self.path.join(format!("{id}.{BODY_EXTENSION}"))).await {
            Ok(body) => Ok(Arc::from(body)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_body(&self, id: BodyId) -> Result<()> {
        self.remove_file(&format!("{id}.{BODY_EXTENSION}")).await
    }

    #[tracing::instrument(level = "debug", skip_all, fields(id = %item.id))]
    async fn save(&self, item: &QueueItem) -> Result<()> {
        let encoded = bincode::serde::encode_to_vec(item, bincode_config())?;
        self.write_atomic(&format!("{}.{ITEM_EXTENSION}", item.id), &encoded)
            .await
    }

    async fn remove(&self, id: ItemId) -> Result<()> {
        self.remove_file(&format!("{id}.{ITEM_EXTENSION}")).await
    }

    #[tracing::instrument(level = "debug", skip(self), fields(path = %self.path.display()))]
    async fn load(&self) -> Result<Vec<QueueItem>> {
        let mut entries = fs::read_dir(&self.path).await?;
        let mut items = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let filename = entry.file_name();
            let filename = filename.to_string_lossy();

            if filename.starts_with(".tmp_")
                || ItemId::from_filename(&filename, ITEM_EXTENSION).is_none()
            {
                continue;
            }

            let encoded = fs::read(entry.path()).await?;
            let (item, _): (QueueItem, usize) =
                bincode::serde::decode_from_slice(&encoded, bincode_config())?;
            items.push(item);
        }

        items.sort_by_key(|item| item.id);

        internal!(
            level = DEBUG,
            "Loaded {} queued items from {}",
            items.len(),
            self.path.display()
        );

        Ok(items)
    }
}
