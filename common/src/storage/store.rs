use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::{path::Path as ObjPath, ObjectStore};

use crate::utils::config::{AppConfig, StorageKind};

pub type DynStore = Arc<dyn ObjectStore>;

/// Content-addressable blob store for the raw uploaded files. Documents
/// live under `documents/{owner}/{document_id}/{file_name}` so deletion can
/// sweep a per-document prefix.
#[derive(Clone)]
pub struct StorageManager {
    store: DynStore,
    backend_kind: StorageKind,
    local_base: Option<PathBuf>,
}

impl StorageManager {
    pub async fn new(cfg: &AppConfig) -> object_store::Result<Self> {
        let backend_kind = cfg.storage.clone();
        let (store, local_base) = create_storage_backend(cfg).await?;

        Ok(Self {
            store,
            backend_kind,
            local_base,
        })
    }

    /// Inject a specific backend, mainly for tests.
    pub fn with_backend(store: DynStore, backend_kind: StorageKind) -> Self {
        Self {
            store,
            backend_kind,
            local_base: None,
        }
    }

    pub fn backend_kind(&self) -> &StorageKind {
        &self.backend_kind
    }

    pub fn local_base_path(&self) -> Option<&Path> {
        self.local_base.as_deref()
    }

    pub async fn put(&self, location: &str, data: Bytes) -> object_store::Result<()> {
        let path = ObjPath::from(location);
        let payload = object_store::PutPayload::from_bytes(data);
        self.store.put(&path, payload).await.map(|_| ())
    }

    /// Full contents buffered in memory, or `None` when absent.
    pub async fn get(&self, location: &str) -> object_store::Result<Option<Bytes>> {
        let path = ObjPath::from(location);
        match self.store.get(&path).await {
            Ok(result) => Ok(Some(result.bytes().await?)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn exists(&self, location: &str) -> object_store::Result<bool> {
        let path = ObjPath::from(location);
        self.store
            .head(&path)
            .await
            .map(|_| true)
            .or_else(|e| match e {
                object_store::Error::NotFound { .. } => Ok(false),
                _ => Err(e),
            })
    }

    /// Delete all objects below the specified prefix. For the local backend
    /// the now-empty directories are cleaned up as well.
    pub async fn delete_prefix(&self, prefix: &str) -> object_store::Result<()> {
        let prefix_path = ObjPath::from(prefix);
        let locations = self
            .store
            .list(Some(&prefix_path))
            .map_ok(|m| m.location)
            .boxed();
        self.store
            .delete_stream(locations)
            .try_collect::<Vec<_>>()
            .await?;

        if matches!(self.backend_kind, StorageKind::Local) {
            self.cleanup_filesystem_directories(prefix).await?;
        }

        Ok(())
    }

    pub async fn list(
        &self,
        prefix: Option<&str>,
    ) -> object_store::Result<Vec<object_store::ObjectMeta>> {
        let prefix_path = prefix.map(ObjPath::from);
        self.store.list(prefix_path.as_ref()).try_collect().await
    }

    /// Best-effort directory cleanup; ignores races with concurrent writes.
    async fn cleanup_filesystem_directories(&self, prefix: &str) -> object_store::Result<()> {
        let Some(base) = &self.local_base else {
            return Ok(());
        };

        let relative = Path::new(prefix);
        if relative.is_absolute()
            || relative
                .components()
                .any(|component| matches!(component, Component::ParentDir | Component::Prefix(_)))
        {
            tracing::warn!(
                prefix = %prefix,
                "Skipping directory cleanup for unsupported prefix components"
            );
            return Ok(());
        }

        let mut current = base.join(relative);

        while current.starts_with(base) && current.as_path() != base.as_path() {
            match tokio::fs::remove_dir(&current).await {
                Ok(_) => {}
                Err(err) => match err.kind() {
                    ErrorKind::NotFound => {}
                    ErrorKind::DirectoryNotEmpty => break,
                    _ => tracing::debug!(
                        error = %err,
                        path = %current.display(),
                        "Failed to remove directory during cleanup"
                    ),
                },
            }

            if let Some(parent) = current.parent() {
                current = parent.to_path_buf();
            } else {
                break;
            }
        }

        Ok(())
    }
}

async fn create_storage_backend(
    cfg: &AppConfig,
) -> object_store::Result<(DynStore, Option<PathBuf>)> {
    match cfg.storage {
        StorageKind::Local => {
            let base = resolve_base_dir(cfg);
            if !base.exists() {
                tokio::fs::create_dir_all(&base).await.map_err(|e| {
                    object_store::Error::Generic {
                        store: "LocalFileSystem",
                        source: e.into(),
                    }
                })?;
            }
            let store = LocalFileSystem::new_with_prefix(base.clone())?;
            Ok((Arc::new(store), Some(base)))
        }
        StorageKind::Memory => {
            let store = InMemory::new();
            Ok((Arc::new(store), None))
        }
    }
}

/// Resolve the absolute base directory used for local storage from config.
/// A relative `data_dir` is resolved against the current working directory.
pub fn resolve_base_dir(cfg: &AppConfig) -> PathBuf {
    if cfg.data_dir.starts_with('/') {
        PathBuf::from(&cfg.data_dir)
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(&cfg.data_dir)
    }
}

/// Blob location for an uploaded document.
pub fn document_blob_path(owner_id: &str, document_id: &str, file_name: &str) -> String {
    format!("documents/{owner_id}/{document_id}/{file_name}")
}

/// Prefix covering every blob belonging to one document.
pub fn document_blob_prefix(owner_id: &str, document_id: &str) -> String {
    format!("documents/{owner_id}/{document_id}/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn memory_config() -> AppConfig {
        AppConfig::for_tests()
    }

    fn local_config(root: &str) -> AppConfig {
        let mut cfg = AppConfig::for_tests();
        cfg.storage = StorageKind::Local;
        cfg.data_dir = root.into();
        cfg
    }

    #[tokio::test]
    async fn memory_put_get_delete_roundtrip() {
        let storage = StorageManager::new(&memory_config())
            .await
            .expect("create storage manager");
        assert!(storage.local_base_path().is_none());

        let location = document_blob_path("user_1", "doc-1", "nda.txt");
        let data = b"The agreement shall terminate on January 1, 2030.";

        storage
            .put(&location, Bytes::from(data.to_vec()))
            .await
            .expect("put");
        let retrieved = storage.get(&location).await.expect("get").expect("present");
        assert_eq!(retrieved.as_ref(), data);
        assert!(storage.exists(&location).await.expect("exists"));

        storage
            .delete_prefix(&document_blob_prefix("user_1", "doc-1"))
            .await
            .expect("delete");
        assert!(!storage.exists(&location).await.expect("exists after delete"));
    }

    #[tokio::test]
    async fn absent_blob_reads_as_none() {
        let storage = StorageManager::new(&memory_config())
            .await
            .expect("create storage manager");
        let result = storage.get("documents/none/missing.txt").await.expect("get");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn overwrite_replaces_content() {
        let storage = StorageManager::new(&memory_config())
            .await
            .expect("create storage manager");
        let location = "documents/user_1/doc-1/contract.txt";

        storage
            .put(location, Bytes::from_static(b"first"))
            .await
            .expect("put first");
        storage
            .put(location, Bytes::from_static(b"second"))
            .await
            .expect("put second");

        let retrieved = storage.get(location).await.expect("get").expect("present");
        assert_eq!(retrieved.as_ref(), b"second");
    }

    #[tokio::test]
    async fn local_backend_cleans_up_directories() {
        let base = format!("/tmp/docsearch_storage_test_{}", Uuid::new_v4());
        let storage = StorageManager::new(&local_config(&base))
            .await
            .expect("create storage manager");
        let resolved_base = storage
            .local_base_path()
            .expect("resolved base dir")
            .to_path_buf();

        let location = document_blob_path("user_1", "doc-1", "nda.txt");
        storage
            .put(&location, Bytes::from_static(b"contract body"))
            .await
            .expect("put");

        let object_dir = resolved_base.join("documents/user_1/doc-1");
        tokio::fs::metadata(&object_dir)
            .await
            .expect("object directory exists after write");

        storage
            .delete_prefix(&document_blob_prefix("user_1", "doc-1"))
            .await
            .expect("delete");
        assert!(
            tokio::fs::metadata(&object_dir).await.is_err(),
            "object directory should be removed"
        );

        let _ = tokio::fs::remove_dir_all(&base).await;
    }

    #[tokio::test]
    async fn list_scopes_to_prefix() {
        let storage = StorageManager::new(&memory_config())
            .await
            .expect("create storage manager");

        for (owner, doc, name) in [
            ("user_1", "doc-1", "a.txt"),
            ("user_1", "doc-1", "b.txt"),
            ("user_1", "doc-2", "c.txt"),
        ] {
            storage
                .put(
                    &document_blob_path(owner, doc, name),
                    Bytes::from_static(b"x"),
                )
                .await
                .expect("put");
        }

        let doc1 = storage
            .list(Some(&document_blob_prefix("user_1", "doc-1")))
            .await
            .expect("list doc-1");
        assert_eq!(doc1.len(), 2);

        let all = storage.list(None).await.expect("list all");
        assert_eq!(all.len(), 3);
    }
}
