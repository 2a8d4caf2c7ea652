//! Filesystem `Storage` backend: one file per key under a root directory,
//! written atomically via a same-directory temp file + rename (§6).

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::error::{Error, ErrorContext, StorageErrorKind};
use super::Storage;

pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, Error> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await.map_err(|e| storage_err(&e, "init"))?;
        set_private_dir(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[cfg(unix)]
fn set_private_dir(path: &Path) -> Result<(), Error> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| storage_err(&e, "chmod"))
}

#[cfg(not(unix))]
fn set_private_dir(_path: &Path) -> Result<(), Error> {
    Ok(())
}

#[cfg(unix)]
fn set_private_file(path: &Path) -> Result<(), Error> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| storage_err(&e, "chmod"))
}

#[cfg(not(unix))]
fn set_private_file(_path: &Path) -> Result<(), Error> {
    Ok(())
}

fn storage_err(e: &std::io::Error, op: &str) -> Error {
    let kind = match e.kind() {
        std::io::ErrorKind::PermissionDenied => StorageErrorKind::PermissionDenied,
        std::io::ErrorKind::NotFound => StorageErrorKind::NotFound,
        _ => StorageErrorKind::Unknown,
    };
    Error::Storage {
        kind,
        detail: e.to_string(),
        ctx: ErrorContext::new(op),
    }
}

#[async_trait]
impl Storage for FsStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_err(&e, "get")),
        }
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), Error> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| storage_err(&e, "put"))?;
            set_private_dir(parent)?;
        }
        let tmp_path = path.with_extension(format!(
            "{}.tmp-{}",
            path.extension().and_then(|e| e.to_str()).unwrap_or("bin"),
            std::process::id()
        ));
        tokio::fs::write(&tmp_path, bytes).await.map_err(|e| storage_err(&e, "put"))?;
        set_private_file(&tmp_path)?;
        tokio::fs::rename(&tmp_path, &path).await.map_err(|e| storage_err(&e, "put"))?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), Error> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_err(&e, "remove")),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, Error> {
        let dir = self.root.join(prefix.trim_end_matches('/'));
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(storage_err(&e, "list")),
        };
        while let Some(entry) = entries.next_entry().await.map_err(|e| storage_err(&e, "list"))? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.contains(".tmp-") {
                continue;
            }
            let rel = format!("{}/{}", prefix.trim_end_matches('/'), name);
            out.push(rel);
        }
        Ok(out)
    }

    async fn clear(&self) -> Result<(), Error> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(storage_err(&e, "clear")),
        }
        tokio::fs::create_dir_all(&self.root).await.map_err(|e| storage_err(&e, "clear"))?;
        set_private_dir(&self.root)
    }
}
