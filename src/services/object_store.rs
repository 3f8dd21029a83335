//! Disk-backed object storage collaborator.
//!
//! Plays the role a managed object-storage service would: `put` a payload
//! under a key, issue a public URL for it, and open it again for streaming
//! reads. Durable metadata about the payload (owner, content type, size)
//! lives in SQLite, not here.

use md5::Context;
use std::{
    io::{self, ErrorKind},
    path::PathBuf,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("invalid object key")]
    InvalidKey,
    #[error("object `{0}` already exists")]
    AlreadyExists(String),
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type ObjectStoreResult<T> = Result<T, ObjectStoreError>;

/// Result of a successful `put`.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub key: String,
    pub url: String,
    pub etag: String,
    pub size_bytes: i64,
}

const MAX_OBJECT_KEY_LEN: usize = 1024;

/// Local-filesystem object store rooted at `base_path`.
///
/// Keys may be nested (`{user}/{file}`); payloads are written to a
/// temporary file, fsynced and renamed into place so a partially written
/// object is never visible.
#[derive(Clone)]
pub struct ObjectStore {
    /// Base directory on disk where payloads are stored.
    pub base_path: PathBuf,

    /// Prefix for issued public URLs.
    public_base_url: String,
}

impl ObjectStore {
    pub fn new(base_path: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
            public_base_url: public_base_url.into(),
        }
    }

    /// Basic key validation to avoid trivial path traversal vectors.
    ///
    /// Rejects keys that begin with `/` or contain `..`, control bytes or
    /// backslashes.
    fn ensure_key_safe(&self, key: &str) -> ObjectStoreResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(ObjectStoreError::InvalidKey);
        }
        if key.starts_with('/') || key.contains("..") {
            return Err(ObjectStoreError::InvalidKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(ObjectStoreError::InvalidKey);
        }
        Ok(())
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.base_path.join(key)
    }

    /// Externally-resolvable URL for a stored key.
    pub fn public_url(&self, key: &str) -> String {
        format!("{}/files/{}", self.public_base_url.trim_end_matches('/'), key)
    }

    /// Write a payload under `key` and return its public URL, etag and size.
    ///
    /// With `overwrite` disabled, an existing object under the same key
    /// fails the put instead of being replaced. Bytes go to a temporary
    /// file first (fsync, then rename) so readers never observe a partial
    /// write.
    pub async fn put(
        &self,
        key: &str,
        bytes: &[u8],
        overwrite: bool,
    ) -> ObjectStoreResult<StoredObject> {
        self.ensure_key_safe(key)?;

        let file_path = self.object_path(key);
        if !overwrite && fs::metadata(&file_path).await.is_ok() {
            return Err(ObjectStoreError::AlreadyExists(key.to_string()));
        }

        let parent = file_path
            .parent()
            .map(PathBuf::from)
            .ok_or(ObjectStoreError::InvalidKey)?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let mut file = File::create(&tmp_path).await?;
        let mut digest = Context::new();
        digest.consume(bytes);
        if let Err(err) = file.write_all(bytes).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ObjectStoreError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ObjectStoreError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ObjectStoreError::Io(err));
        }

        Ok(StoredObject {
            key: key.to_string(),
            url: self.public_url(key),
            etag: format!("{:x}", digest.compute()),
            size_bytes: bytes.len() as i64,
        })
    }

    /// Open a stored payload for streaming out. Returns the file handle and
    /// its length.
    pub async fn open(&self, key: &str) -> ObjectStoreResult<(File, u64)> {
        self.ensure_key_safe(key)?;
        let file_path = self.object_path(key);
        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                ObjectStoreError::NotFound(key.to_string())
            } else {
                ObjectStoreError::Io(err)
            }
        })?;
        let len = file.metadata().await?.len();
        Ok((file, len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> ObjectStore {
        ObjectStore::new(dir.path(), "http://localhost:3000")
    }

    #[tokio::test]
    async fn put_then_open_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let stored = store.put("u1/u1_1.png", b"payload", false).await.unwrap();
        assert_eq!(stored.size_bytes, 7);
        assert_eq!(stored.url, "http://localhost:3000/files/u1/u1_1.png");

        let (_, len) = store.open("u1/u1_1.png").await.unwrap();
        assert_eq!(len, 7);
    }

    #[tokio::test]
    async fn put_without_overwrite_fails_on_collision() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.put("u1/a.png", b"first", false).await.unwrap();
        let err = store.put("u1/a.png", b"second", false).await.unwrap_err();
        assert!(matches!(err, ObjectStoreError::AlreadyExists(_)));

        // The original payload is untouched
        let (_, len) = store.open("u1/a.png").await.unwrap();
        assert_eq!(len, 5);
    }

    #[tokio::test]
    async fn traversal_keys_are_rejected() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        for key in ["/abs", "a/../b", ""] {
            assert!(matches!(
                store.put(key, b"x", true).await,
                Err(ObjectStoreError::InvalidKey)
            ));
        }
    }

    #[tokio::test]
    async fn open_missing_key_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = store(&dir).open("u1/missing.png").await.unwrap_err();
        assert!(matches!(err, ObjectStoreError::NotFound(_)));
    }
}
