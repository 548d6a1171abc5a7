// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Content addressed artifact storage.

Package files are stored by their SHA-256 digest. An [ArtifactRef] is all a content
unit needs to refer to its file.
*/

use {
    crate::{
        error::{MirrorError, Result},
        io::{ChecksumType, ContentDigest, DigestingReader},
    },
    async_trait::async_trait,
    futures::{AsyncRead, AsyncReadExt},
    std::{
        collections::HashMap,
        io::Write,
        path::{Path, PathBuf},
        pin::Pin,
        sync::{Mutex, PoisonError},
    },
};

/// Reference to a stored artifact.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ArtifactRef {
    /// Hex SHA-256 of the content.
    pub sha256: String,
    /// Size of the content in bytes.
    pub size: u64,
}

impl ArtifactRef {
    pub fn content_digest(&self) -> Result<ContentDigest> {
        ContentDigest::sha256_hex(&self.sha256)
    }
}

/// Storage of immutable artifacts keyed by SHA-256.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store the content of a reader, returning its reference.
    ///
    /// Storing content that already exists is a no-op.
    async fn put(&self, reader: Pin<Box<dyn AsyncRead + Send>>) -> Result<ArtifactRef>;

    /// Open a stored artifact for reading.
    async fn open(&self, artifact: &ArtifactRef) -> Result<Pin<Box<dyn AsyncRead + Send>>>;

    /// Resolve an artifact by SHA-256, if stored.
    async fn contains(&self, sha256: &str) -> Result<Option<ArtifactRef>>;
}

/// Read all of a reader while computing its SHA-256.
async fn read_digested(reader: Pin<Box<dyn AsyncRead + Send>>) -> Result<(Vec<u8>, ArtifactRef)> {
    let mut reader = DigestingReader::new(reader, ChecksumType::Sha256);
    let mut data = vec![];
    reader.read_to_end(&mut data).await?;

    let (_, digest, size) = reader.finish();

    Ok((
        data,
        ArtifactRef {
            sha256: digest.digest_hex(),
            size,
        },
    ))
}

/// An [ArtifactStore] holding everything in memory.
#[derive(Default)]
pub struct MemoryArtifactStore {
    artifacts: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct stored artifacts.
    pub fn len(&self) -> usize {
        self.artifacts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(&self, reader: Pin<Box<dyn AsyncRead + Send>>) -> Result<ArtifactRef> {
        let (data, artifact) = read_digested(reader).await?;

        self.artifacts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(artifact.sha256.clone())
            .or_insert(data);

        Ok(artifact)
    }

    async fn open(&self, artifact: &ArtifactRef) -> Result<Pin<Box<dyn AsyncRead + Send>>> {
        let data = self
            .artifacts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&artifact.sha256)
            .cloned()
            .ok_or_else(|| MirrorError::ArtifactNotFound(artifact.sha256.clone()))?;

        Ok(Box::pin(futures::io::Cursor::new(data)))
    }

    async fn contains(&self, sha256: &str) -> Result<Option<ArtifactRef>> {
        Ok(self
            .artifacts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(sha256)
            .map(|data| ArtifactRef {
                sha256: sha256.to_string(),
                size: data.len() as u64,
            }))
    }
}

/// An [ArtifactStore] backed by a directory.
///
/// Artifacts live at `<root>/<aa>/<bb>/<sha256>`. Writes go through a temporary file
/// in the root directory and are renamed into place once complete.
pub struct FilesystemArtifactStore {
    root: PathBuf,
}

impl FilesystemArtifactStore {
    /// Construct an instance storing under the given directory, creating it if needed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;

        Ok(Self { root })
    }

    fn path(&self, sha256: &str) -> Result<PathBuf> {
        if sha256.len() != 64 || !sha256.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(MirrorError::InvalidRequest(format!(
                "not a SHA-256 digest: {}",
                sha256
            )));
        }

        Ok(self
            .root
            .join(&sha256[0..2])
            .join(&sha256[2..4])
            .join(sha256))
    }
}

#[async_trait]
impl ArtifactStore for FilesystemArtifactStore {
    async fn put(&self, reader: Pin<Box<dyn AsyncRead + Send>>) -> Result<ArtifactRef> {
        let mut reader = DigestingReader::new(reader, ChecksumType::Sha256);
        let mut temp = tempfile::NamedTempFile::new_in(&self.root)?;

        {
            let mut writer = futures::io::AllowStdIo::new(temp.as_file_mut());
            futures::io::copy(&mut reader, &mut writer).await?;
        }
        temp.as_file_mut().flush()?;

        let (_, digest, size) = reader.finish();
        let artifact = ArtifactRef {
            sha256: digest.digest_hex(),
            size,
        };

        let dest = self.path(&artifact.sha256)?;
        if dest.exists() {
            return Ok(artifact);
        }

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        temp.persist(&dest).map_err(|e| MirrorError::Io(e.error))?;

        log::debug!("stored artifact {} ({} bytes)", artifact.sha256, size);

        Ok(artifact)
    }

    async fn open(&self, artifact: &ArtifactRef) -> Result<Pin<Box<dyn AsyncRead + Send>>> {
        let path = self.path(&artifact.sha256)?;

        let f = std::fs::File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                MirrorError::ArtifactNotFound(artifact.sha256.clone())
            } else {
                MirrorError::Io(e)
            }
        })?;

        Ok(Box::pin(futures::io::AllowStdIo::new(f)))
    }

    async fn contains(&self, sha256: &str) -> Result<Option<ArtifactRef>> {
        let path = self.path(sha256)?;

        match std::fs::metadata(&path) {
            Ok(metadata) => Ok(Some(ArtifactRef {
                sha256: sha256.to_string(),
                size: metadata.len(),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    fn hello() -> Pin<Box<dyn AsyncRead + Send>> {
        Box::pin(futures::io::Cursor::new(b"hello".to_vec()))
    }

    async fn read_all(store: &dyn ArtifactStore, artifact: &ArtifactRef) -> Result<Vec<u8>> {
        let mut data = vec![];
        store.open(artifact).await?.read_to_end(&mut data).await?;
        Ok(data)
    }

    #[tokio::test]
    async fn memory_store() -> Result<()> {
        let store = MemoryArtifactStore::new();

        let artifact = store.put(hello()).await?;
        assert_eq!(artifact.sha256, HELLO_SHA256);
        assert_eq!(artifact.size, 5);

        store.put(hello()).await?;
        assert_eq!(store.len(), 1);

        assert_eq!(read_all(&store, &artifact).await?, b"hello");
        assert_eq!(store.contains(HELLO_SHA256).await?, Some(artifact));

        Ok(())
    }

    #[tokio::test]
    async fn filesystem_store() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        let store = FilesystemArtifactStore::new(td.path())?;

        assert!(store.contains(HELLO_SHA256).await?.is_none());

        let artifact = store.put(hello()).await?;
        assert!(td
            .path()
            .join("2c")
            .join("f2")
            .join(HELLO_SHA256)
            .exists());

        let again = store.put(hello()).await?;
        assert_eq!(again, artifact);

        assert_eq!(read_all(&store, &artifact).await?, b"hello");
        assert_eq!(store.contains(HELLO_SHA256).await?, Some(artifact));

        let missing = ArtifactRef {
            sha256: "0".repeat(64),
            size: 0,
        };
        assert!(matches!(
            store.open(&missing).await,
            Err(MirrorError::ArtifactNotFound(_))
        ));

        Ok(())
    }
}
