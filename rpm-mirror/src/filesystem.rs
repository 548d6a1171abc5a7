// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Filesystem based RPM repositories. */

use {
    crate::{
        error::{MirrorError, Result},
        io::{ContentDigest, DigestingReader},
        publish::{PathVerification, PathVerificationState, PathWrite, PublicationWriter},
        DataResolver, RepositoryRootReader,
    },
    async_trait::async_trait,
    futures::{AsyncRead, AsyncReadExt},
    std::{
        borrow::Cow,
        future::Future,
        path::{Path, PathBuf},
        pin::Pin,
    },
    url::Url,
};

/// A readable interface to an RPM repository backed by a filesystem.
#[derive(Clone, Debug)]
pub struct FilesystemRepositoryReader {
    root_dir: PathBuf,
}

impl FilesystemRepositoryReader {
    /// Construct a new instance, bound to the root directory specified.
    ///
    /// No validation of the passed path is performed.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            root_dir: path.as_ref().to_path_buf(),
        }
    }
}

impl DataResolver for FilesystemRepositoryReader {
    #[allow(clippy::type_complexity)]
    fn get_path(
        &self,
        path: String,
    ) -> Pin<Box<dyn Future<Output = Result<Pin<Box<dyn AsyncRead + Send>>>> + Send + '_>> {
        async fn run(
            slf: &FilesystemRepositoryReader,
            path: String,
        ) -> Result<Pin<Box<dyn AsyncRead + Send>>> {
            let fs_path = slf.root_dir.join(&path);

            let f = std::fs::File::open(&fs_path)
                .map_err(|source| MirrorError::RemoteFetch { path, source })?;

            Ok(Box::pin(futures::io::AllowStdIo::new(f)))
        }

        Box::pin(run(self, path))
    }
}

impl RepositoryRootReader for FilesystemRepositoryReader {
    fn url(&self) -> Result<Url> {
        Url::from_directory_path(&self.root_dir).map_err(|_| {
            MirrorError::InvalidRequest(format!(
                "cannot express {} as a URL",
                self.root_dir.display()
            ))
        })
    }
}

/// A writable RPM repository backed by a filesystem.
pub struct FilesystemPublicationWriter {
    root_dir: PathBuf,
}

impl FilesystemPublicationWriter {
    /// Construct a new instance, bound to the root directory specified.
    ///
    /// The directory does not need to exist.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            root_dir: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl PublicationWriter for FilesystemPublicationWriter {
    async fn verify_path<'path>(
        &self,
        path: &'path str,
        expected_content: Option<(u64, ContentDigest)>,
    ) -> Result<PathVerification<'path>> {
        let dest_path = self.root_dir.join(path);

        let metadata = match std::fs::metadata(&dest_path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(PathVerification {
                    path,
                    state: PathVerificationState::Missing,
                });
            }
            Err(e) => return Err(e.into()),
        };

        if !metadata.is_file() {
            return Ok(PathVerification {
                path,
                state: PathVerificationState::Missing,
            });
        }

        let state = match expected_content {
            None => PathVerificationState::ExistsNoIntegrityCheck,
            Some((expected_size, _)) if metadata.len() != expected_size => {
                PathVerificationState::ExistsIntegrityMismatch
            }
            Some((_, expected_digest)) => {
                let f = futures::io::AllowStdIo::new(std::fs::File::open(&dest_path)?);
                let mut reader = DigestingReader::new(f, expected_digest.checksum_type());

                let mut buf = [0u8; 16384];
                while reader.read(&mut buf[..]).await? > 0 {}

                if reader.finish().1 == expected_digest {
                    PathVerificationState::ExistsIntegrityVerified
                } else {
                    PathVerificationState::ExistsIntegrityMismatch
                }
            }
        };

        Ok(PathVerification { path, state })
    }

    async fn write_path<'path, 'reader>(
        &self,
        path: Cow<'path, str>,
        reader: Pin<Box<dyn AsyncRead + Send + 'reader>>,
    ) -> Result<PathWrite<'path>> {
        let dest_path = self.root_dir.join(path.as_ref());
        let parent = dest_path
            .parent()
            .ok_or_else(|| MirrorError::InvalidRequest(format!("invalid path: {}", path)))?;

        std::fs::create_dir_all(parent)?;

        // Readers never observe a partially written file.
        let temp = tempfile::NamedTempFile::new_in(parent)?;
        let mut writer = futures::io::AllowStdIo::new(temp);

        let bytes_written = futures::io::copy(reader, &mut writer).await?;

        writer
            .into_inner()
            .persist(&dest_path)
            .map_err(|e| MirrorError::Io(e.error))?;

        log::debug!("wrote {} bytes to {}", bytes_written, dest_path.display());

        Ok(PathWrite {
            path,
            bytes_written,
        })
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::io::{ChecksumType, ContentDigest},
    };

    #[tokio::test]
    async fn write_then_verify() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        let writer = FilesystemPublicationWriter::new(td.path());

        let data = b"hello".to_vec();
        let digest = ContentDigest::compute(ChecksumType::Sha256, &data);

        let res = writer.verify_path("a/b/hello", Some((5, digest.clone()))).await?;
        assert_eq!(res.state, PathVerificationState::Missing);

        let write = writer
            .write_path(
                Cow::Borrowed("a/b/hello"),
                Box::pin(futures::io::Cursor::new(data.clone())),
            )
            .await?;
        assert_eq!(write.bytes_written, 5);

        let res = writer.verify_path("a/b/hello", Some((5, digest))).await?;
        assert_eq!(res.state, PathVerificationState::ExistsIntegrityVerified);

        let other = ContentDigest::compute(ChecksumType::Sha256, b"jello");
        let res = writer.verify_path("a/b/hello", Some((5, other))).await?;
        assert_eq!(res.state, PathVerificationState::ExistsIntegrityMismatch);

        let res = writer.verify_path("a/b/hello", None).await?;
        assert_eq!(res.state, PathVerificationState::ExistsNoIntegrityCheck);

        Ok(())
    }

    #[tokio::test]
    async fn reader_paths() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        std::fs::create_dir_all(td.path().join("repodata"))?;
        std::fs::write(td.path().join("repodata/hello"), b"hello")?;

        let reader = FilesystemRepositoryReader::new(td.path());
        assert_eq!(reader.url()?.scheme(), "file");

        let mut data = vec![];
        reader
            .get_path("repodata/hello".to_string())
            .await?
            .read_to_end(&mut data)
            .await?;
        assert_eq!(data, b"hello");

        match reader.get_path("repodata/missing".to_string()).await {
            Err(e) => assert!(e.is_not_found()),
            Ok(_) => panic!("missing path should not open"),
        }

        let digest = ContentDigest::compute(ChecksumType::Sha256, b"jello");
        let mut verified = reader
            .get_path_with_digest_verification("repodata/hello".to_string(), Some(5), digest)
            .await?;
        let mut data = vec![];
        let err = verified
            .read_to_end(&mut data)
            .await
            .err()
            .map(|e| crate::io::classify_read_error("repodata/hello", e));
        assert!(matches!(err, Some(MirrorError::RemoteIntegrity { .. })));

        Ok(())
    }
}
