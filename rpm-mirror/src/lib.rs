// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Mirror, version and republish RPM repositories.

This crate synchronizes remote RPM repositories into immutable, versioned content sets
and publishes any version as a new repository with regenerated metadata.

RPM repositories are defined by a base URL. Under that base URL is typically a
`repodata` directory containing a `repomd.xml` file. This `repomd.xml` file
(represented by [metadata::repomd::RepoMd]) describes other _metadata_
files constituting the repository. Files and data structures in the `repodata`
directory are defined in the [metadata] module tree.

The [RepositoryRootReader] trait defines a generic read interface bound to a
base URL. [http::HttpRepositoryClient] reads repositories over HTTP and
[filesystem::FilesystemRepositoryReader] reads them from a local directory.

[sync::Synchronizer] turns a remote repository into a new repository version of a
[platform::ContentPlatform]. [publish::Publisher] turns a repository version into a
[platform::Publication] and writes it through a [publish::PublicationWriter].
*/

pub mod config;
pub mod content;
pub mod error;
pub mod filesystem;
pub mod generate;
pub mod http;
pub mod io;
pub mod metadata;
pub mod package_version;
pub mod platform;
pub mod publish;
pub mod reconcile;
pub mod signing;
pub mod storage;
pub mod sync;
pub mod task;

pub use crate::error::{MirrorError, Result};

use {
    crate::{
        io::{classify_read_error, ContentDigest, ContentValidatingReader},
        metadata::repomd::RepoMd,
        platform::Remote,
    },
    futures::{AsyncRead, AsyncReadExt},
    std::{future::Future, pin::Pin},
};

/// Path based content fetching.
pub trait DataResolver: Sync {
    /// Get the content of a relative path as an async reader.
    #[allow(clippy::type_complexity)]
    fn get_path(
        &self,
        path: String,
    ) -> Pin<Box<dyn Future<Output = Result<Pin<Box<dyn AsyncRead + Send>>>> + Send + '_>>;

    /// Obtain a reader that performs content integrity checking.
    ///
    /// Because content digests can only be computed once all content is read, the reader
    /// emits data as it is streaming but only compares the cryptographic digest once all
    /// data has been read. If there is a content digest mismatch, an error will be raised
    /// once the final byte is read. Use [io::classify_read_error] to turn such an error
    /// into a [MirrorError::RemoteIntegrity].
    ///
    /// Validation only occurs if the stream is read to completion. Failure to read the
    /// entire stream could result in reading of unexpected content.
    #[allow(clippy::type_complexity)]
    fn get_path_with_digest_verification(
        &self,
        path: String,
        expected_size: Option<u64>,
        expected_digest: ContentDigest,
    ) -> Pin<Box<dyn Future<Output = Result<Pin<Box<dyn AsyncRead + Send>>>> + Send + '_>> {
        async fn run(
            slf: &(impl DataResolver + ?Sized),
            path: String,
            expected_size: Option<u64>,
            expected_digest: ContentDigest,
        ) -> Result<Pin<Box<dyn AsyncRead + Send>>> {
            Ok(Box::pin(ContentValidatingReader::new(
                slf.get_path(path).await?,
                expected_size,
                expected_digest,
            )))
        }

        Box::pin(run(self, path, expected_size, expected_digest))
    }
}

/// A read-only interface for the root of an RPM repository.
pub trait RepositoryRootReader: DataResolver + Sync {
    /// Obtain the URL to which this reader is bound.
    fn url(&self) -> Result<url::Url>;

    /// Fetch and parse a `repomd.xml` file given the relative path to that file.
    fn fetch_repomd(
        &self,
        path: String,
    ) -> Pin<Box<dyn Future<Output = Result<RepoMd>> + Send + '_>> {
        async fn run(slf: &(impl RepositoryRootReader + ?Sized), path: String) -> Result<RepoMd> {
            let mut reader = slf.get_path(path.clone()).await?;

            let mut data = vec![];
            reader
                .read_to_end(&mut data)
                .await
                .map_err(|e| classify_read_error(&path, e))?;

            RepoMd::from_reader(std::io::Cursor::new(data))
        }

        Box::pin(run(self, path))
    }
}

/// Obtain a reader for the repository a [Remote] points at.
///
/// `http`, `https` and `file` URLs are supported.
pub fn reader_for_remote(remote: &Remote) -> Result<Box<dyn RepositoryRootReader + Send>> {
    match remote.url.scheme() {
        "http" | "https" => Ok(Box::new(http::HttpRepositoryClient::from_remote(remote)?)),
        "file" => {
            let path = remote.url.to_file_path().map_err(|_| {
                MirrorError::InvalidRequest(format!("not a local path: {}", remote.url))
            })?;

            Ok(Box::new(filesystem::FilesystemRepositoryReader::new(path)))
        }
        scheme => Err(MirrorError::UnsupportedUrlScheme(scheme.to_string())),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn remote_schemes() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        let local = url::Url::from_directory_path(td.path())
            .map_err(|_| MirrorError::InvalidRequest("bad path".to_string()))?;

        let reader = reader_for_remote(&Remote::new(local))?;
        assert_eq!(reader.url()?.scheme(), "file");

        let reader = reader_for_remote(&Remote::new(url::Url::parse(
            "https://example.com/fedora/",
        )?))?;
        assert_eq!(reader.url()?.as_str(), "https://example.com/fedora/");

        assert!(matches!(
            reader_for_remote(&Remote::new(url::Url::parse("ftp://example.com/")?)),
            Err(MirrorError::UnsupportedUrlScheme(_))
        ));

        Ok(())
    }
}
