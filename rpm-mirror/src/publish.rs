// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Publishing repository versions.

[Publisher::publish] turns one repository version into an immutable [Publication]:
generated metadata, an optional detached signature over `repomd.xml` and the package
artifacts at their layout paths. [Publisher::write_publication] materializes a
publication through a [PublicationWriter], skipping files already present with the
expected content.
*/

use {
    crate::{
        content::ContentKind,
        error::{MirrorError, Result},
        generate::{GenerateOptions, MetadataGenerator, VersionContent},
        io::{ChecksumType, ContentDigest},
        platform::{
            ContentPlatform, Publication, PublishedContent, PublishedFile, RepositoryId,
            RepositoryVersion, VersionId,
        },
        signing::SigningServiceRegistry,
        storage::ArtifactStore,
        task::CancellationToken,
    },
    async_trait::async_trait,
    futures::{AsyncRead, StreamExt},
    std::{borrow::Cow, collections::BTreeMap, pin::Pin, sync::Arc},
};

/// Path of the detached signature of `repomd.xml`.
pub const REPOMD_SIGNATURE_PATH: &str = "repodata/repomd.xml.asc";

/// Path of the public key verifying [REPOMD_SIGNATURE_PATH].
pub const PUBLIC_KEY_PATH: &str = "repodata/public.key";

const REPOMD_PATH: &str = "repodata/repomd.xml";

/// Describes the result of a [PublicationWriter::verify_path()] call.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PathVerificationState {
    /// Path exists but no integrity check was performed.
    ExistsNoIntegrityCheck,
    /// Path exists and its integrity was verified.
    ExistsIntegrityVerified,
    /// Path exists and its integrity does not match expectations.
    ExistsIntegrityMismatch,
    /// Path does not exist.
    Missing,
}

/// Represents the result of a [PublicationWriter::verify_path()] call.
#[derive(Clone, Debug)]
pub struct PathVerification<'a> {
    pub path: &'a str,
    pub state: PathVerificationState,
}

/// Represents a write operation to a path.
#[derive(Clone, Debug)]
pub struct PathWrite<'a> {
    pub path: Cow<'a, str>,
    pub bytes_written: u64,
}

/// A destination for published repository files.
#[async_trait]
pub trait PublicationWriter: Sync {
    /// Verify the existence of a path with optional content integrity checking.
    async fn verify_path<'path>(
        &self,
        path: &'path str,
        expected_content: Option<(u64, ContentDigest)>,
    ) -> Result<PathVerification<'path>>;

    /// Write data to a path.
    async fn write_path<'path, 'reader>(
        &self,
        path: Cow<'path, str>,
        reader: Pin<Box<dyn AsyncRead + Send + 'reader>>,
    ) -> Result<PathWrite<'path>>;
}

/// What to publish.
///
/// Exactly one field must be set. A repository publishes its latest version.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PublishRequest {
    pub repository: Option<RepositoryId>,
    pub repository_version: Option<VersionId>,
}

impl PublishRequest {
    pub fn repository(id: RepositoryId) -> Self {
        Self {
            repository: Some(id),
            repository_version: None,
        }
    }

    pub fn version(id: VersionId) -> Self {
        Self {
            repository: None,
            repository_version: Some(id),
        }
    }
}

/// Describes an event during publishing.
#[derive(Clone, Debug)]
pub enum PublishEvent {
    ResolvedVersion(RepositoryId, u64),
    GeneratedMetadata(usize),
    SignedMetadata(String),
    ResolvedArtifacts(usize),
    PublicationCreated(u64),
    PathCurrent(String),
    PathMissing(String),
    PathsToWrite(usize),
    PathWritten(String, u64),
}

impl std::fmt::Display for PublishEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ResolvedVersion(repository, number) => {
                write!(f, "publishing version {} of repository {}", number, repository)
            }
            Self::GeneratedMetadata(count) => write!(f, "generated {} metadata files", count),
            Self::SignedMetadata(service) => {
                write!(f, "signed repomd.xml with signing service {}", service)
            }
            Self::ResolvedArtifacts(count) => write!(f, "resolved {} package artifacts", count),
            Self::PublicationCreated(id) => write!(f, "created publication {}", id),
            Self::PathCurrent(path) => write!(f, "{} is up to date", path),
            Self::PathMissing(path) => write!(f, "{} needs writing", path),
            Self::PathsToWrite(count) => write!(f, "{} paths to write", count),
            Self::PathWritten(path, size) => write!(f, "wrote {} bytes to {}", size, path),
        }
    }
}

fn inline_file(data: Vec<u8>, content_type: &str) -> PublishedFile {
    PublishedFile {
        size: data.len() as u64,
        sha256: ContentDigest::compute(ChecksumType::Sha256, &data).digest_hex(),
        content: PublishedContent::Inline(data),
        content_type: content_type.to_string(),
    }
}

/// Order in which paths are written: packages, then metadata, then the index.
fn write_phase(path: &str, file: &PublishedFile) -> u8 {
    if matches!(file.content, PublishedContent::Artifact(_)) {
        0
    } else if path.starts_with(REPOMD_PATH) || path == PUBLIC_KEY_PATH {
        2
    } else {
        1
    }
}

/// Produces and writes publications.
pub struct Publisher {
    platform: Arc<dyn ContentPlatform>,
    artifacts: Arc<dyn ArtifactStore>,
    signers: SigningServiceRegistry,
}

impl Publisher {
    pub fn new(
        platform: Arc<dyn ContentPlatform>,
        artifacts: Arc<dyn ArtifactStore>,
        signers: SigningServiceRegistry,
    ) -> Self {
        Self {
            platform,
            artifacts,
            signers,
        }
    }

    async fn resolve_version(&self, request: &PublishRequest) -> Result<RepositoryVersion> {
        match (request.repository, request.repository_version) {
            (Some(repository), None) => self.platform.latest_version(repository).await,
            (None, Some(version)) => self.platform.version(version).await,
            (Some(_), Some(_)) => Err(MirrorError::InvalidRequest(
                "specify either a repository or a repository version, not both".to_string(),
            )),
            (None, None) => Err(MirrorError::InvalidRequest(
                "a repository or repository version is required".to_string(),
            )),
        }
    }

    /// Create a publication of a repository version.
    pub async fn publish<F>(
        &self,
        request: &PublishRequest,
        cancel: &CancellationToken,
        progress_cb: &Option<F>,
    ) -> Result<Publication>
    where
        F: Fn(PublishEvent),
    {
        let version = self.resolve_version(request).await?;
        let repository = self.platform.repository(version.repository).await?;

        log::info!(
            "publishing version {} of repository {}",
            version.number,
            repository.name
        );
        if let Some(cb) = progress_cb {
            cb(PublishEvent::ResolvedVersion(repository.id, version.number));
        }

        cancel.check()?;

        let content = VersionContent::load(self.platform.as_ref(), version.id).await?;
        let generator = MetadataGenerator::new(GenerateOptions::from_settings(&repository.settings));
        let generated = generator.generate(&content)?;

        if let Some(cb) = progress_cb {
            cb(PublishEvent::GeneratedMetadata(generated.len()));
        }

        cancel.check()?;

        let mut files = BTreeMap::new();
        for file in generated {
            files.insert(file.path, inline_file(file.data, file.content_type));
        }

        let signing_service = repository.settings.metadata_signing_service.clone();

        if let Some(service) = &signing_service {
            let signer = self.signers.get(service)?;

            let repomd = match files.get(REPOMD_PATH).map(|f| &f.content) {
                Some(PublishedContent::Inline(data)) => data.clone(),
                _ => {
                    return Err(MirrorError::Signing(
                        "repomd.xml missing from generated metadata".to_string(),
                    ))
                }
            };

            let signed = signer.sign(&repomd).await?;

            files.insert(
                REPOMD_SIGNATURE_PATH.to_string(),
                inline_file(signed.signature, "application/pgp-signature"),
            );
            files.insert(
                PUBLIC_KEY_PATH.to_string(),
                inline_file(signed.public_key, "application/pgp-keys"),
            );

            log::info!("signed repomd.xml with {}", service);
            if let Some(cb) = progress_cb {
                cb(PublishEvent::SignedMetadata(service.clone()));
            }
        }

        let mut artifact_count = 0;
        for stored in content.units_of(&[ContentKind::Package]) {
            let package = match stored.unit.as_package() {
                Some(p) => p,
                None => continue,
            };

            let artifact = stored
                .artifact
                .clone()
                .ok_or_else(|| MirrorError::ArtifactNotFound(package.nevra()))?;

            let path = generator.package_path(package);

            if files
                .insert(
                    path.clone(),
                    PublishedFile {
                        size: artifact.size,
                        sha256: artifact.sha256.clone(),
                        content: PublishedContent::Artifact(artifact),
                        content_type: "application/x-rpm".to_string(),
                    },
                )
                .is_some()
            {
                return Err(MirrorError::DuplicatePublishedPath(path));
            }
            artifact_count += 1;
        }

        if let Some(cb) = progress_cb {
            cb(PublishEvent::ResolvedArtifacts(artifact_count));
        }

        let publication = self
            .platform
            .create_publication(version.id, files, signing_service)
            .await?;

        log::info!(
            "created publication {} of repository version {}",
            publication.id,
            publication.repository_version
        );
        if let Some(cb) = progress_cb {
            cb(PublishEvent::PublicationCreated(publication.id.0));
        }

        Ok(publication)
    }

    async fn open_file(&self, file: &PublishedFile) -> Result<Pin<Box<dyn AsyncRead + Send>>> {
        match &file.content {
            PublishedContent::Inline(data) => Ok(Box::pin(futures::io::Cursor::new(data.clone()))),
            PublishedContent::Artifact(artifact) => self.artifacts.open(artifact).await,
        }
    }

    /// Write the files of a publication.
    ///
    /// Paths whose content already verifies are left alone. Packages are written
    /// before metadata and `repomd.xml` last, so readers never see an index
    /// referring to missing files.
    pub async fn write_publication<F>(
        &self,
        publication: &Publication,
        writer: &impl PublicationWriter,
        threads: usize,
        cancel: &CancellationToken,
        progress_cb: &Option<F>,
    ) -> Result<()>
    where
        F: Fn(PublishEvent),
    {
        let threads = threads.max(1);

        let mut fs = futures::stream::iter(publication.files.iter().map(|(path, file)| async move {
            let digest = ContentDigest::sha256_hex(&file.sha256)?;
            writer.verify_path(path, Some((file.size, digest))).await
        }))
        .buffer_unordered(threads);

        let mut missing = vec![];

        while let Some(result) = fs.next().await {
            let result = result?;

            match result.state {
                PathVerificationState::ExistsIntegrityVerified => {
                    if let Some(cb) = progress_cb {
                        cb(PublishEvent::PathCurrent(result.path.to_string()));
                    }
                }
                PathVerificationState::ExistsNoIntegrityCheck
                | PathVerificationState::ExistsIntegrityMismatch
                | PathVerificationState::Missing => {
                    if let Some(cb) = progress_cb {
                        cb(PublishEvent::PathMissing(result.path.to_string()));
                    }
                    missing.push(result.path);
                }
            }
        }

        if let Some(cb) = progress_cb {
            cb(PublishEvent::PathsToWrite(missing.len()));
        }

        for phase in 0..=2 {
            cancel.check()?;

            let paths = missing
                .iter()
                .filter_map(|path| {
                    publication
                        .files
                        .get(*path)
                        .filter(|file| write_phase(path, file) == phase)
                        .map(|file| (*path, file))
                })
                .collect::<Vec<_>>();

            let mut fs = futures::stream::iter(paths.into_iter().map(|(path, file)| async move {
                let reader = self.open_file(file).await?;
                writer.write_path(Cow::Borrowed(path), reader).await
            }))
            .buffer_unordered(threads);

            while let Some(write) = fs.next().await {
                let write = write?;

                if let Some(cb) = progress_cb {
                    cb(PublishEvent::PathWritten(
                        write.path.to_string(),
                        write.bytes_written,
                    ));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{
            content::{ContentUnit, Package, PackageChecksum},
            filesystem::FilesystemPublicationWriter,
            generate::test::fixture_units,
            metadata::repomd::RepoMd,
            platform::{MemoryPlatform, RepositorySettings},
            signing::{test::test_signer, MetadataSigner, SignedPayload},
            storage::MemoryArtifactStore,
        },
        std::collections::BTreeSet,
    };

    struct FailingSigner;

    #[async_trait]
    impl MetadataSigner for FailingSigner {
        async fn sign(&self, _payload: &[u8]) -> Result<SignedPayload> {
            Err(MirrorError::Signing("signing service unavailable".to_string()))
        }
    }

    struct Fixture {
        platform: Arc<MemoryPlatform>,
        artifacts: Arc<MemoryArtifactStore>,
        repository: RepositoryId,
        versions: Vec<VersionId>,
    }

    /// A repository with version 1 holding every fixture unit and version 2 without
    /// advisories.
    async fn fixture(settings: RepositorySettings) -> Result<Fixture> {
        let platform = Arc::new(MemoryPlatform::new());
        let artifacts = Arc::new(MemoryArtifactStore::new());
        let repo = platform.add_repository("zoo", settings);

        let mut all = BTreeSet::new();
        let mut without_advisories = BTreeSet::new();

        for unit in fixture_units()? {
            let artifact = match &unit {
                ContentUnit::Package(p) => Some(
                    artifacts
                        .put(Box::pin(futures::io::Cursor::new(p.nevra().into_bytes())))
                        .await?,
                ),
                _ => None,
            };
            let is_advisory = unit.as_advisory().is_some();

            let (id, _) = platform.create_content_unit(unit, artifact).await?;
            all.insert(id);
            if !is_advisory {
                without_advisories.insert(id);
            }
        }

        let v0 = platform.latest_version(repo.id).await?;
        let v1 = platform.create_version(repo.id, v0.id, all).await?;
        let v2 = platform
            .create_version(repo.id, v1.id, without_advisories)
            .await?;

        Ok(Fixture {
            platform,
            artifacts,
            repository: repo.id,
            versions: vec![v1.id, v2.id],
        })
    }

    fn publisher(f: &Fixture, signers: SigningServiceRegistry) -> Publisher {
        Publisher::new(f.platform.clone(), f.artifacts.clone(), signers)
    }

    const NO_PROGRESS: Option<fn(PublishEvent)> = None;

    #[tokio::test]
    async fn publication_binds_version() -> Result<()> {
        let f = fixture(RepositorySettings::default()).await?;
        let publisher = publisher(&f, SigningServiceRegistry::new());
        let cancel = CancellationToken::new();

        let p1 = publisher
            .publish(&PublishRequest::version(f.versions[0]), &cancel, &NO_PROGRESS)
            .await?;
        let p2 = publisher
            .publish(&PublishRequest::version(f.versions[1]), &cancel, &NO_PROGRESS)
            .await?;
        let latest = publisher
            .publish(&PublishRequest::repository(f.repository), &cancel, &NO_PROGRESS)
            .await?;

        assert_eq!(p1.repository_version, f.versions[0]);
        assert_eq!(p2.repository_version, f.versions[1]);
        assert_eq!(latest.repository_version, f.versions[1]);
        assert_eq!(f.platform.publication(p1.id).await?, p1);

        assert!(p1
            .files
            .contains_key("Packages/b/bear-4.1-1.noarch.rpm"));
        assert!(p1.files.keys().any(|p| p.ends_with("-updateinfo.xml.gz")));
        assert!(!p2.files.keys().any(|p| p.ends_with("-updateinfo.xml.gz")));

        Ok(())
    }

    #[tokio::test]
    async fn conflicting_package_paths() -> Result<()> {
        let platform = Arc::new(MemoryPlatform::new());
        let artifacts = Arc::new(MemoryArtifactStore::new());
        let repo = platform.add_repository("zoo", RepositorySettings::default());

        let mut ids = BTreeSet::new();
        for data in [&b"first build"[..], &b"second build"[..]] {
            let artifact = artifacts
                .put(Box::pin(futures::io::Cursor::new(data.to_vec())))
                .await?;

            let package = Package {
                package_type: "rpm".into(),
                name: "bear".into(),
                arch: "noarch".into(),
                epoch: "0".into(),
                version: "1.0".into(),
                release: "1".into(),
                checksum: Some(PackageChecksum {
                    checksum_type: ChecksumType::Sha256,
                    value: artifact.sha256.clone(),
                    pkgid: true,
                }),
                location_href: "bear-1.0-1.noarch.rpm".into(),
                ..Default::default()
            };

            let (id, _) = platform
                .create_content_unit(ContentUnit::Package(package), Some(artifact))
                .await?;
            ids.insert(id);
        }
        assert_eq!(ids.len(), 2);

        let v0 = platform.latest_version(repo.id).await?;
        let v1 = platform.create_version(repo.id, v0.id, ids).await?;

        let publisher = Publisher::new(platform, artifacts, SigningServiceRegistry::new());
        let res = publisher
            .publish(
                &PublishRequest::version(v1.id),
                &CancellationToken::new(),
                &NO_PROGRESS,
            )
            .await;

        match res {
            Err(MirrorError::DuplicatePublishedPath(path)) => {
                assert_eq!(path, "Packages/b/bear-1.0-1.noarch.rpm")
            }
            other => panic!("expected duplicate path error, got {:?}", other),
        }

        Ok(())
    }

    #[tokio::test]
    async fn invalid_requests() -> Result<()> {
        let f = fixture(RepositorySettings::default()).await?;
        let publisher = publisher(&f, SigningServiceRegistry::new());
        let cancel = CancellationToken::new();

        for request in [
            PublishRequest::default(),
            PublishRequest {
                repository: Some(f.repository),
                repository_version: Some(f.versions[0]),
            },
        ] {
            assert!(matches!(
                publisher.publish(&request, &cancel, &NO_PROGRESS).await,
                Err(MirrorError::InvalidRequest(_))
            ));
        }

        Ok(())
    }

    #[tokio::test]
    async fn repeated_publish_is_identical() -> Result<()> {
        let f = fixture(RepositorySettings::default()).await?;
        let publisher = publisher(&f, SigningServiceRegistry::new());
        let cancel = CancellationToken::new();
        let request = PublishRequest::version(f.versions[0]);

        let a = publisher.publish(&request, &cancel, &NO_PROGRESS).await?;
        let b = publisher.publish(&request, &cancel, &NO_PROGRESS).await?;

        assert_ne!(a.id, b.id);
        assert_eq!(a.files, b.files);

        Ok(())
    }

    #[tokio::test]
    async fn signed_publication() -> Result<()> {
        let f = fixture(RepositorySettings {
            metadata_signing_service: Some("zoo-signer".to_string()),
            ..Default::default()
        })
        .await?;

        let mut signers = SigningServiceRegistry::new();
        signers.register("zoo-signer", Arc::new(test_signer()?));
        let publisher = publisher(&f, signers);

        let publication = publisher
            .publish(
                &PublishRequest::version(f.versions[0]),
                &CancellationToken::new(),
                &NO_PROGRESS,
            )
            .await?;

        assert_eq!(publication.signing_service.as_deref(), Some("zoo-signer"));

        match &publication.files[REPOMD_SIGNATURE_PATH].content {
            PublishedContent::Inline(data) => {
                assert!(data.starts_with(b"-----BEGIN PGP SIGNATURE-----"))
            }
            other => panic!("unexpected content: {:?}", other),
        }
        assert!(publication.files.contains_key(PUBLIC_KEY_PATH));

        Ok(())
    }

    #[tokio::test]
    async fn signing_failure_fails_publish() -> Result<()> {
        let f = fixture(RepositorySettings {
            metadata_signing_service: Some("broken".to_string()),
            ..Default::default()
        })
        .await?;

        let mut signers = SigningServiceRegistry::new();
        signers.register("broken", Arc::new(FailingSigner));
        let publisher = publisher(&f, signers);

        let res = publisher
            .publish(
                &PublishRequest::version(f.versions[0]),
                &CancellationToken::new(),
                &NO_PROGRESS,
            )
            .await;
        assert!(matches!(res, Err(MirrorError::Signing(_))));

        // Committed versions are untouched.
        assert_eq!(
            f.platform.latest_version(f.repository).await?.id,
            f.versions[1]
        );

        Ok(())
    }

    #[tokio::test]
    async fn write_to_filesystem() -> Result<()> {
        let f = fixture(RepositorySettings::default()).await?;
        let publisher = publisher(&f, SigningServiceRegistry::new());
        let cancel = CancellationToken::new();

        let publication = publisher
            .publish(&PublishRequest::version(f.versions[0]), &cancel, &NO_PROGRESS)
            .await?;

        let td = tempfile::TempDir::new()?;
        let writer = FilesystemPublicationWriter::new(td.path());

        let written = std::sync::Mutex::new(vec![]);
        let cb = Some(|event: PublishEvent| {
            if let PublishEvent::PathWritten(path, _) = event {
                written.lock().unwrap().push(path);
            }
        });

        publisher
            .write_publication(&publication, &writer, 4, &cancel, &cb)
            .await?;

        let written = written.lock().unwrap().clone();
        assert_eq!(written.len(), publication.files.len());
        assert_eq!(written.last().map(|s| s.as_str()), Some(REPOMD_PATH));

        let repomd = RepoMd::from_reader(std::fs::File::open(td.path().join(REPOMD_PATH))?)?;
        for entry in &repomd.data {
            assert!(td.path().join(&entry.location.href).exists());
        }
        assert_eq!(
            std::fs::read(td.path().join("Packages/b/bear-4.1-1.noarch.rpm"))?,
            b"bear-0:4.1-1.noarch"
        );

        // A second write finds everything current.
        let rewritten = std::sync::Mutex::new(0usize);
        let cb = Some(|event: PublishEvent| {
            if let PublishEvent::PathWritten(..) = event {
                *rewritten.lock().unwrap() += 1;
            }
        });
        publisher
            .write_publication(&publication, &writer, 4, &cancel, &cb)
            .await?;
        assert_eq!(*rewritten.lock().unwrap(), 0);

        Ok(())
    }
}
