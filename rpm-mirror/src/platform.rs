// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Content platform interface.

The platform owns repositories, remotes, content units, repository versions and
publications. The sync and publish pipelines only talk to it through
[ContentPlatform], whose mutating operations are atomic: content creation is
create-if-absent keyed by natural key and version creation is a compare-and-append
against the expected latest version.

[MemoryPlatform] is a complete in-process implementation.
*/

use {
    crate::{
        content::{ContentKind, ContentUnit, NaturalKey},
        error::{MirrorError, Result},
        generate::PackageLayout,
        io::ChecksumType,
        reconcile::AdvisoryConflictPolicy,
        storage::ArtifactRef,
    },
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    futures::stream::{self, BoxStream, StreamExt},
    serde::{Deserialize, Serialize},
    std::{
        collections::{BTreeMap, BTreeSet, HashMap},
        sync::{Arc, Mutex, MutexGuard, PoisonError},
        time::Duration,
    },
};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
        pub struct $name(pub u64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Identifier of a [Repository].
    RepositoryId
);
id_type!(
    /// Identifier of a [Remote].
    RemoteId
);
id_type!(
    /// Identifier of a [RepositoryVersion].
    VersionId
);
id_type!(
    /// Identifier of a stored content unit.
    UnitId
);
id_type!(
    /// Identifier of a [Publication].
    PublicationId
);

/// Per repository settings.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RepositorySettings {
    /// Keep at most this many versions of each package name and arch.
    pub retain_package_versions: Option<usize>,
    /// Name of the signing service used for `repomd.xml`.
    pub metadata_signing_service: Option<String>,
    /// Checksum used in generated metadata.
    pub metadata_checksum_type: ChecksumType,
    /// Checksum type requested for packages. Informational.
    pub package_checksum_type: Option<ChecksumType>,
    pub advisory_conflict_policy: AdvisoryConflictPolicy,
    /// Drop `<sum>` elements from generated `updateinfo.xml`.
    pub omit_updateinfo_sum: bool,
    pub package_layout: PackageLayout,
}

/// A named sequence of repository versions.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Repository {
    pub id: RepositoryId,
    pub name: String,
    pub settings: RepositorySettings,
}

/// Describes an upstream repository and how to talk to it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Remote {
    pub id: RemoteId,
    pub url: url::Url,
    pub username: Option<String>,
    pub password: Option<String>,
    pub proxy_url: Option<String>,
    /// Whether to verify TLS certificates.
    pub tls_validation: bool,
    /// PEM encoded CA certificate to trust.
    pub ca_cert: Option<String>,
    /// PEM encoded client certificate.
    pub client_cert: Option<String>,
    /// PEM encoded client key.
    pub client_key: Option<String>,
    pub connect_timeout: Duration,
    pub total_timeout: Duration,
    pub download_concurrency: usize,
    pub max_retries: u32,
    pub ignore_missing_package_checksums: bool,
}

impl Remote {
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
    pub const DEFAULT_TOTAL_TIMEOUT: Duration = Duration::from_secs(3600);
    pub const DEFAULT_DOWNLOAD_CONCURRENCY: usize = 10;
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    /// A remote with default policy for the given URL.
    pub fn new(url: url::Url) -> Self {
        Self {
            id: RemoteId(0),
            url,
            username: None,
            password: None,
            proxy_url: None,
            tls_validation: true,
            ca_cert: None,
            client_cert: None,
            client_key: None,
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
            total_timeout: Self::DEFAULT_TOTAL_TIMEOUT,
            download_concurrency: Self::DEFAULT_DOWNLOAD_CONCURRENCY,
            max_retries: Self::DEFAULT_MAX_RETRIES,
            ignore_missing_package_checksums: false,
        }
    }
}

/// An immutable snapshot of repository content.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RepositoryVersion {
    pub id: VersionId,
    pub repository: RepositoryId,
    /// Sequence number. Version 0 is the empty initial version.
    pub number: u64,
    pub content: BTreeSet<UnitId>,
    pub created: DateTime<Utc>,
}

/// A content unit as stored by the platform.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StoredUnit {
    pub id: UnitId,
    pub unit: Arc<ContentUnit>,
    pub artifact: Option<ArtifactRef>,
}

/// Bytes of a published file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PublishedContent {
    /// Generated content held directly.
    Inline(Vec<u8>),
    /// A stored artifact.
    Artifact(ArtifactRef),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PublishedFile {
    pub content: PublishedContent,
    pub size: u64,
    /// Hex SHA-256 of the content.
    pub sha256: String,
    pub content_type: String,
}

/// An immutable set of files rendered from exactly one repository version.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Publication {
    pub id: PublicationId,
    pub repository_version: VersionId,
    /// Files keyed by path relative to the repository root.
    pub files: BTreeMap<String, PublishedFile>,
    /// Name of the signing service that signed `repomd.xml`.
    pub signing_service: Option<String>,
    pub created: DateTime<Utc>,
}

/// Persistence and versioning of repository content.
#[async_trait]
pub trait ContentPlatform: Send + Sync {
    async fn repository(&self, id: RepositoryId) -> Result<Repository>;

    async fn remote(&self, id: RemoteId) -> Result<Remote>;

    /// Store a content unit unless one with the same natural key exists.
    ///
    /// Returns the id of the stored unit and whether it was created by this call.
    async fn create_content_unit(
        &self,
        unit: ContentUnit,
        artifact: Option<ArtifactRef>,
    ) -> Result<(UnitId, bool)>;

    async fn find_content_unit(&self, key: &NaturalKey) -> Result<Option<UnitId>>;

    async fn content_unit(&self, id: UnitId) -> Result<StoredUnit>;

    /// Append a version to a repository.
    ///
    /// Fails with [MirrorError::VersionConflict] unless `expected_base` is still the
    /// latest version.
    async fn create_version(
        &self,
        repository: RepositoryId,
        expected_base: VersionId,
        content: BTreeSet<UnitId>,
    ) -> Result<RepositoryVersion>;

    /// The newest version of a repository. Version 0 always exists.
    async fn latest_version(&self, repository: RepositoryId) -> Result<RepositoryVersion>;

    async fn version(&self, id: VersionId) -> Result<RepositoryVersion>;

    /// All versions of a repository, oldest first.
    async fn versions(&self, repository: RepositoryId) -> Result<Vec<RepositoryVersion>>;

    /// Stream the content of a version, optionally restricted to one kind.
    fn list_content(
        &self,
        version: VersionId,
        kind: Option<ContentKind>,
    ) -> BoxStream<'_, Result<StoredUnit>>;

    /// Delete a version that is neither latest nor published.
    async fn delete_version(&self, id: VersionId) -> Result<()>;

    async fn create_publication(
        &self,
        repository_version: VersionId,
        files: BTreeMap<String, PublishedFile>,
        signing_service: Option<String>,
    ) -> Result<Publication>;

    async fn publication(&self, id: PublicationId) -> Result<Publication>;
}

#[derive(Default)]
struct State {
    next_id: u64,
    repositories: BTreeMap<RepositoryId, Repository>,
    remotes: BTreeMap<RemoteId, Remote>,
    units: BTreeMap<UnitId, StoredUnit>,
    keys: HashMap<NaturalKey, UnitId>,
    versions: BTreeMap<VersionId, RepositoryVersion>,
    repository_versions: BTreeMap<RepositoryId, Vec<VersionId>>,
    publications: BTreeMap<PublicationId, Publication>,
}

impl State {
    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn latest(&self, repository: RepositoryId) -> Result<&RepositoryVersion> {
        self.repository_versions
            .get(&repository)
            .and_then(|ids| ids.last())
            .and_then(|id| self.versions.get(id))
            .ok_or(MirrorError::RepositoryNotFound(repository))
    }

    fn unit(&self, id: UnitId) -> Result<StoredUnit> {
        self.units
            .get(&id)
            .cloned()
            .ok_or(MirrorError::UnitNotFound(id))
    }
}

/// A [ContentPlatform] holding all state in memory.
#[derive(Default)]
pub struct MemoryPlatform {
    state: Mutex<State>,
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a repository along with its empty version 0.
    pub fn add_repository(&self, name: impl ToString, settings: RepositorySettings) -> Repository {
        let mut state = self.state();

        let repository = Repository {
            id: RepositoryId(state.allocate()),
            name: name.to_string(),
            settings,
        };

        let version = RepositoryVersion {
            id: VersionId(state.allocate()),
            repository: repository.id,
            number: 0,
            content: BTreeSet::new(),
            created: Utc::now(),
        };

        state
            .repository_versions
            .insert(repository.id, vec![version.id]);
        state.versions.insert(version.id, version);
        state
            .repositories
            .insert(repository.id, repository.clone());

        repository
    }

    /// Register a remote, assigning it an id.
    pub fn add_remote(&self, mut remote: Remote) -> Remote {
        let mut state = self.state();

        remote.id = RemoteId(state.allocate());
        state.remotes.insert(remote.id, remote.clone());

        remote
    }

    /// Number of distinct stored content units.
    pub fn unit_count(&self) -> usize {
        self.state().units.len()
    }
}

#[async_trait]
impl ContentPlatform for MemoryPlatform {
    async fn repository(&self, id: RepositoryId) -> Result<Repository> {
        self.state()
            .repositories
            .get(&id)
            .cloned()
            .ok_or(MirrorError::RepositoryNotFound(id))
    }

    async fn remote(&self, id: RemoteId) -> Result<Remote> {
        self.state()
            .remotes
            .get(&id)
            .cloned()
            .ok_or(MirrorError::RemoteNotFound(id))
    }

    async fn create_content_unit(
        &self,
        unit: ContentUnit,
        artifact: Option<ArtifactRef>,
    ) -> Result<(UnitId, bool)> {
        let key = unit.natural_key();
        let mut state = self.state();

        if let Some(id) = state.keys.get(&key) {
            return Ok((*id, false));
        }

        let id = UnitId(state.allocate());
        state.keys.insert(key, id);
        state.units.insert(
            id,
            StoredUnit {
                id,
                unit: Arc::new(unit),
                artifact,
            },
        );

        Ok((id, true))
    }

    async fn find_content_unit(&self, key: &NaturalKey) -> Result<Option<UnitId>> {
        Ok(self.state().keys.get(key).copied())
    }

    async fn content_unit(&self, id: UnitId) -> Result<StoredUnit> {
        self.state().unit(id)
    }

    async fn create_version(
        &self,
        repository: RepositoryId,
        expected_base: VersionId,
        content: BTreeSet<UnitId>,
    ) -> Result<RepositoryVersion> {
        let mut state = self.state();

        let latest = state.latest(repository)?;
        if latest.id != expected_base {
            return Err(MirrorError::VersionConflict {
                repository,
                expected: expected_base,
                actual: latest.id,
            });
        }
        let number = latest.number + 1;

        if let Some(missing) = content.iter().find(|id| !state.units.contains_key(id)) {
            return Err(MirrorError::UnitNotFound(*missing));
        }

        let version = RepositoryVersion {
            id: VersionId(state.allocate()),
            repository,
            number,
            content,
            created: Utc::now(),
        };

        state
            .repository_versions
            .entry(repository)
            .or_default()
            .push(version.id);
        state.versions.insert(version.id, version.clone());

        Ok(version)
    }

    async fn latest_version(&self, repository: RepositoryId) -> Result<RepositoryVersion> {
        self.state().latest(repository).cloned()
    }

    async fn version(&self, id: VersionId) -> Result<RepositoryVersion> {
        self.state()
            .versions
            .get(&id)
            .cloned()
            .ok_or(MirrorError::VersionNotFound(id))
    }

    async fn versions(&self, repository: RepositoryId) -> Result<Vec<RepositoryVersion>> {
        let state = self.state();

        let ids = state
            .repository_versions
            .get(&repository)
            .ok_or(MirrorError::RepositoryNotFound(repository))?;

        Ok(ids
            .iter()
            .filter_map(|id| state.versions.get(id).cloned())
            .collect())
    }

    fn list_content(
        &self,
        version: VersionId,
        kind: Option<ContentKind>,
    ) -> BoxStream<'_, Result<StoredUnit>> {
        let ids = self
            .state()
            .versions
            .get(&version)
            .map(|v| v.content.iter().copied().collect::<Vec<_>>());

        match ids {
            Some(ids) => stream::iter(ids)
                .map(move |id| self.state().unit(id))
                .filter(move |res| {
                    futures::future::ready(match (res, kind) {
                        (Ok(stored), Some(kind)) => stored.unit.kind() == kind,
                        _ => true,
                    })
                })
                .boxed(),
            None => stream::iter(vec![Err(MirrorError::VersionNotFound(version))]).boxed(),
        }
    }

    async fn delete_version(&self, id: VersionId) -> Result<()> {
        let mut state = self.state();

        let version = state
            .versions
            .get(&id)
            .cloned()
            .ok_or(MirrorError::VersionNotFound(id))?;

        if state.latest(version.repository)?.id == id {
            return Err(MirrorError::VersionDeleteRefused(id, "it is the latest version"));
        }

        if state
            .publications
            .values()
            .any(|p| p.repository_version == id)
        {
            return Err(MirrorError::VersionDeleteRefused(
                id,
                "it is referenced by a publication",
            ));
        }

        state.versions.remove(&id);
        if let Some(ids) = state.repository_versions.get_mut(&version.repository) {
            ids.retain(|v| *v != id);
        }

        Ok(())
    }

    async fn create_publication(
        &self,
        repository_version: VersionId,
        files: BTreeMap<String, PublishedFile>,
        signing_service: Option<String>,
    ) -> Result<Publication> {
        let mut state = self.state();

        if !state.versions.contains_key(&repository_version) {
            return Err(MirrorError::VersionNotFound(repository_version));
        }

        let publication = Publication {
            id: PublicationId(state.allocate()),
            repository_version,
            files,
            signing_service,
            created: Utc::now(),
        };

        state
            .publications
            .insert(publication.id, publication.clone());

        Ok(publication)
    }

    async fn publication(&self, id: PublicationId) -> Result<Publication> {
        self.state()
            .publications
            .get(&id)
            .cloned()
            .ok_or(MirrorError::PublicationNotFound(id))
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::content::{Advisory, PackageLangpacks},
        futures::TryStreamExt,
    };

    fn advisory(id: &str) -> ContentUnit {
        ContentUnit::Advisory(Advisory {
            id: id.to_string(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn create_if_absent() -> Result<()> {
        let platform = MemoryPlatform::new();

        let (a, created) = platform.create_content_unit(advisory("A"), None).await?;
        assert!(created);
        let (again, created) = platform.create_content_unit(advisory("A"), None).await?;
        assert!(!created);
        assert_eq!(a, again);

        assert_eq!(
            platform
                .find_content_unit(&advisory("A").natural_key())
                .await?,
            Some(a)
        );
        assert_eq!(platform.unit_count(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn versions_compare_and_append() -> Result<()> {
        let platform = MemoryPlatform::new();
        let repo = platform.add_repository("zoo", RepositorySettings::default());

        let v0 = platform.latest_version(repo.id).await?;
        assert_eq!(v0.number, 0);
        assert!(v0.content.is_empty());

        let (a, _) = platform.create_content_unit(advisory("A"), None).await?;
        let v1 = platform
            .create_version(repo.id, v0.id, [a].into_iter().collect())
            .await?;
        assert_eq!(v1.number, 1);

        match platform
            .create_version(repo.id, v0.id, BTreeSet::new())
            .await
        {
            Err(MirrorError::VersionConflict { actual, .. }) => assert_eq!(actual, v1.id),
            other => panic!("unexpected result: {:?}", other),
        }

        assert_eq!(platform.latest_version(repo.id).await?, v1);
        assert_eq!(platform.versions(repo.id).await?.len(), 2);

        Ok(())
    }

    #[tokio::test]
    async fn list_content_filters_kind() -> Result<()> {
        let platform = MemoryPlatform::new();
        let repo = platform.add_repository("zoo", RepositorySettings::default());
        let v0 = platform.latest_version(repo.id).await?;

        let (a, _) = platform.create_content_unit(advisory("A"), None).await?;
        let (l, _) = platform
            .create_content_unit(
                ContentUnit::PackageLangpacks(PackageLangpacks::default()),
                None,
            )
            .await?;
        let v1 = platform
            .create_version(repo.id, v0.id, [a, l].into_iter().collect())
            .await?;

        let all = platform
            .list_content(v1.id, None)
            .try_collect::<Vec<_>>()
            .await?;
        assert_eq!(all.len(), 2);

        let advisories = platform
            .list_content(v1.id, Some(ContentKind::Advisory))
            .try_collect::<Vec<_>>()
            .await?;
        assert_eq!(advisories.len(), 1);
        assert_eq!(advisories[0].id, a);

        Ok(())
    }

    #[tokio::test]
    async fn delete_version_rules() -> Result<()> {
        let platform = MemoryPlatform::new();
        let repo = platform.add_repository("zoo", RepositorySettings::default());
        let v0 = platform.latest_version(repo.id).await?;

        assert!(matches!(
            platform.delete_version(v0.id).await,
            Err(MirrorError::VersionDeleteRefused(..))
        ));

        let (a, _) = platform.create_content_unit(advisory("A"), None).await?;
        let v1 = platform
            .create_version(repo.id, v0.id, [a].into_iter().collect())
            .await?;
        let (b, _) = platform.create_content_unit(advisory("B"), None).await?;
        platform
            .create_version(repo.id, v1.id, [a, b].into_iter().collect())
            .await?;

        platform
            .create_publication(v1.id, BTreeMap::new(), None)
            .await?;
        assert!(matches!(
            platform.delete_version(v1.id).await,
            Err(MirrorError::VersionDeleteRefused(..))
        ));

        platform.delete_version(v0.id).await?;
        assert!(matches!(
            platform.version(v0.id).await,
            Err(MirrorError::VersionNotFound(_))
        ));
        assert_eq!(platform.versions(repo.id).await?.len(), 2);

        Ok(())
    }
}
