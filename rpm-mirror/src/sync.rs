// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Synchronizing remote repositories into repository versions.

A sync walks `Idle -> Fetching -> Parsing -> Reconciling -> Committing -> Done`, or
ends in `Failed`. Metadata files are spooled to temporary files through validating
readers, parsed as streams, reconciled against content the platform already knows
and committed as a new repository version. Package files of new units are downloaded
in parallel into the [ArtifactStore].

Nothing becomes visible until the final compare-and-append of the new version, so a
failed or cancelled sync leaves the latest version untouched.
*/

use {
    crate::{
        content::{ContentKind, ContentUnit, Package},
        error::{MirrorError, Result},
        io::{classify_read_error, ChecksumType, Compression, ContentDigest},
        metadata::{
            assemble::PackageAssembler,
            comps::CompsReader,
            filelists::FilelistsReader,
            modules::parse_modules,
            other::OtherReader,
            primary::PrimaryReader,
            repomd::{RepoMd, RepoMdData},
            treeinfo::parse_treeinfo,
            updateinfo::UpdateinfoReader,
        },
        platform::{
            ContentPlatform, Remote, RemoteId, Repository, RepositoryId, RepositoryVersion,
            StoredUnit, UnitId,
        },
        reader_for_remote,
        reconcile::{prefer_incoming, ContentReconciler, ReconcilePolicy},
        storage::{ArtifactRef, ArtifactStore},
        task::CancellationToken,
        RepositoryRootReader,
    },
    futures::{AsyncReadExt, StreamExt, TryStreamExt},
    serde::{Deserialize, Serialize},
    std::{
        collections::{BTreeMap, BTreeSet, HashMap},
        future::Future,
        io::{BufReader, Read, Seek},
        sync::{Arc, Mutex, PoisonError},
        time::Duration,
    },
};

const REPOMD_PATH: &str = "repodata/repomd.xml";
const TREEINFO_PATHS: [&str; 2] = [".treeinfo", "treeinfo"];

const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(30);

/// Content types a sync can leave out.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipType {
    /// Source packages.
    Srpm,
    /// All packages.
    Package,
    Advisory,
    /// Groups, categories, environments and langpacks.
    Comps,
    /// Module streams and module defaults.
    Modules,
    /// The distribution tree.
    Treeinfo,
}

impl SkipType {
    /// Whether a unit belongs to the skipped type.
    pub fn covers(&self, unit: &ContentUnit) -> bool {
        match self {
            Self::Srpm => unit.as_package().map(|p| p.is_source()).unwrap_or(false),
            Self::Package => unit.kind() == ContentKind::Package,
            Self::Advisory => unit.kind() == ContentKind::Advisory,
            Self::Comps => unit.kind().is_comps(),
            Self::Modules => unit.kind().is_module(),
            Self::Treeinfo => unit.kind() == ContentKind::DistributionTree,
        }
    }
}

/// Inputs of a sync job.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SyncRequest {
    pub repository: RepositoryId,
    pub remote: RemoteId,
    /// Make the new version exactly the upstream content instead of adding to it.
    pub mirror: bool,
    pub skip_types: BTreeSet<SkipType>,
}

impl SyncRequest {
    /// An additive sync of everything.
    pub fn new(repository: RepositoryId, remote: RemoteId) -> Self {
        Self {
            repository,
            remote,
            mirror: false,
            skip_types: BTreeSet::new(),
        }
    }

    pub fn skips(&self, skip: SkipType) -> bool {
        self.skip_types.contains(&skip)
    }

    /// Whether a unit of the base version is kept regardless of upstream.
    fn preserves(&self, unit: &ContentUnit) -> bool {
        self.skip_types.iter().any(|skip| skip.covers(unit))
    }
}

/// Stage of a sync.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SyncState {
    Idle,
    Fetching,
    Parsing,
    Reconciling,
    Committing,
    Done,
    Failed,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching",
            Self::Parsing => "parsing",
            Self::Reconciling => "reconciling",
            Self::Committing => "committing",
            Self::Done => "done",
            Self::Failed => "failed",
        })
    }
}

/// Describes an event during a sync.
#[derive(Clone, Debug)]
pub enum SyncEvent {
    StateChanged(SyncState),
    FetchedMetadata(String, u64),
    Retrying(String, u32),
    ParsedRecords(usize),
    DownloadedPackage(String),
    CreatedUnits(usize),
    VersionCreated(u64),
    VersionUnchanged(u64),
}

impl std::fmt::Display for SyncEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StateChanged(state) => write!(f, "sync {}", state),
            Self::FetchedMetadata(path, size) => write!(f, "fetched {} ({} bytes)", path, size),
            Self::Retrying(path, attempt) => write!(f, "retrying {} (attempt {})", path, attempt),
            Self::ParsedRecords(count) => write!(f, "parsed {} upstream records", count),
            Self::DownloadedPackage(path) => write!(f, "downloaded {}", path),
            Self::CreatedUnits(count) => write!(f, "created {} content units", count),
            Self::VersionCreated(number) => write!(f, "created repository version {}", number),
            Self::VersionUnchanged(number) => {
                write!(f, "content unchanged; latest version remains {}", number)
            }
        }
    }
}

/// Summary of a successful sync.
#[derive(Clone, Debug)]
pub struct SyncReport {
    /// The latest version after the sync.
    pub repository_version: RepositoryVersion,
    /// Whether the sync created `repository_version`.
    pub created_version: bool,
    /// Distinct upstream units after deduplication.
    pub upstream_units: usize,
    /// Units the platform did not know before.
    pub created_units: usize,
    /// Known units referenced again.
    pub associated_units: usize,
    pub downloaded_packages: usize,
    pub duplicate_records: usize,
    pub skipped_missing_checksum: usize,
    pub skipped_source_packages: usize,
    /// Packages dropped by `retain_package_versions`.
    pub pruned_packages: usize,
}

/// Per repository commit locks.
///
/// At most one version creation per repository is in flight among syncs sharing an
/// instance.
#[derive(Clone, Default)]
pub struct RepositoryLocks {
    locks: Arc<Mutex<HashMap<RepositoryId, Arc<tokio::sync::Mutex<()>>>>>,
}

impl RepositoryLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a repository.
    pub async fn lock(&self, repository: RepositoryId) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(repository)
            .or_default()
            .clone();

        lock.lock_owned().await
    }
}

/// Run `op` until it succeeds, fails with a non retryable error or exhausts `max_retries`.
async fn with_retries<T, Op, Fut, F>(
    path: &str,
    max_retries: u32,
    progress_cb: &Option<F>,
    mut op: Op,
) -> Result<T>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    F: Fn(SyncEvent),
{
    let mut attempt = 0;

    loop {
        match op().await {
            Err(e) if e.is_retryable() && attempt < max_retries => {
                attempt += 1;

                let delay = RETRY_BASE_DELAY
                    .saturating_mul(2u32.saturating_pow(attempt - 1))
                    .min(RETRY_MAX_DELAY);

                log::warn!(
                    "fetching {} failed: {}; retry {} of {} in {:?}",
                    path,
                    e,
                    attempt,
                    max_retries,
                    delay
                );
                if let Some(cb) = progress_cb {
                    cb(SyncEvent::Retrying(path.to_string(), attempt));
                }

                tokio::time::sleep(delay).await;
            }
            res => return res,
        }
    }
}

async fn read_path(reader: &dyn RepositoryRootReader, path: &str) -> Result<Vec<u8>> {
    let mut source = reader.get_path(path.to_string()).await?;

    let mut data = vec![];
    source
        .read_to_end(&mut data)
        .await
        .map_err(|e| classify_read_error(path, e))?;

    Ok(data)
}

/// A validated metadata file in a temporary file.
struct SpooledFile {
    href: String,
    file: std::fs::File,
}

impl SpooledFile {
    fn reader(self) -> Result<BufReader<Box<dyn Read + Send>>> {
        let compression = Compression::from_path(&self.href);

        Ok(BufReader::new(
            compression.decoder(BufReader::new(self.file))?,
        ))
    }
}

async fn spool(reader: &dyn RepositoryRootReader, entry: &RepoMdData) -> Result<SpooledFile> {
    let href = entry.location.href.clone();

    let source = reader
        .get_path_with_digest_verification(href.clone(), entry.size, entry.content_digest()?)
        .await?;

    let mut writer = futures::io::AllowStdIo::new(tempfile::tempfile()?);
    futures::io::copy(source, &mut writer)
        .await
        .map_err(|e| classify_read_error(&href, e))?;

    let mut file = writer.into_inner();
    file.rewind()?;

    Ok(SpooledFile { href, file })
}

async fn fetch_artifact(
    reader: &dyn RepositoryRootReader,
    artifacts: &dyn ArtifactStore,
    path: &str,
    size: Option<u64>,
    digest: ContentDigest,
) -> Result<ArtifactRef> {
    let source = reader
        .get_path_with_digest_verification(path.to_string(), size, digest)
        .await?;

    artifacts.put(source).await.map_err(|e| match e {
        MirrorError::Io(e) => classify_read_error(path, e),
        e => e,
    })
}

/// Obtain a reader for a package `xml:base` that points away from the repository root.
///
/// Relative bases resolve against the root. The base inherits the remote's transport
/// settings.
fn base_reader(
    reader: &dyn RepositoryRootReader,
    remote: &Remote,
    base: &str,
) -> Result<Option<Box<dyn RepositoryRootReader + Send>>> {
    let root = reader.url()?;
    let mut url = root.join(base)?;

    if !url.path().ends_with('/') {
        url.set_path(&format!("{}/", url.path()));
    }

    if url == root {
        return Ok(None);
    }

    log::debug!("packages with base {} resolve against {}", base, url);

    let mut base_remote = remote.clone();
    base_remote.url = url;

    Ok(Some(reader_for_remote(&base_remote)?))
}

/// Metadata types fetched for a request, keyed by the name parsing uses.
fn wanted_metadata<'a>(
    repomd: &'a RepoMd,
    request: &SyncRequest,
) -> Result<Vec<(&'static str, &'a RepoMdData)>> {
    let mut wanted = vec![];

    if !request.skips(SkipType::Package) {
        for data_type in ["primary", "filelists", "other"] {
            let entry = repomd
                .find(data_type)
                .ok_or(MirrorError::MetadataFileNotFound(data_type))?;
            wanted.push((data_type, entry));
        }
    }

    if !request.skips(SkipType::Advisory) {
        if let Some(entry) = repomd.find("updateinfo") {
            wanted.push(("updateinfo", entry));
        }
    }

    if !request.skips(SkipType::Comps) {
        if let Some(entry) = repomd.find("group_gz").or_else(|| repomd.find("group")) {
            wanted.push(("group", entry));
        }
    }

    if !request.skips(SkipType::Modules) {
        if let Some(entry) = repomd.find("modules") {
            wanted.push(("modules", entry));
        }
    }

    Ok(wanted)
}

/// Drives syncs against a content platform and artifact store.
pub struct Synchronizer {
    platform: Arc<dyn ContentPlatform>,
    artifacts: Arc<dyn ArtifactStore>,
    locks: RepositoryLocks,
}

impl Synchronizer {
    pub fn new(platform: Arc<dyn ContentPlatform>, artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self::with_locks(platform, artifacts, RepositoryLocks::new())
    }

    /// Construct an instance sharing commit locks with other instances.
    pub fn with_locks(
        platform: Arc<dyn ContentPlatform>,
        artifacts: Arc<dyn ArtifactStore>,
        locks: RepositoryLocks,
    ) -> Self {
        Self {
            platform,
            artifacts,
            locks,
        }
    }

    /// Sync a repository from the remote named by the request.
    pub async fn sync<F>(
        &self,
        request: &SyncRequest,
        cancel: &CancellationToken,
        progress_cb: &Option<F>,
    ) -> Result<SyncReport>
    where
        F: Fn(SyncEvent),
    {
        let res = async {
            let remote = self.platform.remote(request.remote).await?;
            let reader = reader_for_remote(&remote)?;

            self.run(request, &remote, reader.as_ref(), cancel, progress_cb)
                .await
        }
        .await;

        finish(res, progress_cb)
    }

    /// Sync a repository through an explicit reader.
    ///
    /// `remote` only supplies sync policy.
    pub async fn sync_with_reader<F>(
        &self,
        request: &SyncRequest,
        remote: &Remote,
        reader: &dyn RepositoryRootReader,
        cancel: &CancellationToken,
        progress_cb: &Option<F>,
    ) -> Result<SyncReport>
    where
        F: Fn(SyncEvent),
    {
        let res = self
            .run(request, remote, reader, cancel, progress_cb)
            .await;

        finish(res, progress_cb)
    }

    async fn run<F>(
        &self,
        request: &SyncRequest,
        remote: &Remote,
        reader: &dyn RepositoryRootReader,
        cancel: &CancellationToken,
        progress_cb: &Option<F>,
    ) -> Result<SyncReport>
    where
        F: Fn(SyncEvent),
    {
        let repository = self.platform.repository(request.repository).await?;

        log::info!(
            "syncing repository {} from {} ({} mode)",
            repository.name,
            remote.url,
            if request.mirror { "mirror" } else { "additive" }
        );

        set_state(SyncState::Fetching, progress_cb);
        cancel.check()?;

        let repomd = with_retries(REPOMD_PATH, remote.max_retries, progress_cb, || {
            reader.fetch_repomd(REPOMD_PATH.to_string())
        })
        .await?;

        let mut spooled = HashMap::new();

        for (data_type, entry) in wanted_metadata(&repomd, request)? {
            cancel.check()?;

            let href = entry.location.href.as_str();
            let file = with_retries(href, remote.max_retries, progress_cb, || {
                spool(reader, entry)
            })
            .await?;

            let size = file.file.metadata()?.len();
            log::debug!("fetched {} ({} bytes)", href, size);
            if let Some(cb) = progress_cb {
                cb(SyncEvent::FetchedMetadata(href.to_string(), size));
            }

            spooled.insert(data_type, file);
        }

        let treeinfo = if request.skips(SkipType::Treeinfo) {
            None
        } else {
            cancel.check()?;
            self.fetch_treeinfo(reader, remote, progress_cb).await?
        };

        set_state(SyncState::Parsing, progress_cb);

        let mut reconciler = ContentReconciler::new(ReconcilePolicy {
            require_package_checksums: !remote.ignore_missing_package_checksums,
            advisory_conflict: repository.settings.advisory_conflict_policy,
        });
        let mut skipped_source_packages = 0;

        if let (Some(primary), Some(filelists), Some(other)) = (
            spooled.remove("primary"),
            spooled.remove("filelists"),
            spooled.remove("other"),
        ) {
            cancel.check()?;

            for package in PackageAssembler::new(
                PrimaryReader::new(primary.reader()?),
                FilelistsReader::new(filelists.reader()?),
                OtherReader::new(other.reader()?),
            ) {
                let package = package?;

                if request.skips(SkipType::Srpm) && package.is_source() {
                    skipped_source_packages += 1;
                    continue;
                }

                reconciler.add(ContentUnit::Package(package))?;
            }
        }

        if let Some(updateinfo) = spooled.remove("updateinfo") {
            cancel.check()?;

            for advisory in UpdateinfoReader::new(updateinfo.reader()?) {
                reconciler.add(ContentUnit::Advisory(advisory?))?;
            }
        }

        if let Some(group) = spooled.remove("group") {
            cancel.check()?;

            for unit in CompsReader::new(group.reader()?) {
                reconciler.add(unit?)?;
            }
        }

        if let Some(modules) = spooled.remove("modules") {
            cancel.check()?;

            for unit in parse_modules(modules.reader()?)? {
                reconciler.add(unit)?;
            }
        }

        if let Some(data) = treeinfo {
            reconciler.add(ContentUnit::DistributionTree(parse_treeinfo(
                data.as_slice(),
            )?))?;
        }

        if let Some(cb) = progress_cb {
            cb(SyncEvent::ParsedRecords(reconciler.len()));
        }

        set_state(SyncState::Reconciling, progress_cb);

        let mut existing = HashMap::new();
        for key in reconciler.keys().collect::<Vec<_>>() {
            if let Some(id) = self.platform.find_content_unit(&key).await? {
                existing.insert(key, id);
            }
        }

        let duplicate_records = reconciler.duplicates();
        let upstream_units = reconciler.len();
        let plan = reconciler.plan(&existing);

        if plan.skipped_missing_checksum > 0 {
            log::warn!(
                "skipped {} packages without checksums",
                plan.skipped_missing_checksum
            );
        }

        let mut artifacts = self
            .download_packages(reader, remote, &plan.to_create, cancel, progress_cb)
            .await?;
        let downloaded_packages = artifacts.len();

        let mut upstream = BTreeMap::new();
        let associated_units = plan.to_associate.len();
        for (id, unit) in plan.to_associate {
            upstream.insert(id, Arc::new(unit));
        }

        let mut created_units = 0;
        for (index, unit) in plan.to_create.into_iter().enumerate() {
            let artifact = artifacts.remove(&index);
            let unit = Arc::new(unit);

            let (id, created) = self
                .platform
                .create_content_unit(unit.as_ref().clone(), artifact)
                .await?;

            if created {
                created_units += 1;
            }
            upstream.insert(id, unit);
        }

        if let Some(cb) = progress_cb {
            cb(SyncEvent::CreatedUnits(created_units));
        }

        set_state(SyncState::Committing, progress_cb);

        let (repository_version, created_version, pruned_packages) = self
            .commit(&repository, request, upstream, cancel)
            .await?;

        if let Some(cb) = progress_cb {
            cb(if created_version {
                SyncEvent::VersionCreated(repository_version.number)
            } else {
                SyncEvent::VersionUnchanged(repository_version.number)
            });
        }

        set_state(SyncState::Done, progress_cb);

        Ok(SyncReport {
            repository_version,
            created_version,
            upstream_units,
            created_units,
            associated_units,
            downloaded_packages,
            duplicate_records,
            skipped_missing_checksum: plan.skipped_missing_checksum,
            skipped_source_packages,
            pruned_packages,
        })
    }

    async fn fetch_treeinfo<F>(
        &self,
        reader: &dyn RepositoryRootReader,
        remote: &Remote,
        progress_cb: &Option<F>,
    ) -> Result<Option<Vec<u8>>>
    where
        F: Fn(SyncEvent),
    {
        for path in TREEINFO_PATHS {
            match with_retries(path, remote.max_retries, progress_cb, || {
                read_path(reader, path)
            })
            .await
            {
                Ok(data) => {
                    if let Some(cb) = progress_cb {
                        cb(SyncEvent::FetchedMetadata(path.to_string(), data.len() as u64));
                    }
                    return Ok(Some(data));
                }
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }

        log::debug!("remote has no treeinfo");

        Ok(None)
    }

    /// Obtain artifacts for the packages among `units`, keyed by index into `units`.
    async fn download_packages<F>(
        &self,
        reader: &dyn RepositoryRootReader,
        remote: &Remote,
        units: &[ContentUnit],
        cancel: &CancellationToken,
        progress_cb: &Option<F>,
    ) -> Result<HashMap<usize, ArtifactRef>>
    where
        F: Fn(SyncEvent),
    {
        let packages = units
            .iter()
            .enumerate()
            .filter_map(|(index, unit)| unit.as_package().map(|p| (index, p)))
            .collect::<Vec<_>>();

        let mut base_readers = HashMap::new();
        for (_, package) in &packages {
            if let Some(base) = package.location_base.as_deref() {
                if !base_readers.contains_key(base) {
                    base_readers.insert(base, base_reader(reader, remote, base)?);
                }
            }
        }
        let base_readers = &base_readers;

        let mut fs = futures::stream::iter(packages.into_iter().map(|(index, package)| async move {
            let source = match package
                .location_base
                .as_deref()
                .and_then(|base| base_readers.get(base))
                .and_then(|found| found.as_deref())
            {
                Some(base) => base as &dyn RepositoryRootReader,
                None => reader,
            };

            self.download_package(source, remote, package, cancel, progress_cb)
                .await
                .map(|artifact| (index, artifact))
        }))
        .buffer_unordered(remote.download_concurrency.max(1));

        let mut artifacts = HashMap::new();

        while let Some(res) = fs.next().await {
            let (index, artifact) = res?;
            artifacts.insert(index, artifact);
        }

        Ok(artifacts)
    }

    async fn download_package<F>(
        &self,
        reader: &dyn RepositoryRootReader,
        remote: &Remote,
        package: &Package,
        cancel: &CancellationToken,
        progress_cb: &Option<F>,
    ) -> Result<ArtifactRef>
    where
        F: Fn(SyncEvent),
    {
        cancel.check()?;

        let checksum = package.checksum.as_ref().ok_or_else(|| {
            MirrorError::SyncValidation(format!("package {} has no checksum", package.nevra()))
        })?;

        if checksum.checksum_type == ChecksumType::Sha256 {
            if let Some(artifact) = self.artifacts.contains(&checksum.value).await? {
                log::debug!("artifact of {} already stored", package.nevra());
                return Ok(artifact);
            }
        }

        let digest = checksum.content_digest()?;
        let size = Some(package.size_package).filter(|size| *size > 0);
        let href = package.location_href.as_str();

        let artifact = with_retries(href, remote.max_retries, progress_cb, || {
            fetch_artifact(reader, self.artifacts.as_ref(), href, size, digest.clone())
        })
        .await?;

        log::info!("downloaded {}", href);
        if let Some(cb) = progress_cb {
            cb(SyncEvent::DownloadedPackage(href.to_string()));
        }

        Ok(artifact)
    }

    /// Compute the content of the new version and append it.
    ///
    /// Returns the latest version, whether it was created and the number of pruned
    /// packages.
    async fn commit(
        &self,
        repository: &Repository,
        request: &SyncRequest,
        upstream: BTreeMap<UnitId, Arc<ContentUnit>>,
        cancel: &CancellationToken,
    ) -> Result<(RepositoryVersion, bool, usize)> {
        let _guard = self.locks.lock(repository.id).await;

        cancel.check()?;

        let base = self.platform.latest_version(repository.id).await?;
        let base_units = self
            .platform
            .list_content(base.id, None)
            .try_collect::<Vec<StoredUnit>>()
            .await?;

        let mut content = upstream.clone();

        if request.mirror {
            for stored in base_units {
                if request.preserves(&stored.unit) {
                    content.insert(stored.id, stored.unit);
                }
            }
        } else {
            let incoming_by_id = upstream
                .iter()
                .filter_map(|(id, unit)| unit.as_advisory().map(|a| (a.id.as_str(), (*id, a))))
                .collect::<HashMap<_, _>>();

            for stored in base_units {
                if let Some(existing) = stored.unit.as_advisory() {
                    if let Some((incoming_id, incoming)) = incoming_by_id.get(existing.id.as_str())
                    {
                        if *incoming_id != stored.id {
                            if prefer_incoming(
                                repository.settings.advisory_conflict_policy,
                                existing,
                                incoming,
                            ) {
                                log::info!("advisory {} superseded by upstream", existing.id);
                                continue;
                            }

                            content.remove(incoming_id);
                        }
                    }
                }

                content.insert(stored.id, stored.unit);
            }
        }

        let replaced = replace_packages_by_nevra(&mut content, &upstream);
        if replaced > 0 {
            log::info!("{} package builds replaced by upstream rebuilds", replaced);
        }

        let pruned = match repository.settings.retain_package_versions {
            Some(keep) if keep > 0 => prune_package_versions(&mut content, keep),
            _ => 0,
        };

        let ids = content.keys().copied().collect::<BTreeSet<_>>();

        if ids == base.content {
            log::info!(
                "repository {} unchanged at version {}",
                repository.name,
                base.number
            );
            return Ok((base, false, pruned));
        }

        let version = self
            .platform
            .create_version(repository.id, base.id, ids)
            .await?;

        log::info!(
            "created version {} of repository {} with {} units",
            version.number,
            repository.name,
            version.content.len()
        );

        Ok((version, true, pruned))
    }
}

/// Drop packages sharing a NEVRA with a different upstream package.
///
/// A version holds at most one package per NEVRA, otherwise two builds would be
/// published at the same path.
fn replace_packages_by_nevra(
    content: &mut BTreeMap<UnitId, Arc<ContentUnit>>,
    upstream: &BTreeMap<UnitId, Arc<ContentUnit>>,
) -> usize {
    let upstream_nevras = upstream
        .iter()
        .filter_map(|(id, unit)| unit.as_package().map(|p| (p.nevra(), *id)))
        .collect::<HashMap<_, _>>();

    let before = content.len();

    content.retain(|id, unit| match unit.as_package() {
        Some(p) => upstream_nevras
            .get(&p.nevra())
            .map(|upstream_id| upstream_id == id)
            .unwrap_or(true),
        None => true,
    });

    before - content.len()
}

/// Keep the `keep` newest versions of each package name and architecture.
fn prune_package_versions(content: &mut BTreeMap<UnitId, Arc<ContentUnit>>, keep: usize) -> usize {
    let mut by_name = BTreeMap::<(String, String), Vec<_>>::new();

    for (id, unit) in content.iter() {
        if let Some(p) = unit.as_package() {
            by_name
                .entry((p.name.clone(), p.arch.clone()))
                .or_default()
                .push((p.evr(), *id));
        }
    }

    let mut pruned = 0;

    for (_, mut versions) in by_name {
        versions.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        for (evr, id) in versions.into_iter().skip(keep) {
            log::debug!("pruning package version {}", evr);
            content.remove(&id);
            pruned += 1;
        }
    }

    pruned
}

fn set_state<F: Fn(SyncEvent)>(state: SyncState, progress_cb: &Option<F>) {
    log::debug!("sync {}", state);

    if let Some(cb) = progress_cb {
        cb(SyncEvent::StateChanged(state));
    }
}

fn finish<F: Fn(SyncEvent)>(res: Result<SyncReport>, progress_cb: &Option<F>) -> Result<SyncReport> {
    if let Err(e) = &res {
        log::warn!("sync failed: {}", e);
        set_state(SyncState::Failed, progress_cb);
    }

    res
}
