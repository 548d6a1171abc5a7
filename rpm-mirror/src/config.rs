// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Serializable configuration of remotes, repositories and sync jobs.

These types are the YAML facing counterparts of [Remote], [RepositorySettings] and
[SyncRequest]. Absent fields take the defaults of the runtime types.
*/

use {
    crate::{
        error::Result,
        generate::PackageLayout,
        io::ChecksumType,
        platform::{Remote, RemoteId, RepositoryId, RepositorySettings},
        reconcile::AdvisoryConflictPolicy,
        sync::{SkipType, SyncRequest},
    },
    serde::{Deserialize, Serialize},
    std::time::Duration,
};

/// Describes an upstream repository.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteConfig {
    /// Base URL of the repository. `http`, `https` and `file` URLs are supported.
    pub url: String,

    pub username: Option<String>,
    pub password: Option<String>,

    /// URL of a proxy for all requests.
    pub proxy_url: Option<String>,

    /// Whether to verify TLS certificates. Defaults to true.
    pub tls_validation: Option<bool>,

    /// PEM encoded CA certificate to trust.
    pub ca_cert: Option<String>,

    /// PEM encoded client certificate.
    pub client_cert: Option<String>,

    /// PEM encoded client key.
    pub client_key: Option<String>,

    /// Defaults to 60.
    pub connect_timeout_seconds: Option<u64>,

    /// Defaults to 3600.
    pub total_timeout_seconds: Option<u64>,

    /// Maximum parallel package downloads. Defaults to 10.
    pub download_concurrency: Option<usize>,

    /// Retries of failed transfers. Defaults to 3.
    pub max_retries: Option<u32>,

    /// Skip packages without a checksum instead of failing.
    #[serde(default)]
    pub ignore_missing_package_checksums: bool,
}

impl RemoteConfig {
    pub fn from_yaml(s: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(s)?)
    }

    /// Obtain the runtime [Remote].
    pub fn to_remote(&self) -> Result<Remote> {
        let mut remote = Remote::new(url::Url::parse(&self.url)?);

        remote.username = self.username.clone();
        remote.password = self.password.clone();
        remote.proxy_url = self.proxy_url.clone();
        remote.tls_validation = self.tls_validation.unwrap_or(true);
        remote.ca_cert = self.ca_cert.clone();
        remote.client_cert = self.client_cert.clone();
        remote.client_key = self.client_key.clone();

        if let Some(seconds) = self.connect_timeout_seconds {
            remote.connect_timeout = Duration::from_secs(seconds);
        }
        if let Some(seconds) = self.total_timeout_seconds {
            remote.total_timeout = Duration::from_secs(seconds);
        }
        if let Some(concurrency) = self.download_concurrency {
            remote.download_concurrency = concurrency.max(1);
        }
        if let Some(retries) = self.max_retries {
            remote.max_retries = retries;
        }
        remote.ignore_missing_package_checksums = self.ignore_missing_package_checksums;

        Ok(remote)
    }
}

/// Describes a repository.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RepositoryConfig {
    pub name: String,

    /// Keep at most this many versions of each package name and arch. 0 keeps all.
    pub retain_package_versions: Option<usize>,

    /// Name of the signing service used for `repomd.xml`.
    pub metadata_signing_service: Option<String>,

    /// Checksum used in generated metadata. Defaults to `sha256`.
    pub metadata_checksum_type: Option<ChecksumType>,

    /// Checksum type requested for packages.
    pub package_checksum_type: Option<ChecksumType>,

    /// Defaults to `keep_newest`.
    pub advisory_conflict_policy: Option<AdvisoryConflictPolicy>,

    #[serde(default)]
    pub omit_updateinfo_sum: bool,

    /// Defaults to `first_letter`.
    pub package_layout: Option<PackageLayout>,
}

impl RepositoryConfig {
    pub fn from_yaml(s: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(s)?)
    }

    /// Obtain the runtime [RepositorySettings].
    pub fn settings(&self) -> RepositorySettings {
        RepositorySettings {
            retain_package_versions: self.retain_package_versions,
            metadata_signing_service: self.metadata_signing_service.clone(),
            metadata_checksum_type: self.metadata_checksum_type.unwrap_or_default(),
            package_checksum_type: self.package_checksum_type,
            advisory_conflict_policy: self.advisory_conflict_policy.unwrap_or_default(),
            omit_updateinfo_sum: self.omit_updateinfo_sum,
            package_layout: self.package_layout.unwrap_or_default(),
        }
    }
}

/// Describes a sync job.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SyncRequestConfig {
    /// Id of the repository to sync into.
    pub repository: u64,

    /// Id of the remote to sync from.
    pub remote: u64,

    #[serde(default)]
    pub mirror: bool,

    #[serde(default)]
    pub skip_types: Vec<SkipType>,
}

impl SyncRequestConfig {
    pub fn from_yaml(s: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(s)?)
    }

    /// Obtain the runtime [SyncRequest].
    pub fn to_request(&self) -> SyncRequest {
        SyncRequest {
            repository: RepositoryId(self.repository),
            remote: RemoteId(self.remote),
            mirror: self.mirror,
            skip_types: self.skip_types.iter().copied().collect(),
        }
    }
}

#[cfg(test)]
mod test {
    use {super::*, crate::error::MirrorError};

    #[test]
    fn remote_defaults() -> Result<()> {
        let remote = RemoteConfig::from_yaml("url: https://example.com/zoo/")?.to_remote()?;

        assert!(remote.tls_validation);
        assert_eq!(remote.connect_timeout, Remote::DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(remote.total_timeout, Remote::DEFAULT_TOTAL_TIMEOUT);
        assert_eq!(remote.download_concurrency, Remote::DEFAULT_DOWNLOAD_CONCURRENCY);
        assert_eq!(remote.max_retries, Remote::DEFAULT_MAX_RETRIES);
        assert!(!remote.ignore_missing_package_checksums);

        Ok(())
    }

    #[test]
    fn remote_overrides() -> Result<()> {
        let remote = RemoteConfig::from_yaml(indoc::indoc! {"
            url: https://example.com/zoo/
            username: keeper
            password: secret
            tls_validation: false
            connect_timeout_seconds: 5
            download_concurrency: 0
            max_retries: 0
            ignore_missing_package_checksums: true
        "})?
        .to_remote()?;

        assert_eq!(remote.username.as_deref(), Some("keeper"));
        assert!(!remote.tls_validation);
        assert_eq!(remote.connect_timeout, Duration::from_secs(5));
        assert_eq!(remote.download_concurrency, 1);
        assert_eq!(remote.max_retries, 0);
        assert!(remote.ignore_missing_package_checksums);

        Ok(())
    }

    #[test]
    fn unknown_fields_rejected() {
        assert!(matches!(
            RemoteConfig::from_yaml("url: https://example.com/\nurl_typo: 1\n"),
            Err(MirrorError::Yaml(_))
        ));
    }

    #[test]
    fn repository_settings() -> Result<()> {
        let config = RepositoryConfig::from_yaml(indoc::indoc! {"
            name: zoo
            retain_package_versions: 2
            metadata_signing_service: zoo-signer
            metadata_checksum_type: sha512
            advisory_conflict_policy: replace
            omit_updateinfo_sum: true
            package_layout: flat
        "})?;

        let settings = config.settings();
        assert_eq!(settings.retain_package_versions, Some(2));
        assert_eq!(settings.metadata_checksum_type, ChecksumType::Sha512);
        assert_eq!(settings.advisory_conflict_policy, AdvisoryConflictPolicy::Replace);
        assert!(settings.omit_updateinfo_sum);
        assert_eq!(settings.package_layout, PackageLayout::Flat);

        let minimal = RepositoryConfig::from_yaml("name: zoo\n")?.settings();
        assert_eq!(minimal, RepositorySettings::default());

        Ok(())
    }

    #[test]
    fn sync_request() -> Result<()> {
        let request = SyncRequestConfig::from_yaml(indoc::indoc! {"
            repository: 1
            remote: 2
            mirror: true
            skip_types: [srpm, treeinfo]
        "})?
        .to_request();

        assert_eq!(request.repository, RepositoryId(1));
        assert!(request.mirror);
        assert!(request.skips(SkipType::Srpm));
        assert!(request.skips(SkipType::Treeinfo));
        assert!(!request.skips(SkipType::Advisory));

        Ok(())
    }
}
