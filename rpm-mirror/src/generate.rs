// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Repository metadata generation.

[MetadataGenerator] renders the content of a repository version as a complete set of
repository metadata files plus `repodata/repomd.xml` indexing them. Output only
depends on the content and [GenerateOptions]: units are written in natural key order,
compression is deterministic and every timestamp comes from the version, so
generating the same version twice yields identical bytes.
*/

use {
    crate::{
        content::{ContentKind, ContentUnit, NaturalKey, Package},
        error::Result,
        io::{ChecksumType, Compression, ContentDigest},
        metadata::{
            comps,
            filelists::FilelistsWriter,
            modules,
            other::OtherWriter,
            primary::PrimaryWriter,
            repomd::{Checksum, Location, RepoMd, RepoMdData},
            treeinfo, updateinfo,
        },
        platform::{ContentPlatform, RepositorySettings, RepositoryVersion, StoredUnit, VersionId},
    },
    futures::TryStreamExt,
    serde::{Deserialize, Serialize},
};

/// Where package files are placed in a published repository.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageLayout {
    /// `Packages/<first letter>/<filename>`.
    #[default]
    FirstLetter,
    /// `<filename>` at the repository root.
    Flat,
}

impl PackageLayout {
    /// The path of a package relative to the repository root.
    pub fn package_path(&self, p: &Package) -> String {
        let filename = p.filename();

        match self {
            Self::FirstLetter => {
                let letter = filename
                    .chars()
                    .next()
                    .map(|c| c.to_ascii_lowercase())
                    .unwrap_or('_');
                format!("Packages/{}/{}", letter, filename)
            }
            Self::Flat => filename.to_string(),
        }
    }
}

/// Knobs affecting generated metadata.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct GenerateOptions {
    /// Digest used in `repomd.xml` and metadata file names.
    pub checksum_type: ChecksumType,
    /// Strip `<sum>` elements from `updateinfo.xml`.
    pub omit_updateinfo_sum: bool,
    pub package_layout: PackageLayout,
    /// Timestamp recorded in `repomd.xml`. Defaults to the version creation time.
    pub timestamp: Option<i64>,
}

impl GenerateOptions {
    pub fn from_settings(settings: &RepositorySettings) -> Self {
        Self {
            checksum_type: settings.metadata_checksum_type,
            omit_updateinfo_sum: settings.omit_updateinfo_sum,
            package_layout: settings.package_layout,
            timestamp: None,
        }
    }
}

/// The resolved content of a repository version.
#[derive(Clone, Debug)]
pub struct VersionContent {
    pub version: RepositoryVersion,
    pub units: Vec<StoredUnit>,
}

impl VersionContent {
    pub fn new(version: RepositoryVersion, units: Vec<StoredUnit>) -> Self {
        Self { version, units }
    }

    /// Resolve a version and all of its units from the platform.
    pub async fn load(platform: &dyn ContentPlatform, version: VersionId) -> Result<Self> {
        let version = platform.version(version).await?;
        let units = platform
            .list_content(version.id, None)
            .try_collect::<Vec<_>>()
            .await?;

        Ok(Self { version, units })
    }

    /// Stored units of a kind, in natural key order.
    pub fn units_of(&self, kinds: &[ContentKind]) -> Vec<&StoredUnit> {
        let mut units = self
            .units
            .iter()
            .filter(|u| kinds.contains(&u.unit.kind()))
            .map(|u| (u.unit.natural_key(), u))
            .collect::<Vec<(NaturalKey, &StoredUnit)>>();

        units.sort_by(|a, b| a.0.cmp(&b.0));

        units.into_iter().map(|(_, u)| u).collect()
    }
}

/// A generated metadata file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GeneratedFile {
    /// Path relative to the repository root.
    pub path: String,
    pub data: Vec<u8>,
    pub content_type: &'static str,
}

fn content_type(path: &str) -> &'static str {
    match path {
        _ if path.ends_with(".gz") => "application/gzip",
        _ if path.ends_with(".xz") => "application/x-xz",
        _ if path.ends_with(".zst") => "application/zstd",
        _ if path.ends_with(".xml") => "application/xml",
        _ if path.ends_with(".yaml") => "application/x-yaml",
        _ => "text/plain",
    }
}

/// Renders repository metadata.
pub struct MetadataGenerator {
    options: GenerateOptions,
}

impl MetadataGenerator {
    pub fn new(options: GenerateOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &GenerateOptions {
        &self.options
    }

    /// Path a package is published at.
    pub fn package_path(&self, p: &Package) -> String {
        self.options.package_layout.package_path(p)
    }

    #[allow(clippy::too_many_arguments)]
    fn add_file(
        &self,
        timestamp: u64,
        files: &mut Vec<GeneratedFile>,
        entries: &mut Vec<RepoMdData>,
        data_type: &str,
        name: &str,
        content: &[u8],
        compression: Compression,
    ) -> Result<()> {
        let checksum = self.options.checksum_type;
        let data = compression.compress(content)?;

        let closed = ContentDigest::compute(checksum, &data);
        let path = format!(
            "repodata/{}-{}{}",
            closed.digest_hex(),
            name,
            compression.extension()
        );

        let (open_checksum, open_size) = if compression == Compression::None {
            (None, None)
        } else {
            (
                Some(Checksum::from(&ContentDigest::compute(checksum, content))),
                Some(content.len() as u64),
            )
        };

        entries.push(RepoMdData {
            data_type: data_type.to_string(),
            checksum: Checksum::from(&closed),
            location: Location { href: path.clone() },
            size: Some(data.len() as u64),
            timestamp: Some(timestamp),
            open_checksum,
            open_size,
            header_checksum: None,
            header_size: None,
        });

        log::debug!("generated {} ({} bytes)", path, data.len());

        files.push(GeneratedFile {
            content_type: content_type(&path),
            path,
            data,
        });

        Ok(())
    }

    /// Generate every metadata file of a version.
    ///
    /// `repodata/repomd.xml` is always the last file.
    pub fn generate(&self, content: &VersionContent) -> Result<Vec<GeneratedFile>> {
        let timestamp = self
            .options
            .timestamp
            .unwrap_or_else(|| content.version.created.timestamp())
            .max(0) as u64;

        let mut files = vec![];
        let mut entries = vec![];

        let packages = content
            .units_of(&[ContentKind::Package])
            .into_iter()
            .filter_map(|u| u.unit.as_package())
            .collect::<Vec<_>>();

        let mut primary = PrimaryWriter::new(packages.len());
        let mut filelists = FilelistsWriter::new(packages.len());
        let mut other = OtherWriter::new(packages.len());

        for p in &packages {
            primary.add(p, &self.package_path(p));
            filelists.add(p);
            other.add(p);
        }

        for (data_type, name, document) in [
            ("primary", "primary.xml", primary.finish()),
            ("filelists", "filelists.xml", filelists.finish()),
            ("other", "other.xml", other.finish()),
        ] {
            self.add_file(
                timestamp,
                &mut files,
                &mut entries,
                data_type,
                name,
                document.as_bytes(),
                Compression::Gzip,
            )?;
        }

        let advisories = content
            .units_of(&[ContentKind::Advisory])
            .into_iter()
            .filter_map(|u| u.unit.as_advisory())
            .collect::<Vec<_>>();

        if !advisories.is_empty() {
            let document = updateinfo::render(&advisories, self.options.omit_updateinfo_sum);
            self.add_file(
                timestamp,
                &mut files,
                &mut entries,
                "updateinfo",
                "updateinfo.xml",
                document.as_bytes(),
                Compression::Gzip,
            )?;
        }

        let mut comps_units = vec![];
        for kind in [
            ContentKind::PackageGroup,
            ContentKind::PackageCategory,
            ContentKind::PackageEnvironment,
            ContentKind::PackageLangpacks,
        ] {
            comps_units.extend(content.units_of(&[kind]).into_iter().map(|u| u.unit.as_ref()));
        }

        if !comps_units.is_empty() {
            let document = comps::render(&comps_units);
            self.add_file(
                timestamp,
                &mut files,
                &mut entries,
                "group",
                "comps.xml",
                document.as_bytes(),
                Compression::None,
            )?;
            self.add_file(
                timestamp,
                &mut files,
                &mut entries,
                "group_gz",
                "comps.xml",
                document.as_bytes(),
                Compression::Gzip,
            )?;
        }

        let mut module_units = vec![];
        for kind in [ContentKind::Modulemd, ContentKind::ModulemdDefaults] {
            module_units.extend(content.units_of(&[kind]).into_iter().map(|u| u.unit.as_ref()));
        }

        if !module_units.is_empty() {
            let document = modules::render(&module_units);
            self.add_file(
                timestamp,
                &mut files,
                &mut entries,
                "modules",
                "modules.yaml",
                document.as_bytes(),
                Compression::Gzip,
            )?;
        }

        let trees = content.units_of(&[ContentKind::DistributionTree]);
        if trees.len() > 1 {
            log::warn!(
                "repository version {} holds {} distribution trees; publishing the first",
                content.version.number,
                trees.len()
            );
        }
        if let Some(ContentUnit::DistributionTree(tree)) = trees.first().map(|u| u.unit.as_ref())
        {
            files.push(GeneratedFile {
                path: ".treeinfo".to_string(),
                data: treeinfo::render(tree).into_bytes(),
                content_type: "text/plain",
            });
        }

        let repomd = RepoMd {
            revision: timestamp.to_string(),
            data: entries,
        };

        files.push(GeneratedFile {
            path: "repodata/repomd.xml".to_string(),
            data: repomd.to_xml().into_bytes(),
            content_type: "application/xml",
        });

        Ok(files)
    }
}
