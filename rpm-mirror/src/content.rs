// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Content units.

A content unit is an immutable record discovered in repository metadata. Units are
modeled as the [ContentUnit] sum type. Each variant has a [NaturalKey] which identifies
it globally regardless of which repository it was discovered in.

Units whose metadata has no intrinsic identity (advisories, comps entries, module
defaults) fold a SHA-256 digest of their canonical rendering into their natural key,
so equal data always yields equal keys.
*/

use {
    crate::{
        io::{ChecksumType, ContentDigest},
        metadata::{comps, modules, treeinfo, updateinfo},
        package_version::Evr,
    },
    std::collections::BTreeMap,
};

/// The variants of [ContentUnit].
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ContentKind {
    Package,
    Advisory,
    PackageCategory,
    PackageGroup,
    PackageEnvironment,
    PackageLangpacks,
    Modulemd,
    ModulemdDefaults,
    DistributionTree,
}

impl ContentKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Package => "package",
            Self::Advisory => "advisory",
            Self::PackageCategory => "packagecategory",
            Self::PackageGroup => "packagegroup",
            Self::PackageEnvironment => "packageenvironment",
            Self::PackageLangpacks => "packagelangpacks",
            Self::Modulemd => "modulemd",
            Self::ModulemdDefaults => "modulemd_defaults",
            Self::DistributionTree => "distribution_tree",
        }
    }

    /// Whether this kind is populated from `comps.xml`.
    pub fn is_comps(&self) -> bool {
        matches!(
            self,
            Self::PackageCategory
                | Self::PackageGroup
                | Self::PackageEnvironment
                | Self::PackageLangpacks
        )
    }

    /// Whether this kind is populated from `modules.yaml`.
    pub fn is_module(&self) -> bool {
        matches!(self, Self::Modulemd | Self::ModulemdDefaults)
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Globally unique identity of a content unit.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NaturalKey {
    kind: ContentKind,
    fields: Vec<String>,
}

impl NaturalKey {
    pub fn new(kind: ContentKind, fields: Vec<String>) -> Self {
        Self { kind, fields }
    }

    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }
}

impl std::fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.fields.join("/"))
    }
}

/// Checksum of a package file as declared in `primary.xml`.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PackageChecksum {
    pub checksum_type: ChecksumType,
    /// Lower case hex digest.
    pub value: String,
    /// Whether this checksum doubles as the package id.
    pub pkgid: bool,
}

impl PackageChecksum {
    pub fn content_digest(&self) -> crate::error::Result<ContentDigest> {
        ContentDigest::from_hex_digest(self.checksum_type, &self.value)
    }
}

/// A capability entry such as `<rpm:entry>` in a provides or requires list.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Dependency {
    pub name: String,
    /// Comparison flag such as `EQ`, `GE` or `LT`.
    pub flags: Option<String>,
    pub epoch: Option<String>,
    pub version: Option<String>,
    pub release: Option<String>,
    /// Pre-requisite marker of requires entries.
    pub pre: bool,
}

/// A file owned by a package.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct FileEntry {
    /// `dir` or `ghost`. Regular files carry no type.
    pub file_type: Option<String>,
    pub path: String,
}

impl FileEntry {
    pub fn file(path: impl ToString) -> Self {
        Self {
            file_type: None,
            path: path.to_string(),
        }
    }

    /// Whether this entry is also listed in `primary.xml`.
    ///
    /// These are the paths dependency solvers commonly need without downloading
    /// the full file lists.
    pub fn is_primary(&self) -> bool {
        self.path.starts_with("/etc/")
            || self.path.contains("bin/")
            || self.path == "/usr/lib/sendmail"
    }
}

/// A changelog entry from `other.xml`.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Changelog {
    pub author: String,
    pub date: u64,
    pub text: String,
}

/// An RPM package.
///
/// Combines the records of `primary.xml`, `filelists.xml` and `other.xml`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Package {
    /// Usually `rpm`.
    pub package_type: String,
    pub name: String,
    pub arch: String,
    pub epoch: String,
    pub version: String,
    pub release: String,
    pub checksum: Option<PackageChecksum>,
    pub summary: String,
    pub description: String,
    pub packager: Option<String>,
    pub url: Option<String>,
    pub time_file: u64,
    pub time_build: u64,
    pub size_package: u64,
    pub size_installed: u64,
    pub size_archive: u64,
    /// Path of the package file relative to the repository root.
    pub location_href: String,
    pub location_base: Option<String>,
    pub license: Option<String>,
    pub vendor: Option<String>,
    pub group: Option<String>,
    pub buildhost: Option<String>,
    pub sourcerpm: Option<String>,
    pub header_range: Option<(u64, u64)>,
    pub provides: Vec<Dependency>,
    pub requires: Vec<Dependency>,
    pub conflicts: Vec<Dependency>,
    pub obsoletes: Vec<Dependency>,
    pub suggests: Vec<Dependency>,
    pub enhances: Vec<Dependency>,
    pub recommends: Vec<Dependency>,
    pub supplements: Vec<Dependency>,
    pub files: Vec<FileEntry>,
    pub changelogs: Vec<Changelog>,
}

impl Package {
    /// The `name-epoch:version-release.arch` string.
    pub fn nevra(&self) -> String {
        format!(
            "{}-{}:{}-{}.{}",
            self.name, self.epoch, self.version, self.release, self.arch
        )
    }

    pub fn evr(&self) -> Evr {
        Evr::new(&self.epoch, &self.version, &self.release)
    }

    /// The package id that correlates `filelists.xml` and `other.xml` records.
    pub fn pkgid(&self) -> Option<&str> {
        self.checksum.as_ref().map(|c| c.value.as_str())
    }

    /// File name of the package, derived from its location.
    pub fn filename(&self) -> &str {
        self.location_href
            .rsplit('/')
            .next()
            .unwrap_or(&self.location_href)
    }

    /// Whether this is a source package.
    pub fn is_source(&self) -> bool {
        self.arch == "src" || self.arch == "nosrc"
    }

    pub fn natural_key(&self) -> NaturalKey {
        let (checksum_type, checksum) = match &self.checksum {
            Some(c) => (c.checksum_type.name().to_string(), c.value.clone()),
            None => (String::new(), String::new()),
        };

        NaturalKey::new(
            ContentKind::Package,
            vec![
                self.name.clone(),
                self.epoch.clone(),
                self.version.clone(),
                self.release.clone(),
                self.arch.clone(),
                checksum_type,
                checksum,
            ],
        )
    }
}

/// A `<reference>` of an advisory.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AdvisoryReference {
    pub href: String,
    pub ref_id: Option<String>,
    pub ref_type: Option<String>,
    pub title: Option<String>,
}

/// The module an advisory collection applies to.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AdvisoryModule {
    pub name: String,
    pub stream: String,
    pub version: String,
    pub context: String,
    pub arch: String,
}

/// The `<sum>` checksum of a package listed in an advisory.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AdvisorySum {
    /// Checksum name, kept verbatim.
    pub sum_type: String,
    pub value: String,
}

/// A package referenced by an advisory.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AdvisoryPackage {
    pub name: String,
    pub epoch: String,
    pub version: String,
    pub release: String,
    pub arch: String,
    pub src: Option<String>,
    pub filename: Option<String>,
    pub sum: Option<AdvisorySum>,
    pub reboot_suggested: bool,
    pub relogin_suggested: bool,
    pub restart_suggested: bool,
}

/// A `<collection>` inside an advisory `<pkglist>`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AdvisoryCollection {
    pub name: Option<String>,
    pub short: Option<String>,
    pub module: Option<AdvisoryModule>,
    pub packages: Vec<AdvisoryPackage>,
}

/// An advisory (erratum) from `updateinfo.xml`.
///
/// Dates are kept verbatim as published upstream.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Advisory {
    pub id: String,
    pub from: Option<String>,
    pub status: Option<String>,
    pub advisory_type: Option<String>,
    pub version: Option<String>,
    pub title: Option<String>,
    pub issued_date: Option<String>,
    pub updated_date: Option<String>,
    pub rights: Option<String>,
    pub release: Option<String>,
    pub pushcount: Option<String>,
    pub severity: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub solution: Option<String>,
    pub reboot_suggested: bool,
    pub references: Vec<AdvisoryReference>,
    pub collections: Vec<AdvisoryCollection>,
}

impl Advisory {
    /// SHA-256 of the canonical `<update>` rendering.
    pub fn content_digest(&self) -> String {
        digest_hex(updateinfo::render_advisory(self, false).as_bytes())
    }

    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey::new(
            ContentKind::Advisory,
            vec![self.id.clone(), self.content_digest()],
        )
    }
}

/// Names and descriptions keyed by `xml:lang`.
pub type Translations = BTreeMap<String, String>;

/// A package requirement of a comps group.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct GroupPackage {
    pub name: String,
    /// `mandatory`, `default`, `optional` or `conditional`.
    pub package_type: String,
    pub requires: Option<String>,
    pub basearchonly: bool,
}

/// A comps `<group>`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PackageGroup {
    pub id: String,
    pub name: String,
    pub description: String,
    pub name_by_lang: Translations,
    pub desc_by_lang: Translations,
    pub default: bool,
    pub user_visible: bool,
    pub biarch_only: bool,
    pub display_order: Option<u32>,
    pub langonly: Option<String>,
    pub packages: Vec<GroupPackage>,
}

/// A comps `<category>`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PackageCategory {
    pub id: String,
    pub name: String,
    pub description: String,
    pub name_by_lang: Translations,
    pub desc_by_lang: Translations,
    pub display_order: Option<u32>,
    pub group_ids: Vec<String>,
}

/// An optional group of a comps environment.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct EnvironmentOption {
    pub group_id: String,
    pub default: bool,
}

/// A comps `<environment>`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PackageEnvironment {
    pub id: String,
    pub name: String,
    pub description: String,
    pub name_by_lang: Translations,
    pub desc_by_lang: Translations,
    pub display_order: Option<u32>,
    pub group_ids: Vec<String>,
    pub options: Vec<EnvironmentOption>,
}

/// A `<match>` rule of comps `<langpacks>`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LangpackMatch {
    pub name: String,
    pub install: String,
}

/// The comps `<langpacks>` element.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PackageLangpacks {
    pub matches: Vec<LangpackMatch>,
}

/// A `modulemd` v2 document.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Modulemd {
    pub name: String,
    pub stream: String,
    pub version: u64,
    pub context: String,
    pub arch: String,
    /// `name-epoch:version-release.arch` strings of the module's RPMs.
    pub artifacts: Vec<String>,
    /// The complete document in canonical YAML form.
    pub document: String,
}

/// A `modulemd-defaults` v1 document.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ModulemdDefaults {
    pub module: String,
    pub stream: Option<String>,
    pub profiles: BTreeMap<String, Vec<String>>,
    /// The complete document in canonical YAML form.
    pub document: String,
}

/// An installer tree described by `.treeinfo`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DistributionTree {
    pub header_version: String,
    pub release_name: String,
    pub release_short: String,
    pub release_version: String,
    pub arch: String,
    pub build_timestamp: String,
    /// Every section of the source file, for regeneration.
    pub sections: BTreeMap<String, BTreeMap<String, String>>,
}

/// A content unit of any kind.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ContentUnit {
    Package(Package),
    Advisory(Advisory),
    PackageCategory(PackageCategory),
    PackageGroup(PackageGroup),
    PackageEnvironment(PackageEnvironment),
    PackageLangpacks(PackageLangpacks),
    Modulemd(Modulemd),
    ModulemdDefaults(ModulemdDefaults),
    DistributionTree(DistributionTree),
}

impl ContentUnit {
    pub fn kind(&self) -> ContentKind {
        match self {
            Self::Package(_) => ContentKind::Package,
            Self::Advisory(_) => ContentKind::Advisory,
            Self::PackageCategory(_) => ContentKind::PackageCategory,
            Self::PackageGroup(_) => ContentKind::PackageGroup,
            Self::PackageEnvironment(_) => ContentKind::PackageEnvironment,
            Self::PackageLangpacks(_) => ContentKind::PackageLangpacks,
            Self::Modulemd(_) => ContentKind::Modulemd,
            Self::ModulemdDefaults(_) => ContentKind::ModulemdDefaults,
            Self::DistributionTree(_) => ContentKind::DistributionTree,
        }
    }

    /// Compute the natural key of this unit.
    pub fn natural_key(&self) -> NaturalKey {
        let kind = self.kind();

        let fields = match self {
            Self::Package(p) => return p.natural_key(),
            Self::Advisory(a) => return a.natural_key(),
            Self::PackageCategory(c) => vec![
                c.id.clone(),
                digest_hex(comps::render_category(c).as_bytes()),
            ],
            Self::PackageGroup(g) => {
                vec![g.id.clone(), digest_hex(comps::render_group(g).as_bytes())]
            }
            Self::PackageEnvironment(e) => vec![
                e.id.clone(),
                digest_hex(comps::render_environment(e).as_bytes()),
            ],
            Self::PackageLangpacks(l) => vec![digest_hex(comps::render_langpacks(l).as_bytes())],
            Self::Modulemd(m) => vec![
                m.name.clone(),
                m.stream.clone(),
                m.version.to_string(),
                m.context.clone(),
                m.arch.clone(),
            ],
            Self::ModulemdDefaults(d) => vec![
                d.module.clone(),
                d.stream.clone().unwrap_or_default(),
                digest_hex(modules::render_document(&d.document).as_bytes()),
            ],
            Self::DistributionTree(t) => vec![
                t.header_version.clone(),
                t.release_name.clone(),
                t.release_short.clone(),
                t.release_version.clone(),
                t.arch.clone(),
                t.build_timestamp.clone(),
            ],
        };

        NaturalKey::new(kind, fields)
    }

    pub fn as_package(&self) -> Option<&Package> {
        match self {
            Self::Package(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_advisory(&self) -> Option<&Advisory> {
        match self {
            Self::Advisory(a) => Some(a),
            _ => None,
        }
    }

    /// Render the unit in its canonical metadata form.
    pub fn canonical_form(&self) -> String {
        match self {
            Self::Package(p) => p.nevra(),
            Self::Advisory(a) => updateinfo::render_advisory(a, false),
            Self::PackageCategory(c) => comps::render_category(c),
            Self::PackageGroup(g) => comps::render_group(g),
            Self::PackageEnvironment(e) => comps::render_environment(e),
            Self::PackageLangpacks(l) => comps::render_langpacks(l),
            Self::Modulemd(m) => modules::render_document(&m.document),
            Self::ModulemdDefaults(d) => modules::render_document(&d.document),
            Self::DistributionTree(t) => treeinfo::render(t),
        }
    }
}

fn digest_hex(data: &[u8]) -> String {
    ContentDigest::compute(ChecksumType::Sha256, data).digest_hex()
}

#[cfg(test)]
mod test {
    use super::*;

    fn advisory(title: &str) -> Advisory {
        Advisory {
            id: "RHEA-2012:0055".into(),
            title: Some(title.into()),
            ..Default::default()
        }
    }

    #[test]
    fn primary_file_selection() {
        assert!(FileEntry::file("/etc/bear.conf").is_primary());
        assert!(FileEntry::file("/usr/bin/bear").is_primary());
        assert!(FileEntry::file("/usr/sbin/bear").is_primary());
        assert!(FileEntry::file("/usr/lib/sendmail").is_primary());
        assert!(!FileEntry::file("/usr/share/doc/bear/README").is_primary());
    }

    #[test]
    fn advisory_keys_follow_content() {
        let a = ContentUnit::Advisory(advisory("first"));
        let b = ContentUnit::Advisory(advisory("first"));
        let c = ContentUnit::Advisory(advisory("second"));

        assert_eq!(a.natural_key(), b.natural_key());
        assert_ne!(a.natural_key(), c.natural_key());
        assert_eq!(a.natural_key().fields()[0], "RHEA-2012:0055");
    }

    #[test]
    fn package_key_includes_checksum() {
        let mut p = Package {
            name: "bear".into(),
            epoch: "0".into(),
            version: "4.1".into(),
            release: "1".into(),
            arch: "noarch".into(),
            location_href: "Packages/b/bear-4.1-1.noarch.rpm".into(),
            ..Default::default()
        };

        let without = p.natural_key();

        p.checksum = Some(PackageChecksum {
            checksum_type: ChecksumType::Sha256,
            value: "ab".repeat(32),
            pkgid: true,
        });

        assert_ne!(without, p.natural_key());
        assert_eq!(p.natural_key().fields()[5], "sha256");
        assert_eq!(p.filename(), "bear-4.1-1.noarch.rpm");
        assert_eq!(p.nevra(), "bear-0:4.1-1.noarch");
    }
}
