// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! `primary.xml` file format.

`primary.xml` carries one `<package>` per package with identity, checksum, sizes,
location and the `rpm:` namespaced dependency data. Only a subset of each package's
files is listed here; the complete list lives in `filelists.xml`.
*/

use {
    crate::{
        content::{Dependency, FileEntry, Package, PackageChecksum},
        error::Result,
        io::{ChecksumType, ContentDigest},
        metadata::xml::{XmlReader, XmlWriter},
    },
    std::{io::BufRead, str::FromStr},
};

/// XML namespace of `primary.xml`.
pub const COMMON_NAMESPACE: &str = "http://linux.duke.edu/metadata/common";

const FILE: &str = "primary.xml";

/// Streaming reader of `<package>` records in a `primary.xml` document.
pub struct PrimaryReader<R: BufRead> {
    xml: XmlReader<R>,
    done: bool,
}

impl<R: BufRead> PrimaryReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            xml: XmlReader::new(source, FILE),
            done: false,
        }
    }

    fn next_package(&mut self) -> Result<Option<Package>> {
        let (start, empty) = match self.xml.find(b"package")? {
            Some(v) => v,
            None => return Ok(None),
        };

        let mut p = Package {
            package_type: self
                .xml
                .attr(&start, b"type")?
                .unwrap_or_else(|| "rpm".to_string()),
            epoch: "0".to_string(),
            ..Default::default()
        };

        if empty {
            return Err(self.xml.error("package", "empty package element"));
        }

        while let Some((e, empty)) = self.xml.next_child(b"package")? {
            match e.local_name().as_ref() {
                b"name" => p.name = self.xml.text(empty)?,
                b"arch" => p.arch = self.xml.text(empty)?,
                b"version" => {
                    if let Some(epoch) = self.xml.attr(&e, b"epoch")? {
                        if !epoch.is_empty() {
                            p.epoch = epoch;
                        }
                    }
                    p.version = self.xml.required_attr(&e, b"ver")?;
                    p.release = self.xml.attr(&e, b"rel")?.unwrap_or_default();
                    self.xml.finish(empty)?;
                }
                b"checksum" => {
                    let checksum_type = self.xml.required_attr(&e, b"type")?;
                    let pkgid = self
                        .xml
                        .attr(&e, b"pkgid")?
                        .map(|v| v.eq_ignore_ascii_case("yes"))
                        .unwrap_or(false);
                    let value = self.xml.text(empty)?;

                    p.checksum = Some(parse_checksum(&self.xml, &checksum_type, &value, pkgid)?);
                }
                b"summary" => p.summary = self.xml.text(empty)?,
                b"description" => p.description = self.xml.text(empty)?,
                b"packager" => p.packager = Some(self.xml.text(empty)?),
                b"url" => p.url = Some(self.xml.text(empty)?),
                b"time" => {
                    p.time_file = self.xml.u64_attr(&e, b"file")?.unwrap_or(0);
                    p.time_build = self.xml.u64_attr(&e, b"build")?.unwrap_or(0);
                    self.xml.finish(empty)?;
                }
                b"size" => {
                    p.size_package = self.xml.u64_attr(&e, b"package")?.unwrap_or(0);
                    p.size_installed = self.xml.u64_attr(&e, b"installed")?.unwrap_or(0);
                    p.size_archive = self.xml.u64_attr(&e, b"archive")?.unwrap_or(0);
                    self.xml.finish(empty)?;
                }
                b"location" => {
                    p.location_href = self.xml.required_attr(&e, b"href")?;
                    p.location_base = self.xml.attr(&e, b"base")?;
                    self.xml.finish(empty)?;
                }
                b"format" if !empty => self.read_format(&mut p)?,
                _ => self.xml.finish(empty)?,
            }
        }

        if p.name.is_empty() {
            return Err(self.xml.error("name", "package has no name"));
        }

        Ok(Some(p))
    }

    fn read_format(&mut self, p: &mut Package) -> Result<()> {
        while let Some((e, empty)) = self.xml.next_child(b"format")? {
            match e.local_name().as_ref() {
                b"license" => p.license = Some(self.xml.text(empty)?),
                b"vendor" => p.vendor = Some(self.xml.text(empty)?),
                b"group" => p.group = Some(self.xml.text(empty)?),
                b"buildhost" => p.buildhost = Some(self.xml.text(empty)?),
                b"sourcerpm" => p.sourcerpm = Some(self.xml.text(empty)?),
                b"header-range" => {
                    let start = self.xml.u64_attr(&e, b"start")?.unwrap_or(0);
                    let end = self.xml.u64_attr(&e, b"end")?.unwrap_or(0);
                    p.header_range = Some((start, end));
                    self.xml.finish(empty)?;
                }
                b"provides" => p.provides = self.read_entries(b"provides", empty)?,
                b"requires" => p.requires = self.read_entries(b"requires", empty)?,
                b"conflicts" => p.conflicts = self.read_entries(b"conflicts", empty)?,
                b"obsoletes" => p.obsoletes = self.read_entries(b"obsoletes", empty)?,
                b"suggests" => p.suggests = self.read_entries(b"suggests", empty)?,
                b"enhances" => p.enhances = self.read_entries(b"enhances", empty)?,
                b"recommends" => p.recommends = self.read_entries(b"recommends", empty)?,
                b"supplements" => p.supplements = self.read_entries(b"supplements", empty)?,
                b"file" => {
                    let file_type = self.xml.attr(&e, b"type")?;
                    let path = self.xml.text(empty)?;
                    p.files.push(FileEntry { file_type, path });
                }
                _ => self.xml.finish(empty)?,
            }
        }

        Ok(())
    }

    fn read_entries(&mut self, parent: &[u8], empty: bool) -> Result<Vec<Dependency>> {
        let mut entries = vec![];

        if empty {
            return Ok(entries);
        }

        while let Some((e, empty)) = self.xml.next_child(parent)? {
            if e.local_name().as_ref() == b"entry" {
                entries.push(Dependency {
                    name: self.xml.required_attr(&e, b"name")?,
                    flags: self.xml.attr(&e, b"flags")?,
                    epoch: self.xml.attr(&e, b"epoch")?,
                    version: self.xml.attr(&e, b"ver")?,
                    release: self.xml.attr(&e, b"rel")?,
                    pre: self
                        .xml
                        .attr(&e, b"pre")?
                        .map(|v| v == "1")
                        .unwrap_or(false),
                });
            }

            self.xml.finish(empty)?;
        }

        Ok(entries)
    }
}

impl<R: BufRead> Iterator for PrimaryReader<R> {
    type Item = Result<Package>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.next_package() {
            Ok(Some(p)) => Some(Ok(p)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Validate a package checksum as read from metadata.
pub(crate) fn parse_checksum<R: BufRead>(
    xml: &XmlReader<R>,
    checksum_type: &str,
    value: &str,
    pkgid: bool,
) -> Result<PackageChecksum> {
    let checksum_type = ChecksumType::from_str(checksum_type)
        .map_err(|e| xml.error("checksum", e))?;
    let digest = ContentDigest::from_hex_digest(checksum_type, value)
        .map_err(|e| xml.error("checksum", e))?;

    Ok(PackageChecksum {
        checksum_type,
        value: digest.digest_hex(),
        pkgid,
    })
}

/// Writes a `primary.xml` document.
pub struct PrimaryWriter {
    xml: XmlWriter,
}

impl PrimaryWriter {
    pub fn new(count: usize) -> Self {
        let mut xml = XmlWriter::new();
        xml.start(
            "metadata",
            &[
                ("xmlns", COMMON_NAMESPACE),
                ("xmlns:rpm", crate::metadata::repomd::RPM_NAMESPACE),
                ("packages", &count.to_string()),
            ],
        );

        Self { xml }
    }

    /// Write a package, published at `href`.
    pub fn add(&mut self, p: &Package, href: &str) {
        let w = &mut self.xml;

        w.start("package", &[("type", &p.package_type)]);
        w.text("name", &[], &p.name);
        w.text("arch", &[], &p.arch);
        w.empty(
            "version",
            &[("epoch", &p.epoch), ("ver", &p.version), ("rel", &p.release)],
        );
        if let Some(checksum) = &p.checksum {
            w.text(
                "checksum",
                &[
                    ("type", checksum.checksum_type.name()),
                    ("pkgid", if checksum.pkgid { "YES" } else { "NO" }),
                ],
                &checksum.value,
            );
        }
        w.text("summary", &[], &p.summary);
        w.text("description", &[], &p.description);
        w.optional_text("packager", p.packager.as_deref());
        w.optional_text("url", p.url.as_deref());
        w.empty(
            "time",
            &[
                ("file", &p.time_file.to_string()),
                ("build", &p.time_build.to_string()),
            ],
        );
        w.empty(
            "size",
            &[
                ("package", &p.size_package.to_string()),
                ("installed", &p.size_installed.to_string()),
                ("archive", &p.size_archive.to_string()),
            ],
        );
        w.empty("location", &[("href", href)]);

        w.start("format", &[]);
        w.optional_text("rpm:license", p.license.as_deref());
        w.optional_text("rpm:vendor", p.vendor.as_deref());
        w.optional_text("rpm:group", p.group.as_deref());
        w.optional_text("rpm:buildhost", p.buildhost.as_deref());
        w.optional_text("rpm:sourcerpm", p.sourcerpm.as_deref());
        if let Some((start, end)) = p.header_range {
            w.empty(
                "rpm:header-range",
                &[("start", &start.to_string()), ("end", &end.to_string())],
            );
        }

        for (name, entries) in [
            ("rpm:provides", &p.provides),
            ("rpm:requires", &p.requires),
            ("rpm:conflicts", &p.conflicts),
            ("rpm:obsoletes", &p.obsoletes),
            ("rpm:suggests", &p.suggests),
            ("rpm:enhances", &p.enhances),
            ("rpm:recommends", &p.recommends),
            ("rpm:supplements", &p.supplements),
        ] {
            write_entries(w, name, entries);
        }

        for file in p.files.iter().filter(|f| f.is_primary()) {
            write_file(w, file);
        }

        w.end("format");
        w.end("package");
    }

    pub fn finish(mut self) -> String {
        self.xml.end("metadata");
        self.xml.finish()
    }
}

fn write_entries(w: &mut XmlWriter, name: &str, entries: &[Dependency]) {
    if entries.is_empty() {
        return;
    }

    w.start(name, &[]);

    for entry in entries {
        let mut attrs = vec![("name", entry.name.as_str())];
        if let Some(flags) = &entry.flags {
            attrs.push(("flags", flags));
        }
        if let Some(epoch) = &entry.epoch {
            attrs.push(("epoch", epoch));
        }
        if let Some(version) = &entry.version {
            attrs.push(("ver", version));
        }
        if let Some(release) = &entry.release {
            attrs.push(("rel", release));
        }
        if entry.pre {
            attrs.push(("pre", "1"));
        }

        w.empty("rpm:entry", &attrs);
    }

    w.end(name);
}

/// Write a `<file>` element.
pub(crate) fn write_file(w: &mut XmlWriter, file: &FileEntry) {
    match &file.file_type {
        Some(file_type) => w.text("file", &[("type", file_type)], &file.path),
        None => w.text("file", &[], &file.path),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const PRIMARY_XML: &str = include_str!("../../testdata/primary.xml");

    #[test]
    fn parse_packages() -> Result<()> {
        let packages = PrimaryReader::new(PRIMARY_XML.as_bytes()).collect::<Result<Vec<_>>>()?;

        assert_eq!(packages.len(), 2);

        let bear = &packages[0];
        assert_eq!(bear.package_type, "rpm");
        assert_eq!(bear.name, "bear");
        assert_eq!(bear.nevra(), "bear-0:4.1-1.noarch");
        assert_eq!(
            bear.checksum.as_ref().unwrap().checksum_type,
            ChecksumType::Sha256
        );
        assert!(bear.checksum.as_ref().unwrap().pkgid);
        assert_eq!(bear.size_package, 2292);
        assert_eq!(bear.location_href, "bear-4.1-1.noarch.rpm");
        assert_eq!(bear.license.as_deref(), Some("GPLv2"));
        assert_eq!(bear.header_range, Some((280, 1697)));
        assert_eq!(bear.provides.len(), 1);
        assert_eq!(bear.provides[0].flags.as_deref(), Some("EQ"));
        assert_eq!(bear.requires.len(), 1);
        assert!(bear.requires[0].pre);
        assert_eq!(bear.files, vec![FileEntry::file("/usr/bin/bear")]);

        let camel = &packages[1];
        assert_eq!(camel.epoch, "1");
        assert!(camel.packager.is_none());
        assert!(camel.requires.is_empty());

        Ok(())
    }

    #[test]
    fn unknown_elements_are_skipped() -> Result<()> {
        let xml = indoc::indoc! {r#"
            <?xml version="1.0" encoding="UTF-8"?>
            <metadata xmlns="http://linux.duke.edu/metadata/common" xmlns:x="urn:x" packages="1">
            <x:banner><x:nested>ignored</x:nested></x:banner>
            <package type="rpm">
              <name>walrus</name>
              <arch>noarch</arch>
              <x:extra attr="1"><x:deep/></x:extra>
              <version epoch="0" ver="5.21" rel="1"/>
              <location href="walrus-5.21-1.noarch.rpm"/>
              <format><x:weird>yes</x:weird></format>
            </package>
            </metadata>
        "#};

        let packages = PrimaryReader::new(xml.as_bytes()).collect::<Result<Vec<_>>>()?;
        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0].name, "walrus");
        assert!(packages[0].checksum.is_none());

        Ok(())
    }

    #[test]
    fn malformed_checksum_is_error() {
        let xml = indoc::indoc! {r#"
            <metadata packages="1">
            <package type="rpm">
              <name>walrus</name>
              <checksum type="sha256" pkgid="YES">nothex</checksum>
            </package>
            </metadata>
        "#};

        let res = PrimaryReader::new(xml.as_bytes()).collect::<Result<Vec<_>>>();

        match res {
            Err(crate::error::MirrorError::MetadataParse { file, element, .. }) => {
                assert_eq!(file, "primary.xml");
                assert_eq!(element, "checksum");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn write_then_parse() -> Result<()> {
        let packages = PrimaryReader::new(PRIMARY_XML.as_bytes()).collect::<Result<Vec<_>>>()?;

        let mut writer = PrimaryWriter::new(packages.len());
        for p in &packages {
            writer.add(p, &p.location_href);
        }
        let xml = writer.finish();

        let parsed = PrimaryReader::new(xml.as_bytes()).collect::<Result<Vec<_>>>()?;
        assert_eq!(parsed, packages);

        Ok(())
    }
}
