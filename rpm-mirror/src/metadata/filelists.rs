// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! `filelists.xml` file format. */

use {
    crate::{
        content::{FileEntry, Package},
        error::Result,
        metadata::{
            primary::write_file,
            xml::{XmlReader, XmlWriter},
        },
    },
    quick_xml::events::BytesStart,
    std::io::BufRead,
};

/// XML namespace of `filelists.xml`.
pub const FILELISTS_NAMESPACE: &str = "http://linux.duke.edu/metadata/filelists";

const FILE: &str = "filelists.xml";

/// Identity of a package record in `filelists.xml` or `other.xml`.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct PackageIdent {
    pub pkgid: String,
    pub name: String,
    pub arch: String,
    pub epoch: String,
    pub version: String,
    pub release: String,
}

impl PackageIdent {
    pub fn of(p: &Package) -> Self {
        Self {
            pkgid: p.pkgid().unwrap_or_default().to_string(),
            name: p.name.clone(),
            arch: p.arch.clone(),
            epoch: p.epoch.clone(),
            version: p.version.clone(),
            release: p.release.clone(),
        }
    }

    /// Whether this record has the same name, epoch, version, release and arch.
    pub fn same_nevra(&self, other: &Self) -> bool {
        self.name == other.name
            && self.arch == other.arch
            && self.epoch == other.epoch
            && self.version == other.version
            && self.release == other.release
    }

    pub(crate) fn write_start(&self, w: &mut XmlWriter) {
        w.start(
            "package",
            &[
                ("pkgid", &self.pkgid),
                ("name", &self.name),
                ("arch", &self.arch),
            ],
        );
        w.empty(
            "version",
            &[
                ("epoch", &self.epoch),
                ("ver", &self.version),
                ("rel", &self.release),
            ],
        );
    }
}

impl std::fmt::Display for PackageIdent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{}:{}-{}.{} ({})",
            self.name, self.epoch, self.version, self.release, self.arch, self.pkgid
        )
    }
}

/// Read the attributes of a `<package>` start element into an ident.
///
/// The version is filled in by the caller when the `<version>` child is seen.
pub(crate) fn read_ident_start<R: BufRead>(
    xml: &XmlReader<R>,
    e: &BytesStart,
) -> Result<PackageIdent> {
    Ok(PackageIdent {
        pkgid: xml.required_attr(e, b"pkgid")?,
        name: xml.required_attr(e, b"name")?,
        arch: xml.attr(e, b"arch")?.unwrap_or_default(),
        epoch: "0".to_string(),
        ..Default::default()
    })
}

/// Apply a `<version>` element to an ident.
pub(crate) fn read_ident_version<R: BufRead>(
    xml: &XmlReader<R>,
    e: &BytesStart,
    ident: &mut PackageIdent,
) -> Result<()> {
    if let Some(epoch) = xml.attr(e, b"epoch")? {
        if !epoch.is_empty() {
            ident.epoch = epoch;
        }
    }
    ident.version = xml.required_attr(e, b"ver")?;
    ident.release = xml.attr(e, b"rel")?.unwrap_or_default();

    Ok(())
}

/// The files of one package.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PackageFiles {
    pub ident: PackageIdent,
    pub files: Vec<FileEntry>,
}

/// Streaming reader of `filelists.xml` records.
pub struct FilelistsReader<R: BufRead> {
    xml: XmlReader<R>,
    done: bool,
}

impl<R: BufRead> FilelistsReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            xml: XmlReader::new(source, FILE),
            done: false,
        }
    }

    fn next_record(&mut self) -> Result<Option<PackageFiles>> {
        let (start, empty) = match self.xml.find(b"package")? {
            Some(v) => v,
            None => return Ok(None),
        };

        let mut record = PackageFiles {
            ident: read_ident_start(&self.xml, &start)?,
            files: vec![],
        };

        if empty {
            return Err(self.xml.error("package", "missing version"));
        }

        while let Some((e, empty)) = self.xml.next_child(b"package")? {
            match e.local_name().as_ref() {
                b"version" => {
                    read_ident_version(&self.xml, &e, &mut record.ident)?;
                    self.xml.finish(empty)?;
                }
                b"file" => {
                    let file_type = self.xml.attr(&e, b"type")?;
                    let path = self.xml.text(empty)?;
                    record.files.push(FileEntry { file_type, path });
                }
                _ => self.xml.finish(empty)?,
            }
        }

        Ok(Some(record))
    }
}

impl<R: BufRead> Iterator for FilelistsReader<R> {
    type Item = Result<PackageFiles>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.next_record() {
            Ok(Some(v)) => Some(Ok(v)),
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

/// Writes a `filelists.xml` document.
pub struct FilelistsWriter {
    xml: XmlWriter,
}

impl FilelistsWriter {
    pub fn new(count: usize) -> Self {
        let mut xml = XmlWriter::new();
        xml.start(
            "filelists",
            &[
                ("xmlns", FILELISTS_NAMESPACE),
                ("packages", &count.to_string()),
            ],
        );

        Self { xml }
    }

    pub fn add(&mut self, p: &Package) {
        PackageIdent::of(p).write_start(&mut self.xml);

        for file in &p.files {
            write_file(&mut self.xml, file);
        }

        self.xml.end("package");
    }

    pub fn finish(mut self) -> String {
        self.xml.end("filelists");
        self.xml.finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const FILELISTS_XML: &str = include_str!("../../testdata/filelists.xml");

    #[test]
    fn parse_records() -> Result<()> {
        let records = FilelistsReader::new(FILELISTS_XML.as_bytes()).collect::<Result<Vec<_>>>()?;

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].ident.name, "camel");
        assert_eq!(records[0].ident.epoch, "1");
        assert_eq!(records[1].ident.name, "bear");
        assert_eq!(records[1].files.len(), 3);
        assert_eq!(records[1].files[0].file_type.as_deref(), Some("dir"));

        Ok(())
    }

    #[test]
    fn missing_pkgid_is_error() {
        let xml = r#"<filelists><package name="bear"><version ver="1"/></package></filelists>"#;

        assert!(FilelistsReader::new(xml.as_bytes())
            .collect::<Result<Vec<_>>>()
            .is_err());
    }
}
