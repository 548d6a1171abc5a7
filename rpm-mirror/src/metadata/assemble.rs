// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Correlation of `primary.xml`, `filelists.xml` and `other.xml`.

The three files describe the same packages and are conventionally written in the same
order. [PackageAssembler] walks them in lockstep and only buffers records that arrive
out of order. Every primary package must find exactly one record in each of the other
files and every record must belong to a primary package.
*/

use {
    crate::{
        content::Package,
        error::{MirrorError, Result},
        metadata::{
            filelists::{PackageFiles, PackageIdent},
            other::PackageChangelogs,
        },
    },
    std::collections::HashMap,
};

/// A record keyed by package identity.
pub trait Correlated {
    fn ident(&self) -> &PackageIdent;
}

impl Correlated for PackageFiles {
    fn ident(&self) -> &PackageIdent {
        &self.ident
    }
}

impl Correlated for PackageChangelogs {
    fn ident(&self) -> &PackageIdent {
        &self.ident
    }
}

fn matches(candidate: &PackageIdent, want: &PackageIdent, by_pkgid: bool) -> bool {
    if by_pkgid {
        candidate == want
    } else {
        candidate.same_nevra(want)
    }
}

/// Out of order records of one secondary file.
struct Secondary<T, I> {
    file: &'static str,
    source: I,
    pending: HashMap<PackageIdent, T>,
}

impl<T, I> Secondary<T, I>
where
    T: Correlated,
    I: Iterator<Item = Result<T>>,
{
    fn new(file: &'static str, source: I) -> Self {
        Self {
            file,
            source,
            pending: HashMap::new(),
        }
    }

    fn take(&mut self, want: &PackageIdent, by_pkgid: bool) -> Result<T> {
        let buffered = if by_pkgid {
            self.pending.contains_key(want).then(|| want.clone())
        } else {
            self.pending
                .keys()
                .find(|ident| ident.same_nevra(want))
                .cloned()
        };

        if let Some(key) = buffered {
            if let Some(record) = self.pending.remove(&key) {
                return Ok(record);
            }
        }

        loop {
            match self.source.next() {
                Some(record) => {
                    let record = record?;

                    if matches(record.ident(), want, by_pkgid) {
                        return Ok(record);
                    }

                    let ident = record.ident().clone();
                    if self.pending.insert(ident.clone(), record).is_some() {
                        return Err(MirrorError::parse(
                            self.file,
                            "package",
                            format!("duplicate record for {}", ident),
                        ));
                    }
                }
                None => {
                    return Err(MirrorError::parse(
                        self.file,
                        "package",
                        format!("no record for primary package {}", want),
                    ))
                }
            }
        }
    }

    fn finish(&mut self) -> Result<()> {
        let leftover = match self.pending.keys().next() {
            Some(ident) => Some(ident.clone()),
            None => match self.source.next() {
                Some(record) => Some(record?.ident().clone()),
                None => None,
            },
        };

        match leftover {
            Some(ident) => Err(MirrorError::parse(
                self.file,
                "package",
                format!("record for package {} not in primary.xml", ident),
            )),
            None => Ok(()),
        }
    }
}

/// Joins the records of the three package metadata files into complete [Package]s.
pub struct PackageAssembler<P, F, O> {
    primary: P,
    filelists: Secondary<PackageFiles, F>,
    other: Secondary<PackageChangelogs, O>,
    done: bool,
}

impl<P, F, O> PackageAssembler<P, F, O>
where
    P: Iterator<Item = Result<Package>>,
    F: Iterator<Item = Result<PackageFiles>>,
    O: Iterator<Item = Result<PackageChangelogs>>,
{
    pub fn new(primary: P, filelists: F, other: O) -> Self {
        Self {
            primary,
            filelists: Secondary::new("filelists.xml", filelists),
            other: Secondary::new("other.xml", other),
            done: false,
        }
    }

    fn next_package(&mut self) -> Result<Option<Package>> {
        let mut package = match self.primary.next() {
            Some(p) => p?,
            None => {
                self.filelists.finish()?;
                self.other.finish()?;
                return Ok(None);
            }
        };

        let want = PackageIdent::of(&package);
        let by_pkgid = package.pkgid().is_some();

        package.files = self.filelists.take(&want, by_pkgid)?.files;
        package.changelogs = self.other.take(&want, by_pkgid)?.changelogs;

        Ok(Some(package))
    }
}

impl<P, F, O> Iterator for PackageAssembler<P, F, O>
where
    P: Iterator<Item = Result<Package>>,
    F: Iterator<Item = Result<PackageFiles>>,
    O: Iterator<Item = Result<PackageChangelogs>>,
{
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

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::metadata::{
            filelists::{FilelistsReader, FilelistsWriter},
            other::{OtherReader, OtherWriter},
            primary::{PrimaryReader, PrimaryWriter},
        },
    };

    const PRIMARY_XML: &str = include_str!("../../testdata/primary.xml");
    const FILELISTS_XML: &str = include_str!("../../testdata/filelists.xml");
    const OTHER_XML: &str = include_str!("../../testdata/other.xml");

    fn assemble(primary: &str, filelists: &str, other: &str) -> Result<Vec<Package>> {
        PackageAssembler::new(
            PrimaryReader::new(primary.as_bytes()),
            FilelistsReader::new(filelists.as_bytes()),
            OtherReader::new(other.as_bytes()),
        )
        .collect()
    }

    #[test]
    fn out_of_order_records() -> Result<()> {
        let packages = assemble(PRIMARY_XML, FILELISTS_XML, OTHER_XML)?;

        assert_eq!(packages.len(), 2);
        assert_eq!(packages[0].name, "bear");
        assert_eq!(packages[0].files.len(), 3);
        assert_eq!(packages[0].changelogs.len(), 1);
        assert_eq!(packages[1].name, "camel");
        assert_eq!(packages[1].files.len(), 2);
        assert!(packages[1].changelogs.is_empty());

        Ok(())
    }

    #[test]
    fn missing_record_is_error() {
        let filelists = FILELISTS_XML.replace("name=\"camel\"", "name=\"llama\"");

        match assemble(PRIMARY_XML, &filelists, OTHER_XML) {
            Err(MirrorError::MetadataParse { file, .. }) => assert_eq!(file, "filelists.xml"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn conflicting_pkgid_is_error() {
        let other = OTHER_XML.replace(
            "pkgid=\"ceb0f0bb58be244393cc565e8ee5af0ad36a5aae36e51f1a8f6e2d84ae5ee5e6\"",
            "pkgid=\"0000000000000000000000000000000000000000000000000000000000000000\"",
        );

        match assemble(PRIMARY_XML, FILELISTS_XML, &other) {
            Err(MirrorError::MetadataParse { file, .. }) => assert_eq!(file, "other.xml"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn extra_record_is_error() {
        let filelists = FILELISTS_XML.replace(
            "</filelists>",
            r#"<package pkgid="ab" name="walrus" arch="noarch"><version epoch="0" ver="5.21" rel="1"/></package></filelists>"#,
        );

        assert!(assemble(PRIMARY_XML, &filelists, OTHER_XML).is_err());
    }

    #[test]
    fn generated_files_reassemble() -> Result<()> {
        let packages = assemble(PRIMARY_XML, FILELISTS_XML, OTHER_XML)?;

        let mut primary = PrimaryWriter::new(packages.len());
        let mut filelists = FilelistsWriter::new(packages.len());
        let mut other = OtherWriter::new(packages.len());

        for p in &packages {
            primary.add(p, &p.location_href);
            filelists.add(p);
            other.add(p);
        }

        let reassembled = assemble(&primary.finish(), &filelists.finish(), &other.finish())?;
        assert_eq!(reassembled, packages);

        Ok(())
    }
}
