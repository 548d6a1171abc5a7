// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! `other.xml` file format. */

use {
    crate::{
        content::{Changelog, Package},
        error::Result,
        metadata::{
            filelists::{read_ident_start, read_ident_version, PackageIdent},
            xml::{XmlReader, XmlWriter},
        },
    },
    std::io::BufRead,
};

/// XML namespace of `other.xml`.
pub const OTHER_NAMESPACE: &str = "http://linux.duke.edu/metadata/other";

const FILE: &str = "other.xml";

/// The changelogs of one package.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PackageChangelogs {
    pub ident: PackageIdent,
    pub changelogs: Vec<Changelog>,
}

/// Streaming reader of `other.xml` records.
pub struct OtherReader<R: BufRead> {
    xml: XmlReader<R>,
    done: bool,
}

impl<R: BufRead> OtherReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            xml: XmlReader::new(source, FILE),
            done: false,
        }
    }

    fn next_record(&mut self) -> Result<Option<PackageChangelogs>> {
        let (start, empty) = match self.xml.find(b"package")? {
            Some(v) => v,
            None => return Ok(None),
        };

        let mut record = PackageChangelogs {
            ident: read_ident_start(&self.xml, &start)?,
            changelogs: vec![],
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
                b"changelog" => {
                    let author = self.xml.attr(&e, b"author")?.unwrap_or_default();
                    let date = self.xml.u64_attr(&e, b"date")?.unwrap_or(0);
                    let text = self.xml.text(empty)?;

                    record.changelogs.push(Changelog { author, date, text });
                }
                _ => self.xml.finish(empty)?,
            }
        }

        Ok(Some(record))
    }
}

impl<R: BufRead> Iterator for OtherReader<R> {
    type Item = Result<PackageChangelogs>;

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

/// Writes an `other.xml` document.
pub struct OtherWriter {
    xml: XmlWriter,
}

impl OtherWriter {
    pub fn new(count: usize) -> Self {
        let mut xml = XmlWriter::new();
        xml.start(
            "otherdata",
            &[("xmlns", OTHER_NAMESPACE), ("packages", &count.to_string())],
        );

        Self { xml }
    }

    pub fn add(&mut self, p: &Package) {
        PackageIdent::of(p).write_start(&mut self.xml);

        for changelog in &p.changelogs {
            self.xml.text(
                "changelog",
                &[
                    ("author", &changelog.author),
                    ("date", &changelog.date.to_string()),
                ],
                &changelog.text,
            );
        }

        self.xml.end("package");
    }

    pub fn finish(mut self) -> String {
        self.xml.end("otherdata");
        self.xml.finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const OTHER_XML: &str = include_str!("../../testdata/other.xml");

    #[test]
    fn parse_records() -> Result<()> {
        let records = OtherReader::new(OTHER_XML.as_bytes()).collect::<Result<Vec<_>>>()?;

        assert_eq!(records.len(), 2);

        let bear = &records[0];
        assert_eq!(bear.changelogs.len(), 1);
        assert_eq!(
            bear.changelogs[0].author,
            "Bear Keeper <bear@example.com> - 4.1-1"
        );
        assert_eq!(bear.changelogs[0].date, 1331812800);
        assert_eq!(
            bear.changelogs[0].text,
            "- Initial packaging\n- Second line"
        );

        assert!(records[1].changelogs.is_empty());

        Ok(())
    }
}
