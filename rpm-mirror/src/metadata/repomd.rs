// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! `repomd.xml` file format. */

use {
    crate::{
        error::{MirrorError, Result},
        io::{ChecksumType, ContentDigest},
        metadata::xml::XmlWriter,
    },
    serde::{Deserialize, Serialize},
    std::{io::Read, str::FromStr},
};

/// XML namespace of `repomd.xml`.
pub const REPO_NAMESPACE: &str = "http://linux.duke.edu/metadata/repo";

/// XML namespace of RPM specific extensions.
pub const RPM_NAMESPACE: &str = "http://linux.duke.edu/metadata/rpm";

/// A `repomd.xml` file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoMd {
    /// Revision of the repository.
    ///
    /// Often an integer-like value.
    #[serde(default)]
    pub revision: String,
    /// Describes additional primary data files constituting this repository.
    #[serde(default)]
    pub data: Vec<RepoMdData>,
}

impl RepoMd {
    /// Construct an instance by parsing XML from a reader.
    pub fn from_reader(reader: impl Read) -> Result<Self> {
        serde_xml_rs::from_reader(reader)
            .map_err(|e| MirrorError::parse("repomd.xml", "repomd", e))
    }

    /// Construct an instance by parsing XML from a string.
    pub fn from_xml(s: &str) -> Result<Self> {
        Self::from_reader(s.as_bytes())
    }

    /// Find the entry of the given data type.
    pub fn find(&self, data_type: &str) -> Option<&RepoMdData> {
        self.data.iter().find(|entry| entry.data_type == data_type)
    }

    /// Render as XML.
    pub fn to_xml(&self) -> String {
        let mut w = XmlWriter::new();

        w.start(
            "repomd",
            &[("xmlns", REPO_NAMESPACE), ("xmlns:rpm", RPM_NAMESPACE)],
        );
        w.text("revision", &[], &self.revision);

        for entry in &self.data {
            w.start("data", &[("type", &entry.data_type)]);
            w.text(
                "checksum",
                &[("type", &entry.checksum.name)],
                &entry.checksum.value,
            );
            if let Some(open) = &entry.open_checksum {
                w.text("open-checksum", &[("type", &open.name)], &open.value);
            }
            if let Some(header) = &entry.header_checksum {
                w.text("header-checksum", &[("type", &header.name)], &header.value);
            }
            w.empty("location", &[("href", &entry.location.href)]);
            if let Some(timestamp) = entry.timestamp {
                w.text("timestamp", &[], &timestamp.to_string());
            }
            if let Some(size) = entry.size {
                w.text("size", &[], &size.to_string());
            }
            if let Some(size) = entry.open_size {
                w.text("open-size", &[], &size.to_string());
            }
            if let Some(size) = entry.header_size {
                w.text("header-size", &[], &size.to_string());
            }
            w.end("data");
        }

        w.end("repomd");

        w.finish()
    }
}

/// A `<data>` element in a `repomd.xml` file.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RepoMdData {
    /// The type of data.
    #[serde(rename = "type")]
    pub data_type: String,
    /// Content checksum of this file.
    pub checksum: Checksum,
    /// Where the file is located.
    pub location: Location,
    /// Size in bytes of the file as stored in the repository.
    pub size: Option<u64>,
    /// Time file was created/modified.
    pub timestamp: Option<u64>,
    /// Content checksum of the decoded (often decompressed) file.
    #[serde(rename = "open-checksum")]
    pub open_checksum: Option<Checksum>,
    /// Size in bytes of the decoded (often decompressed) file.
    #[serde(rename = "open-size")]
    pub open_size: Option<u64>,
    /// Content checksum of header data.
    #[serde(rename = "header-checksum")]
    pub header_checksum: Option<Checksum>,
    /// Size in bytes of the header.
    #[serde(rename = "header-size")]
    pub header_size: Option<u64>,
}

impl RepoMdData {
    /// The digest the stored file must have.
    pub fn content_digest(&self) -> Result<ContentDigest> {
        ContentDigest::try_from(&self.checksum)
    }
}

/// The content checksum of a `<data>` element.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Checksum {
    /// The name of the content digest.
    #[serde(rename = "type")]
    pub name: String,
    /// The hex encoded content digest.
    #[serde(rename = "$value")]
    pub value: String,
}

impl From<&ContentDigest> for Checksum {
    fn from(digest: &ContentDigest) -> Self {
        Self {
            name: digest.checksum_type().name().to_string(),
            value: digest.digest_hex(),
        }
    }
}

impl TryFrom<&Checksum> for ContentDigest {
    type Error = MirrorError;

    fn try_from(v: &Checksum) -> std::result::Result<Self, Self::Error> {
        ContentDigest::from_hex_digest(ChecksumType::from_str(&v.name)?, &v.value)
    }
}

/// The location of a `<data>` element.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Location {
    pub href: String,
}

#[cfg(test)]
mod test {
    use super::*;

    const UPSTREAM_REPOMD_XML: &str = include_str!("../../testdata/repomd.xml");

    #[test]
    fn parse_upstream() -> Result<()> {
        let repomd = RepoMd::from_xml(UPSTREAM_REPOMD_XML)?;

        assert_eq!(repomd.revision, "1545934183");
        assert_eq!(repomd.data.len(), 4);

        let primary = repomd.find("primary").unwrap();
        assert_eq!(
            primary.location.href,
            "repodata/66a5a3c9ba51d0e0a7dfcd91dd5bfe2ab2c86f4f9e1f4a1e15f16a96f1e03e4b-primary.xml.gz"
        );
        assert_eq!(primary.size, Some(3132));
        assert_eq!(primary.open_size, Some(20417));
        assert_eq!(
            primary.content_digest()?.checksum_type(),
            ChecksumType::Sha256
        );

        let updateinfo = repomd.find("updateinfo").unwrap();
        assert_eq!(updateinfo.content_digest()?.checksum_type(), ChecksumType::Sha1);

        Ok(())
    }

    #[test]
    fn render_parse() -> Result<()> {
        let digest = ContentDigest::compute(ChecksumType::Sha256, b"primary");

        let repomd = RepoMd {
            revision: "10".into(),
            data: vec![RepoMdData {
                data_type: "primary".into(),
                checksum: Checksum::from(&digest),
                location: Location {
                    href: "repodata/x-primary.xml.gz".into(),
                },
                size: Some(7),
                timestamp: Some(10),
                open_checksum: Some(Checksum::from(&digest)),
                open_size: Some(9),
                header_checksum: None,
                header_size: None,
            }],
        };

        let xml = repomd.to_xml();
        assert!(xml.contains("<repomd xmlns=\"http://linux.duke.edu/metadata/repo\""));

        let parsed = RepoMd::from_xml(&xml)?;
        assert_eq!(parsed.revision, "10");
        assert_eq!(parsed.data[0].content_digest()?, digest);
        assert_eq!(parsed.data[0].open_size, Some(9));
        assert_eq!(parsed.data[0].timestamp, Some(10));

        Ok(())
    }
}
