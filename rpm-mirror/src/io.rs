// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! I/O helpers. */

use {
    crate::error::{MirrorError, Result},
    flate2::{read::MultiGzDecoder, GzBuilder},
    futures::AsyncRead,
    pin_project::pin_project,
    serde::{Deserialize, Serialize},
    std::{
        fmt::Formatter,
        io::{Read, Write},
        pin::Pin,
        str::FromStr,
        task::{Context, Poll},
    },
};

/// Compression format of a repository file.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Compression {
    /// No compression.
    None,
    /// Bzip2 compression.
    Bzip2,
    /// Gzip compression.
    Gzip,
    /// Xz compression.
    Xz,
    /// Zstd compression.
    Zstd,
}

impl Compression {
    /// Resolve the compression of a file from its name.
    pub fn from_path(path: &str) -> Self {
        match path {
            _ if path.ends_with(".bz2") => Self::Bzip2,
            _ if path.ends_with(".gz") => Self::Gzip,
            _ if path.ends_with(".xz") => Self::Xz,
            _ if path.ends_with(".zst") => Self::Zstd,
            _ => Self::None,
        }
    }

    /// Filename extension for files compressed in this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Bzip2 => ".bz2",
            Self::Gzip => ".gz",
            Self::Xz => ".xz",
            Self::Zstd => ".zst",
        }
    }

    /// Wrap a reader with transparent decompression.
    pub fn decoder<'a>(&self, reader: impl Read + Send + 'a) -> Result<Box<dyn Read + Send + 'a>> {
        Ok(match self {
            Self::None => Box::new(reader),
            Self::Bzip2 => Box::new(bzip2::read::MultiBzDecoder::new(reader)),
            Self::Gzip => Box::new(MultiGzDecoder::new(reader)),
            Self::Xz => Box::new(xz2::read::XzDecoder::new(reader)),
            Self::Zstd => Box::new(zstd::stream::read::Decoder::new(reader)?),
        })
    }

    /// Compress a buffer.
    ///
    /// Output is deterministic: gzip headers carry no modification time or file name.
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::None => Ok(data.to_vec()),
            Self::Bzip2 => {
                let mut encoder =
                    bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
                encoder.write_all(data)?;
                Ok(encoder.finish()?)
            }
            Self::Gzip => {
                let mut encoder =
                    GzBuilder::new()
                        .mtime(0)
                        .write(Vec::new(), flate2::Compression::default());
                encoder.write_all(data)?;
                Ok(encoder.finish()?)
            }
            Self::Xz => {
                let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
                encoder.write_all(data)?;
                Ok(encoder.finish()?)
            }
            Self::Zstd => Ok(zstd::stream::encode_all(std::io::Cursor::new(data), 3)?),
        }
    }
}

/// A content digest algorithm.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumType {
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl Default for ChecksumType {
    fn default() -> Self {
        Self::Sha256
    }
}

impl ChecksumType {
    /// The name of this checksum in repository metadata.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha224 => "sha224",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }

    /// Length in bytes of digests of this type.
    pub fn digest_len(&self) -> usize {
        match self {
            Self::Md5 => 16,
            Self::Sha1 => 20,
            Self::Sha224 => 28,
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }

    /// Create a new hasher for this digest type.
    pub fn new_hasher(&self) -> Box<dyn digest::DynDigest + Send> {
        match self {
            Self::Md5 => Box::new(md5::Md5::default()),
            Self::Sha1 => Box::new(sha1::Sha1::default()),
            Self::Sha224 => Box::new(sha2::Sha224::default()),
            Self::Sha256 => Box::new(sha2::Sha256::default()),
            Self::Sha384 => Box::new(sha2::Sha384::default()),
            Self::Sha512 => Box::new(sha2::Sha512::default()),
        }
    }
}

impl std::fmt::Display for ChecksumType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ChecksumType {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self> {
        // `sha` is what old yum tooling wrote for SHA-1.
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha" | "sha1" => Ok(Self::Sha1),
            "sha224" => Ok(Self::Sha224),
            "sha256" => Ok(Self::Sha256),
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            _ => Err(MirrorError::UnknownDigestFormat(s.to_string())),
        }
    }
}

/// Represents a content digest.
#[derive(Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ContentDigest {
    checksum: ChecksumType,
    digest: Vec<u8>,
}

impl std::fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}({})", self.checksum, hex::encode(&self.digest))
    }
}

impl ContentDigest {
    /// Create a new SHA-1 instance by parsing a hex digest.
    pub fn sha1_hex(digest: &str) -> Result<Self> {
        Self::from_hex_digest(ChecksumType::Sha1, digest)
    }

    /// Create a new SHA-256 instance by parsing a hex digest.
    pub fn sha256_hex(digest: &str) -> Result<Self> {
        Self::from_hex_digest(ChecksumType::Sha256, digest)
    }

    /// Obtain an instance by parsing a hex string as a [ChecksumType].
    pub fn from_hex_digest(checksum: ChecksumType, digest: &str) -> Result<Self> {
        let decoded = hex::decode(digest.trim())
            .map_err(|e| MirrorError::ContentDigestBadHex(digest.to_string(), e))?;

        if decoded.len() != checksum.digest_len() {
            return Err(MirrorError::ContentDigestBadHex(
                digest.to_string(),
                hex::FromHexError::InvalidStringLength,
            ));
        }

        Ok(Self {
            checksum,
            digest: decoded,
        })
    }

    /// Compute the digest of a buffer.
    pub fn compute(checksum: ChecksumType, data: &[u8]) -> Self {
        let mut hasher = checksum.new_hasher();
        hasher.update(data);

        Self {
            checksum,
            digest: hasher.finalize().to_vec(),
        }
    }

    /// Compute the digest of everything a reader emits.
    ///
    /// Returns the digest and the number of bytes read.
    pub fn compute_reader(checksum: ChecksumType, mut reader: impl Read) -> Result<(Self, u64)> {
        let mut hasher = checksum.new_hasher();
        let mut buf = [0u8; 32768];
        let mut total = 0u64;

        loop {
            let count = reader.read(&mut buf)?;
            if count == 0 {
                break;
            }
            hasher.update(&buf[0..count]);
            total += count as u64;
        }

        Ok((
            Self {
                checksum,
                digest: hasher.finalize().to_vec(),
            },
            total,
        ))
    }

    /// Create a new hasher matching for the type of this digest.
    pub fn new_hasher(&self) -> Box<dyn digest::DynDigest + Send> {
        self.checksum.new_hasher()
    }

    /// Obtain the digest bytes for this content digest.
    pub fn digest_bytes(&self) -> &[u8] {
        &self.digest
    }

    /// Obtain the hex encoded content digest.
    pub fn digest_hex(&self) -> String {
        hex::encode(&self.digest)
    }

    /// Obtain the [ChecksumType] for this digest.
    pub fn checksum_type(&self) -> ChecksumType {
        self.checksum
    }
}

/// Describes why fetched content cannot be trusted.
///
/// Carried inside [std::io::Error] by [ContentValidatingReader] so transports can tell
/// an integrity failure apart from a transport failure.
#[derive(Debug)]
pub struct IntegrityViolation(pub String);

impl std::fmt::Display for IntegrityViolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for IntegrityViolation {}

fn integrity_error(message: String) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        IntegrityViolation(message),
    )
}

/// Convert an I/O error from reading `path` into the appropriate [MirrorError].
pub fn classify_read_error(path: &str, e: std::io::Error) -> MirrorError {
    if let Some(violation) = e
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<IntegrityViolation>())
    {
        MirrorError::RemoteIntegrity {
            path: path.to_string(),
            reason: violation.0.clone(),
        }
    } else {
        MirrorError::RemoteFetch {
            path: path.to_string(),
            source: e,
        }
    }
}

/// An adapter for [AsyncRead] streams that validates source size and digest.
///
/// Data is emitted as it streams. The digest is compared once the source reports
/// end of stream and the size is enforced as bytes arrive, so readers must read to
/// completion for validation to occur.
#[pin_project]
pub struct ContentValidatingReader<R> {
    hasher: Option<Box<dyn digest::DynDigest + Send>>,
    expected_size: Option<u64>,
    expected_digest: ContentDigest,
    #[pin]
    source: R,
    bytes_read: u64,
}

impl<R> ContentValidatingReader<R> {
    pub fn new(source: R, expected_size: Option<u64>, expected_digest: ContentDigest) -> Self {
        Self {
            hasher: Some(expected_digest.new_hasher()),
            expected_size,
            expected_digest,
            source,
            bytes_read: 0,
        }
    }
}

impl<R> AsyncRead for ContentValidatingReader<R>
where
    R: AsyncRead + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<std::io::Result<usize>> {
        let mut this = self.project();
        let want_bytes = !buf.is_empty();

        match this.source.as_mut().poll_read(cx, buf) {
            Poll::Ready(Ok(size)) => {
                if size > 0 {
                    if let Some(hasher) = this.hasher.as_mut() {
                        hasher.update(&buf[0..size]);
                    }

                    *this.bytes_read += size as u64;

                    if let Some(expected) = this.expected_size {
                        if *this.bytes_read > *expected {
                            return Poll::Ready(Err(integrity_error(format!(
                                "extra bytes read: expected {}; got {}",
                                expected, this.bytes_read
                            ))));
                        }
                    }
                } else if want_bytes {
                    if let Some(expected) = this.expected_size {
                        if *this.bytes_read != *expected {
                            return Poll::Ready(Err(integrity_error(format!(
                                "size mismatch of retrieved content: expected {}; got {}",
                                expected, this.bytes_read
                            ))));
                        }
                    }

                    if let Some(hasher) = this.hasher.take() {
                        let got_digest = hasher.finalize();

                        if got_digest.as_ref() != this.expected_digest.digest_bytes() {
                            return Poll::Ready(Err(integrity_error(format!(
                                "{} digest mismatch of retrieved content: expected {}, got {}",
                                this.expected_digest.checksum_type(),
                                this.expected_digest.digest_hex(),
                                hex::encode(got_digest)
                            ))));
                        }
                    }
                }

                Poll::Ready(Ok(size))
            }
            res => res,
        }
    }
}

/// An [AsyncRead] stream adapter that computes a [ContentDigest] as data is read.
#[pin_project]
pub struct DigestingReader<R> {
    checksum: ChecksumType,
    hasher: Box<dyn digest::DynDigest + Send>,
    bytes_read: u64,
    #[pin]
    source: R,
}

impl<R> DigestingReader<R> {
    /// Construct a new instance from a source reader.
    pub fn new(source: R, checksum: ChecksumType) -> Self {
        Self {
            checksum,
            hasher: checksum.new_hasher(),
            bytes_read: 0,
            source,
        }
    }

    /// Finish the stream.
    ///
    /// Returns the source reader, the resolved [ContentDigest] and the number of bytes read.
    pub fn finish(self) -> (R, ContentDigest, u64) {
        (
            self.source,
            ContentDigest {
                checksum: self.checksum,
                digest: self.hasher.finalize().to_vec(),
            },
            self.bytes_read,
        )
    }
}

impl<R> AsyncRead for DigestingReader<R>
where
    R: AsyncRead + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<std::io::Result<usize>> {
        let mut this = self.project();

        match this.source.as_mut().poll_read(cx, buf) {
            Poll::Ready(Ok(size)) => {
                if size > 0 {
                    this.hasher.update(&buf[0..size]);
                    *this.bytes_read += size as u64;
                }

                Poll::Ready(Ok(size))
            }
            res => res,
        }
    }
}

/// Drain content from a reader to a black hole.
pub async fn drain_reader(reader: impl AsyncRead) -> std::io::Result<u64> {
    let mut sink = futures::io::sink();
    futures::io::copy(reader, &mut sink).await
}

#[cfg(test)]
mod test {
    use {super::*, futures::AsyncReadExt};

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn checksum_names() -> Result<()> {
        assert_eq!(ChecksumType::from_str("sha")?, ChecksumType::Sha1);
        assert_eq!(ChecksumType::from_str("SHA256")?, ChecksumType::Sha256);
        assert!(ChecksumType::from_str("crc32").is_err());
        assert_eq!(ChecksumType::Sha512.to_string(), "sha512");

        Ok(())
    }

    #[test]
    fn digest_hex_length_enforced() {
        assert!(ContentDigest::sha256_hex("abcd").is_err());
        assert!(ContentDigest::sha256_hex("zz").is_err());
        assert!(ContentDigest::sha256_hex(HELLO_SHA256).is_ok());
    }

    #[test]
    fn gzip_is_deterministic() -> Result<()> {
        let a = Compression::Gzip.compress(b"hello world")?;
        let b = Compression::Gzip.compress(b"hello world")?;
        assert_eq!(a, b);

        let mut decoded = String::new();
        Compression::Gzip
            .decoder(std::io::Cursor::new(a))?
            .read_to_string(&mut decoded)?;
        assert_eq!(decoded, "hello world");

        Ok(())
    }

    #[test]
    fn compression_from_path() -> Result<()> {
        for (path, compression) in [
            ("repodata/abc-primary.xml.bz2", Compression::Bzip2),
            ("repodata/abc-primary.xml.gz", Compression::Gzip),
            ("repodata/abc-primary.xml.xz", Compression::Xz),
            ("repodata/abc-primary.xml.zst", Compression::Zstd),
            ("repodata/abc-primary.xml", Compression::None),
        ] {
            assert_eq!(Compression::from_path(path), compression);

            let mut decoded = String::new();
            compression
                .decoder(std::io::Cursor::new(compression.compress(b"<metadata/>")?))?
                .read_to_string(&mut decoded)?;
            assert_eq!(decoded, "<metadata/>");
        }

        Ok(())
    }

    #[tokio::test]
    async fn validating_reader_accepts_good_content() -> Result<()> {
        let mut reader = ContentValidatingReader::new(
            futures::io::Cursor::new(b"hello".to_vec()),
            Some(5),
            ContentDigest::sha256_hex(HELLO_SHA256)?,
        );

        let mut buf = vec![];
        reader.read_to_end(&mut buf).await?;
        assert_eq!(buf, b"hello");

        Ok(())
    }

    #[tokio::test]
    async fn validating_reader_rejects_bad_digest() -> Result<()> {
        let mut reader = ContentValidatingReader::new(
            futures::io::Cursor::new(b"jello".to_vec()),
            None,
            ContentDigest::sha256_hex(HELLO_SHA256)?,
        );

        let mut buf = vec![];
        let err = reader.read_to_end(&mut buf).await.unwrap_err();

        assert!(matches!(
            classify_read_error("x", err),
            MirrorError::RemoteIntegrity { .. }
        ));

        Ok(())
    }

    #[tokio::test]
    async fn validating_reader_rejects_truncation() -> Result<()> {
        let mut reader = ContentValidatingReader::new(
            futures::io::Cursor::new(b"hell".to_vec()),
            Some(5),
            ContentDigest::sha256_hex(HELLO_SHA256)?,
        );

        let mut buf = vec![];
        assert!(reader.read_to_end(&mut buf).await.is_err());

        Ok(())
    }
}
