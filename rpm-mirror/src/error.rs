// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling. */

use {
    crate::platform::{PublicationId, RemoteId, RepositoryId, UnitId, VersionId},
    thiserror::Error,
};

/// Coarse classification of a [MirrorError].
///
/// This is what a job result reports to users alongside the human readable message.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Network or transport failure. Retryable.
    RemoteFetch,
    /// Fetched content did not match its advertised size or digest.
    RemoteIntegrity,
    /// Metadata could not be parsed or cross-referenced.
    MetadataParse,
    /// Content violated a sync policy.
    SyncValidation,
    /// The signing service failed.
    Signing,
    /// The operation was cancelled cooperatively.
    Cancelled,
    /// The caller submitted an invalid request.
    InvalidRequest,
    /// The content platform refused an operation.
    Platform,
    /// Anything else.
    Other,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::RemoteFetch => "RemoteFetchError",
            Self::RemoteIntegrity => "RemoteIntegrityError",
            Self::MetadataParse => "MetadataParseError",
            Self::SyncValidation => "SyncValidationError",
            Self::Signing => "SigningError",
            Self::Cancelled => "Cancelled",
            Self::InvalidRequest => "InvalidRequest",
            Self::Platform => "PlatformError",
            Self::Other => "Error",
        })
    }
}

/// Error type for this crate.
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("URL parse error: {0:?}")]
    UrlParse(#[from] url::ParseError),

    #[error("HTTP client error: {0:?}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0:?}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("PGP error: {0:?}")]
    Pgp(#[from] pgp::errors::Error),

    #[error("XML error: {0:?}")]
    Xml(#[from] quick_xml::Error),

    #[error("error fetching {path}: {source}")]
    RemoteFetch {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("integrity check failed for {path}: {reason}")]
    RemoteIntegrity { path: String, reason: String },

    #[error("failed to parse {file} at <{element}>: {message}")]
    MetadataParse {
        file: String,
        element: String,
        message: String,
    },

    #[error("sync validation error: {0}")]
    SyncValidation(String),

    #[error("signing error: {0}")]
    Signing(String),

    #[error("invalid hex in content digest: {0}; {1:?}")]
    ContentDigestBadHex(String, hex::FromHexError),

    #[error("unknown content digest format: {0}")]
    UnknownDigestFormat(String),

    #[error("repository metadata entry not found: {0}")]
    MetadataFileNotFound(&'static str),

    #[error("content size missing from metadata entry {0}")]
    MetadataMissingSize(String),

    #[error("unsupported URL scheme: {0}")]
    UnsupportedUrlScheme(String),

    #[error("repository not found: {0}")]
    RepositoryNotFound(RepositoryId),

    #[error("remote not found: {0}")]
    RemoteNotFound(RemoteId),

    #[error("repository version not found: {0}")]
    VersionNotFound(VersionId),

    #[error("content unit not found: {0}")]
    UnitNotFound(UnitId),

    #[error("artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("two packages publish to {0}")]
    DuplicatePublishedPath(String),

    #[error("publication not found: {0}")]
    PublicationNotFound(PublicationId),

    #[error("signing service not registered: {0}")]
    SigningServiceNotFound(String),

    #[error("repository {repository} moved from version {expected} to {actual} during commit")]
    VersionConflict {
        repository: RepositoryId,
        expected: VersionId,
        actual: VersionId,
    },

    #[error("cannot delete repository version {0}: {1}")]
    VersionDeleteRefused(VersionId, &'static str),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl MirrorError {
    /// Construct a [MirrorError::MetadataParse].
    pub fn parse(file: impl ToString, element: impl ToString, message: impl ToString) -> Self {
        Self::MetadataParse {
            file: file.to_string(),
            element: element.to_string(),
            message: message.to_string(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RemoteFetch { .. } | Self::Http(_) => ErrorKind::RemoteFetch,
            Self::RemoteIntegrity { .. } => ErrorKind::RemoteIntegrity,
            Self::MetadataParse { .. }
            | Self::Yaml(_)
            | Self::Xml(_)
            | Self::ContentDigestBadHex(..)
            | Self::UnknownDigestFormat(_)
            | Self::MetadataFileNotFound(_)
            | Self::MetadataMissingSize(_) => ErrorKind::MetadataParse,
            Self::SyncValidation(_) => ErrorKind::SyncValidation,
            Self::Signing(_) | Self::Pgp(_) | Self::SigningServiceNotFound(_) => ErrorKind::Signing,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::InvalidRequest(_) | Self::UnsupportedUrlScheme(_) | Self::UrlParse(_) => {
                ErrorKind::InvalidRequest
            }
            Self::RepositoryNotFound(_)
            | Self::RemoteNotFound(_)
            | Self::VersionNotFound(_)
            | Self::UnitNotFound(_)
            | Self::ArtifactNotFound(_)
            | Self::DuplicatePublishedPath(_)
            | Self::PublicationNotFound(_)
            | Self::VersionConflict { .. }
            | Self::VersionDeleteRefused(..) => ErrorKind::Platform,
            Self::Io(_) => ErrorKind::Other,
        }
    }

    /// Whether a bounded retry may resolve this error.
    ///
    /// Only transport failures qualify. Integrity failures are never retried and neither
    /// are paths the remote reports as absent.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RemoteFetch { source, .. } => source.kind() != std::io::ErrorKind::NotFound,
            Self::Http(e) => e.status() != Some(reqwest::StatusCode::NOT_FOUND),
            _ => false,
        }
    }

    /// Whether this error reports an absent remote path.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::RemoteFetch { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

/// Result type for this crate.
pub type Result<T> = std::result::Result<T, MirrorError>;
